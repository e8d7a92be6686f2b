//! Result aggregation: deduplication, source weighting and ranking

use std::collections::HashMap;
use url::Url;

use helpdesk_rag_core::vectors::cosine_similarity;
use helpdesk_rag_core::{Hit, RankedHit, SourceId};

/// Snippet-embedding similarity above which two hits are duplicates
pub const DEDUP_COSINE_THRESHOLD: f32 = 0.97;

/// Canonical form of a URL for duplicate detection: lowercased scheme and
/// host, default port dropped, fragment dropped, trailing slash trimmed.
pub fn normalize_url(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(mut url) => {
            url.set_fragment(None);
            let mut normalized = url.to_string();
            if normalized.ends_with('/') {
                normalized.pop();
            }
            normalized
        }
        Err(_) => raw.trim().trim_end_matches('/').to_lowercase(),
    }
}

fn same_group(a: &Hit, b: &Hit) -> bool {
    if a.source == b.source && a.doc_id == b.doc_id {
        return true;
    }
    if let (Some(va), Some(vb)) = (a.vector.as_ref(), b.vector.as_ref()) {
        if cosine_similarity(va, vb) >= DEDUP_COSINE_THRESHOLD {
            return true;
        }
    }
    if !a.payload.url.is_empty()
        && normalize_url(&a.payload.url) == normalize_url(&b.payload.url)
    {
        return true;
    }
    false
}

/// Weight, deduplicate and rank hits; keep the global top-k.
///
/// Within a duplicate group only the highest-scoring hit survives. The
/// sort is stable, so equal scores keep their arrival order.
pub fn rank_hits(
    hits: Vec<Hit>,
    weights: &HashMap<SourceId, f32>,
    top_k_global: usize,
) -> Vec<RankedHit> {
    let mut ranked: Vec<RankedHit> = Vec::with_capacity(hits.len());
    let mut group_heads: Vec<usize> = Vec::new();

    for hit in hits {
        let weight = weights.get(&hit.source).copied().unwrap_or(1.0);
        let final_score = hit.score * weight;

        let group = group_heads
            .iter()
            .position(|&head| same_group(&ranked[head].hit, &hit));

        match group {
            Some(group_id) => {
                let head = group_heads[group_id];
                if final_score > ranked[head].final_score {
                    ranked[head] = RankedHit {
                        hit,
                        final_score,
                        dedup_group: group_id,
                    };
                }
            }
            None => {
                let group_id = group_heads.len();
                group_heads.push(ranked.len());
                ranked.push(RankedHit {
                    hit,
                    final_score,
                    dedup_group: group_id,
                });
            }
        }
    }

    ranked.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(top_k_global);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use helpdesk_rag_core::HitPayload;

    fn hit(source: &str, doc_id: &str, score: f32, url: &str) -> Hit {
        Hit {
            source: SourceId::new(source),
            doc_id: doc_id.to_string(),
            score,
            payload: HitPayload {
                title: format!("doc {doc_id}"),
                url: url.to_string(),
                snippet: "snippet".to_string(),
                updated_at: None,
            },
            vector: None,
        }
    }

    #[test]
    fn ranks_by_weighted_score_descending() {
        let mut weights = HashMap::new();
        weights.insert(SourceId::new("JIRA"), 2.0);

        let hits = vec![
            hit("ZENDESK", "z1", 0.9, "https://z/1"),
            hit("JIRA", "j1", 0.5, "https://j/1"),
        ];
        let ranked = rank_hits(hits, &weights, 8);
        // 0.5 * 2.0 = 1.0 beats 0.9 * 1.0
        assert_eq!(ranked[0].hit.doc_id, "j1");
        assert!((ranked[0].final_score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn same_doc_id_collapses_to_best() {
        let hits = vec![
            hit("JIRA", "j1", 0.7, "https://j/1"),
            hit("JIRA", "j1", 0.9, "https://j/1"),
        ];
        let ranked = rank_hits(hits, &HashMap::new(), 8);
        assert_eq!(ranked.len(), 1);
        assert!((ranked[0].final_score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn equal_normalized_urls_collapse() {
        let hits = vec![
            hit("JIRA", "j1", 0.8, "https://wiki.example.com/Page/"),
            hit("CONFLUENCE", "c9", 0.6, "HTTPS://wiki.example.com/Page#section"),
        ];
        let ranked = rank_hits(hits, &HashMap::new(), 8);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].hit.doc_id, "j1");
    }

    #[test]
    fn near_identical_snippet_vectors_collapse() {
        let mut a = hit("JIRA", "j1", 0.8, "https://j/1");
        let mut b = hit("ZENDESK", "z1", 0.7, "https://z/1");
        a.vector = Some(vec![1.0, 0.0]);
        b.vector = Some(vec![0.999, 0.0447]); // cosine ~0.999

        let ranked = rank_hits(vec![a, b], &HashMap::new(), 8);
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn distinct_hits_stay_separate_and_truncate() {
        let hits: Vec<Hit> = (0..12)
            .map(|i| hit("JIRA", &format!("j{i}"), 0.5 + i as f32 * 0.01, ""))
            .collect();
        let ranked = rank_hits(hits, &HashMap::new(), 8);
        assert_eq!(ranked.len(), 8);
        assert_eq!(ranked[0].hit.doc_id, "j11");
    }

    #[test]
    fn empty_urls_never_match_each_other() {
        let hits = vec![
            hit("JIRA", "j1", 0.8, ""),
            hit("ZENDESK", "z1", 0.7, ""),
        ];
        let ranked = rank_hits(hits, &HashMap::new(), 8);
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn url_normalization_drops_default_port() {
        assert_eq!(
            normalize_url("https://example.com:443/a"),
            normalize_url("https://example.com/a")
        );
        assert_eq!(
            normalize_url("https://Example.COM/a/"),
            normalize_url("https://example.com/a")
        );
    }
}
