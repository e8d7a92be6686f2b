//! Source selection and payload extraction
//!
//! Selection picks the subset of enabled sources a query should fan out
//! to. Extraction reduces each source's document shape to the uniform
//! payload record the response builder consumes, dropping hits that fail
//! the source's minimum-field validation.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

use helpdesk_rag_core::{HitPayload, Query, SourceId};

/// Chooses which sources a query fans out to.
///
/// Rules, in order: a non-empty `sources_hint` intersected with the
/// enabled set; a recognised client keyword in the question mapped through
/// the client table; otherwise every enabled source.
pub struct SourceSelector {
    enabled: Vec<SourceId>,
    /// Lowercased client keyword -> sources configured for that client
    clients: Vec<(String, Vec<SourceId>)>,
}

impl SourceSelector {
    pub fn new(enabled: Vec<SourceId>, clients: &HashMap<String, Vec<SourceId>>) -> Self {
        let mut client_rules: Vec<(String, Vec<SourceId>)> = clients
            .iter()
            .map(|(keyword, sources)| (keyword.to_lowercase(), sources.clone()))
            .collect();
        // Longest keyword first so "acme cloud" wins over "acme"
        client_rules.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Self {
            enabled,
            clients: client_rules,
        }
    }

    pub fn enabled(&self) -> &[SourceId] {
        &self.enabled
    }

    pub fn is_enabled(&self, source: &SourceId) -> bool {
        self.enabled.contains(source)
    }

    pub fn select(&self, query: &Query) -> Vec<SourceId> {
        if !query.sources_hint.is_empty() {
            return query
                .sources_hint
                .iter()
                .filter(|source| self.is_enabled(source))
                .cloned()
                .collect();
        }

        let text = query.normalized_text();
        for (keyword, sources) in &self.clients {
            if text.contains(keyword.as_str()) {
                return sources
                    .iter()
                    .filter(|source| self.is_enabled(source))
                    .cloned()
                    .collect();
            }
        }

        self.enabled.clone()
    }
}

/// Preferred payload fields for a source kind, most specific first
fn field_preferences(source: &SourceId) -> (&'static [&'static str], &'static [&'static str]) {
    // (title fields, snippet fields); url fields are uniform
    match source.as_str() {
        "JIRA" => (&["summary", "title", "key"], &["description", "content", "text"]),
        "ZENDESK" => (&["subject", "title"], &["description", "content", "text"]),
        "CONFLUENCE" => (&["title", "name"], &["excerpt", "content", "text"]),
        _ => (
            &["title", "subject", "name", "key"],
            &["snippet", "content", "text", "description", "excerpt"],
        ),
    }
}

const URL_FIELDS: &[&str] = &["url", "link", "href"];
const UPDATED_FIELDS: &[&str] = &["updated_at", "updated", "last_updated"];

fn first_string(raw: &Value, fields: &[&str]) -> Option<String> {
    for field in fields {
        if let Some(value) = raw.get(field).and_then(Value::as_str) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn updated_at(raw: &Value) -> Option<DateTime<Utc>> {
    first_string(raw, UPDATED_FIELDS)
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Reduce a raw document payload to the uniform record.
///
/// Returns `None` when the payload fails validation: no extractable title
/// or an empty snippet.
pub fn extract_payload(source: &SourceId, raw: &Value) -> Option<HitPayload> {
    if !raw.is_object() {
        return None;
    }
    let (title_fields, snippet_fields) = field_preferences(source);

    let title = first_string(raw, title_fields)?;
    let snippet = first_string(raw, snippet_fields)?;
    let url = first_string(raw, URL_FIELDS).unwrap_or_default();

    Some(HitPayload {
        title,
        url,
        snippet,
        updated_at: updated_at(raw),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn selector() -> SourceSelector {
        let enabled = vec![
            SourceId::new("JIRA"),
            SourceId::new("ZENDESK"),
            SourceId::new("CONFLUENCE"),
        ];
        let mut clients = HashMap::new();
        clients.insert(
            "rondot".to_string(),
            vec![SourceId::new("JIRA"), SourceId::new("CONFLUENCE")],
        );
        SourceSelector::new(enabled, &clients)
    }

    #[test]
    fn hint_intersects_with_enabled() {
        let query = Query::new("vpn issues").with_sources(vec![
            SourceId::new("ZENDESK"),
            SourceId::new("SAP"), // not enabled
        ]);
        assert_eq!(selector().select(&query), vec![SourceId::new("ZENDESK")]);
    }

    #[test]
    fn client_keyword_routes_to_client_sources() {
        let query = Query::new("Ticket for RONDOT about the printer");
        assert_eq!(
            selector().select(&query),
            vec![SourceId::new("JIRA"), SourceId::new("CONFLUENCE")]
        );
    }

    #[test]
    fn default_is_all_enabled_sources() {
        let query = Query::new("how do I reset my password?");
        assert_eq!(selector().select(&query).len(), 3);
    }

    #[test]
    fn hint_takes_precedence_over_client_match() {
        let query = Query::new("rondot printer").with_sources(vec![SourceId::new("ZENDESK")]);
        assert_eq!(selector().select(&query), vec![SourceId::new("ZENDESK")]);
    }

    #[test]
    fn jira_payload_prefers_summary() {
        let raw = json!({
            "summary": "VPN drops every hour",
            "key": "TCK-42",
            "description": "Users report hourly VPN drops.",
            "url": "https://jira.example.com/browse/TCK-42",
            "updated_at": "2025-03-26T08:51:46Z",
        });
        let payload = extract_payload(&SourceId::new("JIRA"), &raw).unwrap();
        assert_eq!(payload.title, "VPN drops every hour");
        assert_eq!(payload.snippet, "Users report hourly VPN drops.");
        assert!(payload.updated_at.is_some());
    }

    #[test]
    fn zendesk_payload_uses_subject() {
        let raw = json!({
            "subject": "Cannot log in",
            "description": "Password reset loop.",
            "link": "https://support.example.com/tickets/7",
        });
        let payload = extract_payload(&SourceId::new("ZENDESK"), &raw).unwrap();
        assert_eq!(payload.title, "Cannot log in");
        assert_eq!(payload.url, "https://support.example.com/tickets/7");
    }

    #[test]
    fn empty_snippet_fails_validation() {
        let raw = json!({ "title": "Orphan", "url": "https://x", "content": "  " });
        assert!(extract_payload(&SourceId::new("SAP"), &raw).is_none());
    }

    #[test]
    fn missing_title_fails_validation() {
        let raw = json!({ "content": "text without a title" });
        assert!(extract_payload(&SourceId::new("ERP"), &raw).is_none());
    }

    #[test]
    fn non_object_payload_fails_validation() {
        assert!(extract_payload(&SourceId::new("JIRA"), &json!("just a string")).is_none());
    }
}
