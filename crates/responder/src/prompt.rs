//! Prompt assembly
//!
//! The system message is a fixed template parameterised by answer mode.
//! Ranked hits are serialised into a numbered context block under a token
//! budget (estimated at 4 chars/token): whole hits are dropped from the
//! tail of the list first, then the last surviving hit loses the tail of
//! its snippet. The user message is the original question verbatim.

use helpdesk_rag_core::{AnswerMode, Citation, RankedHit};

/// Estimation used for the context budget
pub const CHARS_PER_TOKEN: usize = 4;

/// System template for a grounded answer
pub fn system_prompt(mode: AnswerMode) -> String {
    format!(
        "You are an IT helpdesk assistant. Answer the user's question using \
         the numbered context documents below. Cite the documents you used \
         as [n]. If the context does not contain the answer, say so instead \
         of guessing. Keep the answer under about {} words.",
        mode.word_cap()
    )
}

/// System template when retrieval produced no context
pub fn fallback_prompt(mode: AnswerMode) -> String {
    format!(
        "You are an IT helpdesk assistant. No internal documents matched \
         this question, so answer from general knowledge and start by \
         stating that the answer is not based on the internal knowledge \
         base. Keep the answer under about {} words.",
        mode.word_cap()
    )
}

/// Serialised context plus the citations for the hits that made it in
#[derive(Debug, Default)]
pub struct ContextBlock {
    pub text: String,
    pub citations: Vec<Citation>,
}

impl ContextBlock {
    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }
}

/// Render ranked hits as `[i] title — source — url\nsnippet` entries in
/// descending rank order, honouring `token_budget`.
pub fn build_context(hits: &[RankedHit], token_budget: usize) -> ContextBlock {
    let budget_chars = token_budget * CHARS_PER_TOKEN;
    let mut text = String::new();
    let mut citations = Vec::new();

    for (position, ranked) in hits.iter().enumerate() {
        let index = position + 1;
        let payload = &ranked.hit.payload;
        let header = format!(
            "[{index}] {} — {} — {}",
            payload.title, ranked.hit.source, payload.url
        );
        let separator_len = if text.is_empty() { 0 } else { 2 };
        let remaining = budget_chars.saturating_sub(text.len() + separator_len);

        // The header must fit whole along with at least a little snippet;
        // otherwise the hit is dropped and the block ends here
        if remaining < header.len() + 2 {
            break;
        }

        let snippet_room = remaining - header.len() - 1;
        let snippet = truncate_chars(&payload.snippet, snippet_room);
        if snippet.is_empty() {
            break;
        }
        let truncated = snippet.len() < payload.snippet.len();

        if !text.is_empty() {
            text.push_str("\n\n");
        }
        text.push_str(&header);
        text.push('\n');
        text.push_str(&snippet);

        citations.push(Citation {
            index,
            title: payload.title.clone(),
            url: payload.url.clone(),
            source: ranked.hit.source.clone(),
        });

        // Snippet truncation only happens to the last surviving hit
        if truncated {
            break;
        }
    }

    ContextBlock { text, citations }
}

/// Cut at a char boundary, never exceeding `max_len` bytes
fn truncate_chars(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
