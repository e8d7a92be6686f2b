//! Request fingerprinting
//!
//! The exact cache key is a SHA-256 over the normalised question, the
//! answer mode and the tenant tag, separated by an ASCII unit separator so
//! no field can bleed into the next. Two requests sharing a fingerprint
//! are treated as identical.

use sha2::{Digest, Sha256};

use helpdesk_rag_core::Query;

const FIELD_SEPARATOR: [u8; 1] = [0x1F];

/// Compute the exact cache key for a query
pub fn fingerprint(query: &Query) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.normalized_text().as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(query.mode.as_str().as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(query.tenant.as_deref().unwrap_or("").as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use helpdesk_rag_core::AnswerMode;

    #[test]
    fn equal_normalized_triples_share_a_fingerprint() {
        let a = Query::new("How do I reset my password?");
        let b = Query::new("  how do i RESET my password?  ");
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn mode_changes_the_fingerprint() {
        let a = Query::new("reset password");
        let b = Query::new("reset password").with_mode(AnswerMode::Detailed);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn tenant_changes_the_fingerprint() {
        let a = Query::new("reset password");
        let b = Query::new("reset password").with_tenant("acme");
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn different_text_changes_the_fingerprint() {
        let a = Query::new("reset password");
        let b = Query::new("reset passwords");
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn separator_prevents_field_bleed() {
        // text "a" + tenant "bc" must differ from text "ab" + tenant "c"
        let a = Query::new("a").with_tenant("bc");
        let b = Query::new("ab").with_tenant("c");
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
