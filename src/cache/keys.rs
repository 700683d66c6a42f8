//! Cache namespaces and the query fingerprint.

use sha2::{Digest, Sha256};

pub const QUERY_RESULT_NAMESPACE: &str = "query_result";
pub const DOCUMENT_CHUNKS_NAMESPACE: &str = "document_chunks";

/// Lower-cased, trimmed question; case and surrounding whitespace never
/// produce distinct cache entries.
pub fn normalize_question(question: &str) -> String {
    question.trim().to_lowercase()
}

/// `"{document_id}:{sha256_hex(normalized question)}"`.
///
/// The document id stays in clear text so every entry of a document can be
/// purged by prefix.
pub fn query_fingerprint(document_id: &str, question: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_question(question).as_bytes());
    format!("{}{}", document_prefix(document_id), hex::encode(hasher.finalize()))
}

/// Prefix shared by every query fingerprint of `document_id`.
pub fn document_prefix(document_id: &str) -> String {
    format!("{}:", document_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_case_and_surrounding_whitespace() {
        assert_eq!(
            query_fingerprint("doc1", "What is X?"),
            query_fingerprint("doc1", "  what is x?  ")
        );
    }

    #[test]
    fn fingerprint_changes_with_document_or_question() {
        let base = query_fingerprint("doc1", "What is X?");
        assert_ne!(base, query_fingerprint("doc2", "What is X?"));
        assert_ne!(base, query_fingerprint("doc1", "What is Y?"));
        assert_ne!(base, query_fingerprint("doc1", "What is  X?"));
    }

    #[test]
    fn fingerprint_is_prefixed_hex_digest() {
        let key = query_fingerprint("doc1", "hello");
        let (doc, digest) = key.split_once(':').unwrap();
        assert_eq!(doc, "doc1");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(key.starts_with(&document_prefix("doc1")));
    }
}
