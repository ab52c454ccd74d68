//! Content-addressed cache keys for vision queries.

use sha2::{Digest, Sha256};

use crate::models::VisionQuery;

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Query text with whitespace collapsed and case folded, fields in a fixed
/// order so equivalent queries produce the same key.
pub fn normalized_query(query: &VisionQuery) -> String {
    let mut parts = vec![format!("description={}", normalize(&query.description))];
    parts.extend(query.visual_cues.iter().map(|cue| format!("cue={}", normalize(cue))));
    parts.extend(
        query
            .nearby_elements
            .iter()
            .map(|element| format!("nearby={}", normalize(element))),
    );
    parts.extend(
        query
            .expected
            .iter()
            .map(|(key, value)| format!("expected.{}={}", normalize(key), normalize(value))),
    );
    parts.push(format!("viewport={}", query.viewport));
    parts.join("\n")
}

/// `sha256(screenshot bytes) : sha256(normalized query)`, hex encoded.
pub fn fingerprint(query: &VisionQuery) -> String {
    let screenshot = Sha256::digest(&query.screenshot.data);
    let text = Sha256::digest(normalized_query(query).as_bytes());
    format!("{}:{}", hex::encode(screenshot), hex::encode(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relocator_core_types::{Screenshot, Viewport};

    fn query(bytes: &[u8], description: &str) -> VisionQuery {
        VisionQuery::new(
            description,
            Screenshot::new(bytes.to_vec(), 1920, 1080),
            Viewport::new(1920, 1080),
        )
    }

    #[test]
    fn equivalent_queries_share_a_key() {
        assert_eq!(
            fingerprint(&query(b"png", "Search  button")),
            fingerprint(&query(b"png", " search button "))
        );
    }

    #[test]
    fn screenshot_or_query_changes_the_key() {
        let base = fingerprint(&query(b"png", "Search button"));
        assert_ne!(base, fingerprint(&query(b"png2", "Search button")));
        assert_ne!(base, fingerprint(&query(b"png", "Search field")));
        assert_ne!(
            base,
            fingerprint(&query(b"png", "Search button").with_expected("tag", "button"))
        );
    }
}
