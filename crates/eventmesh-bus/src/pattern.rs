//! Hierarchical wildcard matching.
//!
//! A topic `s1.s2.….sn` is matched by the patterns built from its *proper*
//! prefixes, longest first: `s1.….s(n-1).*`, …, `s1.*`, and by the global
//! pattern `*`. A pattern therefore matches every topic strictly below it,
//! at any depth, but never the topic it is named after:
//!
//! - `orders.*` matches `orders.created` and `orders.created.eu`
//! - `orders.created.*` matches `orders.created.eu` but not `orders.created`

/// The wildcard marker. A topic containing it registers a pattern listener.
pub const WILDCARD: &str = "*";

/// Returns whether `topic` should be registered as a pattern.
#[must_use]
pub fn is_pattern(topic: &str) -> bool {
    topic.contains(WILDCARD)
}

/// Returns every pattern that matches `topic`, most specific first, ending
/// with the global wildcard.
#[must_use]
pub fn candidate_patterns(topic: &str, delimiter: &str) -> Vec<String> {
    if delimiter.is_empty() {
        return vec![WILDCARD.to_owned()];
    }
    let segments: Vec<&str> = topic.split(delimiter).collect();
    let mut patterns = Vec::with_capacity(segments.len());
    for prefix_len in (1..segments.len()).rev() {
        let prefix = segments[..prefix_len].join(delimiter);
        patterns.push(format!("{prefix}{delimiter}{WILDCARD}"));
    }
    patterns.push(WILDCARD.to_owned());
    patterns
}

/// Returns whether `pattern` matches `topic`.
#[must_use]
pub fn matches(pattern: &str, topic: &str, delimiter: &str) -> bool {
    pattern == WILDCARD
        || candidate_patterns(topic, delimiter)
            .iter()
            .any(|candidate| candidate == pattern)
}
