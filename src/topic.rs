//! Topic tokenization and wildcard matching (component C1).
//!
//! # References
//! - spec §4.1, §8 ("Boundary" properties, scenarios 1-2)

/// Splits a topic on `/`, preserving empty tokens so that `/a`, `a/`, and
/// `a//b` round-trip. `$`-prefixed topics do not get a leading empty token
/// (spec §4.1): `$SYS/foo` tokenizes to `["$SYS", "foo"]`, not `["", "$SYS",
/// "foo"]`.
pub fn tokenize(topic: &str) -> Vec<&str> {
    topic.split('/').collect()
}

/// Reassembles tokens produced by [`tokenize`] back into a topic string.
pub fn reassemble(tokens: &[&str]) -> String {
    tokens.join("/")
}

/// Whether `topic` is a wildcard subscription (ends with `#`, spec §3).
pub fn is_wildcard(topic: &str) -> bool {
    topic == "#" || topic.ends_with("/#")
}

fn is_dollar_topic(topic: &str) -> bool {
    topic.starts_with('$')
}

/// Whether the concrete `topic` matches the (possibly wildcarded)
/// subscription `sub`, per spec §4.1:
///
/// - `$`-prefixed topics only match `$`-prefixed subscriptions.
/// - `+` matches exactly one (possibly empty) token.
/// - `#` matches zero or more remaining tokens and must be terminal.
/// - everything else requires literal equality.
pub fn matches(sub: &str, topic: &str) -> bool {
    if is_dollar_topic(topic) != is_dollar_topic(sub) {
        return false;
    }

    let sub_tokens = tokenize(sub);
    let topic_tokens = tokenize(topic);
    matches_tokens(&sub_tokens, &topic_tokens)
}

fn matches_tokens(sub: &[&str], topic: &[&str]) -> bool {
    match (sub.first(), topic.first()) {
        (Some(&"#"), _) => sub.len() == 1, // '#' must be terminal
        (Some(&"+"), Some(_)) => matches_tokens(&sub[1..], &topic[1..]),
        (Some(&"+"), None) => false,
        (Some(s), Some(t)) if *s == *t => matches_tokens(&sub[1..], &topic[1..]),
        (Some(_), _) => false,
        (None, None) => true,
        (None, Some(_)) => false,
    }
}

/// Enumerates the wildcard subscriptions a concrete `topic` should also be
/// tested against, from most to least specific: for `a/b/c` this yields
/// `a/b/#`, `a/#`, `#` in that order (spec §4.1). Used by the topic
/// authorization check and by service lookup when the exact topic misses.
pub fn iterate_wildcards(topic: &str) -> Vec<String> {
    let tokens = tokenize(topic);
    let mut out = Vec::with_capacity(tokens.len());
    for i in (0..tokens.len()).rev() {
        let mut prefix: Vec<&str> = tokens[..i].to_vec();
        prefix.push("#");
        out.push(reassemble(&prefix));
    }
    out
}
