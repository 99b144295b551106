//! MQTT topic wildcard matching and pattern-preserving topic rewriting.
//!
//! `matches` implements the standard `+`/`#` wildcard semantics. `transform`
//! carries the wildcard-matched remainder of a topic from one pattern to
//! another, which is how bridges rewrite topics between a local and a
//! remote broker.

/// Returns true if `topic` matches the MQTT topic filter `pattern`.
///
/// `+` matches exactly one non-`/` level. `#` is only meaningful as the
/// final segment and matches zero or more trailing levels. A pattern with
/// no wildcards requires an exact level-for-level match. Malformed patterns
/// (e.g. a `#` that isn't last) simply never match rather than erroring —
/// validating pattern syntax is the caller's job.
pub fn matches(topic: &str, pattern: &str) -> bool {
    let topic_levels: Vec<&str> = topic.split('/').collect();
    let pattern_levels: Vec<&str> = pattern.split('/').collect();
    match_levels(&topic_levels, &pattern_levels)
}

fn match_levels(topic: &[&str], pattern: &[&str]) -> bool {
    match pattern.first() {
        None => topic.is_empty(),
        Some(&"#") => true,
        Some(&"+") => !topic.is_empty() && match_levels(&topic[1..], &pattern[1..]),
        Some(seg) => topic.first() == Some(seg) && match_levels(&topic[1..], &pattern[1..]),
    }
}

/// Rewrites `topic` (which is assumed to match `local_pattern`) into the
/// equivalent topic under `remote_pattern`.
///
/// Two rules, tried in order:
/// 1. If both patterns end in `#`, the result is the remote prefix (everything
///    before `#`) followed by whatever `topic` has beyond the local prefix.
/// 2. Otherwise the result is built segment-by-segment from `remote_pattern`:
///    each `+` in the remote pattern is replaced by the corresponding `+`
///    capture from `topic`, taken in the order `+` appears in `local_pattern`;
///    every other remote segment is passed through literally. This also
///    covers a remote pattern that is just a fixed topic with no wildcards.
///
/// Patterns mixing `+` and `#` are not uniquely defined by the protocol; this
/// function is deterministic (rule 1 only triggers when *both* patterns end
/// in `#`) but does not promise to be reversible for such patterns.
pub fn transform(topic: &str, local_pattern: &str, remote_pattern: &str) -> String {
    if local_pattern.ends_with('#') && remote_pattern.ends_with('#') {
        let local_prefix = &local_pattern[..local_pattern.len() - 1];
        let remote_prefix = &remote_pattern[..remote_pattern.len() - 1];
        let suffix = topic.strip_prefix(local_prefix).unwrap_or(topic);
        return format!("{remote_prefix}{suffix}");
    }

    let topic_levels: Vec<&str> = topic.split('/').collect();
    let local_levels: Vec<&str> = local_pattern.split('/').collect();
    let remote_levels: Vec<&str> = remote_pattern.split('/').collect();

    let captures: Vec<&str> = local_levels
        .iter()
        .zip(topic_levels.iter())
        .filter_map(|(l, t)| (*l == "+").then_some(*t))
        .collect();

    let mut captures = captures.into_iter();
    let result_levels: Vec<&str> = remote_levels
        .iter()
        .map(|seg| {
            if *seg == "+" {
                captures.next().unwrap_or(*seg)
            } else {
                *seg
            }
        })
        .collect();

    result_levels.join("/")
}
