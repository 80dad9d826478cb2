//! Name predicate for the exact-match pre-pass.
//!
//! Token-ranked search does not reliably put a record whose name *is* the
//! query first. The pre-pass scans candidates and keeps those whose name
//! equals or contains the lowercased search text; equal names sort ahead
//! of partial ones.

/// Upper bound on pre-pass matches emitted per query.
pub const EXACT_MATCH_CAP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NameMatch {
    Exact,
    Partial,
}

/// Tests a candidate's names against the lowercased search text.
///
/// `normalized` is the pre-lowercased name field; `raw` is the original
/// name tag, consulted only when the normalized field is absent or does
/// not match.
pub fn name_match(normalized: Option<&str>, raw: Option<&str>, needle: &str) -> Option<NameMatch> {
    if needle.is_empty() {
        return None;
    }
    if let Some(found) = normalized.and_then(|n| compare(n, needle)) {
        return Some(found);
    }
    raw.and_then(|r| compare(&r.to_lowercase(), needle))
}

fn compare(name: &str, needle: &str) -> Option<NameMatch> {
    let name = name.trim();
    if name == needle {
        Some(NameMatch::Exact)
    } else if name.contains(needle) {
        Some(NameMatch::Partial)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_partial() {
        assert_eq!(
            name_match(Some("jazz radio"), None, "jazz radio"),
            Some(NameMatch::Exact)
        );
        assert_eq!(
            name_match(Some("jazz radio fm"), None, "jazz radio"),
            Some(NameMatch::Partial)
        );
        assert_eq!(name_match(Some("rock fm"), None, "jazz"), None);
    }

    #[test]
    fn test_falls_back_to_raw_name() {
        assert_eq!(name_match(None, Some("Jazz Radio"), "jazz radio"), Some(NameMatch::Exact));
        assert_eq!(
            name_match(Some("stale"), Some("Jazz Radio"), "jazz"),
            Some(NameMatch::Partial)
        );
    }

    #[test]
    fn test_empty_needle_never_matches() {
        assert_eq!(name_match(Some("anything"), Some("Anything"), ""), None);
    }

    #[test]
    fn test_exact_sorts_first() {
        let mut found = vec![NameMatch::Partial, NameMatch::Exact, NameMatch::Partial];
        found.sort();
        assert_eq!(found[0], NameMatch::Exact);
    }
}
