//! Shared matcher contract and tie-breaking policy used by every preprocessor.

/// A pure predicate over one media candidate and one metadata candidate.
/// Preprocessors supply an ordered list, strongest-signal first.
pub trait Matcher<M, E> {
    fn name(&self) -> &'static str;
    fn matches(&self, media: &M, metadata: &E) -> bool;
}

/// One matcher's hit against one metadata candidate, retained for tie-breaking.
pub struct Candidate<'a, E> {
    pub matcher_index: usize,
    pub matcher_name: &'static str,
    pub metadata_index: usize,
    pub metadata: &'a E,
    pub is_exact: bool,
    pub duplicate_index_matches: bool,
}

/// Runs every matcher against every unclaimed metadata candidate for one
/// media item, collecting all hits across all strategies, then resolves
/// ties per the documented policy:
/// 1. an exact-equality match always wins;
/// 2. otherwise prefer a candidate whose embedded duplicate index matches the media's;
/// 3. otherwise take the first matcher's first candidate in enumeration order.
pub fn resolve_match<'a, M, E>(
    media: &M,
    candidates: &[(usize, &'a E)],
    matchers: &[Box<dyn Matcher<M, E> + 'a>],
    is_exact: impl Fn(&M, &E) -> bool,
    duplicate_index_matches: impl Fn(&M, &E) -> bool,
) -> Option<usize> {
    let mut hits: Vec<Candidate<'a, E>> = Vec::new();

    for (matcher_index, matcher) in matchers.iter().enumerate() {
        for &(metadata_index, metadata) in candidates {
            if matcher.matches(media, metadata) {
                hits.push(Candidate {
                    matcher_index,
                    matcher_name: matcher.name(),
                    metadata_index,
                    metadata,
                    is_exact: is_exact(media, metadata),
                    duplicate_index_matches: duplicate_index_matches(media, metadata),
                });
            }
        }
    }

    if hits.is_empty() {
        return None;
    }

    if let Some(exact) = hits.iter().find(|c| c.is_exact) {
        return Some(exact.metadata_index);
    }
    if let Some(dup) = hits.iter().find(|c| c.duplicate_index_matches) {
        return Some(dup.metadata_index);
    }

    hits.into_iter()
        .min_by_key(|c| (c.matcher_index, c.metadata_index))
        .map(|c| c.metadata_index)
}

/// Extracts a Google-Photos-style duplicate index `(N)` from a filename
/// stem, e.g. `IMG_0004(1)` -> `Some(1)`. Shared by several preprocessors'
/// duplicate-index predicates.
pub fn extract_duplicate_index(stem: &str) -> Option<u32> {
    let open = stem.rfind('(')?;
    let close = stem.rfind(')')?;
    if close != stem.len() - 1 || close <= open {
        return None;
    }
    stem[open + 1..close].parse().ok()
}

/// Strips a Google-Photos-style duplicate-index suffix from a stem, e.g.
/// `IMG_0004(1)` -> `IMG_0004`.
pub fn strip_duplicate_index(stem: &str) -> &str {
    match stem.rfind('(') {
        Some(open) if stem.ends_with(')') => &stem[..open],
        _ => stem,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ExactNameMatcher;
    impl Matcher<String, String> for ExactNameMatcher {
        fn name(&self) -> &'static str {
            "exact"
        }
        fn matches(&self, media: &String, metadata: &String) -> bool {
            media == metadata
        }
    }

    struct PrefixMatcher;
    impl Matcher<String, String> for PrefixMatcher {
        fn name(&self) -> &'static str {
            "prefix"
        }
        fn matches(&self, media: &String, metadata: &String) -> bool {
            media.starts_with(metadata.as_str())
        }
    }

    #[test]
    fn exact_match_wins_over_prefix_hit() {
        let media = "IMG_0001.JPG".to_string();
        let candidates: Vec<(usize, &String)> = vec![];
        let meta_a = "IMG_000".to_string();
        let meta_b = "IMG_0001.JPG".to_string();
        let candidates = vec![(0usize, &meta_a), (1usize, &meta_b)];
        let matchers: Vec<Box<dyn Matcher<String, String>>> = vec![Box::new(PrefixMatcher), Box::new(ExactNameMatcher)];
        let resolved = resolve_match(&media, &candidates, &matchers, |m, e| m == e, |_, _| false);
        assert_eq!(resolved, Some(1));
        let _ = candidates;
    }

    #[test]
    fn first_matcher_first_candidate_wins_without_exact_or_dup() {
        let media = "IMG_0001.JPG".to_string();
        let meta_a = "IMG_0".to_string();
        let meta_b = "IMG_00".to_string();
        let candidates = vec![(0usize, &meta_a), (1usize, &meta_b)];
        let matchers: Vec<Box<dyn Matcher<String, String>>> = vec![Box::new(PrefixMatcher)];
        let resolved = resolve_match(&media, &candidates, &matchers, |_, _| false, |_, _| false);
        assert_eq!(resolved, Some(0));
    }

    #[test]
    fn no_match_returns_none() {
        let media = "IMG_0001.JPG".to_string();
        let meta_a = "totally_different".to_string();
        let candidates = vec![(0usize, &meta_a)];
        let matchers: Vec<Box<dyn Matcher<String, String>>> = vec![Box::new(ExactNameMatcher)];
        let resolved = resolve_match(&media, &candidates, &matchers, |m, e| m == e, |_, _| false);
        assert_eq!(resolved, None);
    }

    #[test]
    fn duplicate_index_extraction() {
        assert_eq!(extract_duplicate_index("IMG_0004(1)"), Some(1));
        assert_eq!(extract_duplicate_index("IMG_0004"), None);
        assert_eq!(strip_duplicate_index("IMG_0004(1)"), "IMG_0004");
        assert_eq!(strip_duplicate_index("IMG_0004"), "IMG_0004");
    }
}
