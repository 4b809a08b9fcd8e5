//! Ordering of image tags.
//!
//! Hardened image tags rarely follow semver (`16`, `3.20`, `14-fips`,
//! `1.27-debian12-dev`), so tags are compared as alternating runs of digits
//! and non-digits.

use std::cmp::Ordering;

use itertools::{EitherOrBoth, Itertools};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Number(u64),
    Text(&'a str),
}

fn segments(tag: &str) -> Vec<Segment<'_>> {
    tag.as_bytes()
        .iter()
        .enumerate()
        .chunk_by(|(_, byte)| byte.is_ascii_digit())
        .into_iter()
        .map(|(is_digit, mut run)| {
            let start = run.next().map(|(index, _)| index).unwrap_or_default();
            let end = run.last().map(|(index, _)| index).unwrap_or(start) + 1;
            let text = &tag[start..end];
            match text.parse::<u64>() {
                Ok(number) if is_digit => Segment::Number(number),
                _ => Segment::Text(text),
            }
        })
        .collect()
}

/// Whether a tag reads like a version, i.e. starts with a digit.
pub fn looks_like_version(tag: &str) -> bool {
    tag.starts_with(|c: char| c.is_ascii_digit())
}

/// Compare two tags as versions.
///
/// When one tag is a prefix of the other, a continuation starting with `.`
/// is a more specific release (`1.2.1 > 1.2`), while any other suffix is a
/// variant of the plain release (`16 > 16-fips`).
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left = segments(a);
    let right = segments(b);

    for pair in left.iter().zip_longest(right.iter()) {
        let ordering = match pair {
            EitherOrBoth::Both(Segment::Number(x), Segment::Number(y)) => x.cmp(y),
            EitherOrBoth::Both(Segment::Text(x), Segment::Text(y)) => x.cmp(y),
            EitherOrBoth::Both(Segment::Number(_), Segment::Text(_)) => Ordering::Greater,
            EitherOrBoth::Both(Segment::Text(_), Segment::Number(_)) => Ordering::Less,
            EitherOrBoth::Left(rest) => continuation_order(rest),
            EitherOrBoth::Right(rest) => continuation_order(rest).reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    // `01` and `1` share segments; fall back to the raw text for a total order.
    a.cmp(b)
}

/// Ordering of the longer tag relative to its prefix, given the first
/// segment past the prefix.
fn continuation_order(rest: &Segment<'_>) -> Ordering {
    match rest {
        Segment::Text(text) if text.starts_with('.') => Ordering::Greater,
        _ => Ordering::Less,
    }
}

/// Sort tags for display.
///
/// When every tag reads like a version they are ordered newest first;
/// otherwise the whole list is ordered lexicographically.
pub fn sort_tags<S: AsRef<str>>(tags: &mut [S]) {
    if tags.iter().all(|tag| looks_like_version(tag.as_ref())) {
        tags.sort_by(|a, b| compare_versions(b.as_ref(), a.as_ref()));
    } else {
        tags.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sorted(tags: &[&str]) -> Vec<String> {
        let mut tags = tags.iter().map(|tag| tag.to_string()).collect::<Vec<_>>();
        sort_tags(&mut tags);
        tags
    }

    #[test]
    fn splits_into_segments() {
        assert_eq!(segments("14-fips"), vec![
            Segment::Number(14),
            Segment::Text("-fips")
        ]);
        assert_eq!(segments("3.20"), vec![
            Segment::Number(3),
            Segment::Text("."),
            Segment::Number(20)
        ]);
    }

    #[test]
    fn versions_sorted_newest_first() {
        assert_eq!(sorted(&["16", "15", "14-fips"]), vec!["16", "15", "14-fips"]);
        assert_eq!(sorted(&["14-fips", "16", "15"]), vec!["16", "15", "14-fips"]);
        assert_eq!(sorted(&["3.9", "3.20", "3.10"]), vec!["3.20", "3.10", "3.9"]);
    }

    #[test]
    fn plain_release_before_its_variants() {
        assert_eq!(sorted(&["16-fips", "16", "16-dev"]), vec![
            "16", "16-fips", "16-dev"
        ]);
        assert_eq!(sorted(&["1.2", "1.2.1"]), vec!["1.2.1", "1.2"]);
    }

    #[test]
    fn any_non_version_tag_falls_back_to_lexicographic() {
        assert_eq!(sorted(&["latest", "dev", "1.27", "1.26"]), vec![
            "1.26", "1.27", "dev", "latest"
        ]);
        assert_eq!(sorted(&["stable", "alpine", "edge"]), vec![
            "alpine", "edge", "stable"
        ]);
    }

    #[test]
    fn ordering_is_total_for_equal_segments() {
        assert_eq!(compare_versions("01", "1"), "01".cmp("1"));
        assert_eq!(compare_versions("1", "1"), Ordering::Equal);
    }
}
