//! String similarity scoring for repository name search.
//!
//! Scores range from 0 to 100. A name identical to the query (ignoring case)
//! scores [`EXACT_SCORE`]; every other name is capped at [`MAX_FUZZY_SCORE`]
//! so exact hits always rank first.

pub const EXACT_SCORE: f64 = 100.0;
pub const MAX_FUZZY_SCORE: f64 = 99.0;

/// Scale applied to substring matches inside much longer strings.
const PARTIAL_SCALE: f64 = 0.9;
const PARTIAL_LENGTH_RATIO: f64 = 1.5;
/// Substring matching of very short strings matches nearly everything.
const MIN_PARTIAL_LEN: usize = 4;

const ALIASES: &[(&str, &str)] = &[(".net", "dotnet")];

/// Words that qualify a product rather than name it.
const STOP_WORDS: &[&str] = &[
    "runtime",
    "sdk",
    "cli",
    "agent",
    "operator",
    "server",
    "client",
    "driver",
    "plugin",
    "controller",
];

/// Qualifiers that must appear in the repository name or one of its tags when
/// the query asks for them.
const ENFORCED_KEYWORDS: &[&str] = &["cli", "sdk"];

/// Lowercase and collapse separators (`-`, `_`, `.`, `/`, whitespace) into
/// single spaces.
pub fn normalize(input: &str) -> String {
    input
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || matches!(c, '-' | '_' | '.' | '/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// Normalized Levenshtein similarity of two character sequences.
fn char_similarity(a: &[char], b: &[char]) -> f64 {
    let longest = a.len().max(b.len());
    if longest == 0 {
        return EXACT_SCORE;
    }
    let distance = levenshtein(a, b);
    EXACT_SCORE * (1.0 - distance as f64 / longest as f64)
}

pub fn similarity(a: &str, b: &str) -> f64 {
    let a = a.chars().collect::<Vec<_>>();
    let b = b.chars().collect::<Vec<_>>();
    char_similarity(&a, &b)
}

/// Best similarity of the shorter sequence against any window of the longer
/// one whose length is within one character of the shorter's.
fn partial_similarity(a: &[char], b: &[char]) -> f64 {
    let (needle, haystack) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if needle.len() == haystack.len() {
        return char_similarity(needle, haystack);
    }

    let shortest = needle.len().saturating_sub(1).max(1);
    let longest = (needle.len() + 1).min(haystack.len());
    (shortest..=longest)
        .flat_map(|width| haystack.windows(width))
        .map(|window| char_similarity(needle, window))
        .fold(0.0, f64::max)
}

/// A search query prepared for scoring against many repository names.
#[derive(Debug, Clone)]
pub struct QueryMatcher {
    exact: String,
    normalized: String,
    core_tokens: Vec<String>,
    required_keywords: Vec<&'static str>,
}

impl QueryMatcher {
    pub fn new(query: &str) -> Self {
        let exact = query.trim().to_lowercase();

        let mut aliased = exact.clone();
        for (alias, canonical) in ALIASES {
            if aliased.contains(alias) {
                aliased = aliased.replace(alias, canonical);
            }
        }
        let normalized = normalize(&aliased);

        let tokens = normalized
            .split(' ')
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        let core_tokens = tokens
            .iter()
            .filter(|token| !STOP_WORDS.contains(&token.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        let core_tokens = if core_tokens.is_empty() {
            tokens.clone()
        } else {
            core_tokens
        };
        let required_keywords = ENFORCED_KEYWORDS
            .iter()
            .copied()
            .filter(|keyword| tokens.iter().any(|token| token == keyword))
            .collect();

        Self {
            exact,
            normalized,
            core_tokens,
            required_keywords,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }

    /// Similarity of the query to a repository name.
    ///
    /// The score is the best of the whole-name similarity, the token
    /// similarity and the substring similarity. Token and substring
    /// similarity work in both directions, so a name contained in the query
    /// scores as high as a query contained in the name.
    pub fn score(&self, name: &str) -> f64 {
        if name.trim().to_lowercase() == self.exact {
            return EXACT_SCORE;
        }

        let target = normalize(name);
        if target == self.normalized {
            return MAX_FUZZY_SCORE;
        }

        let full = similarity(&self.normalized, &target);
        let tokens = self.token_score(&target);
        let partial = self.partial_score(&target);

        full.max(tokens).max(partial).min(MAX_FUZZY_SCORE)
    }

    /// Whether a repository carries every qualifier the query insists on,
    /// either in its name or in one of its tags.
    pub fn satisfies_keywords<'a>(
        &self,
        name: &str,
        tags: impl Iterator<Item = &'a str>,
    ) -> bool {
        if self.required_keywords.is_empty() {
            return true;
        }
        let name = normalize(name);
        let missing = self
            .required_keywords
            .iter()
            .filter(|keyword| !name.contains(*keyword))
            .collect::<Vec<_>>();
        if missing.is_empty() {
            return true;
        }

        let tags = tags.map(str::to_lowercase).collect::<Vec<_>>();
        missing
            .iter()
            .all(|keyword| tags.iter().any(|tag| tag.contains(*keyword)))
    }

    /// Best of query tokens against name tokens and name tokens against
    /// query tokens.
    fn token_score(&self, target: &str) -> f64 {
        if self.core_tokens.is_empty() {
            return 0.0;
        }
        let target_tokens = target
            .split(' ')
            .filter(|token| !token.is_empty())
            .collect::<Vec<_>>();
        let query_tokens = self.core_tokens.iter().map(String::as_str).collect::<Vec<_>>();

        coverage(&query_tokens, &target_tokens).max(coverage(&target_tokens, &query_tokens))
    }

    fn partial_score(&self, target: &str) -> f64 {
        let query = self.normalized.chars().collect::<Vec<_>>();
        let target = target.chars().collect::<Vec<_>>();
        let (shorter, longer) = if query.len() <= target.len() {
            (query.len(), target.len())
        } else {
            (target.len(), query.len())
        };
        if shorter < MIN_PARTIAL_LEN {
            return 0.0;
        }
        let scale = if longer as f64 >= shorter as f64 * PARTIAL_LENGTH_RATIO {
            PARTIAL_SCALE
        } else {
            1.0
        };
        partial_similarity(&query, &target) * scale
    }
}

/// Mean, over `tokens`, of the best similarity to any of `candidates`.
fn coverage(tokens: &[&str], candidates: &[&str]) -> f64 {
    if tokens.is_empty() {
        return 0.0;
    }
    let total = tokens
        .iter()
        .map(|token| {
            candidates
                .iter()
                .map(|candidate| similarity(token, candidate))
                .fold(0.0, f64::max)
        })
        .sum::<f64>();
    total / tokens.len() as f64
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn normalize_collapses_separators() {
        assert_eq!(normalize("Helm-Grafana"), "helm grafana");
        assert_eq!(normalize("  aspnet__core.runtime/9 "), "aspnet core runtime 9");
        assert_eq!(normalize("--"), "");
    }

    #[test]
    fn levenshtein_distances() {
        assert_eq!(levenshtein(&chars("kitten"), &chars("sitting")), 3);
        assert_eq!(levenshtein(&chars(""), &chars("abc")), 3);
        assert_eq!(levenshtein(&chars("gafana"), &chars("grafana")), 1);
    }

    #[test]
    fn exact_name_scores_highest() {
        let matcher = QueryMatcher::new("Kubectl");
        assert_eq!(matcher.score("kubectl"), EXACT_SCORE);
        assert!(matcher.score("kubectl-plugins") <= MAX_FUZZY_SCORE);
    }

    #[test]
    fn separator_variants_score_just_below_exact() {
        let matcher = QueryMatcher::new("helm grafana");
        assert_eq!(matcher.score("helm-grafana"), MAX_FUZZY_SCORE);
    }

    #[test]
    fn typo_inside_longer_name_scores_high() {
        let matcher = QueryMatcher::new("gafana");
        assert!(matcher.score("helm-grafana") > 80.0);
        assert!(matcher.score("kubectl") < 50.0);
    }

    #[test]
    fn unrelated_query_scores_low() {
        let matcher = QueryMatcher::new("zzz");
        assert!(matcher.score("kubectl") < 20.0);
        assert!(matcher.score("helm-grafana") < 20.0);
    }

    #[test]
    fn short_queries_skip_substring_matching() {
        let matcher = QueryMatcher::new("go");
        assert!(matcher.score("django") < 75.0);
    }

    #[test]
    fn name_contained_in_query_scores_high() {
        assert!(QueryMatcher::new("nodejs").score("node") >= 75.0);
        assert!(QueryMatcher::new("mongodb").score("mongo") >= 75.0);
        assert!(QueryMatcher::new("kube").score("kubectl") >= 75.0);
    }

    #[test]
    fn name_covered_by_query_tokens_scores_high() {
        let matcher = QueryMatcher::new("node.js");
        assert_eq!(matcher.score("node"), MAX_FUZZY_SCORE);
        assert!(matcher.score("mongo") < 75.0);
    }

    #[test]
    fn short_names_skip_substring_matching() {
        let matcher = QueryMatcher::new("django");
        assert!(matcher.score("go") < 75.0);
    }

    #[test]
    fn dotnet_alias_applies() {
        let matcher = QueryMatcher::new(".NET Runtime");
        assert!(matcher.score("dotnet") >= 99.0);
    }

    #[test]
    fn stop_words_do_not_dilute_token_score() {
        let matcher = QueryMatcher::new("postgres server");
        assert!(matcher.score("postgres") >= 99.0);
    }

    #[test]
    fn enforced_keywords_checked_in_name_and_tags() {
        let matcher = QueryMatcher::new("azure cli");
        assert!(matcher.satisfies_keywords("azure-cli", std::iter::empty()));
        assert!(!matcher.satisfies_keywords("azure-functions", std::iter::empty()));
        assert!(matcher.satisfies_keywords("azure", ["2.67-cli"].into_iter()));

        let matcher = QueryMatcher::new("nginx");
        assert!(matcher.satisfies_keywords("nginx", std::iter::empty()));
    }

    proptest! {
        #[test]
        fn scores_stay_in_range(query in "[a-z._ -]{0,12}", name in "[a-z0-9_-]{1,16}") {
            let score = QueryMatcher::new(&query).score(&name);
            prop_assert!((0.0..=EXACT_SCORE).contains(&score));
        }

        #[test]
        fn substring_score_is_symmetric(a in "[a-z]{4,10}", b in "[a-z]{4,10}") {
            let a = a.chars().collect::<Vec<_>>();
            let b = b.chars().collect::<Vec<_>>();
            prop_assert_eq!(partial_similarity(&a, &b), partial_similarity(&b, &a));
        }

        #[test]
        fn identical_names_score_exact(name in "[a-zA-Z0-9][a-zA-Z0-9-]{0,15}") {
            prop_assert_eq!(QueryMatcher::new(&name).score(&name.to_uppercase()), EXACT_SCORE);
        }
    }
}
