use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Lowest and highest sentiment score the classifier may report.
pub const SENTIMENT_MIN: f64 = 0.0;
pub const SENTIMENT_MAX: f64 = 10.0;

/// User filtering criteria, evaluated as an immutable snapshot.
///
/// Belief labels are stored lowercased and trimmed; the sets are ordered so a
/// policy always renders (and fingerprints) the same way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub include_beliefs: BTreeSet<String>,
    #[serde(default)]
    pub exclude_beliefs: BTreeSet<String>,
    #[serde(default)]
    pub min_sentiment: f64,
}

impl Policy {
    pub fn new<I, E, S>(include: I, exclude: E, min_sentiment: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            include_beliefs: normalize_beliefs(include),
            exclude_beliefs: normalize_beliefs(exclude),
            min_sentiment: clamp_sentiment(min_sentiment),
        }
    }

    /// Build a policy from the comma-separated lists settings are stored as.
    pub fn from_lists(include: &str, exclude: &str, min_sentiment: f64) -> Self {
        Self {
            include_beliefs: parse_beliefs(include),
            exclude_beliefs: parse_beliefs(exclude),
            min_sentiment: clamp_sentiment(min_sentiment),
        }
    }

    pub fn includes(&self, belief: &str) -> bool {
        self.include_beliefs.contains(&belief.trim().to_lowercase())
    }

    pub fn excludes(&self, belief: &str) -> bool {
        self.exclude_beliefs.contains(&belief.trim().to_lowercase())
    }

    /// Whether `other` asks the classifier the same questions as `self`.
    ///
    /// Only the belief sets reach the prompt; `min_sentiment` is applied
    /// after classification.
    pub fn same_criteria(&self, other: &Policy) -> bool {
        self.include_beliefs == other.include_beliefs
            && self.exclude_beliefs == other.exclude_beliefs
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            include_beliefs: BTreeSet::new(),
            exclude_beliefs: BTreeSet::new(),
            min_sentiment: SENTIMENT_MIN,
        }
    }
}

/// Split a comma-separated belief list into normalized labels.
pub fn parse_beliefs(list: &str) -> BTreeSet<String> {
    normalize_beliefs(list.split(','))
}

fn normalize_beliefs<I, S>(beliefs: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    beliefs
        .into_iter()
        .map(|b| b.as_ref().trim().to_lowercase())
        .filter(|b| !b.is_empty())
        .collect()
}

/// Clamp a score into the classifier's range. NaN maps to the minimum.
pub fn clamp_sentiment(score: f64) -> f64 {
    if score.is_nan() {
        return SENTIMENT_MIN;
    }
    score.clamp(SENTIMENT_MIN, SENTIMENT_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_lists() {
        let beliefs = parse_beliefs(" Iskon, Hindu ,ISLAM,,");
        let expected: BTreeSet<String> =
            ["hindu", "islam", "iskon"].iter().map(|s| s.to_string()).collect();
        assert_eq!(beliefs, expected);
    }

    #[test]
    fn empty_list_yields_empty_set() {
        assert!(parse_beliefs("").is_empty());
        assert!(parse_beliefs(" , ").is_empty());
    }

    #[test]
    fn membership_is_case_insensitive() {
        let policy = Policy::from_lists("Hindu", "Secular", 5.0);
        assert!(policy.includes("HINDU"));
        assert!(policy.excludes(" secular "));
        assert!(!policy.excludes("hindu"));
    }

    #[test]
    fn min_sentiment_is_clamped() {
        assert_eq!(Policy::from_lists("", "", 42.0).min_sentiment, SENTIMENT_MAX);
        assert_eq!(Policy::from_lists("", "", -1.0).min_sentiment, SENTIMENT_MIN);
        assert_eq!(Policy::from_lists("", "", f64::NAN).min_sentiment, SENTIMENT_MIN);
    }

    #[test]
    fn criteria_ignore_threshold() {
        let a = Policy::from_lists("hindu", "secular", 3.0);
        let b = Policy::from_lists("Hindu", "Secular", 8.0);
        let c = Policy::from_lists("hindu", "", 3.0);
        assert!(a.same_criteria(&b));
        assert!(!a.same_criteria(&c));
    }
}
