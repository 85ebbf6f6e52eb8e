//! The decision engine: turns a noisy classification into a show/hide verdict.

use crate::classification::ClassificationResult;
use crate::decision::Verdict;
use crate::policy::Policy;

/// Decide whether a classified item is shown under `policy`.
///
/// Precedence:
/// 1. Content that avoids every excluded belief is shown, whatever its
///    sentiment.
/// 2. Otherwise content scoring below `policy.min_sentiment` is hidden with
///    the classifier's reason.
/// 3. Everything else is shown. The threshold is inclusive.
///
/// `includes_any_included` does not gate the verdict.
pub fn decide(result: &ClassificationResult, policy: &Policy) -> Verdict {
    if result.excludes_all_excluded {
        tracing::debug!(score = result.sentiment_score, "Avoids excluded beliefs, shown");
        return Verdict::shown("avoids all excluded beliefs");
    }

    if result.sentiment_score < policy.min_sentiment {
        tracing::debug!(
            score = result.sentiment_score,
            min_sentiment = policy.min_sentiment,
            "Below sentiment threshold, hidden"
        );
        return Verdict::hidden(result.reason.clone());
    }

    Verdict::shown("meets sentiment threshold")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{FALLBACK_REASON, VerdictBasis};

    fn result(excludes_all_excluded: bool, score: f64, reason: &str) -> ClassificationResult {
        ClassificationResult {
            excludes_all_excluded,
            includes_any_included: false,
            sentiment_score: score,
            reason: reason.into(),
        }
    }

    fn policy(min_sentiment: f64) -> Policy {
        Policy::from_lists("hindu", "secular", min_sentiment)
    }

    #[test]
    fn avoiding_excluded_beliefs_short_circuits() {
        let verdict = decide(&result(true, 0.0, "hostile"), &policy(5.0));
        assert!(verdict.show);
        assert_eq!(verdict.basis, VerdictBasis::Classified);
    }

    #[test]
    fn below_threshold_is_hidden_with_reason() {
        let verdict = decide(&result(false, 4.0, "mocking tone"), &policy(5.0));
        assert!(!verdict.show);
        assert_eq!(verdict.reason, "mocking tone");
    }

    #[test]
    fn threshold_is_inclusive() {
        assert!(decide(&result(false, 5.0, "neutral"), &policy(5.0)).show);
    }

    #[test]
    fn hidden_without_reason_falls_back() {
        let verdict = decide(&result(false, 1.0, ""), &policy(5.0));
        assert!(!verdict.show);
        assert_eq!(verdict.reason, FALLBACK_REASON);
    }

    #[test]
    fn inclusion_flag_does_not_gate() {
        let mut r = result(false, 8.0, "off-topic");
        r.includes_any_included = false;
        assert!(decide(&r, &policy(5.0)).show);

        r.includes_any_included = true;
        r.sentiment_score = 2.0;
        assert!(!decide(&r, &policy(5.0)).show);
    }

    #[test]
    fn zero_threshold_shows_everything() {
        assert!(decide(&result(false, 0.0, "x"), &Policy::default()).show);
    }
}
