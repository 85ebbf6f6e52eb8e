use serde::{Deserialize, Serialize};

use crate::error::ClassificationError;

/// Reason shown for hidden content when the classifier gave none.
pub const FALLBACK_REASON: &str = "Does not match your preferences";

/// Show/hide outcome for one content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub show: bool,
    pub reason: String,
    pub basis: VerdictBasis,
}

/// What the verdict was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerdictBasis {
    /// A classification result, fresh or cached.
    Classified,
    /// Nothing to classify (blank item).
    Skipped,
    /// Classification failed; the item is shown (fail-open).
    Unclassified { error: ClassificationError },
}

impl Verdict {
    pub fn shown(reason: impl Into<String>) -> Self {
        Self {
            show: true,
            reason: reason.into(),
            basis: VerdictBasis::Classified,
        }
    }

    pub fn hidden(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let reason = if reason.trim().is_empty() {
            FALLBACK_REASON.to_string()
        } else {
            reason
        };
        Self {
            show: false,
            reason,
            basis: VerdictBasis::Classified,
        }
    }

    pub fn skipped() -> Self {
        Self {
            show: true,
            reason: "nothing to classify".into(),
            basis: VerdictBasis::Skipped,
        }
    }

    /// Shown verdict for an item whose classification failed.
    pub fn fail_open(error: ClassificationError) -> Self {
        Self {
            show: true,
            reason: format!("not classified ({})", error.kind()),
            basis: VerdictBasis::Unclassified { error },
        }
    }

    pub fn is_classified(&self) -> bool {
        matches!(self.basis, VerdictBasis::Classified)
    }

    /// The classification error behind a fail-open verdict, if any.
    pub fn error(&self) -> Option<&ClassificationError> {
        match &self.basis {
            VerdictBasis::Unclassified { error } => Some(error),
            _ => None,
        }
    }

    /// Text a presentation layer shows next to suppressed content.
    pub fn display_reason(&self) -> Option<String> {
        (!self.show).then(|| format!("Filtered: {}", self.reason))
    }
}

impl std::fmt::Display for VerdictBasis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerdictBasis::Classified => write!(f, "classified"),
            VerdictBasis::Skipped => write!(f, "skipped"),
            VerdictBasis::Unclassified { .. } => write!(f, "unclassified"),
        }
    }
}
