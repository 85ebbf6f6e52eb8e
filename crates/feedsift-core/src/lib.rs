//! Core types for feedsift.
//!
//! Everything here is pure: content items and their fingerprints, filtering
//! policies, classifier output parsing, and the decision engine that maps a
//! classification to a show/hide [`Verdict`].

pub mod classification;
pub mod decision;
pub mod engine;
pub mod error;
pub mod item;
pub mod policy;

pub use classification::{ClassificationResult, parse_completion};
pub use decision::{FALLBACK_REASON, Verdict, VerdictBasis};
pub use engine::decide;
pub use error::ClassificationError;
pub use item::{ContentItem, Fingerprint};
pub use policy::Policy;
