use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::policy::Policy;

/// A discrete unit of feed content handed to the pipeline by a discovery
/// collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Opaque identifier assigned by whoever discovered the content.
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl ContentItem {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            image_url: None,
        }
    }

    pub fn with_image(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    /// The image reference, if it is non-blank.
    pub fn image(&self) -> Option<&str> {
        self.image_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Nothing to classify: blank text and no image.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty() && self.image().is_none()
    }

    /// Compute the cache key for this item under the given policy.
    ///
    /// Identical text (and image) collapses to one key. The policy's belief
    /// sets namespace the key because they are part of the prompt; the
    /// sentiment threshold is not.
    pub fn fingerprint(&self, policy: &Policy) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(b"text\0");
        hasher.update(self.text.trim().as_bytes());
        hasher.update(b"\0image\0");
        if let Some(url) = self.image() {
            hasher.update(url.as_bytes());
        }
        hasher.update(b"\0include\0");
        for belief in &policy.include_beliefs {
            hasher.update(belief.as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(b"\0exclude\0");
        for belief in &policy.exclude_beliefs {
            hasher.update(belief.as_bytes());
            hasher.update(b"\n");
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }
}

/// Hex SHA-256 cache key for a content item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
