use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ClassificationError;
use crate::policy::clamp_sentiment;

/// Structured verdict returned by the external classifier for one item.
///
/// Field names match the JSON object the model is asked to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    /// The content avoids every excluded belief.
    pub excludes_all_excluded: bool,
    /// The content touches at least one included belief.
    #[serde(rename = "includesAnyOfIncluded", alias = "includesAnyIncluded")]
    pub includes_any_included: bool,
    #[serde(deserialize_with = "deserialize_score")]
    pub sentiment_score: f64,
    #[serde(default)]
    pub reason: String,
}

/// Parse a model completion into a [`ClassificationResult`].
///
/// The completion may wrap the object in prose, code fences or `<think>`
/// blocks; only the span from the first `{` to the last `}` is parsed.
/// A missing required field is a [`ClassificationError::ParseError`].
pub fn parse_completion(completion: &str) -> Result<ClassificationResult, ClassificationError> {
    if completion.trim().is_empty() {
        return Err(ClassificationError::ParseError("empty completion".into()));
    }

    let cleaned = strip_think_blocks(completion);
    match parse_span(&cleaned, completion) {
        // A literal `<think>` inside the object itself is not reasoning
        Err(err) if cleaned != completion => parse_span(completion, completion).map_err(|_| err),
        parsed => parsed,
    }
}

fn parse_span(text: &str, completion: &str) -> Result<ClassificationResult, ClassificationError> {
    let span = extract_json_span(text).ok_or_else(|| {
        ClassificationError::ParseError(format!(
            "no JSON object in completion: {}",
            preview(completion)
        ))
    })?;

    serde_json::from_str(span).map_err(|e| {
        ClassificationError::ParseError(format!("invalid classification object: {e}"))
    })
}

/// Return the substring from the first `{` to the last `}`, if any.
pub fn extract_json_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Remove `<think>...</think>` blocks emitted by reasoning models.
fn strip_think_blocks(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut remaining = s;
    while let Some(start) = remaining.find("<think>") {
        result.push_str(&remaining[..start]);
        if let Some(end) = remaining[start..].find("</think>") {
            remaining = &remaining[start + end + "</think>".len()..];
        } else {
            // Unclosed tag: everything after it is reasoning
            return result;
        }
    }
    result.push_str(remaining);
    result
}

fn preview(s: &str) -> String {
    const MAX: usize = 80;
    let trimmed = s.trim();
    match trimmed.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Models are inconsistent about quoting numbers; accept both and clamp.
fn deserialize_score<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Score {
        Number(f64),
        Text(String),
    }

    let raw = match Score::deserialize(deserializer)? {
        Score::Number(n) => n,
        Score::Text(s) => s.trim().parse::<f64>().map_err(|_| {
            serde::de::Error::custom(format!("sentimentScore is not a number: {s:?}"))
        })?,
    };

    if !raw.is_finite() {
        return Err(serde::de::Error::custom("sentimentScore is not finite"));
    }
    Ok(clamp_sentiment(raw))
}
