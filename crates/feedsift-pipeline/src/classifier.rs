use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use feedsift_core::{ClassificationError, ClassificationResult, ContentItem, Policy, parse_completion};

use crate::llm::{LlmClient, LlmMessage, LlmRequest};
use crate::retry::RetryPolicy;

pub const DEFAULT_TEMPERATURE: f64 = 0.3;
pub const DEFAULT_MAX_TOKENS: u32 = 150;

const SYSTEM_PROMPT: &str = r#"You classify social media posts for a personal feed filter.

You will receive the user's included and excluded beliefs and the text of one post. Decide:
- excludesAllExcluded: true when the post expresses or promotes none of the excluded beliefs
- includesAnyOfIncluded: true when the post expresses or relates to at least one included belief
- sentimentScore: how positive and respectful the post is, from 0 (hostile) to 10 (very positive)

Respond with ONLY a JSON object in this exact format, no other text:
{"excludesAllExcluded": true | false, "includesAnyOfIncluded": true | false, "sentimentScore": <number 0-10>, "reason": "brief explanation"}"#;

/// Trait for classifiers -- abstracted so the coordinator can run against a
/// fake in tests.
///
/// A classifier never touches the result cache.
pub trait Classifier: Send + Sync {
    fn classify<'a>(
        &'a self,
        item: &'a ContentItem,
        policy: &'a Policy,
    ) -> Pin<Box<dyn Future<Output = Result<ClassificationResult, ClassificationError>> + Send + 'a>>;
}

/// Classifies content with an LLM, retrying transport and parse failures.
pub struct LlmClassifier {
    llm: Arc<dyn LlmClient>,
    retry: RetryPolicy,
    temperature: f64,
    max_tokens: u32,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            retry: RetryPolicy::default(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sampling(mut self, temperature: f64, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn build_request(&self, item: &ContentItem, policy: &Policy) -> LlmRequest {
        LlmRequest {
            system_prompt: SYSTEM_PROMPT.into(),
            messages: vec![LlmMessage {
                role: "user".into(),
                content: user_prompt(item, policy),
            }],
            image_url: item.image().map(String::from),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

impl Classifier for LlmClassifier {
    fn classify<'a>(
        &'a self,
        item: &'a ContentItem,
        policy: &'a Policy,
    ) -> Pin<Box<dyn Future<Output = Result<ClassificationResult, ClassificationError>> + Send + 'a>>
    {
        Box::pin(async move {
            let request = self.build_request(item, policy);
            let request = &request;
            let llm = &self.llm;

            let result = self
                .retry
                .run("classify", |attempt| async move {
                    tracing::debug!(item = %item.id, attempt, "Requesting classification");
                    let response = llm.chat(request).await?;
                    parse_completion(&response.content)
                })
                .await?;

            tracing::info!(
                item = %item.id,
                excludes_all_excluded = result.excludes_all_excluded,
                includes_any_included = result.includes_any_included,
                score = result.sentiment_score,
                "Classification complete"
            );
            Ok(result)
        })
    }
}

fn user_prompt(item: &ContentItem, policy: &Policy) -> String {
    let mut prompt = format!(
        "Included beliefs: {}\nExcluded beliefs: {}\n\nText to analyze: \"{}\"",
        belief_list(&policy.include_beliefs),
        belief_list(&policy.exclude_beliefs),
        item.text.trim().replace('"', "\\\""),
    );
    if item.image().is_some() {
        prompt.push_str("\n\nThe post's image is attached; consider it as well.");
    }
    prompt
}

fn belief_list<'a>(beliefs: impl IntoIterator<Item = &'a String>) -> String {
    let joined = beliefs
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() {
        "none".into()
    } else {
        joined
    }
}
