use std::sync::Arc;

use anyhow::Result;
use feedsift_core::policy::{clamp_sentiment, parse_beliefs};
use feedsift_core::{ContentItem, Policy, Verdict, VerdictBasis};
use feedsift_pipeline::{Coordinator, PolicyStore};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::{JoinError, JoinSet};

/// One line of the input stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    Item {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        text: String,
        #[serde(default)]
        image_url: Option<String>,
    },
    /// Fields left out keep their current value.
    Policy {
        #[serde(default)]
        include_beliefs: Option<String>,
        #[serde(default)]
        exclude_beliefs: Option<String>,
        #[serde(default)]
        min_sentiment: Option<f64>,
    },
}

/// Apply a policy event's fields over `current`.
fn merge_policy(
    current: &Policy,
    include_beliefs: Option<String>,
    exclude_beliefs: Option<String>,
    min_sentiment: Option<f64>,
) -> Policy {
    Policy {
        include_beliefs: include_beliefs
            .map_or_else(|| current.include_beliefs.clone(), |list| parse_beliefs(&list)),
        exclude_beliefs: exclude_beliefs
            .map_or_else(|| current.exclude_beliefs.clone(), |list| parse_beliefs(&list)),
        min_sentiment: min_sentiment.map_or(current.min_sentiment, clamp_sentiment),
    }
}

/// One line of the output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictLine {
    pub id: String,
    pub show: bool,
    pub reason: String,
    pub basis: VerdictBasis,
    /// Hidden items should be collapsed rather than removed.
    pub minimize: bool,
}

impl VerdictLine {
    pub fn new(id: impl Into<String>, verdict: Verdict, minimize_posts: bool) -> Self {
        Self {
            id: id.into(),
            show: verdict.show,
            minimize: minimize_posts && !verdict.show,
            reason: verdict.reason,
            basis: verdict.basis,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedSummary {
    pub items: u64,
    pub policy_updates: u64,
    pub malformed: u64,
}

/// Read events from `input` until EOF, evaluating items concurrently and
/// writing one verdict line per item to `output` as each completes.
///
/// Each item is evaluated under the policy in force when its line was read,
/// so a policy event only affects items after it.
pub async fn run_feed<R, W>(
    coordinator: &Arc<Coordinator>,
    store: &PolicyStore,
    input: R,
    mut output: W,
    minimize_posts: bool,
) -> Result<FeedSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut pending: JoinSet<VerdictLine> = JoinSet::new();
    let mut summary = FeedSummary::default();
    let mut line_no = 0u64;

    loop {
        tokio::select! {
            Some(joined) = pending.join_next(), if !pending.is_empty() => {
                write_verdict(&mut output, joined).await?;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<FeedEvent>(&line) {
                    Ok(FeedEvent::Item { id, text, image_url }) => {
                        summary.items += 1;
                        let id = id
                            .filter(|id| !id.trim().is_empty())
                            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                        let mut item = ContentItem::new(id, text);
                        item.image_url = image_url;

                        let policy = store.get_policy();
                        let coordinator = Arc::clone(coordinator);
                        pending.spawn(async move {
                            let verdict = coordinator.evaluate_with(&item, &policy).await;
                            VerdictLine::new(item.id, verdict, minimize_posts)
                        });
                    }
                    Ok(FeedEvent::Policy { include_beliefs, exclude_beliefs, min_sentiment }) => {
                        summary.policy_updates += 1;
                        store.update(merge_policy(
                            &store.get_policy(),
                            include_beliefs,
                            exclude_beliefs,
                            min_sentiment,
                        ));
                    }
                    Err(e) => {
                        summary.malformed += 1;
                        tracing::warn!(line = line_no, error = %e, "Skipping malformed input line");
                    }
                }
            }
        }
    }

    while let Some(joined) = pending.join_next().await {
        write_verdict(&mut output, joined).await?;
    }
    output.flush().await?;

    Ok(summary)
}

async fn write_verdict<W>(output: &mut W, joined: Result<VerdictLine, JoinError>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match joined {
        Ok(line) => {
            let mut json = serde_json::to_string(&line)?;
            json.push('\n');
            output.write_all(json.as_bytes()).await?;
            output.flush().await?;
        }
        Err(e) => tracing::error!(error = %e, "Evaluation task failed"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use feedsift_pipeline::llm::StubLlmClient;
    use feedsift_pipeline::{LlmClassifier, ResultCache};

    const CALM: &str = r#"{"excludesAllExcluded": false, "includesAnyOfIncluded": true, "sentimentScore": 7, "reason": "calm"}"#;

    fn pipeline(stub: Arc<StubLlmClient>, policy: Policy) -> (Arc<Coordinator>, PolicyStore) {
        let store = PolicyStore::new(policy);
        let coordinator = Coordinator::new(
            Arc::new(LlmClassifier::new(stub)),
            Arc::new(ResultCache::new(32)),
            &store,
        );
        (Arc::new(coordinator), store)
    }

    async fn feed(input: &str, stub: Arc<StubLlmClient>, policy: Policy) -> (FeedSummary, HashMap<String, VerdictLine>) {
        let (coordinator, store) = pipeline(stub, policy);
        let mut out = Vec::new();
        let summary = run_feed(&coordinator, &store, input.as_bytes(), &mut out, true)
            .await
            .unwrap();

        let lines = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str::<VerdictLine>(l).unwrap())
            .map(|v| (v.id.clone(), v))
            .collect();
        (summary, lines)
    }

    #[test]
    fn parses_events() {
        let item: FeedEvent =
            serde_json::from_str(r#"{"type":"item","id":"1","text":"hi","image_url":"https://x/y.png"}"#)
                .unwrap();
        assert_eq!(
            item,
            FeedEvent::Item {
                id: Some("1".into()),
                text: "hi".into(),
                image_url: Some("https://x/y.png".into()),
            }
        );

        let policy: FeedEvent =
            serde_json::from_str(r#"{"type":"policy","include_beliefs":"a, b","min_sentiment":3}"#)
                .unwrap();
        assert_eq!(
            policy,
            FeedEvent::Policy {
                include_beliefs: Some("a, b".into()),
                exclude_beliefs: None,
                min_sentiment: Some(3.0),
            }
        );
    }

    #[test]
    fn partial_policy_keeps_unspecified_fields() {
        let current = Policy::from_lists("hindu", "politics", 6.0);

        let beliefs_only = merge_policy(&current, Some("Islam, Iskon".into()), None, None);
        assert!(beliefs_only.includes("islam"));
        assert!(!beliefs_only.includes("hindu"));
        assert!(beliefs_only.excludes("politics"));
        assert_eq!(beliefs_only.min_sentiment, 6.0);

        let threshold_only = merge_policy(&current, None, Some(String::new()), Some(42.0));
        assert!(threshold_only.includes("hindu"));
        assert!(threshold_only.exclude_beliefs.is_empty());
        assert_eq!(threshold_only.min_sentiment, 10.0);
    }

    #[tokio::test]
    async fn belief_only_policy_event_keeps_threshold() {
        let stub = Arc::new(StubLlmClient::constant(CALM));
        let input = [
            r#"{"type":"policy","include_beliefs":"islam"}"#,
            r#"{"type":"item","id":"after","text":"calm post"}"#,
        ]
        .join("\n");

        let (summary, verdicts) = feed(&input, stub, Policy::from_lists("hindu", "", 9.0)).await;

        assert_eq!(summary.policy_updates, 1);
        assert!(!verdicts["after"].show);
        assert_eq!(verdicts["after"].reason, "calm");
    }

    #[test]
    fn minimize_only_applies_to_hidden_items() {
        let hidden = VerdictLine::new("a", Verdict::hidden("rude"), true);
        assert!(hidden.minimize);
        assert!(!VerdictLine::new("b", Verdict::shown("fine"), true).minimize);
        assert!(!VerdictLine::new("c", Verdict::hidden("rude"), false).minimize);
    }

    #[tokio::test]
    async fn policy_events_affect_only_later_items() {
        let stub = Arc::new(StubLlmClient::constant(CALM));
        let input = [
            r#"{"type":"item","id":"before","text":"first post"}"#,
            r#"{"type":"policy","include_beliefs":"hindu","exclude_beliefs":"","min_sentiment":9}"#,
            r#"{"type":"item","id":"after","text":"second post"}"#,
        ]
        .join("\n");

        let (summary, verdicts) = feed(&input, stub, Policy::from_lists("hindu", "", 5.0)).await;

        assert_eq!(summary.items, 2);
        assert_eq!(summary.policy_updates, 1);
        assert!(verdicts["before"].show);
        assert!(!verdicts["after"].show);
        assert!(verdicts["after"].minimize);
        assert_eq!(verdicts["after"].reason, "calm");
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let stub = Arc::new(StubLlmClient::constant(CALM));
        let input = "not json\n\n{\"type\":\"unknown\"}\n{\"type\":\"item\",\"id\":\"ok\",\"text\":\"fine\"}\n";

        let (summary, verdicts) = feed(input, stub.clone(), Policy::default()).await;

        assert_eq!(summary.malformed, 2);
        assert_eq!(verdicts.len(), 1);
        assert!(verdicts["ok"].show);
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn missing_ids_are_generated_and_blank_items_skipped() {
        let stub = Arc::new(StubLlmClient::constant(CALM));
        let input = "{\"type\":\"item\",\"text\":\"no id here\"}\n{\"type\":\"item\",\"id\":\"blank\",\"text\":\"  \"}\n";

        let (_, verdicts) = feed(input, stub.clone(), Policy::default()).await;

        assert_eq!(verdicts.len(), 2);
        assert_eq!(verdicts["blank"].basis, VerdictBasis::Skipped);
        let generated = verdicts.keys().find(|id| *id != "blank").unwrap();
        assert!(uuid::Uuid::parse_str(generated).is_ok());
        assert_eq!(stub.calls(), 1);
    }
}
