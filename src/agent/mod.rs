pub mod prompts;
pub mod reply;
pub mod signature;

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::error::PrismError;
use crate::llm::{ChatBackend, Message};
use crate::tools::{TaskDispatcher, ToolCall};

use reply::Reply;
pub use signature::{Ic50Answer, Ic50Task, Signature, PREDICT_IC50_DRUG_CELL};

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_iterations: u32,
    /// Tool output longer than this is truncated before it reaches the model.
    pub max_output_chars: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            max_output_chars: 4000,
        }
    }
}

/// One model turn and what came back from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub iteration: u32,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub ic50_pred: f64,
    pub confidence: u8,
    pub explanation: String,
    pub iterations: u32,
    pub trajectory: Vec<Step>,
}

impl Prediction {
    fn new(answer: Ic50Answer, iterations: u32, trajectory: Vec<Step>) -> Self {
        Self {
            ic50_pred: answer.ic50_pred,
            confidence: answer.confidence,
            explanation: answer.explanation,
            iterations,
            trajectory,
        }
    }
}

/// Tool-using agent that fills [`PREDICT_IC50_DRUG_CELL`].
pub struct Agent {
    llm: Arc<dyn ChatBackend>,
    dispatcher: Arc<TaskDispatcher>,
    signature: Signature,
    config: AgentConfig,
}

fn parse_answer(body: &str) -> std::result::Result<Ic50Answer, String> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| format!("the answer is not valid JSON ({e})"))?;
    Ic50Answer::from_value(&value)
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!(
            "{}...\n[truncated, {} total chars]",
            &text[..cut],
            text.chars().count()
        ),
        None => text.to_string(),
    }
}

impl Agent {
    pub fn new(llm: Arc<dyn ChatBackend>, dispatcher: Arc<TaskDispatcher>, config: AgentConfig) -> Self {
        Self {
            llm,
            dispatcher,
            signature: PREDICT_IC50_DRUG_CELL,
            config,
        }
    }

    pub fn model(&self) -> &str {
        self.llm.model()
    }

    pub async fn predict(&self, task: &Ic50Task) -> Result<Prediction> {
        let span = info_span!("predict", drug = %task.drug, cell_line = %task.cell_line);
        self.run(task).instrument(span).await
    }

    async fn run(&self, task: &Ic50Task) -> Result<Prediction> {
        let fields = self.signature.output_names();
        let mut messages = vec![
            Message::system(prompts::system_prompt(
                &self.signature,
                &self.dispatcher.manifest(),
            )),
            Message::user(task.render()),
        ];
        let mut trajectory = Vec::new();

        for i in 0..self.config.max_iterations {
            let iteration = i + 1;
            let response = self.llm.chat(&messages).await?;
            debug!(iteration, response_len = response.len(), "model reply");

            let reply = Reply::parse(&response);
            messages.push(Message::assistant(response.clone()));
            let mut step = Step {
                iteration,
                response,
                tool_call: None,
                observation: None,
            };

            let feedback = match reply {
                Reply::Final(body) => match parse_answer(&body) {
                    Ok(answer) => {
                        trajectory.push(step);
                        info!(iteration, ic50_pred = answer.ic50_pred, confidence = answer.confidence, "prediction complete");
                        return Ok(Prediction::new(answer, iteration, trajectory));
                    }
                    Err(problems) => {
                        debug!(iteration, %problems, "final answer rejected");
                        prompts::correction(&problems, &fields)
                    }
                },
                Reply::ToolCall(call) => {
                    let observation = match self.dispatcher.dispatch(&call).await {
                        Ok(output) => {
                            prompts::tool_output(&call.name, &truncate(&output, self.config.max_output_chars))
                        }
                        Err(
                            err @ (PrismError::UnknownTool(_)
                            | PrismError::InvalidArguments { .. }
                            | PrismError::Backend { .. }),
                        ) => {
                            debug!(iteration, tool = %call.name, %err, "tool call rejected");
                            prompts::tool_error(&call.name, &err.to_string())
                        }
                        Err(err) => return Err(err.into()),
                    };
                    step.tool_call = Some(call);
                    step.observation = Some(observation.clone());
                    observation
                }
                Reply::Invalid(reason) => {
                    debug!(iteration, "no tool call or final answer, nudging");
                    prompts::nudge(reason.as_deref())
                }
            };

            trajectory.push(step);
            messages.push(Message::user(feedback));
        }

        warn!(
            max_iterations = self.config.max_iterations,
            "iterations exhausted, requesting final answer"
        );
        messages.push(Message::user(prompts::EXTRACT));
        let response = self.llm.chat(&messages).await?;

        let body = match Reply::parse(&response) {
            Reply::Final(body) => body,
            _ => response.trim().to_string(),
        };
        let answer = parse_answer(&body).map_err(PrismError::Parse)?;
        trajectory.push(Step {
            iteration: self.config.max_iterations + 1,
            response,
            tool_call: None,
            observation: None,
        });
        Ok(Prediction::new(answer, self.config.max_iterations + 1, trajectory))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::prism::{Ic50Record, LookupOptions, PrismLookup};
    use crate::tools::PrismIc50Tool;

    /// Replays canned replies and records every transcript it was sent.
    struct Scripted {
        replies: Mutex<VecDeque<String>>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatBackend for Scripted {
        async fn chat(&self, messages: &[Message]) -> Result<String> {
            self.seen.lock().await.push(messages.to_vec());
            self.replies
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn dispatcher() -> Arc<TaskDispatcher> {
        let lookup = PrismLookup::from_records(
            vec![Ic50Record::new("erlotinib", "A549_LUNG", 3.2)],
            LookupOptions::default(),
        )
        .unwrap();
        let mut dispatcher = TaskDispatcher::new();
        dispatcher.register(Arc::new(PrismIc50Tool::new(Arc::new(lookup))));
        Arc::new(dispatcher)
    }

    fn task() -> Ic50Task {
        Ic50Task {
            drug: "erlotinib".into(),
            cell_line: "A549_LUNG".into(),
            experimental_description: None,
            output_unit: "uM".into(),
        }
    }

    const GOOD: &str = r#"FINAL({"ic50_pred": 2.0, "confidence": 55, "explanation": "EGFR inhibitor"})"#;

    #[tokio::test]
    async fn tool_output_is_fed_back() {
        let llm = Scripted::new(&[
            "```tool\n{\"name\": \"prism_ic50\", \"arguments\": {\"drug\": \"erlotinib\", \"cell_line\": \"A549_LUNG\"}}\n```",
            GOOD,
        ]);
        let agent = Agent::new(llm.clone(), dispatcher(), AgentConfig::default());
        let prediction = agent.predict(&task()).await.unwrap();

        assert_eq!(prediction.ic50_pred, 2.0);
        assert_eq!(prediction.confidence, 55);
        assert_eq!(prediction.iterations, 2);
        assert_eq!(prediction.trajectory.len(), 2);
        assert_eq!(
            prediction.trajectory[0].tool_call.as_ref().map(|c| c.name.as_str()),
            Some("prism_ic50")
        );

        let seen = llm.seen.lock().await;
        assert!(seen[0][0].content.contains("### Available tools"));
        let last = seen[1].last().unwrap();
        assert_eq!(last.role, "user");
        assert!(last.content.contains("\"ic50\":3.2"));
    }

    #[tokio::test]
    async fn invalid_and_rejected_answers_get_feedback() {
        let llm = Scripted::new(&[
            "It is probably potent.",
            r#"FINAL({"ic50_pred": -1, "confidence": 55, "explanation": "x"})"#,
            GOOD,
        ]);
        let agent = Agent::new(llm.clone(), dispatcher(), AgentConfig::default());
        let prediction = agent.predict(&task()).await.unwrap();
        assert_eq!(prediction.iterations, 3);

        let seen = llm.seen.lock().await;
        assert!(seen[1].last().unwrap().content.contains("neither a ```tool block"));
        assert!(seen[2].last().unwrap().content.contains("strictly greater than 0"));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_to_the_model() {
        let llm = Scripted::new(&[
            "```tool\n{\"name\": \"chembl\", \"arguments\": {}}\n```",
            GOOD,
        ]);
        let agent = Agent::new(llm.clone(), dispatcher(), AgentConfig::default());
        let prediction = agent.predict(&task()).await.unwrap();
        let observation = prediction.trajectory[0].observation.as_deref().unwrap();
        assert!(observation.starts_with("[Tool error: chembl]"));
    }

    struct Unreachable;

    #[async_trait]
    impl crate::tools::Tool for Unreachable {
        fn name(&self) -> &str {
            "search_pubchem_cid"
        }

        fn description(&self) -> &str {
            "always down"
        }

        fn parameters(&self) -> &[(&'static str, &'static str)] {
            &[("query", "compound name")]
        }

        async fn call(&self, _args: &serde_json::Value) -> crate::error::Result<serde_json::Value> {
            Err(PrismError::Backend {
                tool: "search_pubchem_cid".into(),
                reason: "PubChem returned 503".into(),
            })
        }
    }

    #[tokio::test]
    async fn remote_tool_failure_is_reported_to_the_model() {
        let mut dispatcher = TaskDispatcher::new();
        dispatcher.register(Arc::new(Unreachable));
        let llm = Scripted::new(&[
            "```tool\n{\"name\": \"search_pubchem_cid\", \"arguments\": {\"query\": \"erlotinib\"}}\n```",
            GOOD,
        ]);
        let agent = Agent::new(llm, Arc::new(dispatcher), AgentConfig::default());
        let prediction = agent.predict(&task()).await.unwrap();
        let observation = prediction.trajectory[0].observation.as_deref().unwrap();
        assert!(observation.contains("503"), "{observation}");
    }

    #[tokio::test]
    async fn exhaustion_makes_one_extraction_turn() {
        let config = AgentConfig {
            max_iterations: 2,
            ..Default::default()
        };
        let llm = Scripted::new(&["hmm", "still thinking", GOOD]);
        let agent = Agent::new(llm.clone(), dispatcher(), config.clone());
        let prediction = agent.predict(&task()).await.unwrap();
        assert_eq!(prediction.iterations, 3);
        assert_eq!(llm.seen.lock().await[2].last().unwrap().content, prompts::EXTRACT);

        let llm = Scripted::new(&["hmm", "still thinking", "no idea"]);
        let agent = Agent::new(llm, dispatcher(), config);
        let err = agent.predict(&task()).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<PrismError>(), Some(PrismError::Parse(_))));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("abc", 5), "abc");
        let cut = truncate("µµµµ", 2);
        assert!(cut.starts_with("µµ..."));
        assert!(cut.contains("4 total chars"));
    }
}
