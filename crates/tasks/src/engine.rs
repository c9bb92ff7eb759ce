//! The task engine: workflows composed over the dispatch layer.
//!
//! Every workflow resolves an agent, shapes a conversation, dispatches,
//! and post-processes the reply. Failures inside one attempt are retried;
//! failures of the surrounding state machine (review cap, human cancel)
//! are final.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use agentmux_agents::{AgentRegistry, AgentStatus};
use agentmux_config::TaskMode;
use agentmux_core::error::{AgentError, DispatchError, TaskError};
use agentmux_core::message::{Conversation, Message};
use agentmux_core::operator::OperatorCatalog;
use agentmux_providers::dispatch::{CallOptions, Dispatcher};

use crate::gate::{ApprovalGate, Verdict};
use crate::parse;

const FAST_INSTRUCTION: &str =
    "You are a capable assistant. Complete the task directly and reply with the result only.";

const PLAN_INSTRUCTION: &str = "You are a planning assistant. Break the task into a short \
     sequence of concrete steps. Reply with JSON of the form {\"steps\": [\"...\"]} and nothing else.";

const EXECUTE_INSTRUCTION: &str =
    "You are a capable assistant. Execute the task by following the given plan. \
     Reply with the final result only.";

const REVIEW_INSTRUCTION: &str = "You are a strict reviewer. Judge whether the candidate \
     fulfils the task. Reply with JSON of the form {\"approved\": true|false, \"feedback\": \"...\"} \
     and nothing else.";

const BRAINSTORM_INSTRUCTION: &str =
    "You are a creative assistant. Propose one distinct, self-contained answer to the question.";

const RANK_INSTRUCTION: &str = "You are an impartial judge. Rank the candidates against the \
     criteria. Reply with JSON of the form \
     {\"ranked\": [{\"index\": 0, \"score\": 0.0, \"rationale\": \"...\"}]} and nothing else.";

const CHOOSE_INSTRUCTION: &str = "You select tools. Given a task and a list of operators, \
     reply with JSON of the form \
     {\"suitableOperators\": [{\"operatorName\": \"...\", \"confidence\": 0.0}]} and nothing else. \
     Only list operators that genuinely help with the task.";

/// Caller's preference for how a task should be executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModePreference {
    Fast,
    Deep,
    /// Let the engine decide from the request and the agent's models.
    #[default]
    Any,
}

/// One unit of work handed to the engine.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Background the agent needs (may be empty).
    pub context: String,

    /// What to do.
    pub description: String,

    /// When present, the reply is parsed as JSON; an example value
    /// communicating the expected shape.
    pub output_shape: Option<Value>,

    pub mode: ModePreference,

    /// Attempt budget; zero is treated as one.
    pub retries: u32,
}

impl TaskRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            context: String::new(),
            description: description.into(),
            output_shape: None,
            mode: ModePreference::Any,
            retries: 1,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_output_shape(mut self, shape: Value) -> Self {
        self.output_shape = Some(shape);
        self
    }

    pub fn with_mode(mut self, mode: ModePreference) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// One operator the agent judged suitable for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorChoice {
    pub operator_name: String,
    pub confidence: f64,
}

/// A brainstorm candidate with its ranking, best first.
#[derive(Debug, Clone, Serialize)]
pub struct RankedIdea {
    /// Position in the candidate list the evaluator saw.
    pub index: usize,
    pub content: String,
    pub score: Option<f64>,
    pub rationale: Option<String>,
}

/// Executes task workflows against the agent registry.
pub struct TaskEngine {
    registry: Arc<AgentRegistry>,
    dispatcher: Arc<Dispatcher>,
    operators: Arc<OperatorCatalog>,
}

impl TaskEngine {
    pub fn new(
        registry: Arc<AgentRegistry>,
        dispatcher: Arc<Dispatcher>,
        operators: Arc<OperatorCatalog>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            operators,
        }
    }

    /// Execute one task: fast (single dispatch) or deep (plan, then
    /// execute), wrapped in a retry loop of `max(retries, 1)` attempts.
    ///
    /// Cancellation aborts immediately; every other dispatch failure
    /// consumes an attempt. When an output shape was requested the reply
    /// goes through the two-stage parser and degrades to
    /// `{"result": "<raw>"}` rather than failing.
    pub async fn do_task(
        &self,
        agent: Option<&str>,
        request: &TaskRequest,
    ) -> Result<Value, TaskError> {
        let agent = self.registry.get(agent)?;
        let mode = resolve_mode(agent.supports(TaskMode::Fast), agent.supports(TaskMode::Deep), request);
        let model = agent.model_for(mode);
        let options = agent.call_options(model);
        let model_name = model.config.name.clone();

        let attempts = request.retries.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            debug!(agent = %agent.name, model = %model_name, %mode, attempt, "task attempt");
            let outcome = match mode {
                TaskMode::Fast => self.attempt_fast(&model_name, &options, request).await,
                TaskMode::Deep => self.attempt_deep(&model_name, &options, request).await,
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_cancelled() => return Err(e.into()),
                Err(e) => {
                    warn!(agent = %agent.name, attempt, error = %e, "task attempt failed");
                    last_error = e.to_string();
                }
            }
        }
        Err(TaskError::RetriesExhausted {
            attempts,
            last_error,
        })
    }

    async fn attempt_fast(
        &self,
        model: &str,
        options: &CallOptions,
        request: &TaskRequest,
    ) -> Result<Value, DispatchError> {
        let conversation = Conversation::new()
            .with(Message::system(FAST_INSTRUCTION))
            .with(Message::human(task_prompt(request, None)));

        let reply = self
            .dispatcher
            .call_llm_with_model(model, &conversation, None, options)
            .await?;
        Ok(finish(reply, request.output_shape.as_ref()))
    }

    async fn attempt_deep(
        &self,
        model: &str,
        options: &CallOptions,
        request: &TaskRequest,
    ) -> Result<Value, DispatchError> {
        let plan_conversation = Conversation::new()
            .with(Message::system(PLAN_INSTRUCTION))
            .with(Message::human(task_prompt(request, None)));
        let plan_reply = self
            .dispatcher
            .call_llm_with_model(model, &plan_conversation, None, options)
            .await?;

        // The plan parse can never fail the task: prose plans are split
        // into lines, and an empty reply becomes a single generic step.
        let steps = parse_plan(&plan_reply);
        debug!(steps = steps.len(), "plan ready");

        let plan_text = steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {step}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");

        let execute_conversation = Conversation::new()
            .with(Message::system(EXECUTE_INSTRUCTION))
            .with(Message::human(task_prompt(
                request,
                Some(&format!("Plan:\n{plan_text}")),
            )));
        let reply = self
            .dispatcher
            .call_llm_with_model(model, &execute_conversation, None, options)
            .await?;
        Ok(finish(reply, request.output_shape.as_ref()))
    }

    /// Generate and review until a reviewer approves or the iteration cap
    /// is hit. Reviewer feedback accumulates into the next generation's
    /// context; a reviewer reply outside the expected shape counts as a
    /// rejection.
    pub async fn do_task_with_review(
        &self,
        agent: Option<&str>,
        request: &TaskRequest,
        max_iterations: u32,
    ) -> Result<Value, TaskError> {
        let max_iterations = max_iterations.max(1);
        let mut feedback_log: Vec<String> = Vec::new();

        for iteration in 1..=max_iterations {
            let working = request_with_feedback(request, &feedback_log);
            let candidate = self.do_task(agent, &working).await?;
            let candidate_text = render(&candidate);

            match self.review(agent, &request.description, &candidate_text).await? {
                ReviewOutcome::Approved => {
                    debug!(iteration, "candidate approved");
                    return Ok(candidate);
                }
                ReviewOutcome::Rejected(feedback) => {
                    debug!(iteration, "candidate rejected");
                    feedback_log.push(feedback);
                }
            }
        }
        Err(TaskError::ReviewIterationsExceeded {
            iterations: max_iterations,
        })
    }

    async fn review(
        &self,
        agent: Option<&str>,
        description: &str,
        candidate: &str,
    ) -> Result<ReviewOutcome, TaskError> {
        let reviewer = self.registry.get(agent)?;
        let model = reviewer.model_for(TaskMode::Fast);
        let options = reviewer.call_options(model);

        let conversation = Conversation::new()
            .with(Message::system(REVIEW_INSTRUCTION))
            .with(Message::human(format!(
                "Task: {description}\n\nCandidate:\n{candidate}"
            )));
        let reply = self
            .dispatcher
            .call_llm_with_model(&model.config.name, &conversation, None, &options)
            .await
            .map_err(TaskError::from)?;

        #[derive(Deserialize)]
        struct ReviewReply {
            approved: bool,
            #[serde(default)]
            feedback: String,
        }

        let parsed = parse::parse_reply(&reply)
            .and_then(|v| serde_json::from_value::<ReviewReply>(v).ok());
        Ok(match parsed {
            Some(r) if r.approved => ReviewOutcome::Approved,
            Some(r) => ReviewOutcome::Rejected(r.feedback),
            None => {
                warn!("reviewer reply not in expected shape, treating as rejection");
                ReviewOutcome::Rejected(
                    "The previous candidate was rejected; produce an improved version.".into(),
                )
            }
        })
    }

    /// Generate candidates until a human approves one or cancels.
    /// Unbounded: a human saying "no" forever keeps the loop alive.
    pub async fn do_task_with_human_review(
        &self,
        agent: Option<&str>,
        request: &TaskRequest,
        gate: &dyn ApprovalGate,
    ) -> Result<Value, TaskError> {
        let mut rejections: u32 = 0;
        loop {
            let mut working = request.clone();
            if rejections > 0 {
                working.context = format!(
                    "{}\n\nA human reviewer rejected {rejections} earlier candidate(s); \
                     produce a substantially different take.",
                    request.context
                );
            }
            let candidate = self.do_task(agent, &working).await?;

            match gate.review(&render(&candidate)).await {
                Verdict::Approved => return Ok(candidate),
                Verdict::Rejected => rejections += 1,
                Verdict::Cancelled => return Err(TaskError::HumanReviewCancelled),
            }
        }
    }

    /// Fan `generation_count` generations out round-robin across the
    /// active agents, then have `evaluator` rank the survivors.
    ///
    /// Failed generations are dropped (all failing is an error); ranked
    /// indices outside the candidate list are dropped; a wholly
    /// unparseable ranking falls back to candidate order. At most
    /// `return_count` ideas come back, best first.
    pub async fn brainstorm(
        &self,
        evaluator: Option<&str>,
        question: &str,
        generation_count: usize,
        return_count: usize,
        criteria: &str,
    ) -> Result<Vec<RankedIdea>, TaskError> {
        let agents = self.registry.active_agents();
        if agents.is_empty() {
            return Err(AgentError::NoAgentsConfigured.into());
        }
        let generation_count = generation_count.max(1);

        let mut generations = Vec::with_capacity(generation_count);
        for i in 0..generation_count {
            let agent = agents[i % agents.len()];
            let model = agent.model_for(TaskMode::Fast);
            let options = agent.call_options(model);
            let model_name = model.config.name.clone();
            let conversation = Conversation::new()
                .with(Message::system(BRAINSTORM_INSTRUCTION))
                .with(Message::human(format!(
                    "{question}\n\nCriteria: {criteria}"
                )));
            let dispatcher = self.dispatcher.clone();
            generations.push(async move {
                dispatcher
                    .call_llm_with_model(&model_name, &conversation, None, &options)
                    .await
            });
        }

        let mut candidates = Vec::new();
        let mut last_error = String::new();
        for (i, result) in join_all(generations).await.into_iter().enumerate() {
            match result {
                Ok(content) => candidates.push(content),
                Err(e) => {
                    warn!(generation = i, error = %e, "brainstorm generation failed, dropped");
                    last_error = e.to_string();
                }
            }
        }
        if candidates.is_empty() {
            return Err(TaskError::AllGenerationsFailed(last_error));
        }

        let mut ideas = self.rank(evaluator, question, criteria, &candidates).await?;
        ideas.truncate(return_count);
        Ok(ideas)
    }

    async fn rank(
        &self,
        evaluator: Option<&str>,
        question: &str,
        criteria: &str,
        candidates: &[String],
    ) -> Result<Vec<RankedIdea>, TaskError> {
        let evaluator = self.registry.get(evaluator)?;
        let model = evaluator.model_for(TaskMode::Fast);
        let options = evaluator.call_options(model);

        let listing = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{i}]\n{c}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let conversation = Conversation::new()
            .with(Message::system(RANK_INSTRUCTION))
            .with(Message::human(format!(
                "Question: {question}\nCriteria: {criteria}\n\nCandidates:\n{listing}"
            )));
        let reply = self
            .dispatcher
            .call_llm_with_model(&model.config.name, &conversation, None, &options)
            .await
            .map_err(TaskError::from)?;

        #[derive(Deserialize)]
        struct RankedEntry {
            index: i64,
            score: Option<f64>,
            rationale: Option<String>,
        }

        let entries = parse::parse_reply(&reply)
            .and_then(|v| v.get("ranked").cloned())
            .and_then(|v| serde_json::from_value::<Vec<RankedEntry>>(v).ok());

        let Some(entries) = entries else {
            warn!("evaluator ranking unparseable, falling back to candidate order");
            return Ok(candidates
                .iter()
                .enumerate()
                .map(|(index, content)| RankedIdea {
                    index,
                    content: content.clone(),
                    score: None,
                    rationale: None,
                })
                .collect());
        };

        let mut ideas = Vec::new();
        for entry in entries {
            let index = match usize::try_from(entry.index) {
                Ok(i) if i < candidates.len() => i,
                _ => {
                    warn!(index = entry.index, "ranked index out of range, dropped");
                    continue;
                }
            };
            ideas.push(RankedIdea {
                index,
                content: candidates[index].clone(),
                score: entry.score,
                rationale: entry.rationale,
            });
        }
        Ok(ideas)
    }

    /// Ask an agent which registered operators suit a task. Entries under
    /// `confidence_threshold` are discarded. An empty catalog short-circuits
    /// without a dispatch.
    pub async fn choose_operator(
        &self,
        agent: Option<&str>,
        task_description: &str,
        mode: ModePreference,
        confidence_threshold: f64,
    ) -> Result<Vec<OperatorChoice>, TaskError> {
        if self.operators.is_empty() {
            return Ok(Vec::new());
        }
        let agent = self.registry.get(agent)?;
        let resolved = match mode {
            ModePreference::Fast => TaskMode::Fast,
            ModePreference::Deep => TaskMode::Deep,
            ModePreference::Any => {
                if agent.supports(TaskMode::Fast) {
                    TaskMode::Fast
                } else {
                    TaskMode::Deep
                }
            }
        };
        let model = agent.model_for(resolved);
        let options = agent.call_options(model);

        let listing = self
            .operators
            .descriptions()
            .iter()
            .map(|(name, description)| format!("- {name}: {description}"))
            .collect::<Vec<_>>()
            .join("\n");
        let conversation = Conversation::new()
            .with(Message::system(CHOOSE_INSTRUCTION))
            .with(Message::human(format!(
                "Task: {task_description}\n\nOperators:\n{listing}"
            )));
        let reply = self
            .dispatcher
            .call_llm_with_model(&model.config.name, &conversation, None, &options)
            .await
            .map_err(TaskError::from)?;

        let choices = parse::parse_reply(&reply)
            .and_then(|v| v.get("suitableOperators").cloned())
            .and_then(|v| serde_json::from_value::<Vec<OperatorChoice>>(v).ok())
            .ok_or_else(|| TaskError::UnparseableReply(reply))?;

        Ok(choices
            .into_iter()
            .filter(|c| c.confidence >= confidence_threshold)
            .collect())
    }

    /// Cancel every in-flight dispatch. Tasks fail with a cancellation
    /// error; new tasks are unaffected.
    pub fn cancel_tasks(&self) {
        self.dispatcher.cancel_requests();
    }

    /// The registry's build summary: every considered agent, active or
    /// not, with the reason when inactive. Never fails.
    pub fn list_agents(&self) -> Vec<AgentStatus> {
        self.registry.statuses().to_vec()
    }

    /// The operator catalog presented during `choose_operator`.
    pub fn operators(&self) -> &OperatorCatalog {
        &self.operators
    }
}

enum ReviewOutcome {
    Approved,
    Rejected(String),
}

fn request_with_feedback(request: &TaskRequest, feedback: &[String]) -> TaskRequest {
    let mut working = request.clone();
    if !feedback.is_empty() {
        working.context = format!(
            "{}\n\nReviewer feedback on earlier attempts:\n{}",
            request.context,
            feedback.join("\n")
        );
    }
    working
}

fn resolve_mode(supports_fast: bool, supports_deep: bool, request: &TaskRequest) -> TaskMode {
    match request.mode {
        ModePreference::Fast => TaskMode::Fast,
        ModePreference::Deep => TaskMode::Deep,
        ModePreference::Any => {
            if request.output_shape.is_some() && supports_deep {
                TaskMode::Deep
            } else if supports_fast {
                TaskMode::Fast
            } else if supports_deep {
                TaskMode::Deep
            } else {
                TaskMode::Fast
            }
        }
    }
}

fn task_prompt(request: &TaskRequest, extra: Option<&str>) -> String {
    let mut prompt = String::new();
    if !request.context.is_empty() {
        prompt.push_str("Context:\n");
        prompt.push_str(&request.context);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Task: ");
    prompt.push_str(&request.description);
    if let Some(extra) = extra {
        prompt.push_str("\n\n");
        prompt.push_str(extra);
    }
    if let Some(shape) = &request.output_shape {
        prompt.push_str("\n\nRespond with JSON matching this shape:\n");
        prompt.push_str(&shape.to_string());
    }
    prompt
}

/// Plan replies are JSON when the model cooperates and prose when it
/// doesn't; either way some step list comes out.
fn parse_plan(reply: &str) -> Vec<String> {
    let parsed = parse::parse_reply(reply)
        .and_then(|v| v.get("steps").cloned())
        .and_then(|v| serde_json::from_value::<Vec<String>>(v).ok())
        .filter(|steps| !steps.is_empty());
    if let Some(steps) = parsed {
        return steps;
    }

    let lines: Vec<String> = reply
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    if lines.is_empty() {
        vec!["Complete the task as described.".to_string()]
    } else {
        lines
    }
}

fn finish(raw: String, shape: Option<&Value>) -> Value {
    match shape {
        None => Value::String(raw),
        Some(_) => parse::parse_reply(&raw).unwrap_or_else(|| json!({ "result": raw })),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmux_agents::MapEnv;
    use agentmux_config::Catalog;
    use agentmux_core::adapter::{AdapterRequest, ProviderAdapter};
    use agentmux_providers::registry::AdapterRegistry;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    const ONE_PROVIDER: &str = r#"{
        "providers": {
            "acme": {
                "apiKeyEnv": "ACME_KEY",
                "baseURL": "http://localhost:9/v1",
                "adapter": "script",
                "defaultModel": "acme-fast"
            }
        },
        "models": {
            "acme-fast": {"provider": "acme", "mode": "fast"},
            "acme-deep": {"provider": "acme", "mode": "deep"}
        }
    }"#;

    const TWO_PROVIDERS: &str = r#"{
        "providers": {
            "acme": {
                "apiKeyEnv": "ACME_KEY",
                "baseURL": "http://localhost:9/v1",
                "adapter": "script"
            },
            "zeta": {
                "apiKeyEnv": "ZETA_KEY",
                "baseURL": "http://localhost:9/v1",
                "adapter": "script"
            }
        },
        "models": {
            "acme-fast": {"provider": "acme", "mode": "fast"},
            "zeta-fast": {"provider": "zeta", "mode": "fast"}
        }
    }"#;

    /// Replays a scripted sequence of replies and records every request.
    struct ScriptedAdapter {
        replies: Mutex<VecDeque<Result<String, DispatchError>>>,
        seen: Mutex<Vec<AdapterRequest>>,
    }

    impl ScriptedAdapter {
        fn new(replies: Vec<Result<String, DispatchError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn request_text(&self, call: usize) -> String {
            let seen = self.seen.lock().unwrap();
            seen[call]
                .messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        fn name(&self) -> &str {
            "script"
        }

        async fn call_llm(
            &self,
            request: AdapterRequest,
            _cancel: CancellationToken,
        ) -> Result<String, DispatchError> {
            self.seen.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("out of script".into()))
        }
    }

    fn build_engine(
        adapter: Arc<ScriptedAdapter>,
        catalog_json: &str,
        operators: OperatorCatalog,
    ) -> TaskEngine {
        let mut adapters = AdapterRegistry::new();
        adapters.register("script", adapter).unwrap();
        let adapters = Arc::new(adapters);

        let catalog = Catalog::from_json_str(catalog_json);
        let env = MapEnv::new()
            .with("ACME_KEY", "sk-acme")
            .with("ZETA_KEY", "sk-zeta");
        let registry = Arc::new(AgentRegistry::build(&catalog, &env, &adapters));

        TaskEngine::new(
            registry,
            Arc::new(Dispatcher::new(adapters)),
            Arc::new(operators),
        )
    }

    fn engine(adapter: Arc<ScriptedAdapter>) -> TaskEngine {
        build_engine(adapter, ONE_PROVIDER, OperatorCatalog::new())
    }

    fn net_err(message: &str) -> Result<String, DispatchError> {
        Err(DispatchError::Network(message.into()))
    }

    #[tokio::test]
    async fn fast_task_is_one_dispatch() {
        let adapter = ScriptedAdapter::new(vec![Ok("done".into())]);
        let engine = engine(adapter.clone());

        let result = engine
            .do_task(None, &TaskRequest::new("say hi"))
            .await
            .unwrap();
        assert_eq!(result, Value::String("done".into()));
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn retry_succeeds_on_final_attempt() {
        let adapter = ScriptedAdapter::new(vec![
            net_err("boom 1"),
            net_err("boom 2"),
            Ok("third time".into()),
        ]);
        let engine = engine(adapter.clone());

        let request = TaskRequest::new("flaky")
            .with_mode(ModePreference::Fast)
            .with_retries(3);
        let result = engine.do_task(None, &request).await.unwrap();
        assert_eq!(result, Value::String("third time".into()));
        assert_eq!(adapter.calls(), 3);
    }

    #[tokio::test]
    async fn retries_exhausted_reports_last_error() {
        let adapter = ScriptedAdapter::new(vec![net_err("first"), net_err("second")]);
        let engine = engine(adapter.clone());

        let request = TaskRequest::new("doomed")
            .with_mode(ModePreference::Fast)
            .with_retries(2);
        let err = engine.do_task(None, &request).await.unwrap_err();
        match err {
            TaskError::RetriesExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("second"), "got {last_error}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(adapter.calls(), 2);
    }

    #[tokio::test]
    async fn cancellation_is_not_retried() {
        let adapter = ScriptedAdapter::new(vec![Err(DispatchError::Cancelled)]);
        let engine = engine(adapter.clone());

        let request = TaskRequest::new("cut short")
            .with_mode(ModePreference::Fast)
            .with_retries(3);
        let err = engine.do_task(None, &request).await.unwrap_err();
        assert!(matches!(err, TaskError::Dispatch(DispatchError::Cancelled)));
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn deep_task_plans_then_executes() {
        let adapter = ScriptedAdapter::new(vec![
            Ok(r#"{"steps": ["inspect the input", "answer"]}"#.into()),
            Ok("final answer".into()),
        ]);
        let engine = engine(adapter.clone());

        let request = TaskRequest::new("analyze").with_mode(ModePreference::Deep);
        let result = engine.do_task(None, &request).await.unwrap();
        assert_eq!(result, Value::String("final answer".into()));
        assert_eq!(adapter.calls(), 2);
        assert!(adapter.request_text(1).contains("inspect the input"));
    }

    #[tokio::test]
    async fn prose_plan_is_split_into_lines() {
        let adapter = ScriptedAdapter::new(vec![
            Ok("first look at the data\nthen summarize it".into()),
            Ok("summary".into()),
        ]);
        let engine = engine(adapter.clone());

        let request = TaskRequest::new("summarize").with_mode(ModePreference::Deep);
        engine.do_task(None, &request).await.unwrap();
        assert_eq!(adapter.calls(), 2);
        assert!(adapter.request_text(1).contains("then summarize it"));
    }

    #[tokio::test]
    async fn deep_mode_uses_deep_model() {
        let adapter =
            ScriptedAdapter::new(vec![Ok(r#"{"steps": ["s"]}"#.into()), Ok("done".into())]);
        let engine = engine(adapter.clone());

        let request = TaskRequest::new("think hard").with_mode(ModePreference::Deep);
        engine.do_task(None, &request).await.unwrap();
        assert_eq!(adapter.seen.lock().unwrap()[0].model, "acme-deep");
    }

    #[tokio::test]
    async fn shaped_output_parses_prose_wrapped_json() {
        let adapter =
            ScriptedAdapter::new(vec![Ok(r#"Here you go: {"answer": 42}"#.into())]);
        let engine = engine(adapter.clone());

        let request = TaskRequest::new("compute")
            .with_mode(ModePreference::Fast)
            .with_output_shape(json!({"answer": 0}));
        let result = engine.do_task(None, &request).await.unwrap();
        assert_eq!(result, json!({"answer": 42}));
    }

    #[tokio::test]
    async fn unparseable_shaped_reply_degrades_to_raw_wrap() {
        let adapter = ScriptedAdapter::new(vec![Ok("no json at all".into())]);
        let engine = engine(adapter.clone());

        let request = TaskRequest::new("compute")
            .with_mode(ModePreference::Fast)
            .with_output_shape(json!({"answer": 0}));
        let result = engine.do_task(None, &request).await.unwrap();
        assert_eq!(result, json!({"result": "no json at all"}));
    }

    #[tokio::test]
    async fn any_mode_prefers_deep_when_shape_requested() {
        let adapter = ScriptedAdapter::new(vec![
            Ok(r#"{"steps": ["s"]}"#.into()),
            Ok(r#"{"answer": 1}"#.into()),
        ]);
        let engine = engine(adapter.clone());

        let request = TaskRequest::new("shaped").with_output_shape(json!({"answer": 0}));
        engine.do_task(None, &request).await.unwrap();
        // Plan plus execute: the shape pushed mode resolution to deep.
        assert_eq!(adapter.calls(), 2);
    }

    #[tokio::test]
    async fn any_mode_defaults_to_fast_without_shape() {
        let adapter = ScriptedAdapter::new(vec![Ok("quick".into())]);
        let engine = engine(adapter.clone());

        engine.do_task(None, &TaskRequest::new("plain")).await.unwrap();
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn review_approval_on_first_round_is_one_round_trip() {
        let adapter = ScriptedAdapter::new(vec![
            Ok("candidate A".into()),
            Ok(r#"{"approved": true, "feedback": "ship it"}"#.into()),
        ]);
        let engine = engine(adapter.clone());

        let request = TaskRequest::new("write").with_mode(ModePreference::Fast);
        let result = engine.do_task_with_review(None, &request, 3).await.unwrap();
        assert_eq!(result, Value::String("candidate A".into()));
        assert_eq!(adapter.calls(), 2);
    }

    #[tokio::test]
    async fn review_cap_exceeded_after_persistent_rejection() {
        let reject = || Ok(r#"{"approved": false, "feedback": "not good enough"}"#.into());
        let adapter = ScriptedAdapter::new(vec![
            Ok("c1".into()),
            reject(),
            Ok("c2".into()),
            reject(),
            Ok("c3".into()),
            reject(),
        ]);
        let engine = engine(adapter.clone());

        let request = TaskRequest::new("write").with_mode(ModePreference::Fast);
        let err = engine
            .do_task_with_review(None, &request, 3)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TaskError::ReviewIterationsExceeded { iterations: 3 }
        ));
        assert_eq!(adapter.calls(), 6);
    }

    #[tokio::test]
    async fn malformed_review_reply_counts_as_rejection() {
        let adapter = ScriptedAdapter::new(vec![
            Ok("c1".into()),
            Ok("hmm, looks fine to me I guess".into()),
            Ok("c2".into()),
            Ok(r#"{"approved": true, "feedback": ""}"#.into()),
        ]);
        let engine = engine(adapter.clone());

        let request = TaskRequest::new("write").with_mode(ModePreference::Fast);
        let result = engine.do_task_with_review(None, &request, 3).await.unwrap();
        assert_eq!(result, Value::String("c2".into()));
        assert_eq!(adapter.calls(), 4);
    }

    #[tokio::test]
    async fn review_feedback_reaches_next_generation() {
        let adapter = ScriptedAdapter::new(vec![
            Ok("c1".into()),
            Ok(r#"{"approved": false, "feedback": "use fewer words"}"#.into()),
            Ok("c2".into()),
            Ok(r#"{"approved": true, "feedback": ""}"#.into()),
        ]);
        let engine = engine(adapter.clone());

        let request = TaskRequest::new("write").with_mode(ModePreference::Fast);
        engine.do_task_with_review(None, &request, 3).await.unwrap();
        assert!(adapter.request_text(2).contains("use fewer words"));
    }

    /// Gate that replays a scripted sequence of verdicts.
    struct ScriptedGate {
        verdicts: Mutex<VecDeque<Verdict>>,
        shown: Mutex<Vec<String>>,
    }

    impl ScriptedGate {
        fn new(verdicts: Vec<Verdict>) -> Self {
            Self {
                verdicts: Mutex::new(verdicts.into()),
                shown: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ApprovalGate for ScriptedGate {
        async fn review(&self, candidate: &str) -> Verdict {
            self.shown.lock().unwrap().push(candidate.to_string());
            self.verdicts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Verdict::Cancelled)
        }
    }

    #[tokio::test]
    async fn human_rejection_regenerates_until_approval() {
        let adapter = ScriptedAdapter::new(vec![Ok("c1".into()), Ok("c2".into())]);
        let engine = engine(adapter.clone());
        let gate = ScriptedGate::new(vec![Verdict::Rejected, Verdict::Approved]);

        let request = TaskRequest::new("draft").with_mode(ModePreference::Fast);
        let result = engine
            .do_task_with_human_review(None, &request, &gate)
            .await
            .unwrap();
        assert_eq!(result, Value::String("c2".into()));
        assert_eq!(*gate.shown.lock().unwrap(), vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn human_cancel_aborts_the_task() {
        let adapter = ScriptedAdapter::new(vec![Ok("c1".into())]);
        let engine = engine(adapter.clone());
        let gate = ScriptedGate::new(vec![Verdict::Cancelled]);

        let request = TaskRequest::new("draft").with_mode(ModePreference::Fast);
        let err = engine
            .do_task_with_human_review(None, &request, &gate)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::HumanReviewCancelled));
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn brainstorm_fans_out_round_robin_and_ranks() {
        let adapter = ScriptedAdapter::new(vec![
            Ok("idea-0".into()),
            Ok("idea-1".into()),
            Ok("idea-2".into()),
            Ok(r#"{"ranked": [
                {"index": 7, "score": 1.0, "rationale": "phantom"},
                {"index": 2, "score": 0.9, "rationale": "solid"},
                {"index": 0, "score": 0.4, "rationale": "weak"}
            ]}"#
            .into()),
        ]);
        let engine = build_engine(adapter.clone(), TWO_PROVIDERS, OperatorCatalog::new());

        let ideas = engine
            .brainstorm(None, "name the service", 3, 2, "short and memorable")
            .await
            .unwrap();

        // Index 7 silently dropped; survivors in evaluator order.
        assert_eq!(ideas.len(), 2);
        assert_eq!(ideas[0].content, "idea-2");
        assert_eq!(ideas[0].score, Some(0.9));
        assert_eq!(ideas[1].content, "idea-0");

        // Generations alternate across the two active agents.
        let seen = adapter.seen.lock().unwrap();
        assert_eq!(seen[0].model, "acme-fast");
        assert_eq!(seen[1].model, "zeta-fast");
        assert_eq!(seen[2].model, "acme-fast");
    }

    #[tokio::test]
    async fn brainstorm_unparseable_ranking_falls_back_to_candidate_order() {
        let adapter = ScriptedAdapter::new(vec![
            Ok("idea-0".into()),
            Ok("idea-1".into()),
            Ok("I like all of them!".into()),
        ]);
        let engine = engine(adapter.clone());

        let ideas = engine
            .brainstorm(None, "q", 2, 2, "criteria")
            .await
            .unwrap();
        assert_eq!(ideas.len(), 2);
        assert_eq!(ideas[0].content, "idea-0");
        assert_eq!(ideas[1].content, "idea-1");
        assert!(ideas[0].score.is_none());
    }

    #[tokio::test]
    async fn brainstorm_drops_failed_generations() {
        let adapter = ScriptedAdapter::new(vec![
            Ok("idea-0".into()),
            net_err("generation blew up"),
            Ok("idea-2".into()),
            Ok("unrankable".into()),
        ]);
        let engine = engine(adapter.clone());

        let ideas = engine
            .brainstorm(None, "q", 3, 3, "criteria")
            .await
            .unwrap();
        assert_eq!(ideas.len(), 2);
        assert_eq!(ideas[0].content, "idea-0");
        assert_eq!(ideas[1].content, "idea-2");
    }

    #[tokio::test]
    async fn brainstorm_all_generations_failing_is_an_error() {
        let adapter = ScriptedAdapter::new(vec![net_err("a"), net_err("b")]);
        let engine = engine(adapter.clone());

        let err = engine
            .brainstorm(None, "q", 2, 2, "criteria")
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::AllGenerationsFailed(_)));
    }

    fn two_operators() -> OperatorCatalog {
        let mut operators = OperatorCatalog::new();
        operators
            .register_fn("summarize", "Summarizes text", |p| async move { Ok(p) })
            .unwrap();
        operators
            .register_fn("translate", "Translates text", |p| async move { Ok(p) })
            .unwrap();
        operators
    }

    #[tokio::test]
    async fn choose_operator_recovers_prose_wrapped_json() {
        let adapter = ScriptedAdapter::new(vec![Ok(r#"Happy to help! {"suitableOperators": [
            {"operatorName": "summarize", "confidence": 0.9},
            {"operatorName": "translate", "confidence": 0.3}
        ]} Let me know."#
            .into())]);
        let engine = build_engine(adapter.clone(), ONE_PROVIDER, two_operators());

        let choices = engine
            .choose_operator(None, "condense this report", ModePreference::Fast, 0.5)
            .await
            .unwrap();
        assert_eq!(choices.len(), 1);
        assert_eq!(choices[0].operator_name, "summarize");

        // The agent was shown both operators.
        let prompt = adapter.request_text(0);
        assert!(prompt.contains("summarize: Summarizes text"));
        assert!(prompt.contains("translate: Translates text"));
    }

    #[tokio::test]
    async fn choose_operator_unparseable_reply_is_an_error() {
        let adapter = ScriptedAdapter::new(vec![Ok("none of these seem right".into())]);
        let engine = build_engine(adapter.clone(), ONE_PROVIDER, two_operators());

        let err = engine
            .choose_operator(None, "task", ModePreference::Fast, 0.5)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::UnparseableReply(_)));
    }

    #[tokio::test]
    async fn choose_operator_with_empty_catalog_skips_dispatch() {
        let adapter = ScriptedAdapter::new(vec![]);
        let engine = engine(adapter.clone());

        let choices = engine
            .choose_operator(None, "task", ModePreference::Any, 0.5)
            .await
            .unwrap();
        assert!(choices.is_empty());
        assert_eq!(adapter.calls(), 0);
    }

    #[tokio::test]
    async fn list_agents_reports_inactive_agents_with_reasons() {
        let adapter = ScriptedAdapter::new(vec![]);
        let broken = r#"{
            "providers": {"acme": {"adapter": "script"}},
            "models": {"acme-fast": {"provider": "acme", "mode": "fast"}}
        }"#;
        let engine = build_engine(adapter, broken, OperatorCatalog::new());

        let statuses = engine.list_agents();
        assert_eq!(statuses.len(), 1);
        assert!(!statuses[0].active);
        assert!(statuses[0].reason.as_deref().is_some_and(|r| !r.is_empty()));
    }

    #[tokio::test]
    async fn task_against_empty_registry_is_agent_error() {
        let adapter = ScriptedAdapter::new(vec![]);
        let engine = build_engine(adapter, r#"{}"#, OperatorCatalog::new());

        let err = engine
            .do_task(None, &TaskRequest::new("anything"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TaskError::Agent(AgentError::NoAgentsConfigured)
        ));
    }
}
