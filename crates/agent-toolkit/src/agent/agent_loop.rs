//! Agent loop implementation

use std::collections::HashSet;
use std::io::{stdout, Write};
use std::sync::Arc;

use anyhow::Result;
use llm_core::{collect_turn, AssistantTurn, ChatBackend, ChatMessage, ToolCall, ToolDefinition};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::error::AgentError;
use crate::tools::router::{RouteResult, ToolRouter};
use crate::tools::ToolContext;

use super::state::{AbortReason, AgentConfig, AgentState, LoopStatus, MAX_ITERATIONS_NOTICE};

// ANSI colors
const GREEN: &str = "\x1b[92m";
const YELLOW: &str = "\x1b[93m";
const CYAN: &str = "\x1b[96m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// How a run ended
#[derive(Debug)]
pub struct AgentOutcome {
    /// Final answer, or the best partial answer plus a notice when aborted
    pub answer: String,
    pub status: LoopStatus,
    /// Model calls made
    pub iterations: usize,
    /// Full conversation including the seed messages
    pub messages: Vec<ChatMessage>,
}

impl AgentOutcome {
    pub fn is_done(&self) -> bool {
        self.status == LoopStatus::Done
    }
}

/// The agent loop orchestrator
pub struct AgentLoop {
    backend: Arc<dyn ChatBackend>,
    router: ToolRouter,
    config: AgentConfig,
    ctx: ToolContext,
}

impl AgentLoop {
    /// Create a new agent loop. Tools run relative to the configured
    /// working directory.
    pub fn new(backend: Arc<dyn ChatBackend>, router: ToolRouter, config: AgentConfig) -> Self {
        let ctx = ToolContext::new(config.working_dir.clone());
        Self {
            backend,
            router,
            config,
            ctx,
        }
    }

    /// Replace the tool context (timeouts, web service base URL)
    pub fn with_tool_context(mut self, ctx: ToolContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn router(&self) -> &ToolRouter {
        &self.router
    }

    /// Answer a question in a fresh conversation
    pub async fn run(&self, question: &str) -> AgentOutcome {
        self.continue_conversation(Vec::new(), question).await
    }

    /// Answer a question on top of an earlier conversation. The system
    /// prompt is only added when `history` is empty.
    #[instrument(skip(self, history, question), fields(model = %self.backend.model(), history = history.len()))]
    pub async fn continue_conversation(&self, history: Vec<ChatMessage>, question: &str) -> AgentOutcome {
        info!(
            question_len = question.len(),
            max_iterations = self.config.max_iterations,
            "Starting agent loop"
        );

        let mut state = AgentState::new(history);
        if state.messages.is_empty() {
            state.add_message(ChatMessage::system(self.config.system_prompt.clone()));
        }
        state.add_message(ChatMessage::user(question));

        let tools = self.router.registry().schemas();

        while state.iteration < self.config.max_iterations {
            state.increment_iteration();
            state.set_status(LoopStatus::AwaitingModel);
            debug!(iteration = state.iteration, messages = state.messages.len(), "Starting iteration");

            if self.config.verbose {
                print!("{}[Iteration {}]{} ", DIM, state.iteration, RESET);
                let _ = stdout().flush();
            }

            let turn = match self.request_turn(&state.messages, &tools).await {
                Ok(turn) => turn,
                Err(e) => {
                    warn!(error = %e, "LLM request failed");
                    return finish_aborted(state, AbortReason::BackendError(format!("{:#}", e)));
                }
            };

            let AssistantTurn {
                content,
                mut tool_calls,
            } = turn;

            if tool_calls.is_empty() && self.config.parse_content_tool_calls {
                if let Some(parsed) = content.as_deref().and_then(parse_json_tool_calls) {
                    if parsed.iter().all(|c| self.router.registry().contains(c.name())) {
                        debug!(count = parsed.len(), "Parsed tool calls from content JSON");
                        tool_calls = parsed;
                    } else {
                        debug!("Content looks like a tool call for an unknown tool; treating as answer");
                    }
                }
            }

            if tool_calls.is_empty() {
                let answer = content.unwrap_or_default();
                info!(iterations = state.iteration, "Agent completed task");
                if self.config.verbose {
                    println!("{}Done{}", GREEN, RESET);
                }
                state.add_message(ChatMessage::assistant(answer.clone()));
                state.set_status(LoopStatus::Done);
                return AgentOutcome {
                    answer,
                    status: state.status,
                    iterations: state.iteration,
                    messages: state.messages,
                };
            }

            assign_call_ids(&mut tool_calls);
            state.add_message(ChatMessage::assistant_with_tools(content, tool_calls.clone()));
            state.set_status(LoopStatus::DispatchingTools);

            debug!(tool_count = tool_calls.len(), "Processing tool calls");
            let results = self
                .router
                .route_all(&tool_calls, &self.ctx, self.config.parallel_tool_calls)
                .await;

            for (call, (id, result)) in tool_calls.iter().zip(results) {
                if self.config.verbose {
                    print_route_result(call.name(), &result);
                }
                let output = result.into_output();
                state.add_message(ChatMessage::tool_result(id, output.to_message_content()));
            }
        }

        warn!(
            error = %AgentError::MaxIterationsExceeded(self.config.max_iterations),
            "Agent reached maximum iterations"
        );
        finish_aborted(state, AbortReason::MaxIterationsExceeded)
    }

    /// One model call, streamed or not
    async fn request_turn(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Result<AssistantTurn> {
        if !self.config.stream {
            let turn = self.backend.complete(messages, tools).await?;
            if self.config.verbose {
                if let Some(text) = turn.content.as_deref().filter(|t| !t.is_empty()) {
                    println!();
                    println!("{}", text);
                }
            }
            return Ok(turn);
        }

        let stream = self.backend.complete_stream(messages, tools).await?;
        let verbose = self.config.verbose;
        let mut started_output = false;
        let turn = collect_turn(stream, |text| {
            if verbose {
                if !started_output {
                    println!();
                    started_output = true;
                }
                print!("{}", text);
                let _ = stdout().flush();
            }
        })
        .await?;

        if started_output {
            println!();
        }
        Ok(turn)
    }
}

fn finish_aborted(mut state: AgentState, reason: AbortReason) -> AgentOutcome {
    let notice = match &reason {
        AbortReason::MaxIterationsExceeded => MAX_ITERATIONS_NOTICE.to_string(),
        AbortReason::BackendError(e) => format!("Backend error: {}", e),
    };
    let answer = match state.last_text.take() {
        Some(partial) => format!("{}\n\n{}", partial, notice),
        None => notice,
    };

    state.set_status(LoopStatus::Aborted(reason));
    AgentOutcome {
        answer,
        status: state.status,
        iterations: state.iteration,
        messages: state.messages,
    }
}

fn print_route_result(name: &str, result: &RouteResult) {
    let verdict = match result {
        RouteResult::Success(output) if !output.is_error => format!("{}OK{}", GREEN, RESET),
        RouteResult::Success(_) => format!("{}Failed{}", YELLOW, RESET),
        RouteResult::NotFound(_) => format!("{}Not found{}", YELLOW, RESET),
        RouteResult::InvalidArguments(_) => format!("{}Invalid arguments{}", YELLOW, RESET),
        RouteResult::Error(_) => format!("{}Error{}", YELLOW, RESET),
    };
    println!("{}[Tool: {}]{} {}", CYAN, name, RESET, verdict);
}

/// Give every call an id that is unique within the turn
fn assign_call_ids(calls: &mut [ToolCall]) {
    let mut seen = HashSet::new();
    for call in calls.iter_mut() {
        if seen.contains(&call.id) {
            call.id.clear();
        }
        call.ensure_id();
        seen.insert(call.id.clone());
    }
}

/// Parse JSON tool calls from content text
///
/// Some models write tool calls as JSON in the text rather than using the
/// native tool-call field.
///
/// Supports:
/// - Raw JSON: `{"name": "tool_name", "arguments": {...}}`
/// - Markdown code blocks: ```json\n{"name": ...}\n```
/// - Multiple tool calls (array or sequential)
///
/// Returned calls have no id yet.
fn parse_json_tool_calls(content: &str) -> Option<Vec<ToolCall>> {
    let content = content.trim();
    if content.is_empty() {
        return None;
    }

    let json_content = extract_json_from_markdown(content).unwrap_or(content);

    if let Some(call) = try_parse_single_tool_call(json_content) {
        return Some(vec![call]);
    }

    if let Some(calls) = try_parse_tool_call_array(json_content) {
        return Some(calls);
    }

    extract_json_objects(content)
}

/// Extract JSON content from markdown code blocks
fn extract_json_from_markdown(content: &str) -> Option<&str> {
    let patterns = ["```json\n", "```JSON\n", "```\n"];

    for pattern in patterns {
        if let Some(start) = content.find(pattern) {
            let json_start = start + pattern.len();
            if let Some(end) = content[json_start..].find("```") {
                return Some(content[json_start..json_start + end].trim());
            }
        }
    }

    None
}

#[derive(serde::Deserialize)]
struct ToolCallJson {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl ToolCallJson {
    fn into_call(self) -> Option<ToolCall> {
        if self.name.is_empty() {
            return None;
        }
        Some(ToolCall::new(
            String::new(),
            self.name,
            llm_core::decode_arguments(self.arguments),
        ))
    }
}

fn try_parse_single_tool_call(content: &str) -> Option<ToolCall> {
    serde_json::from_str::<ToolCallJson>(content).ok()?.into_call()
}

fn try_parse_tool_call_array(content: &str) -> Option<Vec<ToolCall>> {
    let parsed: Vec<ToolCallJson> = serde_json::from_str(content).ok()?;
    let calls: Vec<ToolCall> = parsed.into_iter().filter_map(ToolCallJson::into_call).collect();

    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}

/// Pull brace-balanced objects out of surrounding prose
fn extract_json_objects(content: &str) -> Option<Vec<ToolCall>> {
    let mut calls = Vec::new();
    let mut depth = 0usize;
    let mut start = None;

    for (i, c) in content.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        if let Some(call) = try_parse_single_tool_call(&content[s..=i]) {
                            calls.push(call);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::ToolRegistry;
    use crate::tools::{ParameterProperty, ParameterSchema, Tool, ToolOutput};
    use async_trait::async_trait;
    use llm_core::{ChatChunk, ChatStream, Role};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedBackend {
        turns: Mutex<VecDeque<Result<AssistantTurn>>>,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedBackend {
        fn new(turns: Vec<Result<AssistantTurn>>) -> Arc<Self> {
            Arc::new(Self {
                turns: Mutex::new(turns.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, messages: &[ChatMessage], _tools: &[ToolDefinition]) -> Result<AssistantTurn> {
            self.calls.lock().unwrap().push(messages.to_vec());
            self.turns
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted")))
        }

        async fn complete_stream(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Result<ChatStream> {
            let turn = self.complete(messages, tools).await?;
            let mut chunks = Vec::new();
            if let Some(text) = turn.content {
                chunks.push(Ok(ChatChunk::text(text)));
            }
            chunks.push(Ok(ChatChunk {
                content: String::new(),
                tool_calls: turn.tool_calls,
                done: true,
            }));
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    struct UpperTool;

    #[async_trait]
    impl Tool for UpperTool {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Uppercase a string"
        }

        fn parameters_schema(&self) -> ParameterSchema {
            ParameterSchema::new().with_required("text", ParameterProperty::string("Text"))
        }

        async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolOutput> {
            let text = crate::tools::required_str(args, "text")?;
            Ok(ToolOutput::success(text.to_uppercase()))
        }
    }

    fn agent(backend: Arc<ScriptedBackend>, config: AgentConfig) -> AgentLoop {
        let mut registry = ToolRegistry::new();
        registry.register_local(UpperTool).unwrap();
        AgentLoop::new(backend, ToolRouter::new(registry), config)
    }

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall::new(id, name, args)
    }

    #[tokio::test]
    async fn test_plain_answer() {
        let backend = ScriptedBackend::new(vec![Ok(AssistantTurn::text("42"))]);
        let outcome = agent(backend.clone(), AgentConfig::new()).run("question").await;

        assert!(outcome.is_done());
        assert_eq!(outcome.answer, "42");
        assert_eq!(outcome.iterations, 1);
        let roles: Vec<Role> = outcome.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn test_tool_round_trip_non_streaming() {
        let backend = ScriptedBackend::new(vec![
            Ok(AssistantTurn::with_tool_calls(vec![
                call("a", "upper", json!({"text": "hi"})),
                call("b", "missing", json!({})),
                call("c", "upper", json!({})),
            ])),
            Ok(AssistantTurn::text("done")),
        ]);
        let config = AgentConfig::new().with_stream(false);
        let outcome = agent(backend.clone(), config).run("go").await;

        assert!(outcome.is_done());
        assert_eq!(outcome.iterations, 2);

        let tool_msgs: Vec<&ChatMessage> =
            outcome.messages.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(tool_msgs.len(), 3);
        assert_eq!(tool_msgs[0].tool_call_id.as_deref(), Some("a"));
        assert_eq!(tool_msgs[0].text_content(), "HI");
        assert!(tool_msgs[1].text_content().starts_with("Error: Unknown tool"));
        assert!(tool_msgs[2].text_content().contains("Invalid arguments"));

        // The second model call saw every tool result
        let second = &backend.calls.lock().unwrap()[1];
        assert_eq!(second.iter().filter(|m| m.role == Role::Tool).count(), 3);
    }

    #[tokio::test]
    async fn test_max_iterations_one() {
        let backend = ScriptedBackend::new(vec![Ok(AssistantTurn {
            content: Some("working on it".to_string()),
            tool_calls: vec![call("a", "upper", json!({"text": "x"}))],
        })]);
        let config = AgentConfig::new().with_max_iterations(1);
        let outcome = agent(backend.clone(), config).run("go").await;

        assert_eq!(backend.call_count(), 1);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.status, LoopStatus::Aborted(AbortReason::MaxIterationsExceeded));
        assert!(outcome.answer.starts_with("working on it"));
        assert!(outcome.answer.ends_with(MAX_ITERATIONS_NOTICE));
        // The tool results of the last turn are still recorded
        assert_eq!(outcome.messages.last().map(|m| m.role), Some(Role::Tool));
    }

    #[tokio::test]
    async fn test_backend_error_aborts_cleanly() {
        let backend = ScriptedBackend::new(vec![
            Ok(AssistantTurn::with_tool_calls(vec![call("a", "upper", json!({"text": "x"}))])),
            Err(anyhow::anyhow!("connection refused")),
        ]);
        let outcome = agent(backend, AgentConfig::new()).run("go").await;

        assert!(matches!(outcome.status, LoopStatus::Aborted(AbortReason::BackendError(_))));
        assert!(outcome.answer.contains("connection refused"));
        assert_eq!(outcome.messages.last().map(|m| m.role), Some(Role::Tool));
    }

    #[tokio::test]
    async fn test_content_tool_call_fallback() {
        let backend = ScriptedBackend::new(vec![
            Ok(AssistantTurn::text(r#"{"name": "upper", "arguments": {"text": "abc"}}"#)),
            Ok(AssistantTurn::text("ABC it is")),
        ]);
        let outcome = agent(backend, AgentConfig::new()).run("go").await;

        assert_eq!(outcome.answer, "ABC it is");
        let assistant = &outcome.messages[2];
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert!(!calls[0].id.is_empty());
        assert_eq!(outcome.messages[3].tool_call_id.as_deref(), Some(calls[0].id.as_str()));
        assert_eq!(outcome.messages[3].text_content(), "ABC");
    }

    #[tokio::test]
    async fn test_content_naming_unknown_tool_is_answer() {
        let text = r#"{"name": "weather", "arguments": {}}"#;
        let backend = ScriptedBackend::new(vec![Ok(AssistantTurn::text(text))]);
        let outcome = agent(backend.clone(), AgentConfig::new()).run("go").await;

        assert!(outcome.is_done());
        assert_eq!(outcome.answer, text);
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_continue_conversation_keeps_history() {
        let backend = ScriptedBackend::new(vec![Ok(AssistantTurn::text("again"))]);
        let history = vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("first"),
            ChatMessage::assistant("ok"),
        ];
        let outcome = agent(backend, AgentConfig::new())
            .continue_conversation(history, "second")
            .await;

        assert_eq!(outcome.messages.len(), 5);
        assert_eq!(outcome.messages.iter().filter(|m| m.role == Role::System).count(), 1);
        assert_eq!(outcome.messages[3].text_content(), "second");
    }

    #[test]
    fn test_assign_call_ids_unique() {
        let mut calls = vec![
            call("", "upper", json!({})),
            call("dup", "upper", json!({})),
            call("dup", "upper", json!({})),
        ];
        assign_call_ids(&mut calls);
        let ids: HashSet<&str> = calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(calls[1].id, "dup");
    }

    #[test]
    fn test_parse_json_tool_call_raw() {
        let content = r#"{"name": "list_files", "arguments": {"directory": "."}}"#;
        let calls = parse_json_tool_calls(content).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name(), "list_files");
    }

    #[test]
    fn test_parse_json_tool_call_markdown() {
        let content = r#"```json
{"name": "read_file", "arguments": {"filepath": "/tmp/test.txt"}}
```"#;
        let calls = parse_json_tool_calls(content).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name(), "read_file");
        assert_eq!(calls[0].function.arguments["filepath"], "/tmp/test.txt");
    }

    #[test]
    fn test_parse_json_tool_call_with_text() {
        let content = r#"I'll look for that file.
{"name": "list_files", "arguments": {"directory": "src"}}
Let me know if you need more."#;
        let calls = parse_json_tool_calls(content).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name(), "list_files");
    }

    #[test]
    fn test_parse_json_tool_call_array() {
        let content = r#"[
            {"name": "read_file", "arguments": {"filepath": "a.txt"}},
            {"name": "read_file", "arguments": "{\"filepath\": \"b.txt\"}"}
        ]"#;
        let calls = parse_json_tool_calls(content).unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].function.arguments["filepath"], "b.txt");
    }

    #[test]
    fn test_parse_json_tool_call_no_match() {
        assert!(parse_json_tool_calls("Just a regular response with no tool calls.").is_none());
        assert!(parse_json_tool_calls("a } stray { brace").is_none());
    }

    #[test]
    fn test_extract_json_from_markdown() {
        let content = "```json\n{\"test\": true}\n```";
        assert_eq!(extract_json_from_markdown(content).unwrap(), "{\"test\": true}");
    }
}
