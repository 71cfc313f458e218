//! Agent configuration and run state

use std::fmt;
use std::path::PathBuf;

use llm_core::ChatMessage;

/// System prompt used when none is configured
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that can call tools to answer questions.";

/// Notice appended to the partial answer when the iteration limit is hit
pub const MAX_ITERATIONS_NOTICE: &str =
    "The agent could not complete the task within the maximum number of iterations.";

/// Configuration for the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// System prompt seeding a fresh conversation
    pub system_prompt: String,
    /// Maximum model calls per run
    pub max_iterations: usize,
    /// Working directory
    pub working_dir: PathBuf,
    /// Echo streamed text and tool activity to stdout
    pub verbose: bool,
    /// Use the backend's streaming endpoint
    pub stream: bool,
    /// Dispatch the calls of one turn concurrently
    pub parallel_tool_calls: bool,
    /// Accept tool calls written as JSON in the response text
    pub parse_content_tool_calls: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: 25,
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            verbose: false,
            stream: true,
            parallel_tool_calls: false,
            parse_content_tool_calls: true,
        }
    }
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.parallel_tool_calls = parallel;
        self
    }

    pub fn with_parse_content_tool_calls(mut self, enabled: bool) -> Self {
        self.parse_content_tool_calls = enabled;
        self
    }
}

/// Why a run stopped without a final answer
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    MaxIterationsExceeded,
    BackendError(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::MaxIterationsExceeded => write!(f, "max_iterations_exceeded"),
            AbortReason::BackendError(_) => write!(f, "backend_error"),
        }
    }
}

/// Where the loop is
#[derive(Debug, Clone, PartialEq)]
pub enum LoopStatus {
    AwaitingModel,
    DispatchingTools,
    Done,
    Aborted(AbortReason),
}

impl LoopStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopStatus::Done | LoopStatus::Aborted(_))
    }
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopStatus::AwaitingModel => write!(f, "awaiting_model"),
            LoopStatus::DispatchingTools => write!(f, "dispatching_tools"),
            LoopStatus::Done => write!(f, "done"),
            LoopStatus::Aborted(reason) => write!(f, "aborted({})", reason),
        }
    }
}

/// State of the agent during execution
#[derive(Debug)]
pub struct AgentState {
    /// Message history
    pub messages: Vec<ChatMessage>,
    /// Model calls made so far
    pub iteration: usize,
    pub status: LoopStatus,
    /// Most recent non-empty assistant text
    pub last_text: Option<String>,
}

impl AgentState {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            iteration: 0,
            status: LoopStatus::AwaitingModel,
            last_text: None,
        }
    }

    pub fn add_message(&mut self, message: ChatMessage) {
        if let Some(text) = message.content.as_ref().filter(|t| !t.trim().is_empty()) {
            if message.role == llm_core::Role::Assistant {
                self.last_text = Some(text.clone());
            }
        }
        self.messages.push(message);
    }

    pub fn increment_iteration(&mut self) {
        self.iteration += 1;
    }

    pub fn set_status(&mut self, status: LoopStatus) {
        self.status = status;
    }
}
