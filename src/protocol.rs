use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

/// The structured action the action model emits and the executor consumes.
/// The contract with the executor is exactly this shape and nothing more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub action: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// What `Router::process` hands back to the caller. On a failed dispatch
/// `success` is false and `text` carries a short human-readable explanation;
/// rendering is the caller's job.
#[derive(Debug, Clone)]
pub struct Response {
    pub text: String,
    pub action: Option<ActionDescriptor>,
    pub success: bool,
}

impl Response {
    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: None,
            success: false,
        }
    }
}

/// Action execution collaborator. Implementations live outside this crate;
/// the router only needs the result text and a success flag.
pub trait ActionExecutor: Send + Sync {
    fn execute(&self, action: &ActionDescriptor) -> (String, bool);
}

/// Executor that acknowledges actions without performing them. Useful for
/// the bare binary and for wiring tests.
pub struct NoopExecutor;

impl ActionExecutor for NoopExecutor {
    fn execute(&self, action: &ActionDescriptor) -> (String, bool) {
        info!(action = %action.action, "action acknowledged (noop executor)");
        (format!("ok, {}", action.action), true)
    }
}

/// Speech-to-text collaborator. The router itself only sees transcripts;
/// this seam lets the binary swap a real transcriber for the stdin reader.
pub trait Transcriber {
    /// Returns the next transcript, or `None` when the input source ends.
    fn transcribe(&mut self) -> std::io::Result<Option<String>>;
}
