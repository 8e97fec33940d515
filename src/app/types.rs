use std::fmt;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

/// Pipeline parts with an independent lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Source,
    Recording,
    Assembler,
    Detection,
}

impl Component {
    /// Reverse dependency order
    pub const SHUTDOWN_ORDER: [Component; 4] = [
        Component::Detection,
        Component::Assembler,
        Component::Recording,
        Component::Source,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Source => "source",
            Component::Recording => "recording",
            Component::Assembler => "assembler",
            Component::Detection => "detection",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component lifecycle states
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// System shutdown reason
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    Signal(String),
    UserRequest,
}

/// Cloneable trigger for the orchestrator's run loop. Only the first request wins.
#[derive(Clone)]
pub struct ShutdownHandle {
    sender: Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>,
}

impl ShutdownHandle {
    pub(super) fn new(sender: oneshot::Sender<ShutdownReason>) -> Self {
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
        }
    }

    /// Ask the run loop to shut down. Returns false if shutdown was already requested.
    pub async fn request(&self, reason: ShutdownReason) -> bool {
        match self.sender.lock().await.take() {
            Some(sender) => sender.send(reason).is_ok(),
            None => false,
        }
    }
}
