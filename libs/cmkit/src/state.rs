use serde::{Deserialize, Serialize};

/// Service state of a managed node, as seen by the rest of the orchestrator.
///
/// Backends map their native status into exactly one of these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Ready,
    Pending,
    Unknown,
    Shutdown,
    TmpFail,
    Fail,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Ready => "ready",
            NodeState::Pending => "pending",
            NodeState::Unknown => "unknown",
            NodeState::Shutdown => "shutdown",
            NodeState::TmpFail => "tmp_fail",
            NodeState::Fail => "fail",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, NodeState::Ready)
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
