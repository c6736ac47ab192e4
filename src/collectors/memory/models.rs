use crate::models::CollectedArtifact;

/// Result of the optional memory phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryOutcome {
    Captured(CollectedArtifact),
    ToolUnavailable(String),
    Failed(String),
}
