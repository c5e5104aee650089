//! Collaborator-level faults surfaced by the playback engine.

/// Errors that stop the current sequence and reach the caller of `start`.
///
/// Missing outputs, exhausted ranges, pause and abort are not errors;
/// the engine handles them as state transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Staging buffer mapping or upload failed
    Transfer(String),
    /// Writer failed to encode a frame
    Encode(String),
    /// Source failed to decode a frame
    Decode {
        source: String,
        frame: i32,
        reason: String,
    },
    /// Settings rejected by validation
    InvalidSettings(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Transfer(e) => write!(f, "Transfer error: {}", e),
            EngineError::Encode(e) => write!(f, "Encode error: {}", e),
            EngineError::Decode { source, frame, reason } => {
                write!(f, "Decode error: {} frame {}: {}", source, frame, reason)
            }
            EngineError::InvalidSettings(e) => write!(f, "Invalid settings: {}", e),
        }
    }
}

impl std::error::Error for EngineError {}
