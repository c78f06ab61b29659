use thiserror::Error;

/// Errors surfaced by the streaming pipeline and its stages.
///
/// Variants map onto how far an error is allowed to travel: `Frame` stays
/// inside the loop that raised it, everything else ends the session.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A single frame could not be processed; the frame is dropped.
    #[error("frame dropped: {0}")]
    Frame(String),

    /// A tensor buffer could not be allocated.
    #[error("failed to allocate {bytes} bytes for {role} buffer")]
    ResourceExhausted { role: String, bytes: usize },

    /// The frame source failed (device disappeared, decoder crashed, ...).
    #[error("frame source failed: {0}")]
    Source(String),

    /// The frame source reached the end of its stream.
    #[error("frame source reached end of stream")]
    SourceEnded,

    /// The model's tensors do not match the segmentation tensor contract.
    #[error("model contract violated: {0}")]
    ModelContract(String),

    /// The inference runtime failed to execute.
    #[error("inference runtime failed: {0}")]
    Runtime(String),

    /// The requested operation is not valid in the current pipeline state.
    #[error("invalid pipeline state: {0}")]
    InvalidState(String),

    /// The display sink rejected a presentation.
    #[error("display sink failed: {0}")]
    Display(String),
}

impl PipelineError {
    /// Whether the error only costs the current frame.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Frame(_) | Self::Runtime(_) | Self::Display(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_errors() {
        assert!(PipelineError::Frame("bad crop".into()).is_transient());
        assert!(PipelineError::Runtime("oops".into()).is_transient());
        assert!(!PipelineError::SourceEnded.is_transient());
        assert!(!PipelineError::ResourceExhausted {
            role: "hidden-in-0".into(),
            bytes: 16
        }
        .is_transient());
    }
}
