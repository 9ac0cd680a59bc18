use thiserror::Error;

use crate::debugger::FrameId;

#[derive(Debug, Error)]
pub enum DebuggerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed agent message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid uri: {0}")]
    Url(#[from] url::ParseError),

    /// The agent reported a keyword type this protocol version does not know.
    #[error("Unrecognized keyword type: {0}")]
    UnknownKeywordType(String),

    #[error("Unable to put response into the queue; another one is still waiting to be taken")]
    ResponseQueueFull,

    #[error("there is no frame on the stack")]
    EmptyStacktrace,

    #[error("frame {0} is not on the stack")]
    UnknownFrame(FrameId),

    #[error("Cannot store resource in non-suite frame")]
    NonSuiteResource,

    #[error("breakpoint path '{0}' is neither a uri nor an absolute file path")]
    BreakpointPath(String),

    #[error("invalid command: {0}")]
    Command(String),
}

pub type Result<T> = std::result::Result<T, DebuggerError>;
