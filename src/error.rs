use thiserror::Error;

/// Everything that can go wrong between receiving an upload and rendering its chat.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a replay file: expected magic {expected:#010X}, found {found:#010X}")]
    InvalidMagic { expected: u32, found: u32 },

    #[error("Replay header is truncated or malformed: {reason}")]
    InvalidHeader { reason: String },

    #[error("Replay metadata is not valid JSON: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Replay metadata does not contain a client version")]
    MissingVersion,

    #[error("Failed to start replay backend '{program}': {source}")]
    BackendSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Replay backend exited with {status}: {stderr}")]
    BackendFailed { status: String, stderr: String },

    #[error("Replay backend reported an error: {0}")]
    Playback(String),

    #[error("Unrecognized backend output at line {line}: {reason}")]
    Protocol { line: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, ChatError>;

impl ChatError {
    pub fn invalid_header(reason: impl Into<String>) -> Self {
        ChatError::InvalidHeader {
            reason: reason.into(),
        }
    }
}
