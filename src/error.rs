use thiserror::Error;

pub type Result<T> = std::result::Result<T, KeyerError>;

/// Errors surfaced by the keying pipeline.
///
/// A source that has not decoded its first frame yet is not an error; the
/// render loop reports it as a skipped tick instead.
#[derive(Error, Debug)]
pub enum KeyerError {
    /// Camera permission or device failure. The pipeline stays idle.
    #[error("camera acquisition failed: {0}")]
    Acquisition(String),

    /// GPU device, program or texture could not be created.
    #[error("resource initialization failed: {0}")]
    ResourceInit(String),

    #[error("{0} used after release")]
    ResourceReleased(&'static str),

    #[error("overlay decode failed: {0}")]
    Decode(String),

    #[error("invalid key configuration: {0}")]
    Config(String),

    #[error("display output failed: {0}")]
    Output(String),

    #[error("invalid render loop state: {0}")]
    InvalidState(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeyerError {
    pub fn acquisition(msg: impl Into<String>) -> Self {
        Self::Acquisition(msg.into())
    }

    pub fn resource_init(msg: impl Into<String>) -> Self {
        Self::ResourceInit(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn output(msg: impl Into<String>) -> Self {
        Self::Output(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}
