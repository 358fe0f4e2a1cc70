use thiserror::Error;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("sample source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("malformed device frame: {0}")]
    BadFrame(String),
    #[error("classifier failed: {0}")]
    Classifier(String),
    #[error("classifier model rejected: {0}")]
    BadModel(String),
    #[error("record store i/o: {0}")]
    Store(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}
