use thiserror::Error;

/// Setup-time error type for Quill.
///
/// Per-event failures never surface here: delivery problems are absorbed
/// into an outcome and pattern anomalies render as placeholders.
#[derive(Error, Debug)]
pub enum QuillError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config load error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

impl From<figment::Error> for QuillError {
    fn from(e: figment::Error) -> Self {
        QuillError::Figment(Box::new(e))
    }
}

impl QuillError {
    /// True for errors raised while validating configuration values.
    pub fn is_config(&self) -> bool {
        matches!(self, QuillError::Config(_) | QuillError::Figment(_))
    }
}
