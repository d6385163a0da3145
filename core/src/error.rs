use thiserror::Error;

pub type Result<T> = std::result::Result<T, FatImageError>;

#[derive(Debug, Error)]
pub enum FatImageError {
    #[error("bad option: {0}")]
    BadOption(String),

    #[error("{path}: {message}")]
    BadInput { path: String, message: String },

    #[error("cannot lay out volume: {0}")]
    LayoutImpossible(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FatImageError {
    pub fn bad_option(message: impl Into<String>) -> Self {
        Self::BadOption(message.into())
    }

    pub fn bad_input(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadInput {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn layout(message: impl Into<String>) -> Self {
        Self::LayoutImpossible(message.into())
    }
}
