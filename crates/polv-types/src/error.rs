use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolvError {
    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    #[error("Insufficient inventory: requested {requested} of token{token}, held {held}")]
    InsufficientInventory {
        token: u8,
        requested: u128,
        held: u128,
    },

    #[error("Events source error: {0}")]
    Events(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PolvError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PolvError>;
