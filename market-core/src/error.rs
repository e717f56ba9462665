use alloy_primitives::TxHash;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarketError {
    /// The wallet declined to sign. Never retried.
    #[error("request rejected in wallet: {0}")]
    UserRejection(String),

    /// RPC or network failure before a transaction hash was obtained.
    #[error("submission failed: {0}")]
    Submission(String),

    /// The transaction was mined and reverted, or the receipt wait failed.
    #[error("transaction {hash} failed: {reason}")]
    Confirmation { hash: TxHash, reason: String },

    #[error("data fetch failed: {0}")]
    DataFetch(String),

    #[error("{0}")]
    Validation(String),

    #[error("another transaction is already in progress")]
    Busy,
}

impl MarketError {
    pub fn kind(&self) -> &'static str {
        match self {
            MarketError::UserRejection(_) => "user_rejection",
            MarketError::Submission(_) => "submission",
            MarketError::Confirmation { .. } => "confirmation",
            MarketError::DataFetch(_) => "data_fetch",
            MarketError::Validation(_) => "validation",
            MarketError::Busy => "busy",
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        matches!(self, MarketError::UserRejection(_))
    }

    pub fn data_fetch(err: impl std::fmt::Display) -> Self {
        MarketError::DataFetch(err.to_string())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        MarketError::Validation(msg.into())
    }
}

pub type MarketResult<T> = Result<T, MarketError>;
