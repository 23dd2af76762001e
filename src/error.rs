// ❗ Ledger Errors
// One variant per failure kind; callers map them to transport status codes

use thiserror::Error;

/// Result type for ledger operations
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Block, period or transaction does not exist
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// Mutation attempted on a locked block
    #[error("block {0} is locked")]
    BlockLocked(String),

    /// Weights do not describe a usable split
    #[error("invalid split: {0}")]
    InvalidSplit(String),

    /// Weight map names a member outside the block
    #[error("member {member} does not belong to block {block}")]
    UnknownMember { member: String, block: String },

    /// Payer is not one of the weighted participants
    #[error("payer {0} is not a participant of the split")]
    PayerNotParticipant(String),

    /// Period label already used by another block
    #[error("a block for period {0} already exists")]
    DuplicatePeriod(String),

    /// Malformed request data (empty labels, negative amounts)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Underlying store failed; the operation was rolled back
    #[error("store failure: {0}")]
    Store(String),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        LedgerError::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// Short machine-readable kind, used in API responses and logs
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::NotFound { .. } => "not_found",
            LedgerError::BlockLocked(_) => "block_locked",
            LedgerError::InvalidSplit(_) => "invalid_split",
            LedgerError::UnknownMember { .. } => "unknown_member",
            LedgerError::PayerNotParticipant(_) => "payer_not_participant",
            LedgerError::DuplicatePeriod(_) => "duplicate_period",
            LedgerError::InvalidInput(_) => "invalid_input",
            LedgerError::Store(_) => "store_failure",
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        LedgerError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Store(format!("corrupt weight map: {}", err))
    }
}
