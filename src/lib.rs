// Shared Ledger - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod activity;
pub mod auth;
pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod reconciliation;
pub mod settlement;
pub mod store;
pub mod validation;

#[cfg(feature = "server")]
pub mod api; // HTTP boundary (axum)

// Re-export commonly used types
pub use activity::ActivityEntry;
pub use auth::{AuthError, AuthGateway, Identity, IssuedToken, User};
pub use config::{AuthConfig, Config, SettlementConfig};
pub use error::{LedgerError, LedgerResult};
pub use ledger::LedgerService;
pub use models::{
    Balances, Block, BlockSummary, Deltas, Member, MemberBalance, NewMember, Shares,
    Transaction, TransactionInput, TransactionReceipt, Weights,
};
pub use reconciliation::{BalanceDrift, ReconciliationEngine, ReconciliationReport};
pub use settlement::{apply_delta, compute_shares, recompute_balances, reverse_delta, SHARE_SCALE};
pub use store::{
    ActivityRepository, BlockRepository, LedgerStore, MemberRepository, Repositories,
    SqliteStore, TransactionRepository, UserRepository,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
