// Ledger Store - repository traits over any store with atomic commit
//
// The service never talks to a database directly. It asks a LedgerStore for
// either a read scope or an atomic scope and uses the repositories inside it;
// when the closure returns an error the atomic scope is rolled back.

pub mod sqlite;

pub use sqlite::{setup_database, SqliteStore};

use crate::activity::ActivityEntry;
use crate::auth::User;
use crate::error::LedgerResult;
use crate::models::{Block, Member, Shares, Transaction};
use rust_decimal::Decimal;

pub trait BlockRepository {
    fn list_blocks(&self) -> LedgerResult<Vec<Block>>;

    fn find_block(&self, block_id: &str) -> LedgerResult<Option<Block>>;

    fn find_block_by_period(&self, period: &str) -> LedgerResult<Option<Block>>;

    /// Insert the block row only; fails DuplicatePeriod on a taken label
    fn insert_block(&self, block: &Block) -> LedgerResult<()>;

    /// Returns false when no block carries `period`
    fn set_locked(&self, period: &str, locked: bool) -> LedgerResult<bool>;

    /// Delete the block row only; returns false when it did not exist
    fn delete_block(&self, block_id: &str) -> LedgerResult<bool>;
}

pub trait MemberRepository {
    fn list_members(&self) -> LedgerResult<Vec<Member>>;

    fn members_of_block(&self, block_id: &str) -> LedgerResult<Vec<Member>>;

    /// Members are stored in slice order
    fn insert_members(&self, members: &[Member]) -> LedgerResult<()>;

    /// balance += delta
    fn adjust_balance(&self, member_id: &str, delta: Decimal) -> LedgerResult<()>;

    fn set_balance(&self, member_id: &str, balance: Decimal) -> LedgerResult<()>;

    fn delete_block_members(&self, block_id: &str) -> LedgerResult<usize>;
}

pub trait TransactionRepository {
    /// Transaction with its stored shares
    fn find_transaction(&self, tx_id: &str) -> LedgerResult<Option<Transaction>>;

    /// All transactions of a block with their shares, oldest first
    fn transactions_of_block(&self, block_id: &str) -> LedgerResult<Vec<Transaction>>;

    /// Insert the transaction row; shares go through `insert_shares`
    fn insert_transaction(&self, tx: &Transaction) -> LedgerResult<()>;

    /// Replace description, amount, payer and weights
    fn update_transaction(&self, tx: &Transaction) -> LedgerResult<()>;

    fn shares_of(&self, tx_id: &str) -> LedgerResult<Shares>;

    fn insert_shares(&self, tx_id: &str, shares: &Shares) -> LedgerResult<()>;

    fn delete_shares(&self, tx_id: &str) -> LedgerResult<usize>;

    /// Delete the transaction row only; its shares must already be gone
    /// (see `delete_shares`). Returns false when it did not exist
    fn delete_transaction(&self, tx_id: &str) -> LedgerResult<bool>;

    /// Delete every share and transaction of a block
    fn delete_block_transactions(&self, block_id: &str) -> LedgerResult<usize>;
}

/// Everything the ledger service needs inside one store scope
pub trait Repositories: BlockRepository + MemberRepository + TransactionRepository {}

impl<T> Repositories for T where T: BlockRepository + MemberRepository + TransactionRepository {}

pub trait LedgerStore {
    /// Run `f` against a consistent view without writing
    fn read<T, F>(&self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&dyn Repositories) -> LedgerResult<T>;

    /// Run `f` inside one transaction: committed when it returns Ok, rolled
    /// back otherwise
    fn atomically<T, F>(&mut self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&dyn Repositories) -> LedgerResult<T>;
}

pub trait UserRepository {
    /// Returns false when the username is already taken
    fn insert_user(&self, user: &User) -> LedgerResult<bool>;

    fn find_user(&self, username: &str) -> LedgerResult<Option<User>>;
}

pub trait ActivityRepository {
    fn record_activity(&self, entry: &ActivityEntry) -> LedgerResult<()>;

    /// Newest first
    fn list_activity(&self, limit: usize) -> LedgerResult<Vec<ActivityEntry>>;
}
