use crate::activity::ActivityEntry;
use crate::auth::User;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{Block, Member, Shares, Transaction, Weights};
use crate::store::{
    ActivityRepository, BlockRepository, LedgerStore, MemberRepository, Repositories,
    TransactionRepository, UserRepository,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

pub fn setup_database(conn: &Connection) -> rusqlite::Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases answer "memory")
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Ledger tables
    // Money columns are TEXT holding decimal strings, never REAL
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS blocks (
            id TEXT PRIMARY KEY,
            period TEXT UNIQUE NOT NULL,
            locked INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS members (
            id TEXT PRIMARY KEY,
            block_id TEXT NOT NULL REFERENCES blocks(id),
            name TEXT NOT NULL,
            weight TEXT NOT NULL,
            balance TEXT NOT NULL DEFAULT '0',
            position INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            block_id TEXT NOT NULL REFERENCES blocks(id),
            payer TEXT NOT NULL,
            amount TEXT NOT NULL,
            description TEXT NOT NULL,
            created_at TEXT NOT NULL,
            weights TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transaction_shares (
            transaction_id TEXT NOT NULL REFERENCES transactions(id),
            member_id TEXT NOT NULL,
            amount TEXT NOT NULL,
            PRIMARY KEY (transaction_id, member_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Users & activity log
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activity_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL,
            method TEXT NOT NULL,
            path TEXT NOT NULL,
            ip_address TEXT,
            user_agent TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_members_block ON members(block_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_block ON transactions(block_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activity_created ON activity_log(created_at)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW DECODING
// ============================================================================

fn decimal_at(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn timestamp_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn weights_at(row: &Row, idx: usize) -> rusqlite::Result<Weights> {
    let json: String = row.get(idx)?;
    serde_json::from_str(&json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn member_from_row(row: &Row) -> rusqlite::Result<Member> {
    Ok(Member {
        id: row.get(0)?,
        block_id: row.get(1)?,
        name: row.get(2)?,
        weight: decimal_at(row, 3)?,
        balance: decimal_at(row, 4)?,
    })
}

/// Block row without members
fn block_from_row(row: &Row) -> rusqlite::Result<Block> {
    Ok(Block {
        id: row.get(0)?,
        period: row.get(1)?,
        locked: row.get(2)?,
        created_at: timestamp_at(row, 3)?,
        members: Vec::new(),
    })
}

/// Transaction row without shares
fn transaction_from_row(row: &Row) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: row.get(0)?,
        block_id: row.get(1)?,
        payer: row.get(2)?,
        amount: decimal_at(row, 3)?,
        description: row.get(4)?,
        created_at: timestamp_at(row, 5)?,
        weights: weights_at(row, 6)?,
        shares: Shares::new(),
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

const MEMBER_COLUMNS: &str = "id, block_id, name, weight, balance";
const BLOCK_COLUMNS: &str = "id, period, locked, created_at";
const TRANSACTION_COLUMNS: &str = "id, block_id, payer, amount, description, created_at, weights";

// ============================================================================
// REPOSITORIES
// ============================================================================

/// Repositories bound to one connection or one open transaction
pub struct SqliteRepos<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteRepos<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        SqliteRepos { conn }
    }

    fn with_members(&self, mut block: Block) -> LedgerResult<Block> {
        block.members = self.members_of_block(&block.id)?;
        Ok(block)
    }
}

impl BlockRepository for SqliteRepos<'_> {
    fn list_blocks(&self) -> LedgerResult<Vec<Block>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM blocks ORDER BY created_at, period",
            BLOCK_COLUMNS
        ))?;

        let blocks = stmt
            .query_map([], block_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        blocks.into_iter().map(|b| self.with_members(b)).collect()
    }

    fn find_block(&self, block_id: &str) -> LedgerResult<Option<Block>> {
        let block = self
            .conn
            .query_row(
                &format!("SELECT {} FROM blocks WHERE id = ?1", BLOCK_COLUMNS),
                [block_id],
                block_from_row,
            )
            .optional()?;

        block.map(|b| self.with_members(b)).transpose()
    }

    fn find_block_by_period(&self, period: &str) -> LedgerResult<Option<Block>> {
        let block = self
            .conn
            .query_row(
                &format!("SELECT {} FROM blocks WHERE period = ?1", BLOCK_COLUMNS),
                [period],
                block_from_row,
            )
            .optional()?;

        block.map(|b| self.with_members(b)).transpose()
    }

    fn insert_block(&self, block: &Block) -> LedgerResult<()> {
        let result = self.conn.execute(
            "INSERT INTO blocks (id, period, locked, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![block.id, block.period, block.locked, block.created_at.to_rfc3339()],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => {
                Err(LedgerError::DuplicatePeriod(block.period.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set_locked(&self, period: &str, locked: bool) -> LedgerResult<bool> {
        let changed = self.conn.execute(
            "UPDATE blocks SET locked = ?1 WHERE period = ?2",
            params![locked, period],
        )?;
        Ok(changed > 0)
    }

    fn delete_block(&self, block_id: &str) -> LedgerResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM blocks WHERE id = ?1", [block_id])?;
        Ok(deleted > 0)
    }
}

impl MemberRepository for SqliteRepos<'_> {
    fn list_members(&self) -> LedgerResult<Vec<Member>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM members ORDER BY block_id, position",
            MEMBER_COLUMNS
        ))?;

        let members = stmt
            .query_map([], member_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(members)
    }

    fn members_of_block(&self, block_id: &str) -> LedgerResult<Vec<Member>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM members WHERE block_id = ?1 ORDER BY position",
            MEMBER_COLUMNS
        ))?;

        let members = stmt
            .query_map([block_id], member_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(members)
    }

    fn insert_members(&self, members: &[Member]) -> LedgerResult<()> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO members (id, block_id, name, weight, balance, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;

        for (position, m) in members.iter().enumerate() {
            stmt.execute(params![
                m.id,
                m.block_id,
                m.name,
                m.weight.to_string(),
                m.balance.to_string(),
                position as i64,
            ])?;
        }

        Ok(())
    }

    fn adjust_balance(&self, member_id: &str, delta: Decimal) -> LedgerResult<()> {
        let current = self
            .conn
            .query_row(
                "SELECT balance FROM members WHERE id = ?1",
                [member_id],
                |row| decimal_at(row, 0),
            )
            .optional()?
            .ok_or_else(|| LedgerError::not_found("member", member_id))?;

        let updated = current
            .checked_add(delta)
            .ok_or_else(|| LedgerError::Store(format!("balance of {} overflows", member_id)))?;

        self.set_balance(member_id, updated)
    }

    fn set_balance(&self, member_id: &str, balance: Decimal) -> LedgerResult<()> {
        let changed = self.conn.execute(
            "UPDATE members SET balance = ?1 WHERE id = ?2",
            params![balance.to_string(), member_id],
        )?;

        if changed == 0 {
            return Err(LedgerError::not_found("member", member_id));
        }
        Ok(())
    }

    fn delete_block_members(&self, block_id: &str) -> LedgerResult<usize> {
        let deleted = self
            .conn
            .execute("DELETE FROM members WHERE block_id = ?1", [block_id])?;
        Ok(deleted)
    }
}

impl TransactionRepository for SqliteRepos<'_> {
    fn find_transaction(&self, tx_id: &str) -> LedgerResult<Option<Transaction>> {
        let tx = self
            .conn
            .query_row(
                &format!("SELECT {} FROM transactions WHERE id = ?1", TRANSACTION_COLUMNS),
                [tx_id],
                transaction_from_row,
            )
            .optional()?;

        match tx {
            Some(mut tx) => {
                tx.shares = self.shares_of(&tx.id)?;
                Ok(Some(tx))
            }
            None => Ok(None),
        }
    }

    fn transactions_of_block(&self, block_id: &str) -> LedgerResult<Vec<Transaction>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE block_id = ?1 ORDER BY created_at, id",
            TRANSACTION_COLUMNS
        ))?;

        let mut transactions = stmt
            .query_map([block_id], transaction_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        // One query for every share of the block instead of one per transaction
        let mut share_stmt = self.conn.prepare(
            "SELECT s.transaction_id, s.member_id, s.amount
             FROM transaction_shares s
             JOIN transactions t ON t.id = s.transaction_id
             WHERE t.block_id = ?1",
        )?;

        let mut shares_by_tx: HashMap<String, Shares> = HashMap::new();
        let rows = share_stmt.query_map([block_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, decimal_at(row, 2)?))
        })?;
        for row in rows {
            let (tx_id, member_id, amount) = row?;
            shares_by_tx.entry(tx_id).or_default().insert(member_id, amount);
        }

        for tx in &mut transactions {
            tx.shares = shares_by_tx.remove(&tx.id).unwrap_or_default();
        }

        Ok(transactions)
    }

    fn insert_transaction(&self, tx: &Transaction) -> LedgerResult<()> {
        let weights_json = serde_json::to_string(&tx.weights)?;

        self.conn.execute(
            "INSERT INTO transactions (id, block_id, payer, amount, description, created_at, weights)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                tx.id,
                tx.block_id,
                tx.payer,
                tx.amount.to_string(),
                tx.description,
                tx.created_at.to_rfc3339(),
                weights_json,
            ],
        )?;

        Ok(())
    }

    fn update_transaction(&self, tx: &Transaction) -> LedgerResult<()> {
        let weights_json = serde_json::to_string(&tx.weights)?;

        let changed = self.conn.execute(
            "UPDATE transactions SET description = ?1, amount = ?2, payer = ?3, weights = ?4
             WHERE id = ?5",
            params![
                tx.description,
                tx.amount.to_string(),
                tx.payer,
                weights_json,
                tx.id,
            ],
        )?;

        if changed == 0 {
            return Err(LedgerError::not_found("transaction", tx.id.as_str()));
        }
        Ok(())
    }

    fn shares_of(&self, tx_id: &str) -> LedgerResult<Shares> {
        let mut stmt = self.conn.prepare(
            "SELECT member_id, amount FROM transaction_shares WHERE transaction_id = ?1",
        )?;

        let shares = stmt
            .query_map([tx_id], |row| Ok((row.get::<_, String>(0)?, decimal_at(row, 1)?)))?
            .collect::<Result<Shares, _>>()?;

        Ok(shares)
    }

    fn insert_shares(&self, tx_id: &str, shares: &Shares) -> LedgerResult<()> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO transaction_shares (transaction_id, member_id, amount)
             VALUES (?1, ?2, ?3)",
        )?;

        for (member_id, amount) in shares {
            stmt.execute(params![tx_id, member_id, amount.to_string()])?;
        }

        Ok(())
    }

    fn delete_shares(&self, tx_id: &str) -> LedgerResult<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM transaction_shares WHERE transaction_id = ?1",
            [tx_id],
        )?;
        Ok(deleted)
    }

    fn delete_transaction(&self, tx_id: &str) -> LedgerResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM transactions WHERE id = ?1", [tx_id])?;
        Ok(deleted > 0)
    }

    fn delete_block_transactions(&self, block_id: &str) -> LedgerResult<usize> {
        self.conn.execute(
            "DELETE FROM transaction_shares
             WHERE transaction_id IN (SELECT id FROM transactions WHERE block_id = ?1)",
            [block_id],
        )?;
        let deleted = self
            .conn
            .execute("DELETE FROM transactions WHERE block_id = ?1", [block_id])?;
        Ok(deleted)
    }
}

impl UserRepository for SqliteRepos<'_> {
    fn insert_user(&self, user: &User) -> LedgerResult<bool> {
        let result = self.conn.execute(
            "INSERT INTO users (id, username, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                user.id,
                user.username,
                user.password_hash,
                user.created_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_constraint_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn find_user(&self, username: &str) -> LedgerResult<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, username, password_hash, created_at FROM users WHERE username = ?1",
                [username],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        password_hash: row.get(2)?,
                        created_at: timestamp_at(row, 3)?,
                    })
                },
            )
            .optional()?;

        Ok(user)
    }
}

impl ActivityRepository for SqliteRepos<'_> {
    fn record_activity(&self, entry: &ActivityEntry) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO activity_log (username, method, path, ip_address, user_agent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.username,
                entry.method,
                entry.path,
                entry.ip_address,
                entry.user_agent,
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn list_activity(&self, limit: usize) -> LedgerResult<Vec<ActivityEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, username, method, path, ip_address, user_agent, created_at
             FROM activity_log
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let entries = stmt
            .query_map([limit as i64], |row| {
                Ok(ActivityEntry {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    method: row.get(2)?,
                    path: row.get(3)?,
                    ip_address: row.get(4)?,
                    user_agent: row.get(5)?,
                    created_at: timestamp_at(row, 6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}

// ============================================================================
// STORE
// ============================================================================

/// SQLite-backed ledger store
///
/// Atomic scopes open an IMMEDIATE transaction so the write lock is held from
/// the first validation read until commit.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(path: impl AsRef<Path>, busy_timeout: Duration) -> LedgerResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> LedgerResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> LedgerResult<Self> {
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn repos(&self) -> SqliteRepos<'_> {
        SqliteRepos::new(&self.conn)
    }
}

impl LedgerStore for SqliteStore {
    fn read<T, F>(&self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&dyn Repositories) -> LedgerResult<T>,
    {
        f(&self.repos())
    }

    fn atomically<T, F>(&mut self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&dyn Repositories) -> LedgerResult<T>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        // An early return drops `tx`, which rolls back
        let value = f(&SqliteRepos::new(&tx))?;

        tx.commit()?;
        Ok(value)
    }
}

impl UserRepository for SqliteStore {
    fn insert_user(&self, user: &User) -> LedgerResult<bool> {
        self.repos().insert_user(user)
    }

    fn find_user(&self, username: &str) -> LedgerResult<Option<User>> {
        self.repos().find_user(username)
    }
}

impl ActivityRepository for SqliteStore {
    fn record_activity(&self, entry: &ActivityEntry) -> LedgerResult<()> {
        self.repos().record_activity(entry)
    }

    fn list_activity(&self, limit: usize) -> LedgerResult<Vec<ActivityEntry>> {
        self.repos().list_activity(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn block_with_members(store: &mut SqliteStore, period: &str, names: &[&str]) -> Block {
        let mut block = Block::new(period);
        block.members = names
            .iter()
            .map(|name| Member {
                id: uuid::Uuid::new_v4().to_string(),
                block_id: block.id.clone(),
                name: name.to_string(),
                weight: Decimal::ONE,
                balance: Decimal::ZERO,
            })
            .collect();

        let inserted = block.clone();
        store
            .atomically(|repos| {
                repos.insert_block(&inserted)?;
                repos.insert_members(&inserted.members)
            })
            .unwrap();
        block
    }

    #[test]
    fn test_block_round_trip_keeps_member_order() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let block = block_with_members(&mut store, "2024-10", &["Chi", "An", "Binh"]);

        let loaded = store
            .read(|repos| repos.find_block_by_period("2024-10"))
            .unwrap()
            .unwrap();

        assert_eq!(loaded.id, block.id);
        let names: Vec<&str> = loaded.members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Chi", "An", "Binh"]);
        assert!(!loaded.locked);
    }

    #[test]
    fn test_duplicate_period_maps_to_error() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        block_with_members(&mut store, "2024-10", &["An"]);

        let again = Block::new("2024-10");
        let err = store
            .atomically(|repos| repos.insert_block(&again))
            .unwrap_err();

        assert!(matches!(err, LedgerError::DuplicatePeriod(_)));
        assert_eq!(store.read(|repos| repos.list_blocks()).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_scope_rolls_back() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let block = block_with_members(&mut store, "2024-10", &["An"]);
        let member_id = block.members[0].id.clone();

        let result: LedgerResult<()> = store.atomically(|repos| {
            repos.adjust_balance(&member_id, dec!(10))?;
            Err(LedgerError::Store("simulated".to_string()))
        });
        assert!(result.is_err());

        let members = store.read(|repos| repos.members_of_block(&block.id)).unwrap();
        assert_eq!(members[0].balance, Decimal::ZERO);
    }

    #[test]
    fn test_transaction_with_shares_round_trip() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let block = block_with_members(&mut store, "2024-10", &["An", "Binh"]);
        let (a, b) = (block.members[0].id.clone(), block.members[1].id.clone());

        let weights: Weights = [(a.clone(), dec!(1)), (b.clone(), dec!(2))].into_iter().collect();
        let shares: Shares = [(a.clone(), dec!(10)), (b.clone(), dec!(20))].into_iter().collect();
        let tx = Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            block_id: block.id.clone(),
            description: "groceries".to_string(),
            amount: dec!(30),
            payer: a.clone(),
            weights,
            shares: Shares::new(),
            created_at: Utc::now(),
        };

        store
            .atomically(|repos| {
                repos.insert_transaction(&tx)?;
                repos.insert_shares(&tx.id, &shares)
            })
            .unwrap();

        let loaded = store
            .read(|repos| repos.find_transaction(&tx.id))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.amount, dec!(30));
        assert_eq!(loaded.weights[&b], dec!(2));
        assert_eq!(loaded.shares, shares);

        let listed = store.read(|repos| repos.transactions_of_block(&block.id)).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].shares, shares);
    }

    #[test]
    fn test_transaction_row_outlives_its_shares_only() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let block = block_with_members(&mut store, "2024-10", &["An"]);
        let a = block.members[0].id.clone();

        let tx = Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            block_id: block.id.clone(),
            description: "rent".to_string(),
            amount: dec!(5),
            payer: a.clone(),
            weights: [(a.clone(), dec!(1))].into_iter().collect(),
            shares: Shares::new(),
            created_at: Utc::now(),
        };
        let shares: Shares = [(a.clone(), dec!(5))].into_iter().collect();
        store
            .atomically(|repos| {
                repos.insert_transaction(&tx)?;
                repos.insert_shares(&tx.id, &shares)
            })
            .unwrap();

        // shares still reference the row
        let early = store.atomically(|repos| repos.delete_transaction(&tx.id));
        assert!(matches!(early, Err(LedgerError::Store(_))));
        assert_eq!(
            store.read(|repos| repos.find_transaction(&tx.id)).unwrap().unwrap().shares,
            shares
        );

        let removed = store
            .atomically(|repos| {
                assert_eq!(repos.delete_shares(&tx.id)?, 1);
                repos.delete_transaction(&tx.id)
            })
            .unwrap();
        assert!(removed);
        assert!(store.read(|repos| repos.find_transaction(&tx.id)).unwrap().is_none());
        assert!(!store.atomically(|repos| repos.delete_transaction(&tx.id)).unwrap());
    }

    #[test]
    fn test_lock_flag_and_unknown_period() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        block_with_members(&mut store, "2024-10", &["An"]);

        assert!(store.atomically(|repos| repos.set_locked("2024-10", true)).unwrap());
        assert!(store.atomically(|repos| repos.set_locked("2024-10", true)).unwrap());
        assert!(!store.atomically(|repos| repos.set_locked("1999-01", true)).unwrap());

        let block = store
            .read(|repos| repos.find_block_by_period("2024-10"))
            .unwrap()
            .unwrap();
        assert!(block.locked);
    }

    #[test]
    fn test_users_and_activity() {
        let store = SqliteStore::open_in_memory().unwrap();
        let user = User::new("an", "$argon2id$fake");

        assert!(store.insert_user(&user).unwrap());
        assert!(!store.insert_user(&User::new("an", "$argon2id$other")).unwrap());
        assert_eq!(store.find_user("an").unwrap().unwrap().id, user.id);
        assert!(store.find_user("nobody").unwrap().is_none());

        store
            .record_activity(&ActivityEntry::new("an", "GET", "/blocks"))
            .unwrap();
        store
            .record_activity(&ActivityEntry::new("an", "POST", "/blocks"))
            .unwrap();

        let log = store.list_activity(10).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].method, "POST");
    }
}
