// 🧾 Ledger Service - block and transaction lifecycle
//
// Block state machine:
//   Unlocked ⇄ Locked   (lock/unlock are idempotent)
//
// Add, edit and delete transaction are refused on a locked block. Deleting a
// block ignores the lock and cascades shares → transactions → members → block.
//
// Every mutation is a single atomic scope of the store: validation reads,
// share computation and all writes either commit together or not at all.

use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    Block, BlockSummary, Member, NewMember, Transaction, TransactionInput, TransactionReceipt,
};
use crate::reconciliation::{ReconciliationEngine, ReconciliationReport};
use crate::settlement::{apply_delta, recompute_balances, reverse_delta};
use crate::store::{LedgerStore, Repositories};
use crate::validation::{ensure_unlocked, validate_new_block, validate_transaction};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

pub struct LedgerService<S: LedgerStore> {
    store: S,
    reconciler: ReconciliationEngine,
}

impl<S: LedgerStore> LedgerService<S> {
    pub fn new(store: S) -> Self {
        LedgerService {
            store,
            reconciler: ReconciliationEngine::new(),
        }
    }

    pub fn with_drift_tolerance(mut self, tolerance: Decimal) -> Self {
        self.reconciler = ReconciliationEngine::with_tolerance(tolerance);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ========================================================================
    // BLOCKS
    // ========================================================================

    /// Create an unlocked block whose members all start at a zero balance
    pub fn create_block(&mut self, period: &str, members: &[NewMember]) -> LedgerResult<Block> {
        validate_new_block(period, members)?;

        let mut block = Block::new(period.trim());
        block.members = members
            .iter()
            .map(|m| Member {
                id: uuid::Uuid::new_v4().to_string(),
                block_id: block.id.clone(),
                name: m.name.trim().to_string(),
                weight: m.weight,
                balance: Decimal::ZERO,
            })
            .collect();

        self.store
            .atomically(|repos| {
                repos.insert_block(&block)?;
                repos.insert_members(&block.members)
            })
            .inspect_err(|e| warn!(period = %block.period, error = %e, "block creation rejected"))?;

        info!(
            period = %block.period,
            block_id = %block.id,
            members = block.members.len(),
            "block created"
        );
        Ok(block)
    }

    pub fn list_blocks(&self) -> LedgerResult<Vec<Block>> {
        self.store.read(|repos| repos.list_blocks())
    }

    pub fn block(&self, period: &str) -> LedgerResult<Block> {
        self.store.read(|repos| block_by_period(repos, period))
    }

    pub fn lock_block(&mut self, period: &str) -> LedgerResult<()> {
        self.set_locked(period, true)
    }

    pub fn unlock_block(&mut self, period: &str) -> LedgerResult<()> {
        self.set_locked(period, false)
    }

    fn set_locked(&mut self, period: &str, locked: bool) -> LedgerResult<()> {
        let found = self
            .store
            .atomically(|repos| repos.set_locked(period, locked))?;

        if !found {
            return Err(LedgerError::not_found("block", period));
        }

        info!(period, locked, "block lock changed");
        Ok(())
    }

    /// Remove a block with everything it owns, locked or not
    pub fn delete_block(&mut self, block_id: &str) -> LedgerResult<()> {
        let (transactions, members) = self.store.atomically(|repos| {
            if repos.find_block(block_id)?.is_none() {
                return Err(LedgerError::not_found("block", block_id));
            }

            let transactions = repos.delete_block_transactions(block_id)?;
            let members = repos.delete_block_members(block_id)?;
            repos.delete_block(block_id)?;
            Ok((transactions, members))
        })?;

        info!(block_id, transactions, members, "block deleted");
        Ok(())
    }

    // ========================================================================
    // MEMBERS
    // ========================================================================

    pub fn members_of(&self, period: &str) -> LedgerResult<Vec<Member>> {
        self.block(period).map(|block| block.members)
    }

    pub fn all_members(&self) -> LedgerResult<Vec<Member>> {
        self.store.read(|repos| repos.list_members())
    }

    // ========================================================================
    // TRANSACTIONS
    // ========================================================================

    /// Record an expense and apply its settlement deltas
    pub fn add_transaction(
        &mut self,
        period: &str,
        input: TransactionInput,
    ) -> LedgerResult<TransactionReceipt> {
        let receipt = self
            .store
            .atomically(|repos| {
                let block = block_by_period(repos, period)?;
                ensure_unlocked(&block)?;
                let shares = validate_transaction(&block, &input)?;

                let tx = Transaction {
                    id: uuid::Uuid::new_v4().to_string(),
                    block_id: block.id.clone(),
                    description: input.description.clone(),
                    amount: input.amount,
                    payer: input.payer.clone(),
                    weights: input.weights.clone(),
                    shares,
                    created_at: Utc::now(),
                };

                repos.insert_transaction(&tx)?;
                repos.insert_shares(&tx.id, &tx.shares)?;

                for (member_id, delta) in apply_delta(&tx.payer, tx.amount, &tx.shares) {
                    repos.adjust_balance(&member_id, delta)?;
                }

                Ok(TransactionReceipt {
                    id: tx.id,
                    block_id: tx.block_id,
                    created_at: tx.created_at,
                })
            })
            .inspect_err(|e| warn!(period, error = %e, "transaction rejected"))?;

        info!(
            period,
            tx_id = %receipt.id,
            amount = %input.amount,
            payer = %input.payer,
            "transaction added"
        );
        Ok(receipt)
    }

    pub fn transactions_of(&self, period: &str) -> LedgerResult<Vec<Transaction>> {
        self.store.read(|repos| {
            let block = block_by_period(repos, period)?;
            repos.transactions_of_block(&block.id)
        })
    }

    /// Replace a transaction and rebuild the block's balances from history
    pub fn edit_transaction(
        &mut self,
        tx_id: &str,
        input: TransactionInput,
    ) -> LedgerResult<Transaction> {
        let updated = self
            .store
            .atomically(|repos| {
                let existing = repos
                    .find_transaction(tx_id)?
                    .ok_or_else(|| LedgerError::not_found("transaction", tx_id))?;
                let block = repos
                    .find_block(&existing.block_id)?
                    .ok_or_else(|| LedgerError::not_found("block", existing.block_id.as_str()))?;

                ensure_unlocked(&block)?;
                let shares = validate_transaction(&block, &input)?;

                let updated = Transaction {
                    description: input.description.clone(),
                    amount: input.amount,
                    payer: input.payer.clone(),
                    weights: input.weights.clone(),
                    shares,
                    ..existing
                };

                repos.update_transaction(&updated)?;
                repos.delete_shares(&updated.id)?;
                repos.insert_shares(&updated.id, &updated.shares)?;

                rewrite_balances(repos, &block)?;
                Ok(updated)
            })
            .inspect_err(|e| warn!(tx_id, error = %e, "transaction edit rejected"))?;

        info!(tx_id, amount = %updated.amount, "transaction edited");
        Ok(updated)
    }

    /// Undo a transaction's settlement effect and remove it with its shares
    pub fn delete_transaction(&mut self, tx_id: &str) -> LedgerResult<()> {
        self.store
            .atomically(|repos| {
                let tx = repos
                    .find_transaction(tx_id)?
                    .ok_or_else(|| LedgerError::not_found("transaction", tx_id))?;
                if tx.shares.is_empty() {
                    return Err(LedgerError::not_found("shares of transaction", tx_id));
                }

                let block = repos
                    .find_block(&tx.block_id)?
                    .ok_or_else(|| LedgerError::not_found("block", tx.block_id.as_str()))?;
                ensure_unlocked(&block)?;

                for (member_id, delta) in reverse_delta(&tx.payer, tx.amount, &tx.shares) {
                    repos.adjust_balance(&member_id, delta)?;
                }

                repos.delete_shares(&tx.id)?;
                repos.delete_transaction(&tx.id)?;
                Ok(())
            })
            .inspect_err(|e| warn!(tx_id, error = %e, "transaction delete rejected"))?;

        info!(tx_id, "transaction deleted");
        Ok(())
    }

    // ========================================================================
    // BALANCES
    // ========================================================================

    pub fn summary(&self, period: &str) -> LedgerResult<BlockSummary> {
        let block = self.block(period)?;
        debug!(period, members = block.members.len(), "summary read");
        Ok(BlockSummary::from_block(&block))
    }

    /// Compare stored balances with history and store the recomputed ones
    ///
    /// Allowed on locked blocks: no transaction changes, only balances.
    pub fn reconcile_block(&mut self, period: &str) -> LedgerResult<ReconciliationReport> {
        let reconciler = &self.reconciler;

        let report = self.store.atomically(|repos| {
            let block = block_by_period(repos, period)?;
            let history = repos.transactions_of_block(&block.id)?;
            let recomputed = recompute_balances(&block.members, &history)?;

            let report = reconciler.reconcile(&block, &recomputed);
            for (member_id, balance) in &recomputed {
                repos.set_balance(member_id, *balance)?;
            }
            Ok(report)
        })?;

        if report.is_balanced() {
            info!(period, members = report.member_count, "block reconciled");
        } else {
            warn!(
                period,
                drifted = report.drifts.len(),
                max_drift = %report.max_drift(),
                "balance drift corrected"
            );
        }
        Ok(report)
    }
}

fn block_by_period(repos: &dyn Repositories, period: &str) -> LedgerResult<Block> {
    repos
        .find_block_by_period(period)?
        .ok_or_else(|| LedgerError::not_found("block", period))
}

/// Overwrite every member balance of `block` with the value derived from history
fn rewrite_balances(repos: &dyn Repositories, block: &Block) -> LedgerResult<()> {
    let history = repos.transactions_of_block(&block.id)?;
    let balances = recompute_balances(&block.members, &history)?;

    for (member_id, balance) in &balances {
        repos.set_balance(member_id, *balance)?;
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
