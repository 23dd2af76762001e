// ⚖️ Reconciliation Engine - stored balances vs. balances rebuilt from history
//
// Add and delete update balances incrementally; edit rebuilds them. History is
// the source of truth, so reconciliation compares every stored balance with
//
//   Σ amount (paid) - Σ share (owed)
//
// and reports the members whose difference exceeds the tolerance.

use crate::models::{Balances, Block};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// REPORT
// ============================================================================

/// One member whose stored balance disagrees with history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceDrift {
    pub member_id: String,
    pub name: String,
    pub stored: Decimal,
    pub recomputed: Decimal,

    /// stored - recomputed
    pub difference: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub block_id: String,
    pub period: String,
    pub member_count: usize,
    pub tolerance: Decimal,
    pub drifts: Vec<BalanceDrift>,

    /// Balances written back to the store
    pub balances: Balances,

    pub reconciled_at: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn is_balanced(&self) -> bool {
        self.drifts.is_empty()
    }

    /// Largest absolute drift, zero when balanced
    pub fn max_drift(&self) -> Decimal {
        self.drifts
            .iter()
            .map(|d| d.difference.abs())
            .max()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn summary(&self) -> String {
        format!(
            "Reconciliation for {}: {} members, {} drifted, max drift {}",
            self.period,
            self.member_count,
            self.drifts.len(),
            self.max_drift()
        )
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    /// Differences at or below this are not reported (default: exact match)
    pub tolerance: Decimal,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            tolerance: Decimal::ZERO,
        }
    }

    pub fn with_tolerance(tolerance: Decimal) -> Self {
        ReconciliationEngine {
            tolerance: tolerance.abs(),
        }
    }

    /// Compare the block's stored balances with `recomputed`
    ///
    /// Members absent from `recomputed` are treated as having a zero balance.
    pub fn reconcile(&self, block: &Block, recomputed: &Balances) -> ReconciliationReport {
        let drifts = block
            .members
            .iter()
            .filter_map(|member| {
                let expected = recomputed.get(&member.id).copied().unwrap_or(Decimal::ZERO);
                let difference = member.balance - expected;

                if difference.abs() > self.tolerance {
                    Some(BalanceDrift {
                        member_id: member.id.clone(),
                        name: member.name.clone(),
                        stored: member.balance,
                        recomputed: expected,
                        difference,
                    })
                } else {
                    None
                }
            })
            .collect();

        ReconciliationReport {
            block_id: block.id.clone(),
            period: block.period.clone(),
            member_count: block.members.len(),
            tolerance: self.tolerance,
            drifts,
            balances: recomputed.clone(),
            reconciled_at: Utc::now(),
        }
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
