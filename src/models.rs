// 📒 Ledger Data Model
// Blocks own members and transactions; transactions own their shares
//
// Amounts, weights, shares and balances are Decimals so that adding a delta
// and then its negation lands back on the exact same value.

use crate::error::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Member id → relative weight
pub type Weights = BTreeMap<String, Decimal>;

/// Member id → monetary portion of one transaction
pub type Shares = BTreeMap<String, Decimal>;

/// Member id → signed balance change
pub type Deltas = BTreeMap<String, Decimal>;

/// Member id → absolute balance
pub type Balances = BTreeMap<String, Decimal>;

// ============================================================================
// BLOCK
// ============================================================================

/// A settlement period (usually a month) grouping members and transactions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,

    /// Human-readable label, unique across blocks (e.g. "2024-10")
    pub period: String,

    /// Locked blocks reject transaction add/edit/delete
    pub locked: bool,

    pub created_at: DateTime<Utc>,

    /// In creation order
    pub members: Vec<Member>,
}

impl Block {
    pub fn new(period: &str) -> Self {
        Block {
            id: uuid::Uuid::new_v4().to_string(),
            period: period.to_string(),
            locked: false,
            created_at: Utc::now(),
            members: Vec::new(),
        }
    }

    pub fn member(&self, member_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.id == member_id)
    }

    pub fn has_member(&self, member_id: &str) -> bool {
        self.member(member_id).is_some()
    }
}

// ============================================================================
// MEMBER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub block_id: String,
    pub name: String,

    /// Persisted default weight; settlement uses per-transaction weights
    pub weight: Decimal,

    /// Positive = owed money, negative = owes money
    pub balance: Decimal,
}

/// Member as submitted when creating a block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMember {
    pub name: String,

    #[serde(alias = "ratio", default = "default_weight")]
    pub weight: Decimal,
}

fn default_weight() -> Decimal {
    Decimal::ONE
}

impl NewMember {
    pub fn new(name: &str, weight: Decimal) -> Self {
        NewMember {
            name: name.to_string(),
            weight,
        }
    }
}

// ============================================================================
// TRANSACTION
// ============================================================================

/// A recorded expense with a payer and a weighted split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub block_id: String,
    pub description: String,
    pub amount: Decimal,

    /// Member id of whoever paid
    pub payer: String,

    #[serde(rename = "ratios")]
    pub weights: Weights,

    /// Stored shares, filled when read back from the store
    #[serde(default)]
    pub shares: Shares,

    pub created_at: DateTime<Utc>,
}

/// Body of add and edit requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub amount: Decimal,

    #[serde(default)]
    pub description: String,

    pub payer: String,

    #[serde(rename = "ratios", alias = "weights")]
    pub weights: Weights,
}

impl TransactionInput {
    pub fn new(amount: Decimal, description: &str, payer: &str, weights: Weights) -> Self {
        TransactionInput {
            amount,
            description: description.to_string(),
            payer: payer.to_string(),
            weights,
        }
    }
}

/// What add-transaction hands back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub id: String,
    pub block_id: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberBalance {
    pub member_id: String,
    pub name: String,
    pub balance: Decimal,
}

/// Read-only projection of a block's balances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub block_id: String,
    pub period: String,
    pub locked: bool,
    pub balances: Vec<MemberBalance>,
}

impl BlockSummary {
    pub fn from_block(block: &Block) -> Self {
        BlockSummary {
            block_id: block.id.clone(),
            period: block.period.clone(),
            locked: block.locked,
            balances: block
                .members
                .iter()
                .map(|m| MemberBalance {
                    member_id: m.id.clone(),
                    name: m.name.clone(),
                    balance: m.balance,
                })
                .collect(),
        }
    }

    pub fn balance_of(&self, member_id: &str) -> Option<Decimal> {
        self.balances
            .iter()
            .find(|b| b.member_id == member_id)
            .map(|b| b.balance)
    }

    /// Sum of all balances; zero up to share rounding
    pub fn net(&self) -> LedgerResult<Decimal> {
        self.balances.iter().try_fold(Decimal::ZERO, |total, b| {
            total
                .checked_add(b.balance)
                .ok_or_else(|| LedgerError::InvalidInput("net balance overflows".to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_new_member_accepts_ratio_alias() {
        let member: NewMember = serde_json::from_str(r#"{"name": "An", "ratio": 2}"#).unwrap();
        assert_eq!(member.name, "An");
        assert_eq!(member.weight, dec!(2));

        let defaulted: NewMember = serde_json::from_str(r#"{"name": "Binh"}"#).unwrap();
        assert_eq!(defaulted.weight, Decimal::ONE);
    }

    #[test]
    fn test_transaction_input_reads_ratios() {
        let input: TransactionInput = serde_json::from_str(
            r#"{"amount": 100, "description": "dinner", "payer": "a", "ratios": {"a": 1, "b": 1.5}}"#,
        )
        .unwrap();

        assert_eq!(input.amount, dec!(100));
        assert_eq!(input.weights.get("b"), Some(&dec!(1.5)));
    }

    #[test]
    fn test_money_is_an_exact_json_number() {
        let balance = MemberBalance {
            member_id: "a".to_string(),
            name: "An".to_string(),
            balance: dec!(-50.250000000001),
        };
        let json = serde_json::to_string(&balance).unwrap();
        assert!(json.contains(r#""balance":-50.250000000001"#), "{}", json);

        // string-encoded amounts from older clients are still read
        let quoted: MemberBalance =
            serde_json::from_str(r#"{"member_id": "a", "name": "An", "balance": "-50.250000000001"}"#).unwrap();
        assert_eq!(quoted, balance);
        let parsed: MemberBalance = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, balance);
    }

    #[test]
    fn test_summary_from_block() {
        let mut block = Block::new("2024-10");
        block.members.push(Member {
            id: "a".to_string(),
            block_id: block.id.clone(),
            name: "An".to_string(),
            weight: Decimal::ONE,
            balance: dec!(50),
        });
        block.members.push(Member {
            id: "b".to_string(),
            block_id: block.id.clone(),
            name: "Binh".to_string(),
            weight: Decimal::ONE,
            balance: dec!(-50),
        });

        let summary = BlockSummary::from_block(&block);
        assert_eq!(summary.balance_of("a"), Some(dec!(50)));
        assert_eq!(summary.net().unwrap(), Decimal::ZERO);
        assert!(block.has_member("b"));
        assert!(!block.has_member("c"));
    }
}
