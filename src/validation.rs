// 📐 Request Validation
// Everything here runs before the first write, so a rejection leaves no trace

use crate::error::{LedgerError, LedgerResult};
use crate::models::{Block, NewMember, Shares, TransactionInput};
use crate::settlement::compute_shares;
use rust_decimal::Decimal;

/// Reject mutations on a locked block
pub fn ensure_unlocked(block: &Block) -> LedgerResult<()> {
    if block.locked {
        return Err(LedgerError::BlockLocked(block.period.clone()));
    }
    Ok(())
}

/// Check a block creation request
pub fn validate_new_block(period: &str, members: &[NewMember]) -> LedgerResult<()> {
    if period.trim().is_empty() {
        return Err(LedgerError::InvalidInput("period label is empty".to_string()));
    }

    for (position, member) in members.iter().enumerate() {
        if member.name.trim().is_empty() {
            return Err(LedgerError::InvalidInput(format!(
                "member #{} has an empty name",
                position + 1
            )));
        }
        if member.weight < Decimal::ZERO {
            return Err(LedgerError::InvalidInput(format!(
                "member {} has a negative weight",
                member.name
            )));
        }
    }

    Ok(())
}

/// Validate a transaction against its block and compute its shares
///
/// Checks, in order:
///   1. amount is not negative
///   2. every weighted member belongs to the block   → UnknownMember
///   3. the payer is one of the weighted members     → PayerNotParticipant
///   4. total weight is positive                     → InvalidSplit
pub fn validate_transaction(block: &Block, input: &TransactionInput) -> LedgerResult<Shares> {
    if input.amount < Decimal::ZERO {
        return Err(LedgerError::InvalidInput(format!(
            "amount must not be negative, got {}",
            input.amount
        )));
    }

    if let Some(stranger) = input.weights.keys().find(|id| !block.has_member(id)) {
        return Err(LedgerError::UnknownMember {
            member: stranger.clone(),
            block: block.period.clone(),
        });
    }

    if !input.weights.contains_key(&input.payer) {
        return Err(LedgerError::PayerNotParticipant(input.payer.clone()));
    }

    compute_shares(input.amount, &input.weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Member, Weights};
    use rust_decimal_macros::dec;

    fn block_with(ids: &[&str]) -> Block {
        let mut block = Block::new("2024-10");
        for id in ids {
            block.members.push(Member {
                id: id.to_string(),
                block_id: block.id.clone(),
                name: id.to_string(),
                weight: Decimal::ONE,
                balance: Decimal::ZERO,
            });
        }
        block
    }

    fn input(payer: &str, pairs: &[(&str, Decimal)]) -> TransactionInput {
        let weights: Weights = pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        TransactionInput::new(dec!(100), "test", payer, weights)
    }

    #[test]
    fn test_valid_transaction_yields_shares() {
        let block = block_with(&["a", "b"]);
        let shares = validate_transaction(&block, &input("a", &[("a", dec!(1)), ("b", dec!(1))])).unwrap();
        assert_eq!(shares["a"], dec!(50));
    }

    #[test]
    fn test_unknown_member() {
        let block = block_with(&["a", "b"]);
        let err = validate_transaction(&block, &input("a", &[("a", dec!(1)), ("z", dec!(1))])).unwrap_err();
        assert!(matches!(err, LedgerError::UnknownMember { ref member, .. } if member == "z"));
    }

    #[test]
    fn test_payer_must_participate() {
        let block = block_with(&["a", "b"]);
        let err = validate_transaction(&block, &input("a", &[("b", dec!(1))])).unwrap_err();
        assert!(matches!(err, LedgerError::PayerNotParticipant(_)));
    }

    #[test]
    fn test_membership_checked_before_weights() {
        let block = block_with(&["a"]);
        let err = validate_transaction(&block, &input("a", &[("a", dec!(0)), ("z", dec!(0))])).unwrap_err();
        assert!(matches!(err, LedgerError::UnknownMember { .. }));
    }

    #[test]
    fn test_zero_weights() {
        let block = block_with(&["a", "b"]);
        let err = validate_transaction(&block, &input("a", &[("a", dec!(0)), ("b", dec!(0))])).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidSplit(_)));
    }

    #[test]
    fn test_negative_amount() {
        let block = block_with(&["a"]);
        let mut bad = input("a", &[("a", dec!(1))]);
        bad.amount = dec!(-5);
        assert!(matches!(
            validate_transaction(&block, &bad),
            Err(LedgerError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_locked_block() {
        let mut block = block_with(&["a"]);
        assert!(ensure_unlocked(&block).is_ok());
        block.locked = true;
        assert!(matches!(ensure_unlocked(&block), Err(LedgerError::BlockLocked(_))));
    }

    #[test]
    fn test_new_block_checks() {
        assert!(validate_new_block("2024-10", &[NewMember::new("An", dec!(1))]).is_ok());
        assert!(validate_new_block("  ", &[]).is_err());
        assert!(validate_new_block("2024-10", &[NewMember::new("", dec!(1))]).is_err());
        assert!(validate_new_block("2024-10", &[NewMember::new("An", dec!(-1))]).is_err());
    }
}
