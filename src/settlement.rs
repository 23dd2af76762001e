// ⚖️ Settlement Engine - shares, deltas and balance recomputation
//
// Conventions:
//   share[m]  = amount * weight[m] / Σ weights
//   delta[m]  = -share[m]                  (everyone owes their share)
//   delta[p] += amount                     (the payer is owed what they paid)
//
// Reversal is the exact negation of the forward deltas, so applying both in
// either order leaves balances untouched.
//
// Shares are quantized to SHARE_SCALE fractional digits. Every amount, share
// and balance then fits Decimal's 28 significant digits without rounding, and
// all later additions are exact.

use crate::error::{LedgerError, LedgerResult};
use crate::models::{Balances, Deltas, Member, Shares, Transaction, Weights};
use rust_decimal::Decimal;

/// Fractional digits kept in a share
pub const SHARE_SCALE: u32 = 12;

// ============================================================================
// SHARES
// ============================================================================

/// Sum of all weights; fails on negative weights or overflow
pub fn total_weight(weights: &Weights) -> LedgerResult<Decimal> {
    let mut total = Decimal::ZERO;

    for (member_id, weight) in weights {
        if *weight < Decimal::ZERO {
            return Err(LedgerError::InvalidSplit(format!(
                "weight for {} is negative ({})",
                member_id, weight
            )));
        }
        total = total
            .checked_add(*weight)
            .ok_or_else(|| LedgerError::InvalidSplit("total weight overflows".to_string()))?;
    }

    Ok(total)
}

/// Split `amount` proportionally to `weights`
///
/// Example: amount 100, weights {A: 1, B: 1} → {A: 50, B: 50}
pub fn compute_shares(amount: Decimal, weights: &Weights) -> LedgerResult<Shares> {
    let total = total_weight(weights)?;

    if total <= Decimal::ZERO {
        return Err(LedgerError::InvalidSplit(
            "participants weight must be > 0".to_string(),
        ));
    }

    let mut shares = Shares::new();
    for (member_id, weight) in weights {
        let share = amount
            .checked_mul(*weight)
            .and_then(|scaled| scaled.checked_div(total))
            .ok_or_else(|| {
                LedgerError::InvalidSplit(format!("share of {} overflows", member_id))
            })?;
        shares.insert(member_id.clone(), share.round_dp(SHARE_SCALE));
    }

    Ok(shares)
}

// ============================================================================
// DELTAS
// ============================================================================

/// Balance changes caused by recording a transaction
///
/// The payer ends up with `amount - share[payer]`, everyone else with
/// `-share[m]`.
pub fn apply_delta(payer: &str, amount: Decimal, shares: &Shares) -> Deltas {
    let mut deltas: Deltas = shares
        .iter()
        .map(|(member_id, share)| (member_id.clone(), -*share))
        .collect();

    let payer_delta = deltas.entry(payer.to_string()).or_insert(Decimal::ZERO);
    *payer_delta += amount;

    deltas
}

/// Balance changes that undo `apply_delta` for the same inputs
pub fn reverse_delta(payer: &str, amount: Decimal, shares: &Shares) -> Deltas {
    apply_delta(payer, amount, shares)
        .into_iter()
        .map(|(member_id, delta)| (member_id, -delta))
        .collect()
}

/// Add deltas onto a balance map (members missing from the map start at 0)
///
/// Stops at the first balance that would overflow; earlier entries are
/// already updated.
pub fn apply_to_balances(balances: &mut Balances, deltas: &Deltas) -> LedgerResult<()> {
    for (member_id, delta) in deltas {
        let balance = balances.entry(member_id.clone()).or_insert(Decimal::ZERO);
        *balance = checked_total(*balance, *delta, member_id)?;
    }
    Ok(())
}

fn checked_total(total: Decimal, value: Decimal, member_id: &str) -> LedgerResult<Decimal> {
    total
        .checked_add(value)
        .ok_or_else(|| LedgerError::InvalidSplit(format!("balance of {} overflows", member_id)))
}

// ============================================================================
// RECOMPUTATION
// ============================================================================

/// Absolute balances of `members` derived from the full transaction history
///
/// balance[m] = Σ amount (where m paid) - Σ share[m]
///
/// Every member appears in the result; history entries naming members outside
/// the list are ignored. The result depends only on the inputs, so running it
/// twice yields the same map. Fails InvalidSplit when a running total leaves
/// Decimal's range.
pub fn recompute_balances(members: &[Member], history: &[Transaction]) -> LedgerResult<Balances> {
    let mut paid: Balances = members
        .iter()
        .map(|m| (m.id.clone(), Decimal::ZERO))
        .collect();
    let mut owed = paid.clone();

    for tx in history {
        if let Some(total) = paid.get_mut(&tx.payer) {
            *total = checked_total(*total, tx.amount, &tx.payer)?;
        }
        for (member_id, share) in &tx.shares {
            if let Some(total) = owed.get_mut(member_id) {
                *total = checked_total(*total, *share, member_id)?;
            }
        }
    }

    paid.into_iter()
        .map(|(member_id, paid_total)| {
            let owed_total = owed.get(&member_id).copied().unwrap_or(Decimal::ZERO);
            let balance = paid_total.checked_sub(owed_total).ok_or_else(|| {
                LedgerError::InvalidSplit(format!("balance of {} overflows", member_id))
            })?;
            Ok((member_id, balance))
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    fn weights(pairs: &[(&str, Decimal)]) -> Weights {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn member(id: &str) -> Member {
        Member {
            id: id.to_string(),
            block_id: "block".to_string(),
            name: id.to_uppercase(),
            weight: Decimal::ONE,
            balance: Decimal::ZERO,
        }
    }

    fn settled(payer: &str, amount: Decimal, w: &Weights) -> Transaction {
        Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            block_id: "block".to_string(),
            description: String::new(),
            amount,
            payer: payer.to_string(),
            weights: w.clone(),
            shares: compute_shares(amount, w).unwrap(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_even_split() {
        let w = weights(&[("a", dec!(1)), ("b", dec!(1))]);
        let shares = compute_shares(dec!(100), &w).unwrap();

        assert_eq!(shares["a"], dec!(50));
        assert_eq!(shares["b"], dec!(50));

        let deltas = apply_delta("a", dec!(100), &shares);
        assert_eq!(deltas["a"], dec!(50));
        assert_eq!(deltas["b"], dec!(-50));
    }

    #[test]
    fn test_weighted_split() {
        let w = weights(&[("a", dec!(1)), ("b", dec!(3))]);
        let shares = compute_shares(dec!(200), &w).unwrap();

        assert_eq!(shares["a"], dec!(50));
        assert_eq!(shares["b"], dec!(150));
    }

    #[test]
    fn test_thirds_sum_close_to_amount() {
        let w = weights(&[("a", dec!(1)), ("b", dec!(1)), ("c", dec!(1))]);
        let shares = compute_shares(dec!(100), &w).unwrap();
        let sum: Decimal = shares.values().copied().sum();

        assert_eq!(shares["a"], dec!(33.333333333333));
        assert!((sum - dec!(100)).abs() < dec!(0.000001));
    }

    #[test]
    fn test_zero_total_weight_rejected() {
        let w = weights(&[("a", dec!(0)), ("b", dec!(0))]);
        let err = compute_shares(dec!(10), &w).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidSplit(_)));

        let empty = Weights::new();
        assert!(matches!(
            compute_shares(dec!(10), &empty),
            Err(LedgerError::InvalidSplit(_))
        ));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let w = weights(&[("a", dec!(3)), ("b", dec!(-1))]);
        assert!(matches!(
            compute_shares(dec!(10), &w),
            Err(LedgerError::InvalidSplit(_))
        ));
    }

    #[test]
    fn test_payer_with_zero_weight_is_owed_everything() {
        let w = weights(&[("a", dec!(0)), ("b", dec!(1))]);
        let shares = compute_shares(dec!(80), &w).unwrap();
        let deltas = apply_delta("a", dec!(80), &shares);

        assert_eq!(deltas["a"], dec!(80));
        assert_eq!(deltas["b"], dec!(-80));
    }

    #[test]
    fn test_reverse_restores_balances_exactly() {
        let w = weights(&[("a", dec!(1)), ("b", dec!(2)), ("c", dec!(4))]);
        let shares = compute_shares(dec!(123.45), &w).unwrap();

        let mut balances: Balances = [
            ("a".to_string(), dec!(0.1)),
            ("b".to_string(), dec!(-7.3333333333333333333)),
            ("c".to_string(), dec!(42)),
        ]
        .into_iter()
        .collect();
        let before = balances.clone();

        apply_to_balances(&mut balances, &apply_delta("a", dec!(123.45), &shares)).unwrap();
        assert_ne!(balances, before);
        apply_to_balances(&mut balances, &reverse_delta("a", dec!(123.45), &shares)).unwrap();
        assert_eq!(balances, before);

        // reverse first, then forward
        apply_to_balances(&mut balances, &reverse_delta("a", dec!(123.45), &shares)).unwrap();
        apply_to_balances(&mut balances, &apply_delta("a", dec!(123.45), &shares)).unwrap();
        assert_eq!(balances, before);
    }

    #[test]
    fn test_recompute_matches_incremental() {
        let members = vec![member("a"), member("b"), member("c")];
        let history = vec![
            settled("a", dec!(90), &weights(&[("a", dec!(1)), ("b", dec!(1)), ("c", dec!(1))])),
            settled("b", dec!(40), &weights(&[("b", dec!(1)), ("c", dec!(1))])),
        ];

        let mut incremental = Balances::new();
        for tx in &history {
            apply_to_balances(&mut incremental, &apply_delta(&tx.payer, tx.amount, &tx.shares)).unwrap();
        }

        let recomputed = recompute_balances(&members, &history).unwrap();
        assert_eq!(recomputed["a"], dec!(60));
        assert_eq!(recomputed["b"], dec!(-10));
        assert_eq!(recomputed["c"], dec!(-50));
        assert_eq!(recomputed, incremental);
    }

    #[test]
    fn test_recompute_is_idempotent_and_covers_idle_members() {
        let members = vec![member("a"), member("b"), member("idle")];
        let history = vec![settled("a", dec!(10), &weights(&[("a", dec!(1)), ("b", dec!(1))]))];

        let first = recompute_balances(&members, &history).unwrap();
        let second = recompute_balances(&members, &history).unwrap();

        assert_eq!(first, second);
        assert_eq!(first["idle"], Decimal::ZERO);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_totals_outside_decimal_range_are_errors() {
        let huge = Decimal::from_str("50000000000000000000000000000").unwrap();
        let w = weights(&[("a", dec!(1)), ("b", dec!(1))]);
        let history = vec![settled("a", huge, &w), settled("a", huge, &w)];

        let result = recompute_balances(&[member("a"), member("b")], &history);
        assert!(matches!(result, Err(LedgerError::InvalidSplit(_))));

        let mut balances: Balances = [("a".to_string(), Decimal::MAX)].into_iter().collect();
        let deltas: Deltas = [("a".to_string(), Decimal::ONE)].into_iter().collect();
        assert!(apply_to_balances(&mut balances, &deltas).is_err());
        assert_eq!(balances["a"], Decimal::MAX);
    }
}
