//! Money arithmetic for bookings and terminal transitions. Everything here
//! is pure integer math over whole currency units; callers own the wallet
//! writes.

use crate::models::{DiscountKind, DiscountSnapshot};

/// Share of the price a doctor keeps when a patient cancels a confirmed
/// consultation.
const CONFIRMED_CANCEL_PAYOUT_PERCENT: i64 = 30;

/// How a consultation's price is divided between the two wallets when the
/// consultation reaches a terminal state. The two sides always sum to the
/// original price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementSplit {
    pub patient_refund: i64,
    pub doctor_payout: i64,
}

impl SettlementSplit {
    pub fn none() -> Self {
        Self {
            patient_refund: 0,
            doctor_payout: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.patient_refund == 0 && self.doctor_payout == 0
    }
}

/// Price of a booking: fee per slot times slot count, minus the discount.
/// A flat (`vnd`) discount is subtracted from the base exactly once; a
/// `percent` discount removes `base * value / 100`. Never negative.
pub fn consultation_price(
    fee_per_slot: i64,
    slot_count: usize,
    discount: Option<&DiscountSnapshot>,
) -> i64 {
    let base = fee_per_slot * slot_count as i64;

    let discounted = match discount {
        Some(snapshot) => match snapshot.kind {
            DiscountKind::Vnd => base - snapshot.value,
            DiscountKind::Percent => base - base * snapshot.value / 100,
        },
        None => base,
    };

    discounted.max(0)
}

/// Cancellation before the doctor confirmed, or a denial: the patient gets
/// everything back.
pub fn full_refund(price: i64) -> SettlementSplit {
    SettlementSplit {
        patient_refund: price,
        doctor_payout: 0,
    }
}

/// Cancellation after confirmation: the doctor keeps 30%, the patient gets
/// 70%. Integer division rounds the payout down so any remainder stays with
/// the payer.
pub fn confirmed_cancellation_split(price: i64) -> SettlementSplit {
    let doctor_payout = price * CONFIRMED_CANCEL_PAYOUT_PERCENT / 100;
    SettlementSplit {
        patient_refund: price - doctor_payout,
        doctor_payout,
    }
}

/// A finished consultation: the doctor is paid in full.
pub fn full_payout(price: i64) -> SettlementSplit {
    SettlementSplit {
        patient_refund: 0,
        doctor_payout: price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn percent(value: i64) -> DiscountSnapshot {
        DiscountSnapshot {
            code: "PCT".to_string(),
            kind: DiscountKind::Percent,
            value,
        }
    }

    fn flat(value: i64) -> DiscountSnapshot {
        DiscountSnapshot {
            code: "FLAT".to_string(),
            kind: DiscountKind::Vnd,
            value,
        }
    }

    #[test]
    fn price_is_fee_times_slot_count() {
        assert_eq!(consultation_price(1000, 2, None), 2000);
        assert_eq!(consultation_price(150000, 1, None), 150000);
    }

    #[test]
    fn percent_discount_reduces_base() {
        // 1000 * 2 = 2000, minus 10% = 1800
        assert_eq!(consultation_price(1000, 2, Some(&percent(10))), 1800);
    }

    #[test]
    fn percent_discount_uses_integer_division() {
        // 999 * 10 / 100 = 99
        assert_eq!(consultation_price(999, 1, Some(&percent(10))), 900);
    }

    #[test]
    fn flat_discount_subtracted_once_from_base() {
        assert_eq!(consultation_price(150000, 1, Some(&flat(50000))), 100000);
        assert_eq!(consultation_price(100000, 2, Some(&flat(50000))), 150000);
    }

    #[test]
    fn price_never_goes_negative() {
        assert_eq!(consultation_price(100000, 1, Some(&flat(500000))), 0);
        assert_eq!(consultation_price(0, 3, Some(&percent(10))), 0);
    }

    #[test]
    fn confirmed_cancellation_splits_seventy_thirty() {
        let split = confirmed_cancellation_split(100000);
        assert_eq!(split.patient_refund, 70000);
        assert_eq!(split.doctor_payout, 30000);
    }

    #[test]
    fn split_remainder_goes_to_the_patient() {
        // 105 * 30 / 100 = 31, remainder lands in the refund
        let split = confirmed_cancellation_split(105);
        assert_eq!(split.doctor_payout, 31);
        assert_eq!(split.patient_refund, 74);
        assert_eq!(split.patient_refund + split.doctor_payout, 105);
    }

    #[test]
    fn tiny_prices_round_entirely_to_the_patient() {
        let split = confirmed_cancellation_split(1);
        assert_eq!(split.doctor_payout, 0);
        assert_eq!(split.patient_refund, 1);
    }

    #[test]
    fn split_always_sums_to_price() {
        for price in [0, 1, 7, 99, 100, 101, 33333, 100001] {
            let split = confirmed_cancellation_split(price);
            assert_eq!(split.patient_refund + split.doctor_payout, price);
        }
    }

    #[test]
    fn refund_and_payout_cover_the_full_price() {
        assert_eq!(full_refund(5000).patient_refund, 5000);
        assert_eq!(full_refund(5000).doctor_payout, 0);
        assert_eq!(full_payout(5000).doctor_payout, 5000);
        assert_eq!(full_payout(5000).patient_refund, 0);
    }
}
