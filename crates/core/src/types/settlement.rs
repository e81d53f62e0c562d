//! Financial outcome of a return.
//!
//! A settlement is computed exactly once, when the return is created, from the
//! unit prices frozen on the return items. Later price changes in the catalog
//! never flow back into an existing return.

use serde::{Deserialize, Serialize};

use super::money::Money;
use super::status::{FaultType, ShippingPayer};

/// One returned order line, as far as money is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementLine {
    /// Unit price snapshotted from the order item.
    pub unit_price: Money,
    /// Units being returned.
    pub quantity: i32,
}

impl SettlementLine {
    /// `unit_price × quantity`.
    #[must_use]
    pub fn total(&self) -> Money {
        self.unit_price.times(self.quantity)
    }
}

/// Amounts owed on a return request.
///
/// ## Invariant
///
/// `net_refund_amount = max(0, total_refund_amount - shipping charged to the customer)`,
/// where the customer is charged `return_shipping_cost` only when
/// `shipping_paid_by` is [`ShippingPayer::Customer`].
///
/// ## Examples
///
/// ```
/// use returns_core::{FaultType, Money, Settlement, SettlementLine, ShippingPayer};
///
/// let line = SettlementLine { unit_price: Money::from_cents(100_000), quantity: 2 };
/// let settlement = Settlement::compute([line], Money::from_cents(5_000), FaultType::CustomerFault);
///
/// assert_eq!(settlement.total_refund_amount, Money::from_cents(200_000));
/// assert_eq!(settlement.shipping_paid_by, ShippingPayer::Customer);
/// assert_eq!(settlement.net_refund_amount, Money::from_cents(195_000));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Sum of all item totals.
    pub total_refund_amount: Money,
    /// Cost of moving the goods back.
    pub return_shipping_cost: Money,
    /// Who bears `return_shipping_cost`.
    pub shipping_paid_by: ShippingPayer,
    /// What is actually owed to the customer.
    pub net_refund_amount: Money,
}

impl Settlement {
    /// Compute the settlement for a set of returned lines.
    ///
    /// The shipping payer follows the fault attribution of the return reason.
    #[must_use]
    pub fn compute(
        lines: impl IntoIterator<Item = SettlementLine>,
        return_shipping_cost: Money,
        fault: FaultType,
    ) -> Self {
        let total_refund_amount: Money = lines.into_iter().map(|line| line.total()).sum();
        let shipping_paid_by = fault.shipping_payer();

        Self {
            total_refund_amount,
            return_shipping_cost,
            shipping_paid_by,
            net_refund_amount: Self::net_amount(
                total_refund_amount,
                return_shipping_cost,
                shipping_paid_by,
            ),
        }
    }

    /// Net amount owed for the given totals.
    #[must_use]
    pub fn net_amount(total: Money, shipping_cost: Money, payer: ShippingPayer) -> Money {
        match payer {
            ShippingPayer::Customer => total.clamped_sub(shipping_cost),
            ShippingPayer::Merchant => total,
        }
    }

    /// Whether the stored amounts satisfy the net refund invariant.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.net_refund_amount
            == Self::net_amount(
                self.total_refund_amount,
                self.return_shipping_cost,
                self.shipping_paid_by,
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(cents: i64, quantity: i32) -> SettlementLine {
        SettlementLine {
            unit_price: Money::from_cents(cents),
            quantity,
        }
    }

    #[test]
    fn test_customer_fault_deducts_shipping() {
        let settlement = Settlement::compute(
            [line(100_000, 2)],
            Money::from_cents(5_000),
            FaultType::CustomerFault,
        );
        assert_eq!(settlement.total_refund_amount, Money::from_cents(200_000));
        assert_eq!(settlement.shipping_paid_by, ShippingPayer::Customer);
        assert_eq!(settlement.net_refund_amount, Money::from_cents(195_000));
        assert!(settlement.is_consistent());
    }

    #[test]
    fn test_merchant_fault_keeps_full_amount() {
        let settlement = Settlement::compute(
            [line(100_000, 2)],
            Money::from_cents(5_000),
            FaultType::MerchantFault,
        );
        assert_eq!(settlement.shipping_paid_by, ShippingPayer::Merchant);
        assert_eq!(settlement.net_refund_amount, Money::from_cents(200_000));
        assert!(settlement.is_consistent());
    }

    #[test]
    fn test_net_clamped_at_zero() {
        let settlement = Settlement::compute(
            [line(300, 1)],
            Money::from_cents(1_000),
            FaultType::CustomerFault,
        );
        assert_eq!(settlement.net_refund_amount, Money::ZERO);
        assert!(settlement.is_consistent());
    }

    #[test]
    fn test_multiple_lines_are_summed() {
        let settlement = Settlement::compute(
            [line(1_999, 3), line(4_500, 1)],
            Money::ZERO,
            FaultType::CustomerFault,
        );
        assert_eq!(settlement.total_refund_amount, Money::from_cents(10_497));
        assert_eq!(settlement.net_refund_amount, Money::from_cents(10_497));
    }

    #[test]
    fn test_tampered_settlement_is_inconsistent() {
        let mut settlement = Settlement::compute(
            [line(100_000, 1)],
            Money::from_cents(5_000),
            FaultType::CustomerFault,
        );
        settlement.net_refund_amount = settlement.total_refund_amount;
        assert!(!settlement.is_consistent());
    }
}
