//! Status enums for return requests and the orders they reference.
//!
//! [`ReturnStatus`] owns the lifecycle transition table. Every caller (HTTP
//! handlers, CLI, the lifecycle engine) asks the status itself whether a move
//! is legal instead of re-deriving the rules.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a return request.
///
/// ```text
/// requested -> approved | rejected
/// approved -> pickup_scheduled | in_transit | received
/// pickup_scheduled -> in_transit | received
/// in_transit -> received
/// received -> inspected | completed
/// inspected -> completed
///
/// any non-terminal -> cancelled | disputed
/// disputed -> approved | completed | cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "returns.return_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    /// Submitted, awaiting merchant review.
    Requested,
    /// Accepted by the merchant (or auto-approved).
    Approved,
    /// Declined by the merchant. Terminal.
    Rejected,
    /// Carrier pickup booked.
    PickupScheduled,
    /// Parcel travelling back to the merchant.
    InTransit,
    /// Goods arrived at the merchant.
    Received,
    /// Goods checked by the merchant.
    Inspected,
    /// Settlement done. Terminal.
    Completed,
    /// Abandoned by customer or merchant. Terminal.
    Cancelled,
    /// Escalated disagreement awaiting a merchant decision.
    Disputed,
}

impl ReturnStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 10] = [
        Self::Requested,
        Self::Approved,
        Self::Rejected,
        Self::PickupScheduled,
        Self::InTransit,
        Self::Received,
        Self::Inspected,
        Self::Completed,
        Self::Cancelled,
        Self::Disputed,
    ];

    /// Statuses reachable in one step from `self`.
    #[must_use]
    pub const fn allowed_targets(self) -> &'static [Self] {
        match self {
            Self::Requested => &[
                Self::Approved,
                Self::Rejected,
                Self::Cancelled,
                Self::Disputed,
            ],
            Self::Approved => &[
                Self::PickupScheduled,
                Self::InTransit,
                Self::Received,
                Self::Cancelled,
                Self::Disputed,
            ],
            Self::PickupScheduled => &[
                Self::InTransit,
                Self::Received,
                Self::Cancelled,
                Self::Disputed,
            ],
            Self::InTransit => &[Self::Received, Self::Cancelled, Self::Disputed],
            Self::Received => &[
                Self::Inspected,
                Self::Completed,
                Self::Cancelled,
                Self::Disputed,
            ],
            Self::Inspected => &[Self::Completed, Self::Cancelled, Self::Disputed],
            Self::Disputed => &[Self::Approved, Self::Completed, Self::Cancelled],
            Self::Completed | Self::Rejected | Self::Cancelled => &[],
        }
    }

    /// Whether `target` is a permitted direct edge from `self`.
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Terminal statuses accept no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Cancelled)
    }

    /// Whether items in a return with this status still count against the
    /// ordered quantity of their order lines.
    #[must_use]
    pub const fn claims_quantity(self) -> bool {
        !matches!(self, Self::Rejected | Self::Cancelled)
    }

    /// Snake-case name, as stored and serialized.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::PickupScheduled => "pickup_scheduled",
            Self::InTransit => "in_transit",
            Self::Received => "received",
            Self::Inspected => "inspected",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Disputed => "disputed",
        }
    }
}

impl std::fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReturnStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("invalid return status: {s}"))
    }
}

/// Who is responsible for the return, as configured on the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "returns.fault_type", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum FaultType {
    /// Damaged, wrong or defective goods.
    MerchantFault,
    /// Changed mind, wrong size ordered, etc.
    CustomerFault,
}

impl FaultType {
    /// The party that bears return shipping for this fault.
    #[must_use]
    pub const fn shipping_payer(self) -> ShippingPayer {
        match self {
            Self::MerchantFault => ShippingPayer::Merchant,
            Self::CustomerFault => ShippingPayer::Customer,
        }
    }
}

impl std::fmt::Display for FaultType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MerchantFault => write!(f, "merchant_fault"),
            Self::CustomerFault => write!(f, "customer_fault"),
        }
    }
}

impl std::str::FromStr for FaultType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "merchant_fault" => Ok(Self::MerchantFault),
            "customer_fault" => Ok(Self::CustomerFault),
            _ => Err(format!("invalid fault type: {s}")),
        }
    }
}

/// The remedy the customer receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "returns.resolution_type", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionType {
    Refund,
    Exchange,
    StoreCredit,
}

impl std::fmt::Display for ResolutionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Refund => write!(f, "refund"),
            Self::Exchange => write!(f, "exchange"),
            Self::StoreCredit => write!(f, "store_credit"),
        }
    }
}

impl std::str::FromStr for ResolutionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "refund" => Ok(Self::Refund),
            "exchange" => Ok(Self::Exchange),
            "store_credit" => Ok(Self::StoreCredit),
            _ => Err(format!("invalid resolution type: {s}")),
        }
    }
}

/// Party paying for the return shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "returns.shipping_payer", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ShippingPayer {
    Merchant,
    Customer,
}

impl std::fmt::Display for ShippingPayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Merchant => write!(f, "merchant"),
            Self::Customer => write!(f, "customer"),
        }
    }
}

/// Storefront order status, as read from the order store.
///
/// Only `Delivered` orders are eligible for returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Processing => write!(f, "processing"),
            Self::Shipped => write!(f, "shipped"),
            Self::Delivered => write!(f, "delivered"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid order status: {s}")),
        }
    }
}
