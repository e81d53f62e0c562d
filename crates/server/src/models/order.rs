//! Read-only views of storefront orders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use returns_core::{Money, OrderId, OrderItemId, OrderStatus, ProductId, VariantId};

/// An order as far as returns are concerned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Order ID.
    pub id: OrderId,
    /// Fulfillment status.
    pub status: OrderStatus,
    /// When the order was delivered, if it has been.
    pub delivered_at: Option<DateTime<Utc>>,
    /// Customer name at the time of the order.
    pub customer_name: String,
    /// Customer phone at the time of the order.
    pub customer_phone: Option<String>,
}

/// A line of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    /// Order line ID.
    pub id: OrderItemId,
    /// Owning order.
    pub order_id: OrderId,
    /// Product bought.
    pub product_id: ProductId,
    /// Variant bought, if the product has variants.
    pub variant_id: Option<VariantId>,
    /// Product name.
    pub product_name: String,
    /// Variant label (e.g. "Large / Blue").
    pub variant_label: Option<String>,
    /// Units bought.
    pub quantity: i32,
    /// Price paid per unit.
    pub unit_price: Money,
}
