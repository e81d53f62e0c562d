//! Return reason catalog models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use returns_core::{FaultType, ReturnReasonId};

/// A merchant-configured reason a customer can pick when requesting a return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnReason {
    /// Unique reason ID.
    pub id: ReturnReasonId,
    /// Display text.
    pub label: String,
    /// Who is responsible; decides who pays return shipping.
    pub fault_type: FaultType,
    /// Whether photo evidence must accompany a return with this reason.
    pub requires_photos: bool,
    /// Disabled reasons stay referenced by old returns but are not offered.
    pub is_active: bool,
    /// Display order, ascending.
    pub position: i32,
    /// When the reason was created.
    pub created_at: DateTime<Utc>,
    /// When the reason was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Input for creating or replacing a reason.
#[derive(Debug, Clone, Deserialize)]
pub struct ReasonInput {
    /// Display text.
    pub label: String,
    /// Fault attribution.
    pub fault_type: FaultType,
    /// Whether photos are required.
    #[serde(default)]
    pub requires_photos: bool,
    /// Whether the reason is offered to customers.
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Display order.
    #[serde(default)]
    pub position: i32,
}

const fn default_active() -> bool {
    true
}

impl ReasonInput {
    /// Trimmed label, or `None` if it is blank.
    #[must_use]
    pub fn normalized_label(&self) -> Option<&str> {
        let label = self.label.trim();
        (!label.is_empty()).then_some(label)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_input_defaults() {
        let input: ReasonInput =
            serde_json::from_str(r#"{"label": "Damaged", "fault_type": "merchant_fault"}"#)
                .unwrap();
        assert!(input.is_active);
        assert!(!input.requires_photos);
        assert_eq!(input.position, 0);
    }

    #[test]
    fn test_normalized_label() {
        let mut input: ReasonInput =
            serde_json::from_str(r#"{"label": "  Wrong size ", "fault_type": "customer_fault"}"#)
                .unwrap();
        assert_eq!(input.normalized_label(), Some("Wrong size"));
        input.label = "   ".to_string();
        assert_eq!(input.normalized_label(), None);
    }
}
