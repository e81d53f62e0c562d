//! Typed return policy settings.

use serde::{Deserialize, Serialize};

use returns_core::{Money, ResolutionType};

/// Process-wide return policy. Stored as a single row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReturnSettings {
    /// Master switch for new returns and approvals.
    pub returns_enabled: bool,
    /// Days after delivery during which a return may be requested.
    pub return_window_days: i32,
    /// Upper bound on photos attached to one return.
    pub max_photos_per_return: i32,
    /// Whether refunds may be requested.
    pub allow_refund: bool,
    /// Whether exchanges may be requested.
    pub allow_exchange: bool,
    /// Whether store credit may be requested.
    pub allow_store_credit: bool,
    /// Approve new returns inside the creating transaction.
    pub auto_approve_returns: bool,
    /// Require photos on every return regardless of reason.
    pub require_return_photos: bool,
    /// Customer-facing policy text.
    pub policy_text: String,
    /// Shipping cost used when a creation call does not provide one.
    pub default_return_shipping_cost: Money,
}

impl Default for ReturnSettings {
    fn default() -> Self {
        Self {
            returns_enabled: true,
            return_window_days: 7,
            max_photos_per_return: 5,
            allow_refund: true,
            allow_exchange: true,
            allow_store_credit: true,
            auto_approve_returns: false,
            require_return_photos: false,
            policy_text: String::new(),
            default_return_shipping_cost: Money::ZERO,
        }
    }
}

impl ReturnSettings {
    /// Whether the policy allows the given resolution.
    #[must_use]
    pub const fn allows(&self, resolution: ResolutionType) -> bool {
        match resolution {
            ResolutionType::Refund => self.allow_refund,
            ResolutionType::Exchange => self.allow_exchange,
            ResolutionType::StoreCredit => self.allow_store_credit,
        }
    }

    /// Whether any resolution is allowed at all.
    #[must_use]
    pub const fn any_resolution_allowed(&self) -> bool {
        self.allow_refund || self.allow_exchange || self.allow_store_credit
    }

    /// Check field ranges.
    ///
    /// # Errors
    ///
    /// Returns every violated constraint, one message per field.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        if self.return_window_days < 0 {
            problems.push(format!(
                "return_window_days must be >= 0 (got {})",
                self.return_window_days
            ));
        }
        if self.max_photos_per_return < 1 {
            problems.push(format!(
                "max_photos_per_return must be >= 1 (got {})",
                self.max_photos_per_return
            ));
        }
        if !self.default_return_shipping_cost.is_storable() {
            problems.push(format!(
                "default_return_shipping_cost must be whole cents between 0 and {} (got {})",
                Money::MAX,
                self.default_return_shipping_cost.amount()
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ReturnSettings::default().validate().is_ok());
    }

    #[test]
    fn test_validate_collects_all_problems() {
        let settings = ReturnSettings {
            return_window_days: -1,
            max_photos_per_return: 0,
            default_return_shipping_cost: Money::from_cents(-100),
            ..ReturnSettings::default()
        };
        let problems = settings.validate().unwrap_err();
        assert_eq!(problems.len(), 3);
    }

    #[test]
    fn test_validate_rejects_fractional_cents() {
        let settings = ReturnSettings {
            default_return_shipping_cost: Money::new(rust_decimal::Decimal::new(5, 3)),
            ..ReturnSettings::default()
        };
        let problems = settings.validate().unwrap_err();
        assert_eq!(problems.len(), 1);
        assert!(problems.iter().all(|p| p.starts_with("default_return_shipping_cost")));
    }

    #[test]
    fn test_allows_resolution() {
        let settings = ReturnSettings {
            allow_exchange: false,
            ..ReturnSettings::default()
        };
        assert!(settings.allows(ResolutionType::Refund));
        assert!(!settings.allows(ResolutionType::Exchange));
        assert!(settings.any_resolution_allowed());

        let closed = ReturnSettings {
            allow_refund: false,
            allow_exchange: false,
            allow_store_credit: false,
            ..ReturnSettings::default()
        };
        assert!(!closed.any_resolution_allowed());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let settings: ReturnSettings =
            serde_json::from_str(r#"{"return_window_days": 30, "auto_approve_returns": true}"#)
                .unwrap();
        assert_eq!(settings.return_window_days, 30);
        assert!(settings.auto_approve_returns);
        assert!(settings.returns_enabled);
        assert_eq!(settings.max_photos_per_return, 5);
    }
}
