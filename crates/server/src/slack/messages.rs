//! Slack message builders for return lifecycle events.

use returns_core::{Money, OrderId, ResolutionType, ReturnNumber, ReturnStatus};

use super::types::{Block, ContextElement, PlainText, Text};

/// Longest change reason quoted in a message.
const MAX_REASON_CHARS: usize = 500;

/// Build the message announcing a new return request.
#[must_use]
pub fn build_return_created_message(
    return_number: &ReturnNumber,
    order_id: OrderId,
    status: ReturnStatus,
    resolution: ResolutionType,
    net_refund_amount: Money,
) -> Vec<Block> {
    let review = if status == ReturnStatus::Requested {
        "Awaiting review"
    } else {
        "Auto-approved"
    };

    vec![
        Block::Header {
            text: PlainText::new(format!("{} Return requested", status_emoji(status))),
        },
        Block::Section {
            text: Text::mrkdwn(format!("*{return_number}* for order #{order_id}")),
            fields: vec![
                Text::mrkdwn(format!("*Resolution:*\n{}", resolution_label(resolution))),
                Text::mrkdwn(format!("*Net refund:*\n{net_refund_amount}")),
            ],
        },
        Block::Context {
            elements: vec![ContextElement::Mrkdwn {
                text: review.to_string(),
            }],
        },
    ]
}

/// Build the message for a status transition.
#[must_use]
pub fn build_status_changed_message(
    return_number: &ReturnNumber,
    from: ReturnStatus,
    to: ReturnStatus,
    resolution: ResolutionType,
    change_reason: Option<&str>,
) -> Vec<Block> {
    let mut blocks = vec![
        Block::Header {
            text: PlainText::new(format!("{} Return {}", status_emoji(to), status_label(to))),
        },
        Block::Section {
            text: Text::mrkdwn(format!(
                "*{return_number}*: `{from}` → `{to}` ({})",
                resolution_label(resolution)
            )),
            fields: Vec::new(),
        },
    ];

    if let Some(reason) = change_reason.map(str::trim).filter(|r| !r.is_empty()) {
        blocks.push(Block::Divider);
        blocks.push(Block::Context {
            elements: vec![ContextElement::Mrkdwn {
                text: format!("> {}", truncate(reason, MAX_REASON_CHARS)),
            }],
        });
    }

    blocks
}

/// Get an emoji for a return status.
const fn status_emoji(status: ReturnStatus) -> &'static str {
    match status {
        ReturnStatus::Requested => "📨",
        ReturnStatus::Approved => "✅",
        ReturnStatus::Rejected => "❌",
        ReturnStatus::PickupScheduled => "📅",
        ReturnStatus::InTransit => "🚚",
        ReturnStatus::Received => "📦",
        ReturnStatus::Inspected => "🔍",
        ReturnStatus::Completed => "💰",
        ReturnStatus::Cancelled => "🚫",
        ReturnStatus::Disputed => "⚠️",
    }
}

const fn status_label(status: ReturnStatus) -> &'static str {
    match status {
        ReturnStatus::Requested => "requested",
        ReturnStatus::Approved => "approved",
        ReturnStatus::Rejected => "rejected",
        ReturnStatus::PickupScheduled => "pickup scheduled",
        ReturnStatus::InTransit => "in transit",
        ReturnStatus::Received => "received",
        ReturnStatus::Inspected => "inspected",
        ReturnStatus::Completed => "completed",
        ReturnStatus::Cancelled => "cancelled",
        ReturnStatus::Disputed => "disputed",
    }
}

const fn resolution_label(resolution: ResolutionType) -> &'static str {
    match resolution {
        ResolutionType::Refund => "Refund",
        ResolutionType::Exchange => "Exchange",
        ResolutionType::StoreCredit => "Store credit",
    }
}

/// Truncate on a character boundary (Slack has limits).
fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}
