//! Exchange names, routing keys, and AMQP-style topic matching.

/// Service-scoped domain event fan-out.
pub const DOMAIN_EVENTS_EXCHANGE: &str = "domain-events";

/// Saga lifecycle events plus the `command.*`/`reply.*` exchange between the
/// orchestrator and the downstream services.
pub const SAGA_EXCHANGE: &str = "saga-events";

/// Exchange receiving poison messages.
pub const DEAD_LETTER_EXCHANGE: &str = "dead-letter";

/// Durable queue bound to the dead-letter exchange.
pub const DEAD_LETTER_QUEUE: &str = "dead-letter";

/// The orchestrator's reply queue, bound to `reply.#`.
pub const SAGA_REPLY_QUEUE: &str = "saga-replies";

/// Command queue consumed by the stock service.
pub const STOCK_COMMAND_QUEUE: &str = "stock-commands";

/// Command queue consumed by the payment service.
pub const PAYMENT_COMMAND_QUEUE: &str = "payment-commands";

/// Command queue consumed by the order service.
pub const ORDER_COMMAND_QUEUE: &str = "order-commands";

pub const CMD_VERIFY_STOCK: &str = "command.verify-stock";
pub const CMD_RESERVE_STOCK: &str = "command.reserve-stock";
pub const CMD_PROCESS_PAYMENT: &str = "command.process-payment";
pub const CMD_CONFIRM_ORDER: &str = "command.confirm-order";
pub const CMD_RELEASE_STOCK: &str = "command.release-stock";
pub const CMD_REFUND_PAYMENT: &str = "command.refund-payment";

pub const REPLY_VERIFY_STOCK: &str = "reply.verify-stock";
pub const REPLY_RESERVE_STOCK: &str = "reply.reserve-stock";
pub const REPLY_PROCESS_PAYMENT: &str = "reply.process-payment";
pub const REPLY_CONFIRM_ORDER: &str = "reply.confirm-order";
pub const REPLY_RELEASE_STOCK: &str = "reply.release-stock";
pub const REPLY_REFUND_PAYMENT: &str = "reply.refund-payment";

/// Binding pattern for every reply key.
pub const REPLY_PATTERN: &str = "reply.#";

pub const EVT_SAGA_STARTED: &str = "saga.started";
pub const EVT_SAGA_COMPENSATING: &str = "saga.compensating";
pub const EVT_SALE_CONFIRMED: &str = "saga.sale-confirmed";
pub const EVT_SAGA_COMPENSATED: &str = "saga.compensated";
pub const EVT_SAGA_FAILED: &str = "saga.failed";

/// Returns true if a routing key matches an AMQP-style topic pattern.
///
/// `*` matches exactly one dot-separated word; `#` matches zero or more.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &key)
}
