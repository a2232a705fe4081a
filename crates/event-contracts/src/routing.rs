//! Maps `(aggregate_type, event_type)` to a fixed topic, and carries the
//! per-topic retention/consumer tuning the stream log needs.
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Orders,
    Users,
    Products,
    Notifications,
    Payments,
    Inventory,
}

impl Topic {
    pub fn name(&self) -> &'static str {
        match self {
            Topic::Orders => "orders",
            Topic::Users => "users",
            Topic::Products => "products",
            Topic::Notifications => "notifications",
            Topic::Payments => "payments",
            Topic::Inventory => "inventory",
        }
    }

    pub fn all() -> [Topic; 6] {
        [
            Topic::Orders,
            Topic::Users,
            Topic::Products,
            Topic::Notifications,
            Topic::Payments,
            Topic::Inventory,
        ]
    }

    /// The `event` kind a consumer of this topic may check incoming
    /// messages against, if the topic carries only one. `Orders` is the
    /// only topic with a dedicated typed contract (`order_status`); every
    /// other topic carries a mix of generic event types by design (see
    /// `EventBody::Generic`), so there is no single kind to validate
    /// against and this returns `None`.
    pub fn expected_event_kind(&self) -> Option<&'static str> {
        match self {
            Topic::Orders => Some("order_status"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TopicConfig {
    pub max_len: usize,
    pub consumer_group: String,
    pub batch_count: usize,
    pub block: Duration,
}

/// Recognized topics, with the defaults from the configuration table.
pub fn default_topic_config(topic: Topic) -> TopicConfig {
    match topic {
        Topic::Orders => TopicConfig {
            max_len: 50_000,
            consumer_group: "order_processors".to_string(),
            batch_count: 20,
            block: Duration::from_millis(1_000),
        },
        Topic::Users => TopicConfig {
            max_len: 20_000,
            consumer_group: "user_processors".to_string(),
            batch_count: 10,
            block: Duration::from_millis(1_000),
        },
        Topic::Products => TopicConfig {
            max_len: 30_000,
            consumer_group: "product_processors".to_string(),
            batch_count: 15,
            block: Duration::from_millis(2_000),
        },
        Topic::Notifications => TopicConfig {
            max_len: 100_000,
            consumer_group: "notification_processors".to_string(),
            batch_count: 50,
            block: Duration::from_millis(3_000),
        },
        Topic::Payments => TopicConfig {
            max_len: 30_000,
            consumer_group: "payment_processors".to_string(),
            batch_count: 10,
            block: Duration::from_millis(2_000),
        },
        Topic::Inventory => TopicConfig {
            max_len: 25_000,
            consumer_group: "inventory_processors".to_string(),
            batch_count: 15,
            block: Duration::from_millis(2_000),
        },
    }
}

/// `topic_for(aggregate_type, event_type) -> topic`
///
/// Primary key is `aggregate_type` (case-insensitive); `event_type` is
/// consulted only when the aggregate type doesn't match a known bucket.
/// Unrecognized input defaults to `orders` — preserved deployment behavior,
/// not a semantic guarantee; see the alternative raise-instead-of-default
/// policy knob discussed in the design notes.
pub fn topic_for(aggregate_type: &str, event_type: &str) -> Topic {
    let aggregate_lower = aggregate_type.to_lowercase();
    let event_lower = event_type.to_lowercase();

    match aggregate_lower.as_str() {
        "order" => return Topic::Orders,
        "user" => return Topic::Users,
        "product" => return Topic::Products,
        "notification" | "email" | "sms" => return Topic::Notifications,
        "payment" | "transaction" | "billing" => return Topic::Payments,
        "inventory" | "stock" | "warehouse" => return Topic::Inventory,
        _ => {}
    }

    let keyword_matches = |keywords: &[&str]| keywords.iter().any(|k| event_lower.contains(k));

    if keyword_matches(&["order", "purchase", "checkout"]) {
        Topic::Orders
    } else if keyword_matches(&["user", "account", "profile"]) {
        Topic::Users
    } else if keyword_matches(&["product", "catalog", "item"]) {
        Topic::Products
    } else if keyword_matches(&["notification", "alert", "message"]) {
        Topic::Notifications
    } else if keyword_matches(&["payment", "charge", "refund"]) {
        Topic::Payments
    } else if keyword_matches(&["inventory", "stock", "quantity"]) {
        Topic::Inventory
    } else {
        Topic::Orders
    }
}

/// All topic configs keyed by name, for building the stream log at startup.
pub fn all_topic_configs() -> HashMap<&'static str, TopicConfig> {
    Topic::all()
        .into_iter()
        .map(|t| (t.name(), default_topic_config(t)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_by_aggregate_type_case_insensitively() {
        assert_eq!(topic_for("ORDER", "anything").name(), "orders");
        assert_eq!(topic_for("User", "anything").name(), "users");
        assert_eq!(topic_for("product", "anything").name(), "products");
    }

    #[test]
    fn notification_aliases_all_route_to_notifications() {
        for alias in ["notification", "email", "sms"] {
            assert_eq!(topic_for(alias, "x").name(), "notifications");
        }
    }

    #[test]
    fn payment_aliases_all_route_to_payments() {
        for alias in ["payment", "transaction", "billing"] {
            assert_eq!(topic_for(alias, "x").name(), "payments");
        }
    }

    #[test]
    fn falls_back_to_event_type_keywords_when_aggregate_unknown() {
        assert_eq!(topic_for("widget", "order_created"), Topic::Orders);
        assert_eq!(topic_for("widget", "account_profile_changed"), Topic::Users);
        assert_eq!(topic_for("widget", "stock_adjustment"), Topic::Inventory);
    }

    #[test]
    fn unrecognized_input_defaults_to_orders() {
        assert_eq!(topic_for("widget", "unrelated_event"), Topic::Orders);
    }

    #[test]
    fn topic_configs_match_the_retention_table() {
        let configs = all_topic_configs();
        assert_eq!(configs["orders"].max_len, 50_000);
        assert_eq!(configs["notifications"].max_len, 100_000);
        assert_eq!(configs["inventory"].max_len, 25_000);
    }

    #[test]
    fn only_orders_has_a_single_expected_event_kind() {
        assert_eq!(Topic::Orders.expected_event_kind(), Some("order_status"));
        for topic in [
            Topic::Users,
            Topic::Products,
            Topic::Notifications,
            Topic::Payments,
            Topic::Inventory,
        ] {
            assert_eq!(topic.expected_event_kind(), None);
        }
    }
}
