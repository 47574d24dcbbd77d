//! Event-to-notification transform (spec §4.5). Pure functions, no I/O:
//! `transform` takes a decoded domain event and produces zero, one, or two
//! notification templates (admin and/or customer audience).

use crate::model::{NewNotification, Priority};

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    pub event_type: String,
    pub tenant_id: String,
    #[serde(default)]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
    pub source_id: String,
    #[serde(flatten)]
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Broadcast to every connected admin, or the broadcast sentinel if none.
    Admin,
    /// A specific customer, resolved from the payload's customer id.
    Customer,
}

#[derive(Debug, Clone)]
pub struct Template {
    pub audience: Audience,
    pub r#type: String,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
}

fn str_field<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| payload.get(k)).and_then(Value::as_str)
}

fn customer_id(payload: &Value) -> Option<Uuid> {
    str_field(payload, &["customer_id", "customerId"]).and_then(|s| Uuid::parse_str(s).ok())
}

/// `$12.34`-style formatting from integer minor units, pure lookup-free
/// arithmetic (spec §4.5 "Currency and status formatting").
pub fn format_amount(minor_units: i64, currency: &str) -> String {
    let symbol = match currency {
        "USD" => "$",
        "EUR" => "€",
        "GBP" => "£",
        _ => "",
    };
    format!("{symbol}{:.2}{}", minor_units as f64 / 100.0, if symbol.is_empty() { format!(" {currency}") } else { String::new() })
}

fn amount_field(payload: &Value) -> Option<(i64, String)> {
    let minor = payload.get("amount").and_then(Value::as_i64)?;
    let currency = str_field(payload, &["currency"]).unwrap_or("USD").to_string();
    Some((minor, currency))
}

/// One entry per type named in spec.md §6's event-stream subjects list.
pub fn transform(event: &EventEnvelope) -> Vec<Template> {
    let order_ref = str_field(&event.payload, &["order_id", "orderId"])
        .unwrap_or(&event.source_id)
        .to_string();
    let sku = str_field(&event.payload, &["sku"]).map(str::to_string);

    match event.event_type.as_str() {
        "order.created" => {
            let amount = amount_field(&event.payload)
                .map(|(minor, cur)| format_amount(minor, &cur))
                .unwrap_or_else(|| "an unknown amount".to_string());
            vec![
                Template {
                    audience: Audience::Admin,
                    r#type: event.event_type.clone(),
                    title: "New order".to_string(),
                    message: format!("Order {order_ref} placed for {amount}"),
                    priority: Priority::High,
                    entity_type: Some("order".to_string()),
                    entity_id: Some(order_ref.clone()),
                },
                Template {
                    audience: Audience::Customer,
                    r#type: event.event_type.clone(),
                    title: "Order confirmed".to_string(),
                    message: format!("We received your order {order_ref} for {amount}"),
                    priority: Priority::Normal,
                    entity_type: Some("order".to_string()),
                    entity_id: Some(order_ref),
                },
            ]
        }
        "order.status_changed" => {
            let status = str_field(&event.payload, &["status"]).unwrap_or("updated");
            single(
                Audience::Customer,
                event,
                "Order status updated",
                format!("Order {order_ref} is now {status}"),
                Priority::Normal,
                "order",
                order_ref,
            )
        }
        "order.cancelled" => single(
            Audience::Customer,
            event,
            "Order cancelled",
            format!("Order {order_ref} was cancelled"),
            Priority::Normal,
            "order",
            order_ref,
        ),
        "order.shipped" => single(
            Audience::Customer,
            event,
            "Order shipped",
            format!("Order {order_ref} is on its way"),
            Priority::Normal,
            "order",
            order_ref,
        ),
        "order.delivered" => single(
            Audience::Customer,
            event,
            "Order delivered",
            format!("Order {order_ref} was delivered"),
            Priority::Normal,
            "order",
            order_ref,
        ),
        "payment.captured" => {
            let amount = amount_field(&event.payload)
                .map(|(minor, cur)| format_amount(minor, &cur))
                .unwrap_or_else(|| "an unknown amount".to_string());
            single(
                Audience::Admin,
                event,
                "Payment captured",
                format!("Payment of {amount} captured for order {order_ref}"),
                Priority::Normal,
                "order",
                order_ref,
            )
        }
        "payment.failed" => single(
            Audience::Admin,
            event,
            "Payment failed",
            format!("Payment failed for order {order_ref}"),
            Priority::Urgent,
            "order",
            order_ref,
        ),
        "payment.refunded" => single(
            Audience::Customer,
            event,
            "Refund issued",
            format!("A refund was issued for order {order_ref}"),
            Priority::Normal,
            "order",
            order_ref,
        ),
        "inventory.low_stock" => single(
            Audience::Admin,
            event,
            "Low stock",
            format!("SKU {} is running low", sku.as_deref().unwrap_or("unknown")),
            Priority::Normal,
            "sku",
            sku.unwrap_or_default(),
        ),
        "inventory.out_of_stock" => single(
            Audience::Admin,
            event,
            "Out of stock",
            format!("SKU {} is out of stock", sku.as_deref().unwrap_or("unknown")),
            Priority::High,
            "sku",
            sku.unwrap_or_default(),
        ),
        "customer.registered" => single(
            Audience::Admin,
            event,
            "New customer",
            "A new customer registered".to_string(),
            Priority::Low,
            "customer",
            event.source_id.clone(),
        ),
        "return.requested" => single(
            Audience::Admin,
            event,
            "Return requested",
            format!("A return was requested for order {order_ref}"),
            Priority::Normal,
            "order",
            order_ref,
        ),
        "return.approved" => single(
            Audience::Customer,
            event,
            "Return approved",
            format!("Your return for order {order_ref} was approved"),
            Priority::Normal,
            "order",
            order_ref,
        ),
        "return.rejected" => single(
            Audience::Customer,
            event,
            "Return rejected",
            format!("Your return for order {order_ref} was rejected"),
            Priority::Normal,
            "order",
            order_ref,
        ),
        "review.submitted" => single(
            Audience::Admin,
            event,
            "Review submitted",
            "A new product review was submitted".to_string(),
            Priority::Normal,
            "review",
            event.source_id.clone(),
        ),
        "review.approved" => single(
            Audience::Customer,
            event,
            "Review published",
            "Your review was published".to_string(),
            Priority::Low,
            "review",
            event.source_id.clone(),
        ),
        _ => Vec::new(),
    }
}

#[allow(clippy::too_many_arguments)]
fn single(
    audience: Audience,
    event: &EventEnvelope,
    title: &str,
    message: String,
    priority: Priority,
    entity_type: &str,
    entity_id: String,
) -> Vec<Template> {
    vec![Template {
        audience,
        r#type: event.event_type.clone(),
        title: title.to_string(),
        message,
        priority,
        entity_type: Some(entity_type.to_string()),
        entity_id: Some(entity_id),
    }]
}

/// Resolve a [`Template`] plus its audience-specific target(s) into the
/// concrete rows to persist. `admin_targets` is the resolver's connected-user
/// set; an empty set degrades to one broadcast-sentinel row.
pub fn materialize(
    template: &Template,
    event: &EventEnvelope,
    admin_targets: &[Uuid],
) -> Vec<NewNotification> {
    let base_id = match template.audience {
        Audience::Customer => NewNotification::customer_dedup_key(&event.source_id),
        Audience::Admin => event.source_id.clone(),
    };

    let new = |user_id: Uuid, source_event_id: String| NewNotification {
        tenant_id: event.tenant_id.clone(),
        user_id,
        r#type: template.r#type.clone(),
        title: template.title.clone(),
        message: template.message.clone(),
        source_service: "event-bridge".to_string(),
        source_event_id,
        entity_type: template.entity_type.clone(),
        entity_id: template.entity_id.clone(),
        metadata: event.payload.clone(),
        group_key: None,
        priority: template.priority,
    };

    match template.audience {
        Audience::Customer => match customer_id(&event.payload) {
            Some(user_id) => vec![new(user_id, base_id)],
            None => Vec::new(),
        },
        Audience::Admin if admin_targets.is_empty() => {
            vec![new(crate::model::BROADCAST_USER, base_id)]
        }
        Audience::Admin => admin_targets
            .iter()
            .map(|user_id| new(*user_id, format!("{base_id}-{user_id}")))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(event_type: &str, payload: Value) -> EventEnvelope {
        EventEnvelope {
            event_type: event_type.to_string(),
            tenant_id: "t1".to_string(),
            timestamp: None,
            source_id: "e1".to_string(),
            payload,
        }
    }

    #[test]
    fn order_created_produces_admin_and_customer_templates() {
        let event = envelope(
            "order.created",
            serde_json::json!({"order_id": "o1", "amount": 1234, "currency": "USD", "customer_id": Uuid::nil()}),
        );
        let templates = transform(&event);
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].audience, Audience::Admin);
        assert_eq!(templates[1].audience, Audience::Customer);
    }

    #[test]
    fn unmappable_event_type_yields_nothing() {
        let event = envelope("unknown.thing", serde_json::json!({}));
        assert!(transform(&event).is_empty());
    }

    #[test]
    fn materialize_admin_with_no_connected_users_falls_back_to_broadcast() {
        let event = envelope("payment.failed", serde_json::json!({"order_id": "o1"}));
        let template = &transform(&event)[0];
        let rows = materialize(template, &event, &[]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, crate::model::BROADCAST_USER);
    }

    #[test]
    fn materialize_customer_without_customer_id_yields_nothing() {
        let event = envelope("order.shipped", serde_json::json!({"order_id": "o1"}));
        let template = &transform(&event)[0];
        assert!(materialize(template, &event, &[]).is_empty());
    }
}
