//! Extracted items: the append-only output of extraction nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One structured record produced by an extraction node.
///
/// The typed columns cover the common commerce fields; everything else
/// rides in `attributes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedItem {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub url_queue_item_id: Uuid,
    pub node_execution_id: Option<Uuid>,
    pub item_type: String,
    pub title: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub availability: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
    #[serde(default)]
    pub attributes: serde_json::Value,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractedItem {
    /// Build an item from a raw field map, lifting the typed columns out of it.
    ///
    /// Fields named `title`, `price`, `currency`, `availability`, `rating`,
    /// `review_count` populate their columns (with lossy numeric parsing);
    /// the full map is kept in `attributes` either way.
    #[must_use]
    pub fn from_fields(
        execution_id: Uuid,
        workflow_id: Uuid,
        url_queue_item_id: Uuid,
        node_execution_id: Option<Uuid>,
        item_type: &str,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let text = |key: &str| {
            fields
                .get(key)
                .and_then(|v| v.as_str())
                .map(ToString::to_string)
        };
        let number = |key: &str| {
            fields.get(key).and_then(|v| match v {
                serde_json::Value::Number(n) => n.as_f64(),
                serde_json::Value::String(s) => parse_number(s),
                _ => None,
            })
        };

        Self {
            id: Uuid::new_v4(),
            execution_id,
            workflow_id,
            url_queue_item_id,
            node_execution_id,
            item_type: item_type.to_string(),
            title: text("title"),
            price: number("price"),
            currency: text("currency"),
            availability: text("availability"),
            rating: number("rating"),
            review_count: number("review_count").map(|n| n as i64),
            attributes: serde_json::Value::Object(fields),
            extracted_at: Utc::now(),
        }
    }
}

/// Parse a number out of scraped text, tolerating currency symbols and
/// thousands separators ("$1,299.00" -> 1299.0)
fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lifts_typed_columns() {
        let mut fields = serde_json::Map::new();
        fields.insert("title".into(), json!("Widget"));
        fields.insert("price".into(), json!("$1,299.00"));
        fields.insert("rating".into(), json!(4.5));
        fields.insert("color".into(), json!("red"));

        let item = ExtractedItem::from_fields(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            "product",
            fields,
        );

        assert_eq!(item.title.as_deref(), Some("Widget"));
        assert_eq!(item.price, Some(1299.0));
        assert_eq!(item.rating, Some(4.5));
        assert_eq!(item.attributes["color"], json!("red"));
    }

    #[test]
    fn tolerates_unparseable_numbers() {
        let mut fields = serde_json::Map::new();
        fields.insert("price".into(), json!("call for pricing"));

        let item = ExtractedItem::from_fields(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            "product",
            fields,
        );
        assert_eq!(item.price, None);
    }
}
