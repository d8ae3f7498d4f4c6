//! Read models returned by backend providers
//!
//! Backends return loosely shaped rows (column name -> JSON value). These types
//! pick the well-known columns by alias and keep everything else in
//! `attributes`, so custom query templates can return extra columns.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::status::CanonicalStatus;

/// A raw result row keyed by column name
pub type Row = Map<String, Value>;

const EQUIPMENT_ID_KEYS: &[&str] = &["equipment_id", "equipment_code", "equipment", "id"];
const NAME_KEYS: &[&str] = &["equipment_name", "name"];
const TYPE_KEYS: &[&str] = &["equipment_type", "type"];
const LINE_KEYS: &[&str] = &["line_id", "line", "line_code"];
const STATUS_KEYS: &[&str] = &["status", "state", "equipment_status", "run_status"];
const UPDATED_KEYS: &[&str] = &["updated_at", "status_time", "timestamp"];
const METRIC_KEYS: &[&str] = &["metric", "parameter", "item", "measurement_item"];
const VALUE_KEYS: &[&str] = &["value", "measured_value", "measurement_value"];
const UNIT_KEYS: &[&str] = &["unit", "uom"];
const USL_KEYS: &[&str] = &["usl", "upper_spec_limit", "upper_limit"];
const LSL_KEYS: &[&str] = &["lsl", "lower_spec_limit", "lower_limit"];
const MEASURED_KEYS: &[&str] = &["measured_at", "measurement_time", "timestamp"];

/// Caller-supplied filter for built-in and templated queries.
///
/// Values are always bound as parameters, never spliced into SQL text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub equipment_id: Option<String>,
    pub line_id: Option<String>,
    pub equipment_type: Option<String>,
    pub status: Option<String>,
    /// Inclusive lower bound on the row timestamp
    pub from: Option<String>,
    /// Inclusive upper bound on the row timestamp
    pub to: Option<String>,
}

impl QueryFilter {
    pub fn for_equipment(equipment_id: impl Into<String>) -> Self {
        Self { equipment_id: Some(equipment_id.into()), ..Default::default() }
    }

    pub fn for_line(line_id: impl Into<String>) -> Self {
        Self { line_id: Some(line_id.into()), ..Default::default() }
    }

    /// Filter values as (name, value) pairs, for templates and query strings
    pub fn named_values(&self) -> Vec<(&'static str, Option<&str>)> {
        vec![
            ("equipment_id", self.equipment_id.as_deref()),
            ("line_id", self.line_id.as_deref()),
            ("equipment_type", self.equipment_type.as_deref()),
            ("status", self.status.as_deref()),
            ("from", self.from.as_deref()),
            ("to", self.to.as_deref()),
        ]
    }
}

/// Current status of one piece of equipment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentStatus {
    pub equipment_id: String,
    pub name: Option<String>,
    pub equipment_type: Option<String>,
    pub line_id: Option<String>,
    pub status: CanonicalStatus,
    pub raw_status: Option<String>,
    pub updated_at: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub attributes: Map<String, Value>,
}

impl EquipmentStatus {
    /// Shape a raw row, normalizing its status column
    pub fn from_row(mut row: Row, normalize: impl Fn(&str) -> CanonicalStatus) -> Self {
        let raw_status = take_string(&mut row, STATUS_KEYS);
        Self {
            equipment_id: take_string(&mut row, EQUIPMENT_ID_KEYS).unwrap_or_default(),
            name: take_string(&mut row, NAME_KEYS),
            equipment_type: take_string(&mut row, TYPE_KEYS),
            line_id: take_string(&mut row, LINE_KEYS),
            status: raw_status.as_deref().map(&normalize).unwrap_or_default(),
            raw_status,
            updated_at: take_string(&mut row, UPDATED_KEYS),
            attributes: row,
        }
    }
}

/// A page of equipment status rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquipmentStatusPage {
    pub items: Vec<EquipmentStatus>,
    pub total: u64,
}

impl EquipmentStatusPage {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// One measurement sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub equipment_id: String,
    pub metric: Option<String>,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub lsl: Option<f64>,
    pub usl: Option<f64>,
    pub status: CanonicalStatus,
    pub raw_status: Option<String>,
    pub measured_at: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub attributes: Map<String, Value>,
}

impl Measurement {
    /// Shape a raw row, normalizing its status column
    pub fn from_row(mut row: Row, normalize: impl Fn(&str) -> CanonicalStatus) -> Self {
        let raw_status = take_string(&mut row, STATUS_KEYS);
        Self {
            equipment_id: take_string(&mut row, EQUIPMENT_ID_KEYS).unwrap_or_default(),
            metric: take_string(&mut row, METRIC_KEYS),
            value: take_f64(&mut row, VALUE_KEYS),
            unit: take_string(&mut row, UNIT_KEYS),
            lsl: take_f64(&mut row, LSL_KEYS),
            usl: take_f64(&mut row, USL_KEYS),
            status: raw_status.as_deref().map(&normalize).unwrap_or_default(),
            raw_status,
            measured_at: take_string(&mut row, MEASURED_KEYS),
            attributes: row,
        }
    }

    /// Value lies outside the configured spec limits
    pub fn is_spec_violation(&self) -> bool {
        let Some(value) = self.value else {
            return false;
        };
        self.usl.is_some_and(|usl| value > usl) || self.lsl.is_some_and(|lsl| value < lsl)
    }
}

/// Remove the first present alias (case-insensitive) and render it as text
fn take_string(row: &mut Row, keys: &[&str]) -> Option<String> {
    match take_value(row, keys)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn take_f64(row: &mut Row, keys: &[&str]) -> Option<f64> {
    match take_value(row, keys)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn take_value(row: &mut Row, keys: &[&str]) -> Option<Value> {
    for key in keys {
        let found = row.keys().find(|k| k.eq_ignore_ascii_case(key)).cloned();
        if let Some(found) = found {
            return row.remove(&found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn upper(raw: &str) -> CanonicalStatus {
        if raw.eq_ignore_ascii_case("running") {
            CanonicalStatus::Active
        } else {
            CanonicalStatus::Unknown
        }
    }

    #[test]
    fn test_equipment_from_row_uses_aliases() {
        let item = EquipmentStatus::from_row(
            row(json!({
                "EQUIPMENT_CODE": "EQ-01",
                "name": "Press 1",
                "State": "Running",
                "line": 7,
                "vendor_field": "x"
            })),
            upper,
        );
        assert_eq!(item.equipment_id, "EQ-01");
        assert_eq!(item.name.as_deref(), Some("Press 1"));
        assert_eq!(item.line_id.as_deref(), Some("7"));
        assert_eq!(item.status, CanonicalStatus::Active);
        assert_eq!(item.raw_status.as_deref(), Some("Running"));
        assert_eq!(item.attributes.get("vendor_field"), Some(&json!("x")));
    }

    #[test]
    fn test_missing_status_is_unknown() {
        let item = EquipmentStatus::from_row(row(json!({"equipment_id": "EQ-02"})), upper);
        assert_eq!(item.status, CanonicalStatus::Unknown);
        assert!(item.raw_status.is_none());
    }

    #[test]
    fn test_measurement_parses_numeric_strings() {
        let m = Measurement::from_row(
            row(json!({"equipment_id": "EQ-01", "value": "12.5", "usl": 10.0, "lsl": "1"})),
            upper,
        );
        assert_eq!(m.value, Some(12.5));
        assert_eq!(m.lsl, Some(1.0));
        assert!(m.is_spec_violation());
    }

    #[test]
    fn test_spec_violation_bounds() {
        let base = Measurement::from_row(
            row(json!({"equipment_id": "EQ-01", "value": 5.0, "usl": 10.0, "lsl": 1.0})),
            upper,
        );
        assert!(!base.is_spec_violation());

        let low = Measurement { value: Some(0.5), ..base.clone() };
        assert!(low.is_spec_violation());

        let no_value = Measurement { value: None, ..base.clone() };
        assert!(!no_value.is_spec_violation());

        let no_limits = Measurement { usl: None, lsl: None, value: Some(1e9), ..base };
        assert!(!no_limits.is_spec_violation());
    }

    #[test]
    fn test_filter_named_values() {
        let filter = QueryFilter::for_line("L1");
        let values = filter.named_values();
        assert!(values.contains(&("line_id", Some("L1"))));
        assert!(values.contains(&("equipment_id", None)));
    }
}
