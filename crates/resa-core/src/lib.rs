//! Core domain model for the retail analytics sync.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};

pub const CRATE_NAME: &str = "resa-core";

/// Group label assigned when a product name is missing or empty.
pub const UNGROUPED_LABEL: &str = "Без группы";
/// Unit label for weight-reported quantities.
pub const UNIT_KG: &str = "кг";
/// Unit label for piece-reported quantities.
pub const UNIT_PCS: &str = "шт";

/// How a quantity is priced and reported downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Kg,
    Pcs,
}

impl UnitKind {
    pub fn is_weight(self) -> bool {
        matches!(self, UnitKind::Kg)
    }
}

/// Category a weight rule assigns to a product.
///
/// Unknown category strings in the reference table degrade to `Second`, the
/// source system's default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightCategory {
    New,
    #[default]
    #[serde(other)]
    Second,
}

/// Reference row from the externally maintained `product_weights` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightRule {
    pub product_group: String,
    #[serde(default)]
    pub product_name_pattern: Option<String>,
    #[serde(default, deserialize_with = "default_on_null")]
    pub category: WeightCategory,
    #[serde(default, deserialize_with = "default_on_null")]
    pub avg_weight_kg: f64,
}

impl WeightRule {
    /// Non-empty name pattern, if the rule carries one.
    pub fn pattern(&self) -> Option<&str> {
        self.product_name_pattern
            .as_deref()
            .filter(|p| !p.trim().is_empty())
    }

    /// Wildcard groups apply their pattern across all product groups.
    pub fn has_wildcard_group(&self) -> bool {
        matches!(self.product_group.as_str(), "%" | "АКЦИЯ")
    }
}

fn default_on_null<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Denormalized date dimensions carried on every sales row for dashboard
/// filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarParts {
    pub day_of_month: u32,
    pub week_number: u32,
    pub month: u32,
    pub quarter: u32,
    pub year: i32,
    pub weekday: String,
}

pub fn calendar_parts(date: NaiveDate) -> CalendarParts {
    CalendarParts {
        day_of_month: date.day(),
        week_number: date.iso_week().week(),
        month: date.month(),
        quarter: (date.month() - 1) / 3 + 1,
        year: date.year(),
        weekday: date.format("%A").to_string(),
    }
}

/// One transformed sales line, shaped like the `sales_analytics` row it
/// becomes at the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaleRecord {
    pub sale_date: NaiveDate,
    pub day_of_month: u32,
    pub week_number: u32,
    pub month: u32,
    pub quarter: u32,
    pub year: i32,
    pub weekday: String,
    pub warehouse: Option<String>,
    pub store: String,
    pub product: Option<String>,
    pub product_group: String,
    pub unit: Option<String>,
    pub unit_type: UnitKind,
    pub quantity: f64,
    pub quantity_pcs: f64,
    pub quantity_kg: f64,
    pub revenue: f64,
    /// Synthetic transaction-line identifier, unique per (document, line).
    pub recorder_id: String,
    /// Parent document reference; distinct documents drive transaction
    /// counts, so this stays off the wire.
    #[serde(skip)]
    pub document_id: String,
}

impl SaleRecord {
    pub fn natural_key(&self) -> String {
        self.recorder_id.clone()
    }
}

/// One stock position at a snapshot date, already unit-normalized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockRecord {
    pub store: String,
    pub product: String,
    pub quantity: f64,
    pub product_group: String,
    pub snapshot_date: NaiveDate,
    pub unit: String,
}

impl StockRecord {
    pub fn natural_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.store, self.product, self.unit, self.snapshot_date
        )
    }
}

/// Daily visitor count for one store, from the traffic counter register.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitorRecord {
    pub visit_date: NaiveDate,
    pub store: String,
    pub visitor_count: f64,
}

impl VisitorRecord {
    pub fn natural_key(&self) -> String {
        format!("{}|{}", self.visit_date, self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_rule(
        group: &str,
        pattern: Option<&str>,
        category: WeightCategory,
        avg: f64,
    ) -> WeightRule {
        WeightRule {
            product_group: group.to_string(),
            product_name_pattern: pattern.map(str::to_string),
            category,
            avg_weight_kg: avg,
        }
    }

    #[test]
    fn calendar_parts_match_iso_rules() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 15).unwrap();
        let parts = calendar_parts(date);
        assert_eq!(parts.day_of_month, 15);
        assert_eq!(parts.week_number, 51);
        assert_eq!(parts.month, 12);
        assert_eq!(parts.quarter, 4);
        assert_eq!(parts.year, 2025);
        assert_eq!(parts.weekday, "Monday");
    }

    #[test]
    fn quarter_boundaries() {
        let quarter = |m| calendar_parts(NaiveDate::from_ymd_opt(2025, m, 1).unwrap()).quarter;
        assert_eq!(quarter(1), 1);
        assert_eq!(quarter(3), 1);
        assert_eq!(quarter(4), 2);
        assert_eq!(quarter(12), 4);
    }

    #[test]
    fn sale_record_serializes_without_document_id() {
        let record = SaleRecord {
            sale_date: NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
            day_of_month: 1,
            week_number: 49,
            month: 12,
            quarter: 4,
            year: 2025,
            weekday: "Monday".to_string(),
            warehouse: Some("Склад Озерки".to_string()),
            store: "Озерки".to_string(),
            product: Some("Секонд.Куртка".to_string()),
            product_group: "Секонд".to_string(),
            unit: Some("кг".to_string()),
            unit_type: UnitKind::Kg,
            quantity: 2.0,
            quantity_pcs: 2.0,
            quantity_kg: 2.0,
            revenue: 990.0,
            recorder_id: "8A3F-12".to_string(),
            document_id: "8A3F".to_string(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["sale_date"], "2025-12-01");
        assert_eq!(json["unit_type"], "kg");
        assert_eq!(json["recorder_id"], "8A3F-12");
        assert!(json.get("document_id").is_none());
    }

    #[test]
    fn weight_rule_blank_pattern_counts_as_absent() {
        let rule = mk_rule("Секонд", Some("  "), WeightCategory::Second, 0.3);
        assert!(rule.pattern().is_none());
        let rule = mk_rule("Секонд", Some("Куртка"), WeightCategory::Second, 0.3);
        assert_eq!(rule.pattern(), Some("Куртка"));
    }

    #[test]
    fn weight_rule_wildcard_groups() {
        assert!(mk_rule("%", Some("Обувь"), WeightCategory::Second, 0.5).has_wildcard_group());
        assert!(mk_rule("АКЦИЯ", Some("Обувь"), WeightCategory::Second, 0.5).has_wildcard_group());
        assert!(!mk_rule("Секонд", None, WeightCategory::Second, 0.3).has_wildcard_group());
    }

    #[test]
    fn weight_rule_tolerates_null_and_unknown_fields() {
        let parsed: WeightRule = serde_json::from_str(
            r#"{"product_group":"Секонд","product_name_pattern":null,"category":null,"avg_weight_kg":null}"#,
        )
        .unwrap();
        assert_eq!(parsed.category, WeightCategory::Second);
        assert_eq!(parsed.avg_weight_kg, 0.0);

        let parsed: WeightRule =
            serde_json::from_str(r#"{"product_group":"Секонд","category":"vintage"}"#).unwrap();
        assert_eq!(parsed.category, WeightCategory::Second);

        let parsed: WeightRule =
            serde_json::from_str(r#"{"product_group":"Секонд","category":"new"}"#).unwrap();
        assert_eq!(parsed.category, WeightCategory::New);
    }

    #[test]
    fn natural_keys_compose_dimensions() {
        let stock = StockRecord {
            store: "Озерки".to_string(),
            product: "Секонд.Куртка".to_string(),
            quantity: 12.5,
            product_group: "Секонд".to_string(),
            snapshot_date: NaiveDate::from_ymd_opt(2026, 8, 22).unwrap(),
            unit: UNIT_KG.to_string(),
        };
        assert_eq!(stock.natural_key(), "Озерки|Секонд.Куртка|кг|2026-08-22");

        let visitors = VisitorRecord {
            visit_date: NaiveDate::from_ymd_opt(2026, 8, 22).unwrap(),
            store: "Озерки".to_string(),
            visitor_count: 418.0,
        };
        assert_eq!(visitors.natural_key(), "2026-08-22|Озерки");
    }
}
