//! Per-record eligibility checks ahead of statement building.
//!
//! Three rule groups apply, in order:
//!
//! - universal order rules: identifier, recipient name, address and quantity
//!   must be non-empty and quantity must be positive (only for fields the
//!   table actually resolves);
//! - the table's declarative [`ValidationRules`];
//! - structural presence of columns that are required and have no default.
//!
//! Phone and postal-code equivalents are never enforced as required, pending
//! product sign-off.

use std::io::Write;

use log::warn;
use serde::Serialize;

use crate::{
    catalog::{UniversalFields, ValidationRules},
    data::{Value, parse_decimal_literal, parse_naive_date},
    record::Record,
    resolver::ResolvedTable,
};

/// A record excluded from the write set, with every rule it broke.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub table: String,
    /// 1-based position in the submitted record sequence
    pub row: usize,
    pub reasons: Vec<String>,
    pub record: Record,
}

/// Receives rejected records. Sinks must not fail the run.
pub trait RejectSink {
    fn reject(&mut self, rejection: &Rejection);
}

impl RejectSink for Vec<Rejection> {
    fn reject(&mut self, rejection: &Rejection) {
        self.push(rejection.clone());
    }
}

/// Logs each rejection at warn level.
#[derive(Debug, Default)]
pub struct LogSink {
    count: usize,
}

impl LogSink {
    pub fn count(&self) -> usize {
        self.count
    }
}

impl RejectSink for LogSink {
    fn reject(&mut self, rejection: &Rejection) {
        self.count += 1;
        warn!(
            "Row {} rejected for '{}': {}",
            rejection.row,
            rejection.table,
            rejection.reasons.join("; ")
        );
    }
}

/// Writes one JSON object per rejection.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
    written: usize,
    failed: usize,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            written: 0,
            failed: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn into_inner(mut self) -> W {
        let _ = self.writer.flush();
        self.writer
    }
}

impl<W: Write> RejectSink for JsonLinesSink<W> {
    fn reject(&mut self, rejection: &Rejection) {
        let result = serde_json::to_writer(&mut self.writer, rejection)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"));
        match result {
            Ok(()) => self.written += 1,
            Err(err) => {
                self.failed += 1;
                warn!("Could not record rejection for row {}: {err}", rejection.row);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordValidator {
    rules: ValidationRules,
    universal: UniversalFields,
    /// Fields the table resolves
    fields: Vec<String>,
    /// Fields that are required and have no default
    structural: Vec<String>,
}

impl RecordValidator {
    pub fn new(table: &ResolvedTable, rules: ValidationRules, universal: UniversalFields) -> Self {
        Self {
            rules,
            universal,
            fields: table
                .columns
                .iter()
                .map(|c| c.field.clone())
                .collect(),
            structural: table
                .columns
                .iter()
                .filter(|c| c.needs_value())
                .map(|c| c.field.clone())
                .collect(),
        }
    }

    /// Non-throwing eligibility check.
    pub fn is_valid(&self, record: &Record) -> bool {
        self.check(record).is_ok()
    }

    /// Every violated rule, or `Ok` when the record may be written.
    pub fn check(&self, record: &Record) -> Result<(), Vec<String>> {
        let mut reasons = Vec::new();
        self.check_universal(record, &mut reasons);
        self.check_rules(record, &mut reasons);
        for field in &self.structural {
            if record.non_blank(field).is_none() {
                push_unique(&mut reasons, format!("required field '{field}' is missing"));
            }
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(reasons)
        }
    }

    fn resolves(&self, field: &str) -> bool {
        self.fields.iter().any(|name| name == field)
    }

    fn is_relaxed(&self, field: &str) -> bool {
        self.universal.relaxed().contains(&field)
    }

    fn check_universal(&self, record: &Record, reasons: &mut Vec<String>) {
        let identity = [
            &self.universal.order_id,
            &self.universal.recipient_name,
            &self.universal.address,
        ];
        for field in identity {
            if self.resolves(field) && record.non_blank(field).is_none() {
                push_unique(reasons, format!("required field '{field}' is missing"));
            }
        }

        let quantity = self.universal.quantity.as_str();
        if !self.resolves(quantity) {
            return;
        }
        match record.non_blank(quantity).map(|value| (value, value.as_f64())) {
            None => push_unique(reasons, format!("required field '{quantity}' is missing")),
            Some((_, Some(q))) if q > 0.0 => {}
            Some((_, Some(q))) => reasons.push(format!("quantity must be positive, got {q}")),
            Some((value, None)) => reasons.push(format!("quantity '{value}' is not a number")),
        }
    }

    fn check_rules(&self, record: &Record, reasons: &mut Vec<String>) {
        for field in &self.rules.required_fields {
            if self.is_relaxed(field) {
                continue;
            }
            if record.non_blank(field).is_none() {
                push_unique(reasons, format!("required field '{field}' is missing"));
            }
        }
        for field in &self.rules.numeric_fields {
            if let Some(value) = record.non_blank(field)
                && value.as_f64().is_none()
            {
                reasons.push(format!("field '{field}' must be numeric, got '{value}'"));
            }
        }
        for field in &self.rules.date_fields {
            if let Some(value) = record.non_blank(field)
                && !is_date_like(value)
            {
                reasons.push(format!("field '{field}' must be a date, got '{value}'"));
            }
        }
        for field in &self.rules.decimal_fields {
            if let Some(value) = record.non_blank(field)
                && !is_decimal_like(value)
            {
                reasons.push(format!("field '{field}' must be a decimal, got '{value}'"));
            }
        }
    }
}

fn is_date_like(value: &Value) -> bool {
    match value {
        Value::Date(_) | Value::DateTime(_) => true,
        Value::String(s) => parse_naive_date(s.trim()).is_ok(),
        _ => false,
    }
}

fn is_decimal_like(value: &Value) -> bool {
    match value {
        Value::Decimal(_) | Value::Integer(_) | Value::Float(_) => true,
        Value::String(s) => parse_decimal_literal(s).is_ok(),
        _ => false,
    }
}

fn push_unique(reasons: &mut Vec<String>, reason: String) {
    if !reasons.contains(&reason) {
        reasons.push(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{catalog::MappingCatalog, resolver::resolve};

    fn orders_validator() -> RecordValidator {
        let catalog = MappingCatalog::builtin().unwrap();
        let table = resolve("orders", &catalog, None).unwrap();
        let rules = catalog.resolve_table("orders").unwrap().validation.clone();
        RecordValidator::new(&table, rules, catalog.settings.universal_fields.clone())
    }

    fn order() -> Record {
        Record::new()
            .with("order_id", "SO-1")
            .with("recipient_name", "Ada")
            .with("address", "1 Loop Rd")
            .with("phone", "5550100")
            .with("postal_code", "94107")
            .with("quantity", Value::Integer(1))
    }

    #[test]
    fn complete_order_is_valid() {
        assert!(orders_validator().is_valid(&order()));
    }

    #[test]
    fn missing_recipient_is_rejected() {
        let mut record = order();
        record.remove("recipient_name");
        let reasons = orders_validator().check(&record).unwrap_err();
        assert_eq!(reasons, vec!["required field 'recipient_name' is missing"]);
    }

    #[test]
    fn blank_address_counts_as_missing() {
        let record = order().with("address", "   ");
        assert!(!orders_validator().is_valid(&record));
    }

    #[test]
    fn contact_fields_are_relaxed() {
        let mut record = order();
        record.remove("phone");
        record.remove("postal_code");
        assert!(orders_validator().is_valid(&record));
    }

    #[test]
    fn missing_quantity_is_rejected() {
        let mut record = order();
        record.remove("quantity");
        let reasons = orders_validator().check(&record).unwrap_err();
        assert_eq!(reasons, vec!["required field 'quantity' is missing"]);

        assert!(!orders_validator().is_valid(&order().with("quantity", " ")));
    }

    #[test]
    fn quantity_must_be_positive() {
        let zero = order().with("quantity", Value::Integer(0));
        let reasons = orders_validator().check(&zero).unwrap_err();
        assert!(reasons[0].contains("positive"));

        let text = order().with("quantity", "lots");
        assert!(!orders_validator().is_valid(&text));
    }

    #[test]
    fn declarative_type_rules_apply_to_present_fields() {
        let record = order()
            .with("order_date", "not a date")
            .with("unit_price", "$12.50");
        let reasons = orders_validator().check(&record).unwrap_err();
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("order_date"));
    }

    #[test]
    fn universal_rules_skip_fields_the_table_lacks() {
        let catalog = MappingCatalog::builtin().unwrap();
        let sample = Record::new().with("sku", "A1");
        let table = resolve("stock", &catalog, Some(&sample)).unwrap();
        let validator =
            RecordValidator::new(&table, ValidationRules::default(), UniversalFields::default());
        assert!(validator.is_valid(&sample));
    }

    #[test]
    fn json_lines_sink_writes_one_line_per_rejection() {
        let mut sink = JsonLinesSink::new(Vec::new());
        let rejection = Rejection {
            table: "orders".to_string(),
            row: 3,
            reasons: vec!["required field 'address' is missing".to_string()],
            record: Record::new().with("order_id", "SO-3"),
        };
        sink.reject(&rejection);
        sink.reject(&rejection);
        assert_eq!(sink.written(), 2);
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(first["row"], 3);
        assert_eq!(first["record"]["order_id"], "SO-3");
    }
}
