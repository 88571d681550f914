//! Batch transformation
//!
//! Runs one [`RawRowBatch`] through validation, mapping, defaults,
//! encryption, normalization, filtering and projection, in that order.

use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, warn};

use crate::crypto::EncryptionMode;
use crate::error::{EtlResult, ValidationError};
use crate::mapping::{ColumnMapper, DATE_FORMAT, TIME_FORMAT};
use crate::models::{RawRowBatch, Row, SinkRow, SinkValue, TransformOutcome, TransformedBatch};
use crate::schema::{FieldType, SinkColumn, SinkSchema, SourceSchema};

const QUANTITY: &str = "quantity";
const UNIT_PRICE: &str = "unit_price";
const DISCOUNT: &str = "discount";
const TOTAL_AMOUNT: &str = "total_amount";

pub struct Transformer {
    source: &'static SourceSchema,
    sink: &'static SinkSchema,
    mapper: ColumnMapper,
    encryption: EncryptionMode,
}

impl Transformer {
    pub fn new(
        source: &'static SourceSchema,
        sink: &'static SinkSchema,
        mapper: ColumnMapper,
        encryption: EncryptionMode,
    ) -> Self {
        Self {
            source,
            sink,
            mapper,
            encryption,
        }
    }

    pub fn sink(&self) -> &'static SinkSchema {
        self.sink
    }

    pub fn transform(&self, batch: RawRowBatch) -> EtlResult<TransformOutcome> {
        let chunk_index = batch.chunk_index;
        self.validate_structure(&batch)?;

        // Row numbers are kept alongside each row for error messages, and
        // survive filtering.
        let mut rows = Vec::with_capacity(batch.rows.len());
        for (i, raw) in batch.rows.into_iter().enumerate() {
            let number = i + 1;
            let mut row = self.mapper.apply(raw, number)?;
            fill_defaults(&mut row, number)?;
            self.encrypt(&mut row)?;
            self.normalize(&mut row);
            rows.push((number, row));
        }

        let before = rows.len();
        let mut kept = Vec::with_capacity(before);
        for (number, row) in rows {
            if passes_filter(&row, number)? {
                kept.push((number, row));
            }
        }

        if kept.len() < before {
            debug!(
                chunk = chunk_index,
                dropped = before - kept.len(),
                "Filtered rows with non-positive quantity or negative price"
            );
        }

        if kept.is_empty() {
            debug!(chunk = chunk_index, "No rows left after filtering");
            return Ok(TransformOutcome::Empty);
        }

        let batch = self.project(chunk_index, kept)?;
        Ok(TransformOutcome::Rows(batch))
    }

    fn validate_structure(&self, batch: &RawRowBatch) -> Result<(), ValidationError> {
        let missing: Vec<String> = self
            .source
            .required_fields()
            .filter(|field| !batch.columns.iter().any(|c| c == field))
            .map(str::to_string)
            .collect();

        if !missing.is_empty() {
            return Err(ValidationError::MissingRequired(missing));
        }

        let unexpected: Vec<&str> = batch
            .columns
            .iter()
            .filter(|c| !self.source.contains(c))
            .map(String::as_str)
            .collect();

        if !unexpected.is_empty() {
            warn!(
                chunk = batch.chunk_index,
                columns = ?unexpected,
                "Unexpected columns in source"
            );
        }

        Ok(())
    }

    fn encrypt(&self, row: &mut Row) -> EtlResult<()> {
        if !self.encryption.is_enabled() {
            return Ok(());
        }
        for column in self.sink.encrypted_columns() {
            if let Some(value) = row.remove(column.name) {
                row.insert(column.name.to_string(), self.encryption.apply(value)?);
            }
        }
        Ok(())
    }

    fn normalize(&self, row: &mut Row) {
        for column in self.sink.text_columns() {
            if let Some(value) = row.get_mut(column.name) {
                *value = value.trim().to_lowercase();
            }
        }
    }

    fn project(
        &self,
        chunk_index: usize,
        rows: Vec<(usize, Row)>,
    ) -> Result<TransformedBatch, ValidationError> {
        let columns: Vec<&'static SinkColumn> = self.sink.required_columns().collect();

        let missing: Vec<String> = columns
            .iter()
            .filter(|c| rows.iter().any(|(_, row)| !row.contains_key(c.name)))
            .map(|c| c.name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingSinkColumns(missing));
        }

        let projected = rows
            .into_iter()
            .map(|(number, row)| {
                columns
                    .iter()
                    .map(|c| {
                        let value = row.get(c.name).map(String::as_str).unwrap_or_default();
                        convert(value, c.field_type, c.name, number)
                    })
                    .collect::<Result<SinkRow, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TransformedBatch {
            chunk_index,
            columns: columns.iter().map(|c| c.name).collect(),
            rows: projected,
        })
    }
}

fn decimal(row: &Row, column: &str, number: usize) -> Result<Option<f64>, ValidationError> {
    row.get(column)
        .map(|raw| {
            raw.trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ValidationError::invalid_value(number, column, raw.as_str(), "not a number"))
        })
        .transpose()
}

fn fill_defaults(row: &mut Row, number: usize) -> Result<(), ValidationError> {
    if !row.contains_key(DISCOUNT) {
        row.insert(DISCOUNT.to_string(), "0".to_string());
    }

    if row.contains_key(TOTAL_AMOUNT) {
        return Ok(());
    }

    let quantity = decimal(row, QUANTITY, number)?;
    let unit_price = decimal(row, UNIT_PRICE, number)?;
    let discount = decimal(row, DISCOUNT, number)?.unwrap_or(0.0);

    if let (Some(quantity), Some(unit_price)) = (quantity, unit_price) {
        let total = round_cents(quantity * unit_price * (1.0 - discount));
        row.insert(TOTAL_AMOUNT.to_string(), total.to_string());
    }

    Ok(())
}

/// Half-to-even on the cent, the same ties rule numpy-based producers use
fn round_cents(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

/// Rows lacking quantity or price are kept here and rejected by projection.
fn passes_filter(row: &Row, number: usize) -> Result<bool, ValidationError> {
    let quantity = decimal(row, QUANTITY, number)?;
    let unit_price = decimal(row, UNIT_PRICE, number)?;

    Ok(!matches!(quantity, Some(q) if q <= 0.0) && !matches!(unit_price, Some(p) if p < 0.0))
}

fn convert(
    value: &str,
    field_type: FieldType,
    column: &str,
    number: usize,
) -> Result<SinkValue, ValidationError> {
    let invalid = |reason: &str| ValidationError::invalid_value(number, column, value, reason);
    let trimmed = value.trim();

    match field_type {
        FieldType::Text => Ok(SinkValue::Text(value.to_string())),
        FieldType::Integer => trimmed
            .parse::<i64>()
            .ok()
            .or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .map(SinkValue::Integer)
            .ok_or_else(|| invalid("not an integer")),
        FieldType::Decimal => trimmed
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(SinkValue::Decimal)
            .ok_or_else(|| invalid("not a number")),
        FieldType::Date => NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
            .map(SinkValue::Date)
            .map_err(|e| invalid(&e.to_string())),
        FieldType::Time => NaiveTime::parse_from_str(trimmed, TIME_FORMAT)
            .map(SinkValue::Time)
            .map_err(|e| invalid(&e.to_string())),
        FieldType::Timestamp => Err(invalid("timestamps must be mapped before loading")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::FieldEncryptor;
    use crate::error::EtlError;
    use crate::schema::{SALES_SINK, SALES_SOURCE};

    const COLUMNS: &[&str] = &[
        "transaction_id",
        "customer_id",
        "product_id",
        "store_id",
        "quantity",
        "unit_price",
        "discount",
        "payment_method",
        "timestamp",
    ];

    fn transformer(encryption: EncryptionMode) -> Transformer {
        Transformer::new(&SALES_SOURCE, &SALES_SINK, ColumnMapper::sales(), encryption)
    }

    fn sale(id: &str, quantity: &str, unit_price: &str, discount: Option<&str>) -> Row {
        let mut row: Row = [
            ("transaction_id", id),
            ("customer_id", "  CUST-001 "),
            ("product_id", "P-9"),
            ("store_id", "S-1"),
            ("quantity", quantity),
            ("unit_price", unit_price),
            ("payment_method", "Card"),
            ("timestamp", "2025-01-01 12:30:00"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        if let Some(discount) = discount {
            row.insert("discount".into(), discount.into());
        }
        row
    }

    fn batch(rows: Vec<Row>) -> RawRowBatch {
        RawRowBatch {
            chunk_index: 1,
            columns: COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    fn rows_of(outcome: TransformOutcome) -> TransformedBatch {
        match outcome {
            TransformOutcome::Rows(batch) => batch,
            TransformOutcome::Empty => panic!("expected rows"),
        }
    }

    #[test]
    fn test_filter_drops_invalid_rows() {
        let out = transformer(EncryptionMode::Disabled)
            .transform(batch(vec![
                sale("T1", "2", "10", None),
                sale("T2", "0", "10", None),
                sale("T3", "1", "-5", None),
            ]))
            .unwrap();

        let out = rows_of(out);
        assert_eq!(out.len(), 1);
        assert_eq!(out.value(0, "transaction_id"), Some(&SinkValue::Text("t1".into())));
    }

    #[test]
    fn test_default_total_amount() {
        let out = rows_of(
            transformer(EncryptionMode::Disabled)
                .transform(batch(vec![sale("T1", "2", "10", Some("0.1"))]))
                .unwrap(),
        );
        assert_eq!(out.value(0, "total_amount"), Some(&SinkValue::Decimal(18.0)));

        let out = rows_of(
            transformer(EncryptionMode::Disabled)
                .transform(batch(vec![sale("T1", "3", "2.5", None)]))
                .unwrap(),
        );
        assert_eq!(out.value(0, "discount"), Some(&SinkValue::Decimal(0.0)));
        assert_eq!(out.value(0, "total_amount"), Some(&SinkValue::Decimal(7.5)));
    }

    #[test]
    fn test_round_cents_ties_to_even() {
        assert_eq!(round_cents(0.125), 0.12);
        assert_eq!(round_cents(0.375), 0.38);
        assert_eq!(round_cents(18.0), 18.0);
        assert_eq!(round_cents(7.456), 7.46);
    }

    #[test]
    fn test_given_total_amount_is_kept() {
        let mut row = sale("T1", "2", "10", None);
        row.insert("total_amount".into(), "19.99".into());
        let mut input = batch(vec![row]);
        input.columns.push("total_amount".into());

        let out = rows_of(transformer(EncryptionMode::Disabled).transform(input).unwrap());
        assert_eq!(out.value(0, "total_amount"), Some(&SinkValue::Decimal(19.99)));
    }

    #[test]
    fn test_no_key_leaves_flagged_field_unchanged() {
        let out = rows_of(
            transformer(EncryptionMode::Disabled)
                .transform(batch(vec![sale("T1", "1", "1", None)]))
                .unwrap(),
        );
        // normalized, not encrypted
        assert_eq!(out.value(0, "customer_id"), Some(&SinkValue::Text("cust-001".into())));
    }

    #[test]
    fn test_encrypted_field_survives_normalization() {
        let encryptor = FieldEncryptor::from_key(&[7u8; 32]);
        let out = rows_of(
            transformer(EncryptionMode::Enabled(encryptor.clone()))
                .transform(batch(vec![sale("T1", "1", "1", None)]))
                .unwrap(),
        );

        let stored = out.value(0, "customer_id").and_then(SinkValue::as_text).unwrap();
        assert_ne!(stored, "cust-001");
        assert_eq!(encryptor.decrypt(stored).unwrap(), "  CUST-001 ");
    }

    #[test]
    fn test_all_rows_filtered_is_empty_not_error() {
        let out = transformer(EncryptionMode::Disabled)
            .transform(batch(vec![sale("T1", "-1", "10", None)]))
            .unwrap();
        assert_eq!(out, TransformOutcome::Empty);
    }

    #[test]
    fn test_projection_order_and_types() {
        let out = rows_of(
            transformer(EncryptionMode::Disabled)
                .transform(batch(vec![sale("T1", "4", "2.25", Some("0"))]))
                .unwrap(),
        );

        let expected: Vec<&str> = SALES_SINK.columns.iter().map(|c| c.name).collect();
        assert_eq!(out.columns, expected);
        assert_eq!(out.value(0, "quantity"), Some(&SinkValue::Integer(4)));
        assert_eq!(
            out.value(0, "sale_date"),
            Some(&SinkValue::Date(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()))
        );
        assert_eq!(
            out.value(0, "sale_time"),
            Some(&SinkValue::Time(NaiveTime::from_hms_opt(12, 30, 0).unwrap()))
        );
        assert_eq!(out.value(0, "payment_method"), Some(&SinkValue::Text("card".into())));
    }

    #[test]
    fn test_missing_required_source_column() {
        let mut input = batch(vec![sale("T1", "1", "1", None)]);
        input.columns.retain(|c| c != "store_id");

        let err = transformer(EncryptionMode::Disabled).transform(input).unwrap_err();
        assert!(matches!(
            err,
            EtlError::Validation(ValidationError::MissingRequired(ref cols)) if cols == &["store_id"]
        ));
    }

    #[test]
    fn test_empty_cell_fails_projection() {
        let mut row = sale("T1", "1", "1", None);
        row.remove("product_id");

        let err = transformer(EncryptionMode::Disabled)
            .transform(batch(vec![row]))
            .unwrap_err();
        assert!(matches!(
            err,
            EtlError::Validation(ValidationError::MissingSinkColumns(ref cols)) if cols == &["product_id"]
        ));
    }

    #[test]
    fn test_bad_values_fail_the_batch() {
        let err = transformer(EncryptionMode::Disabled)
            .transform(batch(vec![sale("T1", "two", "1", None)]))
            .unwrap_err();
        assert!(matches!(
            err,
            EtlError::Validation(ValidationError::InvalidValue { ref column, .. }) if column == "quantity"
        ));

        let err = transformer(EncryptionMode::Disabled)
            .transform(batch(vec![sale("T1", "1", "1", None), sale("T2", "1.5", "1", None)]))
            .unwrap_err();
        assert!(matches!(
            err,
            EtlError::Validation(ValidationError::InvalidValue { row: 2, .. })
        ));
    }

    #[test]
    fn test_unexpected_columns_are_allowed() {
        let mut row = sale("T1", "1", "1", None);
        row.insert("loyalty_tier".into(), "gold".into());
        let mut input = batch(vec![row]);
        input.columns.push("loyalty_tier".into());

        let out = rows_of(transformer(EncryptionMode::Disabled).transform(input).unwrap());
        assert!(!out.columns.contains(&"loyalty_tier"));
    }
}
