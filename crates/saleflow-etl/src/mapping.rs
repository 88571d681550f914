//! Source-to-sink column mapping

use chrono::{DateTime, NaiveDateTime};

use crate::error::ValidationError;
use crate::models::Row;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// How one source field lands in the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnMappingRule {
    /// Copy the value under a new name
    Rename(&'static str),
    /// Parse a timestamp into a calendar date and a time of day
    SplitDateTime {
        date_target: &'static str,
        time_target: &'static str,
    },
}

pub const SALES_MAPPING: &[(&str, ColumnMappingRule)] = &[
    ("transaction_id", ColumnMappingRule::Rename("transaction_id")),
    ("customer_id", ColumnMappingRule::Rename("customer_id")),
    ("product_id", ColumnMappingRule::Rename("product_id")),
    ("store_id", ColumnMappingRule::Rename("store_id")),
    ("quantity", ColumnMappingRule::Rename("quantity")),
    ("unit_price", ColumnMappingRule::Rename("unit_price")),
    ("discount", ColumnMappingRule::Rename("discount")),
    ("total_amount", ColumnMappingRule::Rename("total_amount")),
    ("payment_method", ColumnMappingRule::Rename("payment_method")),
    (
        "timestamp",
        ColumnMappingRule::SplitDateTime {
            date_target: "sale_date",
            time_target: "sale_time",
        },
    ),
];

#[derive(Debug, Clone)]
pub struct ColumnMapper {
    rules: &'static [(&'static str, ColumnMappingRule)],
}

impl ColumnMapper {
    pub fn new(rules: &'static [(&'static str, ColumnMappingRule)]) -> Self {
        Self { rules }
    }

    pub fn sales() -> Self {
        Self::new(SALES_MAPPING)
    }

    /// Map one row. `row_number` is only used in error messages.
    ///
    /// Source fields without a rule are carried over as-is; rules whose
    /// source field is absent are skipped.
    pub fn apply(&self, mut row: Row, row_number: usize) -> Result<Row, ValidationError> {
        // Targets are inserted after every source is taken out, so one rule's
        // output is never picked up as another rule's input.
        let mut mapped = Vec::with_capacity(self.rules.len() + 1);

        for (source, rule) in self.rules {
            let Some(value) = row.remove(*source) else {
                continue;
            };

            match rule {
                ColumnMappingRule::Rename(target) => mapped.push((*target, value)),
                ColumnMappingRule::SplitDateTime {
                    date_target,
                    time_target,
                } => {
                    let ts = parse_timestamp(&value).ok_or_else(|| {
                        ValidationError::invalid_value(
                            row_number,
                            *source,
                            value.as_str(),
                            "unrecognized timestamp",
                        )
                    })?;
                    mapped.push((*date_target, ts.date().format(DATE_FORMAT).to_string()));
                    mapped.push((*time_target, ts.time().format(TIME_FORMAT).to_string()));
                }
            }
        }

        row.extend(mapped.into_iter().map(|(k, v)| (k.to_string(), v)));
        Ok(row)
    }
}

/// Accepts RFC 3339 and the common `YYYY-MM-DD[ T]HH:MM:SS[.f]` forms.
/// Offsets are dropped; the wall-clock time is kept.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.naive_local());
    }

    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}
