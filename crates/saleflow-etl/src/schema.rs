//! Source and sink schema descriptors
//!
//! Schemas are static tables compiled into the binary and looked up by entity
//! name through [`SchemaRegistry`]. Nothing here is mutable at runtime.

use serde::Serialize;

/// Value kinds understood by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Integer,
    Decimal,
    Date,
    Time,
    Timestamp,
}

/// One field of an incoming CSV artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
}

/// One column of a sink table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SinkColumn {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    /// Value is stored encrypted when a key is configured
    pub encrypt: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceSchema {
    pub entity: &'static str,
    pub fields: &'static [FieldDescriptor],
}

impl SourceSchema {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().filter(|f| f.required).map(|f| f.name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

/// Sink table layout. Column order is the insert order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SinkSchema {
    pub table: &'static str,
    pub columns: &'static [SinkColumn],
}

impl SinkSchema {
    /// Columns written to the sink, in declared order
    pub fn required_columns(&self) -> impl Iterator<Item = &'static SinkColumn> + '_ {
        self.columns.iter().filter(|c| c.required)
    }

    pub fn encrypted_columns(&self) -> impl Iterator<Item = &'static SinkColumn> + '_ {
        self.columns.iter().filter(|c| c.encrypt)
    }

    pub fn text_columns(&self) -> impl Iterator<Item = &'static SinkColumn> + '_ {
        self.columns.iter().filter(|c| c.field_type == FieldType::Text)
    }
}

const fn field(name: &'static str, field_type: FieldType, required: bool) -> FieldDescriptor {
    FieldDescriptor {
        name,
        field_type,
        required,
    }
}

const fn column(name: &'static str, field_type: FieldType, encrypt: bool) -> SinkColumn {
    SinkColumn {
        name,
        field_type,
        required: true,
        encrypt,
    }
}

pub const SALES_SOURCE: SourceSchema = SourceSchema {
    entity: "sales",
    fields: &[
        field("transaction_id", FieldType::Text, true),
        field("customer_id", FieldType::Text, true),
        field("product_id", FieldType::Text, true),
        field("store_id", FieldType::Text, true),
        field("quantity", FieldType::Integer, true),
        field("unit_price", FieldType::Decimal, true),
        field("discount", FieldType::Decimal, false),
        field("total_amount", FieldType::Decimal, false),
        field("payment_method", FieldType::Text, true),
        field("timestamp", FieldType::Timestamp, true),
    ],
};

pub const SALES_SINK: SinkSchema = SinkSchema {
    table: "sales",
    columns: &[
        column("transaction_id", FieldType::Text, false),
        column("customer_id", FieldType::Text, true),
        column("product_id", FieldType::Text, false),
        column("store_id", FieldType::Text, false),
        column("quantity", FieldType::Integer, false),
        column("unit_price", FieldType::Decimal, false),
        column("discount", FieldType::Decimal, false),
        column("total_amount", FieldType::Decimal, false),
        column("payment_method", FieldType::Text, false),
        column("sale_date", FieldType::Date, false),
        column("sale_time", FieldType::Time, false),
    ],
};

const SOURCES: &[SourceSchema] = &[SALES_SOURCE];
const SINKS: &[SinkSchema] = &[SALES_SINK];

/// Read-only lookup of schemas by entity name
#[derive(Debug, Clone, Copy)]
pub struct SchemaRegistry {
    sources: &'static [SourceSchema],
    sinks: &'static [SinkSchema],
}

impl SchemaRegistry {
    pub const fn builtin() -> Self {
        Self {
            sources: SOURCES,
            sinks: SINKS,
        }
    }

    pub fn source(&self, entity: &str) -> Option<&'static SourceSchema> {
        self.sources.iter().find(|s| s.entity == entity)
    }

    pub fn sink(&self, table: &str) -> Option<&'static SinkSchema> {
        self.sinks.iter().find(|s| s.table == table)
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
