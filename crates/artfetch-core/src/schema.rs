//! Arrow schema definitions for exported records
//!
//! Parquet keeps keyword and hub lists as native `List<Utf8>` columns.
//! Delimited text cannot hold nested values, so the flat layout stores them
//! as JSON-encoded strings instead.

use std::sync::{Arc, LazyLock};

use arrow::datatypes::{DataType, Field, Schema};

/// Column order shared by both layouts
pub const COLUMNS: [&str; 10] = [
    "id",
    "status",
    "error",
    "title",
    "text",
    "keywords",
    "username",
    "hubs",
    "published_at",
    "reading_time",
];

fn string_list() -> DataType {
    DataType::List(Arc::new(Field::new("item", DataType::Utf8, true)))
}

fn build(list_type: DataType) -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::UInt64, false),
        Field::new("status", DataType::Utf8, false),
        Field::new("error", DataType::Utf8, true),
        // Article fields are null on failure markers
        Field::new("title", DataType::Utf8, true),
        Field::new("text", DataType::Utf8, true),
        Field::new("keywords", list_type.clone(), true),
        Field::new("username", DataType::Utf8, true),
        Field::new("hubs", list_type, true),
        Field::new("published_at", DataType::Utf8, true),
        Field::new("reading_time", DataType::UInt32, true),
    ])
}

/// Nested layout (Parquet)
pub static RECORDS: LazyLock<Arc<Schema>> = LazyLock::new(|| Arc::new(build(string_list())));

/// Flat layout (CSV): list columns hold JSON arrays
pub static FLAT_RECORDS: LazyLock<Arc<Schema>> =
    LazyLock::new(|| Arc::new(build(DataType::Utf8)));

/// How list-valued fields are laid out in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnLayout {
    Nested,
    Flat,
}

impl ColumnLayout {
    pub fn schema(self) -> &'static Arc<Schema> {
        match self {
            Self::Nested => &RECORDS,
            Self::Flat => &FLAT_RECORDS,
        }
    }
}
