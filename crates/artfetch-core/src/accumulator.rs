//! Column accumulator turning records into Arrow `RecordBatch`es, and back

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, ListArray, ListBuilder, RecordBatch, StringArray, StringBuilder,
    UInt32Array, UInt64Array,
};
use arrow::datatypes::{UInt32Type, UInt64Type};
use arrow::error::ArrowError;

use crate::error::ExportError;
use crate::record::{Article, Record, RecordStatus};
use crate::schema::ColumnLayout;

/// Accumulator for building RecordBatches from Records
pub struct RecordAccumulator {
    layout: ColumnLayout,
    id: Vec<u64>,
    status: Vec<&'static str>,
    error: Vec<Option<String>>,
    title: Vec<Option<String>>,
    text: Vec<Option<String>>,
    keywords: Vec<Option<Vec<String>>>,
    username: Vec<Option<String>>,
    hubs: Vec<Option<Vec<String>>>,
    published_at: Vec<Option<String>>,
    reading_time: Vec<Option<u32>>,
}

impl RecordAccumulator {
    pub fn new(layout: ColumnLayout) -> Self {
        Self::with_capacity(layout, 0)
    }

    pub fn with_capacity(layout: ColumnLayout, capacity: usize) -> Self {
        Self {
            layout,
            id: Vec::with_capacity(capacity),
            status: Vec::with_capacity(capacity),
            error: Vec::with_capacity(capacity),
            title: Vec::with_capacity(capacity),
            text: Vec::with_capacity(capacity),
            keywords: Vec::with_capacity(capacity),
            username: Vec::with_capacity(capacity),
            hubs: Vec::with_capacity(capacity),
            published_at: Vec::with_capacity(capacity),
            reading_time: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, record: &Record) {
        self.id.push(record.page_id());
        self.status.push(record.status().as_str());
        self.error.push(record.error().map(str::to_string));

        let article = record.article_fields();
        self.title.push(article.map(|a| a.title.clone()));
        self.text.push(article.map(|a| a.text.clone()));
        self.keywords.push(article.map(|a| a.keywords.clone()));
        self.username.push(article.and_then(|a| a.username.clone()));
        self.hubs.push(article.map(|a| a.hubs.clone()));
        self.published_at
            .push(article.and_then(|a| a.published_at.clone()));
        self.reading_time.push(article.and_then(|a| a.reading_time));
    }

    pub fn len(&self) -> usize {
        self.id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take buffered rows as a RecordBatch, resetting internal state
    pub fn take_batch(&mut self) -> Result<RecordBatch, ArrowError> {
        let keywords = std::mem::take(&mut self.keywords);
        let hubs = std::mem::take(&mut self.hubs);
        let (keywords, hubs) = match self.layout {
            ColumnLayout::Nested => (build_list_array(keywords), build_list_array(hubs)),
            ColumnLayout::Flat => (build_json_array(keywords), build_json_array(hubs)),
        };

        let arrays: Vec<ArrayRef> = vec![
            Arc::new(UInt64Array::from(std::mem::take(&mut self.id))),
            Arc::new(StringArray::from(std::mem::take(&mut self.status))),
            Arc::new(StringArray::from(std::mem::take(&mut self.error))),
            Arc::new(StringArray::from(std::mem::take(&mut self.title))),
            Arc::new(StringArray::from(std::mem::take(&mut self.text))),
            keywords,
            Arc::new(StringArray::from(std::mem::take(&mut self.username))),
            hubs,
            Arc::new(StringArray::from(std::mem::take(&mut self.published_at))),
            Arc::new(UInt32Array::from(std::mem::take(&mut self.reading_time))),
        ];
        RecordBatch::try_new(self.layout.schema().clone(), arrays)
    }
}

/// Build List<Utf8> array from Vec<Option<Vec<String>>>
fn build_list_array(data: Vec<Option<Vec<String>>>) -> ArrayRef {
    let mut builder = ListBuilder::new(StringBuilder::new());
    for row in &data {
        match row {
            Some(items) => {
                for item in items {
                    builder.values().append_value(item);
                }
                builder.append(true);
            }
            None => builder.append(false),
        }
    }
    Arc::new(builder.finish())
}

/// Encode lists as JSON array strings for flat layouts
fn build_json_array(data: Vec<Option<Vec<String>>>) -> ArrayRef {
    let encoded: Vec<Option<String>> = data
        .into_iter()
        .map(|row| row.map(|items| serde_json::to_string(&items).unwrap_or_default()))
        .collect();
    Arc::new(StringArray::from(encoded))
}

/// Convenience: encode a slice of records in one batch.
pub fn records_to_batch(records: &[Record], layout: ColumnLayout) -> Result<RecordBatch, ArrowError> {
    let mut acc = RecordAccumulator::with_capacity(layout, records.len());
    for record in records {
        acc.push(record);
    }
    acc.take_batch()
}

enum ListColumn<'b> {
    Nested(&'b ListArray),
    Flat(&'b StringArray),
}

impl ListColumn<'_> {
    fn get(&self, row: usize) -> Result<Vec<String>, ExportError> {
        match self {
            Self::Nested(list) => {
                if list.is_null(row) {
                    return Ok(Vec::new());
                }
                let values = list.value(row);
                let strings = values
                    .as_string_opt::<i32>()
                    .ok_or_else(|| ExportError::Decode("list items are not strings".into()))?;
                Ok(strings.iter().flatten().map(str::to_string).collect())
            }
            Self::Flat(strings) => {
                if strings.is_null(row) {
                    return Ok(Vec::new());
                }
                Ok(serde_json::from_str(strings.value(row))?)
            }
        }
    }
}

fn column<'b>(batch: &'b RecordBatch, name: &str) -> Result<&'b ArrayRef, ExportError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| ExportError::Decode(format!("missing column '{name}'")))
}

fn string_column<'b>(batch: &'b RecordBatch, name: &str) -> Result<&'b StringArray, ExportError> {
    column(batch, name)?
        .as_string_opt::<i32>()
        .ok_or_else(|| ExportError::Decode(format!("column '{name}' is not Utf8")))
}

fn list_column<'b>(
    batch: &'b RecordBatch,
    name: &str,
    layout: ColumnLayout,
) -> Result<ListColumn<'b>, ExportError> {
    match layout {
        ColumnLayout::Flat => Ok(ListColumn::Flat(string_column(batch, name)?)),
        ColumnLayout::Nested => column(batch, name)?
            .as_list_opt::<i32>()
            .map(ListColumn::Nested)
            .ok_or_else(|| ExportError::Decode(format!("column '{name}' is not a list"))),
    }
}

fn optional(array: &StringArray, row: usize) -> Option<String> {
    array.is_valid(row).then(|| array.value(row).to_string())
}

/// Map a batch read back from an output file to records.
pub fn records_from_batch(
    batch: &RecordBatch,
    layout: ColumnLayout,
) -> Result<Vec<Record>, ExportError> {
    let id = column(batch, "id")?
        .as_primitive_opt::<UInt64Type>()
        .ok_or_else(|| ExportError::Decode("column 'id' is not UInt64".into()))?;
    let status = string_column(batch, "status")?;
    let error = string_column(batch, "error")?;
    let title = string_column(batch, "title")?;
    let text = string_column(batch, "text")?;
    let keywords = list_column(batch, "keywords", layout)?;
    let username = string_column(batch, "username")?;
    let hubs = list_column(batch, "hubs", layout)?;
    let published_at = string_column(batch, "published_at")?;
    let reading_time = column(batch, "reading_time")?
        .as_primitive_opt::<UInt32Type>()
        .ok_or_else(|| ExportError::Decode("column 'reading_time' is not UInt32".into()))?;

    let mut records = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let status_text = status.value(row);
        let status = RecordStatus::parse(status_text)
            .ok_or_else(|| ExportError::Decode(format!("unknown status '{status_text}'")))?;
        let page_id = id.value(row);

        let record = if status == RecordStatus::Ok {
            Record::article(
                page_id,
                Article {
                    title: optional(title, row).unwrap_or_default(),
                    text: optional(text, row).unwrap_or_default(),
                    keywords: keywords.get(row)?,
                    username: optional(username, row),
                    hubs: hubs.get(row)?,
                    published_at: optional(published_at, row),
                    reading_time: reading_time.is_valid(row).then(|| reading_time.value(row)),
                },
            )
        } else {
            Record::marker(page_id, status, optional(error, row).unwrap_or_default())
        };
        records.push(record);
    }
    Ok(records)
}
