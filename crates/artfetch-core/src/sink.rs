//! Output sink: one file per run, appended batch by batch
//!
//! Data goes to `<target>.tmp` and is renamed to the target on finalize.
//! Serialization ([`OutputSink::encode`]) needs no lock and may run on any
//! number of workers; appends ([`OutputSink::append`]) are serialized by the
//! sink's mutex so batches never interleave inside the file.
//!
//! CSV and JSON appends roll back on failure. A failed Parquet append
//! poisons the sink: later appends and finalize fail, and no file with a
//! missing footer is ever renamed to the target.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use arrow::array::RecordBatch;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use regex::Regex;

use crate::accumulator::{records_from_batch, records_to_batch};
use crate::config::ExportFormat;
use crate::error::ExportError;
use crate::record::Record;
use crate::schema::{ColumnLayout, COLUMNS, FLAT_RECORDS, RECORDS};

/// CSV cell for a missing value, so an empty string survives a round trip
const CSV_NULL: &str = "\\N";

/// A batch serialized for one format, ready to append.
#[derive(Debug)]
pub struct Encoded {
    rows: usize,
    body: EncodedBody,
}

#[derive(Debug)]
enum EncodedBody {
    /// CSV rows or comma-joined JSON objects
    Text(Vec<u8>),
    Arrow(RecordBatch),
}

impl Encoded {
    pub const fn rows(&self) -> usize {
        self.rows
    }
}

enum SinkWriter {
    Csv { file: File },
    Json { file: File, records: usize },
    Parquet { writer: ArrowWriter<File> },
}

impl SinkWriter {
    fn append(&mut self, encoded: Encoded) -> Result<(), ExportError> {
        match (self, encoded.body) {
            (Self::Csv { file }, EncodedBody::Text(body)) => {
                write_all_or_rollback(file, &[&body])?;
            }
            (Self::Json { file, records }, EncodedBody::Text(body)) => {
                let sep: &[u8] = if *records == 0 { b"" } else { b",\n" };
                write_all_or_rollback(file, &[sep, &body])?;
                *records += encoded.rows;
            }
            (Self::Parquet { writer }, EncodedBody::Arrow(batch)) => {
                writer.write(&batch)?;
                // Close the row group so a later failure cannot take this batch with it
                writer.flush()?;
            }
            _ => {
                return Err(ExportError::Decode(
                    "encoded batch does not match sink format".to_string(),
                ))
            }
        }
        Ok(())
    }

    /// A failed append leaves the file as it was
    const fn rolls_back(&self) -> bool {
        !matches!(self, Self::Parquet { .. })
    }

    fn close(self) -> Result<(), ExportError> {
        match self {
            Self::Csv { mut file } => file.flush()?,
            Self::Json { mut file, records } => {
                let tail: &[u8] = if records == 0 { b"]\n" } else { b"\n]\n" };
                file.write_all(tail)?;
                file.flush()?;
            }
            Self::Parquet { writer } => {
                writer.close()?;
            }
        }
        Ok(())
    }
}

/// Output that can be cut back to a given length.
trait Truncate: Write + Seek {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append `chunks` completely or truncate the output back to where it was.
fn write_all_or_rollback<W: Truncate>(out: &mut W, chunks: &[&[u8]]) -> io::Result<()> {
    let start = out.stream_position()?;
    if let Err(e) = chunks.iter().try_for_each(|chunk| out.write_all(chunk)) {
        out.truncate(start)?;
        out.seek(SeekFrom::Start(start))?;
        return Err(e);
    }
    Ok(())
}

struct SinkState {
    writer: Option<SinkWriter>,
    rows: usize,
    poisoned: Option<String>,
}

/// Single-writer output file for one run.
pub struct OutputSink {
    format: ExportFormat,
    tmp_path: PathBuf,
    final_path: PathBuf,
    state: Mutex<SinkState>,
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink")
            .field("format", &self.format)
            .field("final_path", &self.final_path)
            .finish_non_exhaustive()
    }
}

/// `<path>.tmp`
pub fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

impl OutputSink {
    /// Create the sink, writing to a temporary file next to `final_path`.
    ///
    /// A stale temporary file from an interrupted run is removed first.
    pub fn create(
        final_path: &Path,
        format: ExportFormat,
        zstd_level: i32,
    ) -> Result<Self, ExportError> {
        let tmp_path = tmp_path_for(final_path);
        if tmp_path.exists() {
            log::warn!("Removing stale tmp file: {}", tmp_path.display());
            fs::remove_file(&tmp_path)?;
        }

        let mut file = File::create(&tmp_path)?;
        let writer = match format {
            ExportFormat::Csv => {
                let header = format!("{}\n", COLUMNS.join(","));
                file.write_all(header.as_bytes())?;
                SinkWriter::Csv { file }
            }
            ExportFormat::Json => {
                file.write_all(b"[\n")?;
                SinkWriter::Json { file, records: 0 }
            }
            ExportFormat::Parquet => {
                let level = ZstdLevel::try_new(zstd_level)?;
                let props = WriterProperties::builder()
                    .set_compression(Compression::ZSTD(level))
                    .build();
                let writer = ArrowWriter::try_new(file, RECORDS.clone(), Some(props))?;
                SinkWriter::Parquet { writer }
            }
        };
        log::debug!("Opened {format} sink at {}", tmp_path.display());

        Ok(Self {
            format,
            tmp_path,
            final_path: final_path.to_path_buf(),
            state: Mutex::new(SinkState {
                writer: Some(writer),
                rows: 0,
                poisoned: None,
            }),
        })
    }

    pub const fn format(&self) -> ExportFormat {
        self.format
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    /// Serialize `records` for this sink's format. Lock-free.
    pub fn encode(&self, records: &[Record]) -> Result<Encoded, ExportError> {
        let body = match self.format {
            ExportFormat::Csv => {
                let batch = records_to_batch(records, ColumnLayout::Flat)?;
                let mut buf = Vec::new();
                {
                    let mut writer = WriterBuilder::new()
                        .with_header(false)
                        .with_null(CSV_NULL.to_string())
                        .build(&mut buf);
                    writer.write(&batch)?;
                }
                EncodedBody::Text(buf)
            }
            ExportFormat::Json => {
                let mut buf = Vec::new();
                for (i, record) in records.iter().enumerate() {
                    if i > 0 {
                        buf.extend_from_slice(b",\n");
                    }
                    serde_json::to_writer(&mut buf, record)?;
                }
                EncodedBody::Text(buf)
            }
            ExportFormat::Parquet => {
                EncodedBody::Arrow(records_to_batch(records, ColumnLayout::Nested)?)
            }
        };
        Ok(Encoded {
            rows: records.len(),
            body,
        })
    }

    /// Append an encoded batch. Either the whole batch lands or the file is
    /// left as it was.
    pub fn append(&self, encoded: Encoded) -> Result<usize, ExportError> {
        if encoded.rows == 0 {
            return Ok(0);
        }
        let rows = encoded.rows;
        let mut state = self.state.lock().expect("output sink poisoned");
        if let Some(reason) = &state.poisoned {
            return Err(ExportError::Poisoned(reason.clone()));
        }
        let writer = state.writer.as_mut().ok_or(ExportError::Closed)?;
        let rolls_back = writer.rolls_back();
        if let Err(e) = writer.append(encoded) {
            if !rolls_back {
                log::error!("{} sink unusable after failed append: {e}", self.format);
                state.poisoned = Some(e.to_string());
            }
            return Err(e);
        }
        state.rows += rows;
        Ok(rows)
    }

    /// Encode and append in one step.
    pub fn write(&self, records: &[Record]) -> Result<usize, ExportError> {
        self.append(self.encode(records)?)
    }

    /// Rows appended so far
    pub fn rows(&self) -> usize {
        self.state.lock().expect("output sink poisoned").rows
    }

    /// Close the file and atomically rename tmp → final. Returns rows written.
    ///
    /// A poisoned sink is closed without writing a footer and the target is
    /// left untouched.
    pub fn finalize(&self) -> Result<usize, ExportError> {
        let (writer, rows) = {
            let mut state = self.state.lock().expect("output sink poisoned");
            let writer = state.writer.take().ok_or(ExportError::Closed)?;
            if let Some(reason) = &state.poisoned {
                drop(writer);
                log::warn!("Leaving incomplete output at {}", self.tmp_path.display());
                return Err(ExportError::Poisoned(reason.clone()));
            }
            (writer, state.rows)
        };
        writer.close()?;
        fs::rename(&self.tmp_path, &self.final_path)?;
        log::debug!("Finalized {} ({rows} rows)", self.final_path.display());
        Ok(rows)
    }
}

/// Read every record back from an output file.
pub fn read_records(path: &Path, format: ExportFormat) -> Result<Vec<Record>, ExportError> {
    let file = File::open(path)?;
    match format {
        ExportFormat::Json => Ok(serde_json::from_reader(BufReader::new(file))?),
        ExportFormat::Csv => {
            let null = Regex::new(&format!("^{}$", regex::escape(CSV_NULL)))
                .map_err(|e| ExportError::Decode(e.to_string()))?;
            let reader = ReaderBuilder::new(FLAT_RECORDS.clone())
                .with_header(true)
                .with_null_regex(null)
                .build(BufReader::new(file))?;
            let mut records = Vec::new();
            for batch in reader {
                records.extend(records_from_batch(&batch?, ColumnLayout::Flat)?);
            }
            Ok(records)
        }
        ExportFormat::Parquet => {
            let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
            let mut records = Vec::new();
            for batch in reader {
                records.extend(records_from_batch(&batch?, ColumnLayout::Nested)?);
            }
            Ok(records)
        }
    }
}
