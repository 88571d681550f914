//! Streaming CSV extraction
//!
//! [`StreamingExtractor`] turns an artifact's byte stream into
//! [`RawRowBatch`]es of at most `chunk_size` rows. Bytes are split into lines
//! as they arrive, so memory holds one chunk of body lines, the header and
//! whatever part of the current network read has not been consumed yet.
//!
//! Record ends are found with the same field rules the CSV reader applies: a
//! quote only opens a quoted field at the start of a field, so `5" screen`
//! is plain text while `"two\nlines"` keeps reading past the newline. A
//! quoted field that never closes fails once the record grows past
//! [`MAX_RECORD_BYTES`] instead of buffering the rest of the artifact.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, info};

use crate::error::{EtlError, EtlResult};
use crate::models::{RawRowBatch, Row};

/// Largest logical record accepted while a quoted field is still open
pub const MAX_RECORD_BYTES: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Reading,
    InputDone,
    Exhausted,
}

pub struct StreamingExtractor<S> {
    stream: S,
    chunk_size: usize,
    state: State,
    columns: Option<Vec<String>>,
    /// Bytes received but not yet split into lines
    carry: Vec<u8>,
    /// Logical row still waiting for its closing quote
    pending: Option<String>,
    max_record_bytes: usize,
    /// Complete body lines of the chunk being filled
    lines: Vec<String>,
    next_chunk_index: usize,
    physical_line: usize,
    rows_emitted: usize,
}

impl<S> StreamingExtractor<S>
where
    S: Stream<Item = EtlResult<Bytes>> + Unpin,
{
    pub fn new(stream: S, chunk_size: usize) -> Self {
        Self {
            stream,
            chunk_size: chunk_size.max(1),
            state: State::Reading,
            columns: None,
            carry: Vec::new(),
            pending: None,
            max_record_bytes: MAX_RECORD_BYTES,
            lines: Vec::new(),
            next_chunk_index: 1,
            physical_line: 0,
            rows_emitted: 0,
        }
    }

    /// Next batch, `Ok(None)` at end of input.
    ///
    /// After an error the extractor is exhausted and keeps returning
    /// `Ok(None)`; batches handed out earlier are unaffected.
    pub async fn next_batch(&mut self) -> EtlResult<Option<RawRowBatch>> {
        if self.state == State::Exhausted {
            return Ok(None);
        }

        match self.fill().await {
            Ok(batch) => {
                if batch.is_none() {
                    self.state = State::Exhausted;
                    info!(rows = self.rows_emitted, "Extraction finished");
                }
                Ok(batch)
            }
            Err(e) => {
                self.state = State::Exhausted;
                self.lines.clear();
                self.carry.clear();
                self.pending = None;
                Err(e)
            }
        }
    }

    /// Consume the extractor as a lazy stream of batches
    pub fn into_stream(self) -> impl Stream<Item = EtlResult<RawRowBatch>> {
        stream::unfold(self, |mut extractor| async move {
            match extractor.next_batch().await {
                Ok(Some(batch)) => Some((Ok(batch), extractor)),
                Ok(None) => None,
                Err(e) => Some((Err(e), extractor)),
            }
        })
    }

    async fn fill(&mut self) -> EtlResult<Option<RawRowBatch>> {
        loop {
            self.split_lines()?;

            if self.lines.len() >= self.chunk_size {
                return self.emit().map(Some);
            }

            if self.state == State::InputDone {
                self.finish_input()?;
                if self.lines.is_empty() {
                    return Ok(None);
                }
                return self.emit().map(Some);
            }

            match self.stream.next().await {
                Some(Ok(bytes)) => self.carry.extend_from_slice(&bytes),
                Some(Err(e)) => return Err(as_extraction(e)),
                None => self.state = State::InputDone,
            }
        }
    }

    /// Move complete lines out of `carry` until the chunk is full
    fn split_lines(&mut self) -> EtlResult<()> {
        let mut consumed = 0;

        while self.lines.len() < self.chunk_size {
            let Some(offset) = self.carry[consumed..].iter().position(|b| *b == b'\n') else {
                break;
            };
            let end = consumed + offset;
            let line = decode_line(&self.carry[consumed..end], self.physical_line + 1)?;
            consumed = end + 1;
            self.accept_line(line)?;
        }

        self.carry.drain(..consumed);
        Ok(())
    }

    /// Handle a final line without a terminator and any unclosed quote
    fn finish_input(&mut self) -> EtlResult<()> {
        if !self.carry.is_empty() {
            let rest = std::mem::take(&mut self.carry);
            let line = decode_line(&rest, self.physical_line + 1)?;
            self.accept_line(line)?;
        }

        if self.pending.is_some() {
            return Err(EtlError::extraction(format!(
                "unterminated quoted field at end of input (line {})",
                self.physical_line
            )));
        }

        Ok(())
    }

    fn accept_line(&mut self, line: String) -> EtlResult<()> {
        self.physical_line += 1;

        if let Some(mut pending) = self.pending.take() {
            pending.push('\n');
            pending.push_str(&line);
            if record_complete(&pending) {
                self.lines.push(pending);
            } else if pending.len() > self.max_record_bytes {
                return Err(EtlError::extraction(format!(
                    "quoted field still open at line {} after {} bytes",
                    self.physical_line,
                    pending.len()
                )));
            } else {
                self.pending = Some(pending);
            }
            return Ok(());
        }

        if line.trim().is_empty() {
            return Ok(());
        }

        if self.columns.is_none() {
            let columns = parse_header(line.trim_start_matches('\u{feff}'))?;
            debug!(columns = ?columns, "Captured header");
            self.columns = Some(columns);
            return Ok(());
        }

        if record_complete(&line) {
            self.lines.push(line);
        } else {
            self.pending = Some(line);
        }
        Ok(())
    }

    fn emit(&mut self) -> EtlResult<RawRowBatch> {
        let columns = self
            .columns
            .clone()
            .ok_or_else(|| EtlError::extraction("body rows found before a header"))?;
        let lines = std::mem::take(&mut self.lines);
        let first_row = self.rows_emitted + 1;

        let rows = parse_rows(&columns, &lines, first_row)?;

        let batch = RawRowBatch {
            chunk_index: self.next_chunk_index,
            columns,
            rows,
        };
        self.next_chunk_index += 1;
        self.rows_emitted += batch.len();

        debug!(
            chunk = batch.chunk_index,
            rows = batch.len(),
            "Extracted chunk"
        );
        Ok(batch)
    }
}

fn as_extraction(error: EtlError) -> EtlError {
    match error {
        EtlError::Extraction(_) => error,
        other => EtlError::extraction(other),
    }
}

fn decode_line(raw: &[u8], line_number: usize) -> EtlResult<String> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8(raw.to_vec())
        .map_err(|e| EtlError::extraction(format!("line {line_number} is not valid UTF-8: {e}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Start,
    Unquoted,
    Quoted,
    /// Just saw a quote inside a quoted field: either an escape or the close
    QuoteInQuoted,
}

/// Whether a newline after `record` would end it.
///
/// Mirrors the non-strict reader: text after a closing quote joins the field
/// unquoted, and a quote in the middle of an unquoted field is literal.
fn record_complete(record: &str) -> bool {
    let end = record.bytes().fold(Field::Start, |field, b| match (field, b) {
        (_, b',') if field != Field::Quoted => Field::Start,
        (Field::Start, b'"') => Field::Quoted,
        (Field::Start | Field::Unquoted, _) => Field::Unquoted,
        (Field::Quoted, b'"') => Field::QuoteInQuoted,
        (Field::Quoted, _) => Field::Quoted,
        (Field::QuoteInQuoted, b'"') => Field::Quoted,
        (Field::QuoteInQuoted, _) => Field::Unquoted,
    });
    end != Field::Quoted
}

fn reader(input: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input.as_bytes())
}

fn parse_header(line: &str) -> EtlResult<Vec<String>> {
    let record = reader(line)
        .records()
        .next()
        .transpose()
        .map_err(|e| EtlError::extraction(format!("invalid header: {e}")))?
        .ok_or_else(|| EtlError::extraction("empty header"))?;

    Ok(record.iter().map(|name| name.trim().to_string()).collect())
}

fn parse_rows(columns: &[String], lines: &[String], first_row: usize) -> EtlResult<Vec<Row>> {
    let body = lines.join("\n");
    let mut rows = Vec::with_capacity(lines.len());

    for (offset, record) in reader(&body).records().enumerate() {
        let row_number = first_row + offset;
        let record = record
            .map_err(|e| EtlError::extraction(format!("row {row_number}: {e}")))?;

        if record.len() != columns.len() {
            return Err(EtlError::extraction(format!(
                "row {row_number}: expected {} fields, found {}",
                columns.len(),
                record.len()
            )));
        }

        rows.push(
            columns
                .iter()
                .zip(record.iter())
                .filter(|(_, value)| !value.is_empty())
                .map(|(column, value)| (column.clone(), value.to_string()))
                .collect(),
        );
    }

    if rows.len() != lines.len() {
        return Err(EtlError::extraction(format!(
            "rows {first_row}..{}: parsed {} records from {} lines",
            first_row + lines.len(),
            rows.len(),
            lines.len()
        )));
    }

    Ok(rows)
}
