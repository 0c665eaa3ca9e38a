//! # Chunk Planner
//!
//! The single streaming pass over an uploaded file that produces everything
//! the orchestrator needs to dispatch work: the header list, the total data
//! row count, and byte boundaries slicing the file into chunks of at most
//! `chunk_size` rows. Boundaries land exactly on line boundaries, so workers
//! reading `[start_byte, end_byte]` see whole lines and nothing else.
//!
//! Blank lines at the end of the file (trailing newline padding from export
//! tools) are excluded from the row count and from every chunk range. Blank
//! lines in the interior still count as rows; they flow to the processor and
//! fail row-level validation there, which keeps the planner's count equal to
//! what chunk readers will actually yield.

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::PipelineConfig;
use crate::error::{IngestError, Result};
use crate::storage::ObjectStore;

use super::chunk_reader::{decode_line, split_fields};
use super::line_stream::{is_blank_line, LineStream};

/// Inclusive byte range holding at most `chunk_size` data rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkBoundary {
    /// 1-indexed position of this chunk within the batch.
    pub chunk_number: i32,
    pub start_byte: u64,
    pub end_byte: u64,
}

/// Everything the scan learned about an uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPlan {
    /// Trimmed header cells in file order; workers map fields positionally.
    pub headers: Vec<String>,
    /// Total data rows chunk workers will process.
    pub num_rows: i64,
    pub boundaries: Vec<ChunkBoundary>,
}

/// Accumulates counted lines into chunk boundaries. Blank lines buffer in
/// `pending_blanks` until a later non-blank line proves they are interior;
/// whatever is still pending at end of file is dropped.
struct BoundaryBuilder {
    chunk_size: usize,
    boundaries: Vec<ChunkBoundary>,
    num_rows: i64,
    current_start: Option<u64>,
    rows_in_chunk: usize,
    last_counted_end: u64,
    pending_blanks: Vec<(u64, usize)>,
}

impl BoundaryBuilder {
    fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            boundaries: Vec::new(),
            num_rows: 0,
            current_start: None,
            rows_in_chunk: 0,
            last_counted_end: 0,
            pending_blanks: Vec::new(),
        }
    }

    fn push_line(&mut self, start: u64, len: usize, blank: bool) {
        if blank {
            self.pending_blanks.push((start, len));
            return;
        }
        let pending = std::mem::take(&mut self.pending_blanks);
        for (blank_start, blank_len) in pending {
            self.count(blank_start, blank_len);
        }
        self.count(start, len);
    }

    fn count(&mut self, start: u64, len: usize) {
        let chunk_start = match self.current_start {
            Some(existing) => existing,
            None => {
                self.current_start = Some(start);
                self.rows_in_chunk = 0;
                start
            }
        };

        self.rows_in_chunk += 1;
        self.num_rows += 1;
        self.last_counted_end = start + len as u64 - 1;

        if self.rows_in_chunk >= self.chunk_size {
            self.boundaries.push(ChunkBoundary {
                chunk_number: self.boundaries.len() as i32 + 1,
                start_byte: chunk_start,
                end_byte: self.last_counted_end,
            });
            self.current_start = None;
            self.rows_in_chunk = 0;
        }
    }

    fn finish(mut self) -> (i64, Vec<ChunkBoundary>) {
        // Anything still pending here was file-trailing padding.
        if let Some(start) = self.current_start {
            self.boundaries.push(ChunkBoundary {
                chunk_number: self.boundaries.len() as i32 + 1,
                start_byte: start,
                end_byte: self.last_counted_end,
            });
        }
        (self.num_rows, self.boundaries)
    }
}

/// Streaming scanner producing a [`ChunkPlan`] in one pass.
#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    objects: Arc<dyn ObjectStore>,
    config: PipelineConfig,
}

impl ChunkPlanner {
    pub fn new(objects: Arc<dyn ObjectStore>, config: PipelineConfig) -> Self {
        Self { objects, config }
    }

    /// Scan the object at `storage_key` and derive the chunk plan. The whole
    /// file streams through the line reader; memory stays at one line plus
    /// one read chunk regardless of file size.
    #[instrument(skip(self), fields(batch_upload_id = batch_upload_id, storage_key = storage_key))]
    pub async fn scan(&self, batch_upload_id: i64, storage_key: &str) -> Result<ChunkPlan> {
        if !self.objects.exists(storage_key).await? {
            return Err(IngestError::planning(
                batch_upload_id,
                format!("uploaded object '{storage_key}' does not exist"),
            ));
        }

        let byte_stream = self.objects.read_range(storage_key, 0, u64::MAX).await?;
        let mut lines =
            LineStream::with_max_line_bytes(byte_stream, self.config.max_line_bytes);

        let mut offset: u64 = 0;
        let mut headers: Option<Vec<String>> = None;
        let mut builder = BoundaryBuilder::new(self.config.chunk_size);

        while let Some(line) = lines.next().await {
            let line = line?;
            let start = offset;
            offset += line.len() as u64;

            match &headers {
                None => {
                    headers = Some(self.parse_headers(batch_upload_id, &line)?);
                }
                Some(_) => builder.push_line(start, line.len(), is_blank_line(&line)),
            }
        }

        let headers = headers.ok_or_else(|| {
            IngestError::planning(batch_upload_id, "file is empty; expected a header line")
        })?;
        let (num_rows, boundaries) = builder.finish();

        info!(
            batch_upload_id = batch_upload_id,
            num_rows = num_rows,
            num_chunks = boundaries.len(),
            scanned_bytes = offset,
            "file scan complete"
        );
        debug!(headers = ?headers, "parsed header line");

        Ok(ChunkPlan {
            headers,
            num_rows,
            boundaries,
        })
    }

    fn parse_headers(&self, batch_upload_id: i64, line: &[u8]) -> Result<Vec<String>> {
        if is_blank_line(line) {
            return Err(IngestError::planning(
                batch_upload_id,
                "header line is blank",
            ));
        }
        let decoded = decode_line(line);
        let headers: Vec<String> = split_fields(&decoded, self.config.delimiter)
            .into_iter()
            .map(|cell| cell.trim().to_string())
            .collect();
        if headers.iter().all(String::is_empty) {
            return Err(IngestError::planning(
                batch_upload_id,
                "header line contains no column names",
            ));
        }
        Ok(headers)
    }
}
