//! # Chunk Reader
//!
//! Turns one planned byte range back into records. Workers hand this the
//! headers from the chunk plan plus an inclusive `[start_byte, end_byte]`
//! range; it streams just that slice from the object store, splits it into
//! lines, and maps each line's fields onto the headers positionally.
//!
//! Rows shorter than the header list get empty strings for the missing
//! trailing columns; surplus fields beyond the header list are ignored.
//! Field values are not trimmed. Bytes that are not valid UTF-8 decode
//! lossily, so a stray encoding glitch in one row surfaces as replacement
//! characters in that row's record instead of failing the whole chunk.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, instrument};

use crate::config::PipelineConfig;
use crate::processing::FileRecord;
use crate::storage::{ObjectStore, StorageError};

use super::line_stream::{is_blank_line, LineStream};

/// Decode a raw line (terminator included) into a `String`, dropping the
/// trailing `\n` / `\r\n`.
pub(crate) fn decode_line(line: &[u8]) -> String {
    let mut end = line.len();
    if end > 0 && line[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && line[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&line[..end]).into_owned()
}

/// Split a decoded line on the configured delimiter. No quoting rules; the
/// feed format is plain delimited text.
pub(crate) fn split_fields(line: &str, delimiter: char) -> Vec<String> {
    line.split(delimiter).map(str::to_string).collect()
}

/// Reads one chunk's byte range and materializes its records.
#[derive(Debug, Clone)]
pub struct ChunkReader {
    objects: Arc<dyn ObjectStore>,
    config: PipelineConfig,
}

impl ChunkReader {
    pub fn new(objects: Arc<dyn ObjectStore>, config: PipelineConfig) -> Self {
        Self { objects, config }
    }

    /// Read the records in `[start_byte, end_byte]` of `storage_key`. Blank
    /// lines at the tail of the range are dropped to mirror how the planner
    /// counted rows; interior blanks come back as records so their row-level
    /// failures stay visible.
    #[instrument(skip(self, headers), fields(storage_key = storage_key, start_byte = start_byte, end_byte = end_byte))]
    pub async fn read(
        &self,
        storage_key: &str,
        headers: &[String],
        start_byte: u64,
        end_byte: u64,
    ) -> Result<Vec<FileRecord>, StorageError> {
        let byte_stream = self
            .objects
            .read_range(storage_key, start_byte, end_byte)
            .await?;
        let mut lines =
            LineStream::with_max_line_bytes(byte_stream, self.config.max_line_bytes);

        let mut raw_lines: Vec<Vec<u8>> = Vec::new();
        while let Some(line) = lines.next().await {
            raw_lines.push(line?);
        }
        while raw_lines.last().is_some_and(|line| is_blank_line(line)) {
            raw_lines.pop();
        }

        let records = raw_lines
            .iter()
            .map(|line| self.build_record(headers, line))
            .collect::<Vec<_>>();

        debug!(records = records.len(), "chunk range decoded");
        Ok(records)
    }

    fn build_record(&self, headers: &[String], line: &[u8]) -> FileRecord {
        let raw = decode_line(line);
        let values = split_fields(&raw, self.config.delimiter);

        let mut fields = HashMap::with_capacity(headers.len());
        for (index, header) in headers.iter().enumerate() {
            let value = values.get(index).cloned().unwrap_or_default();
            fields.insert(header.clone(), value);
        }

        FileRecord { fields, raw }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;

    fn reader_over(data: &[u8]) -> (ChunkReader, &'static str) {
        let store = MemoryObjectStore::with_read_chunk_bytes(5);
        store.insert("feed.csv", data.to_vec());
        (
            ChunkReader::new(Arc::new(store), PipelineConfig::default()),
            "feed.csv",
        )
    }

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn maps_fields_onto_headers() {
        let data = b"id,name\n1,ann\n2,bob\n";
        let (reader, key) = reader_over(data);

        let records = reader
            .read(key, &headers(&["id", "name"]), 8, data.len() as u64 - 1)
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("id"), Some("1"));
        assert_eq!(records[0].get("name"), Some("ann"));
        assert_eq!(records[0].raw, "1,ann");
        assert_eq!(records[1].get("name"), Some("bob"));
    }

    #[tokio::test]
    async fn reads_only_the_requested_range() {
        let data = b"id\n1\n2\n3\n4\n";
        let (reader, key) = reader_over(data);

        // Bytes 5..=8 cover exactly "2\n3\n"
        let records = reader.read(key, &headers(&["id"]), 5, 8).await.unwrap();
        let ids: Vec<_> = records.iter().filter_map(|r| r.get("id")).collect();
        assert_eq!(ids, vec!["2", "3"]);
    }

    #[tokio::test]
    async fn short_rows_fill_missing_columns_with_empty_strings() {
        let data = b"a,b,c\n1,2\n";
        let (reader, key) = reader_over(data);

        let records = reader
            .read(key, &headers(&["a", "b", "c"]), 6, data.len() as u64 - 1)
            .await
            .unwrap();

        assert_eq!(records[0].get("a"), Some("1"));
        assert_eq!(records[0].get("b"), Some("2"));
        assert_eq!(records[0].get("c"), Some(""));
    }

    #[tokio::test]
    async fn surplus_fields_are_ignored() {
        let data = b"a\n1,2,3\n";
        let (reader, key) = reader_over(data);

        let records = reader
            .read(key, &headers(&["a"]), 2, data.len() as u64 - 1)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("a"), Some("1"));
        assert_eq!(records[0].raw, "1,2,3");
    }

    #[tokio::test]
    async fn range_trailing_blanks_are_dropped_interior_kept() {
        let data = b"a\n1\n\n2\n\n\n";
        let (reader, key) = reader_over(data);

        let records = reader
            .read(key, &headers(&["a"]), 2, data.len() as u64 - 1)
            .await
            .unwrap();

        // "1", blank interior, "2"; the two trailing blanks vanish
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].get("a"), Some("1"));
        assert_eq!(records[1].raw, "");
        assert_eq!(records[2].get("a"), Some("2"));
    }

    #[tokio::test]
    async fn crlf_terminators_are_stripped_from_raw() {
        let data = b"a,b\r\n1,x\r\n";
        let (reader, key) = reader_over(data);

        let records = reader
            .read(key, &headers(&["a", "b"]), 5, data.len() as u64 - 1)
            .await
            .unwrap();

        assert_eq!(records[0].raw, "1,x");
        assert_eq!(records[0].get("b"), Some("x"));
    }

    #[tokio::test]
    async fn invalid_utf8_decodes_lossily() {
        let data = b"a\n\xff\xfe\n";
        let (reader, key) = reader_over(data);

        let records = reader
            .read(key, &headers(&["a"]), 2, data.len() as u64 - 1)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert!(records[0].raw.contains('\u{FFFD}'));
    }
}
