//! # Line-Buffered Stream Reader
//!
//! Adapts a stream of arbitrarily-split byte chunks from a ranged object
//! store read into a stream of raw lines. This is what lets a worker walk a
//! multi-gigabyte eligibility file while holding only one network chunk and
//! one partial line in memory.
//!
//! ## Guarantees
//!
//! - Every yielded line includes its trailing `\n` (and preceding `\r` if
//!   present); the final line may lack one. Concatenating every yielded line
//!   reproduces the read bytes exactly, so no partial trailing data is ever
//!   dropped.
//! - Memory is bounded by the longest line plus one upstream chunk,
//!   independent of total object size. [`LineStream::peak_buffered`] exposes
//!   the high-water mark so tests and telemetry can hold the line on this.
//! - A line longer than `max_line_bytes` terminates the stream with
//!   [`StorageError::LineTooLong`] instead of buffering without bound; a
//!   newline-free multi-gigabyte object must not look like a line.
//!
//! After yielding any error the stream is fused and yields `None`; buffered
//! partial data is dropped because the range read is no longer trustworthy.
//!
//! ## Usage
//!
//! ```rust
//! use eligibility_core::pipeline::LineStream;
//! use eligibility_core::storage::StorageError;
//! use futures::{stream, StreamExt};
//!
//! # tokio_test::block_on(async {
//! // Chunk boundaries land mid-line; the splitter reassembles.
//! let chunks = vec![b"id,na".to_vec(), b"me\n1,ann\n".to_vec()];
//! let mut lines = LineStream::new(stream::iter(chunks.into_iter().map(Ok::<_, StorageError>)));
//!
//! assert_eq!(lines.next().await.unwrap().unwrap(), b"id,name\n");
//! assert_eq!(lines.next().await.unwrap().unwrap(), b"1,ann\n");
//! assert!(lines.next().await.is_none());
//! # });
//! ```

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

use crate::constants::defaults;
use crate::storage::StorageError;

/// Streaming splitter from byte chunks to raw lines.
pub struct LineStream<S> {
    inner: S,
    buffer: Vec<u8>,
    /// Resume point for the newline scan; bytes before it are known clean.
    scan_from: usize,
    /// Bytes emitted so far, i.e. the offset of the current line relative to
    /// the start of the underlying range.
    consumed: u64,
    peak_buffered: usize,
    max_line_bytes: usize,
    done: bool,
    failed: bool,
}

impl<S> LineStream<S>
where
    S: Stream<Item = Result<Vec<u8>, StorageError>> + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self::with_max_line_bytes(inner, defaults::MAX_LINE_BYTES)
    }

    pub fn with_max_line_bytes(inner: S, max_line_bytes: usize) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            scan_from: 0,
            consumed: 0,
            peak_buffered: 0,
            max_line_bytes: max_line_bytes.max(1),
            done: false,
            failed: false,
        }
    }

    /// Bytes currently buffered (at most one partial line plus the tail of
    /// the last upstream chunk).
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// High-water mark of the internal buffer over the stream's lifetime.
    pub fn peak_buffered(&self) -> usize {
        self.peak_buffered
    }

    /// Bytes emitted as lines so far.
    pub fn consumed_bytes(&self) -> u64 {
        self.consumed
    }
}

impl<S> Stream for LineStream<S>
where
    S: Stream<Item = Result<Vec<u8>, StorageError>> + Unpin,
{
    type Item = Result<Vec<u8>, StorageError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.failed {
                return Poll::Ready(None);
            }

            // Scan only bytes that arrived since the last pass.
            if let Some(pos) = this.buffer[this.scan_from..]
                .iter()
                .position(|&b| b == b'\n')
            {
                let line_end = this.scan_from + pos + 1;
                if line_end > this.max_line_bytes {
                    this.failed = true;
                    return Poll::Ready(Some(Err(StorageError::LineTooLong {
                        offset: this.consumed,
                        length: line_end,
                        limit: this.max_line_bytes,
                    })));
                }
                let line: Vec<u8> = this.buffer.drain(..line_end).collect();
                this.scan_from = 0;
                this.consumed += line.len() as u64;
                return Poll::Ready(Some(Ok(line)));
            }
            this.scan_from = this.buffer.len();

            if this.buffer.len() > this.max_line_bytes {
                this.failed = true;
                return Poll::Ready(Some(Err(StorageError::LineTooLong {
                    offset: this.consumed,
                    length: this.buffer.len(),
                    limit: this.max_line_bytes,
                })));
            }

            if this.done {
                if this.buffer.is_empty() {
                    return Poll::Ready(None);
                }
                let line = std::mem::take(&mut this.buffer);
                this.scan_from = 0;
                this.consumed += line.len() as u64;
                return Poll::Ready(Some(Ok(line)));
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    if !chunk.is_empty() {
                        this.buffer.extend_from_slice(&chunk);
                        if this.buffer.len() > this.peak_buffered {
                            this.peak_buffered = this.buffer.len();
                        }
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    this.failed = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Whether a raw line contains nothing but whitespace (including its
/// terminator). Used to drop file-trailing padding lines.
pub fn is_blank_line(line: &[u8]) -> bool {
    line.iter().all(|b| b.is_ascii_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{stream, StreamExt};
    use proptest::prelude::*;

    fn chunked(chunks: Vec<&'static [u8]>) -> impl Stream<Item = Result<Vec<u8>, StorageError>> + Unpin {
        stream::iter(chunks.into_iter().map(|c| Ok(c.to_vec())))
    }

    async fn collect_lines<S>(mut lines: LineStream<S>) -> (Vec<Vec<u8>>, usize)
    where
        S: Stream<Item = Result<Vec<u8>, StorageError>> + Unpin,
    {
        let mut out = Vec::new();
        while let Some(line) = lines.next().await {
            out.push(line.expect("line stream failed"));
        }
        let peak = lines.peak_buffered();
        (out, peak)
    }

    #[tokio::test]
    async fn splits_lines_across_chunk_boundaries() {
        let lines = LineStream::new(chunked(vec![b"he", b"llo\nwor", b"ld\n"]));
        let (lines, _) = collect_lines(lines).await;
        assert_eq!(lines, vec![b"hello\n".to_vec(), b"world\n".to_vec()]);
    }

    #[tokio::test]
    async fn final_line_without_newline_is_yielded() {
        let lines = LineStream::new(chunked(vec![b"a\nb\nc"]));
        let (lines, _) = collect_lines(lines).await;
        assert_eq!(
            lines,
            vec![b"a\n".to_vec(), b"b\n".to_vec(), b"c".to_vec()]
        );
    }

    #[tokio::test]
    async fn preserves_crlf_and_blank_lines() {
        let lines = LineStream::new(chunked(vec![b"a\r\n", b"\r\n", b"b"]));
        let (lines, _) = collect_lines(lines).await;
        assert_eq!(
            lines,
            vec![b"a\r\n".to_vec(), b"\r\n".to_vec(), b"b".to_vec()]
        );
    }

    #[tokio::test]
    async fn empty_input_yields_nothing() {
        let lines = LineStream::new(chunked(vec![]));
        let (lines, _) = collect_lines(lines).await;
        assert!(lines.is_empty());

        let lines = LineStream::new(chunked(vec![b"", b""]));
        let (lines, _) = collect_lines(lines).await;
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn memory_stays_bounded_by_longest_line_plus_chunk() {
        // 64 KiB of short lines with one 4 KiB line in the middle, delivered
        // in 1 KiB chunks. The buffer must track the longest line, not the
        // object size.
        let mut data = Vec::new();
        for i in 0..2000 {
            data.extend_from_slice(format!("member-{i:07}\n").as_bytes());
        }
        let long_line = vec![b'x'; 4096];
        data.extend_from_slice(&long_line);
        data.push(b'\n');
        for i in 0..2000 {
            data.extend_from_slice(format!("member-{i:07}\n").as_bytes());
        }
        let total = data.len();

        let chunks: Vec<Result<Vec<u8>, StorageError>> =
            data.chunks(1024).map(|c| Ok(c.to_vec())).collect();
        let lines = LineStream::new(stream::iter(chunks));
        let (lines, peak) = collect_lines(lines).await;

        let reassembled: Vec<u8> = lines.concat();
        assert_eq!(reassembled.len(), total);
        assert!(
            peak <= 4096 + 1 + 1024,
            "peak buffer {peak} exceeds longest line plus one chunk"
        );
    }

    #[tokio::test]
    async fn oversized_line_fails_instead_of_buffering() {
        let data = vec![b'x'; 4096];
        let chunks: Vec<Result<Vec<u8>, StorageError>> =
            data.chunks(256).map(|c| Ok(c.to_vec())).collect();
        let mut lines = LineStream::with_max_line_bytes(stream::iter(chunks), 1024);

        let mut saw_error = false;
        while let Some(item) = lines.next().await {
            match item {
                Ok(_) => panic!("no complete line should be yielded"),
                Err(StorageError::LineTooLong { limit, .. }) => {
                    assert_eq!(limit, 1024);
                    saw_error = true;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(saw_error);
        // Fused after failure
        assert!(lines.next().await.is_none());
    }

    #[tokio::test]
    async fn upstream_errors_propagate_and_fuse() {
        let chunks: Vec<Result<Vec<u8>, StorageError>> = vec![
            Ok(b"complete\n".to_vec()),
            Ok(b"partial".to_vec()),
            Err(StorageError::backend("connection reset")),
        ];
        let mut lines = LineStream::new(stream::iter(chunks));

        assert_eq!(lines.next().await.unwrap().unwrap(), b"complete\n".to_vec());
        assert!(matches!(
            lines.next().await,
            Some(Err(StorageError::Backend { .. }))
        ));
        assert!(lines.next().await.is_none());
    }

    #[test]
    fn blank_line_detection() {
        assert!(is_blank_line(b"\n"));
        assert!(is_blank_line(b"\r\n"));
        assert!(is_blank_line(b"   \t \n"));
        assert!(is_blank_line(b""));
        assert!(!is_blank_line(b" x \n"));
    }

    proptest! {
        /// Concatenating the yielded lines reproduces the input bytes for any
        /// payload under any chunking.
        #[test]
        fn reassembly_law(
            data in proptest::collection::vec(any::<u8>(), 0..2048),
            chunk_sizes in proptest::collection::vec(1usize..64, 1..32),
        ) {
            let mut chunks = Vec::new();
            let mut rest = data.as_slice();
            let mut i = 0;
            while !rest.is_empty() {
                let take = chunk_sizes[i % chunk_sizes.len()].min(rest.len());
                chunks.push(Ok(rest[..take].to_vec()));
                rest = &rest[take..];
                i += 1;
            }

            let lines = LineStream::new(stream::iter(chunks));
            let collected: Vec<Vec<u8>> = futures::executor::block_on(async {
                use futures::StreamExt;
                lines.map(|l| l.expect("no errors in this stream")).collect().await
            });

            let reassembled: Vec<u8> = collected.concat();
            prop_assert_eq!(reassembled, data);

            // No yielded line contains an interior newline
            for line in &collected {
                let interior = &line[..line.len().saturating_sub(1)];
                prop_assert!(!interior.contains(&b'\n'));
            }
        }
    }
}
