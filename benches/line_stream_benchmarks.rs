use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use futures::{executor::block_on, stream, StreamExt};

use eligibility_core::pipeline::LineStream;
use eligibility_core::storage::StorageError;

/// Build a synthetic feed of `rows` CSV lines delivered in `chunk_bytes`
/// pieces, the shape the object store hands the pipeline.
fn chunked_feed(rows: usize, chunk_bytes: usize) -> Vec<Vec<u8>> {
    let mut data = Vec::with_capacity(rows * 32);
    data.extend_from_slice(b"member_id,first_name,last_name,dob\n");
    for row in 0..rows {
        data.extend_from_slice(
            format!("M{row:08},First{row},Last{row},1990-01-01\n").as_bytes(),
        );
    }
    data.chunks(chunk_bytes).map(|chunk| chunk.to_vec()).collect()
}

fn drain_lines(chunks: Vec<Vec<u8>>) -> usize {
    let byte_stream = stream::iter(
        chunks
            .into_iter()
            .map(Ok::<_, StorageError>),
    )
    .boxed();
    let mut lines = LineStream::new(byte_stream);

    block_on(async {
        let mut count = 0usize;
        while let Some(line) = lines.next().await {
            let line = line.expect("synthetic feed never errors");
            black_box(line.len());
            count += 1;
        }
        count
    })
}

fn benchmark_line_splitting(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_stream");

    for &(rows, chunk_bytes) in &[(10_000usize, 4096usize), (10_000, 64 * 1024)] {
        let chunks = chunked_feed(rows, chunk_bytes);
        let total_bytes: usize = chunks.iter().map(Vec::len).sum();
        group.throughput(Throughput::Bytes(total_bytes as u64));
        group.bench_function(format!("{rows}_rows_{chunk_bytes}_byte_reads"), |b| {
            b.iter(|| {
                let lines = drain_lines(black_box(chunks.clone()));
                assert_eq!(lines, rows + 1);
            })
        });
    }

    group.finish();
}

fn benchmark_long_lines(c: &mut Criterion) {
    // One row spanning many read chunks stresses the buffer grow/drain path
    let wide_row = {
        let mut data = b"payload\n".to_vec();
        data.extend(std::iter::repeat(b'x').take(512 * 1024));
        data.push(b'\n');
        data
    };
    let chunks: Vec<Vec<u8>> = wide_row.chunks(4096).map(|chunk| chunk.to_vec()).collect();

    c.bench_function("line_stream_512k_line", |b| {
        b.iter(|| {
            let lines = drain_lines(black_box(chunks.clone()));
            assert_eq!(lines, 2);
        })
    });
}

criterion_group!(benches, benchmark_line_splitting, benchmark_long_lines);
criterion_main!(benches);
