//! Benchmark sequential vs bounded-parallel BGZF decompression
//!
//! Archives are synthesized in memory so the benchmark runs anywhere:
//! - `bgzf_decompression`: whole-archive throughput, flate2 baseline included
//! - `bgzf_scaling`: parallel speedup as the block count grows
//! - `region_read`: indexed chunk read vs full scan of the same archive

use bamseek::io::bam::{Chunk, RegionReader};
use bamseek::io::bgzf::{BgzfWriter, BlockReader, BlockStream, PipelineConfig};
use bamseek::VirtualOffset;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use flate2::read::MultiGzDecoder;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::{Cursor, Read, Write};

/// FASTQ-like text, compressible about as well as real alignments.
fn synthetic_archive(records: usize) -> (Vec<u8>, Vec<VirtualOffset>) {
    let mut rng = StdRng::seed_from_u64(29);
    let mut writer = BgzfWriter::new(Vec::new());
    let mut block_starts = Vec::new();
    let mut line = Vec::with_capacity(320);

    for i in 0..records {
        line.clear();
        writeln!(line, "@read_{i}").unwrap();
        line.extend((0..150).map(|_| b"ACGT"[rng.random_range(0..4)]));
        line.extend_from_slice(b"\n+\n");
        line.extend((0..150).map(|_| rng.random_range(b'5'..=b'I')));
        line.push(b'\n');
        writer.write_all(&line).unwrap();
    }
    writer.flush_block().unwrap();
    let archive = writer.finish().unwrap();

    for block in BlockStream::sequential(BlockReader::new(Cursor::new(&archive))) {
        let block = block.unwrap();
        block_starts.push(VirtualOffset::new(block.descriptor.file_offset, 0));
    }
    (archive, block_starts)
}

fn decompress(archive: &[u8], config: &PipelineConfig) -> usize {
    let pool = config.build_pool().unwrap();
    BlockStream::from_config(BlockReader::new(Cursor::new(archive)), config, pool)
        .unwrap()
        .map(|block| block.unwrap().data.len())
        .sum()
}

fn bench_parallel_vs_sequential(c: &mut Criterion) {
    let mut group = c.benchmark_group("bgzf_decompression");
    let (archive, _) = synthetic_archive(100_000);
    group.throughput(Throughput::Bytes(archive.len() as u64));

    group.bench_function("flate2_multigz", |b| {
        b.iter(|| {
            let mut output = Vec::new();
            MultiGzDecoder::new(archive.as_slice())
                .read_to_end(&mut output)
                .unwrap();
            black_box(output.len())
        });
    });

    group.bench_function("sequential", |b| {
        b.iter(|| black_box(decompress(&archive, &PipelineConfig::sequential())));
    });

    group.bench_function("parallel", |b| {
        b.iter(|| black_box(decompress(&archive, &PipelineConfig::default())));
    });

    group.finish();
}

fn bench_scaling_with_block_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("bgzf_scaling");

    for records in [1_000, 10_000, 100_000] {
        let (archive, starts) = synthetic_archive(records);
        let label = format!("{} blocks", starts.len());

        group.bench_with_input(BenchmarkId::new("sequential", &label), &archive, |b, archive| {
            b.iter(|| black_box(decompress(archive, &PipelineConfig::sequential())));
        });
        group.bench_with_input(BenchmarkId::new("parallel", &label), &archive, |b, archive| {
            b.iter(|| black_box(decompress(archive, &PipelineConfig::default())));
        });
    }

    group.finish();
}

fn bench_region_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("region_read");
    let (archive, starts) = synthetic_archive(100_000);
    let config = PipelineConfig::default();
    let pool = config.build_pool().unwrap();

    let read = |chunk: Chunk| {
        let mut reader = RegionReader::new(
            Cursor::new(archive.as_slice()),
            vec![chunk],
            "bench".to_string(),
            &config,
            pool.clone(),
        )
        .unwrap();
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).unwrap();
        sink.len()
    };

    // A 5% window in the middle of the archive
    let from = starts.len() / 2;
    let to = from + starts.len() / 20;
    let window = Chunk::new(starts[from], starts[to]);
    let everything = Chunk::new(VirtualOffset::ZERO, VirtualOffset::from_raw(u64::MAX));

    group.bench_function("indexed_window", |b| b.iter(|| black_box(read(window))));
    group.bench_function("full_scan", |b| b.iter(|| black_box(read(everything))));

    group.finish();
}

criterion_group!(
    benches,
    bench_parallel_vs_sequential,
    bench_scaling_with_block_count,
    bench_region_read
);
criterion_main!(benches);
