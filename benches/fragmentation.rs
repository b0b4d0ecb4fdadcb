//! Fragmentation and reassembly benchmarks
//!
//! Measures splitting a C-STORE into P-DATA-TF PDUs for different peer
//! maximum PDU lengths, and reassembling the fragments.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dicompot::io::assembler::{max_fragment_size, split_into_pdus, CommandAssembler};
use dicompot::protocol::dimse::DimseCommand;
use dicompot::protocol::pdu::Pdu;
use dicompot::protocol::uid;

const DATA_SET_SIZE: usize = 512 * 1024;

fn store_request() -> DimseCommand {
    DimseCommand::c_store_rq(7, uid::CT_IMAGE_STORAGE, "1.2.840.99.1.1")
}

fn bench_split(c: &mut Criterion) {
    let command = store_request();
    let data = vec![0x5Au8; DATA_SET_SIZE];
    let mut group = c.benchmark_group("split_into_pdus");
    group.throughput(Throughput::Bytes(DATA_SET_SIZE as u64));
    for peer_max in [16_384u32, 65_536, 1 << 20] {
        let chunk = max_fragment_size(peer_max, peer_max).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(peer_max), &chunk, |b, &chunk| {
            b.iter(|| {
                let pdus = split_into_pdus(1, &command, &data, chunk).unwrap();
                black_box(pdus.len())
            });
        });
    }
    group.finish();
}

fn bench_reassemble(c: &mut Criterion) {
    let command = store_request();
    let data = vec![0xA5u8; DATA_SET_SIZE];
    let chunk = max_fragment_size(16_384, 16_384).unwrap();
    let pdvs: Vec<_> = split_into_pdus(1, &command, &data, chunk)
        .unwrap()
        .into_iter()
        .filter_map(|pdu| match pdu {
            Pdu::PDataTf(pdvs) => Some(pdvs),
            _ => None,
        })
        .collect();

    let mut group = c.benchmark_group("reassemble");
    group.throughput(Throughput::Bytes(DATA_SET_SIZE as u64));
    group.bench_function("16k_fragments", |b| {
        b.iter(|| {
            let mut assembler = CommandAssembler::new();
            let mut complete = 0;
            for batch in &pdvs {
                complete += assembler.add_pdvs(batch).unwrap().len();
            }
            black_box(complete)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_split, bench_reassemble);

criterion_main!(benches);
