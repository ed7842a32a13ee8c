//! Checksum, codec and framing throughput

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use modbus_link::checksum::{crc16_modbus, lrc};
use modbus_link::codec::{decode_request, decode_response, encode_request, encode_response};
use modbus_link::frame::{ascii, rtu, tcp};
use modbus_link::{process_request, DataStore, Request, Response};

fn bench_checksums(c: &mut Criterion) {
    let mut group = c.benchmark_group("checksum");
    for size in [8usize, 64, 256] {
        let data: Vec<u8> = (0..size).map(|n| n as u8).collect();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("crc16", size), &data, |b, data| {
            b.iter(|| crc16_modbus(black_box(data)))
        });
        group.bench_with_input(BenchmarkId::new("lrc", size), &data, |b, data| {
            b.iter(|| lrc(black_box(data)))
        });
    }
    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let read = Request::ReadHoldingRegisters {
        address: 0,
        quantity: 125,
    };
    let response = Response::ReadHoldingRegisters((0..125).collect());
    let response_pdu = encode_response(&response).unwrap();
    let write = Request::WriteMultipleRegisters {
        address: 0,
        values: (0..123).collect(),
    };
    let write_pdu = encode_request(&write).unwrap();

    c.bench_function("encode_read_request", |b| {
        b.iter(|| encode_request(black_box(&read)).unwrap())
    });
    c.bench_function("decode_read_response_125", |b| {
        b.iter(|| decode_response(black_box(&read), black_box(response_pdu.as_slice())).unwrap())
    });
    c.bench_function("decode_write_request_123", |b| {
        b.iter(|| decode_request(black_box(write_pdu.as_slice())).unwrap())
    });
}

fn bench_frames(c: &mut Criterion) {
    let pdu = encode_response(&Response::ReadHoldingRegisters((0..125).collect())).unwrap();
    let mut group = c.benchmark_group("frame");

    group.bench_function("tcp_encode", |b| {
        let mut dst = BytesMut::with_capacity(260);
        b.iter(|| {
            dst.clear();
            tcp::encode_frame(7, 1, black_box(pdu.as_slice()), &mut dst).unwrap();
        })
    });

    let mut rtu_frame = BytesMut::new();
    rtu::encode_frame(1, pdu.as_slice(), &mut rtu_frame).unwrap();
    group.bench_function("rtu_decode", |b| {
        b.iter(|| rtu::decode_frame(black_box(&rtu_frame)).unwrap())
    });

    let mut ascii_frame = BytesMut::new();
    ascii::encode_frame(1, pdu.as_slice(), &mut ascii_frame).unwrap();
    group.bench_function("ascii_decode", |b| {
        b.iter(|| ascii::decode_frame(black_box(&ascii_frame)).unwrap())
    });
    group.finish();
}

fn bench_server(c: &mut Criterion) {
    let store = DataStore::new();
    let read = encode_request(&Request::ReadHoldingRegisters {
        address: 100,
        quantity: 125,
    })
    .unwrap();

    c.bench_function("process_read_125", |b| {
        b.iter(|| process_request(&store, black_box(read.as_slice())))
    });
}

criterion_group!(benches, bench_checksums, bench_codec, bench_frames, bench_server);
criterion_main!(benches);
