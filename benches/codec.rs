use criterion::{black_box, criterion_group, criterion_main, Criterion};

use modbus_ws_poller::codec::{decode_response, encode_read_holding_registers, encode_read_response};
use modbus_ws_poller::sensors::decode_hygrometer;
use modbus_ws_poller::TransactionRegistry;
use std::time::Duration;

const HYGROMETER_PAYLOAD: [u8; 10] = [0x03, 0xE8, 0x01, 0x90, 0x03, 0x84, 0xFF, 0x38, 0x00, 0x64];

fn bench_encode(c: &mut Criterion) {
    c.bench_function("encode_read_holding_registers", |b| {
        b.iter(|| encode_read_holding_registers(black_box(0x1234), black_box(4), 0, 5))
    });
}

fn bench_decode(c: &mut Criterion) {
    let frame = encode_read_response(0x1234, 4, &HYGROMETER_PAYLOAD);
    c.bench_function("decode_response", |b| {
        b.iter(|| decode_response(black_box(&frame)))
    });

    c.bench_function("decode_response_and_hygrometer", |b| {
        b.iter(|| {
            let response = decode_response(black_box(&frame)).unwrap();
            decode_hygrometer(response.data()).unwrap()
        })
    });
}

fn bench_registry(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let registry = TransactionRegistry::new();

    c.bench_function("register_resolve_wait", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let tid = registry.next_transaction_id();
                let handle = registry.register(tid, Duration::from_secs(5)).unwrap();
                registry.resolve(tid, HYGROMETER_PAYLOAD.to_vec());
                handle.wait().await.unwrap()
            })
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_registry);
criterion_main!(benches);
