use bencher::fixtures;
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use micro_wire::{Request, WirePayload, codec};
use std::hint::black_box;

fn benchmark_request_from_raw(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("request_from_raw");

    for fixture in fixtures() {
        group.throughput(Throughput::Bytes(fixture.len()));
        group.bench_with_input(BenchmarkId::from_parameter(fixture.name()), &fixture, |b, fixture| {
            b.iter(|| {
                let request = Request::from_raw(fixture.raw()).expect("fixture should be a valid wire payload");
                black_box(request);
            });
        });
    }

    group.finish();
}

fn benchmark_request_to_payload(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("request_to_payload");

    for fixture in fixtures() {
        group.throughput(Throughput::Bytes(fixture.len()));
        group.bench_with_input(BenchmarkId::from_parameter(fixture.name()), &fixture, |b, fixture| {
            let request = Request::from_raw(fixture.raw()).expect("fixture should be a valid wire payload");
            b.iter_batched_ref(
                || request.clone(),
                |request| black_box(request.to_payload().expect("payload should serialize")),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn benchmark_classify(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("classify_wire");

    for fixture in fixtures() {
        let payload: WirePayload = serde_json::from_str(fixture.raw()).expect("fixture should be a valid wire payload");
        group.bench_with_input(BenchmarkId::from_parameter(fixture.name()), &payload.body, |b, body| {
            b.iter(|| black_box(codec::classify_wire(body).expect("body should classify")));
        });
    }

    group.finish();
}

criterion_group!(wire_codec, benchmark_request_from_raw, benchmark_request_to_payload, benchmark_classify);
criterion_main!(wire_codec);
