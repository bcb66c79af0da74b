//! Criterion benchmarks for the container layer and the JSON codec.
//!
//! Run with:
//!   cargo bench --bench containers

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use corekit::{hash, json_parse, to_json, Array, BString, OrderedMap};

fn bench_array(c: &mut Criterion) {
    let mut group = c.benchmark_group("array");
    for &n in &[1_000usize, 100_000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("push_pop", n), &n, |b, &n| {
            b.iter(|| {
                let mut a: Array<u64> = Array::new();
                for i in 0..n as u64 {
                    a.push(i);
                }
                while a.pop().is_some() {}
            })
        });
        group.bench_with_input(BenchmarkId::new("unshift_shift", n), &n, |b, &n| {
            b.iter(|| {
                let mut a: Array<u64> = Array::new();
                a.reserve(-(n as isize));
                for i in 0..n as u64 {
                    a.unshift(i);
                }
                while a.shift().is_some() {}
            })
        });
    }
    group.finish();
}

fn bench_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("ordered_map");
    for &n in &[1_000usize, 50_000] {
        let keys: Vec<String> = (0..n).map(|i| format!("key-{i}")).collect();
        let hashes: Vec<u64> = keys.iter().map(|k| hash::keyed(k.as_bytes(), 7)).collect();

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("insert", n), &n, |b, _| {
            b.iter(|| {
                let mut m: OrderedMap<String, u64> = OrderedMap::new();
                for (i, k) in keys.iter().enumerate() {
                    m.set(hashes[i], k.clone(), i as u64);
                }
                m
            })
        });

        let mut m: OrderedMap<String, u64> = OrderedMap::new();
        for (i, k) in keys.iter().enumerate() {
            m.set(hashes[i], k.clone(), i as u64);
        }
        group.bench_with_input(BenchmarkId::new("lookup", n), &n, |b, _| {
            b.iter(|| {
                let mut sum = 0u64;
                for (i, k) in keys.iter().enumerate() {
                    sum = sum.wrapping_add(*m.get(hashes[i], k).unwrap());
                }
                sum
            })
        });
    }
    group.finish();
}

fn bench_json(c: &mut Criterion) {
    let mut group = c.benchmark_group("json");
    // A medium document with every value class.
    let mut doc = String::from("{\"rows\":[");
    for i in 0..500 {
        if i > 0 {
            doc.push(',');
        }
        doc.push_str(&format!(
            "{{\"id\":{i},\"name\":\"row-{i}\",\"ratio\":{}.25,\"ok\":{}}}",
            i,
            i % 2 == 0
        ));
    }
    doc.push_str("]}");

    group.throughput(Throughput::Bytes(doc.len() as u64));
    group.bench_function("parse", |b| {
        b.iter(|| {
            let (v, _) = json_parse(doc.as_bytes());
            v.free();
        })
    });

    let (v, _) = json_parse(doc.as_bytes());
    group.bench_function("serialize", |b| {
        b.iter(|| {
            let mut out = BString::new();
            to_json(&mut out, v, false);
            out
        })
    });
    v.free();
    group.finish();
}

fn bench_base64(c: &mut Criterion) {
    let mut group = c.benchmark_group("base64");
    let payload: Vec<u8> = (0..65_536usize).map(|i| (i * 31) as u8).collect();
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("encode", |b| {
        b.iter(|| {
            let mut s = BString::new();
            s.write_b64enc(&payload, false);
            s
        })
    });
    let mut encoded = BString::new();
    encoded.write_b64enc(&payload, false);
    group.bench_function("decode", |b| {
        b.iter(|| {
            let mut s = BString::new();
            s.write_b64dec(encoded.as_bytes());
            s
        })
    });
    group.finish();
}

criterion_group!(benches, bench_array, bench_map, bench_json, bench_base64);
criterion_main!(benches);
