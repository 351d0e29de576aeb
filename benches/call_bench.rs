//! Benchmarks for declaration parsing, marshaling and native calls

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use native_bridge::ffi::{call, declare_c, load, FfiValue, MarshaledArgs, Prototype};

/// Benchmark C declaration parsing
fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_snprintf_decl", |b| {
        b.iter(|| {
            let proto = Prototype::parse(black_box(
                "int snprintf(char *str, size_t size, const char *format, ...);",
            ));
            black_box(proto)
        })
    });
}

/// Benchmark argument marshaling for varying text sizes
fn bench_marshal(c: &mut Criterion) {
    let mut group = c.benchmark_group("marshal_text");
    let proto = Prototype::parse("size_t strlen(const char* s)").unwrap();

    for &size in &[0usize, 16, 256, 4096] {
        let args = [FfiValue::Text("x".repeat(size))];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("{}_bytes", size), |b| {
            b.iter(|| {
                let frame = MarshaledArgs::new(&proto, black_box(&args)).unwrap();
                black_box(frame.arg_list().as_slice().len())
            })
        });
    }

    group.finish();
}

/// Benchmark full in-process calls
fn bench_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("call");
    let process = load(None).unwrap();

    let abs = declare_c(&process, "int abs(int j)").unwrap();
    let abs_args = [FfiValue::I32(-42)];
    group.bench_function("abs", |b| b.iter(|| black_box(call(&abs, black_box(&abs_args)))));

    let strlen = declare_c(&process, "size_t strlen(const char* s)").unwrap();
    let strlen_args = [FfiValue::from("Hello from C!")];
    group.bench_function("strlen", |b| {
        b.iter(|| black_box(call(&strlen, black_box(&strlen_args))))
    });

    let snprintf =
        declare_c(&process, "int snprintf(char *str, size_t size, const char *format, ...)")
            .unwrap();
    let mut buf = vec![0u8; 64];
    let snprintf_args = [
        FfiValue::Ptr(buf.as_mut_ptr() as usize),
        FfiValue::USize(buf.len()),
        FfiValue::from("%d %.3f"),
        FfiValue::I32(7),
        FfiValue::F64(2.5),
    ];
    group.bench_function("snprintf_variadic", |b| {
        b.iter(|| black_box(call(&snprintf, black_box(&snprintf_args))))
    });

    group.finish();
}

criterion_group!(benches, bench_parse, bench_marshal, bench_call);
criterion_main!(benches);
