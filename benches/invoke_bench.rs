//! Benchmarks for marshalling and native invocation

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use nativecheck::ffi::{to_native, BindingResolver, FunctionSignature, SemanticType, Value};

/// Benchmark marshalling of integer sequences of varying length
fn bench_marshal_sequence(c: &mut Criterion) {
    let mut group = c.benchmark_group("marshal_sequence");

    for &size in &[1usize, 16, 256, 4096] {
        let value = Value::Ints((0..size as i64).collect());
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("{}_ints", size), |b| {
            b.iter(|| {
                let buffer = to_native(black_box(&value), SemanticType::I32Seq);
                black_box(buffer)
            })
        });
    }

    group.finish();
}

/// Benchmark a full bound call against the arith fixture
fn bench_invoke_addition(c: &mut Criterion) {
    let Some(lib) = option_env!("NCK_ARITH_LIB") else {
        return;
    };
    let resolver = BindingResolver::new();
    let sig = FunctionSignature::parse("int addition(int, int)").unwrap();
    let addition = resolver.resolve(lib, sig).unwrap();
    let args = [Value::Int(5), Value::Int(7)];

    c.bench_function("invoke_addition", |b| {
        b.iter(|| black_box(addition.call(black_box(&args))))
    });
}

/// Benchmark buffer copy-in and copy-back around a mutating call
fn bench_invoke_uppercase(c: &mut Criterion) {
    let Some(lib) = option_env!("NCK_STRINGS_LIB") else {
        return;
    };
    let resolver = BindingResolver::new();
    let sig = FunctionSignature::parse("void mettre_en_majuscules(char*)").unwrap();
    let upper = resolver.resolve(lib, sig).unwrap();

    c.bench_function("invoke_uppercase_1k", |b| {
        b.iter(|| {
            let mut args = [Value::text_buffer(vec![b'a'; 1024])];
            upper.invoke(&mut args).unwrap();
            black_box(args)
        })
    });
}

criterion_group!(
    benches,
    bench_marshal_sequence,
    bench_invoke_addition,
    bench_invoke_uppercase
);
criterion_main!(benches);
