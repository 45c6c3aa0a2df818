use criterion::{Criterion, black_box, criterion_group, criterion_main};
use minijs::{Session, Value};

fn bench_value_churn(c: &mut Criterion) {
    let session = Session::new().unwrap();
    let value = session.create_array().unwrap().into_value();

    c.bench_function("handle clone/drop 1k", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                black_box(value.clone());
            }
        })
    });
}

fn bench_array_push(c: &mut Criterion) {
    c.bench_function("array push 1k", |b| {
        b.iter(|| {
            let session = Session::new().unwrap();
            let arr = session.create_array().unwrap();
            for i in 0..1000 {
                arr.push(Value::Number(i as f64)).unwrap();
            }
            black_box(arr.len().unwrap())
        })
    });
}

fn bench_run_host_call(c: &mut Criterion) {
    let session = Session::new().unwrap();
    session
        .register("hostAdd", |args, _this| {
            let a = args.first().map_or(0.0, |v| v.as_number(0.0));
            let b = args.get(1).map_or(0.0, |v| v.as_number(0.0));
            Ok(Value::Number(a + b))
        })
        .unwrap();

    c.bench_function("run hostAdd", |b| {
        b.iter(|| black_box(session.run("hostAdd(2, 3)").unwrap()))
    });
}

criterion_group!(
    benches,
    bench_value_churn,
    bench_array_push,
    bench_run_host_call
);
criterion_main!(benches);
