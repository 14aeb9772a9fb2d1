use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use lunapr_vm::{Interpreter, Value, marshal, stdlib::thread::ThreadHandle};

fn bench_spawn_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn_join");
    Interpreter::default().enter(|vm| {
        let func = vm
            .run_source("return function(n) local s = 0 for i = 1, n do s = s + i end return s end", "=bench")
            .unwrap()
            .remove(0);
        for n in [0i64, 10_000] {
            group.bench_with_input(BenchmarkId::new("closure", n), &n, |b, &n| {
                b.iter(|| {
                    let handle = ThreadHandle::spawn(vm, &func, &[Value::Integer(n)]).unwrap();
                    let output = handle.join().unwrap().unwrap();
                    marshal::deserialize(vm, &output).unwrap()
                })
            });
        }
        group.bench_function("source_text", |b| {
            b.iter(|| {
                vm.run_source("return apr.thread('return 1'):join()", "=bench")
                    .unwrap()
            })
        });
    });
    group.finish();
}

fn bench_marshal_table(c: &mut Criterion) {
    Interpreter::default().enter(|vm| {
        let table = vm
            .run_source(
                "local t = {} for i = 1, 1000 do t[i] = {id = i, name = 'item' .. i} end return t",
                "=bench",
            )
            .unwrap();
        c.bench_function("marshal_1000_rows", |b| {
            b.iter(|| {
                let payload = marshal::serialize(&table).unwrap();
                marshal::deserialize(vm, &payload).unwrap()
            })
        });
    });
}

criterion_group!(benches, bench_spawn_join, bench_marshal_table);
criterion_main!(benches);
