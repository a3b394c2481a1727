// Benchmark reference index construction over synthetic models of varying size.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use recast_model::{ModelBuilder, ProgramModel, ReferenceIndex};

/// Build a model with `types` types, each holding a few fields and methods
/// whose bodies read fields and call sibling methods.
fn build_synthetic_model(types: usize, methods_per_type: usize) -> ProgramModel {
    let mut b = ModelBuilder::new();
    let app = b.module("app");
    for t in 0..types {
        let ty = b.ty(app, &format!("Type{t}"));
        let fields: Vec<_> = (0..4).map(|f| b.field(ty, &format!("f{f}"))).collect();
        let methods: Vec<_> = (0..methods_per_type)
            .map(|m| b.method(ty, &format!("m{m}")))
            .collect();
        for (i, method) in methods.iter().enumerate() {
            let local = b.local(*method, "tmp");
            let a = b.read(fields[i % fields.len()]);
            let c = b.read(fields[(i + 1) % fields.len()]);
            let sum = b.op("+", vec![a, c]);
            let assign = b.assign(local, sum);
            let callee = methods[(i + 1) % methods.len()];
            let call = b.call(callee, vec![]);
            let read = b.read(local);
            let ret = b.ret(Some(read));
            b.body(*method, vec![assign, call, ret]);
        }
    }
    b.build().expect("synthetic model is well-formed")
}

fn bench_index_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("reference_index");

    for types in [10, 100, 1_000] {
        let model = build_synthetic_model(types, 8);

        group.bench_with_input(BenchmarkId::new("parallel", types), &model, |b, m| {
            b.iter(|| ReferenceIndex::build_with(m, true));
        });
        group.bench_with_input(BenchmarkId::new("sequential", types), &model, |b, m| {
            b.iter(|| ReferenceIndex::build_with(m, false));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_index_build);
criterion_main!(benches);
