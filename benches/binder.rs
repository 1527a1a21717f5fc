//! Overload resolution benchmarks
//!
//! Binding cost as the overload set grows, with the winning candidate at
//! the far end of the precedence order.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use typebridge::binder::CallArgs;
use typebridge::managed::{core, MethodBuilder, MethodInfo, Type, TypeBuilder, Value};
use typebridge::{BridgeConfig, MethodBinder};
use typebridge_runtime::{long_from_i128, unicode_from_str, GilGuard, Py_DECREF};

/// `Pick(T)` for several parameter types, plus `Pick(int, string)`
fn overloads(width: usize) -> (Type, Vec<Arc<MethodInfo>>) {
    let c = core();
    let params = [&c.string, &c.double, &c.int64, &c.boolean, &c.object, &c.int32];
    let ty = TypeBuilder::class("Bench", "Picker").build_with(|_, m| {
        for (i, p) in params.iter().take(width).enumerate() {
            m.method(
                MethodBuilder::new("Pick")
                    .param("x", p)
                    .returns(&c.int32)
                    .static_()
                    .body(move |_, _| Ok(Value::I32(i as i32))),
            );
        }
        m.method(
            MethodBuilder::new("Pick")
                .param("n", &c.int32)
                .param("s", &c.string)
                .returns(&c.int32)
                .static_()
                .body(|_, _| Ok(Value::I32(-1))),
        );
    });
    let methods = ty.find_methods("Pick");
    (ty, methods)
}

fn bench_bind(c: &mut Criterion) {
    typebridge::initialize(BridgeConfig::default());
    let _gil = GilGuard::acquire();
    let number = unsafe { long_from_i128(7) };
    let text = unsafe { unicode_from_str("seven") };

    let mut group = c.benchmark_group("bind");
    for width in [1usize, 3, 6] {
        let (_ty, methods) = overloads(width);
        let binder = MethodBinder::new("Pick", methods);
        group.bench_with_input(BenchmarkId::new("one_int", width), &binder, |b, binder| {
            let args = CallArgs::positional(&[number]);
            b.iter(|| unsafe { black_box(binder.bind(None, black_box(&args)).unwrap()) });
        });
    }
    let (_ty, methods) = overloads(6);
    let binder = MethodBinder::new("Pick", methods);
    group.bench_function("int_and_string", |b| {
        let args = CallArgs::positional(&[number, text]);
        b.iter(|| unsafe { black_box(binder.bind(None, black_box(&args)).unwrap()) });
    });
    group.bench_function("invoke", |b| {
        let args = CallArgs::positional(&[number]);
        b.iter(|| unsafe { black_box(binder.invoke(None, &args).unwrap()) });
    });
    group.finish();

    unsafe {
        Py_DECREF(number);
        Py_DECREF(text);
    }
}

criterion_group!(benches, bench_bind);
criterion_main!(benches);
