use criterion::{black_box, criterion_group, criterion_main, Criterion};
use typebridge_runtime::*;

fn bench_refcount(c: &mut Criterion) {
    Py_Initialize();
    let _gil = GilGuard::acquire();
    let obj = unsafe { PyLong_FromLong(7) };

    c.bench_function("incref_decref", |b| {
        b.iter(|| unsafe {
            Py_INCREF(black_box(obj));
            Py_DECREF(black_box(obj));
        });
    });

    c.bench_function("int_alloc_free", |b| {
        b.iter(|| unsafe {
            let o = PyLong_FromLong(black_box(1234));
            Py_DECREF(o);
        });
    });

    c.bench_function("dict_set_get", |b| {
        let d = unsafe { PyDict_New() };
        let key = unsafe { unicode_from_str("key") };
        b.iter(|| unsafe {
            PyDict_SetItem(d, key, obj);
            black_box(PyDict_GetItem(d, key));
        });
        unsafe {
            Py_DECREF(key);
            Py_DECREF(d);
        }
    });

    unsafe { Py_DECREF(obj) };
}

criterion_group!(benches, bench_refcount);
criterion_main!(benches);
