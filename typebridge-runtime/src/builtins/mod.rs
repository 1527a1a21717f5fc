//! Builtin types - the minimal object set the bridge programs against
//!
//! Each submodule owns one family of types: its static type object, its C API
//! entry points, and Rust-side helpers for building and reading values.

pub mod dict;
pub mod float;
pub mod function;
pub mod iter;
pub mod list;
pub mod long;
pub mod module;
pub mod none;
pub mod tuple;
pub mod unicode;

#[cfg(test)]
mod tests;

use core::ffi::c_int;

use crate::object::PyTypeObject;
use crate::typeobject::PyType_Ready;

pub(crate) unsafe fn init_types() {
    none::init();
    long::init();
    float::init();
    unicode::init();
    tuple::init();
    list::init();
    dict::init();
    module::init();
    iter::init();
    function::init();
}

pub(crate) unsafe fn ready_types() -> c_int {
    let all: [*mut PyTypeObject; 13] = [
        none::_PyNone_Type(),
        none::_PyNotImplemented_Type(),
        long::PyLong_Type(),
        long::PyBool_Type(),
        float::PyFloat_Type(),
        unicode::PyUnicode_Type(),
        tuple::PyTuple_Type(),
        list::PyList_Type(),
        dict::PyDict_Type(),
        module::PyModule_Type(),
        iter::PySeqIter_Type(),
        function::PyCFunction_Type(),
        iter::PyListIter_Type(),
    ];
    for tp in all {
        if PyType_Ready(tp) < 0 {
            return -1;
        }
    }
    0
}
