//! Numeric boundaries of the converter, checked over generated inputs

use proptest::prelude::*;

use typebridge::managed::{core, Value};
use typebridge::{to_managed, to_python, BridgeConfig, NewReference};
use typebridge_runtime::{long_from_i128, long_value, with_gil, PyErr_Occurred};

fn bridge<R>(f: impl FnOnce() -> R) -> R {
    typebridge::initialize(BridgeConfig::default());
    with_gil(f)
}

proptest! {
    #[test]
    fn int32_values_round_trip(n in any::<i32>()) {
        let back = bridge(|| unsafe {
            let c = core();
            let ob = to_python(&Value::I32(n), &c.int32).unwrap();
            assert_eq!(long_value(ob.as_ptr()), n as i128);
            to_managed(ob.as_ptr(), &c.int32).unwrap()
        });
        prop_assert_eq!(back, Value::I32(n));
    }

    #[test]
    fn out_of_range_ints_overflow(excess in 1i128..=(1i128 << 40)) {
        let (above, below) = bridge(|| unsafe {
            let c = core();
            let high = NewReference::from_raw(long_from_i128(i32::MAX as i128 + excess));
            let low = NewReference::from_raw(long_from_i128(i32::MIN as i128 - excess));
            let above = to_managed(high.as_ptr(), &c.int32).unwrap_err();
            let below = to_managed(low.as_ptr(), &c.int32).unwrap_err();
            assert!(PyErr_Occurred().is_null());
            (above, below)
        });
        prop_assert!(above.is_overflow(), "{}", above);
        prop_assert!(below.is_overflow(), "{}", below);
    }

    #[test]
    fn unsigned_targets_reject_negatives(n in i64::MIN..0i64) {
        let err = bridge(|| unsafe {
            let ob = NewReference::from_raw(long_from_i128(n as i128));
            to_managed(ob.as_ptr(), &core().uint32).unwrap_err()
        });
        prop_assert!(err.is_overflow(), "{}", err);
    }
}

#[test]
fn int32_max_plus_one_is_overflow_not_mismatch() {
    bridge(|| unsafe {
        let c = core();
        let max = to_python(&Value::I32(i32::MAX), &c.int32).unwrap();
        assert_eq!(to_managed(max.as_ptr(), &c.int32).unwrap(), Value::I32(i32::MAX));

        let over = NewReference::from_raw(long_from_i128(i32::MAX as i128 + 1));
        assert!(to_managed(over.as_ptr(), &c.int32).unwrap_err().is_overflow());
        assert_eq!(to_managed(over.as_ptr(), &c.int64).unwrap(), Value::I64(i32::MAX as i64 + 1));
    });
}
