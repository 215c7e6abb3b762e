//! Complex-number arithmetic over `core.complex` values.

use crate::dialect;

dialect! {
    mod cmplx {
        fn add(lhs, rhs) -> result;
        fn sub(lhs, rhs) -> result;
        fn mul(lhs, rhs) -> result;
        fn div(lhs, rhs) -> result;
        fn pow(lhs, rhs) -> result;
        fn neg(value) -> result;
        fn create(re, im) -> result;
        fn re(value) -> result;
        fn im(value) -> result;
    }
}
