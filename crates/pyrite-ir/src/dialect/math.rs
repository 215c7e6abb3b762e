//! Float math intrinsics used by the operator tables.

use crate::dialect;

dialect! {
    mod math {
        fn powf(lhs, rhs) -> result;
        fn floor(value) -> result;
    }
}
