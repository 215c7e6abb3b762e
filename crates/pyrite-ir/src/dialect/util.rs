//! Utility dialect: undef/sign-cast bridges, tuple plumbing and
//! environment regions.

use crate::{dialect, symbols, Symbol};

dialect! {
    mod util {
        /// Undefined value of an arbitrary type; lowering target for `none`
        /// and type-variable literals.
        fn undef() -> result;

        /// Value-preserving reinterpretation between integer types that
        /// differ only in signedness. Bit pattern is unchanged.
        fn sign_cast(value) -> result;

        fn build_tuple(#[rest] args) -> result;

        fn tuple_extract(tuple, index) -> result;

        /// Region bound to an execution environment (e.g. a GPU device).
        /// `kind` selects the environment family; `device` names the device.
        #[attr(kind: Symbol, device?: Symbol)]
        fn env_region(#[rest] args) -> #[rest] results {
            #[region(body)] {}
        };

        /// Terminator of `env_region` bodies.
        fn env_region_yield(#[rest] values);

        /// Reinterpret a buffer as one with a different element type of the
        /// same byte width.
        fn memref_bitcast(source) -> result;

        /// Read a stride (index >= 0) or the offset (index absent) from a
        /// strided buffer descriptor.
        #[attr(index?: i64)]
        fn extract_memref_metadata(source) -> result;
    }
}

symbols! {
    ATTR_FORCE_INLINE => "force_inline",
    ENV_GPU => "gpu",
}

/// Name of the unit attribute marking calls/functions for forced inlining.
pub fn force_inline_attr() -> Symbol {
    *ATTR_FORCE_INLINE
}

/// Environment kind used by the GPU lowering's region annotations.
pub fn gpu_env_kind() -> Symbol {
    *ENV_GPU
}
