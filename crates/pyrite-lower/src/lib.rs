//! High-level lowering: the dynamically typed `plier` dialect into standard
//! scalar/complex arithmetic.
//!
//! The heart is the binary operator table ([`binop`]) driven by the type
//! coercion rule ([`coerce`]) and the cast synthesizer ([`cast`]). The
//! [`pass`] module assembles everything into the `plier-to-std` stage:
//! partial dialect conversion, then call resolution ([`calls`]) and forced
//! inlining.

pub mod binop;
pub mod calls;
pub mod cast;
pub mod coerce;
pub mod literals;
pub mod pass;
pub mod tuples;
pub mod unary;

pub use calls::{ExternalSymbols, LibraryResolver};
pub use pass::{
    canonicalize, plier_to_std, run_plier_to_std_stage, std_conversion_target,
    std_type_converter, PassError,
};
