//! Module-level IR transforms.

pub mod dce;
pub mod force_inline;
pub mod markers;

pub use dce::{eliminate_dead_code, eliminate_dead_symbols, DceResult};
pub use force_inline::{force_inline, ForceInlineError};
pub use markers::{add_jump_marker, take_jump_markers};
