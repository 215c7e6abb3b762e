//! Pyrite IR: an arena-based, multi-level dialect IR.
//!
//! All IR entities (operations, values, blocks, regions) live in arenas
//! owned by an [`IrContext`]; entity handles are 4-byte indices. Types and
//! attributes are interned in the context: two types are equal iff their
//! handles are equal. On top of the core sit the dialect definitions, a
//! greedy pattern-rewrite engine with folding, and a dialect-conversion
//! framework driven by a [`rewrite::TypeConverter`].

#![recursion_limit = "256"]

use std::sync::LazyLock;

use lasso::{Rodeo, Spur};
use parking_lot::RwLock;

pub mod builder;
pub mod clone;
pub mod context;
pub mod dialect;
pub mod helpers;
pub mod ops;
pub mod parser;
pub mod printer;
pub mod refs;
pub mod rewrite;
pub mod symbol_table;
pub mod traits;
pub mod transforms;
pub mod types;
pub mod verifier;
pub mod walk;

pub use builder::OpBuilder;
pub use context::{
    BlockArgData, BlockData, IrContext, OperationData, OperationDataBuilder, RegionData, Use,
    ValueData,
};
pub use ops::{DialectOp, OpMatchError};
pub use refs::{BlockRef, OpRef, PathRef, RegionRef, TypeRef, ValueDef, ValueRef};
pub use rewrite::ModuleRef;
pub use traits::Traits;
pub use types::{Attribute, Location, PathInterner, Span, TypeData, TypeDataBuilder, TypeInterner};
pub use walk::WalkAction;

// Re-exported for use inside the dialect! macro expansion.
#[doc(hidden)]
pub use paste;
#[doc(hidden)]
pub use smallvec;

// ============================================================================
// Symbol interning
// ============================================================================

/// Global string interner backing [`Symbol`].
static INTERNER: LazyLock<RwLock<Rodeo>> = LazyLock::new(|| RwLock::new(Rodeo::default()));

/// Interned name. 4 bytes, `Copy`, O(1) equality.
///
/// Used for dialect names, op names, attribute keys and symbol references.
/// Ordering compares the interned strings, so attribute maps iterate in a
/// stable alphabetical order regardless of interning sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Symbol(Spur);

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        if self.0 == other.0 {
            return std::cmp::Ordering::Equal;
        }
        let interner = INTERNER.read();
        interner.resolve(&self.0).cmp(interner.resolve(&other.0))
    }
}

impl Symbol {
    /// Intern a string and return its symbol.
    pub fn new(text: &str) -> Self {
        Symbol(INTERNER.write().get_or_intern(text))
    }

    /// Access the symbol's text without copying.
    ///
    /// The interner lock is held for the duration of the closure; do not
    /// call other `Symbol` methods from inside it.
    pub fn with_str<R>(&self, f: impl FnOnce(&str) -> R) -> R {
        let interner = INTERNER.read();
        f(interner.resolve(&self.0))
    }

    /// Copy the symbol's text into an owned `String`.
    pub fn as_string(&self) -> String {
        self.with_str(|s| s.to_owned())
    }
}

impl From<&str> for Symbol {
    fn from(text: &str) -> Self {
        Symbol::new(text)
    }
}

impl PartialEq<str> for Symbol {
    fn eq(&self, other: &str) -> bool {
        self.with_str(|s| s == other)
    }
}

impl PartialEq<&str> for Symbol {
    fn eq(&self, other: &&str) -> bool {
        self.with_str(|s| s == *other)
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.with_str(|s| f.write_str(s))
    }
}

/// Declare lazily interned static symbols.
///
/// ```
/// use pyrite_ir::symbols;
///
/// symbols! {
///     ATTR_SYM_NAME => "sym_name",
///     ATTR_TYPE => "type",
/// }
/// ```
#[macro_export]
macro_rules! symbols {
    ($($(#[$attr:meta])* $name:ident => $text:expr),* $(,)?) => {
        $(
            $(#[$attr])*
            static $name: std::sync::LazyLock<$crate::Symbol> =
                std::sync::LazyLock::new(|| $crate::Symbol::new($text));
        )*
    };
}

/// Map an identifier (possibly raw, e.g. `r#const`) to its name string.
///
/// `stringify!` keeps the `r#` prefix on raw identifiers; dialect op names
/// must not carry it, so the reserved words used as op names are special-
/// cased here.
#[doc(hidden)]
#[macro_export]
macro_rules! ident_str {
    (r#const) => {
        "const"
    };
    (r#if) => {
        "if"
    };
    (r#else) => {
        "else"
    };
    (r#for) => {
        "for"
    };
    (r#while) => {
        "while"
    };
    (r#return) => {
        "return"
    };
    (r#yield) => {
        "yield"
    };
    (r#fn) => {
        "fn"
    };
    (r#mod) => {
        "mod"
    };
    (r#type) => {
        "type"
    };
    (r#loop) => {
        "loop"
    };
    ($id:ident) => {
        stringify!($id)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_equality_is_identity() {
        let a = Symbol::new("arith");
        let b = Symbol::new("arith");
        let c = Symbol::new("func");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn symbol_str_comparison() {
        let s = Symbol::new("addi");
        assert_eq!(s, "addi");
        assert_eq!(s.as_string(), "addi");
        assert_eq!(s.to_string(), "addi");
    }

    #[test]
    fn ident_str_strips_raw_prefix() {
        assert_eq!(ident_str!(r#const), "const");
        assert_eq!(ident_str!(r#yield), "yield");
        assert_eq!(ident_str!(addi), "addi");
    }
}
