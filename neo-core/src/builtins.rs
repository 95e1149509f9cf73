//! Built-in globals visible at the Neo language level.
//!
//! Each builtin maps a source name to a global object exported by the
//! runtime. Builtins are resolved after the scope chain, so a user
//! binding with the same name shadows them.

use crate::runtime;

/// Metadata about a single builtin symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinDescriptor {
    /// Name at the Neo level (e.g., `print`).
    pub name: &'static str,

    /// Runtime global the name lowers to.
    pub symbol: &'static str,
}

pub const BUILTINS: &[BuiltinDescriptor] = &[
    BuiltinDescriptor {
        name: "print",
        symbol: "NeoGlobPrint",
    },
    BuiltinDescriptor {
        name: "input",
        symbol: "NeoGlobInput",
    },
    BuiltinDescriptor {
        name: "true",
        symbol: runtime::TRUE,
    },
    BuiltinDescriptor {
        name: "false",
        symbol: runtime::FALSE,
    },
];

/// Look up a builtin by its Neo-level name.
pub fn find_builtin(name: &str) -> Option<&'static BuiltinDescriptor> {
    BUILTINS.iter().find(|builtin| builtin.name == name)
}
