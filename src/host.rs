//! The interpreter→adapter contract.
//!
//! The interpreter stays loosely coupled to the debugger: it hands the
//! adapter line tables and lifecycle notifications, and exposes the current
//! execution point through the [`FrameContext`] snapshot accessor. Nothing in
//! this module depends on the wire protocol.

use std::fmt;

/// Severity tag of an interpreter diagnostic.
///
/// A closed enum rather than the interpreter's raw message codes, so the
/// exception filter table stays exhaustive by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    AuthorWarning,
    AuthorError,
    FatalError,
    InternalError,
    Message,
    Warning,
    Log,
    DeprecationError,
    DeprecationWarning,
}

impl Severity {
    /// All severities, in the order filters are advertised to the client.
    pub const ALL: [Severity; 9] = [
        Severity::AuthorWarning,
        Severity::AuthorError,
        Severity::FatalError,
        Severity::InternalError,
        Severity::Message,
        Severity::Warning,
        Severity::Log,
        Severity::DeprecationError,
        Severity::DeprecationWarning,
    ];
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::AuthorWarning => "author warning",
            Severity::AuthorError => "author error",
            Severity::FatalError => "fatal error",
            Severity::InternalError => "internal error",
            Severity::Message => "message",
            Severity::Warning => "warning",
            Severity::Log => "log",
            Severity::DeprecationError => "deprecation error",
            Severity::DeprecationWarning => "deprecation warning",
        };
        f.write_str(name)
    }
}

/// One function extent from a parsed listfile, in 1-based source lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionExtent {
    pub start_line: i64,
    pub end_line: i64,
}

impl FunctionExtent {
    pub fn new(start_line: i64, end_line: i64) -> FunctionExtent {
        FunctionExtent {
            start_line,
            end_line,
        }
    }
}

/// Snapshot accessor for the variables visible at one stack frame.
///
/// The interpreter passes one of these to
/// [`begin_function`](crate::adapter::DebugAdapter::begin_function); the
/// adapter keeps it alive for as long as the frame is on the stack and
/// queries it lazily when the client asks for scopes, variables or an
/// `evaluate` of a variable name.
pub trait FrameContext: Send + Sync {
    /// Keys of every variable defined at this execution point.
    fn variable_names(&self) -> Vec<String>;

    /// Value of a single variable, `None` when it is not defined.
    fn variable(&self, name: &str) -> Option<String>;
}
