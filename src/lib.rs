//! Debug Adapter Protocol server for the Cobble build-configuration
//! interpreter.
//!
//! The interpreter constructs an adapter through [`create_adapter`] (or
//! [`DebugAdapter::connect`] with a prepared [`transport::Transport`]) and
//! then reports progress through the host callbacks: `source_file_loaded`,
//! `begin_function` / `end_function`, `check_exception` and `report_exit`.
//! A dedicated I/O thread owns the protocol side; when a breakpoint, step
//! predicate, pause or enabled exception filter fires, the interpreter
//! thread blocks inside its callback until the client resumes it.

pub mod adapter;
pub mod factory;
pub mod host;
pub mod io;
pub mod protocol;
pub mod tracer;
pub mod transport;

pub use adapter::DebugAdapter;
pub use factory::create_adapter;
pub use host::{FrameContext, FunctionExtent, Severity};
