//! Adapter construction for the host.

use std::path::Path;

use anyhow::Context;

use crate::adapter::DebugAdapter;
use crate::transport::Transport;

/// Construct a connected debug adapter.
///
/// An empty `pipe_name` means stdio; an empty `dap_log_path` means no trace
/// file. Blocks until a client has connected and finished configuration.
/// Transport construction failures (for example a pipe on a host without
/// one) surface as errors with a user-visible message.
pub fn create_adapter(
    pipe_name: Option<&str>,
    dap_log_path: Option<&Path>,
) -> anyhow::Result<DebugAdapter> {
    let transport = match pipe_name {
        None | Some("") => Transport::stdio(),
        Some(name) => {
            Transport::pipe(Path::new(name)).context("failed to create debugger transport")?
        }
    };
    DebugAdapter::connect(transport, dap_log_path)
}
