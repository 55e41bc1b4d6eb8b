//! Byte transport between the adapter and its client.
//!
//! Two flavors: process stdio (the interpreter was started by the IDE) and a
//! host-created pipe the IDE connects to. Framing lives in [`crate::io`];
//! this module only produces the read and write halves. The reader half is
//! owned by the I/O thread and the writer half is serialized behind the
//! session's writer mutex, so concurrent producers never interleave bytes.

use std::io::{Read, Write};

#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::Path;

use anyhow::Context;

pub struct Transport {
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
}

impl Transport {
    /// Speak DAP on the process's own stdin/stdout.
    ///
    /// Rust performs no newline translation on stdio, so no mode switching
    /// is needed on any host.
    pub fn stdio() -> Transport {
        Transport {
            reader: Box::new(std::io::stdin()),
            writer: Box::new(std::io::stdout()),
        }
    }

    /// Create the debugger pipe at `name` and wait for one client.
    #[cfg(unix)]
    pub fn pipe(name: &Path) -> anyhow::Result<Transport> {
        // A stale socket file from a previous run would make bind fail.
        if name.exists() {
            std::fs::remove_file(name)
                .with_context(|| format!("remove stale debugger pipe {}", name.display()))?;
        }
        let listener = UnixListener::bind(name)
            .with_context(|| format!("create debugger pipe {}", name.display()))?;
        log::info!("waiting for DAP client on {}", name.display());
        let (stream, _) = listener
            .accept()
            .with_context(|| format!("accept DAP client on {}", name.display()))?;
        Transport::from_stream(stream)
    }

    #[cfg(not(unix))]
    pub fn pipe(name: &std::path::Path) -> anyhow::Result<Transport> {
        anyhow::bail!(
            "debugger pipe {} is not supported on this platform",
            name.display()
        );
    }

    /// Wrap an already-connected stream (in-process clients, tests).
    #[cfg(unix)]
    pub fn from_stream(stream: UnixStream) -> anyhow::Result<Transport> {
        let reader = stream.try_clone().context("clone debugger pipe stream")?;
        Ok(Transport {
            reader: Box::new(reader),
            writer: Box::new(stream),
        })
    }

    pub fn into_split(self) -> (Box<dyn Read + Send>, Box<dyn Write + Send>) {
        (self.reader, self.writer)
    }
}
