//! Verbatim trace of DAP traffic into a log file.

use anyhow::Context;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Byte-level tee for the optional DAP log.
///
/// Every byte the codec reads or writes passes through [`FileTracer::write`]
/// unmodified, so the log replays the exact wire traffic. Writes are best
/// effort; a failing trace file never disturbs the session.
#[derive(Clone)]
pub struct FileTracer {
    file: Arc<Mutex<File>>,
}

impl FileTracer {
    pub fn create(path: &Path) -> anyhow::Result<FileTracer> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open DAP log file {}", path.display()))?;
        Ok(FileTracer {
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn write(&self, bytes: &[u8]) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(bytes);
        }
    }
}
