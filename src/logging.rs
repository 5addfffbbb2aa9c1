//! env_logger setup with an optional session file.
//!
//! The logger is installed before the config is read, so the file is attached
//! afterwards. Lines logged before that only reach stderr.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// Log sink that writes to stderr and, once attached, to a file.
#[derive(Clone, Default)]
pub struct SessionLog {
    file: Arc<Mutex<Option<File>>>,
}

impl SessionLog {
    /// Install the global logger. `RUST_LOG` overrides the `info` default.
    pub fn install() -> Self {
        let log = Self::default();
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(log.clone())))
            .init();
        log
    }

    /// Append every following line to `path` as well.
    pub fn attach(&self, path: &Path) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        *self.file.lock().unwrap_or_else(PoisonError::into_inner) = Some(file);
        Ok(())
    }

    fn write_file(&self, buf: &[u8]) {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(f) = file.as_mut() {
            if f.write_all(buf).is_err() {
                // Stderr keeps working once the file stops accepting writes
                *file = None;
                let _ = writeln!(io::stderr(), "Session log write failed, detaching log file");
            }
        }
    }
}

impl Write for SessionLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.write_file(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(f) = self.file.lock().unwrap_or_else(PoisonError::into_inner).as_mut() {
            f.flush()?;
        }
        io::stderr().flush()
    }
}
