//! Linux `perf` map output.
//!
//! `perf report` resolves samples in anonymous executable memory through
//! `/tmp/perf-<pid>.map`, a text file with one `START SIZE NAME` line per
//! symbol (hexadecimal, no `0x` prefix).

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::range::{CodeRange, RangeRegistrar};

/// Appends code ranges to a `perf` map file.
#[derive(Debug)]
pub struct PerfMapRegistrar {
    path: PathBuf,
    // Serializes appends from concurrent registrations.
    write_lock: Mutex<()>,
}

impl PerfMapRegistrar {
    /// Registrar writing to an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Registrar writing to `/tmp/perf-<pid>.map` for this process.
    pub fn for_current_process() -> Self {
        Self::new(format!("/tmp/perf-{}.map", std::process::id()))
    }

    /// Path of the map file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, ranges: &[CodeRange]) -> io::Result<()> {
        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut lines = String::new();
        for range in ranges {
            lines.push_str(&format_line(range));
        }
        file.write_all(lines.as_bytes())
    }
}

fn format_line(range: &CodeRange) -> String {
    format!("{:x} {:x} {}\n", range.start, range.len(), range.name)
}

impl RangeRegistrar for PerfMapRegistrar {
    fn register_ranges(&self, group: &str, ranges: &[CodeRange]) {
        match self.append(ranges) {
            Ok(()) => tracing::debug!(
                group,
                path = %self.path.display(),
                count = ranges.len(),
                "wrote perf map entries"
            ),
            Err(err) => tracing::warn!(
                group,
                path = %self.path.display(),
                error = %err,
                "failed to write perf map entries"
            ),
        }
    }
}
