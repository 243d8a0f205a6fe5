//! Environment-driven options for global fragment generation.

use std::sync::OnceLock;

use marten_profiler::{GdbJitRegistrar, NullRegistrar, PerfMapRegistrar, RangeRegistrar};

static GDB_ENABLED: OnceLock<bool> = OnceLock::new();
static PERF_MAP_ENABLED: OnceLock<bool> = OnceLock::new();

fn parse_env_truthy(value: &str) -> bool {
    let value = value.trim();
    !matches!(value, "" | "0")
        && !value.eq_ignore_ascii_case("false")
        && !value.eq_ignore_ascii_case("off")
        && !value.eq_ignore_ascii_case("no")
}

/// Whether code ranges are published through the GDB JIT interface.
///
/// Controlled by `MARTEN_JIT_GDB`; on unless set to a false-y value.
pub fn is_gdb_enabled() -> bool {
    *GDB_ENABLED.get_or_init(|| {
        std::env::var("MARTEN_JIT_GDB")
            .ok()
            .map(|v| parse_env_truthy(&v))
            .unwrap_or(true)
    })
}

/// Whether code ranges are appended to `/tmp/perf-<pid>.map`.
///
/// Controlled by `MARTEN_JIT_PERF_MAP`; off unless set.
pub fn is_perf_map_enabled() -> bool {
    *PERF_MAP_ENABLED.get_or_init(|| {
        std::env::var("MARTEN_JIT_PERF_MAP")
            .ok()
            .is_some_and(|v| parse_env_truthy(&v))
    })
}

/// Which external tools receive the fragment ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalConfig {
    /// Register with the debugger.
    pub gdb: bool,
    /// Write a `perf` map.
    pub perf_map: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            gdb: true,
            perf_map: false,
        }
    }
}

impl GlobalConfig {
    /// Options from the environment, read once per process.
    pub fn from_env() -> Self {
        Self {
            gdb: is_gdb_enabled(),
            perf_map: is_perf_map_enabled(),
        }
    }

    /// Debugger registrar; a [`NullRegistrar`] when disabled.
    pub fn debugger(&self) -> Box<dyn RangeRegistrar> {
        if self.gdb {
            Box::new(GdbJitRegistrar::new())
        } else {
            Box::new(NullRegistrar)
        }
    }

    /// Profiler registrar.
    pub fn profiler(&self) -> Box<dyn RangeRegistrar> {
        if self.perf_map {
            Box::new(PerfMapRegistrar::for_current_process())
        } else {
            Box::new(NullRegistrar)
        }
    }
}
