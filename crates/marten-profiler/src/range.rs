//! Code ranges and the registrar seam.

use parking_lot::Mutex;
use serde::Serialize;

/// A named, half-open range `[start, stop)` of generated machine code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeRange {
    /// Symbolic name shown by the debugger or profiler.
    pub name: String,
    /// First byte of the range.
    pub start: usize,
    /// One past the last byte of the range.
    pub stop: usize,
}

impl CodeRange {
    /// Create a new range.
    pub fn new(name: impl Into<String>, start: usize, stop: usize) -> Self {
        Self {
            name: name.into(),
            start,
            stop,
        }
    }

    /// Size of the range in bytes.
    pub fn len(&self) -> usize {
        self.stop.saturating_sub(self.start)
    }

    /// Whether the range covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receiver of code-range registrations.
///
/// Registration is fire-and-forget: implementations report their own I/O
/// problems through `tracing` and never fail the code generator.
pub trait RangeRegistrar {
    /// Publish `ranges` under `group` (e.g. `"global"`).
    fn register_ranges(&self, group: &str, ranges: &[CodeRange]);
}

/// Registrar that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRegistrar;

impl RangeRegistrar for NullRegistrar {
    fn register_ranges(&self, _group: &str, _ranges: &[CodeRange]) {}
}

/// One call to [`RangeRegistrar::register_ranges`].
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    /// Group name passed by the code generator.
    pub group: String,
    /// Ranges in registration order.
    pub ranges: Vec<CodeRange>,
}

/// Registrar that keeps every registration in memory.
#[derive(Debug, Default)]
pub struct RecordingRegistrar {
    registrations: Mutex<Vec<Registration>>,
}

impl RecordingRegistrar {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All registrations seen so far.
    pub fn registrations(&self) -> Vec<Registration> {
        self.registrations.lock().clone()
    }

    /// Number of registrations seen so far.
    pub fn count(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Export all registrations as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&*self.registrations.lock())
    }
}

impl RangeRegistrar for RecordingRegistrar {
    fn register_ranges(&self, group: &str, ranges: &[CodeRange]) {
        self.registrations.lock().push(Registration {
            group: group.to_string(),
            ranges: ranges.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_registrar_keeps_every_call() {
        let recorder = RecordingRegistrar::new();
        let ranges = [
            CodeRange::new("global::a", 0x1000, 0x1010),
            CodeRange::new("global::b", 0x1010, 0x1040),
        ];

        recorder.register_ranges("global", &ranges);
        recorder.register_ranges("global", &ranges[..1]);

        let seen = recorder.registrations();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].group, "global");
        assert_eq!(seen[0].ranges, ranges.to_vec());
        assert_eq!(seen[1].ranges.len(), 1);
    }

    #[test]
    fn recording_registrar_exports_json() {
        let recorder = RecordingRegistrar::new();
        recorder.register_ranges("global", &[CodeRange::new("global::a", 16, 48)]);

        let json = recorder.to_json().expect("registrations should serialize");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value[0]["group"], "global");
        assert_eq!(value[0]["ranges"][0]["name"], "global::a");
        assert_eq!(value[0]["ranges"][0]["start"], 16);
        assert_eq!(value[0]["ranges"][0]["stop"], 48);
    }

    #[test]
    fn range_len_saturates() {
        assert_eq!(CodeRange::new("x", 8, 24).len(), 16);
        assert!(CodeRange::new("x", 24, 8).is_empty());
    }
}
