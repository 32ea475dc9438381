//! Inline terminal progress for a pipeline run

use scaffold_acquire::{ProgressSink, Stage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Sentinel for "total unknown"
const UNKNOWN: u64 = u64::MAX;

/// Progress sink shared between the pipeline and the spinner loop
///
/// The pipeline only writes counters; the spinner reads them on its own tick.
pub struct SharedProgress {
    current: AtomicU64,
    total: AtomicU64,
    stage: Mutex<Stage>,
    /// Acquisition counts bytes (downloads) rather than objects (clones)
    counts_bytes: bool,
}

impl SharedProgress {
    pub fn new(counts_bytes: bool) -> Self {
        Self {
            current: AtomicU64::new(0),
            total: AtomicU64::new(UNKNOWN),
            stage: Mutex::new(Stage::Idle),
            counts_bytes,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage.lock().map(|s| *s).unwrap_or(Stage::Failed)
    }

    /// Spinner text for the current state
    pub fn message(&self) -> String {
        let stage = self.stage();
        let current = self.current.load(Ordering::Relaxed);
        let total = match self.total.load(Ordering::Relaxed) {
            UNKNOWN => None,
            total => Some(total),
        };

        match stage {
            Stage::Acquiring if current > 0 && !self.counts_bytes => match total {
                Some(total) => format!("Receiving objects {}/{}", current, total),
                None => format!("Receiving objects {}", current),
            },
            Stage::Acquiring if current > 0 => match total {
                Some(total) if total > 0 => format!(
                    "{} {} / {} ({}%)",
                    stage,
                    human_bytes(current),
                    human_bytes(total),
                    current.saturating_mul(100) / total
                ),
                _ => format!("{} {}", stage, human_bytes(current)),
            },
            Stage::Verifying if current > 0 => match total {
                Some(total) => format!("Extracting {}/{} files", current, total),
                None => format!("Extracting {} files", current),
            },
            _ => format!("{}...", stage),
        }
    }
}

impl ProgressSink for SharedProgress {
    fn on_progress(&self, current: u64, total: Option<u64>) -> bool {
        self.current.store(current, Ordering::Relaxed);
        self.total.store(total.unwrap_or(UNKNOWN), Ordering::Relaxed);
        true
    }

    fn on_stage(&self, stage: Stage) {
        self.current.store(0, Ordering::Relaxed);
        self.total.store(UNKNOWN, Ordering::Relaxed);
        if let Ok(mut current) = self.stage.lock() {
            *current = stage;
        }
    }
}

/// Format a byte count with binary units
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
