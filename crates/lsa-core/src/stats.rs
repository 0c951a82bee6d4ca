//! Compilation statistics sink.
//!
//! Counters are atomic so one sink can be shared by workers analysing
//! different methods in parallel.

use std::sync::atomic::{AtomicU64, Ordering};

/// Events reported by the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodCompilationStat {
    /// A singleton allocation that could be removed entirely.
    FullLsePossible,
    /// An allocation that escapes only on some paths and could be
    /// materialized lazily.
    PartialLsePossible,
}

impl MethodCompilationStat {
    pub const ALL: [MethodCompilationStat; 2] = [
        MethodCompilationStat::FullLsePossible,
        MethodCompilationStat::PartialLsePossible,
    ];

    fn slot(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            MethodCompilationStat::FullLsePossible => "FullLSEPossible",
            MethodCompilationStat::PartialLsePossible => "PartialLSEPossible",
        }
    }
}

#[derive(Debug, Default)]
pub struct CompilationStats {
    counters: [AtomicU64; MethodCompilationStat::ALL.len()],
}

impl CompilationStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, stat: MethodCompilationStat) {
        self.record_count(stat, 1);
    }

    pub fn record_count(&self, stat: MethodCompilationStat, count: u64) {
        self.counters[stat.slot()].fetch_add(count, Ordering::Relaxed);
    }

    pub fn get(&self, stat: MethodCompilationStat) -> u64 {
        self.counters[stat.slot()].load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Display for CompilationStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for stat in MethodCompilationStat::ALL {
            writeln!(f, "{}: {}", stat.name(), self.get(stat))?;
        }
        Ok(())
    }
}

/// Record `stat` if a sink is attached.
pub fn maybe_record_stat(stats: Option<&CompilationStats>, stat: MethodCompilationStat) {
    if let Some(stats) = stats {
        stats.record(stat);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_reset() {
        let stats = CompilationStats::new();
        maybe_record_stat(Some(&stats), MethodCompilationStat::FullLsePossible);
        maybe_record_stat(Some(&stats), MethodCompilationStat::FullLsePossible);
        maybe_record_stat(None, MethodCompilationStat::PartialLsePossible);

        assert_eq!(stats.get(MethodCompilationStat::FullLsePossible), 2);
        assert_eq!(
            stats.get(MethodCompilationStat::PartialLsePossible),
            0,
            "recording without a sink is a no-op"
        );

        stats.reset();
        assert_eq!(stats.get(MethodCompilationStat::FullLsePossible), 0);
    }

    #[test]
    fn test_display_lists_every_counter() {
        let stats = CompilationStats::new();
        stats.record_count(MethodCompilationStat::PartialLsePossible, 3);
        assert_eq!(
            stats.to_string(),
            "FullLSEPossible: 0\nPartialLSEPossible: 3\n"
        );
    }
}
