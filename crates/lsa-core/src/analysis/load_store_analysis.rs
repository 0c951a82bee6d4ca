//! Load/store analysis driver.
//!
//! Builds the heap location table for a graph, then decides whether load/store
//! elimination should run at all. The analysis refuses graphs with too many
//! locations, graphs without heap stores (elimination would only act as value
//! numbering on loads), and graphs with volatile accesses or monitors.

use super::heap_location::HeapLocationCollector;
use crate::config::{AnalysisConfig, LoadStoreAnalysisType};
use crate::ir::Graph;
use crate::stats::CompilationStats;
use std::fmt;
use tracing::debug;

/// Why [`LoadStoreAnalysis::run`] gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BailOutReason {
    TooManyHeapLocations { found: usize, limit: usize },
    NoHeapStores,
    VolatileOrMonitor,
}

impl fmt::Display for BailOutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BailOutReason::TooManyHeapLocations { found, limit } => {
                write!(f, "too many heap locations ({found} > {limit})")
            }
            BailOutReason::NoHeapStores => write!(f, "no heap stores"),
            BailOutReason::VolatileOrMonitor => {
                write!(f, "volatile field access or monitor operation")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisOutcome {
    /// The table and aliasing matrix are ready for load/store elimination.
    Success,
    BailedOut(BailOutReason),
}

impl AnalysisOutcome {
    pub fn is_success(self) -> bool {
        self == AnalysisOutcome::Success
    }
}

pub struct LoadStoreAnalysis<'g> {
    graph: &'g Graph,
    config: AnalysisConfig,
    stats: Option<&'g CompilationStats>,
    heap_location_collector: HeapLocationCollector<'g>,
    outcome: Option<AnalysisOutcome>,
}

impl<'g> LoadStoreAnalysis<'g> {
    pub fn new(
        graph: &'g Graph,
        config: AnalysisConfig,
        stats: Option<&'g CompilationStats>,
    ) -> Self {
        let heap_location_collector = HeapLocationCollector::new(graph, config.analysis_type);
        if heap_location_collector.analysis_type() != config.analysis_type {
            debug!(
                requested = ?config.analysis_type,
                "graph has blocks with too many successors, partial escapes disabled"
            );
        }
        LoadStoreAnalysis {
            graph,
            config,
            stats,
            heap_location_collector,
            outcome: None,
        }
    }

    /// Build the heap location table. Returns whether load/store elimination
    /// may proceed; on `false` the table has been cleared.
    ///
    /// Running again rebuilds the table from scratch.
    pub fn run(&mut self) -> bool {
        let collector = &mut self.heap_location_collector;
        collector.clean_up();
        for block in self.graph.reverse_postorder() {
            collector.visit_basic_block(block);
        }

        let found = collector.number_of_heap_locations();
        let limit = self.config.max_heap_locations;
        let bail_out = if found > limit {
            Some(BailOutReason::TooManyHeapLocations { found, limit })
        } else if !collector.has_heap_stores() {
            Some(BailOutReason::NoHeapStores)
        } else if collector.has_volatile() || collector.has_monitor_ops() {
            Some(BailOutReason::VolatileOrMonitor)
        } else {
            None
        };

        if let Some(reason) = bail_out {
            collector.clean_up();
            debug!(%reason, heap_locations = found, "load/store analysis bailed out");
            self.outcome = Some(AnalysisOutcome::BailedOut(reason));
            return false;
        }

        collector.build_aliasing_matrix();
        if self.config.record_stats {
            collector.dump_reference_stats(self.stats);
        }
        debug!(
            heap_locations = found,
            references = collector.reference_infos().count(),
            partial_singletons = collector.count_partial_singletons(),
            "load/store analysis succeeded"
        );
        self.outcome = Some(AnalysisOutcome::Success);
        true
    }

    /// Result of the last [`run`](Self::run), if any.
    pub fn outcome(&self) -> Option<AnalysisOutcome> {
        self.outcome
    }

    pub fn heap_location_collector(&self) -> &HeapLocationCollector<'g> {
        &self.heap_location_collector
    }

    /// The analysis type actually used, after the downgrade for graphs
    /// partial escapes cannot handle.
    pub fn effective_analysis_type(&self) -> LoadStoreAnalysisType {
        self.heap_location_collector.analysis_type()
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }
}
