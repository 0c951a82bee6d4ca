//! Independent methods analysed concurrently against one statistics sink.

use lsa_core::ir::{DataType, FieldInfo};
use lsa_core::{AnalysisConfig, CompilationStats, LoadStoreAnalysis, MethodCompilationStat};
use lsa_test_helpers::AdjacencyListGraph;
use rayon::prelude::*;

/// `allocations` removable objects, each with one store and one load.
fn method(allocations: usize) -> AdjacencyListGraph {
    let mut alg = AdjacencyListGraph::new("entry", "exit", &[("entry", "exit")]);
    let c1 = alg.int_constant(1);
    let field = FieldInfo::new(8, DataType::Int32);
    for _ in 0..allocations {
        let obj = alg.new_instance("entry");
        alg.field_set("entry", obj, field, c1);
        alg.field_get("exit", obj, field);
    }
    alg
}

#[test]
fn test_shared_stats_across_threads() {
    let stats = CompilationStats::new();
    let sizes: Vec<usize> = (0..64).map(|i| i % 5 + 1).collect();

    let succeeded: usize = sizes
        .par_iter()
        .map(|&allocations| {
            // Graphs cache derived facts and stay on the thread that built them.
            let alg = method(allocations);
            let mut lsa = LoadStoreAnalysis::new(alg.graph(), AnalysisConfig::default(), Some(&stats));
            usize::from(lsa.run())
        })
        .sum();

    assert_eq!(succeeded, sizes.len());
    let expected: usize = sizes.iter().sum();
    assert_eq!(
        stats.get(MethodCompilationStat::FullLsePossible),
        expected as u64,
        "one count per removable allocation"
    );
    assert_eq!(stats.get(MethodCompilationStat::PartialLsePossible), 0);
}

#[test]
fn test_results_do_not_depend_on_thread() {
    let sequential: Vec<usize> = (1..=16)
        .map(|n| {
            let alg = method(n);
            let mut lsa = LoadStoreAnalysis::new(alg.graph(), AnalysisConfig::default(), None);
            lsa.run();
            lsa.heap_location_collector().number_of_heap_locations()
        })
        .collect();
    let parallel: Vec<usize> = (1..=16)
        .into_par_iter()
        .map(|n| {
            let alg = method(n);
            let mut lsa = LoadStoreAnalysis::new(alg.graph(), AnalysisConfig::default(), None);
            lsa.run();
            lsa.heap_location_collector().number_of_heap_locations()
        })
        .collect();
    assert_eq!(sequential, parallel);
    assert_eq!(sequential, (1..=16).collect::<Vec<_>>());
}
