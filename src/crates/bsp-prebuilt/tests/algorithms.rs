use bsp_core::{BspJob, FailureKind, JobConfig, JobPlugins, ScriptedFaults, WorkerId};
use bsp_prebuilt::{
    default_registry, DoubleGraph, FixtureReader, GeneratedReader, MemoryWriter, MessageSum,
    MinCombiner, PageRank, ShortestPaths, SuperstepCounter, TextWriter,
};
use std::sync::Arc;

#[tokio::test]
async fn test_page_rank_fixture_bounds() {
    for (workers, partitions) in [(1, 1), (2, 2), (3, 1)] {
        let config = JobConfig::new("page_rank", "page_rank_fixture")
            .with_workers(workers)
            .with_partitions_per_worker(partitions);
        let outcome = BspJob::from_registry(config, &default_registry())
            .unwrap()
            .run()
            .await
            .unwrap();

        let max = outcome.aggregates.get_double("max").unwrap();
        let min = outcome.aggregates.get_double("min").unwrap();
        let count = outcome.aggregates.get_long("sum").unwrap();
        assert!(max > 0.19847 && max < 0.19848, "max rank {}", max);
        assert!(min > 0.03 && min < 0.03001, "min rank {}", min);
        assert_eq!(count, 5);
        assert_eq!(outcome.supersteps, 31);
        assert_eq!(outcome.stats.vertices, 5);
    }
}

#[tokio::test]
async fn test_page_rank_survives_worker_loss() {
    let writer = Arc::new(MemoryWriter::new());
    let plugins = JobPlugins::new(Arc::new(PageRank::default()), Arc::new(FixtureReader::page_rank()))
        .with_writer(writer.clone());
    let config = JobConfig::new("page_rank", "page_rank_fixture")
        .with_workers(2)
        .with_checkpoint_frequency(5);
    let outcome = BspJob::<DoubleGraph>::new(config, plugins)
        .with_fault_injector(Arc::new(ScriptedFaults::new().terminate_once(WorkerId(1), 17)))
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.stats.recoveries, 1);
    let max = outcome.aggregates.get_double("max").unwrap();
    assert!(max > 0.19847 && max < 0.19848, "max rank {}", max);
    assert_eq!(writer.values().len(), 5);
}

#[tokio::test]
async fn test_superstep_counter_output_size() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("superstep.txt");
    let config = JobConfig::new("superstep_counter", "generated")
        .with_generated_vertices(10)
        .with_workers(2)
        .with_split_multiplier(2.0)
        .with_output("text")
        .with_output_path(&path);

    let outcome = BspJob::from_registry(config, &default_registry())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.supersteps, 5);
    assert_eq!(outcome.stats.records_written, 10);
    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.len(), 40);
    assert!(text.starts_with("0\t4\n1\t4\n"));
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 40);
}

#[tokio::test]
async fn test_message_sum_on_generated_ring() {
    let writer = Arc::new(MemoryWriter::new());
    let plugins = JobPlugins::new(Arc::new(MessageSum), Arc::new(GeneratedReader::new(10)))
        .with_writer(writer.clone());
    let outcome = BspJob::<DoubleGraph>::new(JobConfig::new("message_sum", "generated").with_workers(3), plugins)
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.supersteps, 2);
    // Vertex 0 hears from vertex 9 along the ring and from everyone directly.
    assert_eq!(writer.get(0), Some(10.0 + 55.0));
    for id in 1..10u64 {
        assert_eq!(writer.get(id), Some(id as f64));
    }
}

#[tokio::test]
async fn test_shortest_paths_with_min_combiner() {
    let writer = Arc::new(MemoryWriter::new());
    let plugins = JobPlugins::new(Arc::new(ShortestPaths { source: 0 }), Arc::new(GeneratedReader::new(6)))
        .with_writer(writer.clone())
        .with_combiner(Arc::new(MinCombiner));
    BspJob::<DoubleGraph>::new(JobConfig::new("shortest_paths", "generated").with_workers(2), plugins)
        .run()
        .await
        .unwrap();

    for k in 0..6u64 {
        let expected = 100.0 * (k * k.saturating_sub(1) / 2) as f64;
        assert_eq!(writer.get(k), Some(expected), "vertex {}", k);
    }
}

#[tokio::test]
async fn test_empty_input_completes_with_empty_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.txt");
    let config = JobConfig::new("message_sum", "generated")
        .with_generated_vertices(0)
        .with_workers(2)
        .with_output("text")
        .with_output_path(&path);

    let outcome = BspJob::from_registry(config, &default_registry())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.supersteps, 0);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
}

#[tokio::test]
async fn test_failing_job_reports_failure_and_publishes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("never.txt");
    let config = JobConfig::new("failing", "generated")
        .with_workers(2)
        .with_max_attempts(2)
        .with_checkpoint_frequency(1)
        .with_output("text")
        .with_output_path(&path);

    let err = BspJob::from_registry(config, &default_registry())
        .unwrap()
        .run()
        .await
        .unwrap_err();

    let failure = err.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Compute);
    assert_eq!(failure.superstep, Some(1));
    assert!(failure.reason.contains("after 2 attempts"), "{}", failure.reason);
    assert!(!path.exists());
}

#[tokio::test]
async fn test_in_memory_text_writer_through_engine() {
    let writer = Arc::new(TextWriter::in_memory());
    let plugins = JobPlugins::new(
        Arc::new(SuperstepCounter::default()),
        Arc::new(GeneratedReader::new(3)),
    )
    .with_writer(writer.clone());
    BspJob::<DoubleGraph>::new(JobConfig::new("superstep_counter", "generated"), plugins)
        .run()
        .await
        .unwrap();
    assert_eq!(writer.contents().as_deref(), Some("0\t4\n1\t4\n2\t4\n"));
}
