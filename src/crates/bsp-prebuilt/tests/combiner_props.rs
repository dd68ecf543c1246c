use bsp_core::{BspJob, JobConfig, JobPlugins};
use bsp_prebuilt::{DoubleGraph, GeneratedReader, MemoryWriter, MessageSum, SumCombiner};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

fn run_message_sum(vertices: u64, workers: u32, partitions: u32, combine: bool) -> BTreeMap<u64, f64> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async move {
        let writer = Arc::new(MemoryWriter::new());
        let mut plugins = JobPlugins::new(Arc::new(MessageSum), Arc::new(GeneratedReader::new(vertices)))
            .with_writer(writer.clone());
        if combine {
            plugins = plugins.with_combiner(Arc::new(SumCombiner));
        }
        let config = JobConfig::new("message_sum", "generated")
            .with_workers(workers)
            .with_partitions_per_worker(partitions);
        let outcome = BspJob::<DoubleGraph>::new(config, plugins).run().await.unwrap();
        assert_eq!(outcome.supersteps, 2);
        writer.values()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_sum_combiner_preserves_message_sum(
        vertices in 1u64..40,
        workers in 1u32..4,
        partitions in 1u32..3,
    ) {
        let plain = run_message_sum(vertices, workers, partitions, false);
        let combined = run_message_sum(vertices, workers, partitions, true);
        prop_assert_eq!(&plain, &combined);

        let everyone: u64 = (1..=vertices).sum();
        prop_assert_eq!(plain.get(&0).copied(), Some((vertices + everyone) as f64));
        prop_assert_eq!(plain.len() as u64, vertices);
    }
}
