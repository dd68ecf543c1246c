//! Input readers.

use crate::DoubleGraph;
use async_trait::async_trait;
use bsp_core::{InputSplit, Result, Vertex, VertexInputReader, VertexRecord, VertexStream};
use futures::StreamExt;
use std::ops::Range;
use std::sync::Arc;

/// Synthetic ring graph.
///
/// Vertex ids `0..vertices` are divided into contiguous ranges, one per
/// split. Every vertex starts at 0.0 with a single edge `i → (i + 1) % n`
/// of weight `i × 100`.
#[derive(Debug, Clone, Copy)]
pub struct GeneratedReader {
    pub vertices: u64,
}

impl GeneratedReader {
    pub fn new(vertices: u64) -> Self {
        Self { vertices }
    }

    /// Ids produced for `split`.
    pub fn range(&self, split: InputSplit) -> Range<u64> {
        let total = split.total.max(1) as u64;
        let index = split.index as u64;
        let start = self.vertices * index / total;
        let end = self.vertices * (index + 1) / total;
        start..end
    }
}

#[async_trait]
impl VertexInputReader<DoubleGraph> for GeneratedReader {
    async fn open(&self, split: InputSplit) -> Result<VertexStream<DoubleGraph>> {
        let n = self.vertices;
        let range = self.range(split);
        tracing::debug!(split = %split, first = range.start, end = range.end, "Generating vertices");
        let stream = futures::stream::iter(range).map(move |id| {
            Ok(VertexRecord::new(id, 0.0).with_edge((id + 1) % n, (id * 100) as f32))
        });
        Ok(stream.boxed())
    }
}

/// Fixed vertex list held in memory, dealt round-robin over splits.
#[derive(Debug, Clone, Default)]
pub struct FixtureReader {
    vertices: Arc<Vec<Vertex<DoubleGraph>>>,
}

impl FixtureReader {
    pub fn new(vertices: Vec<Vertex<DoubleGraph>>) -> Self {
        Self {
            vertices: Arc::new(vertices),
        }
    }

    /// Five vertices: the cycle `0 → 1 → 2 → 0` and the chain `3 → 4`.
    pub fn page_rank() -> Self {
        Self::new(vec![
            VertexRecord::new(0, 0.0).with_edge(1, 1.0),
            VertexRecord::new(1, 0.0).with_edge(2, 1.0),
            VertexRecord::new(2, 0.0).with_edge(0, 1.0),
            VertexRecord::new(3, 0.0).with_edge(4, 1.0),
            VertexRecord::new(4, 0.0),
        ])
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

#[async_trait]
impl VertexInputReader<DoubleGraph> for FixtureReader {
    async fn open(&self, split: InputSplit) -> Result<VertexStream<DoubleGraph>> {
        let total = split.total.max(1);
        let records: Vec<Result<Vertex<DoubleGraph>>> = self
            .vertices
            .iter()
            .enumerate()
            .filter(|(position, _)| position % total == split.index)
            .map(|(_, vertex)| Ok(vertex.clone()))
            .collect();
        Ok(futures::stream::iter(records).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn read_all<R: VertexInputReader<DoubleGraph>>(reader: &R, splits: usize) -> Vec<Vertex<DoubleGraph>> {
        let mut all = Vec::new();
        for split in InputSplit::all(splits) {
            let mut part: Vec<_> = reader.open(split).await.unwrap().try_collect().await.unwrap();
            all.append(&mut part);
        }
        all
    }

    #[tokio::test]
    async fn test_generated_splits_cover_every_id_once() {
        let reader = GeneratedReader::new(10);
        let vertices = read_all(&reader, 3).await;
        let ids: Vec<u64> = vertices.iter().map(|v| v.id).collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());

        let last = &vertices[9];
        assert_eq!(last.edges[0].target, 0);
        assert_eq!(last.edges[0].value, 900.0);
        assert_eq!(reader.range(InputSplit::new(0, 3)), 0..3);
    }

    #[tokio::test]
    async fn test_generated_empty() {
        assert!(read_all(&GeneratedReader::new(0), 4).await.is_empty());
    }

    #[tokio::test]
    async fn test_fixture_round_robin() {
        let reader = FixtureReader::page_rank();
        let first = read_all(&reader, 1).await;
        let split = read_all(&reader, 2).await;
        assert_eq!(first.len(), 5);
        assert_eq!(split.len(), 5);
        assert!(first[4].edges.is_empty());
    }
}
