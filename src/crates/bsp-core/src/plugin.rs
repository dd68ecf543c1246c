//! Plug-in contracts and the registry that resolves them.
//!
//! A job is polymorphic over four capabilities: the vertex compute
//! function, the input reader, the output writer and the (optional)
//! combiner. Implementations are registered under string keys in a
//! [`PluginRegistry`] and resolved once at job start by
//! [`JobPlugins::resolve`]; nothing is discovered at runtime.
//!
//! ```rust,ignore
//! let mut registry = PluginRegistry::<DoubleGraph>::new();
//! registry.register_compute("page_rank", |_config| Ok(Arc::new(PageRank::default())));
//! registry.register_reader("generated", |config| Ok(Arc::new(GeneratedReader::new(config.generated_vertices))));
//!
//! let config = JobConfig::new("page_rank", "generated");
//! let plugins = JobPlugins::resolve(&config, &registry)?;
//! ```

use crate::aggregator::AggregatorRegistry;
use crate::config::JobConfig;
use crate::context::ComputeContext;
use crate::error::{BspError, ComputeError, Result};
use crate::types::{GraphTypes, Vertex};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// User vertex program.
///
/// Called once per superstep for every vertex that is active or has
/// incoming messages. It may change only its own vertex, through `ctx`.
pub trait VertexCompute<G: GraphTypes>: Send + Sync {
    fn compute(
        &self,
        ctx: &mut ComputeContext<'_, G>,
        messages: &[G::Message],
    ) -> std::result::Result<(), ComputeError>;

    /// Declare the aggregators this program contributes to or reads.
    fn register_aggregators(&self, _registry: &mut AggregatorRegistry) -> Result<()> {
        Ok(())
    }
}

/// Folds two messages for the same vertex into one.
///
/// Must be commutative and associative: the fold order is unspecified.
pub trait Combiner<G: GraphTypes>: Send + Sync {
    fn combine(&self, a: G::Message, b: G::Message) -> G::Message;
}

/// One slice of the input handed to a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputSplit {
    pub index: usize,
    pub total: usize,
}

impl InputSplit {
    pub fn new(index: usize, total: usize) -> Self {
        Self { index, total }
    }

    /// All splits of an input divided `total` ways.
    pub fn all(total: usize) -> Vec<InputSplit> {
        (0..total).map(|index| InputSplit { index, total }).collect()
    }
}

impl fmt::Display for InputSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.total)
    }
}

/// Lazy, finite sequence of initial vertices for one split.
pub type VertexStream<G> = BoxStream<'static, Result<Vertex<G>>>;

/// Produces the initial vertex set, one split at a time.
#[async_trait]
pub trait VertexInputReader<G: GraphTypes>: Send + Sync {
    async fn open(&self, split: InputSplit) -> Result<VertexStream<G>>;
}

/// Receives one record per vertex after the job completes.
#[async_trait]
pub trait VertexOutputWriter<G: GraphTypes>: Send + Sync {
    async fn write(&self, id: &G::Id, value: &G::Value) -> Result<()>;

    /// Called once after every worker has written its vertices.
    async fn finish(&self) -> Result<()> {
        Ok(())
    }
}

type Factory<T> = Arc<dyn Fn(&JobConfig) -> Result<Arc<T>> + Send + Sync>;

/// Maps configuration keys to plug-in constructors.
pub struct PluginRegistry<G: GraphTypes> {
    computes: BTreeMap<String, Factory<dyn VertexCompute<G>>>,
    readers: BTreeMap<String, Factory<dyn VertexInputReader<G>>>,
    writers: BTreeMap<String, Factory<dyn VertexOutputWriter<G>>>,
    combiners: BTreeMap<String, Factory<dyn Combiner<G>>>,
}

impl<G: GraphTypes> Default for PluginRegistry<G> {
    fn default() -> Self {
        Self {
            computes: BTreeMap::new(),
            readers: BTreeMap::new(),
            writers: BTreeMap::new(),
            combiners: BTreeMap::new(),
        }
    }
}

impl<G: GraphTypes> fmt::Debug for PluginRegistry<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("computes", &self.computes.keys().collect::<Vec<_>>())
            .field("readers", &self.readers.keys().collect::<Vec<_>>())
            .field("writers", &self.writers.keys().collect::<Vec<_>>())
            .field("combiners", &self.combiners.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<G: GraphTypes> PluginRegistry<G> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_compute<F>(&mut self, key: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&JobConfig) -> Result<Arc<dyn VertexCompute<G>>> + Send + Sync + 'static,
    {
        self.computes.insert(key.into(), Arc::new(factory));
        self
    }

    pub fn register_reader<F>(&mut self, key: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&JobConfig) -> Result<Arc<dyn VertexInputReader<G>>> + Send + Sync + 'static,
    {
        self.readers.insert(key.into(), Arc::new(factory));
        self
    }

    pub fn register_writer<F>(&mut self, key: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&JobConfig) -> Result<Arc<dyn VertexOutputWriter<G>>> + Send + Sync + 'static,
    {
        self.writers.insert(key.into(), Arc::new(factory));
        self
    }

    pub fn register_combiner<F>(&mut self, key: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&JobConfig) -> Result<Arc<dyn Combiner<G>>> + Send + Sync + 'static,
    {
        self.combiners.insert(key.into(), Arc::new(factory));
        self
    }

    pub fn compute_keys(&self) -> impl Iterator<Item = &str> {
        self.computes.keys().map(String::as_str)
    }

    pub fn reader_keys(&self) -> impl Iterator<Item = &str> {
        self.readers.keys().map(String::as_str)
    }

    pub fn writer_keys(&self) -> impl Iterator<Item = &str> {
        self.writers.keys().map(String::as_str)
    }

    pub fn combiner_keys(&self) -> impl Iterator<Item = &str> {
        self.combiners.keys().map(String::as_str)
    }
}

fn build<T: ?Sized>(
    kind: &str,
    key: &str,
    factories: &BTreeMap<String, Factory<T>>,
    config: &JobConfig,
) -> Result<Arc<T>> {
    let factory = factories.get(key).ok_or_else(|| {
        BspError::plugin(format!(
            "unknown {} '{}' (known: {})",
            kind,
            key,
            factories.keys().cloned().collect::<Vec<_>>().join(", ")
        ))
    })?;
    factory(config)
}

/// The resolved capability set of one job.
pub struct JobPlugins<G: GraphTypes> {
    pub compute: Arc<dyn VertexCompute<G>>,
    pub reader: Arc<dyn VertexInputReader<G>>,
    pub writer: Option<Arc<dyn VertexOutputWriter<G>>>,
    pub combiner: Option<Arc<dyn Combiner<G>>>,
}

impl<G: GraphTypes> Clone for JobPlugins<G> {
    fn clone(&self) -> Self {
        Self {
            compute: Arc::clone(&self.compute),
            reader: Arc::clone(&self.reader),
            writer: self.writer.clone(),
            combiner: self.combiner.clone(),
        }
    }
}

impl<G: GraphTypes> JobPlugins<G> {
    pub fn new(
        compute: Arc<dyn VertexCompute<G>>,
        reader: Arc<dyn VertexInputReader<G>>,
    ) -> Self {
        Self {
            compute,
            reader,
            writer: None,
            combiner: None,
        }
    }

    pub fn with_writer(mut self, writer: Arc<dyn VertexOutputWriter<G>>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_combiner(mut self, combiner: Arc<dyn Combiner<G>>) -> Self {
        self.combiner = Some(combiner);
        self
    }

    /// Resolve every key named in `config`.
    pub fn resolve(config: &JobConfig, registry: &PluginRegistry<G>) -> Result<Self> {
        let compute = build("compute", &config.compute, &registry.computes, config)?;
        let reader = build("input reader", &config.input, &registry.readers, config)?;
        let writer = config
            .output
            .as_deref()
            .map(|key| build("output writer", key, &registry.writers, config))
            .transpose()?;
        let combiner = config
            .combiner
            .as_deref()
            .map(|key| build("combiner", key, &registry.combiners, config))
            .transpose()?;

        tracing::debug!(
            compute = %config.compute,
            input = %config.input,
            output = ?config.output,
            combiner = ?config.combiner,
            "Plug-ins resolved"
        );

        Ok(Self {
            compute,
            reader,
            writer,
            combiner,
        })
    }
}
