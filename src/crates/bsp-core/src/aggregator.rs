//! Named global aggregators
//!
//! An aggregator is a named accumulator with an identity and a commutative,
//! associative merge. During superstep `S` each partition folds the
//! contributions of its vertices into a [`PartialAggregates`]; the
//! coordinator folds those partials into one [`AggregateMerger`] as reports
//! arrive, and the result becomes the [`AggregatedValues`] every vertex reads
//! during `S + 1`. Every superstep starts again from the identities.
//!
//! ```rust
//! use bsp_core::aggregator::{AggregateValue, AggregatorRegistry, DoubleMax, LongSum};
//!
//! let mut registry = AggregatorRegistry::new();
//! registry.register("max", DoubleMax).unwrap();
//! registry.register("count", LongSum).unwrap();
//!
//! let mut partial = registry.partial();
//! partial.contribute(&registry, "max", AggregateValue::Double(0.25)).unwrap();
//! partial.contribute(&registry, "count", AggregateValue::Long(1)).unwrap();
//!
//! let mut merger = registry.merger();
//! merger.absorb(&partial).unwrap();
//! let values = merger.finish();
//! assert_eq!(values.get_double("max"), Some(0.25));
//! assert_eq!(values.get_long("count"), Some(1));
//! ```

use crate::error::{BspError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Value carried by an aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AggregateValue {
    Long(i64),
    Double(f64),
    Bool(bool),
}

impl AggregateValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AggregateValue::Long(_) => "long",
            AggregateValue::Double(_) => "double",
            AggregateValue::Bool(_) => "bool",
        }
    }

    pub fn same_type(&self, other: &AggregateValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            AggregateValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            AggregateValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AggregateValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for AggregateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateValue::Long(v) => write!(f, "{}", v),
            AggregateValue::Double(v) => write!(f, "{}", v),
            AggregateValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for AggregateValue {
    fn from(v: i64) -> Self {
        AggregateValue::Long(v)
    }
}

impl From<f64> for AggregateValue {
    fn from(v: f64) -> Self {
        AggregateValue::Double(v)
    }
}

impl From<bool> for AggregateValue {
    fn from(v: bool) -> Self {
        AggregateValue::Bool(v)
    }
}

/// A named accumulator: identity plus a commutative, associative merge.
///
/// `merge` is only ever called with values of the identity's type; the
/// registry rejects anything else before it gets here.
pub trait Aggregator: Send + Sync {
    fn identity(&self) -> AggregateValue;

    fn merge(&self, a: AggregateValue, b: AggregateValue) -> AggregateValue;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LongSum;

impl Aggregator for LongSum {
    fn identity(&self) -> AggregateValue {
        AggregateValue::Long(0)
    }

    fn merge(&self, a: AggregateValue, b: AggregateValue) -> AggregateValue {
        match (a, b) {
            (AggregateValue::Long(x), AggregateValue::Long(y)) => {
                AggregateValue::Long(x.wrapping_add(y))
            }
            _ => a,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleSum;

impl Aggregator for DoubleSum {
    fn identity(&self) -> AggregateValue {
        AggregateValue::Double(0.0)
    }

    fn merge(&self, a: AggregateValue, b: AggregateValue) -> AggregateValue {
        match (a, b) {
            (AggregateValue::Double(x), AggregateValue::Double(y)) => AggregateValue::Double(x + y),
            _ => a,
        }
    }
}

/// Maximum of doubles. Identity is `f64::MIN`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleMax;

impl Aggregator for DoubleMax {
    fn identity(&self) -> AggregateValue {
        AggregateValue::Double(f64::MIN)
    }

    fn merge(&self, a: AggregateValue, b: AggregateValue) -> AggregateValue {
        match (a, b) {
            (AggregateValue::Double(x), AggregateValue::Double(y)) => {
                AggregateValue::Double(x.max(y))
            }
            _ => a,
        }
    }
}

/// Minimum of doubles. Identity is `f64::MAX`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleMin;

impl Aggregator for DoubleMin {
    fn identity(&self) -> AggregateValue {
        AggregateValue::Double(f64::MAX)
    }

    fn merge(&self, a: AggregateValue, b: AggregateValue) -> AggregateValue {
        match (a, b) {
            (AggregateValue::Double(x), AggregateValue::Double(y)) => {
                AggregateValue::Double(x.min(y))
            }
            _ => a,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanAnd;

impl Aggregator for BooleanAnd {
    fn identity(&self) -> AggregateValue {
        AggregateValue::Bool(true)
    }

    fn merge(&self, a: AggregateValue, b: AggregateValue) -> AggregateValue {
        match (a, b) {
            (AggregateValue::Bool(x), AggregateValue::Bool(y)) => AggregateValue::Bool(x && y),
            _ => a,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanOr;

impl Aggregator for BooleanOr {
    fn identity(&self) -> AggregateValue {
        AggregateValue::Bool(false)
    }

    fn merge(&self, a: AggregateValue, b: AggregateValue) -> AggregateValue {
        match (a, b) {
            (AggregateValue::Bool(x), AggregateValue::Bool(y)) => AggregateValue::Bool(x || y),
            _ => a,
        }
    }
}

/// Aggregator built from an identity and a closure.
pub struct FnAggregator<F> {
    identity: AggregateValue,
    merge: F,
}

impl<F> FnAggregator<F>
where
    F: Fn(AggregateValue, AggregateValue) -> AggregateValue + Send + Sync,
{
    pub fn new(identity: AggregateValue, merge: F) -> Self {
        Self { identity, merge }
    }
}

impl<F> Aggregator for FnAggregator<F>
where
    F: Fn(AggregateValue, AggregateValue) -> AggregateValue + Send + Sync,
{
    fn identity(&self) -> AggregateValue {
        self.identity
    }

    fn merge(&self, a: AggregateValue, b: AggregateValue) -> AggregateValue {
        (self.merge)(a, b)
    }
}

/// Aggregators declared for a job, by name.
#[derive(Clone, Default)]
pub struct AggregatorRegistry {
    aggregators: BTreeMap<String, Arc<dyn Aggregator>>,
}

impl fmt::Debug for AggregatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregatorRegistry")
            .field("names", &self.aggregators.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AggregatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an aggregator. Names must be unique.
    pub fn register(&mut self, name: impl Into<String>, aggregator: impl Aggregator + 'static) -> Result<()> {
        self.register_arc(name, Arc::new(aggregator))
    }

    pub fn register_arc(&mut self, name: impl Into<String>, aggregator: Arc<dyn Aggregator>) -> Result<()> {
        let name = name.into();
        if self.aggregators.contains_key(&name) {
            return Err(BspError::Aggregator(format!(
                "aggregator '{}' registered twice",
                name
            )));
        }
        self.aggregators.insert(name, aggregator);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.aggregators.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.aggregators.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.aggregators.keys().map(String::as_str)
    }

    fn lookup(&self, name: &str) -> Result<&Arc<dyn Aggregator>> {
        self.aggregators
            .get(name)
            .ok_or_else(|| BspError::Aggregator(format!("unknown aggregator '{}'", name)))
    }

    /// Merge `value` into `acc[name]`, checking the name and the value type.
    fn fold(
        &self,
        acc: &mut BTreeMap<String, AggregateValue>,
        name: &str,
        value: AggregateValue,
    ) -> Result<()> {
        let aggregator = self.lookup(name)?;
        let identity = aggregator.identity();
        if !identity.same_type(&value) {
            return Err(BspError::Aggregator(format!(
                "aggregator '{}' expects {} but got {}",
                name,
                identity.type_name(),
                value.type_name()
            )));
        }
        let current = acc.get(name).copied().unwrap_or(identity);
        acc.insert(name.to_string(), aggregator.merge(current, value));
        Ok(())
    }

    /// Every aggregator at its identity.
    pub fn identities(&self) -> AggregatedValues {
        AggregatedValues {
            values: self
                .aggregators
                .iter()
                .map(|(name, agg)| (name.clone(), agg.identity()))
                .collect(),
        }
    }

    /// Empty per-partition accumulator.
    pub fn partial(&self) -> PartialAggregates {
        PartialAggregates::default()
    }

    /// Coordinator-side accumulator starting at the identities.
    pub fn merger(&self) -> AggregateMerger<'_> {
        AggregateMerger {
            registry: self,
            values: self.identities().values,
        }
    }
}

/// Contributions of one partition during one superstep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialAggregates {
    values: BTreeMap<String, AggregateValue>,
}

impl PartialAggregates {
    pub fn contribute(
        &mut self,
        registry: &AggregatorRegistry,
        name: &str,
        value: AggregateValue,
    ) -> Result<()> {
        registry.fold(&mut self.values, name, value)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, AggregateValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Streaming merge of partition partials for one superstep.
pub struct AggregateMerger<'a> {
    registry: &'a AggregatorRegistry,
    values: BTreeMap<String, AggregateValue>,
}

impl AggregateMerger<'_> {
    pub fn absorb(&mut self, partial: &PartialAggregates) -> Result<()> {
        for (name, value) in partial.iter() {
            self.registry.fold(&mut self.values, name, value)?;
        }
        Ok(())
    }

    pub fn finish(self) -> AggregatedValues {
        AggregatedValues {
            values: self.values,
        }
    }
}

/// Globally merged values, as visible to vertices in the next superstep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregatedValues {
    values: BTreeMap<String, AggregateValue>,
}

impl AggregatedValues {
    pub fn get(&self, name: &str) -> Option<AggregateValue> {
        self.values.get(name).copied()
    }

    pub fn get_long(&self, name: &str) -> Option<i64> {
        self.get(name)?.as_long()
    }

    pub fn get_double(&self, name: &str) -> Option<f64> {
        self.get(name)?.as_double()
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name)?.as_bool()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, AggregateValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn into_map(self) -> BTreeMap<String, AggregateValue> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> AggregatorRegistry {
        let mut registry = AggregatorRegistry::new();
        registry.register("sum", LongSum).unwrap();
        registry.register("total", DoubleSum).unwrap();
        registry.register("max", DoubleMax).unwrap();
        registry.register("min", DoubleMin).unwrap();
        registry.register("all", BooleanAnd).unwrap();
        registry.register("any", BooleanOr).unwrap();
        registry
    }

    #[test]
    fn test_identities() {
        let values = registry().identities();
        assert_eq!(values.get_long("sum"), Some(0));
        assert_eq!(values.get_double("max"), Some(f64::MIN));
        assert_eq!(values.get_double("min"), Some(f64::MAX));
        assert_eq!(values.get_bool("all"), Some(true));
        assert_eq!(values.get_bool("any"), Some(false));
        assert_eq!(values.len(), 6);
    }

    #[test]
    fn test_streaming_merge_across_partitions() {
        let registry = registry();
        let mut a = registry.partial();
        a.contribute(&registry, "sum", 2i64.into()).unwrap();
        a.contribute(&registry, "max", 0.5.into()).unwrap();
        a.contribute(&registry, "any", false.into()).unwrap();

        let mut b = registry.partial();
        b.contribute(&registry, "sum", 3i64.into()).unwrap();
        b.contribute(&registry, "max", 0.75.into()).unwrap();
        b.contribute(&registry, "min", 0.1.into()).unwrap();
        b.contribute(&registry, "any", true.into()).unwrap();
        b.contribute(&registry, "all", false.into()).unwrap();

        let mut merger = registry.merger();
        merger.absorb(&a).unwrap();
        merger.absorb(&b).unwrap();
        let values = merger.finish();

        assert_eq!(values.get_long("sum"), Some(5));
        assert_eq!(values.get_double("max"), Some(0.75));
        assert_eq!(values.get_double("min"), Some(0.1));
        assert_eq!(values.get_double("total"), Some(0.0));
        assert_eq!(values.get_bool("any"), Some(true));
        assert_eq!(values.get_bool("all"), Some(false));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let registry = registry();
        let mut partial = registry.partial();
        let err = partial
            .contribute(&registry, "sum", AggregateValue::Double(1.0))
            .unwrap_err();
        assert!(matches!(err, BspError::Aggregator(_)));
        assert!(partial.is_empty());
    }

    #[test]
    fn test_unknown_and_duplicate_names() {
        let mut registry = registry();
        let mut partial = registry.partial();
        assert!(partial.contribute(&registry, "nope", 1i64.into()).is_err());
        assert!(registry.register("sum", LongSum).is_err());
    }

    #[test]
    fn test_fn_aggregator() {
        let mut registry = AggregatorRegistry::new();
        registry
            .register(
                "product",
                FnAggregator::new(AggregateValue::Long(1), |a, b| match (a, b) {
                    (AggregateValue::Long(x), AggregateValue::Long(y)) => AggregateValue::Long(x * y),
                    _ => a,
                }),
            )
            .unwrap();

        let mut merger = registry.merger();
        for factor in [2i64, 3, 7] {
            let mut partial = registry.partial();
            partial.contribute(&registry, "product", factor.into()).unwrap();
            merger.absorb(&partial).unwrap();
        }
        assert_eq!(merger.finish().get_long("product"), Some(42));
    }

    #[test]
    fn test_values_serialize() {
        let values = registry().identities();
        let codec = bsp_checkpoint::CheckpointCodec::Bincode;
        let bytes = codec.encode(&values).unwrap();
        let restored: AggregatedValues = codec.decode(&bytes).unwrap();
        assert_eq!(restored, values);
    }
}
