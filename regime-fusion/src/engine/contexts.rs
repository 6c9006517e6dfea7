//! Independent evaluation contexts.
//!
//! One [`FusionEngine`] per `(symbol, timeframe)`. Contexts share no
//! mutable state, so a batch of cycle inputs is evaluated in parallel.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::FusionResult;

use super::cycle::{CycleInput, CycleOutput, EngineConfig, FusionEngine};

/// Identifies one evaluation context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextKey {
    pub symbol: String,
    pub timeframe: String,
}

impl ContextKey {
    pub fn new(symbol: impl Into<String>, timeframe: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

/// Result of one context in a batch.
pub type ContextResult<'a> = (ContextKey, FusionResult<CycleOutput<'a>>);

/// Set of isolated engines sharing one configuration.
#[derive(Debug)]
pub struct ContextSet {
    config: EngineConfig,
    engines: HashMap<ContextKey, FusionEngine>,
}

impl ContextSet {
    pub fn new(config: EngineConfig) -> FusionResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            engines: HashMap::new(),
        })
    }

    /// Engine for `key`, created on first use.
    pub fn ensure(&mut self, key: ContextKey) -> FusionResult<&mut FusionEngine> {
        match self.engines.entry(key) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => {
                let engine = FusionEngine::new(self.config.clone())?;
                Ok(slot.insert(engine))
            }
        }
    }

    pub fn engine(&self, key: &ContextKey) -> Option<&FusionEngine> {
        self.engines.get(key)
    }

    pub fn remove(&mut self, key: &ContextKey) -> Option<FusionEngine> {
        self.engines.remove(key)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Evaluate one cycle per context in parallel, ordered by key.
    pub fn evaluate_all<'a>(
        &mut self,
        inputs: &'a HashMap<ContextKey, CycleInput>,
    ) -> FusionResult<Vec<ContextResult<'a>>> {
        for key in inputs.keys() {
            self.ensure(key.clone())?;
        }

        let mut results: Vec<ContextResult<'a>> = self
            .engines
            .par_iter_mut()
            .filter_map(|(key, engine)| {
                inputs
                    .get(key)
                    .map(|input| (key.clone(), engine.evaluate(input)))
            })
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        info!(
            contexts = results.len(),
            failed,
            "Evaluated context batch"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_key_display() {
        assert_eq!(ContextKey::new("BTC-USD", "1h").to_string(), "BTC-USD@1h");
    }

    #[test]
    fn test_ensure_creates_once() {
        let mut set = ContextSet::new(EngineConfig::default()).unwrap();
        let key = ContextKey::new("ETH-USD", "15m");
        set.ensure(key.clone()).unwrap();
        set.ensure(key.clone()).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.engine(&key).unwrap().cycles(), 0);
        assert!(set.remove(&key).is_some());
        assert!(set.is_empty());
    }
}
