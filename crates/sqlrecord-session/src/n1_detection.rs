//! N+1 query detection.
//!
//! Every association read that falls back to a single-record query is
//! counted per `(model, association)`. When one pair reaches the threshold a
//! warning is logged under the `sqlrecord::n1` target, pointing at dynamic
//! includes or an explicit `includes` as the fix.

use std::collections::HashMap;

/// Counts individual association loads on one connection handle.
#[derive(Debug, Clone)]
pub struct N1QueryTracker {
    /// (model, association) -> individual loads
    counts: HashMap<(String, String), usize>,
    threshold: usize,
    enabled: bool,
}

impl Default for N1QueryTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about individual association loads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct N1Stats {
    pub total_loads: usize,
    pub associations_loaded: usize,
    /// Associations that reached the threshold.
    pub potential_n1: usize,
}

impl N1QueryTracker {
    /// A tracker warning after 3 individual loads of one association.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            threshold: 3,
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Count one individual load and warn when the threshold is reached.
    pub fn record_load(&mut self, model: &str, association: &str) {
        if !self.enabled {
            return;
        }
        let count = self
            .counts
            .entry((model.to_string(), association.to_string()))
            .or_insert(0);
        *count += 1;

        if *count == self.threshold {
            tracing::warn!(
                target: "sqlrecord::n1",
                model = model,
                association = association,
                queries = *count,
                "N+1 query pattern: association loaded one record at a time; \
                 enable dynamic includes or preload it with includes()"
            );
        }
    }

    pub fn count_for(&self, model: &str, association: &str) -> usize {
        self.counts
            .get(&(model.to_string(), association.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn reset(&mut self) {
        self.counts.clear();
    }

    pub fn stats(&self) -> N1Stats {
        N1Stats {
            total_loads: self.counts.values().sum(),
            associations_loaded: self.counts.len(),
            potential_n1: self
                .counts
                .values()
                .filter(|&&c| c >= self.threshold)
                .count(),
        }
    }
}
