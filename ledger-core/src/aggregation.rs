//! Aggregation Store: first-writer-wins identity map plus a time-ordered index
//!
//! Used by the lightweight deployment, where each peer converges on the same
//! totals by ingesting broadcast settlement results. The identity map is the
//! only duplicate suppression in that deployment.

use crate::metrics::AGGREGATION_INSERTS_TOTAL;
use crate::storage::SettlementLog;
use crate::types::{SettlementResult, Summary};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use uuid::Uuid;

/// Concurrent store of settlement results indexed by settlement time
#[derive(Debug, Default)]
pub struct AggregationStore {
    identities: DashMap<Uuid, SettlementResult>,
    index: RwLock<BTreeMap<DateTime<Utc>, Vec<SettlementResult>>>,
}

impl AggregationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a result. A correlation id already present is a silent no-op;
    /// returns whether the result was stored.
    pub fn insert(&self, result: SettlementResult) -> bool {
        match self.identities.entry(result.correlation_id) {
            Entry::Occupied(_) => {
                AGGREGATION_INSERTS_TOTAL.with_label_values(&["duplicate"]).inc();
                false
            }
            Entry::Vacant(vacant) => {
                // Index under the identity shard lock so a racing duplicate
                // cannot slip in between the two structures.
                self.index
                    .write()
                    .entry(result.settled_at)
                    .or_default()
                    .push(result.clone());
                vacant.insert(result);
                AGGREGATION_INSERTS_TOTAL.with_label_values(&["inserted"]).inc();
                true
            }
        }
    }

    /// Whether a correlation id has been ingested
    pub fn contains(&self, correlation_id: &Uuid) -> bool {
        self.identities.contains_key(correlation_id)
    }

    /// Number of distinct results
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Whether nothing has been ingested
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Results with `from <= settled_at <= to` in timestamp order, insertion
    /// order within one timestamp. Open ends are unbounded.
    pub fn range(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<SettlementResult> {
        let index = self.index.read();
        match bounds(from, to) {
            Some(range) if !index.is_empty() => index
                .range(range)
                .flat_map(|(_, results)| results.iter().cloned())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Totals per processor over the inclusive range
    pub fn summary(&self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Summary {
        let index = self.index.read();
        match bounds(from, to) {
            Some(range) if !index.is_empty() => index
                .range(range)
                .flat_map(|(_, results)| results.iter())
                .collect(),
            _ => Summary::default(),
        }
    }
}

type TimeBounds = (Bound<DateTime<Utc>>, Bound<DateTime<Utc>>);

/// Inclusive bounds, or `None` for an inverted range (which matches nothing)
fn bounds(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Option<TimeBounds> {
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return None;
        }
    }
    Some((
        from.map_or(Bound::Unbounded, Bound::Included),
        to.map_or(Bound::Unbounded, Bound::Included),
    ))
}

#[async_trait]
impl SettlementLog for AggregationStore {
    async fn append(&self, result: &SettlementResult) -> Result<bool> {
        Ok(self.insert(result.clone()))
    }

    async fn summary(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Summary> {
        Ok(AggregationStore::summary(self, from, to))
    }
}
