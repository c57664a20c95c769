//! Round planning
//!
//! Splits the cache misses of one round into the chunk sent now and the
//! requests left for later rounds. Pure, so the scheduling rules can be
//! tested without a network.

use std::collections::HashMap;

use super::BatchConfig;
use crate::api::CacheKey;
use crate::api::request::DataRequest;
use crate::api::request::Pending;

/// Every request that shares one cache key.
///
/// The first request is the representative sent over the wire.
#[derive(Debug)]
pub(crate) struct KeyGroup {
    pub key: CacheKey,
    pub requests: Vec<DataRequest>,
}

impl KeyGroup {
    pub fn representative(&self) -> &DataRequest {
        &self.requests[0]
    }
}

/// What one round sends and what it leaves behind.
#[derive(Debug, Default)]
pub(crate) struct RoundPlan {
    /// Deduplicated groups sent in this round's network call.
    pub chunk: Vec<KeyGroup>,
    /// Requests of later chunks followed by deferred low-priority requests.
    pub remaining: Vec<Pending>,
}

impl RoundPlan {
    pub fn is_empty(&self) -> bool {
        self.chunk.is_empty() && self.remaining.is_empty()
    }
}

/// Plans one round over the requests the cache couldn't answer.
///
/// 1. Stable sort by ascending priority.
/// 2. If anything is below the priority threshold, defer everything at or
///    above it.
/// 3. Group by cache key, keeping first-occurrence order.
/// 4. Send the first `chunk_size` groups; the rest wait.
pub(crate) fn plan_round(mut misses: Vec<Pending>, config: &BatchConfig) -> RoundPlan {
    misses.sort_by_key(|pending| pending.request.priority);

    let threshold = config.priority_threshold;
    let high_priority_present = misses
        .iter()
        .any(|pending| pending.request.priority < threshold);

    let (current, deferred): (Vec<Pending>, Vec<Pending>) = if high_priority_present {
        misses
            .into_iter()
            .partition(|pending| pending.request.priority < threshold)
    } else {
        (misses, Vec::new())
    };

    let mut groups = dedup(current);
    let chunk_size = config.chunk_size.max(1);
    let later = if groups.len() > chunk_size {
        groups.split_off(chunk_size)
    } else {
        Vec::new()
    };

    let mut remaining: Vec<Pending> = later
        .into_iter()
        .flat_map(|group| {
            let key = group.key;
            group.requests.into_iter().map(move |request| Pending {
                key: key.clone(),
                request,
            })
        })
        .collect();
    remaining.extend(deferred);

    RoundPlan {
        chunk: groups,
        remaining,
    }
}

fn dedup(pending: Vec<Pending>) -> Vec<KeyGroup> {
    let mut groups: Vec<KeyGroup> = Vec::new();
    let mut index: HashMap<CacheKey, usize> = HashMap::new();

    for Pending { key, request } in pending {
        match index.get(&key) {
            Some(&position) => groups[position].requests.push(request),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(KeyGroup {
                    key,
                    requests: vec![request],
                });
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;

    use super::*;

    fn pending(datapoint: &str, priority: u32) -> Pending {
        Pending::new(DataRequest::module("analytics", datapoint).priority(priority))
    }

    fn datapoints(groups: &[KeyGroup]) -> Vec<&str> {
        groups
            .iter()
            .map(|group| group.representative().datapoint.as_str())
            .collect()
    }

    #[test]
    fn test_small_batch_fits_one_chunk() {
        let misses = (0..7).map(|i| pending(&format!("p{i}"), 1)).collect();
        let plan = plan_round(misses, &BatchConfig::default());

        assert_eq!(plan.chunk.len(), 7);
        assert!(plan.remaining.is_empty());
    }

    #[test]
    fn test_chunks_at_ten() {
        let misses = (0..15).map(|i| pending(&format!("p{i}"), 1)).collect();
        let plan = plan_round(misses, &BatchConfig::default());

        assert_eq!(plan.chunk.len(), 10);
        assert_eq!(plan.remaining.len(), 5);
        assert_eq!(plan.remaining[0].request.datapoint, "p10");
    }

    #[test]
    fn test_duplicates_share_one_slot() {
        let misses = vec![
            pending("a", 1),
            pending("b", 1),
            pending("a", 1),
            pending("a", 1),
        ];
        let plan = plan_round(misses, &BatchConfig::default());

        assert_eq!(datapoints(&plan.chunk), vec!["a", "b"]);
        assert_eq!(plan.chunk[0].requests.len(), 3);
        let keys: HashSet<&CacheKey> = plan.chunk.iter().map(|group| &group.key).collect();
        assert_eq!(keys.len(), plan.chunk.len());
    }

    #[test]
    fn test_duplicates_never_split_across_chunks() {
        let config = BatchConfig::default().with_chunk_size(2);
        let misses = vec![
            pending("a", 1),
            pending("b", 1),
            pending("c", 1),
            pending("a", 1),
            pending("c", 1),
        ];
        let plan = plan_round(misses, &config);

        assert_eq!(datapoints(&plan.chunk), vec!["a", "b"]);
        assert_eq!(plan.chunk[0].requests.len(), 2);
        assert_eq!(plan.remaining.len(), 2);
        assert!(plan.remaining.iter().all(|p| p.request.datapoint == "c"));
    }

    #[test]
    fn test_low_priority_deferred_when_high_priority_present() {
        let misses = vec![
            pending("slow-1", 20),
            pending("fast-1", 1),
            pending("slow-2", 10),
            pending("fast-2", 5),
        ];
        let plan = plan_round(misses, &BatchConfig::default());

        assert_eq!(datapoints(&plan.chunk), vec!["fast-1", "fast-2"]);
        let deferred: Vec<&str> = plan
            .remaining
            .iter()
            .map(|p| p.request.datapoint.as_str())
            .collect();
        assert_eq!(deferred, vec!["slow-2", "slow-1"]);
    }

    #[test]
    fn test_only_low_priority_is_sent_now() {
        let misses = vec![pending("a", 10), pending("b", 30)];
        let plan = plan_round(misses, &BatchConfig::default());

        assert_eq!(datapoints(&plan.chunk), vec!["a", "b"]);
        assert!(plan.remaining.is_empty());
    }

    #[test]
    fn test_priority_ties_keep_input_order() {
        let misses = vec![pending("c", 2), pending("a", 2), pending("b", 1)];
        let plan = plan_round(misses, &BatchConfig::default());
        assert_eq!(datapoints(&plan.chunk), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_later_chunks_come_before_deferred() {
        let config = BatchConfig::default().with_chunk_size(1);
        let misses = vec![pending("low", 50), pending("a", 1), pending("b", 1)];
        let plan = plan_round(misses, &config);

        let remaining: Vec<&str> = plan
            .remaining
            .iter()
            .map(|p| p.request.datapoint.as_str())
            .collect();
        assert_eq!(datapoints(&plan.chunk), vec!["a"]);
        assert_eq!(remaining, vec!["b", "low"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(plan_round(Vec::new(), &BatchConfig::default()).is_empty());
    }
}
