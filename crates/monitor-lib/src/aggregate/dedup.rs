//! One-row-per-workload views of a sample sequence

use crate::models::Sample;
use std::collections::HashSet;
use std::hash::Hash;

/// Collapse repeated observations of the same workload (by `uid`)
///
/// The earliest observation wins; equal timestamps keep input order. The
/// result is ordered by timestamp, which makes the operation idempotent.
pub fn dedup(samples: &[Sample]) -> Vec<Sample> {
    dedup_by_key(samples, |s| s.uid.clone())
}

/// Like [`dedup`], keyed by an arbitrary workload key
pub fn dedup_by_key<K, F>(samples: &[Sample], key_fn: F) -> Vec<Sample>
where
    K: Eq + Hash,
    F: Fn(&Sample) -> K,
{
    let mut ordered: Vec<&Sample> = samples.iter().collect();
    // sort_by is stable, so ties keep input order
    ordered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    let mut seen = HashSet::with_capacity(ordered.len());
    ordered
        .into_iter()
        .filter(|s| seen.insert(key_fn(*s)))
        .cloned()
        .collect()
}

/// Number of distinct workloads (by `uid`)
pub fn unique_workloads(samples: &[Sample]) -> usize {
    samples
        .iter()
        .map(|s| s.uid.as_str())
        .collect::<HashSet<_>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn sample(uid: &str, minute: i64, queue: f64) -> Sample {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        Sample {
            timestamp: base + Duration::minutes(minute),
            namespace: "a".to_string(),
            name: format!("pod-{}", uid),
            uid: uid.to_string(),
            queue_time_secs: queue,
            creation_time: base,
            start_time: base,
        }
    }

    #[test]
    fn test_dedup_keeps_earliest_observation() {
        let samples = vec![sample("1", 5, 12.0), sample("1", 1, 10.0), sample("2", 3, 5.0)];

        let deduped = dedup(&samples);
        assert_eq!(deduped.len(), 2);

        let first = deduped.iter().find(|s| s.uid == "1").unwrap();
        assert_eq!(first.queue_time_secs, 10.0);
    }

    #[test]
    fn test_dedup_tie_keeps_input_order() {
        let samples = vec![sample("1", 0, 7.0), sample("1", 0, 9.0)];
        let deduped = dedup(&samples);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].queue_time_secs, 7.0);
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let samples = vec![
            sample("3", 2, 1.0),
            sample("1", 4, 2.0),
            sample("2", 1, 3.0),
            sample("1", 0, 4.0),
            sample("3", 2, 5.0),
        ];

        let once = dedup(&samples);
        let twice = dedup(&once);
        assert_eq!(once, twice);
        assert!(once.len() <= unique_workloads(&samples));
    }

    #[test]
    fn test_dedup_empty() {
        assert!(dedup(&[]).is_empty());
        assert_eq!(unique_workloads(&[]), 0);
    }

    #[test]
    fn test_dedup_by_custom_key() {
        let mut other = sample("9", 0, 1.0);
        other.name = "pod-1".to_string();
        let samples = vec![sample("1", 1, 2.0), other];

        let deduped = dedup_by_key(&samples, |s| (s.namespace.clone(), s.name.clone()));
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].uid, "9");
    }
}
