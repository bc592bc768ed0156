//! Duration measurement for finished operations.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::attributes::AttributeMap;
use crate::{Key, Value};

/// Observes every finished operation of a pipeline.
///
/// Recorders run synchronously at span end, after the end-side attribute
/// extractors, so they see the final attribute set. The duration comes from a
/// monotonic clock captured at start, not from the span's wall-clock
/// timestamps.
pub trait OperationMetrics: Send + Sync {
    /// Records one finished operation.
    fn record(&self, duration: Duration, attributes: &AttributeMap);
}

/// Aggregated durations for one attribute combination.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DurationSeries {
    /// Number of operations recorded.
    pub count: u64,
    /// Total time across all recorded operations.
    pub sum: Duration,
    /// Longest single operation recorded.
    pub max: Duration,
}

/// An in-memory duration aggregation grouped by a configured attribute
/// subset.
///
/// The recorder is configured with the attribute keys to group by; each
/// finished operation lands in the series matching its values for those keys.
/// An attribute the operation did not set counts as absent and forms its own
/// series, it does not merge with operations that set it. Clones share
/// storage.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use instrumenter::metrics::{DurationHistogram, OperationMetrics};
/// use instrumenter::{AttributeMap, KeyValue};
///
/// let histogram = DurationHistogram::new(["http.request.method".into()]);
///
/// let mut attributes = AttributeMap::new();
/// attributes.insert(KeyValue::new("http.request.method", "GET"));
/// attributes.insert(KeyValue::new("server.port", 8080));
/// histogram.record(Duration::from_millis(12), &attributes);
///
/// let series = histogram.snapshot();
/// assert_eq!(series.len(), 1);
/// assert_eq!(series[0].1.count, 1);
/// ```
#[derive(Clone, Debug)]
pub struct DurationHistogram {
    group_by: Vec<Key>,
    series: Arc<Mutex<Vec<(Vec<Option<Value>>, DurationSeries)>>>,
}

impl DurationHistogram {
    /// Creates a recorder grouping by the given attribute keys.
    pub fn new(group_by: impl IntoIterator<Item = Key>) -> Self {
        DurationHistogram {
            group_by: group_by.into_iter().collect(),
            series: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns every series recorded so far, as (group values, aggregate)
    /// pairs. Group values follow the order of the configured keys.
    pub fn snapshot(&self) -> Vec<(Vec<Option<Value>>, DurationSeries)> {
        self.series
            .lock()
            .map(|series| series.clone())
            .unwrap_or_default()
    }

    fn group_values(&self, attributes: &AttributeMap) -> Vec<Option<Value>> {
        self.group_by
            .iter()
            .map(|key| attributes.get(key.as_str()).cloned())
            .collect()
    }
}

impl OperationMetrics for DurationHistogram {
    fn record(&self, duration: Duration, attributes: &AttributeMap) {
        let group = self.group_values(attributes);
        let Ok(mut series) = self.series.lock() else {
            return;
        };
        match series.iter_mut().find(|(values, _)| *values == group) {
            Some((_, aggregate)) => {
                aggregate.count += 1;
                aggregate.sum += duration;
                aggregate.max = aggregate.max.max(duration);
            }
            None => series.push((
                group,
                DurationSeries {
                    count: 1,
                    sum: duration,
                    max: duration,
                },
            )),
        }
    }
}
