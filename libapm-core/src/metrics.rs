// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Name keyed metric tables. A transaction keeps two of them: scoped metrics, which belong to the
//! transaction name, and unscoped metrics, which are rolled up across the application.

use crate::apdex::ApdexZone;
use indexmap::IndexMap;
use libapm_common::time::Micros;
use tracing::debug;

/// Statistics accumulated under one metric name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricData {
    Plain {
        count: u64,
        total: Micros,
        exclusive: Micros,
        min: Micros,
        max: Micros,
        /// Sum of squared durations, in µs².
        sum_squares: f64,
    },
    Apdex {
        satisfying: u64,
        tolerating: u64,
        failing: u64,
        min: Micros,
        max: Micros,
    },
}

impl MetricData {
    fn plain(duration: Micros, exclusive: Micros) -> Self {
        MetricData::Plain {
            count: 1,
            total: duration,
            exclusive,
            min: duration,
            max: duration,
            sum_squares: (duration as f64) * (duration as f64),
        }
    }

    fn empty_apdex() -> Self {
        MetricData::Apdex {
            satisfying: 0,
            tolerating: 0,
            failing: 0,
            min: 0,
            max: 0,
        }
    }

    pub fn is_apdex(&self) -> bool {
        matches!(self, MetricData::Apdex { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    data: MetricData,
    forced: bool,
}

impl Metric {
    pub fn data(&self) -> &MetricData {
        &self.data
    }

    /// Forced metrics are reported even when they carry no time.
    pub fn is_forced(&self) -> bool {
        self.forced
    }

    /// Call count of a plain metric, zero for apdex metrics.
    pub fn count(&self) -> u64 {
        match self.data {
            MetricData::Plain { count, .. } => count,
            MetricData::Apdex { .. } => 0,
        }
    }

    /// Total time of a plain metric, zero for apdex metrics.
    pub fn total(&self) -> Micros {
        match self.data {
            MetricData::Plain { total, .. } => total,
            MetricData::Apdex { .. } => 0,
        }
    }
}

/// A table of metrics, iterated in insertion order.
///
/// The table has no size limit; repeated additions to the same name accumulate.
#[derive(Debug, Clone, Default)]
pub struct MetricTable {
    metrics: IndexMap<String, Metric>,
}

impl MetricTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&Metric> {
        self.metrics.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Metric)> {
        self.metrics.iter().map(|(name, metric)| (name.as_str(), metric))
    }

    /// Records one call of `duration`, of which `exclusive` was spent outside of children.
    pub fn add(&mut self, name: &str, duration: Micros, exclusive: Micros) {
        self.add_plain(name, duration, exclusive, false);
    }

    /// Records a zero length call and marks the metric as always reported.
    pub fn force_add(&mut self, name: &str) {
        self.add_plain(name, 0, 0, true);
    }

    fn add_plain(&mut self, name: &str, duration: Micros, exclusive: Micros, forced: bool) {
        if name.is_empty() {
            return;
        }
        match self.metrics.get_mut(name) {
            None => {
                self.metrics.insert(
                    name.to_string(),
                    Metric {
                        data: MetricData::plain(duration, exclusive),
                        forced,
                    },
                );
            }
            Some(metric) => {
                metric.forced |= forced;
                match &mut metric.data {
                    MetricData::Plain {
                        count,
                        total,
                        exclusive: excl,
                        min,
                        max,
                        sum_squares,
                    } => {
                        *count += 1;
                        *total = total.saturating_add(duration);
                        *excl = excl.saturating_add(exclusive);
                        *min = (*min).min(duration);
                        *max = (*max).max(duration);
                        *sum_squares += (duration as f64) * (duration as f64);
                    }
                    MetricData::Apdex { .. } => {
                        debug!(metric = name, "timed value added to an apdex metric, ignored");
                    }
                }
            }
        }
    }

    /// Adds apdex counts to `name`.
    pub fn add_apdex(&mut self, name: &str, satisfying: u64, tolerating: u64, failing: u64) {
        if let Some(MetricData::Apdex {
            satisfying: s,
            tolerating: t,
            failing: f,
            ..
        }) = self.apdex_entry(name)
        {
            *s += satisfying;
            *t += tolerating;
            *f += failing;
        }
    }

    /// Adds one observation in `zone`. The apdex min and max record the threshold in force.
    pub fn add_apdex_zone(&mut self, name: &str, zone: ApdexZone, apdex_t: Micros) {
        let was_empty = matches!(
            self.find(name).map(Metric::data),
            None | Some(MetricData::Apdex {
                satisfying: 0,
                tolerating: 0,
                failing: 0,
                ..
            })
        );
        let Some(MetricData::Apdex {
            satisfying,
            tolerating,
            failing,
            min,
            max,
        }) = self.apdex_entry(name)
        else {
            return;
        };
        match zone {
            ApdexZone::Satisfying => *satisfying += 1,
            ApdexZone::Tolerating => *tolerating += 1,
            ApdexZone::Failing => *failing += 1,
        }
        if was_empty {
            *min = apdex_t;
            *max = apdex_t;
        } else {
            *min = (*min).min(apdex_t);
            *max = (*max).max(apdex_t);
        }
    }

    fn apdex_entry(&mut self, name: &str) -> Option<&mut MetricData> {
        if name.is_empty() {
            return None;
        }
        let metric = self
            .metrics
            .entry(name.to_string())
            .or_insert_with(|| Metric {
                data: MetricData::empty_apdex(),
                forced: false,
            });
        if !metric.data.is_apdex() {
            debug!(metric = name, "apdex value added to a timed metric, ignored");
            return None;
        }
        Some(&mut metric.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_accumulates() {
        let mut table = MetricTable::new();
        table.add("Custom/a", 100, 40);
        table.add("Custom/a", 300, 300);
        table.add("Custom/b", 5, 5);

        assert_eq!(table.size(), 2);
        assert_eq!(
            *table.find("Custom/a").unwrap().data(),
            MetricData::Plain {
                count: 2,
                total: 400,
                exclusive: 340,
                min: 100,
                max: 300,
                sum_squares: 100_000.0,
            }
        );
    }

    #[test]
    fn test_insertion_order() {
        let mut table = MetricTable::new();
        for name in ["c", "a", "b", "a"] {
            table.add(name, 1, 1);
        }
        let names: Vec<&str> = table.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_force_add() {
        let mut table = MetricTable::new();
        table.force_add("Errors/all");
        let metric = table.find("Errors/all").unwrap();
        assert!(metric.is_forced());
        assert_eq!(metric.count(), 1);
        assert_eq!(metric.total(), 0);

        table.add("Errors/all", 0, 0);
        let metric = table.find("Errors/all").unwrap();
        assert!(metric.is_forced());
        assert_eq!(metric.count(), 2);
    }

    #[test]
    fn test_apdex() {
        let mut table = MetricTable::new();
        table.add_apdex_zone("Apdex", ApdexZone::Satisfying, 500);
        table.add_apdex_zone("Apdex", ApdexZone::Failing, 200);
        table.add_apdex("Apdex", 0, 2, 0);

        assert_eq!(
            *table.find("Apdex").unwrap().data(),
            MetricData::Apdex {
                satisfying: 1,
                tolerating: 2,
                failing: 1,
                min: 200,
                max: 500,
            }
        );
    }

    #[test]
    fn test_shapes_do_not_mix() {
        let mut table = MetricTable::new();
        table.add("Mixed", 10, 10);
        table.add_apdex("Mixed", 1, 0, 0);
        assert!(!table.find("Mixed").unwrap().data().is_apdex());

        table.add_apdex("Apdex", 1, 0, 0);
        table.add("Apdex", 10, 10);
        assert!(table.find("Apdex").unwrap().data().is_apdex());
    }

    #[test]
    fn test_empty_name_ignored() {
        let mut table = MetricTable::new();
        table.add("", 1, 1);
        table.add_apdex("", 1, 1, 1);
        assert!(table.is_empty());
    }
}
