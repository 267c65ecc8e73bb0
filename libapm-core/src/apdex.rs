// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use libapm_common::time::Micros;

/// User satisfaction bucket of a single response time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApdexZone {
    Satisfying,
    Tolerating,
    Failing,
}

impl ApdexZone {
    /// Classifies `duration` against threshold `apdex_t`: up to T is satisfying, up to 4T is
    /// tolerating, anything slower is failing.
    pub fn classify(apdex_t: Micros, duration: Micros) -> Self {
        if duration <= apdex_t {
            ApdexZone::Satisfying
        } else if duration <= apdex_t.saturating_mul(4) {
            ApdexZone::Tolerating
        } else {
            ApdexZone::Failing
        }
    }

    /// Single letter used by the `nr.apdexPerfZone` intrinsic.
    pub fn label(self) -> &'static str {
        match self {
            ApdexZone::Satisfying => "S",
            ApdexZone::Tolerating => "T",
            ApdexZone::Failing => "F",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_classify() {
        assert_eq!(ApdexZone::classify(10, 10), ApdexZone::Satisfying);
        assert_eq!(ApdexZone::classify(10, 25), ApdexZone::Tolerating);
        assert_eq!(ApdexZone::classify(10, 40), ApdexZone::Tolerating);
        assert_eq!(ApdexZone::classify(10, 41), ApdexZone::Failing);
        assert_eq!(ApdexZone::classify(0, 0), ApdexZone::Satisfying);
        assert_eq!(ApdexZone::classify(0, 1), ApdexZone::Failing);
    }

    #[test]
    fn test_labels() {
        assert_eq!(ApdexZone::Satisfying.label(), "S");
        assert_eq!(ApdexZone::Tolerating.label(), "T");
        assert_eq!(ApdexZone::Failing.label(), "F");
    }

    proptest! {
        #[test]
        fn classification_is_monotonic(t in 0u64..1_000_000, d in 0u64..10_000_000) {
            let rank = |z: ApdexZone| match z {
                ApdexZone::Satisfying => 0,
                ApdexZone::Tolerating => 1,
                ApdexZone::Failing => 2,
            };
            prop_assert!(rank(ApdexZone::classify(t, d)) <= rank(ApdexZone::classify(t, d + 1)));
        }
    }
}
