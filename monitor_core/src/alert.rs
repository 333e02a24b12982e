//! The alert engine: stateless transition logic over per-source flop-protection
//! counters. Deliberately free of I/O so the flop-protection invariants can be
//! property-tested against arbitrary reading sequences without a runtime.

use crate::model::{Expected, Observation, SourceCounters};

/// The outcome of checking one source's observation against its expectation.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertTransition {
    /// No threshold/expected-state set, or the reading didn't confirm a flip;
    /// counters were reset (or left at zero) and nothing is emitted.
    NoEmission,
    /// The flop threshold was just reached in the failing direction.
    NowFailing,
    /// The flop threshold was just reached in the passing direction.
    NowPassing,
}

/// Compares `observation` against `expected` for one source and advances that
/// source's counters, per spec §4.3. Returns the resulting counters (to be
/// stored back by the caller) and the transition, if any, that should be
/// emitted as an alert.
///
/// `currently_failing` is the source's latched `alert_status` going in;
/// `counters` are its `failing`/`passing` counters going in.
pub fn check(
    mut counters: SourceCounters,
    observation: &Observation,
    expected: Option<&Expected>,
    currently_failing: bool,
    flop_threshold: u32,
) -> (SourceCounters, AlertTransition) {
    let Some(expected) = expected else {
        counters.reset();
        return (counters, AlertTransition::NoEmission);
    };

    let is_deviant = match (observation, expected) {
        (Observation::Numeric(u), Observation::Numeric(t)) => *u >= *t,
        (Observation::State(cur), Observation::State(exp)) => cur != exp,
        // Mismatched observation/expectation shapes can't be compared meaningfully;
        // treat as non-deviant so a misconfigured monitor never alerts spuriously.
        _ => false,
    };

    if is_deviant && !currently_failing {
        counters.failing += 1;
        counters.passing = 0;
        if counters.failing == flop_threshold {
            counters.reset();
            return (counters, AlertTransition::NowFailing);
        }
        return (counters, AlertTransition::NoEmission);
    }

    if !is_deviant && currently_failing {
        counters.passing += 1;
        counters.failing = 0;
        if counters.passing == flop_threshold {
            counters.reset();
            return (counters, AlertTransition::NowPassing);
        }
        return (counters, AlertTransition::NoEmission);
    }

    counters.reset();
    (counters, AlertTransition::NoEmission)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(v: f64) -> Observation {
        Observation::Numeric(v)
    }

    /// S1: threshold T=80, k=6, readings [85, 90, 82, 88, 95, 81] all at/above
    /// T: expect NowFailing only on the 6th reading.
    #[test]
    fn s1_usage_threshold_crossed() {
        let t = usage(80.0);
        let mut counters = SourceCounters::default();
        let mut failing = false;
        let readings = [85.0, 90.0, 82.0, 88.0, 95.0, 81.0];
        let mut transitions = Vec::new();
        for r in readings {
            let (next, transition) = check(counters, &usage(r), Some(&t), failing, 6);
            counters = next;
            if transition == AlertTransition::NowFailing {
                failing = true;
            }
            transitions.push(transition);
        }
        assert_eq!(
            transitions,
            vec![
                AlertTransition::NoEmission,
                AlertTransition::NoEmission,
                AlertTransition::NoEmission,
                AlertTransition::NoEmission,
                AlertTransition::NoEmission,
                AlertTransition::NowFailing,
            ]
        );
        assert!(failing);
        assert_eq!(counters.failing, 0);
        assert_eq!(counters.passing, 0);
    }

    /// S2: readings [85, 90, 70, 85, 90, 70] flop back below T each time it
    /// nearly confirms; no alert should ever emit, counters end at zero.
    #[test]
    fn s2_flop_suppression() {
        let t = usage(80.0);
        let mut counters = SourceCounters::default();
        let failing = false;
        let readings = [85.0, 90.0, 70.0, 85.0, 90.0, 70.0];
        for r in readings {
            let (next, transition) = check(counters, &usage(r), Some(&t), failing, 6);
            counters = next;
            assert_eq!(transition, AlertTransition::NoEmission);
        }
        assert_eq!(counters.failing, 0);
        assert_eq!(counters.passing, 0);
    }

    /// S3: starting from alert_status=true, 6 readings below T recover to passing.
    #[test]
    fn s3_passing_recovery() {
        let t = usage(80.0);
        let mut counters = SourceCounters::default();
        let mut failing = true;
        let readings = [70.0, 65.0, 72.0, 60.0, 75.0, 50.0];
        let mut saw_pass = false;
        for r in readings {
            let (next, transition) = check(counters, &usage(r), Some(&t), failing, 6);
            counters = next;
            if transition == AlertTransition::NowPassing {
                failing = false;
                saw_pass = true;
            }
        }
        assert!(saw_pass);
        assert!(!failing);
        assert_eq!(counters.failing, 0);
        assert_eq!(counters.passing, 0);
    }

    #[test]
    fn reset_on_no_change_while_passing() {
        let t = usage(80.0);
        let mut counters = SourceCounters {
            failing: 2,
            passing: 0,
        };
        let (next, transition) = check(counters.clone(), &usage(50.0), Some(&t), false, 6);
        counters = next;
        assert_eq!(transition, AlertTransition::NoEmission);
        assert_eq!(counters.failing, 0);
        assert_eq!(counters.passing, 0);
    }

    #[test]
    fn no_threshold_resets_both_counters() {
        let counters = SourceCounters {
            failing: 4,
            passing: 1,
        };
        let (next, transition) = check(counters, &usage(99.0), None, false, 6);
        assert_eq!(transition, AlertTransition::NoEmission);
        assert_eq!(next.failing, 0);
        assert_eq!(next.passing, 0);
    }

    #[test]
    fn status_monitor_symmetric_flop_protection() {
        let expected = Observation::State("running".to_string());
        let mut counters = SourceCounters::default();
        let mut failing = false;
        for _ in 0..6 {
            let (next, transition) = check(
                counters,
                &Observation::State("stopped".to_string()),
                Some(&expected),
                failing,
                6,
            );
            counters = next;
            if transition == AlertTransition::NowFailing {
                failing = true;
            }
        }
        assert!(failing);
    }
}
