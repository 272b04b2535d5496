//! The per-dependency breaker record and its transitions.
//!
//! Everything here is synchronous and clock-free: callers pass `now`, which
//! keeps the state machine testable without a store or a runtime.

use std::time::Duration;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::clock::elapsed_ms;
use crate::config::CircuitPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replicated breaker record; this is what the store holds as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitState {
    pub state: BreakerState,
    pub failure_count: u32,
    pub opened_at: Option<Timestamp>,
    pub last_error: Option<String>,
    /// When the outstanding half-open probe was granted.
    #[serde(default)]
    pub half_opened_at: Option<Timestamp>,
}

/// Result of asking whether a call may go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// The record changed and must be persisted and broadcast.
    pub changed: bool,
}

impl CircuitState {
    pub fn is_pristine(&self) -> bool {
        *self == CircuitState::default()
    }

    /// Admit or reject one call.
    ///
    /// OPEN turns into HALF_OPEN once the reset timeout has passed and admits
    /// that single caller. HALF_OPEN rejects everyone else until the probe
    /// reports back or another reset timeout passes.
    pub fn admit(&mut self, policy: &CircuitPolicy, now: Timestamp) -> Admission {
        match self.state {
            BreakerState::Closed => Admission {
                allowed: true,
                changed: false,
            },
            BreakerState::Open => {
                if !window_elapsed(self.opened_at, policy.reset_timeout, now) {
                    return Admission {
                        allowed: false,
                        changed: false,
                    };
                }
                self.state = BreakerState::HalfOpen;
                self.half_opened_at = Some(now);
                Admission {
                    allowed: true,
                    changed: true,
                }
            }
            BreakerState::HalfOpen => {
                if !window_elapsed(self.half_opened_at, policy.reset_timeout, now) {
                    return Admission {
                        allowed: false,
                        changed: false,
                    };
                }
                // The previous prober never reported back.
                self.half_opened_at = Some(now);
                Admission {
                    allowed: true,
                    changed: true,
                }
            }
        }
    }

    /// Count a failure; returns the state it was in before.
    pub fn fail(&mut self, error: &str, policy: &CircuitPolicy, now: Timestamp) -> BreakerState {
        let before = self.state;
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_error = Some(error.to_string());

        match before {
            BreakerState::Closed if self.failure_count >= policy.failure_threshold => self.trip(now),
            BreakerState::HalfOpen => self.trip(now),
            BreakerState::Closed | BreakerState::Open => {}
        }
        before
    }

    /// Close the circuit; returns whether anything changed.
    pub fn succeed(&mut self) -> bool {
        if self.is_pristine() {
            return false;
        }
        *self = CircuitState::default();
        true
    }

    /// Time until a call would be admitted again.
    pub fn retry_in(&self, policy: &CircuitPolicy, now: Timestamp) -> Duration {
        let since = match self.state {
            BreakerState::Closed => return Duration::ZERO,
            BreakerState::Open => self.opened_at,
            BreakerState::HalfOpen => self.half_opened_at,
        };
        let Some(since) = since else {
            return Duration::ZERO;
        };
        policy
            .reset_timeout
            .saturating_sub(Duration::from_millis(elapsed_ms(now, since)))
    }

    fn trip(&mut self, now: Timestamp) {
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.half_opened_at = None;
    }
}

fn window_elapsed(since: Option<Timestamp>, window: Duration, now: Timestamp) -> bool {
    match since {
        Some(since) => u128::from(elapsed_ms(now, since)) >= window.as_millis(),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy(threshold: u32, reset_ms: u64) -> CircuitPolicy {
        CircuitPolicy {
            failure_threshold: threshold,
            reset_timeout: Duration::from_millis(reset_ms),
            call_timeout: Duration::from_secs(10),
        }
    }

    fn at(ms: i64) -> Timestamp {
        Timestamp::from_millisecond(ms).unwrap()
    }

    #[test]
    fn test_wire_format() {
        let state = CircuitState {
            state: BreakerState::HalfOpen,
            failure_count: 3,
            opened_at: Some(at(0)),
            last_error: Some("boom".to_string()),
            half_opened_at: None,
        };
        let json: serde_json::Value = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "HALF_OPEN");
        assert_eq!(json["failureCount"], 3);
        assert_eq!(json["lastError"], "boom");

        // Records written without the probe timestamp still decode.
        let legacy = r#"{"state":"OPEN","failureCount":5,"openedAt":null,"lastError":null}"#;
        let decoded: CircuitState = serde_json::from_str(legacy).unwrap();
        assert_eq!(decoded.state, BreakerState::Open);
        assert_eq!(decoded.half_opened_at, None);
    }

    #[test]
    fn test_trips_at_threshold() {
        let p = policy(3, 1_000);
        let mut s = CircuitState::default();
        s.fail("e1", &p, at(0));
        s.fail("e2", &p, at(1));
        assert_eq!(s.state, BreakerState::Closed);
        s.fail("e3", &p, at(2));
        assert_eq!(s.state, BreakerState::Open);
        assert_eq!(s.opened_at, Some(at(2)));
        assert_eq!(s.last_error.as_deref(), Some("e3"));
    }

    #[test]
    fn test_single_probe_per_window() {
        let p = policy(1, 100);
        let mut s = CircuitState::default();
        s.fail("down", &p, at(0));

        assert!(!s.admit(&p, at(99)).allowed);
        let probe = s.admit(&p, at(100));
        assert!(probe.allowed && probe.changed);
        assert_eq!(s.state, BreakerState::HalfOpen);

        assert!(!s.admit(&p, at(150)).allowed);
        assert_eq!(s.retry_in(&p, at(150)), Duration::from_millis(50));

        // Prober vanished; grant another after a full window.
        assert!(s.admit(&p, at(200)).allowed);
    }

    #[test]
    fn test_half_open_failure_reopens_with_fresh_timestamp() {
        let p = policy(1, 100);
        let mut s = CircuitState::default();
        s.fail("down", &p, at(0));
        s.admit(&p, at(150));

        assert_eq!(s.fail("still down", &p, at(160)), BreakerState::HalfOpen);
        assert_eq!(s.state, BreakerState::Open);
        assert_eq!(s.opened_at, Some(at(160)));
        assert_eq!(s.half_opened_at, None);
    }

    #[test]
    fn test_failure_while_open_keeps_opened_at() {
        let p = policy(1, 100);
        let mut s = CircuitState::default();
        s.fail("a", &p, at(0));
        s.fail("b", &p, at(50));
        assert_eq!(s.opened_at, Some(at(0)));
        assert_eq!(s.failure_count, 2);
    }

    #[test]
    fn test_succeed_reports_change_only_once() {
        let p = policy(5, 100);
        let mut s = CircuitState::default();
        assert!(!s.succeed());
        s.fail("x", &p, at(0));
        assert!(s.succeed());
        assert!(s.is_pristine());
        assert!(!s.succeed());
    }

    #[test]
    fn test_retry_in_never_negative() {
        let p = policy(1, 100);
        let mut s = CircuitState::default();
        s.fail("x", &p, at(0));
        assert_eq!(s.retry_in(&p, at(40)), Duration::from_millis(60));
        assert_eq!(s.retry_in(&p, at(5_000)), Duration::ZERO);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Fail,
        Succeed,
        Admit,
        Tick(u16),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Fail),
            Just(Op::Succeed),
            Just(Op::Admit),
            (1u16..500).prop_map(Op::Tick),
        ]
    }

    proptest! {
        #[test]
        fn prop_state_machine_invariants(threshold in 1u32..6, ops in prop::collection::vec(op(), 0..60)) {
            let p = policy(threshold, 200);
            let mut s = CircuitState::default();
            let mut now = 0i64;

            for op in ops {
                match op {
                    Op::Fail => { s.fail("err", &p, at(now)); }
                    Op::Succeed => {
                        s.succeed();
                        prop_assert!(s.is_pristine());
                    }
                    Op::Admit => { s.admit(&p, at(now)); }
                    Op::Tick(ms) => now += i64::from(ms),
                }

                match s.state {
                    BreakerState::Closed => prop_assert!(s.failure_count < threshold),
                    BreakerState::Open => prop_assert!(s.opened_at.is_some()),
                    BreakerState::HalfOpen => prop_assert!(s.half_opened_at.is_some()),
                }
                prop_assert!(s.retry_in(&p, at(now)) <= p.reset_timeout);
            }
        }

        #[test]
        fn prop_exact_threshold_opens(threshold in 1u32..20) {
            let p = policy(threshold, 1_000);
            let mut s = CircuitState::default();
            for i in 0..threshold {
                prop_assert_eq!(s.state, BreakerState::Closed);
                s.fail("err", &p, at(i64::from(i)));
            }
            prop_assert_eq!(s.state, BreakerState::Open);
            prop_assert!(!s.admit(&p, at(i64::from(threshold))).allowed);
        }
    }
}
