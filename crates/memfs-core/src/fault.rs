// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Fault injection policy + runtime counters for payload allocation
//!
//! A matching rule makes the payload resize step fail with `ENOSPC`, taking the
//! same path as a real allocation failure. Counters are owned by the engine
//! state and therefore only touched under the engine lock.

use crate::FsError;
use serde::{Deserialize, Serialize};

/// Operations whose payload growth can be failed on purpose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultOp {
    Truncate,
    Write,
}

/// Individual rule describing which op should fail and how often.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRule {
    pub op: FaultOp,
    /// Number of leading invocations to let through before injecting faults.
    #[serde(default)]
    pub start_after: u64,
    /// Maximum number of injected failures for this rule.
    #[serde(default)]
    pub max_faults: Option<u64>,
}

impl Default for FaultRule {
    fn default() -> Self {
        Self {
            op: FaultOp::Write,
            start_after: 0,
            max_faults: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<FaultRule>,
}

impl FaultPolicy {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn is_active(&self) -> bool {
        self.enabled && !self.rules.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
struct RuleCounters {
    hits: u64,
    invocations: u64,
}

/// Policy plus per-rule hit counts.
#[derive(Clone, Debug, Default)]
pub(crate) struct FaultInjector {
    policy: FaultPolicy,
    counters: Vec<RuleCounters>,
}

impl FaultInjector {
    pub(crate) fn new(policy: FaultPolicy) -> Self {
        let counters = vec![RuleCounters::default(); policy.rules.len()];
        Self { policy, counters }
    }

    pub(crate) fn policy(&self) -> &FaultPolicy {
        &self.policy
    }

    pub(crate) fn should_fault(&mut self, op: FaultOp) -> Option<FsError> {
        if !self.policy.enabled {
            return None;
        }
        for (rule, counters) in self.policy.rules.iter().zip(self.counters.iter_mut()) {
            if rule.op != op {
                continue;
            }
            counters.invocations = counters.invocations.saturating_add(1);
            if counters.invocations <= rule.start_after {
                continue;
            }
            if let Some(max) = rule.max_faults {
                if counters.hits >= max {
                    continue;
                }
            }
            counters.hits = counters.hits.saturating_add(1);
            return Some(FsError::NoSpace);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fault_policy_json() {
        let json = br#"{ "enabled": true, "rules": [ { "op": "truncate", "max_faults": 2 } ] }"#;
        let policy = FaultPolicy::from_json_bytes(json).expect("policy");
        assert!(policy.is_active());
        assert_eq!(policy.rules[0].op, FaultOp::Truncate);
        assert_eq!(policy.rules[0].start_after, 0);
        assert_eq!(policy.rules[0].max_faults, Some(2));
    }

    #[test]
    fn injector_respects_start_and_max_hits() {
        let mut injector = FaultInjector::new(FaultPolicy {
            enabled: true,
            rules: vec![FaultRule {
                op: FaultOp::Write,
                start_after: 1,
                max_faults: Some(2),
            }],
        });

        // First call skipped due to start_after
        assert_eq!(injector.should_fault(FaultOp::Write), None);
        assert_eq!(injector.should_fault(FaultOp::Truncate), None);
        assert_eq!(injector.should_fault(FaultOp::Write), Some(FsError::NoSpace));
        assert_eq!(injector.should_fault(FaultOp::Write), Some(FsError::NoSpace));
        // Max hits reached
        assert_eq!(injector.should_fault(FaultOp::Write), None);
    }

    #[test]
    fn disabled_policy_never_faults() {
        let mut injector = FaultInjector::new(FaultPolicy {
            enabled: false,
            rules: vec![FaultRule::default()],
        });
        assert_eq!(injector.should_fault(FaultOp::Write), None);
    }
}
