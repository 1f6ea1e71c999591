//! Policy enforcement
//!
//! Turns a caller's requested timeout and memory into a fully specified,
//! clamped `Policy`. Pure and deterministic.

use serde::{Deserialize, Serialize};

/// Network access granted to a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    None,
    Egress,
    Allow,
}

/// Resource and capability policy for one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub timeout_secs: u64,
    pub memory_mb: u64,
    pub network: NetworkMode,
    pub read_only_fs: bool,
    pub drop_capabilities: bool,
    pub no_new_privileges: bool,
    pub max_processes: u64,
    pub max_open_files: u64,
}

/// Bounds the enforcer clamps requests into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyLimits {
    pub min_timeout_secs: u64,
    pub max_timeout_secs: u64,
    pub min_memory_mb: u64,
    pub max_memory_mb: u64,
    pub max_processes: u64,
    pub max_open_files: u64,
}

impl Default for PolicyLimits {
    fn default() -> Self {
        Self {
            min_timeout_secs: 1,
            max_timeout_secs: 15,
            min_memory_mb: 32,
            max_memory_mb: 512,
            max_processes: 128,
            max_open_files: 2048,
        }
    }
}

impl PolicyLimits {
    /// Bounds are normalized so that every minimum is at least 1 and no
    /// maximum is below its minimum.
    pub fn new(min_timeout: u64, max_timeout: u64, min_memory: u64, max_memory: u64) -> Self {
        let min_timeout_secs = min_timeout.max(1);
        let min_memory_mb = min_memory.max(1);
        Self {
            min_timeout_secs,
            max_timeout_secs: max_timeout.max(min_timeout_secs),
            min_memory_mb,
            max_memory_mb: max_memory.max(min_memory_mb),
            ..Default::default()
        }
    }

    pub fn with_max_processes(mut self, max_processes: u64) -> Self {
        self.max_processes = max_processes.max(1);
        self
    }

    pub fn with_max_open_files(mut self, max_open_files: u64) -> Self {
        self.max_open_files = max_open_files.max(16);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolicyEnforcer {
    limits: PolicyLimits,
}

impl PolicyEnforcer {
    pub fn new(limits: PolicyLimits) -> Self {
        Self { limits }
    }

    /// Build a policy from requested values, clamping each into its bounds.
    ///
    /// Applying it to the values of a policy it produced yields the same
    /// policy.
    pub fn build_policy(&self, requested_timeout: i64, requested_memory_mb: i64) -> Policy {
        let limits = &self.limits;
        Policy {
            timeout_secs: clamp(
                requested_timeout,
                limits.min_timeout_secs,
                limits.max_timeout_secs,
            ),
            memory_mb: clamp(requested_memory_mb, limits.min_memory_mb, limits.max_memory_mb),
            network: NetworkMode::None,
            read_only_fs: true,
            drop_capabilities: true,
            no_new_privileges: true,
            max_processes: limits.max_processes,
            max_open_files: limits.max_open_files,
        }
    }
}

fn clamp(value: i64, min: u64, max: u64) -> u64 {
    if value <= 0 {
        return min;
    }
    (value as u64).clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = PolicyEnforcer::default().build_policy(10, 256);
        assert_eq!(policy.timeout_secs, 10);
        assert_eq!(policy.memory_mb, 256);
        assert_eq!(policy.network, NetworkMode::None);
        assert!(policy.read_only_fs && policy.drop_capabilities && policy.no_new_privileges);
        assert_eq!(policy.max_processes, 128);
        assert_eq!(policy.max_open_files, 2048);
    }

    #[test]
    fn test_clamps_extremes() {
        let enforcer = PolicyEnforcer::default();
        let high = enforcer.build_policy(i64::MAX, i64::MAX);
        assert_eq!((high.timeout_secs, high.memory_mb), (15, 512));
        let low = enforcer.build_policy(i64::MIN, -5);
        assert_eq!((low.timeout_secs, low.memory_mb), (1, 32));
        let zero = enforcer.build_policy(0, 0);
        assert_eq!((zero.timeout_secs, zero.memory_mb), (1, 32));
    }

    #[test]
    fn test_idempotent() {
        let enforcer = PolicyEnforcer::default();
        for (t, m) in [(-3, 0), (7, 100), (100, 100_000), (15, 512)] {
            let once = enforcer.build_policy(t, m);
            let twice = enforcer.build_policy(once.timeout_secs as i64, once.memory_mb as i64);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_limits_normalized() {
        let limits = PolicyLimits::new(0, 0, 64, 16);
        assert_eq!(limits.min_timeout_secs, 1);
        assert_eq!(limits.max_timeout_secs, 1);
        assert_eq!(limits.max_memory_mb, 64);
        let policy = PolicyEnforcer::new(limits).build_policy(30, 30);
        assert_eq!((policy.timeout_secs, policy.memory_mb), (1, 64));
    }

    #[test]
    fn test_policy_serializes() {
        let json = serde_json::to_value(PolicyEnforcer::default().build_policy(5, 64)).unwrap();
        assert_eq!(json["network"], "none");
        assert_eq!(json["timeout_secs"], 5);
    }
}
