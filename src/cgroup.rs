//! Cgroup records and bandwidth accounting.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cpumask::CpuMask;

/// Default shares assigned when none are specified.
pub const DEFAULT_SHARES: u32 = 1024;
/// Default period, in microseconds, assigned when none is specified.
pub const DEFAULT_PERIOD_US: u64 = 100_000;
/// Id of the implicit default cgroup every task belongs to unless
/// otherwise assigned.
pub const DEFAULT_CGROUP_ID: &str = "0";

/// Opaque cgroup identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CgroupId(Arc<str>);

impl CgroupId {
    /// Build a cgroup id from any string-like value.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The implicit default cgroup ("0").
    pub fn default_group() -> Self {
        Self::new(DEFAULT_CGROUP_ID)
    }

    /// Whether this is the implicit default cgroup.
    pub fn is_default(&self) -> bool {
        &*self.0 == DEFAULT_CGROUP_ID
    }
}

impl Default for CgroupId {
    fn default() -> Self {
        Self::default_group()
    }
}

impl std::fmt::Display for CgroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CgroupId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A control group: relative CPU shares, an optional bandwidth quota over a
/// refreshing period, and an allowed CPU mask.
#[derive(Debug, Clone)]
pub struct Cgroup {
    id: CgroupId,
    shares: u32,
    /// `None` means unlimited.
    quota_us: Option<u64>,
    period_us: u64,
    mask: CpuMask,
    used_us: u64,
    period_start_tick: u64,
}

impl Cgroup {
    pub(crate) fn new(
        id: CgroupId,
        shares: Option<u32>,
        quota_us: Option<Option<u64>>,
        period_us: Option<u64>,
        mask: Option<CpuMask>,
        current_tick: u64,
    ) -> Self {
        Self {
            id,
            shares: normalize_shares(shares.unwrap_or(DEFAULT_SHARES)),
            quota_us: quota_us.unwrap_or(None),
            period_us: normalize_period(period_us.unwrap_or(DEFAULT_PERIOD_US)),
            mask: mask.unwrap_or_default(),
            used_us: 0,
            period_start_tick: current_tick,
        }
    }

    /// The cgroup's id.
    pub fn id(&self) -> &CgroupId {
        &self.id
    }

    /// Relative CPU shares.
    pub fn shares(&self) -> u32 {
        self.shares
    }

    /// Bandwidth quota in microseconds per period, or `None` if unlimited.
    pub fn quota_us(&self) -> Option<u64> {
        self.quota_us
    }

    /// Period length in microseconds.
    pub fn period_us(&self) -> u64 {
        self.period_us
    }

    /// Allowed CPU mask.
    pub fn mask(&self) -> CpuMask {
        self.mask
    }

    /// Microseconds accounted so far within the current period.
    pub fn used_us(&self) -> u64 {
        self.used_us
    }

    /// Tick at which the current period started.
    pub fn period_start_tick(&self) -> u64 {
        self.period_start_tick
    }

    /// True iff quota is unlimited or `used` has not yet reached it.
    pub fn has_quota(&self) -> bool {
        match self.quota_us {
            None => true,
            Some(q) => self.used_us < q,
        }
    }

    /// Add `delta_us` to `used_us` when the cgroup has a finite quota and
    /// `delta_us` is positive. Unlimited cgroups track no usage (there is
    /// nothing to bound).
    pub(crate) fn account(&mut self, delta_us: u64) {
        if self.quota_us.is_some() && delta_us > 0 {
            self.used_us += delta_us;
        }
    }

    /// Zero out usage and mark a new period starting at `tick`.
    pub(crate) fn reset_period(&mut self, tick: u64) {
        self.used_us = 0;
        self.period_start_tick = tick;
    }

    /// True iff the mask is "any" or `cpu` is a member.
    pub fn allows_cpu(&self, cpu: u32) -> bool {
        self.mask.contains(cpu)
    }

    /// Refresh accounting for one tick elapsed at `current_tick`: resets if
    /// the elapsed microseconds since `period_start_tick` have reached
    /// `period_us`, or if `current_tick` precedes `period_start_tick`
    /// (clock skew / out-of-order virtual time).
    pub(crate) fn refresh_period(&mut self, current_tick: u64, quantum_us: u64) {
        if current_tick < self.period_start_tick {
            self.reset_period(current_tick);
            return;
        }
        let elapsed_us = (current_tick - self.period_start_tick) * quantum_us;
        if elapsed_us >= self.period_us {
            self.reset_period(current_tick);
        }
    }

    /// Apply a `CgroupModify` event's optional fields in place. A period
    /// change resets accounting to `current_tick`.
    pub(crate) fn modify(
        &mut self,
        shares: Option<u32>,
        quota_us: Option<Option<u64>>,
        period_us: Option<u64>,
        mask: Option<CpuMask>,
        current_tick: u64,
    ) {
        if let Some(shares) = shares {
            self.shares = normalize_shares(shares);
        }
        if let Some(quota_us) = quota_us {
            self.quota_us = quota_us;
        }
        if let Some(mask) = mask {
            self.mask = mask;
        }
        if let Some(period_us) = period_us {
            let period_us = normalize_period(period_us);
            if period_us != self.period_us {
                self.period_us = period_us;
                self.reset_period(current_tick);
            }
        }
    }
}

/// Boundary-clamp: shares `<= 0` fall back to the default.
fn normalize_shares(shares: u32) -> u32 {
    if shares == 0 {
        DEFAULT_SHARES
    } else {
        shares
    }
}

/// Boundary-clamp: period `<= 0` falls back to the default.
/// (`period_us` is `u64` so "non-positive" collapses to "zero".)
fn normalize_period(period_us: u64) -> u64 {
    if period_us == 0 {
        DEFAULT_PERIOD_US
    } else {
        period_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(quota_us: Option<u64>) -> Cgroup {
        Cgroup::new(
            CgroupId::new("g"),
            None,
            Some(quota_us),
            None,
            None,
            0,
        )
    }

    #[test]
    fn unlimited_quota_always_has_quota() {
        let cg = make(None);
        assert!(cg.has_quota());
    }

    #[test]
    fn account_stops_granting_quota_once_exhausted() {
        let mut cg = make(Some(100));
        assert!(cg.has_quota());
        cg.account(100);
        assert!(!cg.has_quota());
    }

    #[test]
    fn account_is_noop_when_unlimited() {
        let mut cg = make(None);
        cg.account(1_000_000);
        assert_eq!(cg.used_us(), 0);
    }

    #[test]
    fn refresh_resets_once_period_elapses() {
        let mut cg = Cgroup::new(CgroupId::new("g"), None, Some(Some(50_000)), Some(100_000), None, 0);
        cg.account(50_000);
        assert!(!cg.has_quota());
        // quantum=50ms -> 2 ticks = 100_000us elapsed, period boundary reached.
        cg.refresh_period(2, 50_000);
        assert!(cg.has_quota());
        assert_eq!(cg.period_start_tick(), 2);
    }

    #[test]
    fn refresh_resets_on_backwards_clock_skew() {
        let mut cg = make(Some(1));
        cg.account(1);
        cg.refresh_period(10, 1000);
        assert_eq!(cg.period_start_tick(), 10);
        cg.account(1);
        // current tick earlier than period start: reset.
        cg.refresh_period(5, 1000);
        assert_eq!(cg.period_start_tick(), 5);
        assert!(cg.has_quota());
    }

    #[test]
    fn modify_period_resets_accounting() {
        let mut cg = make(Some(1000));
        cg.account(500);
        cg.modify(None, None, Some(200_000), None, 7);
        assert_eq!(cg.used_us(), 0);
        assert_eq!(cg.period_start_tick(), 7);
        assert_eq!(cg.period_us(), 200_000);
    }

    #[test]
    fn zero_shares_fall_back_to_default() {
        let cg = Cgroup::new(CgroupId::new("g"), Some(0), None, None, None, 0);
        assert_eq!(cg.shares(), DEFAULT_SHARES);
    }
}
