//! Progressive account lockout policy.
//!
//! The policy is pure data: a monotonic list of `(failures, lock duration)`
//! tiers. A failed login that lands exactly on a tier threshold, or goes past
//! the last one, locks the account for that tier's duration.

use anyhow::{Context, Result, bail};
use std::str::FromStr;

pub const DEFAULT_LOCKOUT_TIERS: &str = "3:300,5:900,7:3600,10:86400";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockoutTier {
    pub failures: u32,
    pub duration_seconds: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockoutPolicy {
    tiers: Vec<LockoutTier>,
}

/// What a failed login attempt turns into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Not locked yet. `None` when no further tier exists.
    Remaining(Option<u32>),
    Locked { duration_seconds: i64 },
}

impl LockoutPolicy {
    /// Build a policy from tiers that must strictly increase in both columns.
    ///
    /// # Errors
    /// Returns an error when the tier list is empty or not monotonic.
    pub fn new(tiers: Vec<LockoutTier>) -> Result<Self> {
        if tiers.is_empty() {
            bail!("lockout policy needs at least one tier");
        }
        for pair in tiers.windows(2) {
            if pair[1].failures <= pair[0].failures
                || pair[1].duration_seconds < pair[0].duration_seconds
            {
                bail!("lockout tiers must be monotonic");
            }
        }
        if tiers
            .iter()
            .any(|tier| tier.failures == 0 || tier.duration_seconds <= 0)
        {
            bail!("lockout tiers need positive thresholds and durations");
        }
        Ok(Self { tiers })
    }

    #[must_use]
    pub fn tiers(&self) -> &[LockoutTier] {
        &self.tiers
    }

    /// Classify the failure that brought the counter to `failures`.
    #[must_use]
    pub fn on_failure(&self, failures: u32) -> FailureOutcome {
        let exact = self.tiers.iter().find(|tier| tier.failures == failures);
        let beyond_last = self
            .tiers
            .last()
            .filter(|last| failures > last.failures);
        if let Some(tier) = exact.or(beyond_last) {
            return FailureOutcome::Locked {
                duration_seconds: tier.duration_seconds,
            };
        }
        let remaining = self
            .tiers
            .iter()
            .find(|tier| tier.failures > failures)
            .map(|tier| tier.failures - failures);
        FailureOutcome::Remaining(remaining)
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                LockoutTier {
                    failures: 3,
                    duration_seconds: 5 * 60,
                },
                LockoutTier {
                    failures: 5,
                    duration_seconds: 15 * 60,
                },
                LockoutTier {
                    failures: 7,
                    duration_seconds: 60 * 60,
                },
                LockoutTier {
                    failures: 10,
                    duration_seconds: 24 * 60 * 60,
                },
            ],
        }
    }
}

impl FromStr for LockoutPolicy {
    type Err = anyhow::Error;

    /// Parse `failures:seconds` pairs separated by commas, e.g. `3:300,5:900`.
    fn from_str(s: &str) -> Result<Self> {
        let tiers = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                let (failures, seconds) = part
                    .split_once(':')
                    .with_context(|| format!("lockout tier '{part}' must be failures:seconds"))?;
                Ok(LockoutTier {
                    failures: failures
                        .trim()
                        .parse()
                        .with_context(|| format!("invalid failure count in '{part}'"))?,
                    duration_seconds: seconds
                        .trim()
                        .parse()
                        .with_context(|| format!("invalid duration in '{part}'"))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(tiers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_string_matches_default_policy() -> Result<()> {
        assert_eq!(
            DEFAULT_LOCKOUT_TIERS.parse::<LockoutPolicy>()?,
            LockoutPolicy::default()
        );
        Ok(())
    }

    #[test]
    fn failures_below_first_tier_report_remaining() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.on_failure(1), FailureOutcome::Remaining(Some(2)));
        assert_eq!(policy.on_failure(2), FailureOutcome::Remaining(Some(1)));
    }

    #[test]
    fn thresholds_lock_with_escalating_durations() {
        let policy = LockoutPolicy::default();
        assert_eq!(
            policy.on_failure(3),
            FailureOutcome::Locked {
                duration_seconds: 300
            }
        );
        assert_eq!(policy.on_failure(4), FailureOutcome::Remaining(Some(1)));
        assert_eq!(
            policy.on_failure(5),
            FailureOutcome::Locked {
                duration_seconds: 900
            }
        );
        assert_eq!(
            policy.on_failure(7),
            FailureOutcome::Locked {
                duration_seconds: 3600
            }
        );
        assert_eq!(
            policy.on_failure(10),
            FailureOutcome::Locked {
                duration_seconds: 86400
            }
        );
    }

    #[test]
    fn failures_past_last_tier_keep_locking() {
        let policy = LockoutPolicy::default();
        assert_eq!(
            policy.on_failure(11),
            FailureOutcome::Locked {
                duration_seconds: 86400
            }
        );
    }

    #[test]
    fn rejects_non_monotonic_tiers() {
        assert!("5:300,3:900".parse::<LockoutPolicy>().is_err());
        assert!("3:900,5:300".parse::<LockoutPolicy>().is_err());
        assert!("".parse::<LockoutPolicy>().is_err());
        assert!("3-300".parse::<LockoutPolicy>().is_err());
        assert!("0:300".parse::<LockoutPolicy>().is_err());
    }
}
