//! Token-bucket rate limiting persisted in the tenant's `rate_limits` table.
//!
//! Buckets are keyed by `(operation, refill interval, client key)` and refill
//! one token per elapsed interval up to the class maximum. The
//! read-modify-write is a compare-and-swap, so concurrent requests from the
//! same client cannot both spend the last token.

use anyhow::{Context, Result, bail};
use std::str::FromStr;
use tracing::{debug, warn};

use super::clock::Clock;
use crate::{
    store::{AuthStore, BucketKey, BucketState},
    tenant::Tenant,
};

const MAX_SWAP_ATTEMPTS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitClass {
    Login,
    Signup,
    Session,
    Api,
    PasswordReset,
}

impl RateLimitClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Signup => "signup",
            Self::Session => "session",
            Self::Api => "api",
            Self::PasswordReset => "password_reset",
        }
    }
}

/// Capacity of a bucket and how often it regains one token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitRule {
    pub max: i64,
    pub refill_interval_seconds: i64,
}

impl RateLimitRule {
    #[must_use]
    pub const fn new(max: i64, refill_interval_seconds: i64) -> Self {
        Self {
            max,
            refill_interval_seconds,
        }
    }

    fn refill_interval_ms(self) -> i64 {
        self.refill_interval_seconds.saturating_mul(1000)
    }
}

impl FromStr for RateLimitRule {
    type Err = anyhow::Error;

    /// Parse `max/interval_seconds`, e.g. `5/900`.
    fn from_str(s: &str) -> Result<Self> {
        let (max, interval) = s
            .split_once('/')
            .with_context(|| format!("rate limit '{s}' must be max/interval_seconds"))?;
        let rule = Self::new(
            max.trim()
                .parse()
                .with_context(|| format!("invalid maximum in '{s}'"))?,
            interval
                .trim()
                .parse()
                .with_context(|| format!("invalid interval in '{s}'"))?,
        );
        if rule.max <= 0 || rule.refill_interval_seconds <= 0 {
            bail!("rate limit '{s}' needs a positive maximum and interval");
        }
        Ok(rule)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitRules {
    pub login: RateLimitRule,
    pub signup: RateLimitRule,
    pub session: RateLimitRule,
    pub api: RateLimitRule,
    pub password_reset: RateLimitRule,
}

impl Default for RateLimitRules {
    fn default() -> Self {
        Self {
            login: RateLimitRule::new(5, 15 * 60),
            signup: RateLimitRule::new(3, 60 * 60),
            session: RateLimitRule::new(60, 60),
            api: RateLimitRule::new(100, 60),
            password_reset: RateLimitRule::new(3, 60 * 60),
        }
    }
}

impl RateLimitRules {
    #[must_use]
    pub fn rule(&self, class: RateLimitClass) -> RateLimitRule {
        match class {
            RateLimitClass::Login => self.login,
            RateLimitClass::Signup => self.signup,
            RateLimitClass::Session => self.session,
            RateLimitClass::Api => self.api,
            RateLimitClass::PasswordReset => self.password_reset,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after_seconds: i64 },
}

/// Add one token per whole elapsed interval, capped at `rule.max`.
///
/// `refilled_at_ms` advances by whole intervals only, so partial progress
/// toward the next token is kept.
#[must_use]
pub fn refill(state: BucketState, rule: RateLimitRule, now_ms: i64) -> BucketState {
    let interval_ms = rule.refill_interval_ms().max(1);
    let periods = (now_ms - state.refilled_at_ms).max(0) / interval_ms;
    if periods == 0 {
        return state;
    }
    BucketState {
        count: state.count.saturating_add(periods).min(rule.max),
        refilled_at_ms: state.refilled_at_ms + periods * interval_ms,
    }
}

fn retry_after_seconds(state: BucketState, rule: RateLimitRule, now_ms: i64) -> i64 {
    let wait_ms = (state.refilled_at_ms + rule.refill_interval_ms() - now_ms).max(0);
    ((wait_ms + 999) / 1000).max(1)
}

pub struct RateLimiter<'a> {
    store: &'a dyn AuthStore,
    clock: &'a dyn Clock,
    rules: &'a RateLimitRules,
}

impl<'a> RateLimiter<'a> {
    #[must_use]
    pub fn new(store: &'a dyn AuthStore, clock: &'a dyn Clock, rules: &'a RateLimitRules) -> Self {
        Self {
            store,
            clock,
            rules,
        }
    }

    /// Spend `cost` tokens from the client's bucket for `class`.
    ///
    /// Storage failures fail open: the request is allowed and a warning logged.
    pub async fn consume(
        &self,
        tenant: &Tenant,
        class: RateLimitClass,
        client_key: &str,
        cost: i64,
    ) -> RateLimitDecision {
        match self.try_consume(tenant, class, client_key, cost).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(
                    tenant = %tenant,
                    operation = class.as_str(),
                    "Rate limiter storage failure, allowing request: {err:#}"
                );
                RateLimitDecision::Allowed
            }
        }
    }

    async fn try_consume(
        &self,
        tenant: &Tenant,
        class: RateLimitClass,
        client_key: &str,
        cost: i64,
    ) -> Result<RateLimitDecision> {
        let rule = self.rules.rule(class);
        let key = BucketKey {
            operation: class.as_str().to_string(),
            refill_interval_seconds: rule.refill_interval_seconds,
            client_key: client_key.to_string(),
        };

        for _ in 0..MAX_SWAP_ATTEMPTS {
            let now_ms = self.clock.now().timestamp_millis();
            let Some(current) = self.store.load_bucket(tenant, &key).await? else {
                let fresh = BucketState {
                    count: rule.max - cost,
                    refilled_at_ms: now_ms,
                };
                if fresh.count < 0 {
                    return Ok(RateLimitDecision::Limited {
                        retry_after_seconds: rule.refill_interval_seconds,
                    });
                }
                if self.store.insert_bucket(tenant, &key, fresh).await? {
                    return Ok(RateLimitDecision::Allowed);
                }
                continue;
            };

            let refilled = refill(current, rule, now_ms);
            if refilled.count < cost {
                if refilled != current {
                    // Losing this race only loses the bookkeeping, not the decision.
                    self.store
                        .swap_bucket(tenant, &key, current, refilled)
                        .await?;
                }
                return Ok(RateLimitDecision::Limited {
                    retry_after_seconds: retry_after_seconds(refilled, rule, now_ms),
                });
            }

            let next = BucketState {
                count: refilled.count - cost,
                ..refilled
            };
            if self.store.swap_bucket(tenant, &key, current, next).await? {
                return Ok(RateLimitDecision::Allowed);
            }
            debug!(tenant = %tenant, operation = class.as_str(), "Rate limit bucket contended, retrying");
        }

        Ok(RateLimitDecision::Limited {
            retry_after_seconds: 1,
        })
    }

    /// Delete buckets that have not refilled since `cutoff_ms`.
    ///
    /// # Errors
    /// Returns an error if the store rejects the delete.
    pub async fn cleanup(&self, tenant: &Tenant, cutoff_ms: i64) -> Result<u64> {
        self.store
            .delete_buckets_refilled_before(tenant, cutoff_ms)
            .await
    }
}
