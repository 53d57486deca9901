use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use tracing::trace;

/// A per-second budget for one limit id, optionally drawing from a shared pool too.
#[derive(Debug, Clone)]
pub struct RateLimit {
    pub limit_id: String,
    pub per_second: NonZeroU32,
    pub linked_pool: Option<String>,
}

impl RateLimit {
    pub fn pool(limit_id: impl Into<String>, per_second: NonZeroU32) -> Self {
        Self {
            limit_id: limit_id.into(),
            per_second,
            linked_pool: None,
        }
    }

    pub fn linked(
        limit_id: impl Into<String>,
        per_second: NonZeroU32,
        pool: impl Into<String>,
    ) -> Self {
        Self {
            limit_id: limit_id.into(),
            per_second,
            linked_pool: Some(pool.into()),
        }
    }
}

struct Entry {
    limiter: DefaultDirectRateLimiter,
    linked_pool: Option<String>,
}

/// Rate limiter keyed by endpoint id.
///
/// Ids without a registered limit draw only from the fallback pool.
pub struct Throttler {
    entries: HashMap<String, Entry>,
    fallback_pool: String,
}

impl std::fmt::Debug for Throttler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttler")
            .field("limit_ids", &self.entries.keys().collect::<Vec<_>>())
            .field("fallback_pool", &self.fallback_pool)
            .finish()
    }
}

impl Throttler {
    pub fn new(limits: Vec<RateLimit>, fallback_pool: impl Into<String>) -> Self {
        let entries = limits
            .into_iter()
            .map(|limit| {
                let entry = Entry {
                    limiter: RateLimiter::direct(Quota::per_second(limit.per_second)),
                    linked_pool: limit.linked_pool,
                };
                (limit.limit_id, entry)
            })
            .collect();

        Self {
            entries,
            fallback_pool: fallback_pool.into(),
        }
    }

    /// Wait until `limit_id` and its linked pool both have capacity.
    pub async fn acquire(&self, limit_id: &str) {
        match self.entries.get(limit_id) {
            Some(entry) => {
                entry.limiter.until_ready().await;
                if let Some(pool) = entry.linked_pool.as_deref() {
                    if let Some(pool_entry) = self.entries.get(pool) {
                        pool_entry.limiter.until_ready().await;
                    }
                }
            }
            None => {
                if let Some(pool_entry) = self.entries.get(&self.fallback_pool) {
                    pool_entry.limiter.until_ready().await;
                }
            }
        }
        trace!(limit_id, "throttle slot acquired");
    }

    /// Non-blocking variant of [`Self::acquire`] for a single limit id.
    pub fn try_acquire(&self, limit_id: &str) -> bool {
        let id = if self.entries.contains_key(limit_id) {
            limit_id
        } else {
            self.fallback_pool.as_str()
        };
        self.entries
            .get(id)
            .map_or(true, |entry| entry.limiter.check().is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nonzero_ext::nonzero;

    #[test]
    fn test_budget_is_enforced_per_id() {
        let throttler = Throttler::new(
            vec![
                RateLimit::pool("REST", nonzero!(100u32)),
                RateLimit::linked("/api/v1/depth", nonzero!(2u32), "REST"),
            ],
            "REST",
        );

        assert!(throttler.try_acquire("/api/v1/depth"));
        assert!(throttler.try_acquire("/api/v1/depth"));
        assert!(!throttler.try_acquire("/api/v1/depth"));
        assert!(throttler.try_acquire("/api/v1/markets"));
    }

    #[tokio::test]
    async fn test_acquire_returns_within_budget() {
        let throttler = Throttler::new(vec![RateLimit::pool("REST", nonzero!(10u32))], "REST");
        let result = tokio::time::timeout(std::time::Duration::from_secs(1), async {
            for _ in 0..5 {
                throttler.acquire("/api/v1/unknown").await;
            }
        })
        .await;
        assert!(result.is_ok());
    }
}
