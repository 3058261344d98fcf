//! Reputation gate — ghost-job screening before any unattended application.
//!
//! Verdicts are cached per company for a configurable window, so repeated
//! checks inside the window are idempotent. A lookup failure is NOT a flag:
//! the gate fails open (not flagged) and logs the degraded decision, because
//! blocking the whole pipeline on a supporting service outage costs more than
//! a false negative here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Outcome of a reputation check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationVerdict {
    pub is_flagged: bool,
    pub reasons: Vec<String>,
}

impl ReputationVerdict {
    pub fn clean() -> Self {
        Self {
            is_flagged: false,
            reasons: Vec::new(),
        }
    }

    pub fn flagged(reasons: Vec<String>) -> Self {
        Self {
            is_flagged: true,
            reasons,
        }
    }
}

/// Live reputation signal source (ghost-job network, cached reports, ...).
#[async_trait]
pub trait ReputationLookup: Send + Sync {
    async fn lookup(
        &self,
        company: &str,
        title: &str,
    ) -> Result<ReputationVerdict, anyhow::Error>;
}

/// HTTP-backed lookup against the ghost-job network service.
pub struct HttpReputationLookup {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    is_flagged: bool,
    #[serde(default)]
    reasons: Vec<String>,
}

impl HttpReputationLookup {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ReputationLookup for HttpReputationLookup {
    async fn lookup(
        &self,
        company: &str,
        title: &str,
    ) -> Result<ReputationVerdict, anyhow::Error> {
        let url = format!("{}/reputation", self.base_url);
        let response: LookupResponse = self
            .client
            .get(&url)
            .query(&[("company", company), ("title", title)])
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(ReputationVerdict {
            is_flagged: response.is_flagged,
            reasons: response.reasons,
        })
    }
}

struct CachedVerdict {
    verdict: ReputationVerdict,
    fetched_at: DateTime<Utc>,
}

/// The gate itself: TTL-cached verdicts over a pluggable lookup.
pub struct ReputationGate {
    lookup: Arc<dyn ReputationLookup>,
    cache: RwLock<HashMap<String, CachedVerdict>>,
    ttl: Duration,
}

impl ReputationGate {
    pub fn new(lookup: Arc<dyn ReputationLookup>, ttl: Duration) -> Self {
        Self {
            lookup,
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Check an employer/listing pair.
    ///
    /// Returns the cached verdict when a fresh one exists for the company;
    /// otherwise consults the lookup. Lookup failures resolve to not-flagged.
    pub async fn check(&self, company: &str, title: &str) -> ReputationVerdict {
        let key = company.to_lowercase();

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&key) {
                let age = Utc::now() - cached.fetched_at;
                if age.to_std().map(|a| a < self.ttl).unwrap_or(false) {
                    debug!(company, "Reputation verdict served from cache");
                    return cached.verdict.clone();
                }
            }
        }

        let verdict = match self.lookup.lookup(company, title).await {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    company,
                    error = %e,
                    "Reputation lookup failed — failing open (not flagged)"
                );
                ReputationVerdict::clean()
            }
        };

        let mut cache = self.cache.write().await;
        cache.insert(
            key,
            CachedVerdict {
                verdict: verdict.clone(),
                fetched_at: Utc::now(),
            },
        );

        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingLookup {
        calls: AtomicU32,
        flagged: bool,
    }

    #[async_trait]
    impl ReputationLookup for CountingLookup {
        async fn lookup(
            &self,
            _company: &str,
            _title: &str,
        ) -> Result<ReputationVerdict, anyhow::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.flagged {
                Ok(ReputationVerdict::flagged(vec!["reported 12 times".into()]))
            } else {
                Ok(ReputationVerdict::clean())
            }
        }
    }

    struct FailingLookup;

    #[async_trait]
    impl ReputationLookup for FailingLookup {
        async fn lookup(
            &self,
            _company: &str,
            _title: &str,
        ) -> Result<ReputationVerdict, anyhow::Error> {
            Err(anyhow::anyhow!("network unreachable"))
        }
    }

    #[tokio::test]
    async fn lookup_failure_fails_open() {
        let gate = ReputationGate::new(Arc::new(FailingLookup), Duration::from_secs(60));
        let verdict = gate.check("Acme", "Engineer").await;
        assert!(!verdict.is_flagged);
    }

    #[tokio::test]
    async fn repeated_checks_within_window_hit_cache() {
        let lookup = Arc::new(CountingLookup {
            calls: AtomicU32::new(0),
            flagged: true,
        });
        let gate = ReputationGate::new(lookup.clone(), Duration::from_secs(60));

        let first = gate.check("Acme", "Engineer").await;
        let second = gate.check("Acme", "Designer").await;

        assert!(first.is_flagged);
        assert!(second.is_flagged);
        // Same company — one live lookup, second served from cache.
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_is_keyed_by_company_case_insensitively() {
        let lookup = Arc::new(CountingLookup {
            calls: AtomicU32::new(0),
            flagged: false,
        });
        let gate = ReputationGate::new(lookup.clone(), Duration::from_secs(60));

        gate.check("Acme", "Engineer").await;
        gate.check("ACME", "Engineer").await;
        gate.check("Globex", "Engineer").await;

        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_cache_entry_triggers_fresh_lookup() {
        let lookup = Arc::new(CountingLookup {
            calls: AtomicU32::new(0),
            flagged: false,
        });
        let gate = ReputationGate::new(lookup.clone(), Duration::from_millis(10));

        gate.check("Acme", "Engineer").await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        gate.check("Acme", "Engineer").await;

        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
    }
}
