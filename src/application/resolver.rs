//! Destination resolution
//!
//! Maps what the caller said ("the finance people", "Jeni", "anyone") to a
//! configured destination. Destination lists come from the admin side through
//! the `DestinationSource` port and are cached for a few minutes; the admin
//! side calls `invalidate` on changes.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::domain::destination::TransferDestination;
use crate::domain::ports::DestinationSource;
use crate::domain::shared::Result;

const CACHE_TTL: Duration = Duration::from_secs(300);

/// Phrases that mean "whoever can take the call" rather than a name.
const GENERIC_REQUESTS: &[&str] = &[
    "anyone",
    "anybody",
    "someone",
    "somebody",
    "whoever",
    "whoever is available",
    "any agent",
    "an agent",
    "attendant",
];

struct CacheEntry {
    destinations: Vec<TransferDestination>,
    loaded_at: Instant,
}

pub struct DestinationResolver {
    source: Arc<dyn DestinationSource>,
    cache: Mutex<HashMap<(String, String), CacheEntry>>,
    ttl: Duration,
}

impl DestinationResolver {
    pub fn new(source: Arc<dyn DestinationSource>) -> Self {
        Self {
            source,
            cache: Mutex::new(HashMap::new()),
            ttl: CACHE_TTL,
        }
    }

    #[cfg(test)]
    fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Destinations for a secretary, via the cache.
    pub async fn load(&self, tenant: &str, secretary: &str) -> Result<Vec<TransferDestination>> {
        let key = (tenant.to_string(), secretary.to_string());
        {
            let cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.get(&key) {
                if entry.loaded_at.elapsed() < self.ttl {
                    return Ok(entry.destinations.clone());
                }
            }
        }

        let destinations = self.source.load(tenant, secretary).await?;
        debug!(
            tenant,
            secretary,
            count = destinations.len(),
            "loaded destinations"
        );
        self.cache.lock().unwrap().insert(
            key,
            CacheEntry {
                destinations: destinations.clone(),
                loaded_at: Instant::now(),
            },
        );
        Ok(destinations)
    }

    /// Drop every cached list for a tenant.
    pub fn invalidate(&self, tenant: &str) {
        self.cache
            .lock()
            .unwrap()
            .retain(|(t, _), _| t != tenant);
    }

    /// Resolve a spoken destination request. `None` when nothing matches.
    pub async fn resolve(
        &self,
        tenant: &str,
        secretary: &str,
        spoken: &str,
    ) -> Result<Option<TransferDestination>> {
        let destinations = self.load(tenant, secretary).await?;
        Ok(resolve_in(&destinations, spoken))
    }

    /// Reason a destination is closed at `now`, or `None` while open.
    pub fn closed_reason(
        &self,
        destination: &TransferDestination,
        now: DateTime<Utc>,
    ) -> Option<String> {
        if destination.working_hours.is_open_at(now) {
            None
        } else {
            Some(format!(
                "{} is outside working hours right now.",
                destination.name
            ))
        }
    }
}

fn resolve_in(
    destinations: &[TransferDestination],
    spoken: &str,
) -> Option<TransferDestination> {
    let wanted = spoken.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }

    // "anyone available" goes to the configured default
    if GENERIC_REQUESTS.iter().any(|g| *g == wanted) {
        return destinations.iter().find(|d| d.is_default).cloned();
    }

    // Pass 1: exact match on name or any alias
    let exact = destinations.iter().filter(|d| {
        d.name.to_lowercase() == wanted || d.aliases.iter().any(|a| a.to_lowercase() == wanted)
    });
    if let Some(best) = pick_preferred(exact) {
        return Some(best.clone());
    }

    // Pass 2: substring against name and department
    let partial = destinations.iter().filter(|d| {
        let name = d.name.to_lowercase();
        let dept = d.department.as_deref().unwrap_or("").to_lowercase();
        name.contains(&wanted)
            || wanted.contains(&name)
            || (!dept.is_empty() && (dept.contains(&wanted) || wanted.contains(&dept)))
    });
    pick_preferred(partial).cloned()
}

/// Lowest priority wins; configuration order breaks ties.
fn pick_preferred<'a, I>(candidates: I) -> Option<&'a TransferDestination>
where
    I: Iterator<Item = &'a TransferDestination>,
{
    let mut best: Option<&TransferDestination> = None;
    for candidate in candidates {
        match best {
            Some(current) if candidate.priority >= current.priority => {}
            _ => best = Some(candidate),
        }
    }
    best
}
