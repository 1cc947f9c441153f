//! Endpoint resolver - preferred-path memoization for migration topologies
//!
//! The same logical identity operation can live at different path prefixes
//! depending on how far the deployment has migrated (direct microservice,
//! versioned API, gateway security route). The resolver remembers, per
//! operation suffix, the last path that worked so repeated calls skip
//! known-dead alternates. Pure in-memory bookkeeping; losing the cache only
//! costs a re-probe.

use dashmap::DashMap;

/// Per-operation memo of the last successful path.
///
/// Concurrent callers may briefly remember different winners for the same
/// suffix; last-writer-wins is fine. The requirement is convergence, not
/// strict consistency.
#[derive(Debug, Default)]
pub struct EndpointResolver {
    preferred: DashMap<String, String>,
}

impl EndpointResolver {
    /// Create an empty resolver
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `candidates` reordered so a previously successful path for this
    /// suffix is tried first; all other candidates keep their original order.
    #[must_use]
    pub fn resolve(&self, suffix: &str, candidates: &[String]) -> Vec<String> {
        let Some(preferred) = self.preferred.get(suffix).map(|p| p.clone()) else {
            return candidates.to_vec();
        };
        if !candidates.contains(&preferred) {
            // Stale memo (candidate list changed); fall back to probe order.
            return candidates.to_vec();
        }
        let mut ordered = Vec::with_capacity(candidates.len());
        ordered.push(preferred.clone());
        ordered.extend(candidates.iter().filter(|c| **c != preferred).cloned());
        ordered
    }

    /// Record a successful path for `suffix`.
    pub fn remember(&self, suffix: &str, path: &str) {
        self.preferred.insert(suffix.to_string(), path.to_string());
    }

    /// The currently memoized path for `suffix`, if any.
    #[must_use]
    pub fn preferred(&self, suffix: &str) -> Option<String> {
        self.preferred.get(suffix).map(|p| p.clone())
    }
}
