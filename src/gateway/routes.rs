//! Route table for the migration topology
//!
//! Built once from configuration at startup. Microservice prefixes strip the
//! prefix before forwarding; legacy monolith paths are an explicit allowlist
//! and keep the full original path. Anything unmatched is a 404; unknown
//! paths are never silently forwarded to the monolith.

use crate::config::RoutesConfig;

/// Canonical 404 detail for unmatched paths
pub const ROUTE_NOT_FOUND_DETAIL: &str =
    "Route not found in API Gateway. Please verify the URL or check if the service is registered.";

/// How the matched prefix rewrites the forwarded path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rewrite {
    /// Forward only the remainder after the prefix (microservices)
    StripPrefix,
    /// Forward the full original path (legacy monolith)
    PreserveFull,
}

/// One route table entry
#[derive(Debug, Clone)]
pub struct RouteEntry {
    /// Path prefix this entry matches
    pub prefix: String,
    /// Backend base URL
    pub target: String,
    /// Path rewrite rule
    pub rewrite: Rewrite,
}

/// Dispatch decision for one request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Forward to `target` with the rewritten `path`
    Forward {
        /// Backend base URL
        target: String,
        /// Rewritten path, always starting with `/`
        path: String,
    },
    /// No entry matches
    NotFound,
}

impl Decision {
    /// Full forwarding URL for a `Forward` decision.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        match self {
            Self::Forward { target, path } => Some(format!("{target}{path}")),
            Self::NotFound => None,
        }
    }
}

/// Immutable route table, longest prefix first.
#[derive(Debug)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    /// Build the table from configuration.
    #[must_use]
    pub fn from_config(config: &RoutesConfig) -> Self {
        let mut entries: Vec<RouteEntry> = config
            .services
            .iter()
            .map(|(prefix, target)| RouteEntry {
                prefix: prefix.clone(),
                target: target.trim_end_matches('/').to_string(),
                rewrite: Rewrite::StripPrefix,
            })
            .collect();
        for prefix in &config.legacy_allow {
            entries.push(RouteEntry {
                prefix: prefix.clone(),
                target: config.legacy_url.trim_end_matches('/').to_string(),
                rewrite: Rewrite::PreserveFull,
            });
        }
        // Longest prefix wins; length order makes overlap deterministic
        entries.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { entries }
    }

    /// Decide where `path` goes.
    #[must_use]
    pub fn decide(&self, path: &str) -> Decision {
        for entry in &self.entries {
            if !matches_prefix(path, &entry.prefix) {
                continue;
            }
            let forwarded = match entry.rewrite {
                Rewrite::StripPrefix => {
                    let rest = &path[entry.prefix.len()..];
                    if rest.is_empty() {
                        "/".to_string()
                    } else {
                        rest.to_string()
                    }
                }
                Rewrite::PreserveFull => path.to_string(),
            };
            return Decision::Forward {
                target: entry.target.clone(),
                path: forwarded,
            };
        }
        Decision::NotFound
    }

    /// Number of entries, for startup logging.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Prefix match on segment boundaries: `/api/v1/planning` matches itself and
/// `/api/v1/planning/test`, never `/api/v1/planningx`.
fn matches_prefix(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn table() -> RouteTable {
        RouteTable::from_config(&RoutesConfig::default())
    }

    #[test]
    fn service_prefix_is_stripped() {
        let decision = table().decide("/api/v1/planning/test");
        assert_eq!(
            decision,
            Decision::Forward {
                target: "http://planning-agent:8000".to_string(),
                path: "/test".to_string(),
            }
        );
        assert_eq!(
            decision.url().unwrap(),
            "http://planning-agent:8000/test"
        );
    }

    #[test]
    fn legacy_path_is_preserved_in_full() {
        let decision = table().decide("/admin/users");
        assert_eq!(
            decision,
            Decision::Forward {
                target: "http://core-kernel:8000".to_string(),
                path: "/admin/users".to_string(),
            }
        );
    }

    #[test]
    fn unknown_path_is_not_found() {
        assert_eq!(table().decide("/api/v2/unknown"), Decision::NotFound);
        // Unlisted monolith paths never leak through
        assert_eq!(table().decide("/internal/debug"), Decision::NotFound);
    }

    #[test]
    fn prefix_match_respects_segment_boundaries() {
        assert_eq!(table().decide("/api/v1/planningx/test"), Decision::NotFound);
        assert_eq!(table().decide("/adminx"), Decision::NotFound);
    }

    #[test]
    fn bare_prefix_forwards_root() {
        let decision = table().decide("/api/v1/memory");
        assert_eq!(
            decision,
            Decision::Forward {
                target: "http://memory-agent:8001".to_string(),
                path: "/".to_string(),
            }
        );
    }

    #[test]
    fn longest_prefix_wins() {
        let mut config = RoutesConfig::default();
        config.services.insert(
            "/api/v1/planning/special".to_string(),
            "http://special-agent:9000".to_string(),
        );
        let table = RouteTable::from_config(&config);
        let decision = table.decide("/api/v1/planning/special/x");
        assert_eq!(
            decision.url().unwrap(),
            "http://special-agent:9000/x"
        );
    }
}
