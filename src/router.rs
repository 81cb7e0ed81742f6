//! [`Router`]: a per-listener, longest-prefix route table.

use std::collections::HashSet;
use std::time::Duration;

use crate::cache::TtlCache;
use crate::response::StoredResponse;

/// A single configured route: a URL path prefix mapped to an upstream
/// target, an optional header policy, and an optional cache.
pub struct Route {
    /// The path prefix this route matches against, byte-wise, no
    /// normalization.
    pub path_prefix: String,
    /// Base URL of the upstream this route forwards to.
    pub target_base_url: String,
    /// If present, only these (case-insensitive) response header names are
    /// forwarded to the client.
    pub keep_headers: Option<HashSet<String>>,
    /// If present, these (case-insensitive) response header names are
    /// stripped before forwarding.
    pub drop_headers: Option<HashSet<String>>,
    /// `Some` iff `time_to_live` was configured with a positive duration;
    /// the route owns this cache for its whole lifetime.
    pub cache: Option<TtlCache<StoredResponse>>,
}

impl Route {
    /// Builds an uncached route.
    pub fn new(path_prefix: impl Into<String>, target_base_url: impl Into<String>) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            target_base_url: target_base_url.into(),
            keep_headers: None,
            drop_headers: None,
            cache: None,
        }
    }

    /// Attaches a cache with the given time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.cache = Some(TtlCache::new(ttl));
        self
    }

    /// Restricts forwarded response headers to `names` (case-insensitive).
    pub fn with_keep_headers(mut self, names: HashSet<String>) -> Self {
        self.keep_headers = Some(lowercase_all(names));
        self
    }

    /// Strips `names` from forwarded response headers (case-insensitive).
    pub fn with_drop_headers(mut self, names: HashSet<String>) -> Self {
        self.drop_headers = Some(lowercase_all(names));
        self
    }

    /// `true` iff `path` begins with this route's prefix.
    fn matches(&self, path: &str) -> bool {
        path.starts_with(self.path_prefix.as_str())
    }
}

fn lowercase_all(names: HashSet<String>) -> HashSet<String> {
    names.into_iter().map(|name| name.to_ascii_lowercase()).collect()
}

/// An ordered table of [`Route`]s, matched by longest path prefix.
///
/// Routes are added only at configuration time and re-sorted once per
/// insertion; lookups are a linear scan over a small (tens of entries),
/// cache-friendly vector rather than a trie, since the source's own
/// comment on this tradeoff applies equally here: route counts are small
/// enough that branch-predictable linear scan beats the asymptotics of a
/// trie.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `route` and re-sorts by descending prefix length. Routes
    /// with equal-length prefixes keep their relative insertion order;
    /// configurations should avoid such ties.
    pub fn add_route(&mut self, route: Route) {
        self.routes.push(route);
        self.routes.sort_by(|a, b| b.path_prefix.len().cmp(&a.path_prefix.len()));
    }

    /// Returns the first route whose prefix is a prefix of `path`, or
    /// `None` if no route matches.
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.matches(path))
    }

    /// Used by the control plane; identical matching rule to
    /// [`Router::resolve`], kept as a separate name to mark intent at call
    /// sites.
    pub fn find_by_prefix(&self, path: &str) -> Option<&Route> {
        self.resolve(path)
    }
}

/// Derives the cache key for `path` under `route`: the residual after
/// stripping the route's prefix, or the path itself if the residual would
/// be empty.
pub fn cache_key(route: &Route, path: &str) -> String {
    match path.strip_prefix(route.path_prefix.as_str()) {
        Some(residual) if !residual.is_empty() => residual.to_string(),
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_picks_longest_matching_prefix() {
        let mut router = Router::new();
        router.add_route(Route::new("/a/", "http://a"));
        router.add_route(Route::new("/a/b/", "http://ab"));

        let route = router.resolve("/a/b/c").expect("a route must match");
        assert_eq!(route.path_prefix, "/a/b/");
    }

    #[test]
    fn resolve_returns_none_when_no_prefix_matches() {
        let mut router = Router::new();
        router.add_route(Route::new("/a/", "http://a"));
        assert!(router.resolve("/z/").is_none());
    }

    #[test]
    fn resolve_ties_resolve_to_insertion_order() {
        let mut router = Router::new();
        router.add_route(Route::new("/a/", "http://first"));
        router.add_route(Route::new("/a/", "http://second"));

        let route = router.resolve("/a/x").expect("a route must match");
        assert_eq!(route.target_base_url, "http://first");
    }

    #[test]
    fn cache_key_strips_prefix_when_residual_is_non_empty() {
        let route = Route::new("/api/", "http://u");
        assert_eq!(cache_key(&route, "/api/x"), "x");
    }

    #[test]
    fn cache_key_falls_back_to_full_path_when_residual_is_empty() {
        let route = Route::new("/api/", "http://u");
        assert_eq!(cache_key(&route, "/api/"), "/api/");
    }

    #[test]
    fn add_route_keeps_longest_prefix_first_regardless_of_insertion_order() {
        let mut router = Router::new();
        router.add_route(Route::new("/a/b/", "http://deep"));
        router.add_route(Route::new("/a/", "http://shallow"));

        let route = router.resolve("/a/b/c").expect("a route must match");
        assert_eq!(route.target_base_url, "http://deep");
    }
}
