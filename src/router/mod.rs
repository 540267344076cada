//! Radix-tree router (C9): one tree per HTTP method, fluent registration.

mod params;
mod radix;

pub use params::PathParams;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::ServerError;
use crate::http::types::Method;
use radix::MethodTree;

static NEXT_ROUTER_ID: AtomicU64 = AtomicU64::new(0);

/// Registers and matches routes across all eight known methods.
///
/// Registration follows the same fluent, consuming-`self` style as
/// [`crate::server::server_impl::ServerBuilder`]: `Router::new().get(...).post(...)`.
/// A conflicting double-registration of the same `(method, path)` is a
/// startup-time programmer error, so it panics the same way the builder's
/// `build()` panics on a missing required field, rather than forcing every
/// call site to thread a `Result` through route table construction.
/// Composing routers at runtime (`mount`) is a genuinely fallible
/// operation — prefix collisions and cycles are data, not typos — and
/// returns `Result`.
pub struct Router<T> {
    id: u64,
    /// Ids of every router (this one and any merged in via `mount`) whose
    /// routes now live in `trees`. Used only to detect an attempt to mount
    /// a router into its own ancestry.
    lineage: Vec<u64>,
    trees: HashMap<Method, MethodTree<T>>,
}

impl<T> Router<T> {
    pub fn new() -> Self {
        let id = NEXT_ROUTER_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            lineage: vec![id],
            trees: HashMap::new(),
        }
    }

    /// Registers `handler` for `method`/`path`. Panics on a conflicting
    /// double-registration — see the type-level doc comment.
    #[track_caller]
    pub fn route(mut self, method: Method, path: &str, handler: T) -> Self {
        self.try_route(method, path, handler)
            .expect("conflicting route registration");
        self
    }

    /// Fallible form of [`Router::route`], for callers lowering a dynamic
    /// or codegen-produced list of registrations where a conflict is
    /// recoverable data rather than a startup typo.
    pub fn try_route(&mut self, method: Method, path: &str, handler: T) -> Result<(), ServerError> {
        self.trees
            .entry(method)
            .or_insert_with(MethodTree::new)
            .insert(path, handler)
            .map_err(|err| match err {
                ServerError::RouteConflict { path, .. } => ServerError::RouteConflict {
                    method: method_name(method).to_string(),
                    path,
                },
                other => other,
            })
    }

    #[track_caller]
    pub fn get(self, path: &str, handler: T) -> Self {
        self.route(Method::Get, path, handler)
    }
    #[track_caller]
    pub fn post(self, path: &str, handler: T) -> Self {
        self.route(Method::Post, path, handler)
    }
    #[track_caller]
    pub fn put(self, path: &str, handler: T) -> Self {
        self.route(Method::Put, path, handler)
    }
    #[track_caller]
    pub fn delete(self, path: &str, handler: T) -> Self {
        self.route(Method::Delete, path, handler)
    }
    #[track_caller]
    pub fn patch(self, path: &str, handler: T) -> Self {
        self.route(Method::Patch, path, handler)
    }
    #[track_caller]
    pub fn head(self, path: &str, handler: T) -> Self {
        self.route(Method::Head, path, handler)
    }
    #[track_caller]
    pub fn options(self, path: &str, handler: T) -> Self {
        self.route(Method::Options, path, handler)
    }

    /// Looks up `(method, path)`. `path` should already have the query
    /// string separated by the caller (the router strips it too, so
    /// passing the full target is harmless, just redundant work).
    pub fn find<'req>(&self, method: Method, path: &'req str) -> Option<(&T, PathParams<'req>)> {
        self.trees.get(&method)?.find(path)
    }

    /// Merges `sub`'s routes into `self` under `prefix`, consuming `sub`.
    /// Rejects if `sub`'s lineage overlaps `self`'s — i.e. `sub` was itself
    /// built by mounting (directly or transitively) a router that has
    /// since mounted `self`, which would otherwise let two `Router`
    /// values hold each other's routes and loop during composition.
    pub fn mount(mut self, prefix: &str, sub: Router<T>) -> Result<Self, ServerError> {
        if sub.lineage.contains(&self.id) || self.lineage.contains(&sub.id) {
            return Err(ServerError::RouterCycle {
                prefix: prefix.to_string(),
            });
        }

        let prefix = prefix.trim_end_matches('/');
        for (method, tree) in sub.trees {
            for (path, handler) in tree.into_routes() {
                let full_path = format!("{prefix}{path}");
                self.try_route(method, &full_path, handler)?;
            }
        }
        self.lineage.extend(sub.lineage);
        Ok(self)
    }
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn method_name(method: Method) -> &'static str {
    match method {
        Method::Get => "GET",
        Method::Put => "PUT",
        Method::Post => "POST",
        Method::Head => "HEAD",
        Method::Patch => "PATCH",
        Method::Delete => "DELETE",
        Method::Options => "OPTIONS",
        Method::Trace => "TRACE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_matches_across_methods() {
        let router = Router::new().get("/hello", 1u32).post("/hello", 2u32);
        assert_eq!(*router.find(Method::Get, "/hello").unwrap().0, 1);
        assert_eq!(*router.find(Method::Post, "/hello").unwrap().0, 2);
        assert!(router.find(Method::Put, "/hello").is_none());
    }

    #[test]
    #[should_panic]
    fn duplicate_registration_panics() {
        Router::new().get("/hello", 1u32).get("/hello", 2u32);
    }

    #[test]
    fn mount_prefixes_sub_router_routes() {
        let sub = Router::new().get("/ping", 1u32);
        let router = Router::new().get("/top", 0u32).mount("/api", sub).unwrap();
        assert_eq!(*router.find(Method::Get, "/api/ping").unwrap().0, 1);
        assert_eq!(*router.find(Method::Get, "/top").unwrap().0, 0);
    }

    #[test]
    fn mounting_a_router_into_itself_is_rejected() {
        let router: Router<u32> = Router::new().get("/a", 1);
        let id = router.id;
        // Simulate "self-mount" by constructing a router that already
        // carries the target's id in its lineage.
        let mut fake_sub = Router::new();
        fake_sub.lineage.push(id);
        assert!(router.mount("/x", fake_sub).is_err());
    }
}
