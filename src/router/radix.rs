//! Per-method radix tree (C9).
//!
//! Not adapted from anywhere in the donor — the donor has no routing layer
//! at all. Authored fresh, borrowing two idioms that recur throughout the
//! rest of this codebase: the short-string-optimization layout `http::types`
//! uses for zero-copy byte views, and the fluent builder style
//! `ServerBuilder` uses for its own configuration surface.

use std::collections::HashMap;

use crate::errors::ServerError;
use crate::router::params::PathParams;

const INLINE_CAP: usize = 15;
/// A parent accumulates a hash-cache for its Static children only once it
/// has more than this many of them; below that, linear scan is faster than
/// hashing.
const CACHE_THRESHOLD: usize = 3;

/// A route segment, stored inline up to 15 bytes (the common case: almost
/// every path segment in practice is short) or on the heap beyond that.
/// Load-bearing for cache locality during matching, per the contract.
#[derive(Clone)]
enum SegKey {
    Inline { buf: [u8; INLINE_CAP], len: u8 },
    Heap(Box<str>),
}

impl SegKey {
    fn new(s: &str) -> Self {
        if s.len() <= INLINE_CAP {
            let mut buf = [0u8; INLINE_CAP];
            buf[..s.len()].copy_from_slice(s.as_bytes());
            SegKey::Inline {
                buf,
                len: s.len() as u8,
            }
        } else {
            SegKey::Heap(s.into())
        }
    }

    #[inline(always)]
    fn as_str(&self) -> &str {
        match self {
            SegKey::Inline { buf, len } => {
                // SAFETY: constructed only from a valid `&str` slice of the
                // same length in `new`.
                unsafe { std::str::from_utf8_unchecked(&buf[..*len as usize]) }
            }
            SegKey::Heap(s) => s,
        }
    }
}

/// What kind of segment a node matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegKind {
    Static,
    Param,
    Wildcard,
}

struct Node<T> {
    key: SegKey,
    kind: SegKind,
    /// For Param/Wildcard nodes, the name bound into `PathParams` (e.g.
    /// `id` for `:id`). Unused for Static.
    param_name: &'static str,
    handler: Option<T>,
    static_children: Vec<Node<T>>,
    param_child: Option<Box<Node<T>>>,
    wildcard_child: Option<Box<Node<T>>>,
    /// Populated lazily once `static_children.len() > CACHE_THRESHOLD`;
    /// maps a child's segment text to its index in `static_children`.
    static_cache: Option<HashMap<Box<str>, usize>>,
}

impl<T> Node<T> {
    fn root() -> Self {
        Node {
            key: SegKey::new(""),
            kind: SegKind::Static,
            param_name: "",
            handler: None,
            static_children: Vec::new(),
            param_child: None,
            wildcard_child: None,
            static_cache: None,
        }
    }

    fn new(key: &str, kind: SegKind, param_name: &'static str) -> Self {
        Node {
            key: SegKey::new(key),
            kind,
            param_name,
            handler: None,
            static_children: Vec::new(),
            param_child: None,
            wildcard_child: None,
            static_cache: None,
        }
    }

    fn rebuild_cache_if_needed(&mut self) {
        if self.static_children.len() > CACHE_THRESHOLD {
            let mut cache = HashMap::with_capacity(self.static_children.len());
            for (idx, child) in self.static_children.iter().enumerate() {
                cache.insert(Box::from(child.key.as_str()), idx);
            }
            self.static_cache = Some(cache);
        }
    }

    fn find_static(&self, segment: &str) -> Option<&Node<T>> {
        if let Some(cache) = &self.static_cache {
            return cache.get(segment).map(|&idx| &self.static_children[idx]);
        }
        self.static_children
            .iter()
            .find(|c| c.key.as_str() == segment)
    }

    /// Inserts (or reuses) the static child for `segment`, returning a
    /// mutable reference to it.
    fn static_child_mut(&mut self, segment: &str) -> &mut Node<T> {
        if let Some(idx) = self
            .static_children
            .iter()
            .position(|c| c.key.as_str() == segment)
        {
            return &mut self.static_children[idx];
        }
        self.static_children
            .push(Node::new(segment, SegKind::Static, ""));
        self.rebuild_cache_if_needed();
        self.static_children.last_mut().unwrap()
    }
}

/// One method's route tree. `Router` (see `mod.rs`) owns one `MethodTree`
/// per HTTP method it has registrations for.
pub struct MethodTree<T> {
    root: Node<T>,
}

impl<T> MethodTree<T> {
    pub fn new() -> Self {
        Self { root: Node::root() }
    }

    /// Registers `handler` for `path`. `path` segments beginning with `:`
    /// are Param, `*` are Wildcard (and must be the final segment), all
    /// else Static. At most one Param child and one Wildcard child are
    /// kept per parent; a conflicting param/wildcard name on an existing
    /// node is a silent reuse (last-registration-wins on the name, per the
    /// contract's "warning, reuse the existing node" insert policy).
    pub fn insert(&mut self, path: &str, handler: T) -> Result<(), ServerError> {
        let mut node = &mut self.root;
        for segment in normalize_for_insert(path).split('/').filter(|s| !s.is_empty()) {
            if let Some(name) = segment.strip_prefix(':') {
                let name: &'static str = Box::leak(name.to_string().into_boxed_str());
                node = node
                    .param_child
                    .get_or_insert_with(|| Box::new(Node::new(segment, SegKind::Param, name)));
            } else if let Some(name) = segment.strip_prefix('*') {
                let name: &'static str = Box::leak(name.to_string().into_boxed_str());
                node = node.wildcard_child.get_or_insert_with(|| {
                    Box::new(Node::new(segment, SegKind::Wildcard, name))
                });
            } else {
                node = node.static_child_mut(segment);
            }
        }
        if node.handler.is_some() {
            return Err(ServerError::RouteConflict {
                method: String::new(),
                path: path.to_string(),
            });
        }
        node.handler = Some(handler);
        Ok(())
    }

    /// Matches `path` (may still carry a query string) against the tree.
    /// Iterative, left to right, no recursion: failed Param branches are
    /// retried via an explicit stack rather than the call stack, and param
    /// writes made on an abandoned branch are rolled back with
    /// `PathParams::truncate`. Segments borrow directly from `path` — a
    /// query string strip is a slice operation and duplicate-slash
    /// collapsing / trailing-slash stripping fall out of filtering empty
    /// `split('/')` pieces, so no owned copy of the path is ever made.
    pub fn find<'req>(&self, path: &'req str) -> Option<(&T, PathParams<'req>)> {
        let stripped = match path.find('?') {
            Some(idx) => &path[..idx],
            None => path,
        };
        let mut params = PathParams::new();
        let segments: Vec<&str> = stripped.split('/').filter(|s| !s.is_empty()).collect();

        // A frame is "try this node, which consumes segments up to `idx`,
        // with `params` first rolled back to `params_len_before` and then
        // (if this node is a Param/Wildcard) `bind` applied". Binding is
        // deferred to pop time — applying it eagerly at push time would
        // corrupt sibling branches still sitting below it on the stack.
        type Frame<'n, 'r, T> = (&'n Node<T>, usize, usize, Option<(&'static str, &'r str)>);
        let mut stack: Vec<Frame<T>> = vec![(&self.root, 0, 0, None)];

        while let Some((node, idx, params_len_before, bind)) = stack.pop() {
            params.truncate(params_len_before);
            if let Some((name, value)) = bind {
                params.push(name, value);
            }

            if idx == segments.len() {
                if let Some(h) = &node.handler {
                    return Some((h, params));
                }
                continue;
            }
            let seg = segments[idx];
            let base_len = params.len();

            // Push in reverse priority so Static is popped (tried) first.
            if let Some(wc) = &node.wildcard_child {
                // `segments[idx]` is a genuine subslice of `stripped`, so
                // its byte offset recovers the rest of `stripped` without
                // rejoining the already-split pieces (which would allocate
                // and lose the original, unnormalized separator bytes).
                let offset = seg.as_ptr() as usize - stripped.as_ptr() as usize;
                let remainder = &stripped[offset..];
                stack.push((
                    wc,
                    segments.len(),
                    base_len,
                    Some((wc.param_name, remainder)),
                ));
            }
            if let Some(pc) = &node.param_child {
                stack.push((pc, idx + 1, base_len, Some((pc.param_name, seg))));
            }
            if let Some(child) = node.find_static(seg) {
                stack.push((child, idx + 1, base_len, None));
            }
        }
        None
    }

    /// Consumes the tree, returning every registered `(path, handler)`
    /// pair with paths reconstructed from the segment tree. Used by
    /// `Router::mount` to re-insert a sub-router's routes under a prefix.
    pub fn into_routes(self) -> Vec<(String, T)> {
        let mut out = Vec::new();
        collect_routes(self.root, String::new(), &mut out);
        out
    }
}

fn collect_routes<T>(node: Node<T>, prefix: String, out: &mut Vec<(String, T)>) {
    if let Some(handler) = node.handler {
        out.push((prefix.clone(), handler));
    }
    for child in node.static_children {
        let key = child.key.as_str().to_string();
        let path = format!("{prefix}/{key}");
        collect_routes(child, path, out);
    }
    if let Some(child) = node.param_child {
        let path = format!("{prefix}/:{}", child.param_name);
        collect_routes(*child, path, out);
    }
    if let Some(child) = node.wildcard_child {
        let path = format!("{prefix}/*{}", child.param_name);
        collect_routes(*child, path, out);
    }
}

impl<T> Default for MethodTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Collapses duplicate slashes and strips a trailing slash (except root)
/// for insertion. Query strings are never present at insertion time.
/// `find` needs none of this: splitting on `/` and filtering empty
/// pieces has the same effect on a path it only ever reads, without an
/// owned copy.
fn normalize_for_insert(path: &str) -> String {
    collapse_and_trim(path)
}

fn collapse_and_trim(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut last_was_slash = false;
    for c in path.chars() {
        if c == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        out.push(c);
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// A single lowercase-ascii path segment, never empty, never starting
    /// with `:`/`*` (those are routing syntax, covered by the dedicated
    /// static-vs-param tests above rather than the generator).
    fn segment() -> impl Strategy<Value = String> {
        "[a-z0-9]{1,8}"
    }

    proptest! {
        /// Registering `/fixed/<seg>` as Static and `/fixed/:id` as Param on
        /// the same tree must always resolve the literal segment to the
        /// Static handler, for every segment the generator can produce —
        /// the priority rule isn't specific to the handful of cases in
        /// `static_beats_param_on_same_segment`.
        #[test]
        fn static_always_outranks_param_for_any_segment(seg in segment()) {
            let mut tree = MethodTree::new();
            tree.insert(&format!("/fixed/{seg}"), "static").unwrap();
            tree.insert("/fixed/:id", "param").unwrap();

            let path = format!("/fixed/{seg}");
            let (h, params) = tree.find(&path).unwrap();
            prop_assert_eq!(*h, "static");
            prop_assert!(params.is_empty());
        }

        /// A path run through any number of doubled-up slashes always
        /// matches the same handler as its singly-slashed form, and binds
        /// the same param value.
        #[test]
        fn duplicate_slashes_never_change_the_match(a in segment(), b in segment()) {
            let mut tree = MethodTree::new();
            tree.insert("/a/:p/b", "h").unwrap();

            let doubled = format!("/a//{a}///b", a = a);
            let _ = b; // keeps the generator exercising two segment shapes
            let (h, params) = tree.find(&doubled).unwrap();
            prop_assert_eq!(*h, "h");
            prop_assert_eq!(params.get("p"), Some(a.as_str()));
        }

        /// A trailing query string never changes which handler matches or
        /// what a param captures, for any ASCII query payload.
        #[test]
        fn query_string_is_always_ignored(seg in segment(), query in "[a-zA-Z0-9=&]{0,12}") {
            let mut tree = MethodTree::new();
            tree.insert("/users/:id", "h").unwrap();

            let path = format!("/users/{seg}?{query}");
            let (h, params) = tree.find(&path).unwrap();
            prop_assert_eq!(*h, "h");
            prop_assert_eq!(params.get("id"), Some(seg.as_str()));
        }
    }
}
