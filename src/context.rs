//! Per-request scratch (C11): params, middleware storage, and the hijack
//! hook, bound to the connection's stack-allocated request/response slots.
//!
//! The donor has no equivalent — handlers there receive `&Request` and
//! `&mut Response` directly. `Context` is a thin façade over the same two
//! values plus the two pieces of state the contract adds: route params
//! and a type-erased scratch map, grounded on the `Extensions`-style
//! type map used for request-scoped storage in `conduit`/`hyper`-derived
//! middleware stacks (see `other_examples/`), rather than the pointer-width
//! reinterpretation a non-Rust source might use for the same contract —
//! `Box<dyn Any>` gives the same ≤4-inline/heap-overflow shape without
//! unsafe transmutation of arbitrary types through a raw `usize`.
//!
//! `Context` itself carries no lifetime parameter. Middleware is dispatched
//! through `Arc<dyn Middleware>` and boxed futures (see `crate::middleware`),
//! and a borrowed `Context<'conn>` threaded through that machinery runs
//! straight into the same "does this future actually outlive the borrow"
//! wall every `dyn Future` + `&mut T` combination does. The donor already
//! solves the analogous problem for its zero-copy header views: `Parser`
//! hands out `&'static [u8]` slices into its own long-lived buffer via
//! `into_static`/`get_slice_static` (see `http/request.rs`), on the
//! argument that the buffer outlives the view, not the stack frame that
//! produced it. `Context` uses the same argument for its request/response
//! pointers: the `Connection` that owns the real `Request`/`Response`
//! values outlives every `Context` built over them for the span of one
//! handler invocation, so a `'static`-shaped view is sound as long as
//! nothing lets a `Context` escape that invocation. Construction is
//! `unsafe` and `pub(crate)`-only to keep that invariant inside this
//! crate's control.

use std::any::{Any, TypeId};
use std::marker::PhantomData;

use crate::http::request::Request;
use crate::http::response::{Handled, Response};
use crate::http::types::{Method, StatusCode};
use crate::pool::Arena;
use crate::router::PathParams;

const INLINE_STORAGE_CAP: usize = 4;

/// Type-erased middleware scratch storage. Up to [`INLINE_STORAGE_CAP`]
/// entries live inline; beyond that they spill into a heap `Vec`, matching
/// the inline-then-heap-vector contract (distinct from `PathParams`, whose
/// overflow policy is silent truncation rather than spillover).
#[derive(Default)]
pub struct ContextStorage {
    inline: [Option<(TypeId, Box<dyn Any + Send>)>; INLINE_STORAGE_CAP],
    inline_len: usize,
    overflow: Vec<(TypeId, Box<dyn Any + Send>)>,
}

impl ContextStorage {
    pub fn new() -> Self {
        Self {
            inline: Default::default(),
            inline_len: 0,
            overflow: Vec::new(),
        }
    }

    /// Inserts `value`, replacing any existing value of the same type.
    pub fn insert<T: Send + 'static>(&mut self, value: T) {
        let id = TypeId::of::<T>();
        self.remove_slot(id);
        let entry = (id, Box::new(value) as Box<dyn Any + Send>);
        if self.inline_len < INLINE_STORAGE_CAP {
            self.inline[self.inline_len] = Some(entry);
            self.inline_len += 1;
        } else {
            self.overflow.push(entry);
        }
    }

    pub fn get<T: Send + 'static>(&self) -> Option<&T> {
        let id = TypeId::of::<T>();
        self.inline[..self.inline_len]
            .iter()
            .flatten()
            .chain(self.overflow.iter())
            .find(|(tid, _)| *tid == id)
            .and_then(|(_, v)| v.downcast_ref())
    }

    pub fn get_mut<T: Send + 'static>(&mut self) -> Option<&mut T> {
        let id = TypeId::of::<T>();
        self.inline[..self.inline_len]
            .iter_mut()
            .flatten()
            .chain(self.overflow.iter_mut())
            .find(|(tid, _)| *tid == id)
            .and_then(|(_, v)| v.downcast_mut())
    }

    fn remove_slot(&mut self, id: TypeId) -> Option<Box<dyn Any + Send>> {
        if let Some(idx) = self.inline[..self.inline_len]
            .iter()
            .position(|e| matches!(e, Some((tid, _)) if *tid == id))
        {
            let removed = self.inline[idx].take();
            // compact so `inline[..inline_len]` stays contiguous
            for i in idx..self.inline_len - 1 {
                self.inline.swap(i, i + 1);
            }
            self.inline_len -= 1;
            return removed.map(|(_, v)| v);
        }
        if let Some(idx) = self.overflow.iter().position(|(tid, _)| *tid == id) {
            return Some(self.overflow.remove(idx).1);
        }
        None
    }

    pub fn len(&self) -> usize {
        self.inline_len + self.overflow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Raised when a response mutator is called on a [`Context`] whose
/// connection has already been hijacked. Produced only by this module;
/// never reaches the wire (the hijacking caller owns the socket now).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hijacked;

impl std::fmt::Display for Hijacked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "connection was hijacked; response is no longer writable")
    }
}
impl std::error::Error for Hijacked {}

/// Per-request façade bound to one connection's request/response slots for
/// the duration of a single handler invocation.
///
/// Carries no lifetime parameter — see the module doc comment for why. The
/// `request`/`response` fields are raw pointers into storage the caller of
/// [`Context::new`] guarantees outlives this value; `params` is
/// transmuted to `'static` on the same guarantee (the real path string
/// lives in the request buffer the pointers above already point into).
pub struct Context {
    request: *const Request,
    response: *mut Response,
    arena: *mut Arena,
    /// The owning connection's long-lived [`ConnectionData`](crate::ConnectionData)
    /// value, type-erased the same way [`ContextStorage`] erases its
    /// entries. Unlike `storage`, this value survives across every request
    /// on one keep-alive connection; the connection loop resets it once
    /// per *connection*, not once per request.
    connection_data: *mut dyn Any,
    params: PathParams<'static>,
    storage: ContextStorage,
    hijacked: bool,
    _not_send_sync: PhantomData<*const ()>,
}

impl Context {
    /// # Safety
    /// `request`, `response`, and `arena` must remain valid, and `params`
    /// must remain a valid borrow into memory the caller also keeps alive,
    /// for the entire lifetime of the returned `Context`. Callers satisfy
    /// this by building a `Context` only for the span of one handler
    /// invocation over a `Connection`'s own request/response/arena
    /// storage, and dropping it before that storage is reused or freed.
    pub(crate) unsafe fn new(
        request: &Request,
        response: &mut Response,
        arena: &mut Arena,
        connection_data: &mut dyn Any,
        params: PathParams<'_>,
    ) -> Self {
        Self {
            request: request as *const Request,
            response: response as *mut Response,
            arena: arena as *mut Arena,
            connection_data: connection_data as *mut dyn Any,
            // SAFETY: caller-upheld per the function's safety doc; `'req`
            // outlives this `Context` so the transmuted `'static` view
            // never actually outlives the data it points at.
            params: std::mem::transmute::<PathParams<'_>, PathParams<'static>>(params),
            storage: ContextStorage::new(),
            hijacked: false,
            _not_send_sync: PhantomData,
        }
    }

    pub fn request(&self) -> &Request {
        // SAFETY: valid for the lifetime of `self` per `Context::new`.
        unsafe { &*self.request }
    }

    pub fn params(&self) -> &PathParams<'static> {
        &self.params
    }

    pub fn storage(&self) -> &ContextStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut ContextStorage {
        &mut self.storage
    }

    /// Per-fiber bump scratch (C3), reset by the connection loop between
    /// requests. Use for short-lived allocations a handler or middleware
    /// needs only for the span of one request.
    pub fn arena(&mut self) -> &mut Arena {
        // SAFETY: valid for the lifetime of `self` per `Context::new`.
        unsafe { &mut *self.arena }
    }

    /// The owning connection's [`ConnectionData`](crate::ConnectionData)
    /// value, downcast to its concrete type. Returns `None` if `S` doesn't
    /// match the type the connection was built with.
    pub fn connection_data<S: 'static>(&mut self) -> Option<&mut S> {
        // SAFETY: valid for the lifetime of `self` per `Context::new`.
        unsafe { &mut *self.connection_data }.downcast_mut::<S>()
    }

    /// Shortcut for `response().status(status).body(body)`. Fails if this
    /// connection has already been hijacked.
    pub fn send<T: crate::http::response::write::WriteBuffer>(
        &mut self,
        status: StatusCode,
        body: T,
    ) -> Result<Handled, Hijacked> {
        if self.hijacked {
            return Err(Hijacked);
        }
        // SAFETY: valid for the lifetime of `self` per `Context::new`.
        let response = unsafe { &mut *self.response };
        Ok(response.status(status).body(body))
    }

    /// Shortcut for a `200 OK` JSON body: caller passes an already-encoded
    /// JSON byte buffer (this core does not depend on a serializer; see
    /// `DESIGN.md` for why JSON encoding is left to handler code).
    pub fn json<T: crate::http::response::write::WriteBuffer>(&mut self, json: T) -> Result<Handled, Hijacked> {
        if self.hijacked {
            return Err(Hijacked);
        }
        // SAFETY: valid for the lifetime of `self` per `Context::new`.
        let response = unsafe { &mut *self.response };
        response.header(b"content-type", "application/json");
        Ok(response.status(StatusCode::Ok).body(json))
    }

    pub fn response_mut(&mut self) -> Result<&mut Response, Hijacked> {
        if self.hijacked {
            return Err(Hijacked);
        }
        // SAFETY: valid for the lifetime of `self` per `Context::new`.
        Ok(unsafe { &mut *self.response })
    }

    /// Detects an HTTP Upgrade request for `websocket`, the usual
    /// precondition for calling [`Context::hijack`].
    pub fn is_websocket_upgrade(&self) -> bool {
        self.request()
            .header(b"upgrade")
            .map(|v| v.eq_ignore_ascii_case(b"websocket"))
            .unwrap_or(false)
    }

    /// Detects an `Accept: text/event-stream` request, the usual
    /// precondition for a server-sent-events handler that wants to hold
    /// the connection open past this handler's return.
    pub fn is_sse_request(&self) -> bool {
        self.request()
            .header(b"accept")
            .map(|v| {
                v.windows(b"text/event-stream".len())
                    .any(|w| w.eq_ignore_ascii_case(b"text/event-stream"))
            })
            .unwrap_or(false)
    }

    /// Marks this context as hijacked: the server will neither write nor
    /// close the underlying connection after the handler returns. Further
    /// calls to `send`/`json`/`response_mut` on this context return
    /// `Err(Hijacked)` — a typed poisoning of subsequent mutators rather
    /// than a panic, since a handler may legitimately call `hijack()` then
    /// go on to do unrelated bookkeeping with the same `Context`.
    ///
    /// Actually transferring socket ownership is the caller's
    /// responsibility at the `Connection` layer (see
    /// `server::connection::Connection::hijack`); this method only flips
    /// the flag that poisons this `Context`'s own response mutators.
    pub fn hijack(&mut self) {
        self.hijacked = true;
    }

    pub fn is_hijacked(&self) -> bool {
        self.hijacked
    }

    pub fn method(&self) -> Method {
        self.request().method()
    }
}
