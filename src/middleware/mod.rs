//! Composable `next()` middleware pipeline with typed exception dispatch
//! (C10). Not present in the donor — handlers there write directly to
//! `Response`, there's no interceptor chain. Authored fresh, modeled on
//! the `async fn` handler signature the donor's own `Handler` trait uses
//! (see `server::server_impl::Handler`) so a middleware reads like "one
//! more handler that gets to decide whether to call the next one."
//!
//! Futures here are not `Send`: [`Context`] holds raw pointers into a
//! single connection's stack-allocated slots and is only ever driven by
//! the fiber that owns that connection, on the single worker thread that
//! owns it (see the contract's single-threaded-per-worker model). Pinning
//! a pipeline run to one thread is exactly what a `tokio::task::LocalSet`
//! / current-thread runtime gives each worker, so there is nothing to gain
//! from demanding `Send` here and a real cost (it would force `Context`
//! back into a thread-safe shape it has no use for).

use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use crate::context::Context;
use crate::http::response::Handled;
use crate::http::types::StatusCode;

pub type BoxError = Box<dyn StdError>;
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// A boxed, type-erased route target for [`crate::router::Router`]. `Box`
/// already implements `Fn` by deref, and `&RouteHandler` in turn implements
/// `Fn` by the stdlib's blanket reference impl, so a `&RouteHandler`
/// fetched out of a `Router::find` can be passed directly as
/// [`Pipeline::execute`]'s terminal handler with no extra wrapping.
pub type RouteHandler = Box<dyn for<'r> Fn(&'r mut Context) -> BoxFuture<'r, Result<Handled, BoxError>>>;

/// Boxes a closure returning an already-pinned future into a
/// [`RouteHandler`] for registration on a [`Router`](crate::router::Router).
/// Closures write `|ctx| -> BoxFuture<'_, _> { Box::pin(async move { ... }) }`,
/// the same erase-the-future-yourself shape the [`Middleware`] blanket impl
/// requires, for the same HRTB reason (see the module doc comment).
pub fn handler<F>(f: F) -> RouteHandler
where
    F: for<'r> Fn(&'r mut Context) -> BoxFuture<'r, Result<Handled, BoxError>> + 'static,
{
    Box::new(f)
}

/// The remaining pipeline, captured as a one-shot closure. Calling it
/// advances to the next middleware (or the terminal handler if none
/// remain). Not calling it short-circuits the chain — the contract's
/// "not calling `next` short-circuits" rule falls directly out of `next`
/// being an owned value: if a middleware drops it, nothing downstream
/// ever runs.
pub struct Next<'a> {
    remaining: &'a [Rc<dyn Middleware>],
    terminal: &'a (dyn for<'r> Fn(&'r mut Context) -> BoxFuture<'r, Result<Handled, BoxError>> + 'a),
}

impl<'a> Next<'a> {
    /// Invokes the next middleware in the chain, or the terminal handler
    /// once the chain is exhausted.
    pub fn run(self, ctx: &'a mut Context) -> BoxFuture<'a, Result<Handled, BoxError>> {
        match self.remaining.split_first() {
            Some((mw, rest)) => {
                let next = Next {
                    remaining: rest,
                    terminal: self.terminal,
                };
                mw.call(ctx, next)
            }
            None => (self.terminal)(ctx),
        }
    }
}

/// One pipeline stage. Implemented for plain async closures via the
/// blanket impl below — application code rarely implements this trait by
/// hand.
pub trait Middleware: 'static {
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<Handled, BoxError>>;
}

impl<F> Middleware for F
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<Handled, BoxError>> + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<Handled, BoxError>> {
        self(ctx, next)
    }
}

/// A handler for one class of error in the [`ExceptionRegistry`]. Takes
/// the error and the context that was in flight when it was raised, and
/// must produce a response.
pub type ExceptionHandler = Box<dyn Fn(&(dyn StdError + 'static), &mut Context) -> Option<Handled>>;

/// Observer invoked for every error regardless of whether a handler
/// matched — for logging/metrics, per the contract's "`onError` observer
/// hooks always fire".
pub type ErrorObserver = Box<dyn Fn(&(dyn StdError + 'static))>;

/// Maps error types to response-producing handlers, and walks an error's
/// `source()` chain to find the nearest registered ancestor.
///
/// Rust has no runtime class hierarchy to walk, so the contract's "walks
/// the class hierarchy of the raised error" is realized as a walk up the
/// `std::error::Error::source()` chain instead: a handler registered for
/// a wrapper error type also catches any more specific error it wraps,
/// the same way registering a handler for a base class in the source
/// system catches its subclasses. Handlers are matched by `TypeId` of the
/// concrete error type at each link in the chain, innermost first.
#[derive(Default)]
pub struct ExceptionRegistry {
    handlers: Vec<ExceptionHandler>,
    observers: Vec<ErrorObserver>,
}

impl ExceptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for errors of exactly type `E`, or any error
    /// whose `source()` chain passes through an `E`.
    pub fn register<E, H>(&mut self, handler: H)
    where
        E: StdError + 'static,
        H: Fn(&E, &mut Context) -> Handled + 'static,
    {
        let boxed: ExceptionHandler = Box::new(move |err, ctx| {
            err.downcast_ref::<E>().map(|typed| handler(typed, ctx))
        });
        self.handlers.push(boxed);
    }

    pub fn on_error<F>(&mut self, observer: F)
    where
        F: Fn(&(dyn StdError + 'static)) + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Dispatches `err`: fires every observer first, then walks `err` and
    /// its `source()` chain looking for a registered handler, innermost
    /// error first. Falls back to a generic `500` if nothing matches.
    pub fn dispatch(&self, err: &(dyn StdError + 'static), ctx: &mut Context) -> Handled {
        for observer in &self.observers {
            observer(err);
        }

        let mut current: Option<&(dyn StdError + 'static)> = Some(err);
        while let Some(e) = current {
            for handler in &self.handlers {
                if let Some(handled) = handler(e, ctx) {
                    return handled;
                }
            }
            current = e.source();
        }

        ctx.send(StatusCode::InternalServerError, "Internal Server Error")
            .unwrap_or_else(|_| {
                // Context was hijacked mid-dispatch: nothing left to write.
                Handled::synthetic()
            })
    }
}

/// An ordered list of middlewares plus the exception registry they share.
/// `execute` is the contract's `execute(ctx, terminal_handler)`.
pub struct Pipeline {
    stages: Vec<Rc<dyn Middleware>>,
    exceptions: ExceptionRegistry,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            exceptions: ExceptionRegistry::new(),
        }
    }

    pub fn use_middleware<M>(&mut self, middleware: M) -> &mut Self
    where
        M: Middleware,
    {
        self.stages.push(Rc::new(middleware));
        self
    }

    pub fn exceptions(&mut self) -> &mut ExceptionRegistry {
        &mut self.exceptions
    }

    /// Runs the chain against `ctx`, calling `terminal` once every
    /// middleware has called `next()` (or immediately if the pipeline is
    /// empty). An error returned anywhere in the chain is caught here and
    /// converted to a response via the exception registry — it never
    /// propagates past `execute`, matching the contract's "nothing
    /// propagates out of the fiber."
    pub async fn execute<Term>(&self, ctx: &mut Context, terminal: Term) -> Handled
    where
        Term: for<'r> Fn(&'r mut Context) -> BoxFuture<'r, Result<Handled, BoxError>>,
    {
        let next = Next {
            remaining: &self.stages,
            terminal: &terminal,
        };
        match next.run(ctx).await {
            Ok(handled) => handled,
            Err(err) => self.exceptions.dispatch(err.as_ref(), ctx),
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::Request;
    use crate::http::response::Response;
    use crate::router::PathParams;
    use std::fmt;

    #[derive(Debug)]
    struct BoomError;
    impl fmt::Display for BoomError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "boom")
        }
    }
    impl StdError for BoomError {}

    fn with_ctx<F: FnOnce(&mut Context)>(f: F) {
        let limits = crate::config::HeaderLimits::default();
        let request = Request::new(&limits);
        let mut response = Response::new(&Default::default());
        let mut arena = crate::pool::Arena::new(64);
        let mut data = ();
        let mut ctx = unsafe {
            Context::new(&request, &mut response, &mut arena, &mut data, PathParams::new())
        };
        f(&mut ctx);
    }

    fn block_on<T>(fut: impl Future<Output = T>) -> T {
        let local = tokio::task::LocalSet::new();
        local.block_on(
            &tokio::runtime::Builder::new_current_thread().build().unwrap(),
            fut,
        )
    }

    #[test]
    fn empty_pipeline_runs_terminal_directly() {
        with_ctx(|ctx| {
            let pipeline = Pipeline::new();
            let fut = pipeline.execute(ctx, |ctx: &mut Context| -> BoxFuture<'_, Result<Handled, BoxError>> {
                Box::pin(std::future::ready(
                    ctx.send(StatusCode::Ok, "ok").map_err(|e| Box::new(e) as BoxError),
                ))
            });
            block_on(fut);
        });
    }

    #[test]
    fn middleware_can_short_circuit() {
        with_ctx(|ctx| {
            let mut pipeline = Pipeline::new();
            fn assert_hrtb<F>(f: F) -> F
            where
                F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<Handled, BoxError>>,
            {
                f
            }
            pipeline.use_middleware(assert_hrtb(|ctx: &mut Context, _next: Next<'_>| -> BoxFuture<'_, Result<Handled, BoxError>> {
                Box::pin(async move { ctx.send(StatusCode::Forbidden, "no").map_err(|e| Box::new(e) as BoxError) })
            }));
            let fut = pipeline.execute(ctx, |_: &mut Context| -> BoxFuture<'_, Result<Handled, BoxError>> {
                panic!("terminal must not run when middleware short-circuits")
            });
            block_on(fut);
        });
    }

    #[test]
    fn route_handler_runs_through_pipeline() {
        use crate::router::Router;

        let router = Router::new().get(
            "/hello",
            handler(|ctx: &mut Context| -> BoxFuture<'_, Result<Handled, BoxError>> {
                Box::pin(async move { ctx.send(StatusCode::Ok, "hi").map_err(|e| Box::new(e) as BoxError) })
            }),
        );

        with_ctx(|ctx| {
            let pipeline = Pipeline::new();
            let (route, _params) = router.find(crate::http::types::Method::Get, "/hello").unwrap();
            block_on(pipeline.execute(ctx, route));
        });
    }

    #[test]
    fn unmatched_error_falls_back_to_500() {
        with_ctx(|ctx| {
            let pipeline = Pipeline::new();
            let fut = pipeline.execute(ctx, |_: &mut Context| -> BoxFuture<'_, Result<Handled, BoxError>> {
                Box::pin(std::future::ready(Err(Box::new(BoomError) as BoxError)))
            });
            block_on(fut);
        });
    }
}
