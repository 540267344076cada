use crate::{
    config::Config,
    context::Context,
    middleware::{Pipeline, RouteHandler},
    router::Router,
    server::{connection::ConnectionData, worker::Worker},
    ConnectionFilter, Handled,
};
use std::{future::Future, marker::PhantomData, sync::Arc};
use tokio::{net::TcpListener, sync::Notify};

pub(crate) type RouterFactory = dyn Fn() -> Router<RouteHandler> + Send + Sync;
pub(crate) type PipelineFactory = dyn Fn() -> Pipeline + Send + Sync;

/// A trait for handling HTTP requests and generating responses.
///
/// Unlike a plain `fn(Request) -> Response`, a handler receives a
/// [`Context`] — the single handle to the in-flight request, response,
/// per-request scratch arena, and (via [`Context::connection_data`])
/// whatever state `S` carries across requests on the same keep-alive
/// connection.
///
/// The returned future is deliberately not required to be `Send`: a
/// [`Context`] is only ever driven by the single worker thread that owns
/// its connection, so demanding `Send` here would force it into a
/// thread-safe shape it has no use for.
///
/// # Examples
///
/// ```
/// use aurora::{Handler, Context, Handled, StatusCode};
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     async fn handle(&self, ctx: &mut Context) -> Handled {
///         ctx.send(StatusCode::Ok, "Hello world!").unwrap()
///     }
/// }
/// ```
/// Handler with [`ConnectionData`]:
/// ```
/// use aurora::{Handler, ConnectionData, Context, Handled, StatusCode};
///
/// struct CountingHandler;
///
/// impl Handler<State> for CountingHandler {
///     async fn handle(&self, ctx: &mut Context) -> Handled {
///         let data = ctx.connection_data::<State>().unwrap();
///         data.request_count += 1;
///         let count = data.request_count;
///
///         ctx.send(StatusCode::Ok, format!("Request #{count}")).unwrap()
///     }
/// }
///
/// struct State {
///     request_count: usize,
/// }
///
/// impl ConnectionData for State {
///     fn new() -> Self {
///         Self { request_count: 0 }
///     }
///
///     fn reset(&mut self) {
///         self.request_count = 0;
///     }
/// }
/// ```
pub trait Handler<S = ()>
where
    Self: Send + Sync + 'static,
    S: ConnectionData,
{
    /// Processes an HTTP request that reached no mounted route (or no
    /// router at all) and produces a response.
    ///
    /// # Errors
    ///
    /// Implementations should handle errors internally and set appropriate
    /// HTTP status codes on the response. Panics unwind only the fiber
    /// driving this connection; they do not bring down the worker.
    fn handle(&self, ctx: &mut Context) -> impl Future<Output = Handled>;
}

/// An HTTP server that processes incoming connections across a fixed pool
/// of single-threaded workers.
///
/// # Worker architecture
/// ```text
/// [ SO_REUSEPORT listener ] --- one per worker, same address
///            ||
///            \/
/// [----------------------------------------------]
/// [ Worker (OS thread, current-thread Tokio rt)    ]
/// [  - Router<RouteHandler> + Pipeline, each built  ]
/// [    once on this thread from a Send+Sync factory ]
/// [    and shared via Rc across its connections     ]
/// [  - ObjectPool<HttpConnection<H, S>>              ]
/// [  - per-connection fiber: accept -> run -> release]
/// [----------------------------------------------]
/// ```
/// Every worker binds its own socket with `SO_REUSEPORT` so the kernel
/// load-balances accepted connections across workers; no cross-thread
/// synchronization is needed once a connection lands on a worker. The
/// router and pipeline cross the thread boundary as factory closures
/// rather than built values, since [`Router<RouteHandler>`] holds
/// non-`Send` handler futures; see [`Worker`].
pub struct Server {
    workers: Vec<Worker>,
    shutdown: Arc<Notify>,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder<H, S>() -> ServerBuilder<H, S, ()>
    where
        H: Handler<S>,
        S: ConnectionData,
    {
        ServerBuilder {
            bind: None,
            handler: None,
            connection_filter: Arc::new(()),
            router_factory: None,
            pipeline_factory: Arc::new(Pipeline::new),
            _marker: PhantomData,
            config: Config::default(),
        }
    }

    /// Starts every worker thread and blocks until all of them have exited
    /// (normally only after [`graceful_stop`](Self::graceful_stop) is
    /// called from another task, or the process is killed).
    #[inline]
    pub async fn launch(self) {
        for worker in self.workers {
            worker.join().await;
        }
    }

    /// Signals every worker to stop accepting new connections and finish
    /// in-flight ones, waiting up to `timeout` before the worker threads
    /// are dropped regardless.
    #[inline]
    pub async fn graceful_stop(&self, timeout: std::time::Duration) {
        self.shutdown.notify_waiters();
        tokio::time::sleep(timeout).await;
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder<H, S = (), F = ()>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    bind: Option<TcpListener>,
    handler: Option<Arc<H>>,
    connection_filter: Arc<F>,
    router_factory: Option<Arc<RouterFactory>>,
    pipeline_factory: Arc<PipelineFactory>,
    _marker: PhantomData<S>,
    config: Config,
}

impl<H, S, F> ServerBuilder<H, S, F>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    /// Sets a pre-bound TCP listener for worker `0`; the remaining workers
    /// each bind their own `SO_REUSEPORT` socket to the same local address.
    ///
    /// **Required**, along with [`handler`](Self::handler).
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.bind = Some(listener);
        self
    }

    /// Sets the fallback request handler, run for any request that no
    /// mounted [`Router`] claims (or when no router is mounted at all).
    ///
    /// **Required**, along with [`listener`](Self::listener).
    #[inline(always)]
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Installs a connection filter to check incoming TCP connections
    /// before the first read. See [`ConnectionFilter`].
    #[inline(always)]
    pub fn conn_filter<NewF>(self, filter: NewF) -> ServerBuilder<H, S, NewF>
    where
        NewF: ConnectionFilter,
    {
        ServerBuilder {
            bind: self.bind,
            handler: self.handler,
            connection_filter: Arc::new(filter),
            router_factory: self.router_factory,
            pipeline_factory: self.pipeline_factory,
            _marker: self._marker,
            config: self.config,
        }
    }

    /// Sets the factory used to build a fresh radix-tree [`Router`] once on
    /// each worker thread. A matched route runs through the middleware
    /// pipeline in place of the fallback [`Handler`].
    ///
    /// Takes a factory rather than a built [`Router`] because a
    /// [`RouteHandler`]'s future is not `Send`, so the router itself cannot
    /// cross the thread boundary into a worker — only the (`Send + Sync`)
    /// closure that builds an equivalent one on that thread can.
    #[inline(always)]
    pub fn router<FN>(mut self, factory: FN) -> Self
    where
        FN: Fn() -> Router<RouteHandler> + Send + Sync + 'static,
    {
        self.router_factory = Some(Arc::new(factory));
        self
    }

    /// Sets the factory used to build a fresh [`Pipeline`] once per worker,
    /// for the same reason [`router`](Self::router) takes a factory: a
    /// pipeline's middleware stages close over non-`Send` futures.
    #[inline(always)]
    pub fn pipeline<FN>(mut self, factory: FN) -> Self
    where
        FN: Fn() -> Pipeline + Send + Sync + 'static,
    {
        self.pipeline_factory = Arc::new(factory);
        self
    }

    /// Overrides the full configuration bundle (bind address, overload
    /// behavior, connection/header/response limits) in one call.
    #[inline(always)]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Overrides per-connection timeouts and keep-alive budgeting. See
    /// [`config::ConnectionLimits`](crate::config::ConnectionLimits).
    #[inline(always)]
    pub fn connection_limits(mut self, limits: crate::config::ConnectionLimits) -> Self {
        self.config.connection = limits;
        self
    }

    /// Overrides request parsing limits and buffer pre-allocation
    /// strategy. See [`config::HeaderLimits`](crate::config::HeaderLimits).
    #[inline(always)]
    pub fn header_limits(mut self, limits: crate::config::HeaderLimits) -> Self {
        self.config.header = limits;
        self
    }

    /// Overrides response buffer allocation strategy. See
    /// [`config::ResponseLimits`](crate::config::ResponseLimits).
    #[inline(always)]
    pub fn response_limits(mut self, limits: crate::config::ResponseLimits) -> Self {
        self.config.response = limits;
        self
    }

    /// Overrides admission, worker-pool, and overload-shedding behavior.
    /// See [`config::OverloadLimits`](crate::config::OverloadLimits).
    #[inline(always)]
    pub fn overload_limits(mut self, limits: crate::config::OverloadLimits) -> Self {
        self.config.overload = limits;
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// # Panics
    ///
    /// Panics if [`handler`](Self::handler) was not called, or if
    /// binding an additional `SO_REUSEPORT` worker socket fails.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let handler = self.handler.expect("the `handler` method must be called to create a server");
        let shutdown = Arc::new(Notify::new());

        let addr = match &self.bind {
            Some(listener) => listener.local_addr().expect("bound listener has a local address"),
            None => format!("{}:{}", self.config.bind.host, self.config.bind.port)
                .parse()
                .expect("invalid bind address in Config"),
        };

        let num_workers = match self.config.overload.num_workers {
            0 => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            n => n,
        };

        let mut bind = self.bind;
        let mut workers = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            // Worker 0 gets the caller's pre-bound listener if one was
            // supplied; every other worker binds its own `SO_REUSEPORT`
            // socket to the same address so the kernel load-balances
            // accepted connections across them.
            let listener = bind.take();

            workers.push(Worker::spawn(
                listener,
                addr,
                handler.clone(),
                self.connection_filter.clone(),
                self.router_factory.clone(),
                self.pipeline_factory.clone(),
                self.config.clone(),
                shutdown.clone(),
            ));
        }

        Server { workers, shutdown }
    }
}
