use crate::{
    config::{Config, ConnectionLimits, HeaderLimits, ResponseLimits},
    context::Context,
    errors::ConnectionError,
    http::{
        request::{Parser, Request},
        response::Response,
    },
    middleware::{BoxError, BoxFuture, Pipeline, RouteHandler},
    pool::Arena,
    router::{PathParams, Router},
    server::server_impl::Handler,
    Handled,
};
use std::{future::Future, io, net::SocketAddr, rc::Rc, sync::Arc, time::Instant};
use tokio::{io::AsyncWriteExt, net::TcpStream, time::sleep};

/// Scratch region handed to every [`Context`] built on this connection (C3).
/// Sized to cover the common case of a handful of small per-request
/// allocations (path-derived strings, small formatted buffers) without
/// spilling to the heap fallback; see `pool::arena` for what happens past
/// this.
const ARENA_CAPACITY: usize = 16 * 1024;

pub(crate) struct HttpConnection<H: Handler<S>, S: ConnectionData> {
    handler: Arc<H>,
    connection_data: S,
    router: Option<Rc<Router<RouteHandler>>>,
    pipeline: Rc<Pipeline>,

    connection: Connection,
    pub(crate) parser: Parser,
    pub(crate) request: Request,
    pub(crate) response: Response,

    pub(crate) header_limits: HeaderLimits,
    connection_limits: ConnectionLimits,
    response_limits: ResponseLimits,
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) fn new(
        handler: Arc<H>,
        router: Option<Rc<Router<RouteHandler>>>,
        pipeline: Rc<Pipeline>,
        config: &Config,
    ) -> Self {
        let header_limits = config.header.clone().precalculate();

        Self {
            handler,
            connection_data: S::new(),
            router,
            pipeline,

            connection: Connection::new(),
            parser: Parser::new(&header_limits),
            request: Request::new(&header_limits),
            response: Response::new(&config.response),

            header_limits,
            connection_limits: config.connection.clone(),
            response_limits: config.response.clone(),
        }
    }

    #[inline]
    fn reset_request_response(&mut self) {
        self.parser.reset();
        self.request.reset();
        self.response.reset(&self.response_limits);
        self.connection.arena.reset();
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    /// Drives this connection's fiber to completion: repeated
    /// parse/dispatch/write cycles until keep-alive ends, the request
    /// budget is spent, or an I/O error aborts the connection outright.
    #[inline]
    #[tracing::instrument(level = "trace", skip_all)]
    pub(crate) async fn run(&mut self, stream: &mut TcpStream) -> Result<(), io::Error> {
        match self.impl_run(stream).await {
            Ok(()) => Ok(()),
            Err(ConnectionError::Io(e)) => Err(e),
            Err(ConnectionError::Timeout) => Ok(()),
            Err(ConnectionError::Parse(err)) => {
                let payload = err.as_http(self.request.version(), self.connection_limits.json_errors);
                match self.write_response(stream, payload).await {
                    Ok(()) | Err(ConnectionError::Timeout) => Ok(()),
                    Err(ConnectionError::Io(e)) => Err(e),
                    Err(ConnectionError::Parse(_)) => unreachable!("write_response never raises Parse"),
                }
            }
        }
    }

    #[inline]
    async fn impl_run(&mut self, stream: &mut TcpStream) -> Result<(), ConnectionError> {
        self.connection.reset();
        self.connection_data.reset();

        while !self.is_expired() {
            self.reset_request_response();

            let n = self
                .parser
                .fill_buffer(stream, self.connection_limits.read_timeout)
                .await?;
            if n == 0 {
                break;
            }
            self.response.version = self.parse()?;

            self.dispatch().await;

            self.write_response(stream, self.response.buffer()).await?;
            self.connection.last_activity = Instant::now();

            if !self.response.keep_alive {
                break;
            }
            self.connection.request_count += 1;
        }

        Ok(())
    }

    /// Routes the parsed request through the radix tree if one is mounted,
    /// falling back to the connection's [`Handler`] when no router is
    /// configured or nothing matches. Either way the request runs through
    /// the same [`Pipeline`], so middleware and the exception registry see
    /// both code paths uniformly.
    async fn dispatch(&mut self) {
        let router = self.router.clone();
        let pipeline = self.pipeline.clone();

        let method = self.request.method();
        let path = std::str::from_utf8(self.request.url().path()).ok();
        let matched = router.as_deref().zip(path).and_then(|(r, p)| r.find(method, p));

        match matched {
            Some((route, params)) => {
                // SAFETY: request/response/arena/connection_data are all
                // owned by `self`, which outlives this call; `ctx` is
                // dropped before either is mutably borrowed again.
                let mut ctx = unsafe {
                    Context::new(
                        &self.request,
                        &mut self.response,
                        &mut self.connection.arena,
                        &mut self.connection_data,
                        params,
                    )
                };
                pipeline.execute(&mut ctx, route).await;
            }
            None => {
                let handler = self.handler.clone();
                // SAFETY: see above.
                let mut ctx = unsafe {
                    Context::new(
                        &self.request,
                        &mut self.response,
                        &mut self.connection.arena,
                        &mut self.connection_data,
                        PathParams::new(),
                    )
                };
                fn assert_hrtb<F>(f: F) -> F
                where
                    F: for<'r> Fn(&'r mut Context) -> BoxFuture<'r, Result<Handled, BoxError>>,
                {
                    f
                }
                let terminal = assert_hrtb(move |ctx: &mut Context| -> BoxFuture<'_, Result<Handled, BoxError>> {
                    let handler = handler.clone();
                    Box::pin(async move { Ok(handler.handle(ctx).await) })
                });
                pipeline.execute(&mut ctx, terminal).await;
            }
        }
    }

    #[inline]
    async fn write_response(&self, stream: &mut TcpStream, response: &[u8]) -> Result<(), ConnectionError> {
        tokio::select! {
            biased;

            result = stream.write_all(response) => Ok(result?),
            _ = sleep(self.connection_limits.write_timeout) => Err(ConnectionError::Timeout),
        }
    }

    /// A connection expires when the last response asked to close, the
    /// per-connection request budget is spent (`0` means unlimited), or the
    /// connection has sat idle past `keepalive_timeout` since its last
    /// completed request.
    #[inline]
    fn is_expired(&self) -> bool {
        let limits = &self.connection_limits;
        let budget_spent = limits.max_requests_per_connection != 0
            && self.connection.request_count >= limits.max_requests_per_connection;

        !self.response.keep_alive || budget_spent || self.connection.last_activity.elapsed() > limits.keepalive_timeout
    }
}

#[derive(Debug)]
pub(crate) struct Connection {
    created: Instant,
    last_activity: Instant,
    request_count: usize,
    arena: Arena,
}

impl Connection {
    #[inline]
    fn new() -> Self {
        let now = Instant::now();
        Self {
            created: now,
            last_activity: now,
            request_count: 0,
            arena: Arena::new(ARENA_CAPACITY),
        }
    }

    #[inline]
    fn reset(&mut self) {
        let now = Instant::now();
        self.created = now;
        self.last_activity = now;
        self.request_count = 0;
        self.arena.reset();
    }
}

//

/// Managing user session data stored between requests within a single HTTP connection.
///
/// This trait allows you to store arbitrary state (e.g., authentication data,
/// multistep form status, cache, etc.). The state is available across all requests
/// within a single HTTP keep-alive connection, via [`Context::connection_data`].
///
/// # Examples
/// ```no_run
/// use aurora::ConnectionData;
/// use std::collections::HashMap;
///
/// struct MyConnectionData {
///     user_id: Option<i32>,
///     request_count: usize,
///     cache: HashMap<usize, [u8; 4]>,
/// }
///
/// impl ConnectionData for MyConnectionData {
///     fn new() -> Self {
///         Self {
///             user_id: None,
///             request_count: 0,
///             cache: HashMap::new(),
///         }
///     }
///
///     fn reset(&mut self) {
///         self.user_id = None;
///         self.request_count = 0;
///         self.cache.clear(); // Saving the allocated memory
///     }
/// }
/// ```
pub trait ConnectionData: Sync + Send + 'static {
    /// Creates a new instance of user data.
    ///
    /// It is called once at server startup, which avoids runtime allocations.
    fn new() -> Self;

    /// Resets the internal state of the instance to its initial values.
    ///
    /// It is called after the connection is closed. Allows repeated
    /// use of the instance for the following connections. If implemented
    /// correctly, avoids any allocations.
    fn reset(&mut self);
}

impl ConnectionData for () {
    #[inline(always)]
    fn new() -> Self {}

    #[inline(always)]
    fn reset(&mut self) {}
}

/// A trait for filtering TCP connections before HTTP processing.
///
/// # Examples
///
/// Simple IP Blacklist:
/// ```
/// use std::{collections::HashSet, net::{SocketAddr, IpAddr}};
/// use aurora::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// struct MyConnFilter {
///     blacklist: HashSet<IpAddr>
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         if self.blacklist.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
/// }
/// ```
/// Two-stage filtering with cache:
/// ```
/// use std::{collections::HashSet, sync::RwLock, net::{SocketAddr, IpAddr}};
/// use aurora::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     async fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// #
/// struct MyConnFilter {
///     cache: RwLock<HashSet<IpAddr>>,
///     db: DatabaseClient,
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         let Ok(guard) = self.cache.read() else {
///             return Err(err_resp.status(StatusCode::InternalServerError)
///                 .body("Internal server error"));
///         };
///
///         if guard.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
///
///     async fn filter_async(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request).await == Some(vec!["false"]) {
///             Ok(()) // IP not found in blacklist
///         } else {
///             let Ok(mut guard) = self.cache.write() else {
///                 return Err(err_resp.status(StatusCode::InternalServerError)
///                     .body("Internal server error"));
///             };
///             guard.insert(client_addr.ip());
///
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
/// # Connection Filter Architecture
/// ```text
///                     [ QUEUE TCP_STREAM ]
///                              ||
/// /----------------------------||----------------------------------\
/// |                            || TCP_STREAM            Tokio Task |
/// |       /=====================/                                  |
/// |       \/                                                       |
/// |   [--------]   Err(Handled)   [----------------------]         |
/// |   [ filter ] ===============> [ Send `error_response`]         |
/// |   [--------]                  [----------------------]         |
/// |       ||                                 /\                    |
/// |       || Ok(())                          ||                    |
/// |       \/                Err(Handled)     ||                    |
/// |   [--------------] ========================/                   |
/// |   [ filter_async ]                             [-----------]   |
/// |   [--------------] ==========================> [  Handler  ]   |
/// |                             Ok(())             [-----------]   |
/// |                                                                |
/// \----------------------------------------------------------------/
/// ```
pub trait ConnectionFilter: Sync + Send + 'static {
    /// Synchronous connection validation.
    ///
    /// Perform fast, in-memory checks here. Expensive operations should be deferred
    /// to [`filter_async`](Self::filter_async).
    ///
    /// Use for:
    /// - IP blacklist/whitelist (in-memory cache)
    /// - Geographic IP restrictions
    /// - Rate limiting counters
    fn filter(
        &self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        error_response: &mut Response,
    ) -> Result<(), Handled>;

    /// Asynchronous connection inspection.
    ///
    /// Called after [`filter`](Self::filter) succeeds. Executes asynchronously within
    /// the Tokio runtime.
    ///
    /// Use for:
    /// - Database lookups
    /// - External API calls
    /// - File system operations
    /// - Complex business logic
    /// - Machine learning inference
    fn filter_async(
        &self,
        #[allow(unused_variables)] client_addr: SocketAddr,
        #[allow(unused_variables)] server_addr: SocketAddr,
        #[allow(unused_variables)] error_response: &mut Response,
    ) -> impl Future<Output = Result<(), Handled>> + Send {
        async { Ok(()) }
    }
}

impl ConnectionFilter for () {
    fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
        Ok(())
    }
}

//
