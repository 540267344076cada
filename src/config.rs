//! Server configuration surface.
//!
//! # Security-First Defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion attacks
//! - Memory overflows
//! - Slowloris attacks
//! - Header flooding
//!
//! # Examples
//!
//! ```no_run
//! use aurora::{Server, Handler, Context, Handled, StatusCode, config::{ConnectionLimits, HeaderLimits, OverloadLimits}};
//! use tokio::net::TcpListener;
//! use std::time::Duration;
//!
//! struct MyHandler;
//!
//! impl Handler for MyHandler {
//!     async fn handle(&self, ctx: &mut Context) -> Handled {
//!         ctx.send(StatusCode::Ok, "Hello World!").unwrap()
//!     }
//! }
//!
//! # async fn doc() {
//! Server::builder()
//!     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!     .connection_limits(ConnectionLimits {
//!         read_timeout: Duration::from_secs(5),
//!         max_requests_per_connection: 10_000,
//!         ..ConnectionLimits::default()
//!     })
//!     .header_limits(HeaderLimits {
//!         header_count: 32,
//!         max_body_size: 16 * 1024,
//!         ..HeaderLimits::default()
//!     })
//!     .overload_limits(OverloadLimits {
//!         max_connections: 5000,
//!         ..OverloadLimits::default()
//!     })
//!     .handler(MyHandler)
//!     .build();
//! # }
//! ```

use std::time::Duration;

/// Admission, worker-pool, and overload-shedding behavior.
///
/// # Backpressure state machine
/// ```text
///                            [------------]
///                            [ Tcp accept ]
///                            [------------]
///                                  ||
///                                  \/
/// [---------]  A < high  /-----------------\  A >= high  [------------]
/// [ Normal  ] <========= | active count A? | ==========> [ Overloaded ]
/// [---------]             \-----------------/             [------------]
///                                                                ||
///                                              A >= max, overload_behavior
///                                                                \/
///                                                        [----------------]
///                                                        [ reject / queue ]
///                                                        [----------------]
/// ```
///
/// `high_water` and `low_water` form a hysteresis band so the server does not
/// flap between `Normal` and `Overloaded` when load sits near one threshold.
#[derive(Debug, Clone)]
pub struct OverloadLimits {
    /// Hard admission cap: connections at or above this are always rejected
    /// (default: `1000`).
    pub max_connections: usize,
    /// Ratio of `max_connections` at which the server enters `Overloaded`
    /// (default: `0.8`).
    pub high_water_ratio: f64,
    /// Ratio of `max_connections` below which the server returns to `Normal`
    /// (default: `0.6`).
    pub low_water_ratio: f64,
    /// Per-worker concurrency cap on requests being processed at once
    /// (default: `256`). Exceeding it yields `503` for that request only,
    /// independent of the connection-level backpressure state.
    pub max_in_flight_requests: usize,
    /// What happens to a connection rejected while `Overloaded` or at the
    /// hard cap (default: [`OverloadBehavior::Reject503`]).
    pub overload_behavior: OverloadBehavior,
    /// Value written into `Retry-After` on a `503` overload rejection
    /// (default: `5`).
    pub retry_after_seconds: u32,
    /// How long a connection may sit waiting for room under
    /// [`OverloadBehavior::Queue`] before the accept loop gives up on it
    /// (default: `5 seconds`). Unused by `Reject503`/`Close`, which never
    /// wait.
    pub queue_timeout: Duration,
    /// TCP accept queue depth passed to `listen()` (default: `1024`).
    pub listen_backlog: u32,
    /// Number of worker OS threads; `0` = auto from CPU count (default: `0`).
    pub num_workers: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for OverloadLimits {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            high_water_ratio: 0.8,
            low_water_ratio: 0.6,
            max_in_flight_requests: 256,
            overload_behavior: OverloadBehavior::Reject503,
            retry_after_seconds: 5,
            queue_timeout: Duration::from_secs(5),
            listen_backlog: 1024,
            num_workers: 0,

            _priv: (),
        }
    }
}

impl OverloadLimits {
    #[inline]
    pub(crate) fn high_water(&self) -> usize {
        (self.max_connections as f64 * self.high_water_ratio) as usize
    }

    #[inline]
    pub(crate) fn low_water(&self) -> usize {
        (self.max_connections as f64 * self.low_water_ratio) as usize
    }
}

/// Behavior applied to a connection rejected by the backpressure controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverloadBehavior {
    /// Write a `503 Service Unavailable` + `Retry-After` response, then close.
    Reject503,
    /// Close the socket immediately with no response.
    Close,
    /// Hold the connection in the pending-accept queue until room frees up,
    /// or until [`OverloadLimits::queue_timeout`] elapses, whichever comes
    /// first — a timed-out wait closes the socket with no response, the
    /// same as `Close`.
    Queue,
}

/// Per-connection timeouts and keep-alive budgeting.
#[derive(Debug, Clone)]
pub struct ConnectionLimits {
    /// Maximum duration to wait for a single read to produce data
    /// (default: `2 seconds`). Prevents slowloris-style stalls.
    pub read_timeout: Duration,
    /// Maximum duration to wait for a single write to complete
    /// (default: `3 seconds`).
    pub write_timeout: Duration,
    /// Maximum idle duration between requests on a keep-alive connection
    /// (default: `30 seconds`).
    pub keepalive_timeout: Duration,
    /// Maximum number of requests served per connection before it is closed;
    /// `0` means unlimited (default: `100`).
    pub max_requests_per_connection: usize,
    /// Renders protocol-level errors (bad request line, oversized headers,
    /// ...) as structured JSON instead of a bare status line (default:
    /// `true`).
    pub json_errors: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(3),
            keepalive_timeout: Duration::from_secs(30),
            max_requests_per_connection: 100,
            json_errors: true,

            _priv: (),
        }
    }
}

/// HTTP request parsing limits and buffer pre-allocation strategy.
///
/// # Memory Allocation Strategy
///
/// Each connection's read buffer starts at the smallest pool class that can
/// hold `first_line + header_count * header_line`, and is allowed to grow
/// one pool class at a time up to `max_header_size` before the request is
/// rejected with `431`.
#[derive(Debug, Clone)]
pub struct HeaderLimits {
    /// Maximum URL length in bytes, including path and query string
    /// (default: `8192`).
    pub url_size: usize,
    /// Maximum number of path segments (default: `32`).
    pub url_parts: usize,
    /// Maximum query string length in bytes (default: `4096`).
    pub url_query_size: usize,
    /// Maximum number of query parameters (default: `64`).
    pub url_query_parts: usize,
    /// Maximum number of headers per request (default: `64`).
    pub header_count: usize,
    /// Maximum header name length in bytes (default: `128`).
    pub header_name_size: usize,
    /// Maximum header value length in bytes (default: `4096`).
    pub header_value_size: usize,
    /// Maximum header-section size in bytes before `431` is returned
    /// (default: `65536`, i.e. 64 KiB, per the parser contract).
    pub max_header_size: usize,
    /// Maximum request body size in bytes before `413` is returned
    /// (default: `2 * 1024 * 1024`).
    pub max_body_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub precalc: HeaderLimitsPrecalc,
}

impl Default for HeaderLimits {
    fn default() -> Self {
        Self {
            url_size: 8 * 1024,
            url_parts: 32,
            url_query_size: 4 * 1024,
            url_query_parts: 64,

            header_count: 64,
            header_name_size: 128,
            header_value_size: 4 * 1024,

            max_header_size: 64 * 1024,
            max_body_size: 2 * 1024 * 1024,

            precalc: HeaderLimitsPrecalc::default(),
        }
    }
}

impl HeaderLimits {
    /// Returns the initial read-buffer size this configuration implies.
    #[inline(always)]
    pub fn estimated_buffer_size(&self) -> usize {
        self.clone().precalculate().precalc.buffer
    }

    #[inline(always)]
    pub(crate) fn precalculate(mut self) -> Self {
        self.precalc.first_line = self.first_line();
        self.precalc.header_line = self.header_line();
        self.precalc.buffer = self.buffer();
        self
    }

    #[inline(always)]
    fn buffer(&self) -> usize {
        self.precalc.first_line + self.header_count * self.precalc.header_line + 2
    }

    // "METHOD /url HTTP/1.1\r\n" = method(7) + ' ' + url + ' ' + version(8) + crlf(2)
    #[inline(always)]
    fn first_line(&self) -> usize {
        19 + self.url_size
    }

    // "Name: Value\r\n" = name + ": " + value + "\r\n"
    #[inline(always)]
    fn header_line(&self) -> usize {
        self.header_name_size + self.header_value_size + 4
    }
}

#[doc(hidden)]
#[derive(Debug, Clone, Default)]
pub struct HeaderLimitsPrecalc {
    pub(crate) buffer: usize,
    pub(crate) first_line: usize,
    pub(crate) header_line: usize,
}

/// Response buffer allocation strategy.
#[derive(Debug, Clone)]
pub struct ResponseLimits {
    /// Initial buffer capacity allocated for responses (default: `1024`).
    pub default_capacity: usize,
    /// Largest a response buffer is allowed to grow before the in-progress
    /// body is discarded and replaced with a synthesized `500` (default:
    /// `256 * 1024`). See `Response::end_body`'s degrade path.
    pub max_capacity: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ResponseLimits {
    fn default() -> Self {
        Self {
            default_capacity: 1024,
            max_capacity: 256 * 1024,

            _priv: (),
        }
    }
}

/// Bind address for the listening socket.
#[derive(Debug, Clone)]
pub struct BindAddress {
    pub host: String,
    pub port: u16,
}

impl Default for BindAddress {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
        }
    }
}

/// Immutable configuration bundle threaded through the server after
/// `ServerBuilder::build()`. Assembled from the builder's per-domain limits
/// structs; never mutated after construction (see the concurrency model's
/// "configuration is immutable after `run()`" rule).
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub bind: BindAddress,
    pub overload: OverloadLimits,
    pub connection: ConnectionLimits,
    pub header: HeaderLimits,
    pub response: ResponseLimits,
}
