//! aurora - Security-first, high-performance HTTP/1.1 server runtime for microservices
//!
//! A fiber-per-connection server built around a fixed pool of single-threaded
//! workers, each running its own event loop and accepting its own share of
//! inbound connections via `SO_REUSEPORT`. Designed for microservices that
//! need fine-grained control over memory, timeouts, and overload behavior.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: full support, including persistent connections.
//! - **HTTP/1.0**: basic support for legacy clients.
//!
//! # Features
//!
//! ## 🔒 Security & Protection
//! - **Built-in DoS/DDoS protection** - strict request-smuggling and
//!   oversized-input defenses, enabled by default.
//! - **Fully configurable limits and timeouts** - see [`config`].
//! - **Custom connection filtering** - implement [`ConnectionFilter`] to
//!   reject unwanted connections before the first byte is read.
//!
//! ## 🚀 Performance & Memory
//! - **Pooled allocation** - a buffer pool, an object pool for connection
//!   slots, and a per-request bump arena keep the hot path allocation-light.
//! - **One event loop per worker thread** - no cross-thread synchronization
//!   once a connection lands on a worker.
//!
//! ## 🌐 Routing & Middleware
//! - **Radix-tree [`Router`]** for path matching with typed parameters.
//! - **Composable middleware pipeline** with typed exception dispatch - see
//!   [`middleware`].
//! - **Storing data between requests** - the [`ConnectionData`] trait carries
//!   state across requests on the same keep-alive connection.
//!
//! ## 🏭 Production Ready
//! - **Graceful performance degradation** - hysteresis-based overload
//!   shedding (`503`, connection close, or queuing) - see
//!   [`config::OverloadLimits`].
//! - **Custom error format** - structured JSON or a plain HTTP response,
//!   controlled by [`config::ConnectionLimits::json_errors`].
//!
//! # Quick Start
//!
//! ## 1. Installation
//!
//! Add `aurora` and [`tokio`](https://crates.io/crates/tokio) to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! aurora = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ## 2. Usage example
//! ```no_run
//! use aurora::{Server, Handler, Context, Handled, StatusCode};
//! use tokio::net::TcpListener;
//!
//! struct MyHandler;
//!
//! impl Handler for MyHandler {
//!     async fn handle(&self, ctx: &mut Context) -> Handled {
//!         ctx.send(StatusCode::Ok, "Hello World!").unwrap()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler(MyHandler)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//!
//! # Use Cases
//!
//! - **High-throughput microservices** - configurable for specific workloads.
//! - **Resource-constrained environments** - predictable, bounded memory use.
//! - **Internal APIs** - security-conscious defaults.
pub(crate) mod http {
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
    pub(crate) mod worker;
}
pub mod config;
pub(crate) mod context;
pub(crate) mod errors;
pub mod middleware;
pub(crate) mod pool;
pub mod router;

pub use crate::{
    context::Context,
    http::{
        query,
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Handled, Response,
        },
        types::{Method, StatusCode, Url, Version},
    },
    middleware::{handler, Middleware, Next, Pipeline, RouteHandler},
    router::{PathParams, Router},
    server::{
        connection::{ConnectionData, ConnectionFilter},
        server_impl::{Handler, Server, ServerBuilder},
    },
};

#[doc(hidden)]
pub fn run_test<F: FnOnce(&Request, &mut Response) -> Handled>(f: F) {
    let limits = crate::config::HeaderLimits::default().precalculate();
    f(
        &Request::new(&limits),
        &mut Response::new(&crate::config::ResponseLimits::default()),
    );
}

#[doc(hidden)]
#[macro_export]
macro_rules! impt_default_handler {
    ($name:ident) => {
        use aurora::{Context, Handled, Handler, StatusCode};
        struct $name;

        // `<()>` to check functionality
        impl Handler<()> for $name {
            async fn handle(&self, ctx: &mut Context) -> Handled {
                ctx.send(StatusCode::Ok, "Hello world!").unwrap()
            }
        }
    };
}
