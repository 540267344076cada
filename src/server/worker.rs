//! One OS thread per [`Worker`], each running its own current-thread Tokio
//! runtime over a [`LocalSet`]. Workers never share a connection, a
//! [`Router`], or a [`Pipeline`] instance with one another — everything a
//! connection touches is either owned by its `HttpConnection` slot or
//! reached through an `Rc` rooted on this worker's thread — so nothing here
//! needs to be `Send`.
//!
//! Replicated listening is done with `SO_REUSEPORT` (via `socket2`) rather
//! than a shared `accept()` loop with work-stealing: the kernel already
//! load-balances inbound connections across the duplicate sockets, which
//! keeps every worker's accept path lock-free.

use crate::{
    config::{Config, OverloadBehavior},
    http::types::StatusCode,
    pool::ObjectPool,
    server::{
        connection::{ConnectionData, ConnectionFilter, HttpConnection},
        server_impl::{Handler, PipelineFactory, RouterFactory},
    },
};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    cell::Cell, cell::RefCell, net::SocketAddr, rc::Rc, sync::Arc, thread::JoinHandle,
    time::Duration,
};
use tokio::{net::TcpListener, runtime::Builder, sync::Notify, task::LocalSet, time::sleep};
use tracing::{trace, warn};

/// A running worker thread. Dropping or [`join`](Self::join)-ing it waits
/// for the underlying OS thread to exit.
pub(crate) struct Worker {
    thread: Option<JoinHandle<()>>,
}

/// Tracks the `Normal`/`Overloaded` admission state this worker's share of
/// `in_flight` connections sits in, per [`OverloadLimits`](crate::config::OverloadLimits)'s
/// hysteresis band. Crossing `high_water` enters `Overloaded`; crossing back
/// below `low_water` returns to `Normal`. The band between the two
/// thresholds is read-only dead zone: neither crossing fires again until the
/// opposite threshold is crossed, which is what keeps the state from
/// flapping under load that oscillates near one boundary.
struct Hysteresis {
    overloaded: Cell<bool>,
    transitions: Cell<u64>,
}

impl Hysteresis {
    fn new() -> Self {
        Self {
            overloaded: Cell::new(false),
            transitions: Cell::new(0),
        }
    }

    /// Re-evaluates state against the current `active` connection count.
    /// Called on every accept and every connection release so both growth
    /// and drain can cross a threshold.
    fn observe(&self, active: usize, high: usize, low: usize) {
        if !self.overloaded.get() && active >= high {
            self.overloaded.set(true);
            self.transitions.set(self.transitions.get() + 1);
            warn!(active, high, transitions = self.transitions.get(), "worker entering overloaded state");
        } else if self.overloaded.get() && active <= low {
            self.overloaded.set(false);
            self.transitions.set(self.transitions.get() + 1);
            trace!(active, low, transitions = self.transitions.get(), "worker returning to normal state");
        }
    }

    fn is_overloaded(&self) -> bool {
        self.overloaded.get()
    }
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn spawn<H, S, F>(
        listener: Option<TcpListener>,
        addr: SocketAddr,
        handler: Arc<H>,
        filter: Arc<F>,
        router_factory: Option<Arc<RouterFactory>>,
        pipeline_factory: Arc<PipelineFactory>,
        config: Config,
        shutdown: Arc<Notify>,
    ) -> Self
    where
        H: Handler<S>,
        S: ConnectionData,
        F: ConnectionFilter,
    {
        let thread = std::thread::Builder::new()
            .name("aurora-worker".into())
            .spawn(move || {
                let runtime = Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to start worker's current-thread runtime");

                // `Router`/`Pipeline` are built here, on the worker thread,
                // from the `Send + Sync` factories handed across the spawn
                // boundary above — the built values themselves hold
                // non-`Send` handler futures and could never have made the
                // trip.
                let local = LocalSet::new();
                local.block_on(&runtime, async move {
                    let listener = match listener {
                        Some(listener) => listener,
                        None => bind_reuseport(addr, config.overload.listen_backlog)
                            .expect("failed to bind SO_REUSEPORT worker socket"),
                    };

                    let router = router_factory.map(|f| Rc::new(f()));
                    let pipeline = Rc::new(pipeline_factory());

                    trace!(%addr, "worker listening");
                    run_accept_loop(listener, handler, filter, router, pipeline, config, shutdown).await;
                });
            })
            .expect("failed to spawn worker OS thread");

        Self { thread: Some(thread) }
    }

    /// Waits for this worker's thread to exit, without blocking the async
    /// runtime of whoever calls it.
    pub(crate) async fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }
    }
}

/// Binds a fresh socket with `SO_REUSEPORT` set before `bind()`, so every
/// worker can listen on the same `(ip, port)` and let the kernel distribute
/// accepted connections between them.
fn bind_reuseport(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;
    TcpListener::from_std(socket.into())
}

#[allow(clippy::too_many_arguments)]
async fn run_accept_loop<H, S, F>(
    listener: TcpListener,
    handler: Arc<H>,
    filter: Arc<F>,
    router: Option<Rc<crate::router::Router<crate::middleware::RouteHandler>>>,
    pipeline: Rc<crate::middleware::Pipeline>,
    config: Config,
    shutdown: Arc<Notify>,
) where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    let config = Rc::new(config);
    let in_flight = Rc::new(Cell::new(0usize));
    let hysteresis = Rc::new(Hysteresis::new());
    // Signaled every time a connection's slot is released, so a stream held
    // under `OverloadBehavior::Queue` wakes up and retries admission instead
    // of polling.
    let capacity_freed = Rc::new(Notify::new());

    // One `ObjectPool` slot per connection this worker is willing to hold
    // open at once; the pool ceiling doubles as the per-worker share of
    // `OverloadLimits::max_connections`. Shared via `Rc<RefCell<_>>` since
    // a connection's fiber (spawned onto this same `LocalSet`) must be
    // able to hand its slot back to the pool when it finishes, while the
    // accept loop keeps acquiring from it concurrently.
    let per_worker_cap = config.overload.max_connections.max(1);
    let pool_config = config.clone();
    let pool_handler = handler.clone();
    let pool_router = router.clone();
    let pool_pipeline = pipeline.clone();
    let pool = Rc::new(RefCell::new(ObjectPool::new(per_worker_cap, move || {
        HttpConnection::new(
            pool_handler.clone(),
            pool_router.clone(),
            pool_pipeline.clone(),
            &pool_config,
        )
    })));

    loop {
        tokio::select! {
            biased;

            _ = shutdown.notified() => break,
            accepted = listener.accept() => {
                let Ok((mut stream, client_addr)) = accepted else { continue };
                let Ok(server_addr) = stream.local_addr() else { continue };

                // The hysteresis band only governs *when this worker is
                // considered Overloaded* for logging/metrics; admission is
                // refused only once `active` reaches the hard cap, which by
                // construction (`high_water_ratio < 1.0`) always implies
                // `hysteresis.is_overloaded()` is already true. Under
                // `OverloadBehavior::Queue` this loop re-checks both
                // thresholds after every wake from `capacity_freed` rather
                // than giving up on the first failed check.
                let admitted = 'admit: loop {
                    let active = in_flight.get();
                    hysteresis.observe(active, config.overload.high_water(), config.overload.low_water());

                    if active >= config.overload.max_connections {
                        if config.overload.overload_behavior == OverloadBehavior::Queue
                            && wait_for_capacity(&capacity_freed, config.overload.queue_timeout).await
                        {
                            continue 'admit;
                        }
                        warn!(%client_addr, active, "rejecting connection: over max_connections");
                        break 'admit None;
                    }

                    // Bound to a local first rather than matched on directly:
                    // the borrow from `pool.borrow_mut()` would otherwise
                    // live across the `.await` below in the `None` arm,
                    // and panic the next time the release task on this
                    // worker tries to borrow the pool while we're waiting.
                    let acquired = pool.borrow_mut().acquire();
                    match acquired {
                        Some(conn) => break 'admit Some(conn),
                        None => {
                            if config.overload.overload_behavior == OverloadBehavior::Queue
                                && wait_for_capacity(&capacity_freed, config.overload.queue_timeout).await
                            {
                                continue 'admit;
                            }
                            warn!(%client_addr, "rejecting connection: connection pool exhausted");
                            break 'admit None;
                        }
                    }
                };

                let Some(mut conn) = admitted else {
                    reject_overloaded(&mut stream, &config).await;
                    continue;
                };

                let mut scratch_response = crate::http::response::Response::new(&config.response);
                let filtered = filter.filter(client_addr, server_addr, &mut scratch_response).is_ok()
                    && filter.filter_async(client_addr, server_addr, &mut scratch_response).await.is_ok();

                if !filtered {
                    use tokio::io::AsyncWriteExt;
                    let _ = stream.write_all(scratch_response.buffer()).await;
                    pool.borrow_mut().release(conn);
                    capacity_freed.notify_waiters();
                    continue;
                }

                in_flight.set(in_flight.get() + 1);
                let in_flight = in_flight.clone();
                let pool = pool.clone();
                let hysteresis = hysteresis.clone();
                let capacity_freed = capacity_freed.clone();
                let loop_config = config.clone();
                tokio::task::spawn_local(async move {
                    let _ = conn.run(&mut stream).await;
                    let remaining = in_flight.get().saturating_sub(1);
                    in_flight.set(remaining);
                    hysteresis.observe(remaining, loop_config.overload.high_water(), loop_config.overload.low_water());
                    pool.borrow_mut().release(conn);
                    capacity_freed.notify_waiters();
                });
            }
        }
    }
}

/// Waits for a `capacity_freed` signal (a connection finishing, or being
/// turned away already unfiltered, elsewhere on this worker) or `timeout`,
/// whichever comes first. Returns `true` when woken by the signal — the
/// caller should re-check admission, not assume a slot is reserved for it —
/// `false` once `timeout` elapses with no signal.
async fn wait_for_capacity(capacity_freed: &Notify, timeout: Duration) -> bool {
    tokio::select! {
        _ = capacity_freed.notified() => true,
        _ = sleep(timeout) => false,
    }
}

/// Called once admission has already given up on a connection — either the
/// behavior is `Reject503`/`Close`, or it was `Queue` and `queue_timeout`
/// ran out while waiting. `Queue` has nothing left to distinguish itself by
/// at this point, so it shares `Close`'s silent drop.
async fn reject_overloaded(stream: &mut tokio::net::TcpStream, config: &Config) {
    match config.overload.overload_behavior {
        OverloadBehavior::Close | OverloadBehavior::Queue => {}
        OverloadBehavior::Reject503 => {
            use tokio::io::AsyncWriteExt;

            let mut resp = crate::http::response::Response::new(&config.response);
            let handled = resp
                .status(StatusCode::ServiceUnavailable)
                .header("retry-after", config.overload.retry_after_seconds)
                .body("Service Unavailable");
            let _ = handled;
            let _ = stream.write_all(resp.buffer()).await;
        }
    }
}

#[cfg(test)]
mod overload_tests {
    use super::*;

    #[tokio::test]
    async fn wait_for_capacity_wakes_on_notify() {
        let notify = Arc::new(Notify::new());

        let notifier = notify.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(5)).await;
            notifier.notify_waiters();
        });

        let woke = wait_for_capacity(&notify, Duration::from_secs(5)).await;
        assert!(woke);
    }

    #[tokio::test]
    async fn wait_for_capacity_times_out_without_notify() {
        let notify = Notify::new();
        let woke = wait_for_capacity(&notify, Duration::from_millis(10)).await;
        assert!(!woke);
    }
}
