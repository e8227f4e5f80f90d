//! Dispatching tasks to servers.
//!
//! A dispatch is one `GET http://{address}:{port}/{task}` issued on a bounded pool of
//! Tokio workers. Submitting never waits for the remote call: the caller gets a
//! [`PendingDispatch`] back immediately and awaits it whenever it wants the answer.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::header::HOST;
use hyper::{Request, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use offload_core::SharedServer;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::connection_pool::pool::{ConnectionPool, Sender};
use crate::error::{OffloadError, Result};

/// Default number of dispatches in flight at once.
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Default time allowed for one remote call.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// One task bound to one server and port.
///
/// The port belongs to the dispatch, not the server: the same server may expose different
/// services on different ports.
#[derive(Debug, Clone)]
pub struct TaskDispatch {
    /// Where the task runs.
    pub server: SharedServer,
    /// Path fragment naming the remote endpoint.
    pub task: String,
    /// Port the endpoint listens on.
    pub port: u16,
}

impl TaskDispatch {
    /// Bind `task` to `server` on `port`.
    pub fn new(server: SharedServer, task: impl Into<String>, port: u16) -> Self {
        Self {
            server,
            task: task.into(),
            port,
        }
    }

    /// The URL this dispatch calls.
    pub fn url(&self) -> String {
        format!("http://{}/{}", authority(&self.server.address, self.port), self.task)
    }
}

/// The answer to a completed dispatch.
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    /// Address the task ran on.
    pub address: String,
    /// Port the task ran on.
    pub port: u16,
    /// The task that ran.
    pub task: String,
    /// HTTP status of the remote answer.
    pub status: StatusCode,
    /// Remote body, decoded lossily as UTF-8.
    pub body: String,
    /// Time from the start of the remote call to the end of the body.
    pub elapsed: Duration,
}

impl DispatchResponse {
    /// Whether the remote answered with a 2xx status.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Handle to a dispatch running on a worker.
///
/// Await it for the result. Dropping it lets the dispatch run to completion unobserved;
/// [`PendingDispatch::cancel`] stops it early.
#[derive(Debug)]
pub struct PendingDispatch {
    handle: JoinHandle<Result<DispatchResponse>>,
}

impl PendingDispatch {
    /// Abort the dispatch. Awaiting the handle afterwards yields [`OffloadError::Cancelled`]
    /// unless the call had already finished.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Future for PendingDispatch {
    type Output = Result<DispatchResponse>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(err)) if err.is_cancelled() => Poll::Ready(Err(OffloadError::Cancelled)),
            Poll::Ready(Err(err)) => Poll::Ready(Err(OffloadError::WorkerPanicked(err.to_string()))),
        }
    }
}

/// Runs dispatches on a bounded set of workers over pooled HTTP/1.1 connections.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    connections: ConnectionPool,
    workers: Arc<Semaphore>,
    timeout: Duration,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS, DEFAULT_DISPATCH_TIMEOUT)
    }
}

impl Dispatcher {
    /// Allow `max_workers` dispatches in flight, each limited to `timeout`.
    pub fn new(max_workers: usize, timeout: Duration) -> Self {
        Self {
            connections: ConnectionPool::new(),
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
            timeout,
        }
    }

    /// Idle connections currently pooled.
    pub fn connections(&self) -> &ConnectionPool {
        &self.connections
    }

    /// Start `dispatch` on a worker.
    pub fn execute(&self, dispatch: TaskDispatch) -> PendingDispatch {
        self.execute_with(dispatch, || {})
    }

    /// Start `dispatch` on a worker, running `on_start` on that worker right before the
    /// remote call is issued.
    pub fn execute_with<F>(&self, dispatch: TaskDispatch, on_start: F) -> PendingDispatch
    where
        F: FnOnce() + Send + 'static,
    {
        let connections = self.connections.clone();
        let workers = self.workers.clone();
        let timeout = self.timeout;
        let span = info_span!(
            "dispatch",
            address = %dispatch.server.address,
            port = dispatch.port,
            task = %dispatch.task,
        );

        let handle = tokio::spawn(
            async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return Err(OffloadError::Cancelled);
                };
                on_start();

                let started = Instant::now();
                let path = format!("/{}", dispatch.task);
                let call = get(&connections, &dispatch.server.address, dispatch.port, &path);

                match time::timeout(timeout, call).await {
                    Ok(Ok((status, body))) => {
                        let elapsed = started.elapsed();
                        info!(%status, ?elapsed, "dispatch complete");
                        Ok(DispatchResponse {
                            address: dispatch.server.address.clone(),
                            port: dispatch.port,
                            task: dispatch.task,
                            status,
                            body,
                            elapsed,
                        })
                    }
                    Ok(Err(err)) => {
                        warn!(error = %err, "dispatch failed");
                        Err(err)
                    }
                    Err(_) => {
                        warn!(?timeout, "dispatch timed out");
                        Err(OffloadError::Timeout(timeout))
                    }
                }
            }
            .instrument(span),
        );

        PendingDispatch { handle }
    }

    /// Plain `GET` of an `http://` URL over the pooled connections, bounded by the timeout.
    pub async fn fetch(&self, url: &str) -> Result<(StatusCode, String)> {
        let uri: Uri = url
            .parse()
            .map_err(|err: hyper::http::uri::InvalidUri| OffloadError::InvalidUri(err.to_string()))?;
        if uri.scheme_str() != Some("http") {
            return Err(OffloadError::InvalidUri(format!("only http:// is supported: {url}")));
        }
        let host = uri
            .host()
            .ok_or_else(|| OffloadError::InvalidUri(format!("missing host: {url}")))?;
        let port = uri.port_u16().unwrap_or(80);
        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

        time::timeout(self.timeout, get(&self.connections, host, port, path))
            .await
            .map_err(|_| OffloadError::Timeout(self.timeout))?
    }
}

/// Issue `GET path` to `host:port`, reusing an idle connection when one is pooled.
async fn get(
    connections: &ConnectionPool,
    host: &str,
    port: u16,
    path: &str,
) -> Result<(StatusCode, String)> {
    let authority = authority(host, port);

    let mut sender = match connections.try_pop(&authority) {
        Some(mut pooled) => {
            if pooled.ready().await.is_ok() {
                pooled
            } else {
                connect(host, port).await?
            }
        }
        None => connect(host, port).await?,
    };
    sender.ready().await?;

    let request = Request::get(path)
        .header(HOST, authority.as_str())
        .body(Empty::<Bytes>::new())?;
    let response = sender.send_request(request).await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();

    connections.push(&authority, sender);
    Ok((status, String::from_utf8_lossy(&body).into_owned()))
}

/// `host:port`, with IPv6 literals bracketed.
fn authority(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Open a fresh HTTP/1.1 connection and drive it in the background.
async fn connect(host: &str, port: u16) -> Result<Sender> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|err| OffloadError::Transport(format!("connect to {host}:{port}: {err}")))?;
    let io = TokioIo::new(stream);
    let (sender, connection) = hyper::client::conn::http1::handshake(io).await?;

    tokio::spawn(async move {
        if let Err(err) = connection.await {
            debug!(error = %err, "connection closed with error");
        }
    });

    Ok(sender)
}

#[cfg(test)]
mod tests {
    use super::*;
    use offload_core::ServerRecord;

    fn server(address: &str) -> SharedServer {
        Arc::new(ServerRecord::new("test", address))
    }

    #[test]
    fn test_url_format() {
        let dispatch = TaskDispatch::new(server("127.0.0.1"), "double/10", 5000);
        assert_eq!(dispatch.url(), "http://127.0.0.1:5000/double/10");

        let leading = TaskDispatch::new(server("127.0.0.1"), "/offloading/3", 5000);
        assert_eq!(leading.url(), "http://127.0.0.1:5000//offloading/3");

        let v6 = TaskDispatch::new(server("::1"), "double/10", 5000);
        assert_eq!(v6.url(), "http://[::1]:5000/double/10");
    }

    #[test]
    fn test_authority_brackets_ipv6() {
        assert_eq!(authority("10.0.0.2", 80), "10.0.0.2:80");
        assert_eq!(authority("edge.local", 8080), "edge.local:8080");
        assert_eq!(authority("::1", 5000), "[::1]:5000");
        assert_eq!(authority("fe80::2", 5000), "[fe80::2]:5000");
        // hosts taken from a parsed URI already carry brackets
        assert_eq!(authority("[::1]", 5000), "[::1]:5000");
    }

    #[tokio::test]
    async fn test_refused_connection_surfaces_on_await() {
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let dispatcher = Dispatcher::default();
        let pending = dispatcher.execute(TaskDispatch::new(server("127.0.0.1"), "hello", port));

        assert!(matches!(pending.await, Err(OffloadError::Transport(_))));
    }

    #[tokio::test]
    async fn test_on_start_runs_on_worker() {
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let (tx, rx) = tokio::sync::oneshot::channel();

        let dispatcher = Dispatcher::default();
        let pending = dispatcher.execute_with(
            TaskDispatch::new(server("127.0.0.1"), "hello", port),
            move || {
                let _ = tx.send(());
            },
        );

        let _ = pending.await;
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_pending_dispatch() {
        // a listener that accepts but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let dispatcher = Dispatcher::new(1, Duration::from_secs(30));
        let pending = dispatcher.execute(TaskDispatch::new(server("127.0.0.1"), "slow", port));
        pending.cancel();

        assert!(matches!(pending.await, Err(OffloadError::Cancelled)));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let dispatcher = Dispatcher::new(2, Duration::from_millis(200));
        let pending = dispatcher.execute(TaskDispatch::new(server("127.0.0.1"), "slow", port));

        assert!(matches!(pending.await, Err(OffloadError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_fetch_rejects_https() {
        let dispatcher = Dispatcher::default();
        let err = dispatcher.fetch("https://example.com/list").await.unwrap_err();
        assert!(matches!(err, OffloadError::InvalidUri(_)));
    }
}
