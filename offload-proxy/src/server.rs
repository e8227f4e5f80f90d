//! HTTP front-end accepting offload requests.
//!
//! | route                                   | answer                                 |
//! |-----------------------------------------|----------------------------------------|
//! | `GET /servers`, `GET /listservers`      | `{"data": [addresses]}`                |
//! | `GET /throughput`                       | `{"throughput": n}`                    |
//! | `GET /offload/{task}?port=P&server=A`   | the remote body, passed through        |
//!
//! Query pairs other than `port` and `server` are forwarded to the task.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::engine::DecisionEngine;
use crate::error::Result;

/// Port used for a task when the request does not name one.
pub const DEFAULT_TASK_PORT: u16 = 80;

const OFFLOAD_PREFIX: &str = "/offload/";

/// Binds `addr` and serves requests against `engine` until the listener fails.
pub async fn start_server(addr: SocketAddr, engine: Arc<DecisionEngine>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    serve(listener, engine).await
}

/// Serves requests from an already bound listener.
pub async fn serve(listener: TcpListener, engine: Arc<DecisionEngine>) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let engine = engine.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| handle_request(req, engine.clone()));
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                debug!(%peer, error = %err, "error serving connection");
            }
        });
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    engine: Arc<DecisionEngine>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    info!(method = %req.method(), uri = %req.uri(), "received request");

    if req.method() != Method::GET {
        return Ok(json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            json!({ "error": "405 Method Not Allowed" }),
        ));
    }

    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();
    let response = match path.as_str() {
        "/servers" | "/listservers" => {
            let mut addresses: Vec<String> = engine.pool_addresses().into_iter().collect();
            addresses.sort();
            json_response(StatusCode::OK, json!({ "data": addresses }))
        }
        "/throughput" => json_response(
            StatusCode::OK,
            json!({ "throughput": engine.throughput() }),
        ),
        _ if path.starts_with(OFFLOAD_PREFIX) && path.len() > OFFLOAD_PREFIX.len() => {
            let task = &path[OFFLOAD_PREFIX.len()..];
            offload(&engine, task, &query).await
        }
        _ => json_response(StatusCode::NOT_FOUND, json!({ "error": "404 Not Found" })),
    };

    Ok(response)
}

async fn offload(engine: &DecisionEngine, task: &str, query: &str) -> Response<Full<Bytes>> {
    let query = OffloadQuery::parse(query);

    let port = match query.port.as_deref() {
        Some(raw) => match raw.parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                return json_response(
                    StatusCode::BAD_REQUEST,
                    json!({ "error": format!("invalid port: {raw}") }),
                )
            }
        },
        None => DEFAULT_TASK_PORT,
    };
    let server = query.server.as_deref().filter(|s| !s.is_empty());
    let task = match &query.forwarded {
        Some(forwarded) => format!("{task}?{forwarded}"),
        None => task.to_string(),
    };

    let Some(submission) = engine.submit_task(&task, port, server).await else {
        return json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "error": "no server available" }),
        );
    };

    match submission.pending.await {
        Ok(answer) => Response::builder()
            .status(answer.status)
            .body(Full::new(Bytes::from(answer.body)))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new()))),
        Err(err) => {
            warn!(address = %submission.address, error = %err, "offload failed");
            json_response(
                StatusCode::BAD_GATEWAY,
                json!({ "error": err.to_string(), "server": submission.address }),
            )
        }
    }
}

/// Decoded query of an offload request.
#[derive(Debug, Default, PartialEq)]
struct OffloadQuery {
    port: Option<String>,
    server: Option<String>,
    /// Remaining pairs, re-encoded for the remote call.
    forwarded: Option<String>,
}

impl OffloadQuery {
    fn parse(query: &str) -> Self {
        let mut parsed = OffloadQuery::default();
        let mut forwarded = form_urlencoded::Serializer::new(String::new());
        let mut has_forwarded = false;

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match &*key {
                "port" if parsed.port.is_none() => parsed.port = Some(value.into_owned()),
                "server" if parsed.server.is_none() => parsed.server = Some(value.into_owned()),
                "port" | "server" => {}
                _ => {
                    forwarded.append_pair(&key, &value);
                    has_forwarded = true;
                }
            }
        }

        if has_forwarded {
            parsed.forwarded = Some(forwarded.finish());
        }
        parsed
    }
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_reserved_pairs() {
        let query = OffloadQuery::parse("port=5000&server=10.0.0.2");
        assert_eq!(query.port.as_deref(), Some("5000"));
        assert_eq!(query.server.as_deref(), Some("10.0.0.2"));
        assert_eq!(query.forwarded, None);

        assert_eq!(OffloadQuery::parse(""), OffloadQuery::default());
    }

    #[test]
    fn test_query_is_percent_decoded() {
        let query = OffloadQuery::parse("server=127%2E0%2E0%2E1&port=%35000");
        assert_eq!(query.server.as_deref(), Some("127.0.0.1"));
        assert_eq!(query.port.as_deref(), Some("5000"));
    }

    #[test]
    fn test_query_forwards_task_arguments() {
        let query =
            OffloadQuery::parse("contractID=-620602333&operation=main&port=18000&arg=hello%20world");
        assert_eq!(query.port.as_deref(), Some("18000"));
        assert_eq!(
            query.forwarded.as_deref(),
            Some("contractID=-620602333&operation=main&arg=hello+world")
        );
    }

    #[test]
    fn test_first_port_wins() {
        let query = OffloadQuery::parse("port=1&port=2");
        assert_eq!(query.port.as_deref(), Some("1"));
        assert_eq!(query.forwarded, None);
    }

    #[test]
    fn test_json_response() {
        let response = json_response(StatusCode::NOT_FOUND, json!({ "error": "404 Not Found" }));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    }
}
