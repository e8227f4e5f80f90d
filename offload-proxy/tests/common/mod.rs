//! Stub remote server shared by the integration tests.

use std::convert::Infallible;
use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

/// Starts a stub on an ephemeral loopback port and returns its address.
///
/// * `/double/{n}` answers `n * n` formatted as a float, e.g. `100.0`.
/// * `/hello` answers `Hello, world!`.
/// * `/getserverlists` answers `{"data": ["127.0.0.1", "127.0.0.1"]}`.
/// * `/execcontract` echoes the request target, query included.
pub async fn spawn_stub() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(answer))
                    .await;
            });
        }
    });

    addr
}

async fn answer(req: Request<hyper::body::Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path();

    let (status, body) = if let Some(n) = path.strip_prefix("/double/") {
        match n.parse::<f64>() {
            Ok(n) => (StatusCode::OK, format!("{:?}", n * n)),
            Err(_) => (StatusCode::BAD_REQUEST, "not a number".to_string()),
        }
    } else if path == "/execcontract" {
        (StatusCode::OK, req.uri().to_string())
    } else if path == "/hello" {
        (StatusCode::OK, "Hello, world!".to_string())
    } else if path == "/getserverlists" {
        (
            StatusCode::OK,
            r#"{"data": ["127.0.0.1", "127.0.0.1"]}"#.to_string(),
        )
    } else {
        (StatusCode::NOT_FOUND, "not found".to_string())
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    Ok(response)
}
