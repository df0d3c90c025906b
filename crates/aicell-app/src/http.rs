//! HTTP status and test-send endpoints
//!
//! `GET /health` reports the gateway state; `POST /test_sms/<number>` sends a
//! message through the modem.

use aicell_core::modem::Modem;
use anyhow::{Context, Result};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::net::TcpListener;
use std::sync::Arc;

use crate::config::ServerConfig;

const DEFAULT_TEST_MESSAGE: &str = "Test from AiCell";

/// Shared by every request
pub struct HttpState {
    /// Modem used for test sends
    pub modem: Modem,
    /// Hotline number shown by `/health`
    pub hotline: String,
}

#[derive(Debug, Default, Deserialize)]
struct TestSms {
    message: Option<String>,
}

/// Bind the first free port in the configured range, else the fallback port
pub fn bind_first_free(config: &ServerConfig) -> Result<TcpListener> {
    let start = config.port_range_start;
    let end = start.saturating_add(config.port_scan_len);
    for port in start..end {
        match TcpListener::bind((config.host.as_str(), port)) {
            Ok(listener) => return Ok(listener),
            Err(e) => tracing::debug!(port, "port busy: {}", e),
        }
    }
    tracing::warn!(start, end, fallback = config.fallback_port, "no free port in range");
    TcpListener::bind((config.host.as_str(), config.fallback_port))
        .with_context(|| format!("binding port {}", config.fallback_port))
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Response<Body> {
    let mut response = Response::new(Body::from(value.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Handle one request
pub async fn route(state: Arc<HttpState>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = match (&method, path.as_str()) {
        (&Method::GET, "/health") => health(&state),
        (&Method::POST, p) if p.starts_with("/test_sms/") => {
            let number = p["/test_sms/".len()..].to_string();
            test_sms(&state, &number, req).await
        }
        _ => json_response(StatusCode::NOT_FOUND, json!({ "error": "not found" })),
    };
    Ok(response)
}

fn health(state: &HttpState) -> Response<Body> {
    json_response(
        StatusCode::OK,
        json!({
            "status": "AiCell Running",
            "gsm": state.modem.is_connected(),
            "number": state.hotline,
            "time": chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }),
    )
}

async fn test_sms(state: &HttpState, number: &str, req: Request<Body>) -> Response<Body> {
    if number.is_empty() {
        return json_response(StatusCode::BAD_REQUEST, json!({ "success": false }));
    }

    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("reading request body: {}", e);
            return json_response(StatusCode::BAD_REQUEST, json!({ "success": false }));
        }
    };
    let request: TestSms = if body.is_empty() {
        TestSms::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("bad test_sms body: {}", e);
                return json_response(StatusCode::BAD_REQUEST, json!({ "success": false }));
            }
        }
    };
    let message = request
        .message
        .unwrap_or_else(|| DEFAULT_TEST_MESSAGE.to_string());

    let success = match state.modem.send_sms(number, &message).await {
        Ok(outcome) => outcome.success,
        Err(e) => {
            tracing::error!(number, "test send failed: {}", e);
            false
        }
    };
    json_response(StatusCode::OK, json!({ "success": success }))
}

/// Serve until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    state: Arc<HttpState>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;

    let make_service = make_service_fn(move |_conn| {
        let state = state.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| route(state.clone(), req))) }
    });

    let server = Server::from_tcp(listener)?
        .serve(make_service)
        .with_graceful_shutdown(shutdown);

    tracing::info!(%addr, "status page at http://{}/health", addr);
    server.await.context("HTTP server")
}

#[cfg(test)]
mod tests {
    use super::*;
    use aicell_core::config::ModemConfig;
    use aicell_core::simulator::{SimulatedModem, SimulatorProbe, SimulatorProfile};
    use aicell_core::sms::Dispatcher;
    use pretty_assertions::assert_eq;

    fn state() -> (Arc<HttpState>, SimulatorProbe) {
        let config = ModemConfig {
            health_check_secs: 0,
            ..ModemConfig::default()
        };
        let sim = SimulatedModem::new(SimulatorProfile::default());
        let probe = sim.probe();
        let modem = Modem::with_transport(Box::new(sim), None, &config);
        let state = Arc::new(HttpState {
            modem,
            hotline: "+8801833890003".to_string(),
        });
        (state, probe)
    }

    async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _probe) = state();
        let req = Request::get("/health").body(Body::empty()).unwrap();
        let response = route(state, req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "AiCell Running");
        assert_eq!(body["gsm"], true);
        assert_eq!(body["number"], "+8801833890003");
        assert_eq!(body["time"].as_str().unwrap().len(), 19);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sms_sends_through_modem() {
        let (state, probe) = state();
        let monitor = state.modem.start_monitor(Dispatcher::logging_only());

        let req = Request::post("/test_sms/01712345678")
            .body(Body::from(r#"{"message": "ping"}"#))
            .unwrap();
        let body = body_json(route(state.clone(), req).await.unwrap()).await;
        assert_eq!(body["success"], true);

        let req = Request::post("/test_sms/01712345678").body(Body::empty()).unwrap();
        let body = body_json(route(state.clone(), req).await.unwrap()).await;
        assert_eq!(body["success"], true);

        let sent = probe.sent();
        assert_eq!(sent[0].to, "+8801712345678");
        assert_eq!(sent[0].body, "ping");
        assert_eq!(sent[1].body, "Test from AiCell");
        monitor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (state, _probe) = state();
        let req = Request::get("/nope").body(Body::empty()).unwrap();
        assert_eq!(route(state, req).await.unwrap().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_port_scan_skips_busy_port() {
        let first = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let busy = first.local_addr().unwrap().port();
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port_range_start: busy,
            port_scan_len: 20,
            fallback_port: 0,
            ..ServerConfig::default()
        };
        let listener = bind_first_free(&config).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), busy);
    }
}
