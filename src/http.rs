// HTTP module - Prometheus scrape endpoint and landing page

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::error;

use crate::exporter::Exporter;
use crate::sink::{Desc, MetricSink};

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Shared state of the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    exporter: Arc<Exporter>,
    build_info: Arc<Desc>,
    telemetry_path: Arc<str>,
}

impl AppState {
    pub fn new(exporter: Arc<Exporter>, telemetry_path: &str) -> Self {
        AppState {
            exporter,
            build_info: Arc::new(Desc::new(
                "exporter_build_info",
                "A metric with a constant '1' value labeled by the exporter version.",
                &["version"],
            )),
            telemetry_path: Arc::from(telemetry_path),
        }
    }
}

/// Builds the router serving `GET <telemetry_path>` and `GET /`
pub fn router(exporter: Arc<Exporter>, telemetry_path: &str) -> Router {
    Router::new()
        .route("/", get(landing_handler))
        .route(telemetry_path, get(metrics_handler))
        .with_state(AppState::new(exporter, telemetry_path))
}

/// Runs one scrape into a fresh sink and renders it
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    let sink = Arc::new(MetricSink::new());
    sink.gauge(&state.build_info, 1.0, &[env!("CARGO_PKG_VERSION")]);
    state.exporter.collect(&sink).await;

    match sink.encode_text() {
        Ok(body) => (StatusCode::OK, [("content-type", TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

pub async fn landing_handler(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<html>\n<head><title>FRR Exporter</title></head>\n<body>\n\
         <h1>FRR Exporter</h1>\n<p><a href=\"{path}\">Metrics</a></p>\n</body>\n</html>\n",
        path = state.telemetry_path
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::{Collector, CollectorError};
    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    struct Fixed;

    #[async_trait]
    impl Collector for Fixed {
        async fn update(&self, sink: &MetricSink) -> Result<(), CollectorError> {
            sink.gauge(&Desc::subsystem("fixed", "value", "Fixed value.", &[]), 42.0, &[]);
            Ok(())
        }
    }

    fn state() -> AppState {
        let exporter = Exporter::with_collectors(vec![("fixed", Arc::new(Fixed) as Arc<dyn Collector>)]);
        AppState::new(Arc::new(exporter), "/metrics")
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_handler() {
        let response = metrics_handler(State(state())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], TEXT_FORMAT);

        let body = body_text(response).await;
        assert!(body.contains("frr_fixed_value 42"));
        assert!(body.contains("frr_collector_up{collector=\"fixed\"} 1"));
        assert!(body.contains("frr_scrapes_total 1"));
        assert!(body.contains(&format!(
            "frr_exporter_build_info{{version=\"{}\"}} 1",
            env!("CARGO_PKG_VERSION")
        )));
    }

    #[tokio::test]
    async fn test_landing_page_links_metrics() {
        let Html(page) = landing_handler(State(state())).await;
        assert!(page.contains("<a href=\"/metrics\">"));
    }

    #[tokio::test]
    async fn test_router_serves_telemetry_path() {
        let exporter = Exporter::with_collectors(vec![("fixed", Arc::new(Fixed) as Arc<dyn Collector>)]);
        let app = router(Arc::new(exporter), "/frr");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /frr HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("frr_fixed_value 42"));
    }
}
