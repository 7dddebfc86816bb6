//! HTTP client for synthesis providers
//!
//! One multipart POST per provider, bounded by the configured timeout and
//! never retried.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::debug;

use super::provider::Provider;
use super::report::{self, MetricMap};
use crate::error::ProviderError;

/// Everything one provider call uploads
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub provider: Provider,
    pub endpoint: String,
    pub source_name: String,
    pub source: Vec<u8>,
    pub constraint_name: String,
    pub constraint: Vec<u8>,
}

#[async_trait]
pub trait SynthesisClient: Send + Sync {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<MetricMap, ProviderError>;
}

pub struct HttpSynthesisClient {
    http_client: reqwest::Client,
}

impl HttpSynthesisClient {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("hdl-judge/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Request(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl SynthesisClient for HttpSynthesisClient {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<MetricMap, ProviderError> {
        let provider = request.provider;
        let mut form = Form::new()
            .part(
                "source",
                Part::bytes(request.source).file_name(request.source_name),
            )
            .part(
                provider.constraint_field(),
                Part::bytes(request.constraint).file_name(request.constraint_name),
            );
        for (name, value) in provider.extra_fields() {
            form = form.text(*name, *value);
        }

        debug!("POST {} ({})", request.endpoint, provider);
        let response = self
            .http_client
            .post(&request.endpoint)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(ProviderError::EmptyBody);
        }
        report::normalize(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;

    /// Serve `app` on an ephemeral port, returning its base URL
    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn request(provider: Provider, endpoint: String) -> SynthesisRequest {
        SynthesisRequest {
            provider,
            endpoint,
            source_name: "alu.v".to_string(),
            source: b"module top; endmodule".to_vec(),
            constraint_name: "basys3.xdc".to_string(),
            constraint: b"set_property PACKAGE_PIN W5 [get_ports clk]".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_multipart_upload_and_double_encoded_reply() {
        async fn synthesize(body: Bytes) -> (StatusCode, String) {
            let text = String::from_utf8_lossy(&body);
            let complete = text.contains("name=\"source\"")
                && text.contains("filename=\"alu.v\"")
                && text.contains("name=\"constraints\"")
                && text.contains("name=\"top\"")
                && text.contains("PACKAGE_PIN W5");
            if !complete {
                return (StatusCode::BAD_REQUEST, String::new());
            }
            let body = serde_json::json!({ "metrics": "{\"fmax_mhz\": 87.5}" });
            (StatusCode::OK, body.to_string())
        }

        let base = serve(Router::new().route("/synth", post(synthesize))).await;
        let client = HttpSynthesisClient::new(Duration::from_secs(5)).unwrap();

        let metrics = client
            .synthesize(request(Provider::F4pga, format!("{}/synth", base)))
            .await
            .unwrap();
        assert_eq!(metrics.get("fmax_mhz"), Some(&87.5));
    }

    #[tokio::test]
    async fn test_error_status_and_empty_body() {
        let app = Router::new()
            .route(
                "/fail",
                post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            )
            .route("/empty", post(|| async { "   " }));
        let base = serve(app).await;
        let client = HttpSynthesisClient::new(Duration::from_secs(5)).unwrap();

        let err = client
            .synthesize(request(Provider::OpenLane, format!("{}/fail", base)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Status(500)));

        let err = client
            .synthesize(request(Provider::OpenLane, format!("{}/empty", base)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::EmptyBody));
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let app = Router::new().route(
            "/slow",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "{}"
            }),
        );
        let base = serve(app).await;
        let client = HttpSynthesisClient::new(Duration::from_millis(200)).unwrap();

        let err = client
            .synthesize(request(Provider::F4pga, format!("{}/slow", base)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout));
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpSynthesisClient::new(Duration::from_secs(5)).unwrap();
        let err = client
            .synthesize(request(Provider::F4pga, format!("http://{}/synth", addr)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Connect(_)));
    }
}
