//! Client for the open-data animal adoption feed.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::AppError;

/// Public endpoint listing every adoptable animal as a JSON array.
pub const DEFAULT_UPSTREAM_URL: &str =
    "https://data.moa.gov.tw/Service/OpenData/TransService.aspx?UnitId=QcbUEzN6E6DL";

/// Default deadline for the whole upstream request, body included.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Source of the raw animal dataset.
///
/// Returns the decoded JSON as-is; checking its shape is the caller's job.
#[async_trait]
pub trait AnimalSource: Send + Sync {
    async fn fetch_all(&self) -> Result<Value, AppError>;
}

/// HTTP implementation backed by `reqwest`.
pub struct HttpAnimalSource {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpAnimalSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    fn classify(&self, err: reqwest::Error) -> AppError {
        if err.is_timeout() {
            tracing::warn!("Upstream request timed out after {:?}", self.timeout);
            AppError::UpstreamTimeout(format!(
                "Upstream did not respond within {} seconds",
                self.timeout.as_secs_f32()
            ))
        } else if err.is_decode() {
            tracing::warn!("Upstream body is not valid JSON: {}", err);
            AppError::UpstreamFormat(format!("Upstream body is not valid JSON: {}", err))
        } else {
            tracing::warn!("Upstream request failed: {}", err);
            AppError::Upstream(format!("Upstream request failed: {}", err))
        }
    }
}

#[async_trait]
impl AnimalSource for HttpAnimalSource {
    async fn fetch_all(&self) -> Result<Value, AppError> {
        tracing::info!("Fetching animal dataset from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Upstream answered with HTTP {}", status);
            return Err(AppError::Upstream(format!(
                "Upstream answered with HTTP {}",
                status.as_u16()
            )));
        }

        response.json::<Value>().await.map_err(|e| self.classify(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/feed", addr)
    }

    #[tokio::test]
    async fn test_fetches_json_body() {
        let url = serve(Router::new().route(
            "/feed",
            get(|| async { Json(json!([{"animal_id": 1}])) }),
        ))
        .await;

        let source = HttpAnimalSource::new(url, DEFAULT_TIMEOUT).unwrap();
        assert_eq!(source.fetch_all().await.unwrap(), json!([{"animal_id": 1}]));
    }

    #[tokio::test]
    async fn test_non_array_body_is_returned_unchanged() {
        let url = serve(Router::new().route(
            "/feed",
            get(|| async { Json(json!({"error": "rate limited"})) }),
        ))
        .await;

        let source = HttpAnimalSource::new(url, DEFAULT_TIMEOUT).unwrap();
        assert_eq!(
            source.fetch_all().await.unwrap(),
            json!({"error": "rate limited"})
        );
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let url = serve(Router::new().route(
            "/feed",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(json!([]))
            }),
        ))
        .await;

        let source = HttpAnimalSource::new(url, Duration::from_millis(200)).unwrap();
        let err = source.fetch_all().await.unwrap_err();
        assert!(matches!(err, AppError::UpstreamTimeout(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let url = serve(Router::new().route(
            "/feed",
            get(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "busy") }),
        ))
        .await;

        let source = HttpAnimalSource::new(url, DEFAULT_TIMEOUT).unwrap();
        let err = source.fetch_all().await.unwrap_err();
        assert_eq!(err, AppError::Upstream("Upstream answered with HTTP 503".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_json_is_a_format_error() {
        let url = serve(Router::new().route("/feed", get(|| async { "<html>oops</html>" }))).await;

        let source = HttpAnimalSource::new(url, DEFAULT_TIMEOUT).unwrap();
        let err = source.fetch_all().await.unwrap_err();
        assert!(matches!(err, AppError::UpstreamFormat(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_connection_refused_is_not_a_timeout() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = HttpAnimalSource::new(format!("http://{}/feed", addr), DEFAULT_TIMEOUT).unwrap();
        let err = source.fetch_all().await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)), "got {:?}", err);
    }
}
