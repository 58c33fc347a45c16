use base64::{Engine, engine::general_purpose::STANDARD};
use log::{debug, error};
use reqwest::{
    StatusCode, Url,
    header::{AUTHORIZATION, HeaderValue},
};
use serde_json::Value;
use std::time::Duration;

use crate::{config::ApiConfig, util};

use super::{FetchError, MediaApi};

/// OvenMediaEngine REST API client.
///
/// Endpoints used (relative to `base_url`):
/// - GET /v1/vhosts
/// - GET /v1/vhosts/{vhost}/apps/{app}/streams
/// - GET /v1/vhosts/{vhost}/apps/{app}/streamstatus
/// - GET /v1/vhosts/{vhost}/apps/{app}/streams/{stream}
/// - GET /v1/stats/current/vhosts/{vhost}/apps/{app}/streams/{stream}
///
/// AUTH:
/// - When a token is configured every request carries
///   `Authorization: Basic base64(token)` (OME's access token format)
///
/// LIMITS:
/// - Each request is bounded by `ApiConfig::timeout`
/// - No retries
///
pub struct OvenMediaClient {
    http: reqwest::Client,
    base_url: Url,
    app: String,
    auth: Option<HeaderValue>,
    timeout: Duration,
    debug: bool,
}

impl OvenMediaClient {
    pub fn new(config: &ApiConfig, debug: bool) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        let auth = match &config.token {
            Some(token) => {
                let mut value = HeaderValue::try_from(format!("Basic {}", STANDARD.encode(token)))?;
                value.set_sensitive(true);
                Some(value)
            }
            None => None,
        };

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            app: config.app.clone(),
            auth,
            timeout: config.timeout,
            debug,
        })
    }

    /// Issue one GET and unwrap the envelope.
    ///
    /// Any failure is logged here and collapsed to `Value::Null`.
    async fn fetch(&self, segments: &[&str], label: &str) -> Value {
        let url = util::endpoint(&self.base_url, segments);
        debug!("Fetching {label} from {url}");

        match self.try_fetch(url).await {
            Ok(value) => {
                if self.debug {
                    debug!("Full API response for {label}: {value}");
                }
                value
            }
            Err(e @ FetchError::Unauthorized(_)) => {
                error!("Unauthorized while fetching {label}: {e}");
                Value::Null
            }
            Err(e) => {
                error!("Error fetching {label}: {e}");
                Value::Null
            }
        }
    }

    async fn try_fetch(&self, url: Url) -> Result<Value, FetchError> {
        let mut request = self.http.get(url);
        if let Some(auth) = &self.auth {
            request = request.header(AUTHORIZATION, auth.clone());
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Unauthorized(status));
        }
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let mut envelope: Value = response.json().await.map_err(|e| self.classify(e))?;

        envelope
            .get_mut("response")
            .map(Value::take)
            .ok_or(FetchError::MissingResponse)
    }

    fn classify(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else if e.is_decode() {
            FetchError::Decode(e)
        } else {
            FetchError::Transport(e)
        }
    }
}

#[async_trait::async_trait]
impl MediaApi for OvenMediaClient {
    async fn list_vhosts(&self) -> Value {
        self.fetch(&["v1", "vhosts"], "virtual hosts").await
    }

    async fn list_streams(&self, vhost: &str) -> Value {
        self.fetch(
            &["v1", "vhosts", vhost, "apps", self.app.as_str(), "streams"],
            &format!("streams list for vhost={vhost}"),
        )
        .await
    }

    async fn stream_status(&self, vhost: &str) -> Value {
        self.fetch(
            &["v1", "vhosts", vhost, "apps", self.app.as_str(), "streamstatus"],
            &format!("stream status for vhost={vhost}"),
        )
        .await
    }

    async fn stream_info(&self, vhost: &str, stream: &str) -> Value {
        self.fetch(
            &["v1", "vhosts", vhost, "apps", self.app.as_str(), "streams", stream],
            &format!("info for stream {stream} in vhost={vhost}"),
        )
        .await
    }

    async fn stream_stats(&self, vhost: &str, stream: &str) -> Value {
        self.fetch(
            &[
                "v1", "stats", "current", "vhosts", vhost, "apps", self.app.as_str(), "streams", stream,
            ],
            &format!("stats for stream {stream} in vhost={vhost}"),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::Path,
        http::HeaderMap,
        routing::get,
    };
    use serde_json::json;
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{addr}")).unwrap()
    }

    fn client(base_url: Url, token: Option<&str>, timeout: Duration) -> OvenMediaClient {
        let config = ApiConfig {
            base_url,
            token: token.map(str::to_string),
            app: "app".to_string(),
            timeout,
        };
        OvenMediaClient::new(&config, true).unwrap()
    }

    fn envelope(response: Value) -> Json<Value> {
        Json(json!({ "statusCode": 200, "message": "OK", "response": response }))
    }

    #[tokio::test]
    async fn unwraps_the_response_envelope() {
        let router = Router::new()
            .route("/v1/vhosts", get(|| async { envelope(json!(["default"])) }))
            .route(
                "/v1/vhosts/{vhost}/apps/{app}/streams",
                get(|Path((vhost, app)): Path<(String, String)>| async move {
                    envelope(json!([format!("{vhost}-{app}")]))
                }),
            )
            .route(
                "/v1/vhosts/{vhost}/apps/{app}/streamstatus",
                get(|| async { envelope(json!({ "default/app/test": "Running" })) }),
            )
            .route(
                "/v1/vhosts/{vhost}/apps/{app}/streams/{stream}",
                get(|Path((_, _, stream)): Path<(String, String, String)>| async move {
                    envelope(json!({ "name": stream }))
                }),
            )
            .route(
                "/v1/stats/current/vhosts/{vhost}/apps/{app}/streams/{stream}",
                get(|| async { envelope(json!({ "totalBytesIn": 10 })) }),
            );
        let api = client(serve(router).await, None, Duration::from_secs(2));

        assert_eq!(api.list_vhosts().await, json!(["default"]));
        assert_eq!(api.list_streams("default").await, json!(["default-app"]));
        assert_eq!(
            api.stream_status("default").await,
            json!({ "default/app/test": "Running" })
        );
        assert_eq!(api.stream_info("default", "test").await, json!({ "name": "test" }));
        assert_eq!(
            api.stream_stats("default", "test").await,
            json!({ "totalBytesIn": 10 })
        );
    }

    #[tokio::test]
    async fn sends_basic_token_header() {
        let router = Router::new().route(
            "/v1/vhosts",
            get(|headers: HeaderMap| async move {
                let auth = headers
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                envelope(json!([auth]))
            }),
        );
        let base = serve(router).await;

        let with_token = client(base.clone(), Some("ome-access-token"), Duration::from_secs(2));
        assert_eq!(
            with_token.list_vhosts().await,
            json!(["Basic b21lLWFjY2Vzcy10b2tlbg=="])
        );

        let without_token = client(base, None, Duration::from_secs(2));
        assert_eq!(without_token.list_vhosts().await, json!([""]));
    }

    #[tokio::test]
    async fn failures_degrade_to_empty() {
        let router = Router::new()
            .route(
                "/v1/vhosts/unauthorized/apps/app/streams",
                get(|| async { (axum::http::StatusCode::UNAUTHORIZED, "denied") }),
            )
            .route(
                "/v1/vhosts/forbidden/apps/app/streams",
                get(|| async { (axum::http::StatusCode::FORBIDDEN, "denied") }),
            )
            .route(
                "/v1/vhosts/broken/apps/app/streams",
                get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            )
            .route(
                "/v1/vhosts/garbage/apps/app/streams",
                get(|| async { "this is not json" }),
            )
            .route(
                "/v1/vhosts/bare/apps/app/streams",
                get(|| async { Json(json!({ "statusCode": 200 })) }),
            );
        let api = client(serve(router).await, None, Duration::from_secs(2));

        assert_eq!(api.list_streams("unauthorized").await, Value::Null);
        assert_eq!(api.list_streams("forbidden").await, Value::Null);
        assert_eq!(api.list_streams("broken").await, Value::Null);
        assert_eq!(api.list_streams("garbage").await, Value::Null);
        assert_eq!(api.list_streams("bare").await, Value::Null);
        // Unknown route -> 404
        assert_eq!(api.list_streams("missing").await, Value::Null);
    }

    #[tokio::test]
    async fn slow_upstream_times_out_to_empty() {
        let router = Router::new().route(
            "/v1/vhosts",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                envelope(json!(["late"]))
            }),
        );
        let api = client(serve(router).await, None, Duration::from_millis(200));

        let started = std::time::Instant::now();
        assert_eq!(api.list_vhosts().await, Value::Null);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_empty() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let api = client(
            Url::parse(&format!("http://{addr}")).unwrap(),
            None,
            Duration::from_secs(2),
        );
        assert_eq!(api.list_vhosts().await, Value::Null);
    }
}
