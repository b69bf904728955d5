use crate::error::{ApiError, ApiResponse, ApiResult};
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL including the API prefix, e.g. `http://localhost:8080/api/v1`
    pub base_url: String,
    /// Request timeout in seconds; `None` disables the timeout
    pub timeout_secs: Option<u64>,
    pub user_agent: String,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs: None,
            user_agent: format!("ossdrive/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Apply a timeout to plain JSON requests. Transfers and progress
    /// streams are long-lived and never use it.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Backend API client
#[derive(Clone)]
pub struct Client {
    pub(crate) http_client: HttpClient,
    base_url: Url,
    config: ClientConfig,
    token: Arc<RwLock<Option<String>>>,
}

impl Client {
    /// Create a new client
    pub fn new(config: ClientConfig) -> ApiResult<Self> {
        let base = config.base_url.trim_end_matches('/');
        let base_url = Url::parse(&format!("{}/", base))
            .map_err(|e| ApiError::Other(format!("Invalid base URL: {}", e)))?;

        let http_client = HttpClient::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ApiError::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            config,
            token: Arc::new(RwLock::new(None)),
        })
    }

    pub async fn set_token(&self, token: impl Into<String>) {
        *self.token.write().await = Some(token.into());
    }

    pub async fn clear_token(&self) {
        *self.token.write().await = None;
    }

    pub(crate) async fn bearer(&self) -> Option<String> {
        self.token
            .read()
            .await
            .as_ref()
            .map(|t| format!("Bearer {}", t))
    }

    /// Resolve an API path against the base URL
    pub fn build_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn authorize(&self, mut builder: RequestBuilder) -> RequestBuilder {
        if let Some(bearer) = self.bearer().await {
            builder = builder.header("Authorization", bearer);
        }
        if let Some(secs) = self.config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        builder
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let builder = self.http_client.get(self.build_url(path));
        let response = self.authorize(builder).await.send().await?;
        Self::unwrap_envelope(response).await
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        let builder = self.http_client.post(self.build_url(path)).json(body);
        let response = self.authorize(builder).await.send().await?;
        Self::unwrap_envelope(response).await
    }

    /// DELETE without caring about the response payload
    pub async fn delete(&self, path: &str) -> ApiResult<()> {
        let builder = self.http_client.delete(self.build_url(path));
        let response = self.authorize(builder).await.send().await?;
        let response = Self::check_status(response).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(());
        }
        let envelope: ApiResponse<serde_json::Value> = serde_json::from_str(&text)?;
        if !envelope.is_success() {
            return Err(ApiError::from_response(envelope));
        }
        Ok(())
    }

    /// Map a non-2xx response to `ApiError::Http`, preferring the
    /// envelope message when the body carries one.
    pub(crate) async fn check_status(response: Response) -> ApiResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiResponse<serde_json::Value>>(&body)
            .ok()
            .map(|r| r.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request rejected")
                    .to_string()
            });

        Err(ApiError::Http { status, message })
    }

    pub(crate) async fn unwrap_envelope<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
        let response = Self::check_status(response).await?;
        let text = response.text().await?;
        let envelope: ApiResponse<T> = serde_json::from_str(&text)?;

        if !envelope.is_success() {
            return Err(ApiError::from_response(envelope));
        }

        envelope
            .data
            .ok_or_else(|| ApiError::Decode("API returned success but no data".to_string()))
    }
}
