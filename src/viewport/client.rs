use crate::api::envelope::Envelope;
use crate::models::{PropertyView, ViewportRequest};
use crate::viewport::controller::{FetchError, ViewportSource};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Fetches viewports from a running nest-map server over HTTP
pub struct HttpViewportClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpViewportClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("nest-map/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Single property by id, ignoring bbox and zoom
    pub async fn fetch_one(&self, id: &str) -> Result<PropertyView, FetchError> {
        self.get("/properties", &[("id", id.to_string())]).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {} {:?}", url, query);

        let mut request = self.client.get(&url).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let envelope: Envelope<T> = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(FetchError::Server {
                    status: status.as_u16(),
                    code: None,
                    message: format!("request failed with {status}"),
                })
            }
            Err(e) => return Err(FetchError::Decode(e.to_string())),
        };

        envelope.into_result().map_err(|error| FetchError::Server {
            status: status.as_u16(),
            code: Some(error.code),
            message: error.message,
        })
    }
}

#[async_trait]
impl ViewportSource for HttpViewportClient {
    async fn fetch(&self, request: &ViewportRequest) -> Result<Vec<PropertyView>, FetchError> {
        self.get(
            "/properties",
            &[
                ("bbox", request.bbox.to_string()),
                ("z", request.zoom.to_string()),
            ],
        )
        .await
    }
}
