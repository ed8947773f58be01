//! Cloud REST client.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tracing::debug;

use crate::config::BridgeConfig;
use crate::error::{CloudError, Result};
use crate::session::truncate;

/// Authenticated client for the cloud REST API.
pub struct CloudApi {
    client: reqwest::Client,
    base: String,
    token: String,
}

impl CloudApi {
    /// Client for `config.api_base` sending the configured identity headers.
    pub fn new(config: &BridgeConfig, token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.http_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| CloudError::Config(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| CloudError::Config(format!("invalid header value {value}: {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base: config.api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Recent print tasks, as the raw response body.
    pub async fn list_tasks(&self, limit: u32) -> Result<String> {
        self.get(&format!("/v1/user-service/my/tasks?limit={limit}"))
            .await
    }

    /// Id of the token's user.
    pub async fn user_id(&self) -> Result<String> {
        let body = self.get("/v1/design-user-service/my/preference").await?;
        let value: Value = serde_json::from_str(&body).map_err(|e| CloudError::Api {
            status: 200,
            body: format!("invalid preference response: {e}"),
        })?;
        match value.get("uid") {
            Some(Value::String(uid)) => Ok(uid.clone()),
            Some(Value::Number(uid)) => Ok(uid.to_string()),
            _ => Err(CloudError::Api {
                status: 200,
                body: "preference response has no uid".into(),
            }),
        }
    }

    async fn get(&self, path: &str) -> Result<String> {
        let url = format!("{}{path}", self.base);
        debug!("GET {url}");
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header("Content-Type", "application/json")
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(CloudError::Api {
                status: status.as_u16(),
                body: truncate(&body, 500).to_string(),
            });
        }
        Ok(body)
    }
}
