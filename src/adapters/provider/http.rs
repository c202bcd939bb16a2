//! HTTP client for the upstream webhook provider
//!
//! Speaks the `/v0/webhooks` API: create, list and delete enhanced-transaction
//! webhooks, authenticated with an `api-key` query parameter.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::core::{Subscription, SubscriptionRequest, UpstreamError, WebhookProvider};

const WEBHOOKS_PATH: &str = "/v0/webhooks";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateWebhookBody<'a> {
    #[serde(rename = "webhookURL")]
    webhook_url: &'a str,
    transaction_types: Vec<String>,
    account_addresses: Vec<String>,
    webhook_type: &'a str,
    auth_header: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookResponse {
    #[serde(rename = "webhookID")]
    webhook_id: String,
    #[serde(rename = "webhookURL", default)]
    webhook_url: String,
    #[serde(default)]
    account_addresses: Vec<String>,
    #[serde(default)]
    transaction_types: Vec<String>,
}

impl From<WebhookResponse> for Subscription {
    fn from(body: WebhookResponse) -> Self {
        Subscription {
            id: body.webhook_id,
            webhook_url: body.webhook_url,
            account_addresses: body.account_addresses,
            transaction_types: body.transaction_types,
        }
    }
}

pub struct HttpWebhookProvider {
    client: Client,
    base_url: String,
    api_key: String,
    webhook_type: String,
    timeout: Duration,
}

impl HttpWebhookProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, UpstreamError> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            webhook_type: config.webhook_type.clone(),
            timeout,
        })
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}{}{}", self.base_url, WEBHOOKS_PATH, suffix)
    }

    fn request_error(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout(self.timeout)
        } else {
            UpstreamError::Request(err.to_string())
        }
    }

    async fn check(&self, response: Response) -> Result<Response, UpstreamError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(UpstreamError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl WebhookProvider for HttpWebhookProvider {
    async fn create_subscription(&self, request: &SubscriptionRequest) -> Result<Subscription, UpstreamError> {
        let mut accounts = request.account_addresses.clone();
        accounts.extend(request.program_ids.iter().cloned());
        let transaction_types = if request.transaction_types.is_empty() {
            vec!["ANY".to_string()]
        } else {
            request.transaction_types.clone()
        };

        let body = CreateWebhookBody {
            webhook_url: &request.webhook_url,
            transaction_types,
            account_addresses: accounts,
            webhook_type: &self.webhook_type,
            auth_header: &request.secret,
        };

        let response = self
            .client
            .post(self.url(""))
            .query(&[("api-key", &self.api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let response = self.check(response).await?;
        let created: WebhookResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Request(format!("invalid create response: {}", e)))?;

        debug!(subscription_id = %created.webhook_id, "Provider created webhook");
        Ok(created.into())
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, UpstreamError> {
        let response = self
            .client
            .get(self.url(""))
            .query(&[("api-key", &self.api_key)])
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let response = self.check(response).await?;
        let listed: Vec<WebhookResponse> = response
            .json()
            .await
            .map_err(|e| UpstreamError::Request(format!("invalid list response: {}", e)))?;

        Ok(listed.into_iter().map(Subscription::from).collect())
    }

    async fn delete_subscription(&self, subscription_id: &str) -> Result<(), UpstreamError> {
        let response = self
            .client
            .delete(self.url(&format!("/{}", subscription_id)))
            .query(&[("api-key", &self.api_key)])
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(UpstreamError::SubscriptionNotFound(subscription_id.to_string()));
        }
        self.check(response).await?;
        Ok(())
    }
}
