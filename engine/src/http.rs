//! HTTP client for the remote reading list service.

use crate::{
    api::{
        ApiResult, ArticleSummary, ChangeSet, CreatedId, EntryBody, ErrorBody, ListBody,
        RemoteApi, NOT_SET_UP_CODE,
    },
    config::{ConfigError, SyncConfig},
    error::ApiError,
    ArticleKey, RemoteId,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

/// [`RemoteApi`] over HTTP with bearer token authentication.
#[derive(Debug, Clone)]
pub struct HttpRemoteApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemoteApi {
    /// Create a client for the service at `base_url`.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, ConfigError> {
        Self::with_config(&SyncConfig {
            api_url: Some(base_url.into()),
            token,
            ..SyncConfig::default()
        })
    }

    /// Create a client from engine configuration.
    pub fn with_config(config: &SyncConfig) -> Result<Self, ConfigError> {
        let base_url = config.api_url.clone().ok_or(ConfigError::MissingApiUrl)?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> ApiResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let body: Option<ErrorBody> = serde_json::from_str(&text).ok();
        let (code, message) = match body {
            Some(body) => (body.code.unwrap_or_default(), body.error),
            None => (String::new(), text),
        };
        if code == NOT_SET_UP_CODE {
            return Err(ApiError::NotSetUp);
        }
        if status.is_server_error() {
            return Err(ApiError::Unavailable(format!("{status}: {message}")));
        }
        Err(ApiError::Rejected {
            status: status.as_u16(),
            code,
            message,
        })
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

fn transport_error(err: reqwest::Error) -> ApiError {
    if err.is_decode() {
        ApiError::InvalidResponse(err.to_string())
    } else {
        ApiError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn setup(&self) -> ApiResult<()> {
        self.send(self.client.post(self.url("/lists/setup"))).await?;
        Ok(())
    }

    async fn teardown(&self) -> ApiResult<()> {
        self.send(self.client.post(self.url("/lists/teardown")))
            .await?;
        Ok(())
    }

    async fn create_list(&self, name: &str, description: Option<&str>) -> ApiResult<RemoteId> {
        let body = ListBody {
            name: name.to_string(),
            description: description.map(str::to_string),
        };
        let created: CreatedId = self
            .json(self.client.post(self.url("/lists")).json(&body))
            .await?;
        Ok(created.id)
    }

    async fn update_list(
        &self,
        id: RemoteId,
        name: &str,
        description: Option<&str>,
    ) -> ApiResult<()> {
        let body = ListBody {
            name: name.to_string(),
            description: description.map(str::to_string),
        };
        self.send(self.client.post(self.url(&format!("/lists/{id}"))).json(&body))
            .await?;
        Ok(())
    }

    async fn delete_list(&self, id: RemoteId) -> ApiResult<()> {
        self.send(self.client.delete(self.url(&format!("/lists/{id}"))))
            .await?;
        Ok(())
    }

    async fn add_entry(
        &self,
        list_id: RemoteId,
        project: &str,
        title: &str,
    ) -> ApiResult<RemoteId> {
        let body = EntryBody {
            project: project.to_string(),
            title: title.to_string(),
        };
        let created: CreatedId = self
            .json(
                self.client
                    .post(self.url(&format!("/lists/{list_id}/entries")))
                    .json(&body),
            )
            .await?;
        Ok(created.id)
    }

    async fn remove_entry(&self, list_id: RemoteId, entry_id: RemoteId) -> ApiResult<()> {
        self.send(
            self.client
                .delete(self.url(&format!("/lists/{list_id}/entries/{entry_id}"))),
        )
        .await?;
        Ok(())
    }

    async fn changes_since(&self, since: DateTime<Utc>) -> ApiResult<ChangeSet> {
        let since = since.to_rfc3339_opts(SecondsFormat::Micros, true);
        self.json(
            self.client
                .get(self.url(&format!("/lists/changes/since/{since}"))),
        )
        .await
    }

    async fn article_summary(&self, key: &ArticleKey) -> ApiResult<ArticleSummary> {
        self.json(
            self.client
                .get(self.url("/page/summary"))
                .query(&[("key", key.as_str())]),
        )
        .await
    }
}
