use std::sync::RwLock;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use whispr_types::api::{Affected, Filter, Select, StoreFailure};

use super::Gateway;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// Gateway speaking to a Whispr server over `/rest/v1`.
pub struct HttpGateway {
    client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl HttpGateway {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        })
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.set_token(Some(token.into()));
        self
    }

    /// Replace the bearer token, e.g. after signing in again.
    pub fn set_token(&self, token: Option<String>) {
        match self.token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    fn token(&self) -> Option<String> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.authorized(request).send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(refusal(response).await)
        }
    }
}

/// Read a 2xx body. A body that arrives but does not parse is a
/// [`ClientError::Decode`], not a transport failure.
pub(crate) async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Turn a non-2xx response into the matching [`ClientError`].
pub(crate) async fn refusal(response: Response) -> ClientError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED {
        return ClientError::Auth(text);
    }

    debug!(%status, body = %text, "store refused request");
    match serde_json::from_str::<StoreFailure>(&text) {
        Ok(failure) => failure.into(),
        Err(_) => ClientError::Store {
            code: format!("http_{}", status.as_u16()),
            message: text,
        },
    }
}

fn filter_pairs(filters: &[Filter]) -> Vec<(String, String)> {
    filters.iter().map(Filter::to_query_pair).collect()
}

impl Gateway for HttpGateway {
    async fn query(&self, table: &str, select: &Select) -> Result<Vec<Value>> {
        let request = self
            .client
            .get(self.table_url(table))
            .query(&select.to_query_pairs());
        decode(self.send(request).await?).await
    }

    async fn insert(&self, table: &str, rows: Value) -> Result<Vec<Value>> {
        let request = self.client.post(self.table_url(table)).json(&rows);
        decode(self.send(request).await?).await
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<usize> {
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&filter_pairs(filters))
            .json(&patch);
        let affected: Affected = decode(self.send(request).await?).await?;
        Ok(affected.affected)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<usize> {
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&filter_pairs(filters));
        let affected: Affected = decode(self.send(request).await?).await?;
        Ok(affected.affected)
    }

    async fn call(&self, procedure: &str, params: Value) -> Result<Value> {
        let url = format!("{}/rest/v1/rpc/{}", self.base_url, procedure);
        let request = self.client.post(url).json(&params);
        decode(self.send(request).await?).await
    }

    async fn health(&self) -> Result<()> {
        let request = self.client.get(format!("{}/health", self.base_url));
        self.send(request).await?;
        Ok(())
    }
}
