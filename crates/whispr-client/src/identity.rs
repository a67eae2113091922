use reqwest::Client;
use whispr_types::api::{LoginRequest, RegisterRequest, SessionResponse};
use whispr_types::models::User;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::gateway::{HttpGateway, decode, refusal};
use crate::profile::ProfileService;

/// Email/password sign-up and sign-in against `/auth`.
pub struct IdentityClient {
    client: Client,
    config: ClientConfig,
}

impl IdentityClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    pub async fn sign_up(&self, email: &str, password: &str, mood: Option<&str>) -> Result<SessionResponse> {
        let body = RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            mood: mood.map(str::to_string),
        };
        self.post("/auth/register", &body).await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionResponse> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.post("/auth/login", &body).await
    }

    /// Gateway carrying the session's bearer token.
    pub fn gateway(&self, session: &SessionResponse) -> Result<HttpGateway> {
        Ok(HttpGateway::new(&self.config)?.with_token(session.token.clone()))
    }

    pub async fn profile(&self, session: &SessionResponse) -> Result<User> {
        let profiles = ProfileService::new(std::sync::Arc::new(self.gateway(session)?));
        profiles
            .get(session.user_id)
            .await?
            .ok_or_else(|| ClientError::not_found("user"))
    }

    async fn post<B: serde::Serialize>(&self, path: &str, body: &B) -> Result<SessionResponse> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let response = self.client.post(url).json(body).send().await?;
        if response.status().is_success() {
            decode(response).await
        } else {
            Err(refusal(response).await)
        }
    }
}
