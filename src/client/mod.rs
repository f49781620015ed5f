//! HTTP client for the remote platform
//!
//! [`PlatformApi`] is the seam the rest of the crate talks to; [`PlatformClient`]
//! is the reqwest implementation. Tests point it at a mock server through
//! [`PlatformConfig::base_url`].

use async_trait::async_trait;
use reqwest::{header::COOKIE, Client, Response, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::config::{Credentials, PlatformConfig};
use crate::models::EntityRecord;
use crate::utils::encode_uri_component;
use crate::utils::error::{AuthError, FetchError};

/// Name of the session cookie issued by the platform
pub const AUTH_COOKIE: &str = "auth";

/// Result of the credential exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginResponse {
    /// Session established
    Authenticated { token: String },
    /// Platform wants a step-up code; `cookie` identifies the half-open session
    ChallengeRequired { cookie: String },
}

/// Result of submitting a challenge code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeResponse {
    /// Code accepted; `token` is the refreshed session cookie, if one was issued
    Verified { token: Option<String> },
    Rejected,
}

/// Operations the harvester needs from the platform
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Exchange username/password for a session
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, AuthError>;

    /// Submit a step-up challenge code for a half-open session
    async fn verify_challenge(
        &self,
        cookie: &str,
        code: &str,
    ) -> Result<ChallengeResponse, AuthError>;

    /// Fetch one listing page for an ordering dimension
    async fn fetch_page(
        &self,
        token: &str,
        ordering: &str,
        page_size: u32,
        offset: u32,
    ) -> Result<Vec<EntityRecord>, FetchError>;

    /// Fetch the detail record of an authoring actor
    async fn fetch_companion(
        &self,
        token: &str,
        id: &str,
    ) -> Result<Map<String, Value>, FetchError>;
}

/// reqwest-backed [`PlatformApi`]
pub struct PlatformClient {
    client: Client,
    base_url: String,
}

impl PlatformClient {
    /// Create a client from platform settings
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Network` if the HTTP client cannot be built
    pub fn new(config: &PlatformConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .gzip(true)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create a client against a custom base URL (mock servers)
    pub fn with_base_url(base_url: &str) -> Result<Self, FetchError> {
        Self::new(&PlatformConfig {
            base_url: base_url.to_string(),
            ..PlatformConfig::default()
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Base URL with `segments` appended, each percent-encoded as one path segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| FetchError::Network(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| FetchError::Network(format!("{} has no path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn session_cookie(token: &str) -> String {
        format!("{AUTH_COOKIE}={token}")
    }

    fn auth_cookie_from(response: &Response) -> Option<String> {
        response
            .cookies()
            .find(|c| c.name() == AUTH_COOKIE && !c.value().is_empty())
            .map(|c| c.value().to_string())
    }

    /// Read a JSON object body; anything else reads as an empty object
    async fn json_object(response: Response) -> Map<String, Value> {
        match response.json::<Value>().await {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    fn status_to_fetch_error(status: StatusCode) -> FetchError {
        match status {
            StatusCode::UNAUTHORIZED => FetchError::Unauthorized,
            StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited,
            StatusCode::NOT_FOUND => FetchError::NotFound,
            other => FetchError::Status(other.as_u16()),
        }
    }
}

#[async_trait]
impl PlatformApi for PlatformClient {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, AuthError> {
        let url = format!("{}/auth/user", self.base_url);
        let response = self
            .client
            .get(&url)
            .basic_auth(
                encode_uri_component(&credentials.username),
                Some(encode_uri_component(&credentials.password)),
            )
            .send()
            .await
            .map_err(|e| AuthError::NetworkFault(e.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED => return Err(AuthError::InvalidCredentials),
            StatusCode::TOO_MANY_REQUESTS => return Err(AuthError::RateLimited),
            other => return Err(AuthError::Unexpected(other.as_u16())),
        }

        let cookie = Self::auth_cookie_from(&response);
        let body = Self::json_object(response).await;

        if body.contains_key("requiresTwoFactorAuth") {
            return match cookie {
                Some(cookie) => Ok(LoginResponse::ChallengeRequired { cookie }),
                None => {
                    warn!("Challenge requested without a session cookie");
                    Err(AuthError::Unexpected(status.as_u16()))
                }
            };
        }

        let body_token = body
            .get("authToken")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        match body_token.or(cookie) {
            Some(token) => Ok(LoginResponse::Authenticated { token }),
            None => {
                warn!("Login succeeded without a session token");
                Err(AuthError::Unexpected(status.as_u16()))
            }
        }
    }

    async fn verify_challenge(
        &self,
        cookie: &str,
        code: &str,
    ) -> Result<ChallengeResponse, AuthError> {
        let url = format!("{}/auth/twofactorauth/emailotp/verify", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(COOKIE, Self::session_cookie(cookie))
            .json(&serde_json::json!({ "code": code }))
            .send()
            .await
            .map_err(|e| AuthError::NetworkFault(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                return Ok(ChallengeResponse::Rejected)
            }
            StatusCode::TOO_MANY_REQUESTS => return Err(AuthError::RateLimited),
            other => return Err(AuthError::Unexpected(other.as_u16())),
        }

        let refreshed = Self::auth_cookie_from(&response);
        let body = Self::json_object(response).await;

        if body.get("verified").and_then(Value::as_bool) == Some(true) {
            Ok(ChallengeResponse::Verified { token: refreshed })
        } else {
            Ok(ChallengeResponse::Rejected)
        }
    }

    async fn fetch_page(
        &self,
        token: &str,
        ordering: &str,
        page_size: u32,
        offset: u32,
    ) -> Result<Vec<EntityRecord>, FetchError> {
        let url = Url::parse_with_params(
            &format!("{}/worlds", self.base_url),
            &[
                ("sort", ordering.to_string()),
                ("n", page_size.to_string()),
                ("offset", offset.to_string()),
            ],
        )
        .map_err(|e| FetchError::Network(e.to_string()))?;

        let response = self
            .client
            .get(url)
            .header(COOKIE, Self::session_cookie(token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_to_fetch_error(status));
        }

        let items: Vec<Value> = response.json().await?;
        let total = items.len();
        let records: Vec<EntityRecord> = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!(error = %e, "Skipping malformed listing record");
                    None
                }
            })
            .collect();

        if records.len() < total {
            warn!(
                ordering = ordering,
                offset = offset,
                skipped = total - records.len(),
                "Listing page contained malformed records"
            );
        }

        Ok(records)
    }

    async fn fetch_companion(
        &self,
        token: &str,
        id: &str,
    ) -> Result<Map<String, Value>, FetchError> {
        let url = self.endpoint(&["users", id])?;
        let response = self
            .client
            .get(url)
            .header(COOKIE, Self::session_cookie(token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_to_fetch_error(status));
        }

        match response.json::<Value>().await? {
            Value::Object(map) => Ok(map),
            _ => Err(FetchError::Decode(String::from(
                "companion record is not a JSON object",
            ))),
        }
    }
}
