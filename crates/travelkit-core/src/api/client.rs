//! HTTP transport for the TravelKit authentication service.
//!
//! Sign-in flows are OAuth2 token grants against `/oauth2/token`. Account
//! flows are bearer-authenticated JSON calls under `/user`.

use std::time::Duration;

use reqwest::{header, Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::AuthError;
use crate::config::Config;

use super::{ApiError, AuthRequest, AuthResponse, AuthTransport, TokenGrant};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Platform reported alongside the device code
const DEVICE_PLATFORM: &str = std::env::consts::OS;

#[derive(Debug, Serialize)]
struct RegisterBody<'a> {
    full_name: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct ResetPasswordBody<'a> {
    email: &'a str,
}

#[derive(Debug, Deserialize)]
struct MagicLinkResponse {
    token: String,
}

/// Body-less bearer calls answer with whatever JSON they like; it is ignored.
#[derive(Debug, Deserialize)]
struct Ignored {}

/// API client for the authentication service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    auth_url: String,
    client_id: String,
    device_id: String,
}

impl ApiClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            auth_url: config.auth_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            device_id: config.device_id.clone().unwrap_or_default(),
        })
    }

    fn token_url(&self) -> String {
        format!("{}/oauth2/token", self.auth_url)
    }

    /// Form fields for the token grant matching `request`, if it is one
    fn grant_form(&self, request: &AuthRequest) -> Option<Vec<(&'static str, String)>> {
        let mut form = vec![("client_id", self.client_id.clone())];
        match request {
            AuthRequest::DeviceSession => {
                form.push(("grant_type", "client_credentials".into()));
                form.push(("device_code", self.device_id.clone()));
                form.push(("device_platform", DEVICE_PLATFORM.into()));
            }
            AuthRequest::UserCredentials { username, password } => {
                form.push(("grant_type", "password".into()));
                form.push(("username", username.clone()));
                form.push(("password", password.clone()));
            }
            AuthRequest::FacebookToken { access_token } => {
                form.push(("grant_type", "facebook".into()));
                form.push(("access_token", access_token.clone()));
            }
            AuthRequest::GoogleIdToken { id_token } => {
                form.push(("grant_type", "google".into()));
                form.push(("id_token", id_token.clone()));
            }
            AuthRequest::Jwt { token } => {
                form.push(("grant_type", "jwt".into()));
                form.push(("token", token.clone()));
            }
            AuthRequest::MagicLink { token } => {
                form.push(("grant_type", "magic_link".into()));
                form.push(("token", token.clone()));
            }
            _ => return None,
        }
        Some(form)
    }

    async fn dispatch(&self, request: &AuthRequest) -> Result<AuthResponse, ApiError> {
        if let Some(form) = self.grant_form(request) {
            let url = self.token_url();
            let grant: TokenGrant = self.send(|| self.client.post(&url).form(&form)).await?;
            return Ok(AuthResponse::Tokens(grant));
        }

        match request {
            AuthRequest::Register {
                access_token,
                full_name,
                email,
                password,
            } => {
                let url = format!("{}/user/register", self.auth_url);
                let body = RegisterBody {
                    full_name,
                    email,
                    password,
                };
                let _: Ignored = self
                    .send(|| self.client.post(&url).bearer_auth(access_token).json(&body))
                    .await?;
                Ok(AuthResponse::Accepted)
            }
            AuthRequest::ResetPassword { access_token, email } => {
                let url = format!("{}/user/reset-password", self.auth_url);
                let body = ResetPasswordBody { email };
                let _: Ignored = self
                    .send(|| self.client.post(&url).bearer_auth(access_token).json(&body))
                    .await?;
                Ok(AuthResponse::Accepted)
            }
            AuthRequest::MagicLinkFetch { access_token } => {
                let url = format!("{}/user/magic-link", self.auth_url);
                let response: MagicLinkResponse = self
                    .send(|| self.client.post(&url).bearer_auth(access_token))
                    .await?;
                Ok(AuthResponse::MagicLinkToken(response.token))
            }
            AuthRequest::SignOut { access_token } => {
                let url = format!("{}/oauth2/revoke", self.auth_url);
                let form = [("client_id", self.client_id.as_str()), ("token", access_token.as_str())];
                let _: Ignored = self
                    .send(|| self.client.post(&url).bearer_auth(access_token).form(&form))
                    .await?;
                Ok(AuthResponse::Accepted)
            }
            _ => Err(ApiError::InvalidResponse(format!(
                "no route for {} request",
                request.name()
            ))),
        }
    }

    /// Send a request, retrying on 429 with exponential backoff.
    async fn send<T, F>(&self, build: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = build()
                .header(header::ACCEPT, "application/json")
                .send()
                .await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Self::parse_body(response).await,
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: Response) -> Result<Option<Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Empty bodies (204 and friends) parse as `{}`.
    async fn parse_body<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let text = response.text().await?;
        let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

impl AuthTransport for ApiClient {
    async fn execute(&self, request: AuthRequest) -> Result<AuthResponse, AuthError> {
        debug!(flow = request.name(), "Dispatching auth request");
        self.dispatch(&request)
            .await
            .map_err(|e| e.into_auth_error(&request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ApiClient {
        let config = Config {
            client_id: "test-client".into(),
            auth_url: "https://auth.example.test/".into(),
            device_id: Some("device-42".into()),
            last_username: None,
        };
        ApiClient::new(&config).expect("client")
    }

    fn field<'a>(form: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
        form.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_token_url_strips_trailing_slash() {
        assert_eq!(client().token_url(), "https://auth.example.test/oauth2/token");
    }

    #[test]
    fn test_device_grant_form() {
        let form = client().grant_form(&AuthRequest::DeviceSession).expect("grant");
        assert_eq!(field(&form, "grant_type"), Some("client_credentials"));
        assert_eq!(field(&form, "client_id"), Some("test-client"));
        assert_eq!(field(&form, "device_code"), Some("device-42"));
        assert!(field(&form, "device_platform").is_some());
    }

    #[test]
    fn test_sign_in_grant_forms() {
        let c = client();
        let form = c
            .grant_form(&AuthRequest::UserCredentials {
                username: "jane".into(),
                password: "pw".into(),
            })
            .expect("grant");
        assert_eq!(field(&form, "grant_type"), Some("password"));
        assert_eq!(field(&form, "username"), Some("jane"));

        let form = c
            .grant_form(&AuthRequest::GoogleIdToken { id_token: "gid".into() })
            .expect("grant");
        assert_eq!(field(&form, "grant_type"), Some("google"));
        assert_eq!(field(&form, "id_token"), Some("gid"));

        let form = c
            .grant_form(&AuthRequest::MagicLink { token: "ml".into() })
            .expect("grant");
        assert_eq!(field(&form, "grant_type"), Some("magic_link"));
    }

    #[test]
    fn test_account_requests_are_not_grants() {
        let c = client();
        assert!(c
            .grant_form(&AuthRequest::MagicLinkFetch { access_token: "tok".into() })
            .is_none());
        assert!(c
            .grant_form(&AuthRequest::SignOut { access_token: "tok".into() })
            .is_none());
    }

    #[test]
    fn test_parse_token_grant() {
        let json = r#"{"access_token":"abc","refresh_token":"def","expires_in":3600,"token_type":"Bearer"}"#;
        let grant: TokenGrant = serde_json::from_str(json).expect("Failed to parse grant JSON");
        assert_eq!(grant.access_token, "abc");
        assert_eq!(grant.refresh_token.as_deref(), Some("def"));
        assert_eq!(grant.expires_in, Some(3600));

        let json = r#"{"access_token":"abc"}"#;
        let grant: TokenGrant = serde_json::from_str(json).expect("Failed to parse minimal grant JSON");
        assert!(grant.refresh_token.is_none());
        assert!(grant.expires_in.is_none());
    }
}
