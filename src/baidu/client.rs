use std::future::Future;
use std::time::{Duration, Instant};

use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::debug;

use super::error::{RecognitionError, TOKEN_CODES};
use super::types::{OcrReply, Recognition, RecognitionMode, TokenReply};
use crate::conditioner::ConditionedPayload;
use crate::config::OcrConfig;

pub const API_URL: &str = "https://aip.baidubce.com/rest/2.0/ocr/v1";
pub const TOKEN_URL: &str = "https://aip.baidubce.com/oauth/2.0/token";

/// Tokens are refreshed this long before the service says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(300);

/// Performs one recognition round trip for one conditioned image.
///
/// Implementations must not retry; that is the orchestrator's job.
pub trait Recognizer: Send + Sync {
    fn recognize(
        &self,
        payload: &ConditionedPayload,
    ) -> impl Future<Output = Result<Recognition, RecognitionError>> + Send;
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

pub struct BaiduClient {
    api_key: String,
    secret_key: String,
    client: Client,
    base_url: String,
    token_url: String,
    mode: RecognitionMode,
    token: Mutex<Option<AccessToken>>,
}

impl BaiduClient {
    pub fn from_config(config: &OcrConfig) -> Result<Self, RecognitionError> {
        Self::with_endpoints(
            config.api_key.clone(),
            config.secret_key.clone(),
            config.base_url.clone(),
            config.token_url.clone(),
            config.mode,
            config.request_timeout(),
        )
    }

    /// Create a client pointing at custom endpoints (useful for testing).
    pub fn with_endpoints(
        api_key: String,
        secret_key: String,
        base_url: String,
        token_url: String,
        mode: RecognitionMode,
        timeout: Duration,
    ) -> Result<Self, RecognitionError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            api_key,
            secret_key,
            client,
            base_url,
            token_url,
            mode,
            token: Mutex::new(None),
        })
    }

    /// Returns a cached access token, fetching a new one when missing or stale.
    ///
    /// The lock is held across the fetch so concurrent workers share one
    /// token request.
    async fn access_token(&self) -> Result<String, RecognitionError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard
            .as_ref()
            .filter(|t| t.expires_at > Instant::now())
        {
            return Ok(token.value.clone());
        }

        let fresh = self.fetch_token().await?;
        let value = fresh.value.clone();
        *guard = Some(fresh);
        Ok(value)
    }

    async fn fetch_token(&self) -> Result<AccessToken, RecognitionError> {
        debug!(url = %self.token_url, "requesting access token");
        let response = self
            .client
            .post(&self.token_url)
            .query(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.api_key.as_str()),
                ("client_secret", self.secret_key.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        match serde_json::from_str::<TokenReply>(&body) {
            Ok(TokenReply::Granted {
                access_token,
                expires_in,
            }) => {
                let ttl = Duration::from_secs(expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
                Ok(AccessToken {
                    value: access_token,
                    expires_at: Instant::now() + ttl,
                })
            }
            Ok(TokenReply::Denied {
                error,
                error_description,
            }) => Err(RecognitionError::Auth(match error_description {
                Some(description) => format!("{error}: {description}"),
                None => error,
            })),
            // Transport failures already returned above; anything else from the
            // token endpoint means no usable credentials.
            Err(_) if !status.is_success() => Err(RecognitionError::Auth(format!(
                "token endpoint returned HTTP {}: {}",
                status.as_u16(),
                body.trim()
            ))),
            Err(e) => Err(RecognitionError::Auth(format!("unreadable token response: {e}"))),
        }
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    fn endpoint_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.mode.endpoint()
        )
    }
}

impl Recognizer for BaiduClient {
    async fn recognize(
        &self,
        payload: &ConditionedPayload,
    ) -> Result<Recognition, RecognitionError> {
        let token = self.access_token().await?;
        let image = STANDARD.encode(&payload.bytes);

        let mut form = vec![("image", image.as_str())];
        if self.mode.detects_direction() {
            form.push(("detect_direction", "true"));
        }
        form.extend_from_slice(self.mode.extra_params());

        let response = self
            .client
            .post(self.endpoint_url())
            .query(&[("access_token", token.as_str())])
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(RecognitionError::from_status(status.as_u16(), body));
        }

        let reply = serde_json::from_str::<OcrReply>(&body)
            .map_err(|e| RecognitionError::Parse(e.to_string()))?;

        match reply {
            OcrReply::Words(words) => Ok(words.into()),
            OcrReply::Form(form) => Ok(form.into()),
            OcrReply::Error {
                error_code,
                error_msg,
            } => {
                if TOKEN_CODES.contains(&error_code) {
                    self.invalidate_token().await;
                }
                Err(RecognitionError::from_api_error(error_code, error_msg))
            }
        }
    }
}
