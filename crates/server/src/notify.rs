//! Outbound e-mail transports.
//!
//! `log_only` writes every message to the log and is the default for local and
//! test environments. `live` posts to the GOV.UK Notify e-mail endpoint.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use resourcing_core::config::{NotifyConfig, NotifyMode};
use resourcing_core::notifications::OutboundMessage;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

const EMAIL_PATH: &str = "/v2/notifications/email";
const KEY_PART_LEN: usize = 36;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("notify.api_key is required when notify.mode is live")]
    MissingApiKey,
    #[error("notify.api_key is malformed")]
    MalformedApiKey,
    #[error("could not sign notify request: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
    #[error("notify request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notify rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl TransportError {
    /// Network failures, rate limiting and server errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::MissingApiKey | Self::MalformedApiKey | Self::Signing(_) => false,
        }
    }
}

#[async_trait]
pub trait NotifyTransport: Send + Sync {
    fn mode(&self) -> &'static str;
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;
}

pub fn transport_for(config: &NotifyConfig) -> Result<Box<dyn NotifyTransport>, TransportError> {
    match config.mode {
        NotifyMode::LogOnly => Ok(Box::new(LogOnlyTransport)),
        NotifyMode::Live => Ok(Box::new(GovNotifyTransport::new(config)?)),
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LogOnlyTransport;

#[async_trait]
impl NotifyTransport for LogOnlyTransport {
    fn mode(&self) -> &'static str {
        "log_only"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        info!(
            event_name = "notify.message.logged",
            recipient = %message.recipient.0,
            email_address = %message.email_address,
            scenario = message.scenario.as_str(),
            template_id = %message.template_id,
            personalisation = ?message.personalisation,
            "notification not sent in log_only mode"
        );
        Ok(())
    }
}

pub struct GovNotifyTransport {
    client: reqwest::Client,
    endpoint: String,
    service_id: String,
    secret_key: SecretString,
}

#[derive(Serialize)]
struct NotifyClaims<'a> {
    iss: &'a str,
    iat: i64,
}

#[derive(Serialize)]
struct EmailRequest<'a> {
    email_address: &'a str,
    template_id: &'a str,
    personalisation: &'a std::collections::BTreeMap<String, String>,
}

impl GovNotifyTransport {
    pub fn new(config: &NotifyConfig) -> Result<Self, TransportError> {
        let api_key = config.api_key.as_ref().ok_or(TransportError::MissingApiKey)?;
        let (service_id, secret_key) = split_api_key(api_key.expose_secret())?;
        let client =
            reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}{EMAIL_PATH}", config.base_url.trim_end_matches('/')),
            service_id,
            secret_key: SecretString::from(secret_key),
        })
    }

    fn bearer_token(&self) -> Result<String, TransportError> {
        let claims = NotifyClaims { iss: &self.service_id, iat: Utc::now().timestamp() };
        let key = EncodingKey::from_secret(self.secret_key.expose_secret().as_bytes());
        Ok(encode(&Header::default(), &claims, &key)?)
    }
}

#[async_trait]
impl NotifyTransport for GovNotifyTransport {
    fn mode(&self) -> &'static str {
        "live"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let body = EmailRequest {
            email_address: &message.email_address,
            template_id: &message.template_id,
            personalisation: &message.personalisation,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.bearer_token()?)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Rejected { status: status.as_u16(), body })
    }
}

/// Notify keys end in `{service_id}-{secret_key}`, both 36-character UUIDs.
fn split_api_key(api_key: &str) -> Result<(String, String), TransportError> {
    let api_key = api_key.trim();
    let minimum = KEY_PART_LEN * 2 + 1;
    if !api_key.is_ascii() || api_key.len() < minimum {
        return Err(TransportError::MalformedApiKey);
    }

    let secret_start = api_key.len() - KEY_PART_LEN;
    let service_start = secret_start - 1 - KEY_PART_LEN;
    if &api_key[secret_start - 1..secret_start] != "-" {
        return Err(TransportError::MalformedApiKey);
    }

    Ok((
        api_key[service_start..secret_start - 1].to_string(),
        api_key[secret_start..].to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
    use resourcing_core::config::{AppConfig, NotifyMode};
    use resourcing_core::domain::user::UserId;
    use resourcing_core::notifications::{NotificationScenario, OutboundMessage};
    use secrecy::SecretString;
    use serde::Deserialize;

    use super::{split_api_key, transport_for, GovNotifyTransport, TransportError};

    const SERVICE_ID: &str = "26785a09-ab16-4eb0-8407-a37497a57506";
    const SECRET: &str = "3d844edf-8d35-48ac-975b-e847b4f122b0";

    fn api_key() -> String {
        format!("resourcing_test-{SERVICE_ID}-{SECRET}")
    }

    #[derive(Deserialize)]
    struct Claims {
        iss: String,
        iat: i64,
    }

    #[test]
    fn api_key_splits_into_service_id_and_secret() {
        let (service_id, secret) = split_api_key(&api_key()).expect("valid key");
        assert_eq!(service_id, SERVICE_ID);
        assert_eq!(secret, SECRET);

        assert!(matches!(split_api_key("too-short"), Err(TransportError::MalformedApiKey)));
    }

    #[test]
    fn bearer_token_is_signed_with_the_secret_and_issued_by_the_service() {
        let mut config = AppConfig::default().notify;
        config.mode = NotifyMode::Live;
        config.api_key = Some(SecretString::from(api_key()));

        let transport = GovNotifyTransport::new(&config).expect("transport");
        let token = transport.bearer_token().expect("token");

        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        let claims = decode::<Claims>(&token, &DecodingKey::from_secret(SECRET.as_bytes()), &validation)
            .expect("token verifies")
            .claims;
        assert_eq!(claims.iss, SERVICE_ID);
        assert!(claims.iat > 0);
    }

    #[test]
    fn live_mode_without_key_is_rejected() {
        let mut config = AppConfig::default().notify;
        config.mode = NotifyMode::Live;

        assert!(matches!(transport_for(&config).err(), Some(TransportError::MissingApiKey)));
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(TransportError::Rejected { status: 503, body: String::new() }.is_retryable());
        assert!(TransportError::Rejected { status: 429, body: String::new() }.is_retryable());
        assert!(!TransportError::Rejected { status: 400, body: String::new() }.is_retryable());
        assert!(!TransportError::MalformedApiKey.is_retryable());
    }

    #[tokio::test]
    async fn log_only_transport_accepts_every_message() {
        let transport = transport_for(&AppConfig::default().notify).expect("log only");
        assert_eq!(transport.mode(), "log_only");

        let message = OutboundMessage {
            recipient: UserId("requestor".to_string()),
            email_address: "requestor@example.gov.uk".to_string(),
            scenario: NotificationScenario::CommentLeft,
            template_id: "template-comment".to_string(),
            personalisation: BTreeMap::new(),
        };
        transport.send(&message).await.expect("logged");
    }
}
