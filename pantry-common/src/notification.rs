use std::time;

use async_trait::async_trait;
use reqwest::header;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// A single push notification addressed to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
}

/// Enumeration of errors that can occur when sending a push notification.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("notification transport is not initialized")]
    NotInitialized,
    #[error("notification request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Where push notifications go. One `send` is one delivery attempt.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// False when the transport could not be set up at start-up.
    fn initialized(&self) -> bool;

    async fn send(&self, message: &PushMessage) -> Result<(), TransportError>;
}

#[derive(Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    notification: FcmNotification<'a>,
}

#[derive(Serialize)]
struct FcmRequest<'a> {
    message: FcmMessage<'a>,
}

struct FcmClient {
    client: reqwest::Client,
    endpoint: Url,
    access_token: String,
}

/// Sends notifications through the FCM HTTP v1 `messages:send` endpoint.
pub struct FcmTransport {
    inner: Option<FcmClient>,
}

impl FcmTransport {
    /// Build a transport from optional settings.
    ///
    /// Missing or invalid settings leave the transport uninitialized instead of
    /// failing start-up: the rest of the service keeps working and the notifier
    /// skips its runs.
    pub fn from_config(
        endpoint: Option<&str>,
        access_token: Option<&str>,
        request_timeout: time::Duration,
    ) -> Self {
        let (Some(endpoint), Some(access_token)) = (endpoint, access_token) else {
            warn!("FCM endpoint or access token not configured, notifications are disabled");
            return Self::uninitialized();
        };

        let endpoint = match Url::parse(endpoint) {
            Ok(url) => url,
            Err(error) => {
                warn!("invalid FCM endpoint {}: {}", endpoint, error);
                return Self::uninitialized();
            }
        };

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = match reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("Pantry Notifier")
            .timeout(request_timeout)
            .build()
        {
            Ok(client) => client,
            Err(error) => {
                warn!("failed to construct FCM client: {}", error);
                return Self::uninitialized();
            }
        };

        Self {
            inner: Some(FcmClient {
                client,
                endpoint,
                access_token: access_token.to_owned(),
            }),
        }
    }

    pub fn uninitialized() -> Self {
        Self { inner: None }
    }
}

#[async_trait]
impl NotificationTransport for FcmTransport {
    fn initialized(&self) -> bool {
        self.inner.is_some()
    }

    async fn send(&self, message: &PushMessage) -> Result<(), TransportError> {
        let fcm = self.inner.as_ref().ok_or(TransportError::NotInitialized)?;

        let request = FcmRequest {
            message: FcmMessage {
                token: &message.token,
                notification: FcmNotification {
                    title: &message.title,
                    body: &message.body,
                },
            },
        };

        let response = fcm
            .client
            .post(fcm.endpoint.clone())
            .bearer_auth(&fcm.access_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
