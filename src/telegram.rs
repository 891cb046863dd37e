use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, StatusCode, multipart};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;

const MAX_RETRIES: usize = 4;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error calling {method}: {source}")]
    Network {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Bot API rejected {method} with {code}: {description}")]
    Api {
        method: &'static str,
        code: u16,
        description: String,
    },
    #[error("Bot API kept rate-limiting {method}, retries exhausted")]
    RateLimited { method: &'static str },
    #[error("malformed Bot API response to {method}: {detail}")]
    Malformed { method: &'static str, detail: String },
}

impl TransportError {
    /// Whether the failure concerns one delivery rather than the bot as a
    /// whole. A bad token (401, or 404 for an unknown bot) and responses we
    /// cannot parse are not recoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            TransportError::Network { .. } | TransportError::RateLimited { .. } => true,
            TransportError::Api { code, .. } => !matches!(code, 401 | 404),
            TransportError::Malformed { .. } => false,
        }
    }
}

/// Delivery of outgoing messages. Chat ids are the same opaque strings the
/// user store is keyed by.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), TransportError>;

    /// Sends a PNG image with a caption.
    async fn send_chart(&self, chat_id: &str, png: &[u8], caption: &str) -> Result<(), TransportError>;
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
    parameters: Option<ResponseParameters>,
}

#[derive(Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Clone)]
pub struct TelegramClient {
    token: Arc<String>,
    api_base: Arc<String>,
    http: Arc<Client>,
    poll_timeout: Duration,
}

impl TelegramClient {
    /// Client for the Bot API at `api_base` (normally `https://api.telegram.org`).
    ///
    /// The HTTP timeout is kept above the long-poll timeout so `getUpdates`
    /// returns on its own before the request is cut.
    pub fn new(token: &str, api_base: &str, poll_timeout: Duration) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(poll_timeout + Duration::from_secs(15))
            .user_agent("lifeweeks-bot")
            .build()
            .map_err(|source| TransportError::Network {
                method: "client",
                source,
            })?;

        Ok(Self {
            token: Arc::new(token.to_string()),
            api_base: Arc::new(api_base.trim_end_matches('/').to_string()),
            http: Arc::new(http),
            poll_timeout,
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Sends one Bot API call with retry/backoff.
    ///
    /// `build` is called once per attempt because multipart bodies cannot be
    /// replayed.
    async fn call<T, F>(&self, method: &'static str, build: F) -> Result<T, TransportError>
    where
        T: DeserializeOwned,
        F: Fn(&Client, String) -> RequestBuilder,
    {
        let http: &Client = &self.http;
        let mut attempt = 0usize;

        loop {
            attempt += 1;

            let resp = build(http, self.url(method))
                .send()
                .await
                .map_err(|source| TransportError::Network { method, source })?;

            let status = resp.status();
            let header_wait = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());

            // The Bot API answers with a JSON envelope even on errors
            let body: ApiResponse<T> = match resp.json().await {
                Ok(body) => body,
                Err(e) if status.is_server_error() && attempt < MAX_RETRIES => {
                    debug!(method, attempt, error = %e, "unparseable 5xx body, retrying");
                    sleep(backoff(attempt)).await;
                    continue;
                }
                Err(e) if status.is_server_error() => {
                    return Err(TransportError::Api {
                        method,
                        code: status.as_u16(),
                        description: format!("unreadable response: {e}"),
                    });
                }
                Err(e) => {
                    return Err(TransportError::Malformed {
                        method,
                        detail: format!("HTTP {}: {e}", status.as_u16()),
                    });
                }
            };

            if body.ok {
                return body.result.ok_or(TransportError::Malformed {
                    method,
                    detail: "ok response without result".to_string(),
                });
            }

            let code = body.error_code.unwrap_or(status.as_u16());

            if code == StatusCode::TOO_MANY_REQUESTS.as_u16() {
                if attempt >= MAX_RETRIES {
                    return Err(TransportError::RateLimited { method });
                }
                let wait_secs = body
                    .parameters
                    .and_then(|p| p.retry_after)
                    .or(header_wait)
                    .unwrap_or(2);
                debug!(method, attempt, wait_secs, "rate limited");
                sleep(Duration::from_secs(wait_secs)).await;
                continue;
            }

            if code >= 500 && attempt < MAX_RETRIES {
                debug!(method, attempt, code, "server error, retrying");
                sleep(backoff(attempt)).await;
                continue;
            }

            return Err(TransportError::Api {
                method,
                code,
                description: body.description.unwrap_or_default(),
            });
        }
    }

    /// Long-polls for updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TransportError> {
        let timeout = self.poll_timeout.as_secs();
        self.call("getUpdates", |http, url| {
            http.post(url).json(&serde_json::json!({
                "offset": offset,
                "timeout": timeout,
                "allowed_updates": ["message"],
            }))
        })
        .await
    }

    /// Drops updates queued while the bot was offline; returns the next offset.
    pub async fn skip_pending(&self) -> Result<i64, TransportError> {
        let pending: Vec<Update> = self
            .call("getUpdates", |http, url| {
                http.post(url)
                    .json(&serde_json::json!({ "offset": -1, "timeout": 0 }))
            })
            .await?;
        Ok(pending.last().map(|u| u.update_id + 1).unwrap_or(0))
    }
}

fn backoff(attempt: usize) -> Duration {
    Duration::from_millis(250u64.saturating_mul(1 << (attempt - 1)))
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), TransportError> {
        let _: serde_json::Value = self
            .call("sendMessage", |http, url| {
                http.post(url).json(&serde_json::json!({
                    "chat_id": chat_id,
                    "text": text,
                }))
            })
            .await?;
        Ok(())
    }

    async fn send_chart(&self, chat_id: &str, png: &[u8], caption: &str) -> Result<(), TransportError> {
        let _: serde_json::Value = self
            .call("sendPhoto", |http, url| {
                let photo = multipart::Part::bytes(png.to_vec()).file_name("life-in-weeks.png");
                let form = multipart::Form::new()
                    .text("chat_id", chat_id.to_string())
                    .text("caption", caption.to_string())
                    .part("photo", photo);
                http.post(url).multipart(form)
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(server: &mockito::ServerGuard) -> TelegramClient {
        TelegramClient::new("TOKEN", &server.url(), Duration::from_secs(0)).unwrap()
    }

    #[tokio::test]
    async fn send_text_posts_chat_and_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/botTOKEN/sendMessage")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "chat_id": "42",
                "text": "hello",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true,"result":{"message_id":1}}"#)
            .create_async()
            .await;

        client(&server).send_text("42", "hello").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn blocked_user_is_recoverable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/botTOKEN/sendMessage")
            .with_status(403)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":false,"error_code":403,"description":"Forbidden: bot was blocked by the user"}"#)
            .create_async()
            .await;

        let err = client(&server).send_text("42", "hello").await.unwrap_err();
        assert!(matches!(err, TransportError::Api { code: 403, .. }));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn bad_token_is_not_recoverable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/botTOKEN/sendMessage")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#)
            .create_async()
            .await;

        let err = client(&server).send_text("42", "hello").await.unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("POST", "/botTOKEN/sendMessage")
            .with_status(502)
            .with_body("bad gateway")
            .expect(MAX_RETRIES)
            .create_async()
            .await;

        let err = client(&server).send_text("42", "hello").await.unwrap_err();
        failing.assert_async().await;
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn rate_limit_honours_retry_after() {
        let mut server = mockito::Server::new_async().await;
        let limited = server
            .mock("POST", "/botTOKEN/sendMessage")
            .with_status(429)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":false,"error_code":429,"description":"Too Many Requests","parameters":{"retry_after":0}}"#)
            .expect(MAX_RETRIES)
            .create_async()
            .await;

        let err = client(&server).send_text("42", "hello").await.unwrap_err();
        limited.assert_async().await;
        assert!(matches!(err, TransportError::RateLimited { .. }));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn chart_is_uploaded_as_photo() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/botTOKEN/sendPhoto")
            .match_header("content-type", Matcher::Regex("multipart/form-data".to_string()))
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="photo"; filename="life-in-weeks.png""#.to_string()),
                Matcher::Regex("Your life in weeks".to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true,"result":{"message_id":2}}"#)
            .create_async()
            .await;

        client(&server)
            .send_chart("42", b"png-bytes", "Your life in weeks")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn updates_are_decoded() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/botTOKEN/getUpdates")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"ok":true,"result":[
                    {"update_id":7,"message":{"message_id":1,"chat":{"id":42,"type":"private"},"text":"/start"}},
                    {"update_id":8,"edited_message":{}}
                ]}"#,
            )
            .create_async()
            .await;

        let updates = client(&server).get_updates(0).await.unwrap();
        assert_eq!(updates.len(), 2);
        let message = updates[0].message.as_ref().unwrap();
        assert_eq!(message.chat.id, 42);
        assert_eq!(message.text.as_deref(), Some("/start"));
        assert!(updates[1].message.is_none());
    }
}
