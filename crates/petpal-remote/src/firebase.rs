//! Firebase Realtime Database over its REST API.
//!
//! Layout under the configured user location:
//!
//! ```text
//! {database_url}/{user_path}/
//!     {command_path}     "FOOD" | "WATER" | "WASTE" | ""   (single slot)
//!     {schedule_path}/   { foodRefillTimes: [...], waterRefillTimes: [...], ... }
//! ```
//!
//! Reads and writes are plain `GET`/`PUT` on `<location>.json`. The command
//! slot subscription is a long-lived `GET` with `Accept: text/event-stream`;
//! a background task parses the event stream, forwards changes, and
//! re-establishes the stream with capped backoff when it drops.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use petpal_core::constants::CLEARED_COMMAND;
use petpal_core::{RemoteConfig, ScheduleRecord};
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::{RemoteError, Result};
use crate::sse::{SseParser, StreamEvent};
use crate::traits::{CommandFeed, CommandNotification, RemoteStore};

const FEED_CAPACITY: usize = 32;
const FEED_BACKOFF_BASE: Duration = Duration::from_secs(1);
const FEED_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Remote store backed by a Firebase Realtime Database.
pub struct FirebaseStore {
    client: Client,
    config: RemoteConfig,
    base_url: String,
    subscription: Mutex<Option<CancellationToken>>,
}

impl FirebaseStore {
    /// Build a client for the configured database.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::InvalidUrl` without a usable `database_url`,
    /// or `RemoteError::Http` if the HTTP client cannot be built.
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let base_url = match config.database_url.as_deref() {
            Some(url) if url.starts_with("https://") || url.starts_with("http://") => {
                url.trim_end_matches('/').to_string()
            }
            other => return Err(RemoteError::InvalidUrl(other.unwrap_or_default().to_string())),
        };

        let client = Client::builder()
            .connect_timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
            subscription: Mutex::new(None),
        })
    }

    /// URL of a location below the user path.
    pub fn location_url(&self, path: &str) -> String {
        let user = self.config.user_path.trim_matches('/');
        let path = path.trim_matches('/');
        if user.is_empty() {
            format!("{}/{}.json", self.base_url, path)
        } else {
            format!("{}/{}/{}.json", self.base_url, user, path)
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        authorize(request, self.config.auth_token.as_deref())
    }

    fn replace_subscription(&self, token: Option<CancellationToken>) {
        let previous = {
            let mut slot = self
                .subscription
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, token)
        };
        if let Some(previous) = previous {
            previous.cancel();
        }
    }
}

impl std::fmt::Debug for FirebaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirebaseStore")
            .field("base_url", &self.base_url)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Drop for FirebaseStore {
    fn drop(&mut self) {
        self.replace_subscription(None);
    }
}

fn authorize(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.query(&[("auth", token)]),
        None => request,
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Status {
        status: status.as_u16(),
        body,
    })
}

impl RemoteStore for FirebaseStore {
    async fn fetch_schedule(&self) -> Result<Option<ScheduleRecord>> {
        let url = self.location_url(&self.config.schedule_path);
        trace!(url = %url, "Fetching schedule");

        let response = self
            .authorized(self.client.get(&url))
            .timeout(self.config.request_timeout())
            .send()
            .await?;
        let body = check_status(response).await?.text().await?;

        match serde_json::from_str::<Value>(&body)? {
            Value::Null => Ok(None),
            value => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    async fn clear_command(&self) -> Result<()> {
        let url = self.location_url(&self.config.command_path);
        let response = self
            .authorized(self.client.put(&url))
            .timeout(self.config.request_timeout())
            .json(&Value::from(CLEARED_COMMAND))
            .send()
            .await?;
        check_status(response).await?;
        debug!("Command slot cleared");
        Ok(())
    }
}

impl CommandFeed for FirebaseStore {
    async fn subscribe(&self) -> Result<mpsc::Receiver<CommandNotification>> {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let cancel = CancellationToken::new();

        let task = FeedTask {
            client: self.client.clone(),
            url: self.location_url(&self.config.command_path),
            auth_token: self.config.auth_token.clone(),
            idle_timeout: self.config.stream_idle_timeout(),
            tx,
            cancel: cancel.clone(),
        };
        self.replace_subscription(Some(cancel));

        info!(url = %task.url, "Subscribing to command slot");
        tokio::spawn(task.run());
        Ok(rx)
    }

    async fn unsubscribe(&self) {
        self.replace_subscription(None);
    }
}

/// Background task owning one subscription.
struct FeedTask {
    client: Client,
    url: String,
    auth_token: Option<String>,
    idle_timeout: Duration,
    tx: mpsc::Sender<CommandNotification>,
    cancel: CancellationToken,
}

impl FeedTask {
    async fn run(self) {
        let mut failures = 0u32;

        loop {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => break,
                outcome = self.stream_once(&mut failures) => outcome,
            };

            if self.tx.is_closed() {
                break;
            }
            if let Err(e) = &outcome {
                if !e.is_transient() {
                    error!("Command feed stopped: {}", e);
                    break;
                }
                warn!(failures = failures + 1, "Command feed interrupted: {}", e);
            }

            let delay = feed_backoff(failures);
            failures = failures.saturating_add(1);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!(url = %self.url, "Command feed task finished");
    }

    /// Consume one event stream until it ends or goes quiet for longer than
    /// the idle timeout. `Ok` means the receiver went away.
    async fn stream_once(&self, failures: &mut u32) -> Result<()> {
        let request = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream");
        let response = authorize(request, self.auth_token.as_deref()).send().await?;
        let response = check_status(response).await?;

        debug!(url = %self.url, "Command feed connected");
        *failures = 0;

        let mut parser = SseParser::new();
        let mut body = response.bytes_stream();

        // a half-open connection yields nothing, so silence ends the stream
        loop {
            let chunk = match tokio::time::timeout(self.idle_timeout, body.next()).await {
                Ok(Some(chunk)) => chunk?,
                Ok(None) => break,
                Err(_) => return Err(RemoteError::StreamIdle(self.idle_timeout)),
            };
            for raw in parser.feed(&chunk) {
                let event = match StreamEvent::from_sse(&raw) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(event = %raw.event, "Skipping malformed stream event: {}", e);
                        continue;
                    }
                };

                if let Some(e) = event.terminal_error() {
                    return Err(e);
                }

                match event {
                    StreamEvent::Put { path, data } | StreamEvent::Patch { path, data }
                        if path == "/" =>
                    {
                        trace!(payload = %data, "Command slot changed");
                        if self.tx.send(CommandNotification { payload: data }).await.is_err() {
                            return Ok(());
                        }
                    }
                    StreamEvent::Put { path, .. } | StreamEvent::Patch { path, .. } => {
                        debug!(path = %path, "Ignoring change below the command slot");
                    }
                    StreamEvent::KeepAlive => trace!("keep-alive"),
                    StreamEvent::Unknown(name) => debug!(event = %name, "Ignoring stream event"),
                    StreamEvent::Cancel(_) | StreamEvent::AuthRevoked(_) => {}
                }
            }
        }

        Err(RemoteError::StreamClosed)
    }
}

fn feed_backoff(failures: u32) -> Duration {
    FEED_BACKOFF_BASE
        .checked_mul(1u32 << failures.min(16))
        .map_or(FEED_BACKOFF_CAP, |delay| delay.min(FEED_BACKOFF_CAP))
}
