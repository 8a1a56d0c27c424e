//! Out-of-band push notifications to parties other than the sender.
//!
//! The reply to the sender travels back in the HTTP response; everything
//! addressed to a counterpart goes through a [`Notifier`].

use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::error::format_error_chain;

/// Fire-and-forget delivery of a text to an external identity.
///
/// Implementations log delivery failures themselves; callers never see them.
pub trait Notifier: Send + Sync {
    fn push(&self, external_id: &str, text: &str);
}

#[derive(Serialize)]
struct PushRequest<'a> {
    to: &'a str,
    text: &'a str,
}

/// Posts `{ "to": ..., "text": ... }` to the configured push endpoint.
///
/// The endpoint is read from the dynamic config on every push, so a settings
/// update takes effect immediately. With no endpoint configured the push is
/// only logged.
pub struct HttpPushNotifier {
    client: Client,
    runtime_config: Arc<RuntimeConfig>,
}

impl HttpPushNotifier {
    pub fn new(runtime_config: Arc<RuntimeConfig>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build push client, using defaults");
                Client::new()
            });

        Self {
            client,
            runtime_config,
        }
    }
}

/// Outcome of handing a push to [`HttpPushNotifier`]
#[derive(Debug)]
enum Delivery {
    /// No endpoint configured
    Logged,
    /// Issued outside an async runtime
    Dropped,
    Sent(JoinHandle<()>),
}

impl HttpPushNotifier {
    fn deliver(&self, external_id: &str, text: &str) -> Delivery {
        let Some(url) = self.runtime_config.dynamic().notify.push_url.clone() else {
            LogNotifier.push(external_id, text);
            return Delivery::Logged;
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(to = %external_id, "No async runtime available, push dropped");
            return Delivery::Dropped;
        };

        let client = self.client.clone();
        let to = external_id.to_string();
        let text = text.to_string();

        Delivery::Sent(handle.spawn(async move {
            let result = client
                .post(&url)
                .json(&PushRequest { to: &to, text: &text })
                .send()
                .await
                .and_then(|resp| resp.error_for_status());

            match result {
                Ok(_) => debug!(to = %to, "Push delivered"),
                Err(e) => warn!(to = %to, url = %url, error = %format_error_chain(&e), "Push delivery failed"),
            }
        }))
    }
}

impl Notifier for HttpPushNotifier {
    fn push(&self, external_id: &str, text: &str) {
        self.deliver(external_id, text);
    }
}

/// Logs pushes instead of delivering them
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn push(&self, external_id: &str, text: &str) {
        info!(to = %external_id, text = %text, "Push notification (not delivered)");
    }
}
