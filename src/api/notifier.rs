use crate::core::error::ClientError;
use crate::models::torrent::TorrentSnapshot;
use crate::utils::bytes::format_bytes;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// Torrent details attached to a notice
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TorrentSummary {
    pub name: String,
    pub hash: String,
    pub category: String,
    pub domain: String,
    pub size: String,
    pub total_size: String,
    pub progress: String,
}

impl TorrentSummary {
    pub fn new(torrent: &TorrentSnapshot) -> Self {
        Self {
            name: torrent.name.clone(),
            hash: torrent.hash.clone(),
            category: torrent.category.clone(),
            domain: torrent.domain().to_string(),
            size: format_bytes(torrent.size),
            total_size: format_bytes(torrent.total_size),
            progress: format!("{:.0}%", torrent.progress() * 100.0),
        }
    }
}

/// Operator-facing message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    /// Downloader instance name
    pub downloader: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub torrent: Option<TorrentSummary>,
    pub rule: String,
}

impl Notice {
    pub fn torrent(downloader: &str, torrent: &TorrentSnapshot, rule: impl Into<String>) -> Self {
        Self {
            downloader: downloader.to_string(),
            torrent: Some(TorrentSummary::new(torrent)),
            rule: rule.into(),
        }
    }

    pub fn general(downloader: &str, rule: impl Into<String>) -> Self {
        Self {
            downloader: downloader.to_string(),
            torrent: None,
            rule: rule.into(),
        }
    }
}

/// Fire-and-forget delivery of notices. Failures never reach the caller.
#[allow(async_fn_in_trait)]
pub trait Notifier {
    async fn notify(&self, notice: Notice);
}

/// Emits notices as log events
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn notify(&self, notice: Notice) {
        match &notice.torrent {
            Some(torrent) => info!(
                downloader = %notice.downloader,
                hash = %torrent.hash,
                name = %torrent.name,
                category = %torrent.category,
                domain = %torrent.domain,
                size = %torrent.size,
                rule = %notice.rule,
                "Notice"
            ),
            None => info!(downloader = %notice.downloader, rule = %notice.rule, "Notice"),
        }
    }
}

/// POSTs notices as JSON to a webhook
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self, ClientError> {
        url::Url::parse(url)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    async fn send(&self, notice: &Notice) -> Result<(), ClientError> {
        let response = self
            .client
            .post(&self.url)
            .json(notice)
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                endpoint: self.url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(ClientError::Status {
                endpoint: self.url.clone(),
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }
}

impl Notifier for WebhookNotifier {
    async fn notify(&self, notice: Notice) {
        if let Err(e) = self.send(&notice).await {
            warn!(error = %e, rule = %notice.rule, "Failed to deliver notice");
        }
    }
}

/// Webhook when configured, log output otherwise
pub enum AnyNotifier {
    Log(LogNotifier),
    Webhook(WebhookNotifier),
}

impl Notifier for AnyNotifier {
    async fn notify(&self, notice: Notice) {
        match self {
            AnyNotifier::Log(notifier) => notifier.notify(notice).await,
            AnyNotifier::Webhook(notifier) => notifier.notify(notice).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::torrent::TorrentState;
    use crate::utils::bytes::GIB;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};

    fn torrent() -> TorrentSnapshot {
        let mut torrent = TorrentSnapshot::fixture("abc", "Film-WiKi", TorrentState::Error);
        torrent.category = "movie".to_string();
        torrent.size = GIB;
        torrent.total_size = 2 * GIB;
        torrent.downloaded = GIB;
        torrent.resolve_domain(Some("pt.example.org"));
        torrent
    }

    #[test]
    fn test_notice_serialization() {
        let notice = Notice::torrent("qb1", &torrent(), "torrent reported an error");
        let json = serde_json::to_value(&notice).unwrap();

        assert_eq!(json["downloader"], "qb1");
        assert_eq!(json["torrent"]["domain"], "pt.example.org");
        assert_eq!(json["torrent"]["total_size"], "2.00 GB");
        assert_eq!(json["torrent"]["progress"], "50%");

        let general = serde_json::to_value(Notice::general("qb1", "login failed")).unwrap();
        assert!(general.get("torrent").is_none());
    }

    #[test]
    fn test_webhook_rejects_bad_url() {
        assert!(WebhookNotifier::new("not a url", 5).is_err());
    }

    #[tokio::test]
    async fn test_webhook_delivers_json() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let router = Router::new().route(
            "/hook",
            post(move |Json(body): Json<serde_json::Value>| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(body);
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let notifier = WebhookNotifier::new(&format!("http://{}/hook", addr), 5).unwrap();
        notifier
            .notify(Notice::torrent("qb1", &torrent(), "stalled"))
            .await;

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["rule"], "stalled");
    }

    #[tokio::test]
    async fn test_webhook_failure_is_swallowed() {
        // Nothing listens on the discard port
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook", 1).unwrap();
        notifier.notify(Notice::general("qb1", "login failed")).await;
    }
}
