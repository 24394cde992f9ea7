use crate::core::config::ClientConfig;
use crate::core::error::ClientError;
use crate::models::torrent::{FileEntry, TorrentSnapshot};
use reqwest::header::{HeaderMap, CONTENT_TYPE, COOKIE, REFERER, SET_COOKIE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Operations the pass runner needs from a BitTorrent client.
#[allow(async_fn_in_trait)]
pub trait Downloader {
    /// Establish a session. Must succeed before any other call.
    async fn login(&mut self) -> Result<(), ClientError>;

    async fn list_torrents(&self) -> Result<Vec<TorrentSnapshot>, ClientError>;

    async fn list_files(&self, hash: &str) -> Result<Vec<FileEntry>, ClientError>;

    async fn set_file_priority(
        &self,
        hash: &str,
        indices: &[usize],
        priority: u8,
    ) -> Result<(), ClientError>;

    async fn resume(&self, hash: &str) -> Result<(), ClientError>;

    async fn pause(&self, hash: &str) -> Result<(), ClientError>;

    async fn delete(&self, hash: &str, delete_files: bool) -> Result<(), ClientError>;
}

/// qBittorrent Web API v2 client
pub struct QbClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    sid: Option<String>,
}

#[derive(Debug, Serialize)]
struct LoginForm<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct HashForm<'a> {
    hash: &'a str,
}

#[derive(Debug, Serialize)]
struct HashesForm<'a> {
    hashes: &'a str,
}

#[derive(Debug, Serialize)]
struct FilePriorityForm<'a> {
    hash: &'a str,
    /// File indices joined with `|`
    id: String,
    priority: u8,
}

#[derive(Debug, Serialize)]
struct DeleteForm<'a> {
    hashes: &'a str,
    #[serde(rename = "deleteFiles")]
    delete_files: bool,
}

impl QbClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        url::Url::parse(&config.url)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            sid: None,
        })
    }

    pub fn has_session(&self) -> bool {
        self.sid.is_some()
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn post_form<T: Serialize>(
        &self,
        endpoint: &str,
        form: &T,
    ) -> Result<reqwest::Response, ClientError> {
        let sid = self.sid.as_deref().ok_or(ClientError::NoSession)?;
        let body = serde_urlencoded::to_string(form).map_err(|source| ClientError::Encode {
            endpoint: endpoint.to_string(),
            source,
        })?;

        let response = self
            .client
            .post(self.url(endpoint))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(COOKIE, format!("SID={}", sid))
            .body(body)
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                endpoint: endpoint.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(ClientError::Status {
                endpoint: endpoint.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(response)
    }

    async fn post_json<T: Serialize, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        form: &T,
    ) -> Result<R, ClientError> {
        self.post_form(endpoint, form)
            .await?
            .json::<R>()
            .await
            .map_err(|source| ClientError::Decode {
                endpoint: endpoint.to_string(),
                source,
            })
    }

    /// qBittorrent 5 renamed resume/pause to start/stop; the old names answer 404 there.
    async fn post_renamed<T: Serialize>(
        &self,
        legacy: &str,
        current: &str,
        form: &T,
    ) -> Result<(), ClientError> {
        match self.post_form(legacy, form).await {
            Ok(_) => Ok(()),
            Err(ClientError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                debug!(legacy = legacy, current = current, "Falling back to renamed endpoint");
                self.post_form(current, form).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }
}

impl Downloader for QbClient {
    async fn login(&mut self) -> Result<(), ClientError> {
        let endpoint = "/api/v2/auth/login";
        let body = serde_urlencoded::to_string(LoginForm {
            username: &self.username,
            password: &self.password,
        })
        .map_err(|source| ClientError::Encode {
            endpoint: endpoint.to_string(),
            source,
        })?;

        let response = self
            .client
            .post(self.url(endpoint))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(REFERER, self.base_url.as_str())
            .body(body)
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Err(ClientError::Authentication(
                "IP banned after too many failed logins".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(ClientError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        let sid = session_cookie(response.headers());
        let text = response.text().await.map_err(|source| ClientError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })?;

        match sid {
            Some(sid) if text.trim() != "Fails." => {
                self.sid = Some(sid);
                Ok(())
            }
            Some(_) => Err(ClientError::Authentication(text.trim().to_string())),
            None => Err(ClientError::Authentication(format!(
                "no session cookie in response ({})",
                text.trim()
            ))),
        }
    }

    async fn list_torrents(&self) -> Result<Vec<TorrentSnapshot>, ClientError> {
        self.post_json("/api/v2/torrents/info", &[("filter", "all")])
            .await
    }

    async fn list_files(&self, hash: &str) -> Result<Vec<FileEntry>, ClientError> {
        self.post_json("/api/v2/torrents/files", &HashForm { hash })
            .await
    }

    async fn set_file_priority(
        &self,
        hash: &str,
        indices: &[usize],
        priority: u8,
    ) -> Result<(), ClientError> {
        let form = FilePriorityForm {
            hash,
            id: join_indices(indices),
            priority,
        };

        self.post_form("/api/v2/torrents/filePrio", &form)
            .await
            .map(|_| ())
    }

    async fn resume(&self, hash: &str) -> Result<(), ClientError> {
        self.post_renamed(
            "/api/v2/torrents/resume",
            "/api/v2/torrents/start",
            &HashesForm { hashes: hash },
        )
        .await
    }

    async fn pause(&self, hash: &str) -> Result<(), ClientError> {
        self.post_renamed(
            "/api/v2/torrents/pause",
            "/api/v2/torrents/stop",
            &HashesForm { hashes: hash },
        )
        .await
    }

    async fn delete(&self, hash: &str, delete_files: bool) -> Result<(), ClientError> {
        let form = DeleteForm {
            hashes: hash,
            delete_files,
        };

        self.post_form("/api/v2/torrents/delete", &form)
            .await
            .map(|_| ())
    }
}

/// Value of the `SID` cookie among the `set-cookie` headers.
fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .find_map(|pair| pair.trim().strip_prefix("SID="))
        .filter(|sid| !sid.is_empty())
        .map(str::to_string)
}

fn join_indices(indices: &[usize]) -> String {
    indices
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join("|")
}
