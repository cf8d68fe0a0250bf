//! Upstream HTTP client
//!
//! One pooled `reqwest::Client` shared by descriptor downloads and batch
//! uploads. Every endpoint exists on a primary and a mirror server; a
//! failed call moves on to the next server. An expired token (401) is
//! renewed once per call.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::descriptor::{parse_device, parse_object, Envelope};
use super::{BatchUploader, UpstreamApi};
use crate::error::{GatewaySrvError, Result};
use crate::model::{DeviceDescriptor, ObjectSpec, ObjectType};

const LOGIN_PATH: &str = "/auth/rest/login";
const LOGOUT_PATH: &str = "/auth/secure/logout";
const GET_PATH: &str = "/vbas/gate/get";
const LIGHT_PATH: &str = "/vbas/gate/light";

/// Upstream server settings (`http.*`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpUpstreamConfig {
    /// Base URL for login and descriptor downloads
    pub server_get: String,
    /// Base URLs for batch uploads, primary first
    #[serde(deserialize_with = "crate::config::string_list")]
    pub servers_post: Vec<String>,
    pub login: String,
    pub password: String,
    /// Per-request timeout
    #[serde(with = "crate::config::duration_secs")]
    pub timeout: Duration,
    /// Attempts per server before failing over
    pub retry: u32,
}

impl Default for HttpUpstreamConfig {
    fn default() -> Self {
        Self {
            server_get: "http://127.0.0.1:8000".to_string(),
            servers_post: Vec::new(),
            login: String::new(),
            password: String::new(),
            timeout: Duration::from_secs(10),
            retry: 3,
        }
    }
}

impl HttpUpstreamConfig {
    /// Servers for GET calls: `server_get`, then the upload servers as mirrors
    pub fn get_servers(&self) -> Vec<String> {
        let mut servers = vec![normalize(&self.server_get)];
        for server in &self.servers_post {
            let server = normalize(server);
            if !servers.contains(&server) {
                servers.push(server);
            }
        }
        servers.retain(|s| !s.is_empty());
        servers
    }

    /// Servers for batch uploads; falls back to `server_get`
    pub fn post_servers(&self) -> Vec<String> {
        let servers: Vec<String> = self
            .servers_post
            .iter()
            .map(|s| normalize(s))
            .filter(|s| !s.is_empty())
            .collect();
        if servers.is_empty() {
            self.get_servers()
        } else {
            servers
        }
    }
}

fn normalize(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// MD5 hex digest sent as the login password
pub fn password_digest(password: &str) -> String {
    format!("{:x}", md5::compute(password.as_bytes()))
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    login: &'a str,
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
    #[serde(default)]
    user_id: Option<serde_json::Value>,
    #[serde(default)]
    auth_user_id: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// Login, descriptors and logout: sticky on the last good server
    Download,
    /// Batch uploads: always primary first
    Upload,
}

struct Inner {
    config: HttpUpstreamConfig,
    client: Client,
    get_servers: Vec<String>,
    post_servers: Vec<String>,
    /// Index into `get_servers` of the last server that answered
    active: AtomicUsize,
    token: RwLock<Option<String>>,
    uploads: TaskTracker,
}

/// Session with the building-automation server
#[derive(Clone)]
pub struct HttpUpstream {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for HttpUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpUpstream")
            .field("get_servers", &self.inner.get_servers)
            .field("post_servers", &self.inner.post_servers)
            .field("logged_in", &self.is_logged_in())
            .finish()
    }
}

impl HttpUpstream {
    pub fn new(config: HttpUpstreamConfig) -> Result<Self> {
        let get_servers = config.get_servers();
        if get_servers.is_empty() {
            return Err(GatewaySrvError::config("No upstream HTTP server configured"));
        }
        let post_servers = config.post_servers();
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                client,
                get_servers,
                post_servers,
                active: AtomicUsize::new(0),
                token: RwLock::new(None),
                uploads: TaskTracker::new(),
            }),
        })
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.token.read().is_some()
    }

    /// Server GET calls currently start from
    pub fn active_server(&self) -> &str {
        let idx = self.inner.active.load(Ordering::Relaxed) % self.inner.get_servers.len();
        &self.inner.get_servers[idx]
    }

    /// Wait for in-flight uploads, up to `timeout`
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.inner.uploads.close();
        let drained = tokio::time::timeout(timeout, self.inner.uploads.wait())
            .await
            .is_ok();
        self.inner.uploads.reopen();
        drained
    }

    /// POST one device batch, trying every upload server in order
    pub async fn post_batch(&self, device_id: u32, batch: String) -> Result<()> {
        let path = format!("{}/{}", LIGHT_PATH, device_id);
        self.send(Route::Upload, |client, base| {
            client
                .post(format!("{}{}", base, path))
                .header(reqwest::header::CONTENT_TYPE, "text/plain")
                .body(batch.clone())
        })
        .await?;
        debug!("Device {}: batch uploaded", device_id);
        Ok(())
    }

    async fn get_envelope(&self, path: &str) -> Result<Vec<serde_json::Value>> {
        let response = self
            .send(Route::Download, |client, base| {
                client.get(format!("{}{}", base, path))
            })
            .await?;
        let envelope: Envelope = response.json().await?;
        envelope.into_data()
    }

    async fn login_at(&self, base: &str) -> Result<()> {
        let request = LoginRequest {
            login: &self.inner.config.login,
            password: password_digest(&self.inner.config.password),
        };
        let response = self
            .inner
            .client
            .post(format!("{}{}", base, LOGIN_PATH))
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GatewaySrvError::upstream(format!(
                "Login at {} failed: {}",
                base,
                response.status()
            )));
        }

        let body: LoginResponse = response.json().await?;
        debug!(
            "Logged in at {} (user {:?}, auth user {:?})",
            base, body.user_id, body.auth_user_id
        );
        *self.inner.token.write() = Some(body.token);
        Ok(())
    }

    /// Send a request built per server, failing over along the route
    async fn send<F>(&self, route: Route, build: F) -> Result<Response>
    where
        F: Fn(&Client, &str) -> RequestBuilder,
    {
        let (servers, start) = match route {
            Route::Download => (
                &self.inner.get_servers,
                self.inner.active.load(Ordering::Relaxed),
            ),
            Route::Upload => (&self.inner.post_servers, 0),
        };
        let attempts = self.inner.config.retry.max(1);
        let mut last_error = GatewaySrvError::upstream("No server tried");

        for offset in 0..servers.len() {
            let idx = (start + offset) % servers.len();
            let base = &servers[idx];
            let mut relogged = false;
            let mut attempt = 0;

            while attempt < attempts {
                attempt += 1;
                let mut request = build(&self.inner.client, base);
                let token = self.inner.token.read().clone();
                if let Some(token) = token {
                    request = request.bearer_auth(token);
                }

                match request.send().await {
                    Ok(resp) if resp.status() == StatusCode::UNAUTHORIZED && !relogged => {
                        info!("Token rejected by {}, logging in again", base);
                        relogged = true;
                        attempt -= 1;
                        if let Err(e) = self.login_at(base).await {
                            last_error = e;
                            break;
                        }
                    },
                    Ok(resp) if resp.status().is_success() => {
                        if route == Route::Download {
                            self.inner.active.store(idx, Ordering::Relaxed);
                        }
                        return Ok(resp);
                    },
                    Ok(resp) => {
                        last_error = GatewaySrvError::upstream(format!(
                            "{} answered {}",
                            base,
                            resp.status()
                        ));
                        debug!("Attempt {}/{}: {}", attempt, attempts, last_error);
                    },
                    Err(e) => {
                        last_error = e.into();
                        debug!("Attempt {}/{}: {}", attempt, attempts, last_error);
                    },
                }
            }

            if offset + 1 < servers.len() {
                warn!("Server {} failed ({}), switching to mirror", base, last_error);
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl UpstreamApi for HttpUpstream {
    async fn login(&self) -> Result<()> {
        let servers = &self.inner.get_servers;
        let start = self.inner.active.load(Ordering::Relaxed);
        let mut last_error = GatewaySrvError::upstream("No server tried");
        for offset in 0..servers.len() {
            let idx = (start + offset) % servers.len();
            match self.login_at(&servers[idx]).await {
                Ok(()) => {
                    self.inner.active.store(idx, Ordering::Relaxed);
                    info!("Logged in to {}", servers[idx]);
                    return Ok(());
                },
                Err(e) => {
                    warn!("Login at {} failed: {}", servers[idx], e);
                    last_error = e;
                },
            }
        }
        Err(last_error)
    }

    async fn device_descriptor(&self, device_id: u32) -> Result<DeviceDescriptor> {
        let path = format!("{}/{}/{}", GET_PATH, device_id, ObjectType::Device.dashed());
        let data = self.get_envelope(&path).await?;
        parse_device(device_id, &data)
    }

    async fn device_objects(
        &self,
        descriptor: &DeviceDescriptor,
        object_type: ObjectType,
    ) -> Result<Vec<ObjectSpec>> {
        let path = format!(
            "{}/{}/{}",
            GET_PATH,
            descriptor.device_id,
            object_type.dashed()
        );
        let data = self.get_envelope(&path).await?;
        data.iter()
            .map(|entry| parse_object(descriptor, object_type, entry))
            .collect()
    }

    async fn logout(&self) -> Result<()> {
        if !self.is_logged_in() {
            return Ok(());
        }
        let result = self
            .send(Route::Download, |client, base| {
                client.get(format!("{}{}", base, LOGOUT_PATH))
            })
            .await;
        *self.inner.token.write() = None;
        result.map(|_| info!("Logged out"))
    }
}

impl BatchUploader for HttpUpstream {
    fn submit(&self, device_id: u32, batch: String) {
        let upstream = self.clone();
        self.inner.uploads.spawn(async move {
            if let Err(e) = upstream.post_batch(device_id, batch).await {
                error!("Device {}: batch upload failed: {}", device_id, e);
            }
        });
    }
}
