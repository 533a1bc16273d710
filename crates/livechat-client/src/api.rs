//! Room metadata lookups over the public REST API.
//!
//! Every endpoint answers with the same envelope:
//!
//! ```json
//! { "code": 0, "message": "0", "data": { ... } }
//! ```
//!
//! A non-zero `code` is an application error even when the HTTP status is
//! 200.

use std::time::Duration;

use livechat_protocol::{Liver, Room};
use reqwest::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::{ClientConfig, ClientError, ProtocolClient, ServerInfo};

pub const LIVE_API_BASE: &str = "https://api.live.bilibili.com";
pub const MAIN_API_BASE: &str = "https://api.bilibili.com";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/102.0.0.0 Safari/537.36";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RoomData {
    room_id: i64,
    uid: i64,
    #[serde(default)]
    live_status: i64,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct SpaceData {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct DanmuData {
    token: String,
    #[serde(default)]
    host_list: Vec<HostData>,
}

#[derive(Debug, Deserialize)]
struct HostData {
    host: String,
    wss_port: u16,
}

/// HTTP client for room, streamer and chat-server lookups.
///
/// Responses may be gzip, deflate or brotli encoded; `reqwest` decodes them
/// transparently.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    live_base: String,
    main_base: String,
    client_config: ClientConfig,
}

impl ApiClient {
    /// A client for the production endpoints.
    pub fn new() -> Result<Self, ClientError> {
        Self::with_base_urls(LIVE_API_BASE, MAIN_API_BASE)
    }

    /// A client for alternative endpoints, e.g. a local test server.
    pub fn with_base_urls(
        live_base: impl Into<String>,
        main_base: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9"));
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            live_base: live_base.into(),
            main_base: main_base.into(),
            client_config: ClientConfig::default(),
        })
    }

    /// Settings for clients built by [`chat_client`](Self::chat_client).
    pub fn with_client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = config;
        self
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ClientError> {
        tracing::debug!(url, ?query, "api request");
        let envelope: Envelope<T> = self
            .http
            .get(url)
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if envelope.code != 0 {
            return Err(ClientError::Api {
                code: envelope.code,
                message: envelope.message,
            });
        }
        envelope.data.ok_or_else(|| ClientError::Api {
            code: 0,
            message: format!("{url}: response has no data"),
        })
    }

    /// Resolves a (possibly short) room id, including its streamer.
    pub async fn room_info(&self, room_id: i64) -> Result<Room, ClientError> {
        let url = format!("{}/room/v1/Room/get_info", self.live_base);
        let data: RoomData = self.get(&url, &[("room_id", room_id.to_string())]).await?;
        let liver = self.liver_info(data.uid).await?;
        Ok(Room {
            id: room_id,
            real_id: data.room_id,
            title: data.title,
            is_live: data.live_status == 1,
            liver,
        })
    }

    pub async fn liver_info(&self, uid: i64) -> Result<Liver, ClientError> {
        let url = format!("{}/x/space/acc/info", self.main_base);
        let data: SpaceData = self.get(&url, &[("mid", uid.to_string())]).await?;
        Ok(Liver {
            uid,
            uname: data.name,
        })
    }

    /// Chat server address and join token for a canonical room id.
    pub async fn danmu_info(&self, real_room_id: i64) -> Result<ServerInfo, ClientError> {
        let url = format!("{}/xlive/web-room/v1/index/getDanmuInfo", self.live_base);
        let data: DanmuData = self
            .get(
                &url,
                &[("id", real_room_id.to_string()), ("type", "0".to_string())],
            )
            .await?;
        let host = data.host_list.first().ok_or_else(|| ClientError::Api {
            code: 0,
            message: format!("room {real_room_id}: empty host list"),
        })?;
        Ok(ServerInfo::wss(&host.host, host.wss_port, data.token))
    }

    /// Looks up everything needed and builds a disconnected client.
    pub async fn chat_client(&self, room_id: i64) -> Result<ProtocolClient, ClientError> {
        let room = self.room_info(room_id).await?;
        let server = self.danmu_info(room.real_id).await?;
        tracing::info!(
            room_id,
            real_id = room.real_id,
            liver = %room.liver.uname,
            live = room.is_live,
            "room resolved"
        );
        Ok(ProtocolClient::new(room, server, self.client_config.clone()))
    }
}
