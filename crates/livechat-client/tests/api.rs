//! Tests for the metadata lookups against a minimal local HTTP server.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use flate2::Compression;
use flate2::write::GzEncoder;
use livechat_client::{ApiClient, ClientError, ClientState};
use livechat_protocol::{Version, compress};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

// =========================================================================
// Helpers
// =========================================================================

/// A canned response body, optionally sent with a `content-encoding`.
struct Reply {
    body: Vec<u8>,
    encoding: Option<&'static str>,
}

impl From<String> for Reply {
    fn from(body: String) -> Self {
        Self {
            body: body.into_bytes(),
            encoding: None,
        }
    }
}

/// Serves a fixed JSON body per path (query string ignored) and returns the
/// base URL. Unknown paths get a 404.
async fn serve<R: Into<Reply>>(routes: HashMap<&'static str, R>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let routes: Arc<HashMap<&'static str, Reply>> =
        Arc::new(routes.into_iter().map(|(k, v)| (k, v.into())).collect());

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let routes = Arc::clone(&routes);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut read = 0;
                while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf[read..]).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => read += n,
                    }
                }
                let request = String::from_utf8_lossy(&buf[..read]);
                let target = request.split_whitespace().nth(1).unwrap_or("/");
                let path = target.split('?').next().unwrap_or(target);

                let response = match routes.get(path) {
                    Some(reply) => {
                        let encoding = reply
                            .encoding
                            .map(|e| format!("content-encoding: {e}\r\n"))
                            .unwrap_or_default();
                        let mut response = format!(
                            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\
                             {encoding}content-length: {}\r\nconnection: close\r\n\r\n",
                            reply.body.len()
                        )
                        .into_bytes();
                        response.extend_from_slice(&reply.body);
                        response
                    }
                    None => b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\
                              connection: close\r\n\r\n"
                        .to_vec(),
                };
                let _ = stream.write_all(&response).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    base
}

fn ok(data: serde_json::Value) -> String {
    serde_json::json!({"code": 0, "message": "0", "data": data}).to_string()
}

fn happy_routes() -> HashMap<&'static str, String> {
    HashMap::from([
        (
            "/room/v1/Room/get_info",
            ok(serde_json::json!({
                "room_id": 21452505, "uid": 434334701, "live_status": 1, "title": "evening stream"
            })),
        ),
        (
            "/x/space/acc/info",
            ok(serde_json::json!({"mid": 434334701, "name": "streamer"})),
        ),
        (
            "/xlive/web-room/v1/index/getDanmuInfo",
            ok(serde_json::json!({
                "token": "abc123",
                "host_list": [
                    {"host": "a.chat.example", "port": 2243, "wss_port": 443, "ws_port": 2244},
                    {"host": "b.chat.example", "port": 2243, "wss_port": 443, "ws_port": 2244}
                ]
            })),
        ),
    ])
}

// =========================================================================
// Lookups
// =========================================================================

#[tokio::test]
async fn test_room_info_resolves_real_id_and_liver() {
    let base = serve(happy_routes()).await;
    let api = ApiClient::with_base_urls(&base, &base).unwrap();

    let room = api.room_info(6).await.unwrap();
    assert_eq!(room.id, 6);
    assert_eq!(room.real_id, 21452505);
    assert!(room.is_live);
    assert_eq!(room.title, "evening stream");
    assert_eq!(room.liver.uid, 434334701);
    assert_eq!(room.liver.uname, "streamer");
}

#[tokio::test]
async fn test_danmu_info_uses_first_host() {
    let base = serve(happy_routes()).await;
    let api = ApiClient::with_base_urls(&base, &base).unwrap();

    let server = api.danmu_info(21452505).await.unwrap();
    assert_eq!(server.url, "wss://a.chat.example:443/sub");
    assert_eq!(server.token, "abc123");
}

#[tokio::test]
async fn test_chat_client_is_built_disconnected() {
    let base = serve(happy_routes()).await;
    let api = ApiClient::with_base_urls(&base, &base).unwrap();

    let client = api.chat_client(6).await.unwrap();
    assert_eq!(client.state(), ClientState::Disconnected);
    assert_eq!(client.room().real_id, 21452505);
    assert_eq!(client.server().token, "abc123");
}

// =========================================================================
// Compressed responses
// =========================================================================

fn gzip(body: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

fn liver_reply(body: Vec<u8>, encoding: &'static str) -> HashMap<&'static str, Reply> {
    HashMap::from([(
        "/x/space/acc/info",
        Reply {
            body,
            encoding: Some(encoding),
        },
    )])
}

fn liver_body() -> String {
    ok(serde_json::json!({"mid": 7, "name": "compressed streamer"}))
}

#[tokio::test]
async fn test_gzip_response_is_decoded() {
    let base = serve(liver_reply(gzip(&liver_body()), "gzip")).await;
    let api = ApiClient::with_base_urls(&base, &base).unwrap();

    let liver = api.liver_info(7).await.unwrap();
    assert_eq!(liver.uname, "compressed streamer");
}

#[tokio::test]
async fn test_brotli_response_is_decoded() {
    let body = compress(Version::Brotli, liver_body().as_bytes()).unwrap();
    let base = serve(liver_reply(body, "br")).await;
    let api = ApiClient::with_base_urls(&base, &base).unwrap();

    let liver = api.liver_info(7).await.unwrap();
    assert_eq!(liver.uname, "compressed streamer");
}

#[tokio::test]
async fn test_deflate_response_is_decoded() {
    let body = compress(Version::Zlib, liver_body().as_bytes()).unwrap();
    let base = serve(liver_reply(body, "deflate")).await;
    let api = ApiClient::with_base_urls(&base, &base).unwrap();

    let liver = api.liver_info(7).await.unwrap();
    assert_eq!(liver.uname, "compressed streamer");
}

// =========================================================================
// Failures
// =========================================================================

#[tokio::test]
async fn test_nonzero_code_is_api_error() {
    let routes = HashMap::from([(
        "/x/space/acc/info",
        serde_json::json!({"code": -404, "message": "user not found"}).to_string(),
    )]);
    let base = serve(routes).await;
    let api = ApiClient::with_base_urls(&base, &base).unwrap();

    let err = api.liver_info(1).await.unwrap_err();
    match err {
        ClientError::Api { code, message } => {
            assert_eq!(code, -404);
            assert_eq!(message, "user not found");
        }
        other => panic!("expected Api, got {other:?}"),
    }
}

#[tokio::test]
async fn test_http_status_error() {
    let base = serve(HashMap::<&str, String>::new()).await;
    let api = ApiClient::with_base_urls(&base, &base).unwrap();

    let err = api.room_info(1).await.unwrap_err();
    assert!(matches!(err, ClientError::Http(_)), "{err:?}");
}

#[tokio::test]
async fn test_empty_host_list_is_api_error() {
    let routes = HashMap::from([(
        "/xlive/web-room/v1/index/getDanmuInfo",
        ok(serde_json::json!({"token": "t", "host_list": []})),
    )]);
    let base = serve(routes).await;
    let api = ApiClient::with_base_urls(&base, &base).unwrap();

    assert!(matches!(
        api.danmu_info(1).await,
        Err(ClientError::Api { .. })
    ));
}
