//! HTTP control plane for servers reached over `http://`.
//!
//! Control-plane operations are plain GET/POST requests to fixed paths that
//! answer with a JSON body. A body carrying `success: false` becomes an
//! [`Operation`](ClientError::Operation) error; any other non-2xx status is
//! a [`Connection`](ClientError::Connection) error.

use reqwest::{Method, StatusCode};
use tracing::debug;

use crate::address::ServerAddress;
use crate::codec::JsonCodec;
use crate::config::ClientConfig;
use crate::envelope::{Envelope, Value};
use crate::error::{ClientError, Result};

/// REST client bound to one server.
#[derive(Debug, Clone)]
pub struct HttpControl {
    client: reqwest::Client,
    base: String,
    endpoint: String,
    timeout_ms: u128,
}

impl HttpControl {
    /// Build a client; connects lazily on first request.
    pub fn new(address: &ServerAddress, config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connection_timeout)
            .timeout(config.inference_timeout)
            .build()?;
        Ok(Self {
            client,
            base: address.http_base(),
            endpoint: address.to_string(),
            timeout_ms: config.inference_timeout.as_millis(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// GET `path` and return the decoded body.
    pub async fn get(&self, path: &str, source: &str) -> Result<Value> {
        self.request(Method::GET, path, None, source).await
    }

    /// POST `path` with an optional JSON body and return the decoded reply.
    pub async fn post(&self, path: &str, body: Option<&Value>, source: &str) -> Result<Value> {
        self.request(Method::POST, path, body, source).await
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        source: &str,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base, path);
        debug!("{} {}", method, url);

        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| self.map_error(e, path))?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| self.map_error(e, path))?;

        let value = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            match JsonCodec::decode::<Value>(&bytes) {
                Ok(value) => value,
                Err(_) if !status.is_success() => return Err(self.status_error(&method, path, status)),
                Err(e) => return Err(e),
            }
        };

        if let Some(env) = Envelope::from_value(value.clone()) {
            env.check_success(source)?;
        }
        if !status.is_success() {
            return Err(self.status_error(&method, path, status));
        }
        Ok(value)
    }

    fn status_error(&self, method: &Method, path: &str, status: StatusCode) -> ClientError {
        ClientError::Connection(format!(
            "{} {} on server '{}' failed with status {}",
            method, path, self.endpoint, status
        ))
    }

    fn map_error(&self, err: reqwest::Error, path: &str) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout(format!(
                "Timeout {} ms waiting for reply to {} from server '{}'",
                self.timeout_ms, path, self.endpoint
            ))
        } else if err.is_connect() {
            ClientError::Connection(format!(
                "unable to connect to server '{}': {}",
                self.endpoint, err
            ))
        } else {
            ClientError::Http(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ServerKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one request with a canned status and body; return the request text.
    async fn serve_once(status: &'static str, body: &'static str) -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = sock.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let content_length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if buf.len() >= head_end + 4 + content_length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            sock.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf).to_string()
        });
        (port, handle)
    }

    fn control(port: u16) -> HttpControl {
        let addr = ServerAddress::new("127.0.0.1", port, ServerKind::Http);
        HttpControl::new(&addr, &ClientConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_get_returns_body() {
        let (port, server) = serve_once("200 OK", r#"{"yolo":{"w":640}}"#).await;
        let value = control(port).get("/v1/modelzoo", "modelList").await.unwrap();
        assert_eq!(
            value.get("yolo").and_then(|m| m.get("w")),
            Some(&Value::Int(640))
        );
        assert!(server.await.unwrap().starts_with("GET /v1/modelzoo "));
    }

    #[tokio::test]
    async fn test_post_sends_json() {
        let (port, server) = serve_once("200 OK", r#"{"ok":true}"#).await;
        let body = Value::from(serde_json::json!({"config_get": 1}));
        control(port)
            .post("/v1/trace_manage", Some(&body), "traceManage")
            .await
            .unwrap();
        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/trace_manage "));
        assert!(request.ends_with(r#"{"config_get":1}"#));
    }

    #[tokio::test]
    async fn test_success_false_is_operation_error() {
        let (port, _server) =
            serve_once("200 OK", r#"{"success":false,"msg":"bad model"}"#).await;
        let err = control(port)
            .get("/v1/label_dictionary/x", "labelDictionary")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Operation(ref m) if m.contains("bad model")));
    }

    #[tokio::test]
    async fn test_error_status_is_connection_error() {
        let (port, _server) = serve_once("500 Internal Server Error", "oops").await;
        let err = control(port).post("/v1/shutdown", None, "shutdown").await.unwrap_err();
        assert!(matches!(err, ClientError::Connection(ref m) if m.contains("500")));
    }

    #[tokio::test]
    async fn test_empty_body_is_null() {
        let (port, _server) = serve_once("200 OK", "").await;
        let value = control(port).post("/v1/sleep/0", None, "ping").await.unwrap();
        assert!(value.is_null());
    }
}
