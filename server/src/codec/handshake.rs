//! One-shot HTTP upgrade exchange.

use super::frame::{Role, WsReader, WsWriter};
use crate::error::CodecError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};
use std::sync::Arc;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

const PROTOCOL_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_HEAD_BYTES: usize = 8 * 1024;

pub const UPGRADE_PATH: &str = "/ws";
pub const HEALTH_PATH: &str = "/healthz";

/// `base64(SHA-1(key ++ GUID))`, the token a server must echo back.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(PROTOCOL_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Start line plus headers of an HTTP/1.1 request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Head {
    pub start_line: String,
    pub headers: Vec<(String, String)>,
}

impl Head {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// True if any value of `name` lists `token` in its comma-separated list.
    pub fn header_has_token(&self, name: &str, token: &str) -> bool {
        self.headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .flat_map(|(_, value)| value.split(','))
            .any(|part| part.trim().eq_ignore_ascii_case(token))
    }
}

async fn read_head<R>(reader: &mut R) -> Result<Head, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut limited = reader.take(MAX_HEAD_BYTES as u64);
    let mut start_line = String::new();
    let mut headers = Vec::new();
    let mut consumed = 0usize;

    loop {
        let mut line = String::new();
        let read = limited.read_line(&mut line).await?;
        consumed += read;
        if read == 0 || !line.ends_with('\n') {
            if consumed >= MAX_HEAD_BYTES {
                return Err(CodecError::RequestTooLarge(MAX_HEAD_BYTES));
            }
            return Err(CodecError::BadRequest("connection closed during handshake"));
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if start_line.is_empty() {
                continue;
            }
            return Ok(Head {
                start_line,
                headers,
            });
        }
        if start_line.is_empty() {
            start_line = line.to_string();
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or(CodecError::BadRequest("malformed header line"))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
}

/// Checks the upgrade request and returns the accept token on success.
pub fn validate_upgrade(head: &Head) -> Result<String, CodecError> {
    if !head.header_has_token("Connection", "Upgrade") {
        return Err(CodecError::BadRequest("missing Connection: Upgrade"));
    }
    if !head.header_has_token("Upgrade", "websocket") {
        return Err(CodecError::BadRequest("missing Upgrade: websocket"));
    }
    if head.header("Sec-WebSocket-Version") != Some("13") {
        return Err(CodecError::BadRequest("unsupported websocket version"));
    }
    match head.header("Sec-WebSocket-Key") {
        Some(key) if !key.is_empty() => Ok(accept_key(key)),
        _ => Err(CodecError::BadRequest("missing Sec-WebSocket-Key")),
    }
}

fn switching_protocols(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept
    )
}

fn plain_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    )
}

/// Outcome of serving the first request on a fresh connection.
pub enum Handshake<S> {
    /// The stream now carries frames.
    Upgraded(WsReader<S>, Arc<WsWriter<S>>),
    /// A plain HTTP request (health check, unknown path) was answered and the
    /// connection is done.
    Answered,
}

/// Server side of the handshake. Reads exactly one request head; on a valid
/// upgrade writes the switching-protocols response and hands the raw stream
/// to the frame codec.
pub async fn accept<S>(stream: S, max_payload: usize) -> Result<Handshake<S>, CodecError>
where
    S: AsyncRead + AsyncWrite,
{
    let (read, mut write) = tokio::io::split(stream);
    let mut reader = BufReader::new(read);
    let head = read_head(&mut reader).await?;

    let mut parts = head.start_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();
    let path = target.split('?').next().unwrap_or_default();

    if method != "GET" {
        write
            .write_all(plain_response("405 Method Not Allowed", "method not allowed").as_bytes())
            .await?;
        write.flush().await?;
        return Err(CodecError::BadRequest("method must be GET"));
    }

    match path {
        HEALTH_PATH => {
            write.write_all(plain_response("200 OK", "ok").as_bytes()).await?;
            write.flush().await?;
            let _ = write.shutdown().await;
            Ok(Handshake::Answered)
        }
        UPGRADE_PATH => match validate_upgrade(&head) {
            Ok(accept) => {
                write.write_all(switching_protocols(&accept).as_bytes()).await?;
                write.flush().await?;
                let writer = Arc::new(WsWriter::new(write, Role::Server));
                let reader = WsReader::new(reader, Arc::clone(&writer), Role::Server, max_payload);
                Ok(Handshake::Upgraded(reader, writer))
            }
            Err(err) => {
                let reason = err.to_string();
                write
                    .write_all(plain_response("400 Bad Request", &reason).as_bytes())
                    .await?;
                write.flush().await?;
                let _ = write.shutdown().await;
                Err(err)
            }
        },
        _ => {
            write
                .write_all(plain_response("404 Not Found", "not found").as_bytes())
                .await?;
            write.flush().await?;
            let _ = write.shutdown().await;
            Ok(Handshake::Answered)
        }
    }
}

/// Client side of the handshake, used by the test client and integration tests.
pub async fn connect<S>(
    stream: S,
    host: &str,
    max_payload: usize,
) -> Result<(WsReader<S>, Arc<WsWriter<S>>), CodecError>
where
    S: AsyncRead + AsyncWrite,
{
    let (read, mut write) = tokio::io::split(stream);
    let mut reader = BufReader::new(read);

    let key = STANDARD.encode(rand::random::<[u8; 16]>());
    let request = format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n",
        UPGRADE_PATH, host, key
    );
    write.write_all(request.as_bytes()).await?;
    write.flush().await?;

    let head = read_head(&mut reader).await?;
    if head.start_line.split_whitespace().nth(1) != Some("101") {
        return Err(CodecError::BadRequest("upgrade refused"));
    }
    if head.header("Sec-WebSocket-Accept") != Some(accept_key(&key).as_str()) {
        return Err(CodecError::BadRequest("accept token mismatch"));
    }

    let writer = Arc::new(WsWriter::new(write, Role::Client));
    let reader = WsReader::new(reader, Arc::clone(&writer), Role::Client, max_payload);
    Ok((reader, writer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn upgrade_request(extra: &str) -> String {
        format!(
            "GET /ws HTTP/1.1\r\nHost: localhost\r\n{}\r\n",
            extra
        )
    }

    #[test]
    fn test_accept_key_known_vector() {
        assert_eq!(accept_key(SAMPLE_KEY), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_accept_key_is_pure() {
        assert_eq!(accept_key("abc"), accept_key("abc"));
        assert_ne!(accept_key("abc"), accept_key("abd"));
    }

    #[test]
    fn test_header_token_matching() {
        let head = Head {
            start_line: "GET /ws HTTP/1.1".to_string(),
            headers: vec![
                ("connection".to_string(), "keep-alive, Upgrade".to_string()),
                ("Upgrade".to_string(), "WebSocket".to_string()),
            ],
        };
        assert!(head.header_has_token("Connection", "upgrade"));
        assert!(head.header_has_token("upgrade", "websocket"));
        assert!(!head.header_has_token("Connection", "close"));
    }

    #[tokio::test]
    async fn test_accept_writes_switching_protocols_verbatim() {
        let request = upgrade_request(&format!(
            "Upgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Version: 13\r\nSec-WebSocket-Key: {}\r\n",
            SAMPLE_KEY
        ));
        let response = "HTTP/1.1 101 Switching Protocols\r\n\
                        Upgrade: websocket\r\n\
                        Connection: Upgrade\r\n\
                        Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";
        let mock = tokio_test::io::Builder::new()
            .read(request.as_bytes())
            .write(response.as_bytes())
            .build();

        let outcome = accept(mock, 1024).await.unwrap();
        assert!(matches!(outcome, Handshake::Upgraded(_, _)));
    }

    #[tokio::test]
    async fn test_accept_rejects_wrong_version() {
        let (mut client, server) = duplex(4096);
        let request = upgrade_request(&format!(
            "Upgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Version: 8\r\nSec-WebSocket-Key: {}\r\n",
            SAMPLE_KEY
        ));
        client.write_all(request.as_bytes()).await.unwrap();

        let result = accept(server, 1024).await;
        assert!(matches!(
            result,
            Err(CodecError::BadRequest("unsupported websocket version"))
        ));

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request"));
        assert!(response.ends_with("unsupported websocket version"));
    }

    #[tokio::test]
    async fn test_accept_rejects_missing_key() {
        let (mut client, server) = duplex(4096);
        let request =
            upgrade_request("Upgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Version: 13\r\n");
        client.write_all(request.as_bytes()).await.unwrap();
        assert!(matches!(
            accept(server, 1024).await,
            Err(CodecError::BadRequest("missing Sec-WebSocket-Key"))
        ));
    }

    #[tokio::test]
    async fn test_health_check_is_answered() {
        let (mut client, server) = duplex(4096);
        client
            .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        assert!(matches!(
            accept(server, 1024).await.unwrap(),
            Handshake::Answered
        ));

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("\r\n\r\nok"));
    }

    #[tokio::test]
    async fn test_oversized_head_is_rejected() {
        let (mut client, server) = duplex(64 * 1024);
        let mut request = String::from("GET /ws HTTP/1.1\r\nX-Filler: ");
        request.push_str(&"a".repeat(MAX_HEAD_BYTES * 2));
        client.write_all(request.as_bytes()).await.unwrap();
        assert!(matches!(
            accept(server, 1024).await,
            Err(CodecError::RequestTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_client_connect_against_server_accept() {
        let (client, server) = duplex(64 * 1024);
        let server_task = tokio::spawn(async move {
            match accept(server, 1024).await.unwrap() {
                Handshake::Upgraded(mut reader, writer) => {
                    let message = reader.read_message().await.unwrap().unwrap();
                    writer.send_text(&String::from_utf8(message).unwrap()).await.unwrap();
                }
                Handshake::Answered => panic!("expected an upgrade"),
            }
        });

        let (mut reader, writer) = connect(client, "localhost", 1024).await.unwrap();
        writer.send_text("echo me").await.unwrap();
        assert_eq!(reader.read_message().await.unwrap(), Some(b"echo me".to_vec()));
        server_task.await.unwrap();
    }
}
