//! Minimal RESP client for the key-value backend.
//!
//! Each write opens its own TCP connection, sends an optional `AUTH` followed
//! by `SET session:<id> <json> EX <ttl>` in a single write, reads the replies
//! through [`ReplyParser`], and closes the socket. There is no pooling.

use std::time::Duration;

use async_trait::async_trait;
use parley_types::SessionState;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

use crate::{SessionBackend, SessionStore, StoreError};

pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const KEY_PREFIX: &str = "session:";

/// Encodes `args` as a RESP array of bulk strings.
pub fn encode_command<S: AsRef<[u8]>>(args: &[S]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        let arg = arg.as_ref();
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

#[derive(Clone, PartialEq, Eq)]
struct Credentials {
    username: Option<String>,
    password: String,
}

impl Credentials {
    fn auth_command(&self) -> Vec<u8> {
        match &self.username {
            Some(user) => encode_command(&["AUTH", user.as_str(), self.password.as_str()]),
            None => encode_command(&["AUTH", self.password.as_str()]),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyState {
    AwaitingAuth,
    AwaitingSet,
    Done,
}

/// Incremental parser for the replies to one `[AUTH] SET` exchange.
///
/// Replies are framed by their type byte and, for bulk strings, by their
/// declared length, so the content of a bulk payload is never read as a reply
/// of its own. Both `AUTH` and `SET` must answer with a simple string.
#[derive(Debug)]
pub struct ReplyParser {
    state: ReplyState,
    buf: Vec<u8>,
    received: usize,
    expected: usize,
}

impl ReplyParser {
    pub fn new(with_auth: bool) -> Self {
        Self {
            state: if with_auth {
                ReplyState::AwaitingAuth
            } else {
                ReplyState::AwaitingSet
            },
            buf: Vec::new(),
            received: 0,
            expected: if with_auth { 2 } else { 1 },
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == ReplyState::Done
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Consumes more bytes from the socket. Bytes after the final reply are
    /// ignored.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        self.buf.extend_from_slice(bytes);
        while !self.is_done() {
            let Some(reply) = self.next_reply()? else {
                break;
            };
            self.received += 1;
            let command = match self.state {
                ReplyState::AwaitingAuth => "AUTH",
                _ => "SET",
            };
            match reply {
                Reply::Simple(_) => {}
                Reply::Error(message) => return Err(StoreError::ErrorReply(message)),
                other => {
                    return Err(StoreError::Protocol(format!(
                        "unexpected reply to {command}: {other:?}"
                    )))
                }
            }
            self.state = match self.state {
                ReplyState::AwaitingAuth => ReplyState::AwaitingSet,
                _ => ReplyState::Done,
            };
        }
        Ok(())
    }

    fn next_reply(&mut self) -> Result<Option<Reply>, StoreError> {
        let Some(line_end) = find_crlf(&self.buf) else {
            return Ok(None);
        };
        let Some(&kind) = self.buf.first() else {
            return Ok(None);
        };
        let line = String::from_utf8_lossy(self.buf.get(1..line_end).unwrap_or_default())
            .into_owned();
        let header_len = line_end + 2;

        let reply = match kind {
            b'+' => Reply::Simple(line),
            b'-' => Reply::Error(line),
            b':' => Reply::Integer(parse_number(&line)?),
            b'$' => {
                let len = parse_number(&line)?;
                if len < 0 {
                    self.buf.drain(..header_len);
                    return Ok(Some(Reply::Bulk(None)));
                }
                let len = len as usize;
                let total = header_len + len + 2;
                if self.buf.len() < total {
                    return Ok(None);
                }
                if &self.buf[header_len + len..total] != b"\r\n" {
                    return Err(StoreError::Protocol(
                        "bulk string is not CRLF terminated".to_string(),
                    ));
                }
                let payload = self.buf[header_len..header_len + len].to_vec();
                self.buf.drain(..total);
                return Ok(Some(Reply::Bulk(Some(payload))));
            }
            other => {
                return Err(StoreError::Protocol(format!(
                    "unsupported reply type {:?}",
                    other as char
                )))
            }
        };
        self.buf.drain(..header_len);
        Ok(Some(reply))
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_number(line: &str) -> Result<i64, StoreError> {
    line.trim()
        .parse()
        .map_err(|_| StoreError::Protocol(format!("invalid length or integer {line:?}")))
}

/// Session store speaking RESP to a Redis-compatible server.
#[derive(Debug, Clone)]
pub struct KeyValueStore {
    host: String,
    port: u16,
    credentials: Option<Credentials>,
    timeout: Duration,
}

impl KeyValueStore {
    /// Parses a `redis://[user[:password]@]host[:port]` connection string.
    pub fn from_url(raw: &str) -> Result<Self, StoreError> {
        let url = Url::parse(raw.trim()).map_err(|e| StoreError::InvalidUrl(e.to_string()))?;
        if url.scheme() != "redis" {
            return Err(StoreError::InvalidUrl(format!(
                "unsupported scheme {:?}",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
            .filter(|h| !h.is_empty())
            .ok_or_else(|| StoreError::InvalidUrl("missing host".to_string()))?
            .to_string();

        let username = decode(url.username())?;
        let password = url.password().map(decode).transpose()?;
        let credentials = match (username, password) {
            (user, Some(password)) if !password.is_empty() => Some(Credentials {
                username: Some(user).filter(|u| !u.is_empty()),
                password,
            }),
            // A user with no password sends no AUTH.
            _ => None,
        };

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            credentials,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Builds the full request for one write: `[AUTH ...] SET key value EX ttl`.
    pub fn build_request(&self, key: &str, value: &str, ttl_secs: u64) -> Vec<u8> {
        let ttl = ttl_secs.to_string();
        let mut request = self
            .credentials
            .as_ref()
            .map(Credentials::auth_command)
            .unwrap_or_default();
        request.extend(encode_command(&["SET", key, value, "EX", ttl.as_str()]));
        request
    }

    async fn exchange(&self, request: &[u8]) -> Result<(), StoreError> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.write_all(request).await?;

        let mut parser = ReplyParser::new(self.credentials.is_some());
        let mut chunk = [0u8; 512];
        while !parser.is_done() {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(StoreError::ClosedEarly {
                    received: parser.received(),
                    expected: parser.expected(),
                });
            }
            parser.feed(&chunk[..n])?;
        }
        // The replies are in; a failed half-close changes nothing.
        let _ = stream.shutdown().await;
        Ok(())
    }
}

fn decode(part: &str) -> Result<String, StoreError> {
    urlencoding::decode(part)
        .map(|s| s.into_owned())
        .map_err(|e| StoreError::InvalidUrl(format!("bad percent-encoding: {e}")))
}

#[async_trait]
impl SessionStore for KeyValueStore {
    fn backend(&self) -> SessionBackend {
        SessionBackend::KeyValue
    }

    async fn set_session_value(
        &self,
        id: &str,
        state: &SessionState,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_string(state)?;
        let request = self.build_request(&format!("{KEY_PREFIX}{id}"), &value, ttl_secs);
        tokio::time::timeout(self.timeout, self.exchange(&request))
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}
