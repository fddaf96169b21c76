use std::collections::BTreeMap;
use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::form_urlencoded;

use crate::errors::{HeosError, Result};

/// HEOS CLI port
pub const HEOS_PORT: u16 = 1255;

const QUERY_SCHEME: &str = "heos://";
const DEFAULT_TIMEOUT_SECS: u64 = 5;
const MAX_REPLY_LINES: usize = 8;
const UNDER_PROCESS: &str = "command under process";

/// A HEOS CLI command: `heos://<command>?<params>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    command: String,
    params: Vec<(String, String)>,
}

impl Query {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            params: Vec::new(),
        }
    }

    pub fn with_params(command: &str, params: &[(&str, &str)]) -> Self {
        let params = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            command: command.to_string(),
            params,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", QUERY_SCHEME, self.command)?;
        if !self.params.is_empty() {
            let encoded = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&self.params)
                .finish();
            write!(f, "?{}", encoded)?;
        }
        Ok(())
    }
}

impl FromStr for Query {
    type Err = HeosError;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .trim()
            .strip_prefix(QUERY_SCHEME)
            .ok_or_else(|| {
                HeosError::InvalidQuery(format!("missing {} scheme: {}", QUERY_SCHEME, s))
            })?;

        let (command, query) = match rest.split_once('?') {
            Some((command, query)) => (command, query),
            None => (rest, ""),
        };
        if command.is_empty() {
            return Err(HeosError::InvalidQuery(format!("empty command: {}", s)));
        }

        Ok(Self {
            command: command.to_string(),
            params: form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandResult {
    Success,
    #[default]
    #[serde(other)]
    Fail,
}

#[derive(Deserialize)]
struct Envelope {
    heos: Header,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Deserialize)]
struct Header {
    command: String,
    // absent on events
    #[serde(default)]
    result: CommandResult,
    #[serde(default)]
    message: String,
}

/// One reply line from a HEOS device.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub command: String,
    pub result: CommandResult,
    /// URL-encoded `key=value&...` fields, see [`Response::message_fields`].
    pub message: String,
    pub payload: Option<Value>,
}

impl Response {
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        Ok(Self {
            command: envelope.heos.command,
            result: envelope.heos.result,
            message: envelope.heos.message,
            payload: envelope.payload,
        })
    }

    pub fn is_success(&self) -> bool {
        self.result == CommandResult::Success
    }

    /// Decoded message fields, sorted by key.
    pub fn message_fields(&self) -> BTreeMap<String, String> {
        form_urlencoded::parse(self.message.as_bytes())
            .into_owned()
            .collect()
    }

    pub fn message_field(&self, key: &str) -> Option<String> {
        form_urlencoded::parse(self.message.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Turns a `fail` result into [`HeosError::CommandFailed`].
    ///
    /// The client never does this on its own.
    pub fn raise_for_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(HeosError::command_failed(&self.command, &self.message))
        }
    }

    fn is_under_process(&self) -> bool {
        self.message.starts_with(UNDER_PROCESS)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientOptions {
    pub port: u16,
    /// Connect, write and read deadline.
    pub timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            port: HEOS_PORT,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ClientOptions {
    pub fn from_config(config: &heosconfig::Config) -> Self {
        Self {
            port: config.get_command_port(),
            timeout: config.get_command_timeout(),
        }
    }
}

/// Connection to the CLI of one HEOS device.
///
/// The socket is opened on the first command and kept for the following
/// ones. Commands are strictly sequential: each call reads the matching reply
/// before returning. Dropping the client closes the socket.
#[derive(Debug)]
pub struct HeosClient {
    host: String,
    options: ClientOptions,
    connection: Option<BufReader<TcpStream>>,
}

impl HeosClient {
    pub fn new(host: &str) -> Self {
        Self::with_options(host, ClientOptions::default())
    }

    pub fn with_options(host: &str, options: ClientOptions) -> Self {
        Self {
            host: host.to_string(),
            options,
            connection: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn options(&self) -> ClientOptions {
        self.options
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn send_command(&mut self, command: &str, params: &[(&str, &str)]) -> Result<Response> {
        self.send_query(&Query::with_params(command, params))
    }

    /// Sends `query` and waits for its reply.
    ///
    /// Any transport error drops the connection; the next command reconnects.
    pub fn send_query(&mut self, query: &Query) -> Result<Response> {
        let result = self.exchange(query);
        if result.is_err() {
            self.close();
        }
        result
    }

    /// Closes the connection. Does nothing when it is not open.
    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            let _ = connection.get_ref().shutdown(Shutdown::Both);
            debug!("Closed HEOS connection to {}:{}", self.host, self.options.port);
        }
    }

    fn exchange(&mut self, query: &Query) -> Result<Response> {
        let host = self.host.clone();
        let connection = self.connection()?;

        let mut line = query.to_string();
        line.push('\n');
        debug!("HEOS {} <- {}", host, query);

        let stream = connection.get_mut();
        stream
            .write_all(line.as_bytes())
            .and_then(|_| stream.flush())
            .map_err(|e| HeosError::io(&host, e))?;

        for _ in 0..MAX_REPLY_LINES {
            let raw = read_reply_line(connection, &host)?;
            let response = Response::from_bytes(raw.as_bytes()).map_err(|e| {
                HeosError::malformed_reply(&host, format!("{} in '{}'", e, raw.trim_end()))
            })?;

            if response.command != query.command() {
                debug!(
                    "Ignoring unsolicited HEOS reply from {}: {}",
                    host, response.command
                );
                continue;
            }
            if response.is_under_process() {
                debug!("HEOS {} is still processing {}", host, response.command);
                continue;
            }

            debug!("HEOS {} -> {}", host, raw.trim_end());
            return Ok(response);
        }

        Err(HeosError::malformed_reply(
            &host,
            format!("no reply to {} within {} lines", query.command(), MAX_REPLY_LINES),
        ))
    }

    fn connection(&mut self) -> Result<&mut BufReader<TcpStream>> {
        if self.connection.is_none() {
            let stream = connect(&self.host, self.options.port, self.options.timeout)?;
            debug!("Opened HEOS connection to {}:{}", self.host, self.options.port);
            self.connection = Some(BufReader::new(stream));
        }
        // Just populated above.
        self.connection
            .as_mut()
            .ok_or_else(|| HeosError::ConnectionClosed(self.host.clone()))
    }
}

impl Drop for HeosClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| HeosError::Connect {
            host: host.to_string(),
            port,
            source,
        })?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream
                    .set_read_timeout(Some(timeout))
                    .and_then(|_| stream.set_write_timeout(Some(timeout)))
                    .map_err(|source| HeosError::Connect {
                        host: host.to_string(),
                        port,
                        source,
                    })?;
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }

    Err(HeosError::Connect {
        host: host.to_string(),
        port,
        source: last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no socket address resolved")
        }),
    })
}

/// Reads one reply line. The device terminates lines with CRLF.
fn read_reply_line(reader: &mut BufReader<TcpStream>, host: &str) -> Result<String> {
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .map_err(|e| HeosError::io(host, e))?;

    if n == 0 || !line.ends_with('\n') {
        return Err(HeosError::ConnectionClosed(host.to_string()));
    }
    Ok(line)
}
