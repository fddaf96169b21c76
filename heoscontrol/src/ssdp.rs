//! SSDP search (M-SEARCH) used to locate HEOS devices.
//!
//! The client binds an ephemeral port, sends one M-SEARCH per attempt to
//! `239.255.255.250:1900` and collects the unicast HTTP/200 replies until the
//! socket stays silent for `timeout`. It never binds port 1900 itself.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::errors::{HeosError, Result};

/// SSDP multicast group
pub const SSDP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// SSDP port
pub const SSDP_PORT: u16 = 1900;

/// Default MX advertised in the search
pub const DEFAULT_MX: u32 = 3;

// One router hop: enough for a home subnet.
const MULTICAST_TTL: u32 = 2;
const RECV_BUFFER_SIZE: usize = 8192;

/// An M-SEARCH request for one service type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SsdpMessage {
    pub service: String,
    pub address: Ipv4Addr,
    pub port: u16,
    pub mx: u32,
}

impl SsdpMessage {
    pub fn new(service: &str, mx: u32) -> Self {
        Self {
            service: service.to_string(),
            address: SSDP_MULTICAST_ADDR,
            port: SSDP_PORT,
            mx,
        }
    }

    pub fn target(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address, self.port))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for SsdpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: {}:{}\r\n\
             MAN: \"ssdp:discover\"\r\n\
             ST: {}\r\n\
             MX: {}\r\n\
             \r\n",
            self.address, self.port, self.service, self.mx
        )
    }
}

/// A search reply: where the device description lives and how long it is valid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SsdpResponse {
    pub location: String,
    pub usn: String,
    pub st: String,
    /// `max-age` from CACHE-CONTROL, in seconds.
    pub cache: u32,
}

impl SsdpResponse {
    /// Parses an HTTP/1.1 200 search reply.
    ///
    /// Returns `None` when the status line is not a 200 response or when one
    /// of LOCATION, USN, ST or CACHE-CONTROL (with a `max-age`) is missing.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(data);
        let mut lines = text.lines();

        let status_line = lines.next()?.trim();
        if !is_ok_status_line(status_line) {
            trace!("Not an HTTP/200 status line: '{}'", status_line);
            return None;
        }

        let mut headers = parse_headers(lines);
        let location = headers.remove("LOCATION")?;
        let usn = headers.remove("USN")?;
        let st = headers.remove("ST")?;
        let cache = parse_max_age(&headers.remove("CACHE-CONTROL")?)?;

        Some(Self {
            location,
            usn,
            st,
            cache,
        })
    }

    /// Host name (or IP literal) of the LOCATION URL.
    pub fn host(&self) -> Option<String> {
        let url = Url::parse(&self.location).ok()?;
        let host = url.host_str()?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            None
        } else {
            Some(host.to_string())
        }
    }
}

/// Searches the local network for `service`.
///
/// Runs `retries` search rounds; each round ends after `timeout` without a
/// reply. Replies are merged by location. Unparseable replies are dropped.
pub fn discover(
    service: &str,
    timeout: Duration,
    retries: u32,
    mx: u32,
) -> Result<Vec<SsdpResponse>> {
    let message = SsdpMessage::new(service, search_mx(mx));
    let mut replies = Vec::new();

    for attempt in 1..=retries {
        let socket = open_search_socket(timeout).map_err(HeosError::Discovery)?;

        if let Err(err) = socket.send_to(&message.to_bytes(), message.target()) {
            warn!("Failed to send M-SEARCH (attempt {}/{}): {}", attempt, retries, err);
            continue;
        }
        debug!(
            "M-SEARCH sent (ST={}, MX={}, attempt {}/{})",
            message.service, message.mx, attempt, retries
        );

        replies.extend(receive_replies(&socket));
    }

    let responses = dedup_by_location(replies);
    info!("SSDP discovery found {} device(s) for {}", responses.len(), service);
    Ok(responses)
}

// MX must be at least 1 for devices to answer.
fn search_mx(mx: u32) -> u32 {
    if mx == 0 {
        debug!("MX 0 is not a valid search delay, sending MX 1");
        1
    } else {
        mx
    }
}

/// Keeps one response per location; the last one seen wins.
pub fn dedup_by_location<I>(responses: I) -> Vec<SsdpResponse>
where
    I: IntoIterator<Item = SsdpResponse>,
{
    let mut by_location = BTreeMap::new();
    for response in responses {
        by_location.insert(response.location.clone(), response);
    }
    by_location.into_values().collect()
}

fn open_search_socket(timeout: Duration) -> io::Result<UdpSocket> {
    let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket2.set_reuse_address(true)?;
    socket2.set_multicast_ttl_v4(MULTICAST_TTL)?;

    let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
    socket2.bind(&bind_addr.into())?;

    let socket: UdpSocket = socket2.into();
    // A zero read timeout is rejected by the OS API.
    socket.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
    Ok(socket)
}

fn receive_replies(socket: &UdpSocket) -> Vec<SsdpResponse> {
    let mut replies = Vec::new();
    let mut buf = [0u8; RECV_BUFFER_SIZE];

    loop {
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => match SsdpResponse::from_bytes(&buf[..n]) {
                Some(response) => {
                    debug!("SSDP reply from {}: {}", from, response.location);
                    replies.push(response);
                }
                None => {
                    trace!(
                        "Dropping malformed SSDP reply from {}:\n{}",
                        from,
                        String::from_utf8_lossy(&buf[..n])
                    );
                }
            },
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                break;
            }
            Err(e) => {
                warn!("SSDP receive error: {}", e);
                break;
            }
        }
    }

    replies
}

fn is_ok_status_line(line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let version = parts.next().unwrap_or("");
    let status = parts.next().unwrap_or("");
    version.to_ascii_uppercase().starts_with("HTTP/") && status == "200"
}

fn parse_headers<'a, I>(lines: I) -> HashMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = HashMap::new();
    for line in lines {
        let line = line.trim();

        // Empty line marks end of headers
        if line.is_empty() {
            break;
        }

        // Split on first ':' only (values may contain ':')
        match line.split_once(':') {
            Some((name, value)) => {
                let name = name.trim().to_ascii_uppercase();
                let value = value.trim();
                if !name.is_empty() && !value.is_empty() {
                    headers.insert(name, value.to_string());
                } else {
                    trace!("Skipping malformed header: '{}'", line);
                }
            }
            None => trace!("Skipping line without colon: '{}'", line),
        }
    }
    headers
}

fn parse_max_age(value: &str) -> Option<u32> {
    let lower = value.to_ascii_lowercase();
    let idx = lower.find("max-age")?;
    let after_eq = value[idx + 7..]
        .trim_start()
        .strip_prefix('=')?
        .trim_start();
    let digits: String = after_eq.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
