//! In-process stand-in for a HEOS device CLI.

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use heoscontrol::{ClientOptions, DeviceLocator, Query, Result, SsdpResponse};
use serde_json::{Value, json};

/// What the fake device does with one request line.
pub enum Reply {
    Lines(Vec<String>),
    /// Say nothing and keep the connection open.
    Silence,
    /// Drop the connection.
    Hangup,
}

/// Binds a loopback listener and serves every connection on its own thread.
/// Returns the listening port.
pub fn spawn_device<F>(handler: F) -> u16
where
    F: Fn(&Query) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handler = Arc::new(handler);

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let handler = Arc::clone(&handler);
            thread::spawn(move || serve(stream, handler.as_ref()));
        }
    });

    port
}

fn serve<F>(stream: TcpStream, handler: &F)
where
    F: Fn(&Query) -> Reply,
{
    let Ok(mut writer) = stream.try_clone() else {
        return;
    };
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let Ok(line) = line else { return };
        let Ok(query) = line.parse::<Query>() else {
            return;
        };
        match handler(&query) {
            Reply::Lines(lines) => {
                for reply in lines {
                    if writer.write_all(format!("{}\r\n", reply).as_bytes()).is_err() {
                        return;
                    }
                }
            }
            Reply::Silence => {}
            Reply::Hangup => return,
        }
    }
}

pub fn options(port: u16) -> ClientOptions {
    ClientOptions {
        port,
        timeout: Duration::from_millis(500),
    }
}

pub fn reply(command: &str, result: &str, message: &str, payload: Option<Value>) -> String {
    let mut line = json!({
        "heos": {"command": command, "result": result, "message": message}
    });
    if let Some(payload) = payload {
        line["payload"] = payload;
    }
    line.to_string()
}

pub fn success(query: &Query, message: &str) -> Reply {
    Reply::Lines(vec![reply(query.command(), "success", message, None)])
}

pub fn param<'a>(query: &'a Query, key: &str) -> Option<&'a str> {
    query
        .params()
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

pub fn players_payload() -> Value {
    json!([
        {"name": "Kitchen", "pid": 1, "model": "HEOS 1", "ip": "127.0.0.1", "network": "wifi"},
        {"name": "Office", "pid": "2", "gid": -21, "model": "HEOS 3", "ip": "127.0.0.1"},
        {"name": "Porch", "pid": 3, "gid": "-21", "model": "HEOS 1", "ip": "127.0.0.1"}
    ])
}

pub fn whole_home_payload() -> Value {
    json!({
        "name": "Whole Home",
        "gid": "-21",
        "players": [
            {"name": "Office", "pid": 2, "role": "member"},
            {"name": "Kitchen", "pid": 1, "role": "leader"},
            {"name": "Porch", "pid": "3", "role": "member"}
        ]
    })
}

/// Answers the enumeration commands the way a three-speaker system does.
pub fn enumerate(query: &Query) -> Option<Reply> {
    let line = match query.command() {
        "player/get_players" => reply(query.command(), "success", "", Some(players_payload())),
        "group/get_groups" => reply(
            query.command(),
            "success",
            "",
            Some(json!([whole_home_payload()])),
        ),
        "group/get_group_info" => reply(
            query.command(),
            "success",
            "gid=-21",
            Some(whole_home_payload()),
        ),
        _ => return None,
    };
    Some(Reply::Lines(vec![line]))
}

/// Locator returning canned search replies.
pub struct StubLocator(pub Vec<SsdpResponse>);

impl StubLocator {
    pub fn loopback() -> Self {
        StubLocator(vec![ssdp_reply(
            "http://127.0.0.1:60006/upnp/desc/aios_device/aios_device.xml",
        )])
    }
}

impl DeviceLocator for StubLocator {
    fn locate(&self) -> Result<Vec<SsdpResponse>> {
        Ok(self.0.clone())
    }
}

/// Locator for tests that must never reach discovery.
pub struct NoDiscovery;

impl DeviceLocator for NoDiscovery {
    fn locate(&self) -> Result<Vec<SsdpResponse>> {
        panic!("discovery was not expected");
    }
}

pub fn ssdp_reply(location: &str) -> SsdpResponse {
    SsdpResponse {
        location: location.to_string(),
        usn: "uuid:5d0f1c11-0000-1000-8000-000000000001::urn:schemas-denon-com:device:ACT-Denon:1"
            .to_string(),
        st: "urn:schemas-denon-com:device:ACT-Denon:1".to_string(),
        cache: 180,
    }
}
