use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::errors::{HeosError, Result};

/// Transport state as carried by `player/set_play_state`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlayState {
    Play,
    Pause,
    Stop,
}

impl PlayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayState::Play => "play",
            PlayState::Pause => "pause",
            PlayState::Stop => "stop",
        }
    }
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlayState {
    type Err = HeosError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "play" => Ok(PlayState::Play),
            "pause" => Ok(PlayState::Pause),
            "stop" => Ok(PlayState::Stop),
            other => Err(HeosError::InvalidPlayState(other.to_string())),
        }
    }
}

/// Volume and mute, for a single player or a whole group.
pub trait VolumeControl {
    /// Current volume, 0 to 100.
    fn volume(&mut self) -> Result<u8>;

    /// Sets the volume. Values outside 0..=100 are rejected without
    /// contacting the device.
    fn set_volume(&mut self, level: i32) -> Result<()>;

    fn is_muted(&mut self) -> Result<bool>;

    fn set_mute(&mut self, mute: bool) -> Result<()>;
}

/// Playback controls.
pub trait TransportControl {
    fn set_play_state(&mut self, state: PlayState) -> Result<()>;

    fn play(&mut self) -> Result<()> {
        self.set_play_state(PlayState::Play)
    }

    fn pause(&mut self) -> Result<()> {
        self.set_play_state(PlayState::Pause)
    }

    fn stop(&mut self) -> Result<()> {
        self.set_play_state(PlayState::Stop)
    }

    fn play_next(&mut self) -> Result<()>;

    fn play_previous(&mut self) -> Result<()>;

    /// Raw `get_now_playing_media` payload.
    fn now_playing(&mut self) -> Result<Option<Value>>;
}

pub(crate) fn validate_volume(level: i32) -> Result<u8> {
    match u8::try_from(level) {
        Ok(v) if v <= 100 => Ok(v),
        _ => Err(HeosError::InvalidVolume(level)),
    }
}

pub(crate) fn mute_state(mute: bool) -> &'static str {
    if mute { "on" } else { "off" }
}

pub(crate) fn parse_level(host: &str, raw: Option<String>) -> Result<u8> {
    let raw = raw.ok_or_else(|| HeosError::malformed_reply(host, "missing level field"))?;
    raw.trim()
        .parse::<u8>()
        .ok()
        .filter(|v| *v <= 100)
        .ok_or_else(|| HeosError::malformed_reply(host, format!("invalid level value: {}", raw)))
}

pub(crate) fn parse_mute(host: &str, raw: Option<String>) -> Result<bool> {
    match raw.as_deref() {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        Some(other) => Err(HeosError::malformed_reply(
            host,
            format!("invalid mute state: {}", other),
        )),
        None => Err(HeosError::malformed_reply(host, "missing state field")),
    }
}
