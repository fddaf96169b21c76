use serde_json::Value;
use tracing::debug;

use crate::capabilities::{
    PlayState, TransportControl, VolumeControl, mute_state, parse_level, parse_mute,
    validate_volume,
};
use crate::client::{HeosClient, Response};
use crate::errors::{HeosError, Result};

/// A single HEOS player, addressed by its `pid`.
///
/// Owns its own connection, closed on drop.
#[derive(Debug)]
pub struct Player {
    id: i64,
    name: String,
    client: HeosClient,
}

impl Player {
    pub fn new(id: i64, name: &str, client: HeosClient) -> Self {
        Self {
            id,
            name: name.to_string(),
            client,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        self.client.host()
    }

    pub fn close(&mut self) {
        self.client.close();
    }

    /// Current transport state (`player/get_play_state`).
    pub fn play_state(&mut self) -> Result<PlayState> {
        let response = self.command("player/get_play_state", &[])?;
        match response.message_field("state") {
            Some(state) => state.parse(),
            None => Err(HeosError::malformed_reply(
                self.client.host(),
                "missing state field",
            )),
        }
    }

    fn command(&mut self, command: &str, extra: &[(&str, &str)]) -> Result<Response> {
        let pid = self.id.to_string();
        let mut params = vec![("pid", pid.as_str())];
        params.extend_from_slice(extra);
        self.client.send_command(command, &params)?.raise_for_result()
    }
}

impl VolumeControl for Player {
    fn volume(&mut self) -> Result<u8> {
        let response = self.command("player/get_volume", &[])?;
        parse_level(self.client.host(), response.message_field("level"))
    }

    fn set_volume(&mut self, level: i32) -> Result<()> {
        let level = validate_volume(level)?.to_string();
        self.command("player/set_volume", &[("level", level.as_str())])?;
        debug!("Set volume of player '{}' to {}", self.name, level);
        Ok(())
    }

    fn is_muted(&mut self) -> Result<bool> {
        let response = self.command("player/get_mute", &[])?;
        parse_mute(self.client.host(), response.message_field("state"))
    }

    fn set_mute(&mut self, mute: bool) -> Result<()> {
        self.command("player/set_mute", &[("state", mute_state(mute))])?;
        Ok(())
    }
}

impl TransportControl for Player {
    fn set_play_state(&mut self, state: PlayState) -> Result<()> {
        self.command("player/set_play_state", &[("state", state.as_str())])?;
        debug!("Player '{}' is now in state {}", self.name, state);
        Ok(())
    }

    fn play_next(&mut self) -> Result<()> {
        self.command("player/play_next", &[])?;
        Ok(())
    }

    fn play_previous(&mut self) -> Result<()> {
        self.command("player/play_previous", &[])?;
        Ok(())
    }

    fn now_playing(&mut self) -> Result<Option<Value>> {
        Ok(self.command("player/get_now_playing_media", &[])?.payload)
    }
}
