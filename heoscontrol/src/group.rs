use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::capabilities::{
    PlayState, TransportControl, VolumeControl, mute_state, parse_level, parse_mute,
    validate_volume,
};
use crate::client::{HeosClient, Response};
use crate::errors::{HeosError, Result};
use crate::model::{GroupInfo, GroupMember};
use crate::player::Player;

/// A HEOS group, addressed by its `gid` through the leader's host.
///
/// Membership is not stored: `players`, `leader` and `members` ask the
/// device each time. The returned players share the group's host.
#[derive(Debug)]
pub struct PlayerGroup {
    id: i64,
    name: String,
    client: HeosClient,
}

impl PlayerGroup {
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

    /// `group/get_group_info`
    pub fn group_info(&mut self) -> Result<GroupInfo> {
        let response = self.command("group/get_group_info", &[])?;
        let payload = response.payload.ok_or_else(|| {
            HeosError::malformed_reply(self.client.host(), "missing group payload")
        })?;
        serde_json::from_value(payload).map_err(|e| {
            HeosError::malformed_reply(self.client.host(), format!("invalid group payload: {}", e))
        })
    }

    pub fn players(&mut self) -> Result<BTreeMap<String, Player>> {
        let info = self.group_info()?;
        Ok(self.facades(info.players.iter()))
    }

    pub fn leader(&mut self) -> Result<Player> {
        let info = self.group_info()?;
        let leader = info.leader()?;
        Ok(self.facade(leader))
    }

    pub fn members(&mut self) -> Result<BTreeMap<String, Player>> {
        let info = self.group_info()?;
        Ok(self.facades(info.members()))
    }

    fn facade(&self, member: &GroupMember) -> Player {
        Player::new(
            member.pid,
            &member.name,
            HeosClient::with_options(self.client.host(), self.client.options()),
        )
    }

    fn facades<'a, I>(&self, members: I) -> BTreeMap<String, Player>
    where
        I: Iterator<Item = &'a GroupMember>,
    {
        members
            .map(|member| (member.name.clone(), self.facade(member)))
            .collect()
    }

    fn command(&mut self, command: &str, extra: &[(&str, &str)]) -> Result<Response> {
        let gid = self.id.to_string();
        let mut params = vec![("gid", gid.as_str())];
        params.extend_from_slice(extra);
        self.client.send_command(command, &params)?.raise_for_result()
    }
}

impl VolumeControl for PlayerGroup {
    fn volume(&mut self) -> Result<u8> {
        let response = self.command("group/get_volume", &[])?;
        parse_level(self.client.host(), response.message_field("level"))
    }

    fn set_volume(&mut self, level: i32) -> Result<()> {
        let level = validate_volume(level)?.to_string();
        self.command("group/set_volume", &[("level", level.as_str())])?;
        debug!("Set volume of group '{}' to {}", self.name, level);
        Ok(())
    }

    fn is_muted(&mut self) -> Result<bool> {
        let response = self.command("group/get_mute", &[])?;
        parse_mute(self.client.host(), response.message_field("state"))
    }

    fn set_mute(&mut self, mute: bool) -> Result<()> {
        self.command("group/set_mute", &[("state", mute_state(mute))])?;
        Ok(())
    }
}

// Playback is driven through the leader.
impl TransportControl for PlayerGroup {
    fn set_play_state(&mut self, state: PlayState) -> Result<()> {
        self.leader()?.set_play_state(state)
    }

    fn play_next(&mut self) -> Result<()> {
        self.leader()?.play_next()
    }

    fn play_previous(&mut self) -> Result<()> {
        self.leader()?.play_previous()
    }

    fn now_playing(&mut self) -> Result<Option<Value>> {
        self.leader()?.now_playing()
    }
}
