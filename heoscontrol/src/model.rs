use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::{HeosError, Result};

/// A player as kept in the registry and its cache file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerEntry {
    pub name: String,
    pub model: String,
    pub host: String,
    pub id: i64,
}

/// A group as kept in the registry and its cache file.
///
/// `leader` and `members` are player names, resolved against the registry's
/// players when a facade is built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub name: String,
    pub id: i64,
    pub leader: String,
    #[serde(default)]
    pub members: Vec<String>,
}

/// One element of the `player/get_players` payload.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PlayerInfo {
    pub name: String,
    #[serde(deserialize_with = "de_id")]
    pub pid: i64,
    #[serde(default)]
    pub model: String,
    pub ip: String,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub gid: Option<i64>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
}

impl From<PlayerInfo> for PlayerEntry {
    fn from(info: PlayerInfo) -> Self {
        Self {
            name: info.name,
            model: info.model,
            host: info.ip,
            id: info.pid,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Leader,
    Member,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct GroupMember {
    pub name: String,
    #[serde(deserialize_with = "de_id")]
    pub pid: i64,
    pub role: GroupRole,
}

/// One element of `group/get_groups`, or the payload of `group/get_group_info`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct GroupInfo {
    pub name: String,
    #[serde(deserialize_with = "de_id")]
    pub gid: i64,
    #[serde(default)]
    pub players: Vec<GroupMember>,
}

impl GroupInfo {
    /// The single player with role `leader`.
    pub fn leader(&self) -> Result<&GroupMember> {
        let mut leaders = self
            .players
            .iter()
            .filter(|p| p.role == GroupRole::Leader);

        match (leaders.next(), leaders.next()) {
            (Some(leader), None) => Ok(leader),
            (None, _) => Err(HeosError::NoGroupLeader(self.name.clone())),
            (Some(_), Some(_)) => Err(HeosError::AmbiguousGroupLeader(self.name.clone())),
        }
    }

    pub fn members(&self) -> impl Iterator<Item = &GroupMember> {
        self.players.iter().filter(|p| p.role == GroupRole::Member)
    }

    pub fn to_entry(&self) -> Result<GroupEntry> {
        Ok(GroupEntry {
            name: self.name.clone(),
            id: self.gid,
            leader: self.leader()?.name.clone(),
            members: self.members().map(|m| m.name.clone()).collect(),
        })
    }
}

// HEOS firmwares send ids either as JSON numbers or as numeric strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Text(String),
}

impl RawId {
    fn into_id<E: serde::de::Error>(self) -> std::result::Result<i64, E> {
        match self {
            RawId::Int(v) => Ok(v),
            RawId::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid id: {}", s))),
        }
    }
}

fn de_id<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer)?.into_id()
}

fn de_opt_id<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawId>::deserialize(deserializer)?
        .map(|raw| raw.into_id::<D::Error>())
        .transpose()
}
