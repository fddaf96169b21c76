use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::RegistrySnapshot;
use crate::client::{ClientOptions, HeosClient};
use crate::discovery::{DeviceLocator, SsdpLocator};
use crate::errors::{HeosError, Result};
use crate::group::PlayerGroup;
use crate::model::{GroupEntry, GroupInfo, PlayerEntry, PlayerInfo};
use crate::player::Player;

pub use heosconfig::DEFAULT_CACHE_PATH;

/// Known HEOS players and groups, keyed by name.
///
/// The registry only holds plain entries. Every [`Player`] or [`PlayerGroup`]
/// it hands out is a fresh facade with its own connection.
pub struct Registry {
    path: PathBuf,
    client_options: ClientOptions,
    locator: Box<dyn DeviceLocator>,
    players: BTreeMap<String, PlayerEntry>,
    groups: BTreeMap<String, GroupEntry>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("path", &self.path)
            .field("client_options", &self.client_options)
            .field("players", &self.players)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Empty registry. Nothing is read, written or discovered.
    pub fn new(
        path: impl Into<PathBuf>,
        client_options: ClientOptions,
        locator: Box<dyn DeviceLocator>,
    ) -> Self {
        Self {
            path: path.into(),
            client_options,
            locator,
            players: BTreeMap::new(),
            groups: BTreeMap::new(),
        }
    }

    /// Loads `path` when it exists, otherwise discovers the network and
    /// writes `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with(path, ClientOptions::default(), Box::new(SsdpLocator::default()))
    }

    pub fn open_with(
        path: impl Into<PathBuf>,
        client_options: ClientOptions,
        locator: Box<dyn DeviceLocator>,
    ) -> Result<Self> {
        let mut registry = Self::new(path, client_options, locator);
        if registry.path.exists() {
            registry.load()?;
        } else {
            debug!(
                "No registry cache at {}, discovering",
                registry.path.display()
            );
            registry.discover()?;
        }
        Ok(registry)
    }

    pub fn from_config(config: &heosconfig::Config) -> Result<Self> {
        Self::open_with(
            config.get_cache_path(),
            ClientOptions::from_config(config),
            Box::new(SsdpLocator::from_config(config)),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Searches the network and replaces the known players and groups with
    /// what the devices report, then saves the cache.
    ///
    /// Entries that are no longer reported are dropped. If any device fails
    /// to answer, the registry is left untouched.
    pub fn discover(&mut self) -> Result<()> {
        let responses = self.locator.locate()?;
        let hosts: BTreeSet<String> = responses.iter().filter_map(|r| r.host()).collect();
        debug!("Found {} HEOS host(s) in {} SSDP replies", hosts.len(), responses.len());

        let mut players = BTreeMap::new();
        let mut groups = Vec::new();

        for host in &hosts {
            let mut client = HeosClient::with_options(host, self.client_options);
            let found_players: Vec<PlayerInfo> = fetch_list(&mut client, "player/get_players")?;
            let found_groups: Vec<GroupInfo> = fetch_list(&mut client, "group/get_groups")?;
            client.close();

            for info in found_players {
                let entry = PlayerEntry::from(info);
                players.insert(entry.name.clone(), entry);
            }
            for info in found_groups {
                match info.to_entry() {
                    Ok(entry) => groups.push(entry),
                    Err(e) => warn!("Skipping group reported by {}: {}", host, e),
                }
            }
        }

        let groups = reconcile(&players, groups);
        info!(
            "Discovered {} player(s) and {} group(s) on {} host(s)",
            players.len(),
            groups.len(),
            hosts.len()
        );

        self.players = players;
        self.groups = groups;
        self.save()
    }

    /// Replaces the in-memory state with the cache file content.
    ///
    /// Groups whose leader is not a known player are dropped, as are unknown
    /// or repeated members.
    pub fn load(&mut self) -> Result<()> {
        let snapshot = RegistrySnapshot::read(&self.path)?;

        let players: BTreeMap<String, PlayerEntry> = snapshot
            .players
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        let groups = reconcile(&players, snapshot.groups);

        debug!(
            "Loaded {} player(s) and {} group(s) from {}",
            players.len(),
            groups.len(),
            self.path.display()
        );
        self.players = players;
        self.groups = groups;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.snapshot().write(&self.path)?;
        info!("Saved HEOS registry to {}", self.path.display());
        Ok(())
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            players: self.players.values().cloned().collect(),
            groups: self.groups.values().cloned().collect(),
        }
    }

    pub fn player_names(&self) -> Vec<&str> {
        self.players.keys().map(String::as_str).collect()
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.keys().map(String::as_str).collect()
    }

    pub fn player_entry(&self, name: &str) -> Option<&PlayerEntry> {
        self.players.get(name)
    }

    pub fn group_entry(&self, name: &str) -> Option<&GroupEntry> {
        self.groups.get(name)
    }

    pub fn players(&self) -> BTreeMap<String, Player> {
        self.players
            .values()
            .map(|entry| (entry.name.clone(), self.player_facade(entry)))
            .collect()
    }

    pub fn groups(&self) -> BTreeMap<String, PlayerGroup> {
        self.groups
            .values()
            .filter_map(|entry| {
                self.group_facade(entry)
                    .map(|group| (entry.name.clone(), group))
            })
            .collect()
    }

    pub fn player(&self, name: &str) -> Result<Player> {
        self.players
            .get(name)
            .map(|entry| self.player_facade(entry))
            .ok_or_else(|| HeosError::UnknownPlayer(name.to_string()))
    }

    pub fn group(&self, name: &str) -> Result<PlayerGroup> {
        let entry = self
            .groups
            .get(name)
            .ok_or_else(|| HeosError::UnknownGroup(name.to_string()))?;
        self.group_facade(entry)
            .ok_or_else(|| HeosError::UnknownPlayer(entry.leader.clone()))
    }

    fn player_facade(&self, entry: &PlayerEntry) -> Player {
        Player::new(
            entry.id,
            &entry.name,
            HeosClient::with_options(&entry.host, self.client_options),
        )
    }

    // A group is reached through its leader's host.
    fn group_facade(&self, entry: &GroupEntry) -> Option<PlayerGroup> {
        let leader = self.players.get(&entry.leader)?;
        Some(PlayerGroup::new(
            entry.id,
            &entry.name,
            HeosClient::with_options(&leader.host, self.client_options),
        ))
    }
}

fn fetch_list<T: DeserializeOwned>(client: &mut HeosClient, command: &str) -> Result<Vec<T>> {
    let response = client.send_command(command, &[])?.raise_for_result()?;
    match response.payload {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(payload) => serde_json::from_value(payload).map_err(|e| {
            HeosError::malformed_reply(client.host(), format!("invalid {} payload: {}", command, e))
        }),
    }
}

/// Keeps the groups that can be resolved against `players`.
fn reconcile(
    players: &BTreeMap<String, PlayerEntry>,
    groups: Vec<GroupEntry>,
) -> BTreeMap<String, GroupEntry> {
    let mut resolved = BTreeMap::new();

    for mut group in groups {
        if !players.contains_key(&group.leader) {
            warn!(
                "Dropping group '{}': leader '{}' is not a known player",
                group.name, group.leader
            );
            continue;
        }

        let mut seen = BTreeSet::new();
        let leader = group.leader.clone();
        group.members.retain(|member| {
            if member == &leader || !seen.insert(member.clone()) {
                warn!("Group '{}' lists '{}' more than once", group.name, member);
                return false;
            }
            if !players.contains_key(member) {
                warn!("Group '{}' member '{}' is not a known player", group.name, member);
                return false;
            }
            true
        });

        resolved.insert(group.name.clone(), group);
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssdp::SsdpResponse;
    use std::fs;

    struct NoDevices;

    impl DeviceLocator for NoDevices {
        fn locate(&self) -> Result<Vec<SsdpResponse>> {
            Ok(Vec::new())
        }
    }

    fn offline(path: &Path) -> Registry {
        let options = ClientOptions {
            port: 1,
            ..Default::default()
        };
        Registry::new(path, options, Box::new(NoDevices))
    }

    fn player(name: &str, host: &str, id: i64) -> PlayerEntry {
        PlayerEntry {
            name: name.to_string(),
            model: "HEOS 1".to_string(),
            host: host.to_string(),
            id,
        }
    }

    fn players() -> BTreeMap<String, PlayerEntry> {
        [player("Kitchen", "10.0.0.2", 1), player("Office", "10.0.0.3", 2)]
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect()
    }

    #[test]
    fn test_default_cache_path_matches_config() {
        assert_eq!(
            heosconfig::Config::defaults().get_cache_path(),
            PathBuf::from(DEFAULT_CACHE_PATH)
        );
    }

    #[test]
    fn test_reconcile_repairs_groups() {
        let groups = vec![
            GroupEntry {
                name: "Whole Home".to_string(),
                id: -21,
                leader: "Kitchen".to_string(),
                members: vec![
                    "Office".to_string(),
                    "Garage".to_string(),
                    "Office".to_string(),
                    "Kitchen".to_string(),
                ],
            },
            GroupEntry {
                name: "Outside".to_string(),
                id: -22,
                leader: "Porch".to_string(),
                members: vec!["Kitchen".to_string()],
            },
        ];

        let resolved = reconcile(&players(), groups);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved["Whole Home"].members, vec!["Office"]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".heos");

        let mut registry = offline(&path);
        registry.players = players();
        registry.groups = reconcile(
            &registry.players,
            vec![GroupEntry {
                name: "Whole Home".to_string(),
                id: -21,
                leader: "Kitchen".to_string(),
                members: vec!["Office".to_string()],
            }],
        );
        registry.save().unwrap();

        let mut reloaded = offline(&path);
        reloaded.load().unwrap();
        assert_eq!(reloaded.players, registry.players);
        assert_eq!(reloaded.groups, registry.groups);
        assert_eq!(reloaded.snapshot(), registry.snapshot());
    }

    #[test]
    fn test_load_drops_dangling_group() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".heos");
        fs::write(
            &path,
            "players:\n- name: Kitchen\n  model: HEOS 1\n  host: 10.0.0.2\n  id: 1\n\
             groups:\n- name: Outside\n  id: -22\n  leader: Porch\n  members: []\n",
        )
        .unwrap();

        let registry =
            Registry::open_with(&path, ClientOptions::default(), Box::new(NoDevices)).unwrap();
        assert_eq!(registry.player_names(), vec!["Kitchen"]);
        assert!(registry.group_names().is_empty());
        assert!(registry.group("Outside").unwrap_err().is_not_found());
    }

    #[test]
    fn test_open_without_cache_discovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".heos");

        let registry =
            Registry::open_with(&path, ClientOptions::default(), Box::new(NoDevices)).unwrap();
        assert!(registry.players().is_empty());
        assert!(registry.groups().is_empty());
        assert!(path.exists());
    }

    #[test]
    fn test_facades() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = offline(&dir.path().join(".heos"));
        registry.players = players();
        registry.groups = reconcile(
            &registry.players,
            vec![GroupEntry {
                name: "Whole Home".to_string(),
                id: -21,
                leader: "Office".to_string(),
                members: vec!["Kitchen".to_string()],
            }],
        );

        let facades = registry.players();
        assert_eq!(facades.keys().collect::<Vec<_>>(), vec!["Kitchen", "Office"]);
        assert_eq!(facades["Office"].id(), 2);

        let group = registry.group("Whole Home").unwrap();
        assert_eq!(group.id(), -21);
        assert_eq!(group.host(), "10.0.0.3");

        assert!(matches!(
            registry.player("Garage"),
            Err(HeosError::UnknownPlayer(name)) if name == "Garage"
        ));
        assert!(matches!(registry.group("Garage"), Err(HeosError::UnknownGroup(_))));
        assert_eq!(registry.player_entry("Kitchen").unwrap().host, "10.0.0.2");
        assert_eq!(registry.group_entry("Whole Home").unwrap().leader, "Office");
    }
}
