//! Control of Denon HEOS speakers over the local network.
//!
//! Devices are found with SSDP and driven through the HEOS CLI, a
//! line-oriented `heos://` protocol on TCP port 1255. The [`Registry`] keeps
//! the known players and groups in a YAML cache so later runs skip
//! discovery.
//!
//! ```no_run
//! use heoscontrol::{DEFAULT_CACHE_PATH, Registry, VolumeControl};
//!
//! let registry = Registry::open(DEFAULT_CACHE_PATH)?;
//! let mut kitchen = registry.player("Kitchen")?;
//! kitchen.set_volume(25)?;
//! # Ok::<(), heoscontrol::HeosError>(())
//! ```

pub mod cache;
pub mod capabilities;
pub mod client;
pub mod discovery;
pub mod errors;
pub mod group;
pub mod model;
pub mod player;
pub mod registry;
pub mod ssdp;

pub use cache::RegistrySnapshot;
pub use capabilities::{PlayState, TransportControl, VolumeControl};
pub use client::{ClientOptions, CommandResult, HEOS_PORT, HeosClient, Query, Response};
pub use discovery::{DeviceLocator, HEOS_URN, SsdpLocator};
pub use errors::{HeosError, Result};
pub use group::PlayerGroup;
pub use model::{GroupEntry, GroupInfo, GroupMember, GroupRole, PlayerEntry, PlayerInfo};
pub use player::Player;
pub use registry::{DEFAULT_CACHE_PATH, Registry};
pub use ssdp::{SsdpMessage, SsdpResponse};
