use std::time::Duration;

use crate::errors::Result;
use crate::ssdp::{self, DEFAULT_MX, SsdpResponse};

/// Device type advertised by HEOS speakers.
pub const HEOS_URN: &str = "urn:schemas-denon-com:device:ACT-Denon:1";

const DEFAULT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_RETRIES: u32 = 1;

/// Finds candidate HEOS devices on the network.
///
/// The registry only needs the device locations; [`SsdpLocator`] is the
/// network implementation.
pub trait DeviceLocator {
    fn locate(&self) -> Result<Vec<SsdpResponse>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SsdpLocator {
    pub service: String,
    /// Silence that ends one search round.
    pub timeout: Duration,
    pub retries: u32,
    pub mx: u32,
}

impl Default for SsdpLocator {
    fn default() -> Self {
        Self {
            service: HEOS_URN.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retries: DEFAULT_RETRIES,
            mx: DEFAULT_MX,
        }
    }
}

impl SsdpLocator {
    pub fn from_config(config: &heosconfig::Config) -> Self {
        Self {
            service: config.get_search_target(),
            timeout: config.get_discovery_timeout(),
            retries: config.get_discovery_retries(),
            mx: config.get_discovery_mx(),
        }
    }
}

impl DeviceLocator for SsdpLocator {
    fn locate(&self) -> Result<Vec<SsdpResponse>> {
        ssdp::discover(&self.service, self.timeout, self.retries, self.mx)
    }
}
