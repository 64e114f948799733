// Shared types for the steering engine

//! Shared data structures
//!
//! This module defines the radio vocabulary used across the engine (MAC
//! addresses, bands, channels, operating classes), the driver-facing
//! records describing local interfaces and stations, and the daemon
//! configuration structures.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while parsing addresses and information elements
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid MAC address: {0:?}")]
    MacAddr(String),
    #[error("truncated information element {id} at offset {offset}")]
    TruncatedIe { id: u8, offset: usize },
}

/// 48-bit IEEE 802 MAC address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Build an address from its six octets
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MacAddr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| ParseError::MacAddr(s.to_string()))?;
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParseError::MacAddr(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParseError::MacAddr(s.to_string()));
        }
        Ok(Self(octets))
    }
}

/// Radio band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Band {
    Band2G,
    Band5G,
    Band6G,
}

impl Band {
    /// Classify a control frequency in MHz
    pub fn from_freq(freq_mhz: u32) -> Option<Band> {
        match freq_mhz {
            2401..=2495 => Some(Band::Band2G),
            5150..=5925 => Some(Band::Band5G),
            5926..=7125 => Some(Band::Band6G),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Band::Band2G => "2.4G",
            Band::Band5G => "5G",
            Band::Band6G => "6G",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convert a channel number within a band to its center frequency
pub fn chan_to_freq(band: Band, chan: u8) -> Option<u32> {
    let chan = u32::from(chan);
    match band {
        Band::Band2G => match chan {
            1..=13 => Some(2407 + 5 * chan),
            14 => Some(2484),
            _ => None,
        },
        Band::Band5G => match chan {
            32..=177 => Some(5000 + 5 * chan),
            _ => None,
        },
        Band::Band6G => match chan {
            2 => Some(5935),
            1..=233 => Some(5950 + 5 * chan),
            _ => None,
        },
    }
}

/// Convert a frequency back to its channel number
pub fn freq_to_chan(freq_mhz: u32) -> Option<u8> {
    let chan = match Band::from_freq(freq_mhz)? {
        Band::Band2G if freq_mhz == 2484 => 14,
        Band::Band2G => freq_mhz.checked_sub(2407)? / 5,
        Band::Band5G => freq_mhz.checked_sub(5000)? / 5,
        Band::Band6G if freq_mhz == 5935 => 2,
        Band::Band6G => freq_mhz.checked_sub(5950)? / 5,
    };
    u8::try_from(chan).ok()
}

/// Guess the band of a bare channel number (no 6 GHz)
pub fn chan_to_band_guess(chan: u8) -> Option<Band> {
    match chan {
        1..=14 => Some(Band::Band2G),
        32..=177 => Some(Band::Band5G),
        _ => None,
    }
}

/// Channel bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelWidth {
    Mhz20,
    Mhz40,
    Mhz80,
    Mhz160,
    Mhz80p80,
    Mhz320,
}

impl ChannelWidth {
    /// Width of the (primary) segment in MHz
    pub fn mhz(self) -> u32 {
        match self {
            ChannelWidth::Mhz20 => 20,
            ChannelWidth::Mhz40 => 40,
            ChannelWidth::Mhz80 | ChannelWidth::Mhz80p80 => 80,
            ChannelWidth::Mhz160 => 160,
            ChannelWidth::Mhz320 => 320,
        }
    }
}

/// Legacy HT mode strings as carried by neighbor configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HtMode {
    Ht20,
    Ht2040,
    Ht40,
    Ht40Plus,
    Ht40Minus,
    Ht80,
    Ht160,
    Ht80Plus80,
    Ht320,
}

impl HtMode {
    pub fn width(self) -> ChannelWidth {
        match self {
            HtMode::Ht20 => ChannelWidth::Mhz20,
            HtMode::Ht2040 | HtMode::Ht40 | HtMode::Ht40Plus | HtMode::Ht40Minus => {
                ChannelWidth::Mhz40
            }
            HtMode::Ht80 => ChannelWidth::Mhz80,
            HtMode::Ht160 => ChannelWidth::Mhz160,
            HtMode::Ht80Plus80 => ChannelWidth::Mhz80p80,
            HtMode::Ht320 => ChannelWidth::Mhz320,
        }
    }
}

/// Position of the secondary 20 MHz for 40 MHz operating classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sideband {
    Upper,
    Lower,
}

/// Properties of a global operating class (IEEE 802.11 Table E-4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpClassInfo {
    pub band: Band,
    pub width: ChannelWidth,
    pub sideband: Option<Sideband>,
}

/// Look up a global operating class
pub fn op_class_info(op_class: u8) -> Option<OpClassInfo> {
    use Band::*;
    use ChannelWidth::*;
    let (band, width, sideband) = match op_class {
        81 | 82 => (Band2G, Mhz20, None),
        83 => (Band2G, Mhz40, Some(Sideband::Upper)),
        84 => (Band2G, Mhz40, Some(Sideband::Lower)),
        115 | 118 | 121 | 124 | 125 => (Band5G, Mhz20, None),
        116 | 119 | 122 | 126 => (Band5G, Mhz40, Some(Sideband::Upper)),
        117 | 120 | 123 | 127 => (Band5G, Mhz40, Some(Sideband::Lower)),
        128 => (Band5G, Mhz80, None),
        129 => (Band5G, Mhz160, None),
        130 => (Band5G, Mhz80p80, None),
        131 | 136 => (Band6G, Mhz20, None),
        132 => (Band6G, Mhz40, None),
        133 => (Band6G, Mhz80, None),
        134 => (Band6G, Mhz160, None),
        135 => (Band6G, Mhz80p80, None),
        137 => (Band6G, Mhz320, None),
        _ => return None,
    };
    Some(OpClassInfo {
        band,
        width,
        sideband,
    })
}

/// The 20 MHz operating class a channel number belongs to
pub fn op_class_20mhz(band: Band, chan: u8) -> Option<u8> {
    match band {
        Band::Band2G => match chan {
            1..=13 => Some(81),
            14 => Some(82),
            _ => None,
        },
        Band::Band5G => match chan {
            36..=48 => Some(115),
            52..=64 => Some(118),
            100..=144 => Some(121),
            149..=161 => Some(124),
            165..=177 => Some(125),
            _ => None,
        },
        Band::Band6G => match chan {
            2 => Some(136),
            1..=233 => Some(131),
            _ => None,
        },
    }
}

// 5 GHz block center frequencies per width
const CENTERS_5G_40: [u32; 14] = [
    5190, 5230, 5270, 5310, 5510, 5550, 5590, 5630, 5670, 5710, 5755, 5795, 5835, 5875,
];
const CENTERS_5G_80: [u32; 7] = [5210, 5290, 5530, 5610, 5690, 5775, 5855];
const CENTERS_5G_160: [u32; 3] = [5250, 5570, 5815];

/// DFS range on 5 GHz (channels 52..=144)
const DFS_LOW_MHZ: u32 = 5250;
const DFS_HIGH_MHZ: u32 = 5730;

fn block_center(centers: &[u32], width: u32, freq: u32) -> Option<u32> {
    centers
        .iter()
        .copied()
        .find(|c| freq > c - width / 2 && freq < c + width / 2)
}

/// Operating channel: control frequency, width and segment center
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel {
    pub control_freq_mhz: u32,
    pub width: ChannelWidth,
    pub center_freq0_mhz: u32,
}

impl Channel {
    /// A plain 20 MHz channel
    pub fn new_20mhz(control_freq_mhz: u32) -> Self {
        Self {
            control_freq_mhz,
            width: ChannelWidth::Mhz20,
            center_freq0_mhz: control_freq_mhz,
        }
    }

    /// Build a channel from a control channel number and width.
    /// For 40 MHz on 2.4 GHz the secondary channel is taken from `sideband`,
    /// or guessed from the channel number when absent.
    pub fn from_number_width(
        band: Band,
        chan: u8,
        width: ChannelWidth,
        sideband: Option<Sideband>,
    ) -> Option<Channel> {
        let freq = chan_to_freq(band, chan)?;
        let w = width.mhz();
        let center = match (band, width) {
            (_, ChannelWidth::Mhz20) => freq,
            (Band::Band2G, ChannelWidth::Mhz40) => {
                let side = sideband.unwrap_or(if chan <= 7 {
                    Sideband::Upper
                } else {
                    Sideband::Lower
                });
                match side {
                    Sideband::Upper => freq + 10,
                    Sideband::Lower => freq - 10,
                }
            }
            (Band::Band2G, _) => return None,
            (Band::Band5G, ChannelWidth::Mhz40) => block_center(&CENTERS_5G_40, w, freq)?,
            (Band::Band5G, ChannelWidth::Mhz80 | ChannelWidth::Mhz80p80) => {
                block_center(&CENTERS_5G_80, w, freq)?
            }
            (Band::Band5G, ChannelWidth::Mhz160) => block_center(&CENTERS_5G_160, w, freq)?,
            (Band::Band5G, ChannelWidth::Mhz320) => return None,
            (Band::Band6G, _) => {
                // 6 GHz blocks tile from 5945 MHz
                let offset = freq.checked_sub(5945)?;
                5945 + (offset / w) * w + w / 2
            }
        };
        Some(Channel {
            control_freq_mhz: freq,
            width,
            center_freq0_mhz: center,
        })
    }

    /// Build a channel from a global operating class and channel number
    pub fn from_op_class(op_class: u8, chan: u8) -> Option<Channel> {
        let info = op_class_info(op_class)?;
        Channel::from_number_width(info.band, chan, info.width, info.sideband)
    }

    pub fn band(&self) -> Option<Band> {
        Band::from_freq(self.control_freq_mhz)
    }

    pub fn number(&self) -> Option<u8> {
        freq_to_chan(self.control_freq_mhz)
    }

    /// True when any 20 MHz sub-channel falls in the 5 GHz DFS range
    pub fn is_dfs(&self) -> bool {
        if self.band() != Some(Band::Band5G) {
            return false;
        }
        let half = self.width.mhz() / 2;
        let low = self.center_freq0_mhz.saturating_sub(half);
        let high = self.center_freq0_mhz + half;
        low < DFS_HIGH_MHZ && high > DFS_LOW_MHZ
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}MHz/{}MHz@{}",
            self.control_freq_mhz,
            self.width.mhz(),
            self.center_freq0_mhz
        )
    }
}

/// ACL policy of an AP interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AclPolicy {
    #[default]
    None,
    AllowList,
    DenyList,
}

/// Interface role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VifType {
    Ap,
    Sta,
}

/// Driver view of a local wireless interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VifInfo {
    pub vif_name: String,
    pub mac_addr: MacAddr,
    pub vif_type: VifType,
    pub enabled: bool,
    pub channel: Option<Channel>,
    pub ssid: String,
    pub acl_policy: AclPolicy,
    pub acl: Vec<MacAddr>,
}

impl VifInfo {
    /// True when this interface is an AP that is currently enabled
    pub fn is_active_ap(&self) -> bool {
        self.vif_type == VifType::Ap && self.enabled
    }

    /// Whether the interface ACL currently keeps `sta` out
    pub fn acl_blocks(&self, sta: &MacAddr) -> bool {
        match self.acl_policy {
            AclPolicy::None => false,
            AclPolicy::DenyList => self.acl.contains(sta),
            AclPolicy::AllowList => !self.acl.contains(sta),
        }
    }
}

/// A station association as reported by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaInfo {
    pub addr: MacAddr,
    pub vif_name: String,
    pub assoc_ies: Vec<u8>,
    pub connected_at: Duration,
}

/// An active station link: the BSS it is associated to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub bssid: MacAddr,
    pub vif_name: String,
}

/// A received probe request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReq {
    pub sta_addr: MacAddr,
    /// Length of the SSID element; 0 means a broadcast probe
    pub ssid_len: usize,
    pub snr: u32,
}

impl ProbeReq {
    pub fn is_broadcast(&self) -> bool {
        self.ssid_len == 0
    }
}

/// BTM response status code: reject, candidate list provided
pub const BTM_STATUS_REJECT_CANDIDATE_LIST: u8 = 6;

/// A BSS Transition Management response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtmResponse {
    pub status: u8,
    pub target_bssid: Option<MacAddr>,
}

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub steering: SteeringConfig,
}

/// General configuration options
#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Where SIGUSR1 writes the engine dump
    #[serde(default = "default_dump_path")]
    pub dump_path: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            dump_path: default_dump_path(),
        }
    }
}

/// Steering engine tunables
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SteeringConfig {
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    #[serde(default = "default_btm_rate_limit")]
    pub btm_rate_limit_secs: u64,
    #[serde(default = "default_btm_max_neighbors")]
    pub btm_max_neighbors: usize,
    #[serde(default = "default_deauth_delay")]
    pub deauth_delay_secs: u64,
    #[serde(default = "default_rrm_validity")]
    pub rrm_validity_secs: u64,
}

impl Default for SteeringConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: default_report_interval(),
            btm_rate_limit_secs: default_btm_rate_limit(),
            btm_max_neighbors: default_btm_max_neighbors(),
            deauth_delay_secs: default_deauth_delay(),
            rrm_validity_secs: default_rrm_validity(),
        }
    }
}

// Default values for configuration
fn default_log_level() -> String {
    "info".to_string()
}

fn default_dump_path() -> String {
    "/run/bandsteer/dump".to_string()
}

fn default_report_interval() -> u64 {
    60
}

fn default_btm_rate_limit() -> u64 {
    3
}

fn default_btm_max_neighbors() -> usize {
    6
}

fn default_deauth_delay() -> u64 {
    10
}

fn default_rrm_validity() -> u64 {
    15
}
