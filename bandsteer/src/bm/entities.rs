// Entity graph records

//! Groups, interfaces, BSSes, neighbors and clients
//!
//! Inbound configuration is staged in [`Versioned`] attributes and only
//! takes effect when the work pass commits it. Fields derived by the work
//! pass (resolved channel, owning BSS) are plain values.

use super::stats::ClientStats;
use crate::types::{Channel, HtMode, MacAddr, VifInfo};
use crate::versioned::{Commit, Versioned};
use std::collections::BTreeSet;
use std::fmt;

/// A set of radios steered together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: String,
    /// Interfaces owned by this group
    pub vifs: BTreeSet<String>,
    /// Interfaces claimed while another group still owns them
    pub pending_vifs: BTreeSet<String>,
}

impl Group {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            vifs: BTreeSet::new(),
            pending_vifs: BTreeSet::new(),
        }
    }
}

/// A local interface claimed by a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vif {
    pub name: String,
    pub group_id: String,
    /// Driver info, kept only while the interface is an AP
    pub info: Option<VifInfo>,
    /// BSSID of the BSS this interface backs, once up
    pub bss: Option<MacAddr>,
    /// A deferred shutdown is in progress
    pub shutting_down: bool,
}

impl Vif {
    pub fn new(name: &str, group_id: &str) -> Self {
        Self {
            name: name.to_string(),
            group_id: group_id.to_string(),
            info: None,
            bss: None,
            shutting_down: false,
        }
    }

    pub fn is_up(&self) -> bool {
        self.bss.is_some()
    }

    /// Channel the interface operates on, published only while enabled
    pub fn channel(&self) -> Option<Channel> {
        self.info.as_ref().filter(|i| i.enabled).and_then(|i| i.channel)
    }
}

/// What backs a BSS. Exactly one of the two, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BssOwner {
    Local { vif_name: String },
    Remote { neighbor: MacAddr },
}

/// A usable radio endpoint stations can be steered to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bss {
    pub bssid: MacAddr,
    pub group_id: String,
    pub owner: BssOwner,
    pub channel: Option<Channel>,
    pub op_class: Option<u8>,
}

impl Bss {
    pub fn is_local(&self) -> bool {
        matches!(self.owner, BssOwner::Local { .. })
    }

    pub fn vif_name(&self) -> Option<&str> {
        match &self.owner {
            BssOwner::Local { vif_name } => Some(vif_name),
            BssOwner::Remote { .. } => None,
        }
    }
}

/// A peer BSS known from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    pub bssid: MacAddr,
    /// Local interface the neighbor is reachable through; its group is the
    /// neighbor's group
    pub vif_name: Versioned<String>,
    pub channel_number: Versioned<u8>,
    pub ht_mode: Versioned<HtMode>,
    pub op_class: Versioned<u8>,
    pub priority: Versioned<u32>,
    pub(crate) channel: Option<Channel>,
    pub(crate) vif: Option<String>,
    pub(crate) up: bool,
}

impl Neighbor {
    pub fn new(bssid: MacAddr) -> Self {
        Self {
            bssid,
            vif_name: Versioned::new(),
            channel_number: Versioned::new(),
            ht_mode: Versioned::new(),
            op_class: Versioned::new(),
            priority: Versioned::new(),
            channel: None,
            vif: None,
            up: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.vif_name.is_dirty()
            || self.channel_number.is_dirty()
            || self.ht_mode.is_dirty()
            || self.op_class.is_dirty()
            || self.priority.is_dirty()
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn channel(&self) -> Option<Channel> {
        self.channel
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pref5g {
    Never,
    Always,
    Hwm,
    NonDfs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KickType {
    Deauth,
    BtmDeauth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceKick {
    /// Let the executor pick any better candidate
    Speculative,
    /// Steer towards the BSSID of the client steering BTM parameters
    Directed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsMode {
    Off,
    /// Keep the station on a requested local band
    Home,
    /// Push the station off every local BSS
    Away,
}

/// Band requested by inbound client steering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsBand {
    Band2G,
    Band5G,
    Band5GL,
    Band5GU,
    Band6G,
}

impl fmt::Display for CsBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CsBand::Band2G => "2G",
            CsBand::Band5G => "5G",
            CsBand::Band5GL => "5GL",
            CsBand::Band5GU => "5GU",
            CsBand::Band6G => "6G",
        })
    }
}

/// BTM request tuning for one kind of kick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BtmParams {
    pub bssid: Versioned<MacAddr>,
    pub disassoc_imminent: Versioned<bool>,
}

impl BtmParams {
    fn is_dirty(&self) -> bool {
        self.bssid.is_dirty() || self.disassoc_imminent.is_dirty()
    }

    fn commit(&mut self, name: &str) -> bool {
        let bssid = self.bssid.commit(&format!("{}.bssid", name));
        let imminent = self.disassoc_imminent.commit(&format!("{}.disassoc_imminent", name));
        bssid.changed || imminent.changed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsParams {
    pub band: Versioned<CsBand>,
    pub enforce_period_secs: Versioned<u32>,
}

impl CsParams {
    fn is_dirty(&self) -> bool {
        self.band.is_dirty() || self.enforce_period_secs.is_dirty()
    }

    fn commit(&mut self, name: &str) -> bool {
        let band = self.band.commit(&format!("{}.band", name));
        let period = self.enforce_period_secs.commit(&format!("{}.enforce_period_secs", name));
        band.changed || period.changed
    }
}

/// Outcome of committing a client's attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientCommit {
    pub changed: bool,
    pub force_kick: Commit,
    pub cs_mode: Commit,
}

/// Per-station steering configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub addr: MacAddr,
    pub hwm: Versioned<u32>,
    pub lwm: Versioned<u32>,
    pub bottom_lwm: Versioned<u32>,
    pub pref_5g: Versioned<Pref5g>,
    pub kick_type: Versioned<KickType>,
    pub pre_assoc_auth_block: Versioned<bool>,
    pub kick_upon_idle: Versioned<bool>,
    pub send_rrm_after_assoc: Versioned<bool>,
    pub backoff_secs: Versioned<u32>,
    pub backoff_exp_base: Versioned<u32>,
    pub max_rejects: Versioned<u32>,
    pub rejects_tmout_secs: Versioned<u32>,
    pub force_kick: Versioned<ForceKick>,
    pub sc_kick_type: Versioned<KickType>,
    pub sticky_kick_type: Versioned<KickType>,
    pub neighbor_list_filter_by_beacon_report: Versioned<bool>,
    pub cs_mode: Versioned<CsMode>,
    pub pref_5g_pre_assoc_block_timeout_msecs: Versioned<u32>,
    pub sc_btm_params: BtmParams,
    pub steering_btm_params: BtmParams,
    pub sticky_btm_params: BtmParams,
    pub cs_params: CsParams,
    pub(crate) stats: ClientStats,
    pub(crate) bps_activity: bool,
}

impl Client {
    pub fn new(addr: MacAddr) -> Self {
        Self {
            addr,
            hwm: Versioned::new(),
            lwm: Versioned::new(),
            bottom_lwm: Versioned::new(),
            pref_5g: Versioned::new(),
            kick_type: Versioned::new(),
            pre_assoc_auth_block: Versioned::new(),
            kick_upon_idle: Versioned::new(),
            send_rrm_after_assoc: Versioned::new(),
            backoff_secs: Versioned::new(),
            backoff_exp_base: Versioned::new(),
            max_rejects: Versioned::new(),
            rejects_tmout_secs: Versioned::new(),
            force_kick: Versioned::new(),
            sc_kick_type: Versioned::new(),
            sticky_kick_type: Versioned::new(),
            neighbor_list_filter_by_beacon_report: Versioned::new(),
            cs_mode: Versioned::new(),
            pref_5g_pre_assoc_block_timeout_msecs: Versioned::new(),
            sc_btm_params: BtmParams::default(),
            steering_btm_params: BtmParams::default(),
            sticky_btm_params: BtmParams::default(),
            cs_params: CsParams::default(),
            stats: ClientStats::default(),
            bps_activity: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.hwm.is_dirty()
            || self.lwm.is_dirty()
            || self.bottom_lwm.is_dirty()
            || self.pref_5g.is_dirty()
            || self.kick_type.is_dirty()
            || self.pre_assoc_auth_block.is_dirty()
            || self.kick_upon_idle.is_dirty()
            || self.send_rrm_after_assoc.is_dirty()
            || self.backoff_secs.is_dirty()
            || self.backoff_exp_base.is_dirty()
            || self.max_rejects.is_dirty()
            || self.rejects_tmout_secs.is_dirty()
            || self.force_kick.is_dirty()
            || self.sc_kick_type.is_dirty()
            || self.sticky_kick_type.is_dirty()
            || self.neighbor_list_filter_by_beacon_report.is_dirty()
            || self.cs_mode.is_dirty()
            || self.pref_5g_pre_assoc_block_timeout_msecs.is_dirty()
            || self.sc_btm_params.is_dirty()
            || self.steering_btm_params.is_dirty()
            || self.sticky_btm_params.is_dirty()
            || self.cs_params.is_dirty()
    }

    /// Commit every staged attribute
    pub fn commit(&mut self) -> ClientCommit {
        let prefix = format!("client {}", self.addr);
        let name = |attr: &str| format!("{}: {}", prefix, attr);

        let mut changed = false;
        changed |= self.hwm.commit(&name("hwm")).changed;
        changed |= self.lwm.commit(&name("lwm")).changed;
        changed |= self.bottom_lwm.commit(&name("bottom_lwm")).changed;
        changed |= self.pref_5g.commit(&name("pref_5g")).changed;
        changed |= self.kick_type.commit(&name("kick_type")).changed;
        changed |= self.pre_assoc_auth_block.commit(&name("pre_assoc_auth_block")).changed;
        changed |= self.kick_upon_idle.commit(&name("kick_upon_idle")).changed;
        changed |= self.send_rrm_after_assoc.commit(&name("send_rrm_after_assoc")).changed;
        changed |= self.backoff_secs.commit(&name("backoff_secs")).changed;
        changed |= self.backoff_exp_base.commit(&name("backoff_exp_base")).changed;
        changed |= self.max_rejects.commit(&name("max_rejects")).changed;
        changed |= self.rejects_tmout_secs.commit(&name("rejects_tmout_secs")).changed;
        let force_kick = self.force_kick.commit(&name("force_kick"));
        changed |= force_kick.changed;
        changed |= self.sc_kick_type.commit(&name("sc_kick_type")).changed;
        changed |= self.sticky_kick_type.commit(&name("sticky_kick_type")).changed;
        changed |= self
            .neighbor_list_filter_by_beacon_report
            .commit(&name("neighbor_list_filter_by_beacon_report"))
            .changed;
        let cs_mode = self.cs_mode.commit(&name("cs_mode"));
        changed |= cs_mode.changed;
        changed |= self
            .pref_5g_pre_assoc_block_timeout_msecs
            .commit(&name("pref_5g_pre_assoc_block_timeout_msecs"))
            .changed;
        changed |= self.sc_btm_params.commit(&name("sc_btm_params"));
        changed |= self.steering_btm_params.commit(&name("steering_btm_params"));
        changed |= self.sticky_btm_params.commit(&name("sticky_btm_params"));
        changed |= self.cs_params.commit(&name("cs_params"));

        ClientCommit {
            changed,
            force_kick,
            cs_mode,
        }
    }

    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STA: MacAddr = MacAddr::new([0x0a, 0, 0, 0, 0, 1]);

    #[test]
    fn test_client_commit_is_idempotent() {
        let mut client = Client::new(STA);
        assert!(!client.is_dirty());

        client.hwm.set(Some(35));
        assert!(client.is_dirty());
        let c = client.commit();
        assert!(c.changed);
        assert_eq!(client.hwm.get(), Some(35));

        // Same value again: nothing changed
        client.hwm.set(Some(35));
        assert!(!client.commit().changed);

        // Cleared value is reported as absent
        client.force_kick.set(Some(ForceKick::Speculative));
        let c = client.commit();
        assert!(c.force_kick.changed && c.force_kick.present);
        client.force_kick.set(None);
        let c = client.commit();
        assert!(c.force_kick.changed);
        assert!(!c.force_kick.present);
    }

    #[test]
    fn test_nested_params_commit() {
        let mut client = Client::new(STA);
        client.sc_btm_params.bssid.set(Some(MacAddr::new([2, 0, 0, 0, 0, 2])));
        client.cs_params.band.set(Some(CsBand::Band5GU));
        assert!(client.is_dirty());
        assert!(client.commit().changed);
        assert!(!client.is_dirty());
        assert_eq!(client.cs_params.band.get(), Some(CsBand::Band5GU));
    }

    #[test]
    fn test_vif_channel_only_while_enabled() {
        let mut vif = Vif::new("home-ap-24", "home");
        assert_eq!(vif.channel(), None);
        vif.info = Some(VifInfo {
            vif_name: "home-ap-24".to_string(),
            mac_addr: MacAddr::new([2, 0, 0, 0, 0, 1]),
            vif_type: crate::types::VifType::Ap,
            enabled: true,
            channel: Some(Channel::new_20mhz(2412)),
            ssid: "home".to_string(),
            acl_policy: crate::types::AclPolicy::None,
            acl: Vec::new(),
        });
        assert_eq!(vif.channel(), Some(Channel::new_20mhz(2412)));
        if let Some(info) = vif.info.as_mut() {
            info.enabled = false;
        }
        assert_eq!(vif.channel(), None);
    }
}
