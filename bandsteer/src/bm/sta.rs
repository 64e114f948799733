// Per-station policy configuration

//! Station glue
//!
//! A [`BmSta`] pairs a client with a group. Every work pass rebuilds the
//! configuration of each policy on its stack from a [`GroupView`] snapshot
//! and the client's committed attributes; the setters ignore configs that
//! did not change.

use super::entities::{Client, ForceKick, KickType, Pref5g};
use super::kick_state::KickState;
use super::rrm::{RrmScan, RrmTarget};
use super::steering::{ClientSteering, CsInput, CsState, CsUpdate};
use crate::candidate::Preference;
use crate::ieee80211::AssocReqInfo;
use crate::policy::bss_filter::BssFilterConfig;
use crate::policy::chan_cap::ChanCapConfig;
use crate::policy::pre_assoc::{BackoffCondition, PreAssocConfig, RejectCondition};
use crate::policy::snr_level::{SnrLevelConfig, SnrLevelMode};
use crate::policy::snr_xing::{SnrXingConfig, SnrXingMode, TxRxLimit};
use crate::steer::SteerSta;
use crate::types::{op_class_20mhz, Band, Channel, MacAddr};
use std::time::Duration;

/// LWM traffic gate: below this many bytes per sample the link is idle
pub const LWM_IDLE_DELTA_BYTES: u64 = 250;

/// HWM traffic gate when kicking only idle stations
pub const HWM_ACTIVE_BYTES: u64 = 2000;

/// A BSS of the group as seen by the builders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BssView {
    pub bssid: MacAddr,
    /// Backing interface for local BSSes
    pub vif_name: Option<String>,
    pub channel: Option<Channel>,
    pub shutting_down: bool,
}

impl BssView {
    pub fn is_local(&self) -> bool {
        self.vif_name.is_some()
    }

    fn band(&self) -> Option<Band> {
        self.channel.as_ref().and_then(Channel::band)
    }
}

/// A group interface as seen by the builders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VifView {
    pub name: String,
    pub mac: MacAddr,
    /// Channel from driver info, regardless of the enabled state
    pub channel: Option<Channel>,
    pub ssid: String,
    pub up: bool,
}

/// Snapshot of one group taken at the start of a station recalc
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupView {
    pub id: String,
    pub bsses: Vec<BssView>,
    pub vifs: Vec<VifView>,
}

impl GroupView {
    /// First interface whose channel is on `band`
    pub fn vif_by_band(&self, band: Band) -> Option<&VifView> {
        self.vifs
            .iter()
            .find(|v| v.channel.as_ref().and_then(Channel::band) == Some(band))
    }

    pub fn vif(&self, name: &str) -> Option<&VifView> {
        self.vifs.iter().find(|v| v.name == name)
    }

    pub fn uses_dfs(&self) -> bool {
        self.vifs
            .iter()
            .any(|v| v.channel.as_ref().is_some_and(Channel::is_dfs))
    }

    pub fn bssids(&self) -> Vec<MacAddr> {
        self.bsses.iter().map(|b| b.bssid).collect()
    }

    fn local_bsses(&self) -> Vec<(MacAddr, Option<Channel>)> {
        self.bsses
            .iter()
            .filter(|b| b.is_local())
            .map(|b| (b.bssid, b.channel))
            .collect()
    }
}

/// Everything outside the group is out of scope
pub fn bss_filter_config(view: &GroupView) -> Option<BssFilterConfig> {
    if view.bsses.is_empty() {
        return None;
    }
    Some(BssFilterConfig {
        included_preference: None,
        excluded_preference: Some(Preference::OutOfScope),
        bssids: view.bssids(),
    })
}

/// Block BSSes of interfaces going down, and every neighbor along with
/// them, so stations only move within the remaining local BSSes
pub fn defer_vif_down_deny_config(view: &GroupView) -> Option<BssFilterConfig> {
    let mut bssids: Vec<MacAddr> = view
        .bsses
        .iter()
        .filter(|b| b.is_local() && b.shutting_down)
        .map(|b| b.bssid)
        .collect();
    if bssids.is_empty() {
        return None;
    }
    bssids.extend(view.bsses.iter().filter(|b| !b.is_local()).map(|b| b.bssid));
    Some(BssFilterConfig {
        included_preference: Some(Preference::HardBlocked),
        excluded_preference: None,
        bssids,
    })
}

pub fn defer_vif_down_allow_config(view: &GroupView) -> Option<BssFilterConfig> {
    let any_shutting_down = view.bsses.iter().any(|b| b.is_local() && b.shutting_down);
    if !any_shutting_down {
        return None;
    }
    let bssids: Vec<MacAddr> = view
        .bsses
        .iter()
        .filter(|b| b.is_local() && !b.shutting_down)
        .map(|b| b.bssid)
        .collect();
    if bssids.is_empty() {
        return None;
    }
    Some(BssFilterConfig {
        included_preference: Some(Preference::Available),
        excluded_preference: None,
        bssids,
    })
}

pub fn pre_assoc_2g_config(sta: &MacAddr, view: &GroupView, client: &Client) -> Option<PreAssocConfig> {
    let vif = view.vif_by_band(Band::Band2G).filter(|v| v.up)?;
    let backoff_timeout_secs = client.backoff_secs.get()?;
    let backoff_exp_base = client.backoff_exp_base.get()?;
    let max_rejects = client.max_rejects.get()?;
    let rejects_tmout_secs = client.rejects_tmout_secs.get()?;
    let block_timeout_msecs = client.pref_5g_pre_assoc_block_timeout_msecs.get()?;

    let reject_condition = match (max_rejects, block_timeout_msecs) {
        (limit, 0) if limit > 0 => RejectCondition::Counter {
            reject_limit: limit,
            reject_timeout: Duration::from_secs(u64::from(rejects_tmout_secs)),
        },
        (0, msecs) if msecs > 0 => RejectCondition::Timer {
            reject_timeout: Duration::from_millis(u64::from(msecs)),
        },
        _ => {
            log::warn!(
                "Sta {}: ambiguous pre-assoc reject condition, max_rejects: {} block timeout: {} ms",
                sta,
                max_rejects,
                block_timeout_msecs
            );
            return None;
        }
    };

    let backoff_condition = match client.pref_5g.get()? {
        Pref5g::Never => return None,
        Pref5g::Always => BackoffCondition::None,
        Pref5g::NonDfs if view.uses_dfs() => return None,
        Pref5g::NonDfs => BackoffCondition::None,
        Pref5g::Hwm => BackoffCondition::ThresholdSnr(client.hwm.get()?),
    };

    Some(PreAssocConfig {
        bssid: vif.mac,
        backoff_timeout_secs,
        backoff_exp_base,
        reject_condition,
        backoff_condition,
        immediate_backoff_on_auth_req: !client.pre_assoc_auth_block.get().unwrap_or(false),
    })
}

pub fn lwm_config(view: &GroupView, client: &Client, band: Band) -> Option<SnrXingConfig> {
    let vif = view.vif_by_band(band).filter(|v| v.up)?;
    let threshold_snr = client.lwm.get()?;
    let active = client.kick_upon_idle.get()?;
    Some(SnrXingConfig {
        bssid: vif.mac,
        threshold_snr,
        mode: SnrXingMode::Lwm(TxRxLimit {
            active,
            delta_bytes: LWM_IDLE_DELTA_BYTES,
        }),
    })
}

pub fn bottom_lwm_2g_config(view: &GroupView, client: &Client) -> Option<SnrXingConfig> {
    let vif = view.vif_by_band(Band::Band2G).filter(|v| v.up)?;
    Some(SnrXingConfig {
        bssid: vif.mac,
        threshold_snr: client.bottom_lwm.get()?,
        mode: SnrXingMode::BottomLwm,
    })
}

/// Keep 2.4 GHz stations above HWM off every 2.4 GHz BSS, pointing them
/// only at co-located 5/6 GHz BSSes
pub fn hwm_2g_config(view: &GroupView, client: &Client) -> Option<SnrLevelConfig> {
    let threshold_snr = client.hwm.get()?;
    let threshold_bytes = client
        .kick_upon_idle
        .get()
        .map(|idle_only| if idle_only { HWM_ACTIVE_BYTES } else { 0 });

    let mut from_bssids = Vec::new();
    let mut to_bssids = Vec::new();
    for bss in &view.bsses {
        match bss.band() {
            Some(Band::Band2G) => from_bssids.push(bss.bssid),
            Some(Band::Band5G | Band::Band6G) if bss.is_local() => to_bssids.push(bss.bssid),
            Some(Band::Band5G | Band::Band6G) => from_bssids.push(bss.bssid),
            None => {}
        }
    }

    Some(SnrLevelConfig {
        mode: SnrLevelMode::BlockFromBssidsWhenAbove,
        threshold_snr,
        threshold_bytes,
        from_bssids,
        to_bssids,
    })
}

pub fn chan_cap_config(view: &GroupView, assoc: Option<&AssocReqInfo>) -> Option<ChanCapConfig> {
    let assoc = assoc?;
    let bss_bands = view
        .bsses
        .iter()
        .filter_map(|b| b.band().map(|band| (b.bssid, band)))
        .collect();
    Some(ChanCapConfig {
        caps: assoc.band_caps(),
        bss_bands,
    })
}

/// Filter steering a directed force kick towards the client steering
/// target. `link_bssid` is the BSS the station is on, if connected.
pub fn directed_kick_config(
    sta: &MacAddr,
    client: &Client,
    cs_in_progress: bool,
    link_bssid: Option<MacAddr>,
) -> Option<BssFilterConfig> {
    if !cs_in_progress {
        log::warn!("Sta {}: directed kick requested outside of client steering", sta);
        return None;
    }
    let Some(target) = client.sc_btm_params.bssid.get() else {
        log::warn!("Sta {}: cannot issue directed kick, no sc_btm_params bssid", sta);
        return None;
    };

    let kick_type = client.sc_kick_type.get().unwrap_or_else(|| {
        log::info!("Sta {}: implying deauth sc_kick_type", sta);
        KickType::Deauth
    });
    match kick_type {
        KickType::Deauth => {
            let Some(serving) = link_bssid else {
                log::debug!("Sta {}: cannot issue directed kick (deauth), no link", sta);
                return None;
            };
            Some(BssFilterConfig {
                included_preference: Some(Preference::HardBlocked),
                excluded_preference: None,
                bssids: vec![serving],
            })
        }
        KickType::BtmDeauth => Some(BssFilterConfig {
            included_preference: Some(Preference::Available),
            excluded_preference: Some(Preference::HardBlocked),
            bssids: vec![target],
        }),
    }
}

/// Beacon report targets: every group BSS on a band other than the link's
pub fn rrm_targets(view: &GroupView, link_band: Band) -> Vec<RrmTarget> {
    view.bsses
        .iter()
        .filter_map(|b| {
            let channel = b.channel?;
            let band = channel.band()?;
            if band == link_band {
                return None;
            }
            let number = channel.number()?;
            let op_class = op_class_20mhz(band, number)?;
            Some(RrmTarget {
                op_class,
                channel: number,
            })
        })
        .collect()
}

/// A client attached to a group
pub struct BmSta {
    addr: MacAddr,
    group_id: String,
    pub(crate) steer: SteerSta,
    pub(crate) kick: KickState,
    pub(crate) rrm: Option<RrmScan>,
    pub(crate) cs: ClientSteering,
    pub(crate) assoc: Option<AssocReqInfo>,
    /// Set when the client's force kick changed
    pub(crate) issue_force_kick: bool,
    /// Set when the client's steering mode changed
    pub(crate) client_steering_recalc: bool,
}

impl BmSta {
    pub fn new(addr: MacAddr, group_id: &str) -> Self {
        Self {
            addr,
            group_id: group_id.to_string(),
            steer: SteerSta::new(addr),
            kick: KickState::new(),
            rrm: None,
            cs: ClientSteering::new(addr),
            assoc: None,
            issue_force_kick: false,
            client_steering_recalc: false,
        }
    }

    pub fn addr(&self) -> &MacAddr {
        &self.addr
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn steer(&self) -> &SteerSta {
        &self.steer
    }

    pub fn client_steering_in_progress(&self) -> bool {
        self.cs.in_progress()
    }

    fn link_bssid(&self) -> Option<MacAddr> {
        self.steer.links().last().map(|l| l.bssid)
    }

    /// Rebuild every policy config from the group and client. Returns a
    /// client steering state to report, if any.
    pub(crate) fn recalc_configs(&mut self, view: &GroupView, client: &Client, now: Duration) -> Option<CsState> {
        let addr = self.addr;
        self.steer.set_candidates(&view.bssids());

        let assoc = self.assoc.as_ref();
        self.steer.configure(|stack, m| {
            stack.bss_filter.set_config(bss_filter_config(view), m);
            stack.chan_cap.set_config(chan_cap_config(view, assoc), m);
            stack.defer_vif_down_deny.set_config(defer_vif_down_deny_config(view), m);
            stack.defer_vif_down_allow.set_config(defer_vif_down_allow_config(view), m);
            stack.pre_assoc_2g.set_config(pre_assoc_2g_config(&addr, view, client), m);
            stack.lwm_2g.set_config(lwm_config(view, client, Band::Band2G), m);
            stack.lwm_5g.set_config(lwm_config(view, client, Band::Band5G), m);
            stack.lwm_6g.set_config(lwm_config(view, client, Band::Band6G), m);
            stack.bottom_lwm_2g.set_config(bottom_lwm_2g_config(view, client), m);
            stack.hwm_2g.set_config(hwm_2g_config(view, client), now, m);
        });

        if self.issue_force_kick {
            self.issue_force_kick = false;
            self.issue_force_kick(client, now);
        }

        let mut report = None;
        if self.client_steering_recalc {
            self.client_steering_recalc = false;
            let local_bsses = view.local_bsses();
            let input = CsInput {
                mode: client.cs_mode.get(),
                band: client.cs_params.band.get(),
                enforce_period_secs: client.cs_params.enforce_period_secs.get(),
                local_bsses: &local_bsses,
            };
            if let Some(update) = self.cs.recalc(&input, now) {
                report = self.apply_cs_update(update);
            }
        }

        self.rrm_try(view, client, now);
        report
    }

    fn issue_force_kick(&mut self, client: &Client, now: Duration) {
        let Some(kind) = client.force_kick.get() else {
            return;
        };
        let addr = self.addr;
        match kind {
            ForceKick::Speculative => {
                log::info!("Sta {}: issuing speculative force kick", addr);
                self.steer.force_kick(now);
            }
            ForceKick::Directed => {
                match directed_kick_config(&addr, client, self.cs.in_progress(), self.link_bssid()) {
                    Some(config) => {
                        log::info!("Sta {}: issuing directed force kick via {:?}", addr, config.bssids);
                        self.steer
                            .configure(|stack, m| stack.cs_kick_filter.set_config(Some(config), m));
                    }
                    None => {
                        log::info!("Sta {}: issuing directed force kick without bssid", addr);
                        self.steer.force_kick(now);
                    }
                }
            }
        }
    }

    /// Install the filters of a client steering update
    pub(crate) fn apply_cs_update(&mut self, update: CsUpdate) -> Option<CsState> {
        self.steer.configure(|stack, m| {
            stack.cs_allow_filter.set_config(update.allow, m);
            stack.cs_deny_filter.set_config(update.deny, m);
        });
        update.report
    }

    /// Start the post-connect beacon report scan once its inputs are there
    fn rrm_try(&mut self, view: &GroupView, client: &Client, now: Duration) {
        let Some(rrm) = self.rrm.as_mut() else {
            return;
        };
        if rrm.is_done() {
            return;
        }
        if client.send_rrm_after_assoc.get() != Some(true) {
            return;
        }
        if !self.assoc.as_ref().is_some_and(AssocReqInfo::rrm_neighbor_bcn_act_meas) {
            return;
        }
        let Some(link) = self.steer.links().last() else {
            return;
        };
        let Some(link_band) = view
            .vif(&link.vif_name)
            .and_then(|v| v.channel.as_ref())
            .and_then(Channel::band)
        else {
            return;
        };
        rrm.start(rrm_targets(view, link_band), now);
    }

    /// Forget per-link state after the station left
    pub(crate) fn link_lost(&mut self) {
        self.rrm = None;
        self.assoc = None;
        self.kick.reset();
        self.steer
            .configure(|stack, m| stack.cs_kick_filter.set_config(None, m));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::testing::{mac, STA};

    fn local(id: u8, freq: u32) -> BssView {
        BssView {
            bssid: mac(id),
            vif_name: Some(format!("vif{}", id)),
            channel: Some(Channel::new_20mhz(freq)),
            shutting_down: false,
        }
    }

    fn remote(id: u8, freq: u32) -> BssView {
        BssView {
            bssid: mac(id),
            vif_name: None,
            channel: Some(Channel::new_20mhz(freq)),
            shutting_down: false,
        }
    }

    fn vif(id: u8, freq: u32) -> VifView {
        VifView {
            name: format!("vif{}", id),
            mac: mac(id),
            channel: Some(Channel::new_20mhz(freq)),
            ssid: "home".to_string(),
            up: true,
        }
    }

    fn view() -> GroupView {
        GroupView {
            id: "home".to_string(),
            bsses: vec![local(1, 2412), local(2, 5180), remote(3, 2437), remote(4, 5745)],
            vifs: vec![vif(1, 2412), vif(2, 5180)],
        }
    }

    fn pre_assoc_client() -> Client {
        let mut client = Client::new(STA);
        client.backoff_secs.set(Some(60));
        client.backoff_exp_base.set(Some(2));
        client.max_rejects.set(Some(3));
        client.rejects_tmout_secs.set(Some(10));
        client.pref_5g_pre_assoc_block_timeout_msecs.set(Some(0));
        client.pref_5g.set(Some(Pref5g::Always));
        client.commit();
        client
    }

    #[test]
    fn test_defer_vif_down_filters() {
        let mut view = view();
        assert_eq!(defer_vif_down_deny_config(&view), None);
        assert_eq!(defer_vif_down_allow_config(&view), None);

        view.bsses[0].shutting_down = true;
        let deny = defer_vif_down_deny_config(&view).map(|c| c.bssids);
        // Shutting down BSS first, then every neighbor
        assert_eq!(deny, Some(vec![mac(1), mac(3), mac(4)]));
        let allow = defer_vif_down_allow_config(&view).map(|c| c.bssids);
        assert_eq!(allow, Some(vec![mac(2)]));

        // Nothing left to allow
        view.bsses[1].shutting_down = true;
        assert_eq!(defer_vif_down_allow_config(&view), None);
    }

    #[test]
    fn test_pre_assoc_reject_condition() {
        let mut client = pre_assoc_client();
        let config = pre_assoc_2g_config(&STA, &view(), &client);
        assert_eq!(
            config.map(|c| c.reject_condition),
            Some(RejectCondition::Counter {
                reject_limit: 3,
                reject_timeout: Duration::from_secs(10)
            })
        );
        assert_eq!(config.map(|c| c.bssid), Some(mac(1)));
        assert_eq!(config.map(|c| c.immediate_backoff_on_auth_req), Some(true));

        // Both set: ambiguous
        client.pref_5g_pre_assoc_block_timeout_msecs.set(Some(500));
        client.commit();
        assert_eq!(pre_assoc_2g_config(&STA, &view(), &client), None);

        client.max_rejects.set(Some(0));
        client.commit();
        let config = pre_assoc_2g_config(&STA, &view(), &client);
        assert_eq!(
            config.map(|c| c.reject_condition),
            Some(RejectCondition::Timer {
                reject_timeout: Duration::from_millis(500)
            })
        );
    }

    #[test]
    fn test_pre_assoc_pref_5g() {
        let mut client = pre_assoc_client();
        client.pref_5g.set(Some(Pref5g::Never));
        client.commit();
        assert_eq!(pre_assoc_2g_config(&STA, &view(), &client), None);

        // Hwm needs the hwm threshold
        client.pref_5g.set(Some(Pref5g::Hwm));
        client.commit();
        assert_eq!(pre_assoc_2g_config(&STA, &view(), &client), None);
        client.hwm.set(Some(30));
        client.commit();
        assert_eq!(
            pre_assoc_2g_config(&STA, &view(), &client).map(|c| c.backoff_condition),
            Some(BackoffCondition::ThresholdSnr(30))
        );

        // NonDfs is off while the group sits on a DFS channel
        client.pref_5g.set(Some(Pref5g::NonDfs));
        client.commit();
        assert!(pre_assoc_2g_config(&STA, &view(), &client).is_some());
        let mut dfs = view();
        dfs.vifs[1].channel = Some(Channel::new_20mhz(5500));
        assert_eq!(pre_assoc_2g_config(&STA, &dfs, &client), None);
    }

    #[test]
    fn test_lwm_needs_idle_flag_and_up_vif() {
        let mut client = Client::new(STA);
        client.lwm.set(Some(15));
        client.commit();
        assert_eq!(lwm_config(&view(), &client, Band::Band5G), None);

        client.kick_upon_idle.set(Some(true));
        client.commit();
        let config = lwm_config(&view(), &client, Band::Band5G);
        assert_eq!(config.map(|c| c.bssid), Some(mac(2)));
        assert_eq!(lwm_config(&view(), &client, Band::Band6G), None);

        let mut down = view();
        down.vifs[1].up = false;
        assert_eq!(lwm_config(&down, &client, Band::Band5G), None);
    }

    #[test]
    fn test_hwm_splits_bands() {
        let mut client = Client::new(STA);
        assert_eq!(hwm_2g_config(&view(), &client), None);

        client.hwm.set(Some(35));
        client.kick_upon_idle.set(Some(false));
        client.commit();
        let Some(config) = hwm_2g_config(&view(), &client) else {
            panic!("expected a config");
        };
        assert_eq!(config.from_bssids, vec![mac(1), mac(3), mac(4)]);
        assert_eq!(config.to_bssids, vec![mac(2)]);
        assert_eq!(config.threshold_bytes, Some(0));
    }

    #[test]
    fn test_directed_kick_config() {
        let mut client = Client::new(STA);
        client.sc_btm_params.bssid.set(Some(mac(2)));
        client.commit();

        assert_eq!(directed_kick_config(&STA, &client, false, Some(mac(1))), None);

        // Deauth is implied: block the serving BSS
        let config = directed_kick_config(&STA, &client, true, Some(mac(1)));
        assert_eq!(config.map(|c| c.bssids), Some(vec![mac(1)]));
        assert_eq!(directed_kick_config(&STA, &client, true, None), None);

        client.sc_kick_type.set(Some(KickType::BtmDeauth));
        client.commit();
        let Some(config) = directed_kick_config(&STA, &client, true, None) else {
            panic!("expected a config");
        };
        assert_eq!(config.bssids, vec![mac(2)]);
        assert_eq!(config.excluded_preference, Some(Preference::HardBlocked));
    }

    #[test]
    fn test_rrm_targets_other_band() {
        let targets = rrm_targets(&view(), Band::Band2G);
        assert_eq!(
            targets,
            vec![
                RrmTarget { op_class: 115, channel: 36 },
                RrmTarget { op_class: 124, channel: 149 },
            ]
        );
    }
}
