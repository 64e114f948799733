// Band steering manager

//! Band steering manager
//!
//! The [`Engine`] owns the entity graph (groups, interfaces, BSSes,
//! neighbors, clients and stations) and everything hanging off it.
//!
//! Inbound configuration only stages values and marks work pending.
//! [`Engine::advance`] then runs the work pass, which commits the staged
//! values, brings BSSes up and down, creates and reaps stations and
//! rebuilds their policy configs. After that every station gets its policy
//! stack and executor run, and the per-entity timers fire.
//!
//! # Entity lifecycle
//!
//! Unsetting an entity never drops it on the spot. It is tombstoned and
//! reaped by the work pass once nothing refers to it anymore, in this
//! order: BSSes, stations, neighbors, interfaces, clients, groups.

mod dump;
mod work;

pub mod arena;
pub mod entities;
pub mod kick_state;
pub mod rrm;
pub mod sta;
pub mod stats;
pub mod steering;

use crate::assessor::{ClientAssessment, MeasurementAssessor, RrmStore};
use crate::executor::{ActionKind, Driver};
use crate::ieee80211::AssocReqInfo;
use crate::policy::PolicyKind;
use crate::steer::{ExecEnv, StaNotice};
use crate::timer::{earliest, Timer};
use crate::types::{BtmResponse, Channel, MacAddr, ProbeReq, StaInfo, SteeringConfig, VifInfo};
use arena::Arena;
use entities::{Bss, Client, Group, Neighbor, Vif};
use sta::BmSta;
use stats::{Capabilities, GroupReport, StatsEvent};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;
use steering::CsState;

/// Upper bound on work pass rounds within one advance
const WORK_MAX_ROUNDS: usize = 8;

/// Engine tunables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tunables {
    pub report_interval: Duration,
    pub btm_rate_limit: Duration,
    pub btm_max_neighbors: usize,
    /// Deauth delay for stations that understand BTM
    pub deauth_delay: Duration,
    pub rrm_validity: Duration,
}

impl From<&SteeringConfig> for Tunables {
    fn from(cfg: &SteeringConfig) -> Self {
        Self {
            report_interval: Duration::from_secs(cfg.report_interval_secs),
            btm_rate_limit: Duration::from_secs(cfg.btm_rate_limit_secs),
            btm_max_neighbors: cfg.btm_max_neighbors,
            deauth_delay: Duration::from_secs(cfg.deauth_delay_secs),
            rrm_validity: Duration::from_secs(cfg.rrm_validity_secs),
        }
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables::from(&SteeringConfig::default())
    }
}

/// Where reports and client steering states go
pub trait ReportSink {
    fn send_report(&mut self, report: &GroupReport);

    /// Client steering state changed for a station
    fn cs_state(&mut self, sta: &MacAddr, state: CsState);
}

/// Structural changes of the entity graph
#[allow(unused_variables)]
pub trait BmObserver {
    fn vif_added(&mut self, vif: &Vif) {}
    fn vif_removed(&mut self, vif: &Vif) {}
    fn vif_up(&mut self, vif: &Vif) {}
    fn vif_down(&mut self, vif: &Vif) {}
    fn vif_changed_channel(&mut self, vif: &Vif, old: Option<Channel>, new: Option<Channel>) {}
    fn neighbor_up(&mut self, neighbor: &Neighbor) {}
    fn neighbor_down(&mut self, neighbor: &Neighbor) {}
    fn neighbor_changed_channel(&mut self, neighbor: &Neighbor, old: Option<Channel>, new: Option<Channel>) {}
    fn client_added(&mut self, client: &Client) {}
    fn client_removed(&mut self, client: &Client) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

type Observers = Vec<(ObserverId, Box<dyn BmObserver>)>;

fn notify(observers: &mut Observers, mut f: impl FnMut(&mut dyn BmObserver)) {
    for (_, obs) in observers.iter_mut() {
        f(obs.as_mut());
    }
}

fn cs_stats_event(state: CsState) -> Option<StatsEvent> {
    match state {
        CsState::Steering => Some(StatsEvent::ClientSteeringStarted),
        CsState::Expired => Some(StatsEvent::ClientSteeringExpired),
        CsState::Failed => Some(StatsEvent::ClientSteeringFailed),
        CsState::Init | CsState::None => None,
    }
}

/// Key of a station: owning group and station address
type StaKey = (String, MacAddr);

pub struct Engine {
    tunables: Tunables,
    driver: Box<dyn Driver>,
    sink: Box<dyn ReportSink>,

    groups: Arena<String, Group>,
    vifs: Arena<String, Vif>,
    bsses: Arena<MacAddr, Bss>,
    neighbors: Arena<MacAddr, Neighbor>,
    clients: Arena<MacAddr, Client>,
    stas: Arena<StaKey, BmSta>,

    /// Driver state of every local interface
    driver_vifs: BTreeMap<String, VifInfo>,
    /// Interfaces with a deferred shutdown in progress
    shutting_down: BTreeSet<String>,
    /// Interfaces whose driver info changed since the last station run
    changed_vifs: BTreeSet<String>,
    /// Associations reported by the driver, keyed by station and interface
    driver_links: BTreeMap<(MacAddr, String), Option<AssocReqInfo>>,
    /// Last capability snapshot per station
    caps_seen: BTreeMap<MacAddr, Capabilities>,
    rrm: RrmStore,

    observers: Observers,
    next_observer_id: u64,

    work_pending: bool,
    stats_timer: Timer,
}

impl Engine {
    pub fn new(tunables: Tunables, driver: Box<dyn Driver>, sink: Box<dyn ReportSink>) -> Self {
        Self {
            tunables,
            driver,
            sink,
            groups: Arena::new(),
            vifs: Arena::new(),
            bsses: Arena::new(),
            neighbors: Arena::new(),
            clients: Arena::new(),
            stas: Arena::new(),
            driver_vifs: BTreeMap::new(),
            shutting_down: BTreeSet::new(),
            changed_vifs: BTreeSet::new(),
            driver_links: BTreeMap::new(),
            caps_seen: BTreeMap::new(),
            rrm: RrmStore::new(),
            observers: Vec::new(),
            next_observer_id: 0,
            work_pending: false,
            stats_timer: Timer::new(),
        }
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    fn schedule_work(&mut self) {
        if !self.work_pending {
            log::trace!("Bm: work scheduled");
        }
        self.work_pending = true;
    }

    // Inbound configuration

    pub fn get_group(&mut self, group_id: &str) -> &mut Group {
        let was_removed = self.groups.is_removed(group_id);
        let (group, created) = self
            .groups
            .get_or_insert_with(group_id.to_string(), || Group::new(group_id));
        if created {
            log::debug!("Bm: group {} created", group_id);
        } else if was_removed {
            log::debug!("Bm: group {} revived", group_id);
        }
        self.work_pending = true;
        group
    }

    /// Tombstone a group along with its interfaces and stations
    pub fn unset_group(&mut self, group_id: &str) {
        let key = group_id.to_string();
        let Some(group) = self.groups.get_mut(&key) else {
            return;
        };
        group.pending_vifs.clear();
        let vif_names: Vec<String> = group.vifs.iter().cloned().collect();
        if !self.groups.remove(&key) {
            return;
        }
        log::debug!("Bm: group {} unset", group_id);
        for name in &vif_names {
            self.vifs.remove(name);
        }
        for sta_key in self.stas.keys() {
            if sta_key.0 == group_id {
                self.stas.remove(&sta_key);
            }
        }
        self.schedule_work();
    }

    /// Claim an interface for a group. An interface still owned by another
    /// group stays pending until that group lets it go.
    pub fn group_get_vif(&mut self, group_id: &str, vif_name: &str) {
        self.get_group(group_id);
        let key = vif_name.to_string();

        let owner = self.vifs.get(&key).map(|v| v.group_id.clone());
        match owner {
            Some(owner) if owner != group_id => {
                log::info!(
                    "Bm: vif {} is owned by group {}, pending for group {}",
                    vif_name,
                    owner,
                    group_id
                );
                if let Some(group) = self.groups.get_mut(group_id) {
                    group.pending_vifs.insert(key);
                }
            }
            Some(_) => {
                if self.vifs.is_removed(&key) {
                    log::debug!("Bm: vif {} revived in group {}", vif_name, group_id);
                }
                self.vifs.get_or_insert_with(key, || Vif::new(vif_name, group_id));
            }
            None => {
                let (vif, _) = self
                    .vifs
                    .get_or_insert_with(key.clone(), || Vif::new(vif_name, group_id));
                log::debug!("Bm: vif {} added to group {}", vif_name, group_id);
                let vif = &*vif;
                notify(&mut self.observers, |o| o.vif_added(vif));
                if let Some(group) = self.groups.get_mut(group_id) {
                    group.vifs.insert(key);
                }
            }
        }
        self.schedule_work();
    }

    pub fn group_unset_vif(&mut self, group_id: &str, vif_name: &str) {
        let key = vif_name.to_string();
        if let Some(group) = self.groups.get_mut(group_id) {
            if group.pending_vifs.remove(&key) {
                log::debug!("Bm: pending vif {} dropped from group {}", vif_name, group_id);
                return;
            }
        }
        let owned = self.vifs.get(&key).is_some_and(|v| v.group_id == group_id);
        if owned && self.vifs.remove(&key) {
            log::debug!("Bm: vif {} unset from group {}", vif_name, group_id);
            self.schedule_work();
        }
    }

    /// Stage neighbor attributes through `f`
    pub fn configure_neighbor(&mut self, bssid: MacAddr, f: impl FnOnce(&mut Neighbor)) {
        let (neighbor, created) = self.neighbors.get_or_insert_with(bssid, || Neighbor::new(bssid));
        if created {
            log::debug!("Bm: neighbor {} created", bssid);
        }
        f(neighbor);
        self.schedule_work();
    }

    pub fn unset_neighbor(&mut self, bssid: &MacAddr) {
        if self.neighbors.remove(bssid) {
            log::debug!("Bm: neighbor {} unset", bssid);
            self.schedule_work();
        }
    }

    /// Stage client attributes through `f`
    pub fn configure_client(&mut self, addr: MacAddr, f: impl FnOnce(&mut Client)) {
        let was_live = self.clients.get_live(&addr).is_some();
        let (client, _) = self.clients.get_or_insert_with(addr, || Client::new(addr));
        f(client);
        if !was_live {
            log::debug!("Bm: client {} added", addr);
            let client = &*client;
            notify(&mut self.observers, |o| o.client_added(client));
        }
        self.schedule_work();
    }

    /// Tombstone a client and detach it from every group
    pub fn unset_client(&mut self, addr: &MacAddr) {
        if !self.clients.remove(addr) {
            return;
        }
        log::debug!("Bm: client {} unset", addr);
        if let Some(client) = self.clients.get(addr) {
            notify(&mut self.observers, |o| o.client_removed(client));
        }
        for key in self.stas.keys() {
            if key.1 == *addr {
                self.stas.remove(&key);
            }
        }
        self.schedule_work();
    }

    pub fn group(&self, group_id: &str) -> Option<&Group> {
        self.groups.get_live(group_id)
    }

    pub fn vif(&self, vif_name: &str) -> Option<&Vif> {
        self.vifs.get_live(vif_name)
    }

    pub fn bss(&self, bssid: &MacAddr) -> Option<&Bss> {
        self.bsses.get_live(bssid)
    }

    pub fn bss_count(&self) -> usize {
        self.bsses.live().count()
    }

    pub fn neighbor(&self, bssid: &MacAddr) -> Option<&Neighbor> {
        self.neighbors.get_live(bssid)
    }

    pub fn client(&self, addr: &MacAddr) -> Option<&Client> {
        self.clients.get_live(addr)
    }

    pub fn sta(&self, group_id: &str, addr: &MacAddr) -> Option<&BmSta> {
        self.stas.get_live(&(group_id.to_string(), *addr))
    }

    pub fn sta_count(&self) -> usize {
        self.stas.live().count()
    }

    // Observers

    /// Register an observer. It is replayed the current state first.
    pub fn register_observer(&mut self, mut obs: Box<dyn BmObserver>) -> ObserverId {
        for (_, vif) in self.vifs.live() {
            obs.vif_added(vif);
        }
        for (_, neighbor) in self.neighbors.iter().filter(|(_, n)| n.is_up()) {
            obs.neighbor_up(neighbor);
        }
        for (_, client) in self.clients.live() {
            obs.client_added(client);
        }
        let id = ObserverId(self.next_observer_id);
        self.next_observer_id += 1;
        self.observers.push((id, obs));
        id
    }

    /// Unregister an observer, replaying the removal of the current state
    pub fn unregister_observer(&mut self, id: ObserverId) -> Option<Box<dyn BmObserver>> {
        let pos = self.observers.iter().position(|(i, _)| *i == id)?;
        let (_, mut obs) = self.observers.remove(pos);
        for (_, vif) in self.vifs.live() {
            obs.vif_removed(vif);
        }
        for (_, neighbor) in self.neighbors.iter().filter(|(_, n)| n.is_up()) {
            obs.neighbor_down(neighbor);
        }
        for (_, client) in self.clients.live() {
            obs.client_removed(client);
        }
        Some(obs)
    }

    // Driver events

    pub fn set_vif_info(&mut self, info: VifInfo) {
        let name = info.vif_name.clone();
        if self.driver_vifs.get(&name) == Some(&info) {
            return;
        }
        log::debug!("Bm: vif {} info updated", name);
        self.driver_vifs.insert(name.clone(), info);
        self.vif_info_changed(&name);
    }

    pub fn unset_vif_info(&mut self, vif_name: &str) {
        if self.driver_vifs.remove(vif_name).is_some() {
            log::debug!("Bm: vif {} info removed", vif_name);
            self.vif_info_changed(vif_name);
        }
    }

    fn vif_info_changed(&mut self, vif_name: &str) {
        self.changed_vifs.insert(vif_name.to_string());
        self.schedule_work();
    }

    /// A deferred shutdown of the interface started or ended
    pub fn set_vif_shutting_down(&mut self, vif_name: &str, shutting_down: bool) {
        let changed = if shutting_down {
            self.shutting_down.insert(vif_name.to_string())
        } else {
            self.shutting_down.remove(vif_name)
        };
        if changed {
            log::info!("Bm: vif {} shutting down: {}", vif_name, shutting_down);
            self.schedule_work();
        }
    }

    pub fn sta_connected(&mut self, info: &StaInfo, now: Duration) {
        let assoc = if info.assoc_ies.is_empty() {
            None
        } else {
            match AssocReqInfo::parse(&info.assoc_ies) {
                Ok(assoc) => Some(assoc),
                Err(e) => {
                    log::warn!("Sta {}: failed to parse assoc request ies: {}", info.addr, e);
                    None
                }
            }
        };

        if let Some(client) = self.clients.get_mut(&info.addr) {
            client.stats.record_connect(&info.vif_name, now);
            if let Some(assoc) = &assoc {
                let caps = Capabilities::from_assoc(assoc);
                if self.caps_seen.get(&info.addr) != Some(&caps) {
                    client.stats.record_capabilities(&info.vif_name, caps.clone(), now);
                    self.caps_seen.insert(info.addr, caps);
                }
            }
            let active = client.bps_activity;
            client.stats.record_activity(&info.vif_name, active, now);
        }

        self.driver_links.insert((info.addr, info.vif_name.clone()), assoc);
        self.schedule_work();
    }

    pub fn sta_disconnected(&mut self, addr: &MacAddr, vif_name: &str, now: Duration) {
        if self.driver_links.remove(&(*addr, vif_name.to_string())).is_none() {
            return;
        }
        if let Some(client) = self.clients.get_mut(addr) {
            client.stats.record_disconnect(vif_name, now);
        }
        self.schedule_work();
    }

    /// Station living on the group of `vif_name`, and that interface's BSSID
    fn sta_on_vif(&mut self, vif_name: &str, addr: &MacAddr) -> Option<(MacAddr, &mut BmSta)> {
        let vif = self.vifs.get_live(vif_name)?;
        let bssid = vif.bss?;
        let key = (vif.group_id.clone(), *addr);
        if self.stas.is_removed(&key) {
            return None;
        }
        let sta = self.stas.get_mut(&key)?;
        Some((bssid, sta))
    }

    pub fn probe_req(&mut self, vif_name: &str, probe: &ProbeReq, now: Duration) {
        if let Some((bssid, sta)) = self.sta_on_vif(vif_name, &probe.sta_addr) {
            sta.steer.probe_req(&bssid, vif_name, probe, now);
        }

        let Some(client) = self.clients.get_mut(&probe.sta_addr) else {
            return;
        };
        let blocked = self
            .driver_vifs
            .get(vif_name)
            .is_some_and(|info| info.acl_blocks(&probe.sta_addr));
        client
            .stats
            .record_probe(vif_name, probe.is_broadcast(), blocked, probe.snr, now);
    }

    pub fn auth_req(&mut self, vif_name: &str, addr: &MacAddr, now: Duration) {
        if let Some((bssid, sta)) = self.sta_on_vif(vif_name, addr) {
            sta.steer.auth_req(&bssid, now);
        }
    }

    pub fn sta_snr(&mut self, vif_name: &str, addr: &MacAddr, snr: u32, now: Duration) {
        if let Some((bssid, sta)) = self.sta_on_vif(vif_name, addr) {
            sta.steer.snr(&bssid, snr, now);
        }
    }

    /// Traffic of one sampling interval
    pub fn sta_data_vol(&mut self, vif_name: &str, addr: &MacAddr, rx_bytes: u64, tx_bytes: u64, now: Duration) {
        if let Some((bssid, sta)) = self.sta_on_vif(vif_name, addr) {
            sta.steer.data_vol(&bssid, rx_bytes.saturating_add(tx_bytes), now);
        }

        let Some(client) = self.clients.get_mut(addr) else {
            return;
        };
        let active = stats::is_active(rx_bytes, tx_bytes);
        if active != client.bps_activity {
            log::debug!("Sta {}: activity changed to {}", addr, active);
            client.bps_activity = active;
            client.stats.record_activity(vif_name, active, now);
        }
    }

    pub fn btm_response(&mut self, vif_name: &str, addr: &MacAddr, resp: &BtmResponse, now: Duration) {
        if let Some((bssid, sta)) = self.sta_on_vif(vif_name, addr) {
            sta.steer.btm_response(&bssid, resp, now);
        }
    }

    /// Beacon report measurement of `bssid` from `addr`
    pub fn rrm_report(&mut self, addr: &MacAddr, bssid: &MacAddr, rcpi: u8, now: Duration) {
        self.rrm.update(*addr, *bssid, rcpi, now);
        for (key, sta) in self.stas.iter_mut() {
            if key.1 == *addr {
                sta.steer.schedule_recalc();
            }
        }
    }

    // Scheduling

    /// Run pending work and everything due at `now`
    pub fn advance(&mut self, now: Duration) {
        let mut rounds = 0;
        while self.work_pending {
            if rounds == WORK_MAX_ROUNDS {
                log::warn!("Bm: work does not settle after {} rounds", rounds);
                self.work_pending = false;
                break;
            }
            rounds += 1;
            self.work_pending = false;
            self.work(now);
        }

        self.run_client_steering_timers(now);
        self.run_rrm_timers(now);
        self.run_stas(now);

        if !self.stats_timer.is_armed() {
            self.stats_timer.arm_at(now + self.tunables.report_interval);
        }
        if self.stats_timer.fire(now) {
            self.report(now);
            self.stats_timer.arm_at(now + self.tunables.report_interval);
        }
    }

    /// Earliest time `advance` has something to do. Work already pending is
    /// due right away.
    pub fn next_deadline(&self) -> Option<Duration> {
        if self.work_pending {
            return Some(Duration::ZERO);
        }
        let mut next = self.stats_timer.deadline();
        for (_, sta) in self.stas.live() {
            if sta.steer.needs_work() {
                return Some(Duration::ZERO);
            }
            next = earliest(next, sta.steer.next_deadline());
            next = earliest(next, sta.cs.next_deadline());
            next = earliest(next, sta.rrm.as_ref().and_then(|r| r.next_deadline()));
        }
        next
    }

    fn report_cs_state(&mut self, key: &StaKey, state: CsState, now: Duration) {
        log::info!("Sta {}: client steering state: {}", key.1, state);
        self.sink.cs_state(&key.1, state);

        let Some(event) = cs_stats_event(state) else {
            return;
        };
        let link_vif = self
            .stas
            .get(key)
            .and_then(|s| s.steer.links().last().map(|l| l.vif_name.clone()));
        if let (Some(vif_name), Some(client)) = (link_vif, self.clients.get_mut(&key.1)) {
            client.stats.record_client_steering(&vif_name, event, now);
        }
    }

    fn run_client_steering_timers(&mut self, now: Duration) {
        let mut reports = Vec::new();
        for (key, sta) in self.stas.iter_mut() {
            if let Some(update) = sta.cs.on_timer(now) {
                if let Some(state) = sta.apply_cs_update(update) {
                    reports.push((key.clone(), state));
                }
            }
        }
        for (key, state) in reports {
            self.report_cs_state(&key, state, now);
        }
    }

    fn run_rrm_timers(&mut self, now: Duration) {
        for (_, sta) in self.stas.iter_mut() {
            if let Some(rrm) = sta.rrm.as_mut() {
                rrm.on_timer(now, self.driver.as_mut());
            }
        }
    }

    fn priorities(&self) -> HashMap<MacAddr, u32> {
        self.neighbors
            .live()
            .filter_map(|(bssid, n)| n.priority.cur().map(|p| (*bssid, *p)))
            .collect()
    }

    /// Recalc and execute every station
    fn run_stas(&mut self, now: Duration) {
        let priorities = self.priorities();
        // Actions judge ACL state from interface info
        let vifs_changed = !self.changed_vifs.is_empty();
        self.changed_vifs.clear();
        for key in self.stas.keys() {
            if self.stas.is_removed(&key) {
                continue;
            }
            let Some(sta) = self.stas.get_mut(&key) else {
                continue;
            };

            let client = self.clients.get_live(&key.1);
            let assessor = MeasurementAssessor {
                client: client.map(|c| ClientAssessment {
                    filter_by_beacon_report: c.neighbor_list_filter_by_beacon_report.get().unwrap_or(false),
                    serving_bssid: sta.steer.links().last().map(|l| l.bssid),
                }),
                priorities: &priorities,
                rrm: &self.rrm,
                now,
                validity: self.tunables.rrm_validity,
            };
            sta.steer.recalc(now, &assessor);
            let notices = sta.steer.take_notices();
            handle_notices(sta, self.clients.get_mut(&key.1), &self.bsses, notices, now);

            let btm_supported = sta.assoc.as_ref().is_some_and(|a| a.wnm_bss_trans);
            let link_shutting_down = sta
                .steer
                .links()
                .iter()
                .any(|l| self.shutting_down.contains(&l.vif_name));
            let env = ExecEnv {
                vifs: &self.driver_vifs,
                btm_supported,
                disassoc_imminent: sta.kick.disassoc_imminent().unwrap_or(false) || link_shutting_down,
                deauth_delay: if btm_supported {
                    self.tunables.deauth_delay
                } else {
                    Duration::ZERO
                },
                btm_rate_limit: self.tunables.btm_rate_limit,
                btm_max_neighbors: self.tunables.btm_max_neighbors,
            };
            if vifs_changed {
                sta.steer.vif_changed(now, &env);
            }
            sta.steer.execute(now, &env, self.driver.as_mut());
            let notices = sta.steer.take_notices();
            handle_notices(sta, self.clients.get_mut(&key.1), &self.bsses, notices, now);
        }
    }

    /// Build and send one report per group, then clear the stats
    fn report(&mut self, now: Duration) {
        let timestamp_ms = now.as_millis() as u64;
        for (group_id, group) in self.groups.live() {
            let mut report = GroupReport {
                group_id: group_id.clone(),
                timestamp_ms,
                clients: Vec::new(),
            };
            for (addr, client) in self.clients.live() {
                let bands: Vec<stats::BandReport> = group
                    .vifs
                    .iter()
                    .filter_map(|vif_name| {
                        let s = client.stats.get(vif_name)?;
                        let channel = self
                            .driver_vifs
                            .get(vif_name)
                            .and_then(|info| info.channel)?;
                        Some(stats::BandReport {
                            vif_name: vif_name.clone(),
                            radio_type: stats::RadioType::from_channel(&channel)?,
                            stats: s.clone(),
                        })
                    })
                    .collect();
                if !bands.is_empty() {
                    report.clients.push(stats::ClientReport { addr: *addr, bands });
                }
            }
            if report.clients.is_empty() {
                log::trace!("Bm: nothing to report for group {}", group_id);
                continue;
            }
            log::debug!(
                "Bm: reporting {} client(s) for group {}",
                report.clients.len(),
                group_id
            );
            self.sink.send_report(&report);
        }

        for (_, client) in self.clients.iter_mut() {
            client.stats.clear();
        }
    }
}

/// React to what a station's policies and actions reported
fn handle_notices(
    sta: &mut BmSta,
    mut client: Option<&mut Client>,
    bsses: &Arena<MacAddr, Bss>,
    notices: Vec<StaNotice>,
    now: Duration,
) {
    for notice in notices {
        match notice {
            StaNotice::Triggered(policy) => {
                let Some(client) = client.as_deref() else {
                    continue;
                };
                match policy {
                    PolicyKind::Hwm2g => sta
                        .kick
                        .steering_trig(client.steering_btm_params.disassoc_imminent.get()),
                    PolicyKind::Lwm2g | PolicyKind::Lwm5g | PolicyKind::Lwm6g | PolicyKind::BottomLwm2g => {
                        sta.kick
                            .sticky_trig(client.sticky_btm_params.disassoc_imminent.get())
                    }
                    PolicyKind::ForceKick => sta
                        .kick
                        .force_trig(client.sc_btm_params.disassoc_imminent.get()),
                    _ => {}
                }
            }
            StaNotice::Dismissed(_) => sta.kick.reset(),
            StaNotice::Backoff {
                enabled,
                period_secs,
                ..
            } => {
                let vif_name = sta
                    .steer
                    .policies()
                    .pre_assoc_2g
                    .config()
                    .and_then(|c| bsses.get(&c.bssid))
                    .and_then(|b| b.vif_name().map(str::to_string));
                if let (Some(vif_name), Some(client)) = (vif_name, client.as_deref_mut()) {
                    client.stats.record_backoff(&vif_name, enabled, period_secs, now);
                }
            }
            StaNotice::SteeringAttempt { vif_name, .. } => {
                if let Some(client) = client.as_deref_mut() {
                    client.stats.record_steering_attempt(&vif_name, now);
                }
            }
            StaNotice::ActionDataSent(ActionKind::Btm) => {
                let retry = sta.kick.btm_sent();
                if sta.steer.active_policy().is_none() {
                    continue;
                }
                let Some(source) = sta.kick.source() else {
                    continue;
                };
                let vif_name = sta.steer.links().last().map(|l| l.vif_name.clone());
                if let (Some(vif_name), Some(client)) = (vif_name, client.as_deref_mut()) {
                    client.stats.record_btm(&vif_name, source, retry, now);
                }
            }
            StaNotice::ActionIdle(ActionKind::Btm) => sta.kick.reset(),
            StaNotice::ActionBusy(_) | StaNotice::ActionDataSent(_) | StaNotice::ActionIdle(_) => {}
        }
    }
}
