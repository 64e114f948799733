// Deferred work pass

//! Work pass
//!
//! One pass reconciles the entity graph after a burst of mutations. Phases
//! run leaves first so that a removal is only finalized once whatever
//! referred to the entity let go of it. A phase that changes structure the
//! earlier phases depend on marks work pending again, and
//! [`Engine::advance`] runs another round.

use super::entities::{Bss, BssOwner, Neighbor, Vif};
use super::rrm::RrmScan;
use super::sta::{BmSta, BssView, GroupView, VifView};
use super::{notify, Engine, StaKey};
use crate::ieee80211::AssocReqInfo;
use crate::types::{
    chan_to_band_guess, op_class_20mhz, Channel, HtMode, Link, MacAddr, Sideband, VifType,
};
use std::time::Duration;

/// Channel of a neighbor: from its operating class if that resolves, else
/// from its HT mode width
fn neighbor_channel(n: &Neighbor) -> Option<Channel> {
    let chan = *n.channel_number.cur()?;
    if let Some(c) = n.op_class.cur().and_then(|op| Channel::from_op_class(*op, chan)) {
        return Some(c);
    }
    let ht_mode = *n.ht_mode.cur()?;
    let band = chan_to_band_guess(chan)?;
    let sideband = match ht_mode {
        HtMode::Ht40Plus => Some(Sideband::Upper),
        HtMode::Ht40Minus => Some(Sideband::Lower),
        _ => None,
    };
    Channel::from_number_width(band, chan, ht_mode.width(), sideband)
}

fn local_op_class(channel: Option<Channel>) -> Option<u8> {
    let channel = channel?;
    op_class_20mhz(channel.band()?, channel.number()?)
}

impl Engine {
    pub(super) fn work(&mut self, now: Duration) {
        log::trace!("Bm: work pass");
        self.work_bsses();
        self.work_stas(now);
        self.work_neighbors();
        self.work_vifs();
        self.work_clients();
        self.work_groups();
    }

    pub(super) fn group_view(&self, group_id: &str) -> GroupView {
        let bsses = self
            .bsses
            .live()
            .filter(|(_, b)| b.group_id == group_id)
            .map(|(bssid, b)| {
                let vif_name = b.vif_name().map(str::to_string);
                let shutting_down = vif_name
                    .as_ref()
                    .and_then(|name| self.vifs.get(name))
                    .is_some_and(|v| v.shutting_down);
                BssView {
                    bssid: *bssid,
                    vif_name,
                    channel: b.channel,
                    shutting_down,
                }
            })
            .collect();

        let vifs = self
            .groups
            .get(group_id)
            .map(|g| {
                g.vifs
                    .iter()
                    .filter_map(|name| self.vifs.get_live(name))
                    .filter_map(|v| {
                        let info = v.info.as_ref()?;
                        Some(VifView {
                            name: v.name.clone(),
                            mac: info.mac_addr,
                            channel: info.channel,
                            ssid: info.ssid.clone(),
                            up: v.is_up(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        GroupView {
            id: group_id.to_string(),
            bsses,
            vifs,
        }
    }

    fn work_bsses(&mut self) {
        for bssid in self.bsses.keys() {
            if self.bsses.is_removed(&bssid) && self.bsses.reap(&bssid).is_some() {
                log::debug!("Bm: bss {} reaped", bssid);
            }
        }
    }

    fn work_stas(&mut self, now: Duration) {
        let mut reports = Vec::new();
        for key in self.stas.keys() {
            if self.stas.is_removed(&key) {
                if self.stas.reap(&key).is_some() {
                    log::info!("Sta {}: removed from group {}", key.1, key.0);
                }
                continue;
            }

            let view = self.group_view(&key.0);
            self.sync_sta_links(&key, &view, now);

            let Some(client) = self.clients.get_live(&key.1) else {
                continue;
            };
            let Some(sta) = self.stas.get_mut(&key) else {
                continue;
            };
            if let Some(state) = sta.recalc_configs(&view, client, now) {
                reports.push((key.clone(), state));
            }
        }
        for (key, state) in reports {
            self.report_cs_state(&key, state, now);
        }
    }

    /// Mirror driver associations onto the station's links
    fn sync_sta_links(&mut self, key: &StaKey, view: &GroupView, now: Duration) {
        let addr = key.1;
        let wanted: Vec<(Link, Option<AssocReqInfo>, String)> = self
            .driver_links
            .iter()
            .filter(|((a, _), _)| *a == addr)
            .filter_map(|((_, vif_name), assoc)| {
                let vif = view.vif(vif_name).filter(|v| v.up)?;
                let link = Link {
                    bssid: vif.mac,
                    vif_name: vif_name.clone(),
                };
                Some((link, assoc.clone(), vif.ssid.clone()))
            })
            .collect();

        let Some(sta) = self.stas.get_mut(key) else {
            return;
        };

        let stale: Vec<MacAddr> = sta
            .steer
            .links()
            .iter()
            .filter(|l| !wanted.iter().any(|(w, _, _)| w == *l))
            .map(|l| l.bssid)
            .collect();
        for bssid in stale {
            sta.steer.sta_disconnected(&bssid, now);
            sta.link_lost();
        }

        for (link, assoc, ssid) in wanted {
            if sta.steer.links().contains(&link) {
                continue;
            }
            sta.rrm = Some(RrmScan::new(addr, &link.vif_name, &ssid));
            sta.assoc = assoc;
            sta.steer.sta_connected(link, sta.assoc.as_ref(), now);
        }
    }

    fn work_neighbors(&mut self) {
        for bssid in self.neighbors.keys() {
            if self.neighbors.is_removed(&bssid) {
                self.neighbor_down(&bssid);
                if self.neighbors.reap(&bssid).is_some() {
                    log::debug!("Bm: neighbor {} reaped", bssid);
                }
                continue;
            }

            let Some(n) = self.neighbors.get_mut(&bssid) else {
                continue;
            };
            let name = |attr: &str| format!("neighbor {}: {}", bssid, attr);
            n.vif_name.commit(&name("vif_name"));
            n.channel_number.commit(&name("channel_number"));
            n.ht_mode.commit(&name("ht_mode"));
            n.op_class.commit(&name("op_class"));
            n.priority.commit(&name("priority"));

            let vif = n
                .vif_name
                .cur()
                .and_then(|v| self.vifs.get_live(v))
                .map(|v| (v.name.clone(), v.group_id.clone()));
            let channel = neighbor_channel(n);
            let op_class = n.op_class.cur().copied();
            let ready = vif.is_some() && channel.is_some() && op_class.is_some();

            let bss_group = self.bsses.get_live(&bssid).map(|b| b.group_id.clone());
            let group_moved = match (&vif, &bss_group) {
                (Some((_, group)), Some(bss_group)) => group != bss_group,
                _ => false,
            };

            if n.up && (!ready || group_moved) {
                self.neighbor_down(&bssid);
            }

            let Some(n) = self.neighbors.get_mut(&bssid) else {
                continue;
            };
            n.vif = vif.as_ref().map(|(name, _)| name.clone());
            let old_channel = n.channel;
            n.channel = channel;

            match (ready, n.up, vif) {
                (true, false, Some((_, group_id))) => self.neighbor_up(&bssid, &group_id, channel, op_class),
                (true, true, _) if old_channel != channel => {
                    if let Some(bss) = self.bsses.get_mut(&bssid) {
                        bss.channel = channel;
                        bss.op_class = op_class;
                    }
                    log::info!("Bm: neighbor {} channel {:?} -> {:?}", bssid, old_channel, channel);
                    if let Some(n) = self.neighbors.get(&bssid) {
                        notify(&mut self.observers, |o| o.neighbor_changed_channel(n, old_channel, channel));
                    }
                    self.work_pending = true;
                }
                _ => {}
            }
        }
    }

    fn neighbor_up(&mut self, bssid: &MacAddr, group_id: &str, channel: Option<Channel>, op_class: Option<u8>) {
        if let Some(bss) = self.bsses.get_live(bssid) {
            log::warn!(
                "Bm: neighbor {} collides with bss of {:?}, not bringing it up",
                bssid,
                bss.owner
            );
            return;
        }
        let (bss, _) = self.bsses.get_or_insert_with(*bssid, || Bss {
            bssid: *bssid,
            group_id: group_id.to_string(),
            owner: BssOwner::Remote { neighbor: *bssid },
            channel,
            op_class,
        });
        bss.group_id = group_id.to_string();
        bss.owner = BssOwner::Remote { neighbor: *bssid };
        bss.channel = channel;
        bss.op_class = op_class;

        let Some(n) = self.neighbors.get_mut(bssid) else {
            return;
        };
        n.up = true;
        log::info!("Bm: neighbor {} up in group {}", bssid, group_id);
        let n = &*n;
        notify(&mut self.observers, |o| o.neighbor_up(n));
        self.work_pending = true;
    }

    fn neighbor_down(&mut self, bssid: &MacAddr) {
        let Some(n) = self.neighbors.get_mut(bssid) else {
            return;
        };
        if !n.up {
            return;
        }
        n.up = false;
        let n = &*n;
        log::info!("Bm: neighbor {} down", bssid);
        notify(&mut self.observers, |o| o.neighbor_down(n));
        self.bsses.remove(bssid);
        self.work_pending = true;
    }

    fn work_vifs(&mut self) {
        for name in self.vifs.keys() {
            if self.vifs.is_removed(&name) {
                self.vif_down(&name);
                if let Some(vif) = self.vifs.reap(&name) {
                    log::debug!("Bm: vif {} removed from group {}", name, vif.group_id);
                    notify(&mut self.observers, |o| o.vif_removed(&vif));
                    if let Some(group) = self.groups.get_mut(&vif.group_id) {
                        group.vifs.remove(&name);
                    }
                    self.work_pending = true;
                }
                continue;
            }

            let info = self
                .driver_vifs
                .get(&name)
                .filter(|i| i.vif_type == VifType::Ap)
                .cloned();
            let shutting_down = self.shutting_down.contains(&name);
            let Some(vif) = self.vifs.get_mut(&name) else {
                continue;
            };
            if vif.shutting_down != shutting_down {
                vif.shutting_down = shutting_down;
                self.work_pending = true;
            }
            let old_channel = vif.channel();
            vif.info = info;
            let new_channel = vif.channel();
            let want = vif.info.as_ref().map(|i| i.mac_addr);

            match (vif.bss, want) {
                (Some(cur), Some(want)) if cur == want => {
                    if old_channel != new_channel {
                        self.vif_channel_changed(&name, old_channel, new_channel);
                    }
                }
                (Some(_), want) => {
                    self.vif_down(&name);
                    if let Some(want) = want {
                        self.vif_up(&name, want);
                    }
                }
                (None, Some(want)) => self.vif_up(&name, want),
                (None, None) => {}
            }
        }
    }

    fn vif_up(&mut self, name: &str, bssid: MacAddr) {
        if let Some(bss) = self.bsses.get_live(&bssid) {
            log::warn!(
                "Bm: vif {} collides with bss of {:?}, not bringing it up",
                name,
                bss.owner
            );
            return;
        }
        let Some(vif) = self.vifs.get_mut(name) else {
            return;
        };
        let channel = vif.channel();
        let group_id = vif.group_id.clone();
        vif.bss = Some(bssid);

        let (bss, _) = self.bsses.get_or_insert_with(bssid, || Bss {
            bssid,
            group_id: group_id.clone(),
            owner: BssOwner::Local {
                vif_name: name.to_string(),
            },
            channel,
            op_class: local_op_class(channel),
        });
        bss.group_id = group_id;
        bss.owner = BssOwner::Local {
            vif_name: name.to_string(),
        };
        bss.channel = channel;
        bss.op_class = local_op_class(channel);

        log::info!("Bm: vif {} up with bss {}", name, bssid);
        if let Some(vif) = self.vifs.get(name) {
            notify(&mut self.observers, |o| o.vif_up(vif));
        }
        self.work_pending = true;
    }

    fn vif_down(&mut self, name: &str) {
        let Some(vif) = self.vifs.get(name) else {
            return;
        };
        let Some(bssid) = vif.bss else {
            return;
        };
        log::info!("Bm: vif {} down, dropping bss {}", name, bssid);
        notify(&mut self.observers, |o| o.vif_down(vif));
        if let Some(vif) = self.vifs.get_mut(name) {
            vif.bss = None;
        }
        self.bsses.remove(&bssid);
        self.work_pending = true;
    }

    fn vif_channel_changed(&mut self, name: &str, old: Option<Channel>, new: Option<Channel>) {
        let Some(vif) = self.vifs.get(name) else {
            return;
        };
        if let Some(bss) = vif.bss.and_then(|bssid| self.bsses.get_mut(&bssid)) {
            bss.channel = new;
            bss.op_class = local_op_class(new);
        }
        log::info!("Bm: vif {} channel {:?} -> {:?}", name, old, new);
        notify(&mut self.observers, |o| o.vif_changed_channel(vif, old, new));
        self.work_pending = true;
    }

    fn work_clients(&mut self) {
        for addr in self.clients.keys() {
            if self.clients.is_removed(&addr) {
                let referenced = self.stas.iter().any(|(key, _)| key.1 == addr);
                if !referenced && self.clients.reap(&addr).is_some() {
                    log::debug!("Bm: client {} reaped", addr);
                    self.caps_seen.remove(&addr);
                    self.rrm.forget_sta(&addr);
                }
                continue;
            }

            let Some(client) = self.clients.get_mut(&addr) else {
                continue;
            };
            if !client.is_dirty() {
                continue;
            }
            let commit = client.commit();
            if !commit.changed {
                continue;
            }
            for (key, sta) in self.stas.iter_mut() {
                if key.1 != addr {
                    continue;
                }
                if commit.force_kick.changed && commit.force_kick.present {
                    sta.issue_force_kick = true;
                }
                if commit.cs_mode.changed {
                    sta.client_steering_recalc = true;
                }
            }
            self.work_pending = true;
        }

        self.ensure_stas();
    }

    /// Attach every live client to every live group
    fn ensure_stas(&mut self) {
        let group_ids: Vec<String> = self.groups.live().map(|(id, _)| id.clone()).collect();
        let clients: Vec<(MacAddr, bool)> = self
            .clients
            .live()
            .map(|(addr, c)| (*addr, c.cs_mode.cur().is_some()))
            .collect();

        for group_id in &group_ids {
            for (addr, has_cs_mode) in &clients {
                let key = (group_id.clone(), *addr);
                if self.stas.get_live(&key).is_some() {
                    continue;
                }
                let (sta, _) = self
                    .stas
                    .get_or_insert_with(key, || BmSta::new(*addr, group_id));
                sta.client_steering_recalc = *has_cs_mode;
                log::info!("Sta {}: attached to group {}", addr, group_id);
                self.work_pending = true;
            }
        }
    }

    fn work_groups(&mut self) {
        for id in self.groups.keys() {
            if self.groups.is_removed(&id) {
                let Some(group) = self.groups.get(&id) else {
                    continue;
                };
                let busy = !group.vifs.is_empty()
                    || self.stas.iter().any(|(key, _)| key.0 == id)
                    || self.bsses.iter().any(|(_, b)| b.group_id == id);
                if !busy && self.groups.reap(&id).is_some() {
                    log::debug!("Bm: group {} reaped", id);
                }
                continue;
            }

            let pending: Vec<String> = self
                .groups
                .get(&id)
                .map(|g| g.pending_vifs.iter().cloned().collect())
                .unwrap_or_default();
            for name in pending {
                if self.vifs.get(&name).is_some() {
                    continue;
                }
                let (vif, _) = self.vifs.get_or_insert_with(name.clone(), || Vif::new(&name, &id));
                log::info!("Bm: pending vif {} adopted by group {}", name, id);
                let vif = &*vif;
                notify(&mut self.observers, |o| o.vif_added(vif));
                if let Some(group) = self.groups.get_mut(&id) {
                    group.pending_vifs.remove(&name);
                    group.vifs.insert(name);
                }
                self.work_pending = true;
            }
        }
    }
}
