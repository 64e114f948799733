// Engine state dump

//! Human readable dump of the entity graph and every station's policy
//! stack, written on request by the daemon.

use super::entities::BssOwner;
use super::Engine;
use std::fmt::Write;
use std::time::Duration;

fn opt<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

impl Engine {
    /// Render the entity graph and every station's policy stack
    pub fn dump(&self, now: Duration) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "now: {}ms", now.as_millis());

        let _ = writeln!(out, "groups:");
        for (id, group) in self.groups.iter() {
            let removed = if self.groups.is_removed(id) { " (removed)" } else { "" };
            let _ = writeln!(
                out,
                "  {}{}: vifs [{}] pending [{}]",
                id,
                removed,
                group.vifs.iter().cloned().collect::<Vec<_>>().join(","),
                group.pending_vifs.iter().cloned().collect::<Vec<_>>().join(",")
            );
        }

        let _ = writeln!(out, "vifs:");
        for (name, vif) in self.vifs.iter() {
            let removed = if self.vifs.is_removed(name) { " (removed)" } else { "" };
            let _ = writeln!(
                out,
                "  {}{}: group {} bss {} channel {} shutting_down {}",
                name,
                removed,
                vif.group_id,
                opt(vif.bss),
                opt(vif.channel()),
                vif.shutting_down
            );
            if let Some(info) = &vif.info {
                let _ = writeln!(
                    out,
                    "    ssid {:?} enabled {} acl {:?} [{}]",
                    info.ssid,
                    info.enabled,
                    info.acl_policy,
                    info.acl.iter().map(|m| m.to_string()).collect::<Vec<_>>().join(",")
                );
            }
        }

        let _ = writeln!(out, "bsses:");
        for (bssid, bss) in self.bsses.iter() {
            let removed = if self.bsses.is_removed(bssid) { " (removed)" } else { "" };
            let owner = match &bss.owner {
                BssOwner::Local { vif_name } => format!("local {}", vif_name),
                BssOwner::Remote { neighbor } => format!("neighbor {}", neighbor),
            };
            let _ = writeln!(
                out,
                "  {}{}: group {} {} channel {} op_class {}",
                bssid,
                removed,
                bss.group_id,
                owner,
                opt(bss.channel),
                opt(bss.op_class)
            );
        }

        let _ = writeln!(out, "neighbors:");
        for (bssid, n) in self.neighbors.iter() {
            let removed = if self.neighbors.is_removed(bssid) { " (removed)" } else { "" };
            let _ = writeln!(
                out,
                "  {}{}: vif {} channel {} ht_mode {:?} op_class {} priority {} up {}",
                bssid,
                removed,
                opt(n.vif_name.cur()),
                opt(n.channel()),
                n.ht_mode.cur(),
                opt(n.op_class.cur()),
                opt(n.priority.cur()),
                n.is_up()
            );
        }

        let _ = writeln!(out, "clients:");
        for (addr, c) in self.clients.iter() {
            let removed = if self.clients.is_removed(addr) { " (removed)" } else { "" };
            let _ = writeln!(
                out,
                "  {}{}: hwm {} lwm {} bottom_lwm {} pref_5g {:?} kick_type {:?} force_kick {:?} cs_mode {:?} active {}",
                addr,
                removed,
                opt(c.hwm.cur()),
                opt(c.lwm.cur()),
                opt(c.bottom_lwm.cur()),
                c.pref_5g.cur(),
                c.kick_type.cur(),
                c.force_kick.cur(),
                c.cs_mode.cur(),
                c.bps_activity
            );
            for (vif_name, s) in c.stats.iter() {
                let _ = writeln!(
                    out,
                    "    {}: connects {} disconnects {} probes {}/{} events {}",
                    vif_name,
                    s.connects,
                    s.disconnects,
                    s.probe_bcast_cnt,
                    s.probe_direct_cnt,
                    s.events.len()
                );
            }
        }

        let _ = writeln!(out, "stas:");
        for (key, sta) in self.stas.iter() {
            let removed = if self.stas.is_removed(key) { " (removed)" } else { "" };
            let _ = writeln!(
                out,
                "  {} group {}{}: client steering {} kick source {:?} btm sent {} rrm pending {}",
                key.1,
                key.0,
                removed,
                if sta.cs.in_progress() { "in progress" } else { "idle" },
                sta.kick.source(),
                sta.kick.btm_send_cnt(),
                sta.rrm.as_ref().map(|r| r.pending()).unwrap_or(0)
            );
            sta.steer.dump(&mut out, now);
        }

        out
    }
}
