// BTM executor action

//! BTM action
//!
//! Sends 802.11v BSS transition requests while the station needs a kick
//! and supports BTM. Requests are rate limited; a throttled request is
//! retried once the limit allows it rather than dropped.

use super::{ActionContext, ActionKind, ActionMediator, BtmNeighbor, BtmRequest, Driver, ExecutorAction};
use crate::candidate::{kick_decision, CandidateList, Preference};
use crate::timer::Timer;
use crate::types::{Link, MacAddr};
use std::fmt::Write;
use std::time::Duration;

pub struct BtmAction {
    sta: MacAddr,
    busy: bool,
    sent: bool,
    last_sent: Option<Duration>,
    retry: Timer,
    send_cnt: u32,
}

impl BtmAction {
    pub fn new(sta: MacAddr) -> Self {
        Self {
            sta,
            busy: false,
            sent: false,
            last_sent: None,
            retry: Timer::new(),
            send_cnt: 0,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Requests sent since the action last went busy
    pub fn send_cnt(&self) -> u32 {
        self.send_cnt
    }

    pub fn response_received(&mut self, m: &mut dyn ActionMediator) {
        if self.busy {
            m.sched_recall(ActionKind::Btm);
        }
    }

    fn go_busy(&mut self, m: &mut dyn ActionMediator) {
        if !self.busy {
            self.busy = true;
            self.sent = false;
            self.send_cnt = 0;
            m.notify_going_busy(ActionKind::Btm);
        }
    }

    fn go_idle(&mut self, m: &mut dyn ActionMediator) {
        if self.busy {
            log::debug!("Sta {}: btm idle after {} request(s)", self.sta, self.send_cnt);
            self.busy = false;
            self.sent = false;
            self.send_cnt = 0;
            self.retry.disarm();
            m.notify_going_idle(ActionKind::Btm);
        }
    }

    /// Link to send the request on: the hard-blocked one if any
    fn kick_link<'a>(list: &CandidateList, links: &'a [Link]) -> Option<&'a Link> {
        links
            .iter()
            .find(|l| {
                list.lookup(&l.bssid)
                    .is_some_and(|c| c.preference() == Preference::HardBlocked)
            })
            .or_else(|| links.first())
    }
}

impl ExecutorAction for BtmAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Btm
    }

    fn call(
        &mut self,
        list: &CandidateList,
        ctx: &ActionContext,
        driver: &mut dyn Driver,
        m: &mut dyn ActionMediator,
    ) -> bool {
        if !kick_decision(list, &ctx.link_bssids()).is_kick() || !ctx.btm_supported {
            self.go_idle(m);
            return true;
        }

        self.go_busy(m);

        if self.retry.is_armed() {
            return self.sent;
        }
        if let Some(last) = self.last_sent {
            let allowed = last + ctx.btm_rate_limit;
            if ctx.now < allowed {
                log::debug!("Sta {}: btm throttled until {:?}", self.sta, allowed);
                self.retry.arm_at(allowed);
                return self.sent;
            }
        }

        let Some(link) = Self::kick_link(list, ctx.links) else {
            return true;
        };
        let neighbors: Vec<BtmNeighbor> = list
            .ranked_available(&link.bssid)
            .into_iter()
            .take(ctx.btm_max_neighbors)
            .enumerate()
            .map(|(i, c)| BtmNeighbor {
                bssid: *c.bssid(),
                preference: u8::MAX.saturating_sub(i as u8),
            })
            .collect();
        if neighbors.is_empty() {
            log::debug!("Sta {}: no btm neighbors on {}", self.sta, link.vif_name);
            return true;
        }

        let req = BtmRequest {
            sta: self.sta,
            vif_name: link.vif_name.clone(),
            neighbors,
            disassoc_imminent: ctx.disassoc_imminent,
            abridged: true,
        };
        match driver.submit_btm(&req) {
            Ok(()) => {
                log::info!(
                    "Sta {}: btm request on {} with {} neighbor(s), disassoc imminent: {}",
                    self.sta,
                    link.vif_name,
                    req.neighbors.len(),
                    req.disassoc_imminent
                );
                self.last_sent = Some(ctx.now);
                self.sent = true;
                self.send_cnt += 1;
                m.notify_data_sent(ActionKind::Btm);
            }
            Err(e) => {
                log::warn!("Sta {}: failed to send btm request: {}", self.sta, e);
            }
        }
        self.retry.arm_at(ctx.now + ctx.btm_rate_limit);

        self.sent
    }

    fn on_timer(&mut self, now: Duration, m: &mut dyn ActionMediator) {
        if self.retry.fire(now) {
            m.sched_recall(ActionKind::Btm);
        }
    }

    fn next_deadline(&self) -> Option<Duration> {
        self.retry.deadline()
    }

    fn dump(&self, out: &mut String, now: Duration) {
        let _ = writeln!(
            out,
            "    btm: busy: {} sent: {} retry: {:?}",
            self.busy,
            self.send_cnt,
            self.retry.remaining(now)
        );
    }
}
