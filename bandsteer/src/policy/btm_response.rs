// BTM response policy

//! BTM response policy
//!
//! When a station rejects a BSS transition request but names a BSS it
//! would rather go to, that BSS is kept available for a short window so
//! the next request can include it.

use super::{LinkEvent, Policy, PolicyKind, PolicyMediator};
use crate::candidate::{CandidateList, Preference};
use crate::timer::Timer;
use crate::types::{BtmResponse, MacAddr, BTM_STATUS_REJECT_CANDIDATE_LIST};
use std::fmt::Write;
use std::time::Duration;

/// How long a station-preferred target stays available
pub const BTM_RESPONSE_PREFERRED_WINDOW: Duration = Duration::from_secs(5);

pub struct BtmResponsePolicy {
    sta: MacAddr,
    preferred: Option<MacAddr>,
    window: Timer,
}

impl BtmResponsePolicy {
    pub fn new(sta: MacAddr) -> Self {
        Self {
            sta,
            preferred: None,
            window: Timer::new(),
        }
    }

    pub fn preferred(&self) -> Option<&MacAddr> {
        self.preferred.as_ref()
    }

    fn clear(&mut self, m: &mut dyn PolicyMediator) {
        if self.preferred.take().is_some() {
            m.schedule_stack_recalc();
        }
        self.window.disarm();
    }
}

impl Policy for BtmResponsePolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::BtmResponse
    }

    fn recalc(&mut self, list: &mut CandidateList, _now: Duration, _m: &mut dyn PolicyMediator) {
        let Some(preferred) = self.preferred else {
            return;
        };
        if let Some(c) = list.lookup_mut(&preferred) {
            if c.preference() == Preference::None {
                c.set_preference(Preference::Available);
            }
        }
    }

    fn on_timer(&mut self, now: Duration, m: &mut dyn PolicyMediator) {
        if self.window.fire(now) {
            self.clear(m);
        }
    }

    fn next_deadline(&self) -> Option<Duration> {
        self.window.deadline()
    }

    fn on_sta_disconnected(&mut self, _link: &LinkEvent, _now: Duration, m: &mut dyn PolicyMediator) {
        self.clear(m);
    }

    fn on_btm_response(
        &mut self,
        bssid: &MacAddr,
        resp: &BtmResponse,
        now: Duration,
        m: &mut dyn PolicyMediator,
    ) {
        if resp.status != BTM_STATUS_REJECT_CANDIDATE_LIST {
            return;
        }
        let Some(target) = resp.target_bssid else {
            return;
        };
        log::info!(
            "Sta {}: rejected btm on {}, prefers {}",
            self.sta,
            bssid,
            target
        );
        self.preferred = Some(target);
        self.window.arm_at(now + BTM_RESPONSE_PREFERRED_WINDOW);
        m.schedule_stack_recalc();
    }

    fn dump(&self, out: &mut String, now: Duration) {
        let _ = writeln!(
            out,
            "    btm_response: preferred: {:?} remaining: {:?}",
            self.preferred,
            self.window.remaining(now)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::testing::*;

    #[test]
    fn test_preferred_target_is_available_for_a_while() {
        let mut p = BtmResponsePolicy::new(STA);
        let mut m = RecordingMediator::default();
        let resp = BtmResponse {
            status: BTM_STATUS_REJECT_CANDIDATE_LIST,
            target_bssid: Some(mac(3)),
        };

        p.on_btm_response(&mac(1), &resp, Duration::ZERO, &mut m);
        assert_eq!(m.recalcs, 1);

        let mut list = candidates(&[1, 3]);
        p.recalc(&mut list, Duration::ZERO, &mut m);
        assert_eq!(pref(&list, 3), Preference::Available);
        assert_eq!(pref(&list, 1), Preference::None);

        p.on_timer(BTM_RESPONSE_PREFERRED_WINDOW, &mut m);
        assert!(p.preferred().is_none());
    }

    #[test]
    fn test_other_responses_are_ignored() {
        let mut p = BtmResponsePolicy::new(STA);
        let mut m = RecordingMediator::default();

        // Accept
        let accept = BtmResponse {
            status: 0,
            target_bssid: Some(mac(3)),
        };
        p.on_btm_response(&mac(1), &accept, Duration::ZERO, &mut m);
        // Reject without a target
        let reject = BtmResponse {
            status: BTM_STATUS_REJECT_CANDIDATE_LIST,
            target_bssid: None,
        };
        p.on_btm_response(&mac(1), &reject, Duration::ZERO, &mut m);

        assert!(p.preferred().is_none());
        assert_eq!(m.recalcs, 0);
    }
}
