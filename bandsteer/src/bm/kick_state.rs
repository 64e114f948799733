// Kick state monitor

//! Kick state
//!
//! Remembers which kind of policy triggered the executor so BTM requests
//! can be accounted as force, steering or sticky kicks, and whether a
//! request is a retry. The `disassoc_imminent` override of the matching
//! BTM parameter set is latched at trigger time.

use super::stats::KickSource;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KickState {
    force_trig: bool,
    steering_trig: bool,
    sticky_trig: bool,
    btm_send_cnt: u32,
    disassoc_imminent: Option<bool>,
}

impl KickState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force_trig(&mut self, disassoc_imminent: Option<bool>) {
        self.force_trig = true;
        self.disassoc_imminent = disassoc_imminent;
    }

    pub fn steering_trig(&mut self, disassoc_imminent: Option<bool>) {
        self.steering_trig = true;
        self.disassoc_imminent = disassoc_imminent;
    }

    pub fn sticky_trig(&mut self, disassoc_imminent: Option<bool>) {
        self.sticky_trig = true;
        self.disassoc_imminent = disassoc_imminent;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn disassoc_imminent(&self) -> Option<bool> {
        self.disassoc_imminent
    }

    pub fn btm_send_cnt(&self) -> u32 {
        self.btm_send_cnt
    }

    /// Count one sent BTM request. Returns whether it was a retry.
    pub fn btm_sent(&mut self) -> bool {
        self.btm_send_cnt += 1;
        self.btm_send_cnt > 1
    }

    /// Source of the current kick. `None` when no policy or more than one
    /// kind of policy triggered it.
    pub fn source(&self) -> Option<KickSource> {
        match (self.force_trig, self.steering_trig, self.sticky_trig) {
            (true, false, false) => Some(KickSource::Force),
            (false, true, false) => Some(KickSource::Steering),
            (false, false, true) => Some(KickSource::Sticky),
            (false, false, false) => None,
            _ => {
                log::warn!("Kick state: ambiguous kick trigger {:?}", self);
                None
            }
        }
    }
}
