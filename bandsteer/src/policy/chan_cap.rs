// Channel capability policy

//! Channel capability policy
//!
//! Scopes out candidates operating on a band the station did not
//! advertise in its association request.

use super::{Policy, PolicyKind, PolicyMediator};
use crate::candidate::{CandidateList, Preference};
use crate::ieee80211::BandCaps;
use crate::types::{Band, MacAddr};
use std::fmt::Write;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChanCapConfig {
    pub caps: BandCaps,
    /// Band of every known BSS
    pub bss_bands: Vec<(MacAddr, Band)>,
}

pub struct ChanCapPolicy {
    config: Option<ChanCapConfig>,
}

impl ChanCapPolicy {
    pub fn new() -> Self {
        Self { config: None }
    }

    pub fn set_config(&mut self, config: Option<ChanCapConfig>, m: &mut dyn PolicyMediator) {
        if self.config == config {
            return;
        }
        self.config = config;
        m.schedule_stack_recalc();
    }
}

impl Default for ChanCapPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl Policy for ChanCapPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::ChanCap
    }

    fn recalc(&mut self, list: &mut CandidateList, _now: Duration, _m: &mut dyn PolicyMediator) {
        let Some(config) = &self.config else {
            return;
        };

        for c in list.iter_mut() {
            if c.preference() != Preference::None {
                continue;
            }
            let band = config
                .bss_bands
                .iter()
                .find(|(bssid, _)| bssid == c.bssid())
                .map(|(_, band)| *band);
            if let Some(band) = band {
                if !config.caps.supports(band) {
                    c.set_preference(Preference::OutOfScope);
                }
            }
        }
    }

    fn dump(&self, out: &mut String, _now: Duration) {
        let _ = writeln!(
            out,
            "    chan_cap: {:?}",
            self.config.as_ref().map(|c| c.caps)
        );
    }
}
