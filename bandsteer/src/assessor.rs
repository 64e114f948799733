// Candidate assessor

//! Candidate metric assessment
//!
//! After the policy stack has assigned preferences, the assessor assigns a
//! metric to each candidate. Two layers apply in order:
//!
//! 1. Radio measurement: when the client opted into beacon-report
//!    filtering, a candidate whose fresh RCPI report beats the serving
//!    BSS's by a margin gets `rcpi + RRM_METRIC_BIAS`.
//! 2. Priority: candidates still at metric 0 that carry an explicit
//!    neighbor priority get `max_priority - priority`.

use crate::candidate::CandidateList;
use crate::types::MacAddr;
use std::collections::HashMap;
use std::time::Duration;

/// How long a beacon report stays usable
pub const RRM_REPORT_VALIDITY: Duration = Duration::from_secs(15);

/// RCPI margin a candidate needs over the serving BSS (3 dB in 0.5 dB units)
pub const RRM_BETTER_RCPI_DELTA: u32 = 6;

/// Bias keeping measurement-based metrics above priority-based ones
pub const RRM_METRIC_BIAS: u32 = 1000;

/// One RCPI sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RrmReport {
    pub rcpi: u8,
    pub updated_at: Duration,
}

/// Latest beacon report per (station, BSSID)
#[derive(Debug, Default)]
pub struct RrmStore {
    reports: HashMap<(MacAddr, MacAddr), RrmReport>,
}

impl RrmStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, sta: MacAddr, bssid: MacAddr, rcpi: u8, now: Duration) {
        self.reports.insert(
            (sta, bssid),
            RrmReport {
                rcpi,
                updated_at: now,
            },
        );
    }

    pub fn get(&self, sta: &MacAddr, bssid: &MacAddr) -> Option<&RrmReport> {
        self.reports.get(&(*sta, *bssid))
    }

    /// Report younger than `validity`, if any
    pub fn fresh(
        &self,
        sta: &MacAddr,
        bssid: &MacAddr,
        now: Duration,
        validity: Duration,
    ) -> Option<&RrmReport> {
        self.get(sta, bssid)
            .filter(|r| now.saturating_sub(r.updated_at) <= validity)
    }

    pub fn forget_sta(&mut self, sta: &MacAddr) {
        self.reports.retain(|(s, _), _| s != sta);
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

/// Assigns metrics to a station's candidates
pub trait CandidateAssessor {
    /// Returns false when the station is unknown and nothing was assessed
    fn assess(&self, sta: &MacAddr, list: &mut CandidateList) -> bool;
}

/// Per-client inputs of the assessor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAssessment {
    pub filter_by_beacon_report: bool,
    /// BSS the station is currently associated to
    pub serving_bssid: Option<MacAddr>,
}

/// Assessor backed by RRM reports and neighbor priorities
pub struct MeasurementAssessor<'a> {
    pub client: Option<ClientAssessment>,
    pub priorities: &'a HashMap<MacAddr, u32>,
    pub rrm: &'a RrmStore,
    pub now: Duration,
    pub validity: Duration,
}

impl MeasurementAssessor<'_> {
    fn assess_by_rrm(&self, sta: &MacAddr, serving: &MacAddr, list: &mut CandidateList) {
        let Some(own) = self.rrm.fresh(sta, serving, self.now, self.validity) else {
            log::trace!("Sta {}: no fresh beacon report for serving bss {}", sta, serving);
            return;
        };
        let own_rcpi = u32::from(own.rcpi);

        for c in list.iter_mut() {
            if c.bssid() == serving {
                continue;
            }
            let Some(report) = self.rrm.fresh(sta, c.bssid(), self.now, self.validity) else {
                continue;
            };
            let rcpi = u32::from(report.rcpi);
            if rcpi >= own_rcpi + RRM_BETTER_RCPI_DELTA {
                c.set_metric(rcpi + RRM_METRIC_BIAS);
            }
        }
    }

    fn assess_by_priority(&self, list: &mut CandidateList) {
        let Some(max) = list
            .iter()
            .filter_map(|c| self.priorities.get(c.bssid()))
            .copied()
            .max()
        else {
            return;
        };

        for c in list.iter_mut() {
            if c.metric() != 0 {
                continue;
            }
            if let Some(prio) = self.priorities.get(c.bssid()) {
                c.set_metric(max - prio);
            }
        }
    }
}

impl CandidateAssessor for MeasurementAssessor<'_> {
    fn assess(&self, sta: &MacAddr, list: &mut CandidateList) -> bool {
        let Some(client) = self.client else {
            log::warn!("Sta {}: no client entry, skipping assessment", sta);
            return false;
        };

        list.reset_metrics();
        if client.filter_by_beacon_report {
            if let Some(serving) = client.serving_bssid {
                self.assess_by_rrm(sta, &serving, list);
            }
        }
        self.assess_by_priority(list);
        true
    }
}
