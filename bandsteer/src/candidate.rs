// Candidate list and kick decision

//! Candidate list
//!
//! Every steered station owns a list of candidate BSSes. Each pass the
//! policy stack writes a [`Preference`] for every candidate and the
//! assessor writes a metric. The executor actions then derive a single
//! [`KickDecision`] from the list and the station's active links.

use crate::types::MacAddr;
use std::fmt;

/// Steering preference of a candidate BSS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Preference {
    /// No policy has an opinion (yet)
    None,
    /// Not relevant for this station at all
    OutOfScope,
    /// Must not be used; kick if connected
    HardBlocked,
    /// Do not let the station in, but do not kick it out
    SoftBlocked,
    /// Usable target
    Available,
}

impl Preference {
    pub fn as_str(self) -> &'static str {
        match self {
            Preference::None => "none",
            Preference::OutOfScope => "out_of_scope",
            Preference::HardBlocked => "hard_blocked",
            Preference::SoftBlocked => "soft_blocked",
            Preference::Available => "available",
        }
    }
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A BSS the station could be steered to (or away from)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    bssid: MacAddr,
    preference: Preference,
    metric: u32,
}

impl Candidate {
    pub fn new(bssid: MacAddr) -> Self {
        Self {
            bssid,
            preference: Preference::None,
            metric: 0,
        }
    }

    pub fn bssid(&self) -> &MacAddr {
        &self.bssid
    }

    pub fn preference(&self) -> Preference {
        self.preference
    }

    pub fn metric(&self) -> u32 {
        self.metric
    }

    pub fn set_preference(&mut self, preference: Preference) {
        self.preference = preference;
    }

    pub fn set_metric(&mut self, metric: u32) {
        self.metric = metric;
    }
}

/// Ordered set of candidates, unique by BSSID
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateList {
    candidates: Vec<Candidate>,
}

impl CandidateList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a BSSID; duplicates are ignored
    pub fn insert(&mut self, bssid: MacAddr) {
        if self.lookup(&bssid).is_none() {
            self.candidates.push(Candidate::new(bssid));
        }
    }

    pub fn remove(&mut self, bssid: &MacAddr) {
        self.candidates.retain(|c| c.bssid != *bssid);
    }

    /// Make the list hold exactly `bssids`, keeping existing entries
    pub fn sync(&mut self, bssids: &[MacAddr]) {
        self.candidates.retain(|c| bssids.contains(&c.bssid));
        for bssid in bssids {
            self.insert(*bssid);
        }
    }

    pub fn lookup(&self, bssid: &MacAddr) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.bssid == *bssid)
    }

    pub fn lookup_mut(&mut self, bssid: &MacAddr) -> Option<&mut Candidate> {
        self.candidates.iter_mut().find(|c| c.bssid == *bssid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Candidate> {
        self.candidates.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Reset every preference back to `None`
    pub fn clear_preferences(&mut self) {
        for c in &mut self.candidates {
            c.preference = Preference::None;
        }
    }

    pub fn reset_metrics(&mut self) {
        for c in &mut self.candidates {
            c.metric = 0;
        }
    }

    /// Set every still undecided candidate to `preference`
    pub fn fill_undecided(&mut self, preference: Preference) {
        for c in &mut self.candidates {
            if c.preference == Preference::None {
                c.preference = preference;
            }
        }
    }

    pub fn has_available(&self) -> bool {
        self.candidates
            .iter()
            .any(|c| c.preference == Preference::Available)
    }

    /// Available candidates other than `exclude`, best metric first.
    /// Equal metrics keep list order.
    pub fn ranked_available(&self, exclude: &MacAddr) -> Vec<&Candidate> {
        let mut out: Vec<&Candidate> = self
            .candidates
            .iter()
            .filter(|c| c.preference == Preference::Available && c.bssid != *exclude)
            .collect();
        out.sort_by(|a, b| b.metric.cmp(&a.metric));
        out
    }
}

/// Why no kick is necessary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoKickReason {
    /// Station has no active links
    Disconnected,
    /// No candidate is available anywhere
    NoCandidatesLeft,
    /// Station is linked to a BSS outside the candidate list
    LinkToNonCandidate,
    /// Current link is acceptable
    GoodEnough,
}

/// Why a kick is necessary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KickReason {
    /// A link is hard-blocked
    HardBlocked,
    /// A strictly better available candidate exists
    BetterMetric,
}

/// Aggregated kick decision for a station
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KickDecision {
    NoKick(NoKickReason),
    Kick(KickReason),
}

impl KickDecision {
    pub fn is_kick(&self) -> bool {
        matches!(self, KickDecision::Kick(_))
    }
}

fn link_verdict(list: &CandidateList, link: &MacAddr) -> KickDecision {
    let Some(own) = list.lookup(link) else {
        return KickDecision::NoKick(NoKickReason::LinkToNonCandidate);
    };

    match own.preference {
        Preference::HardBlocked => KickDecision::Kick(KickReason::HardBlocked),
        Preference::Available => {
            let better = list.iter().any(|c| {
                c.preference == Preference::Available && c.bssid != *link && c.metric > own.metric
            });
            if better {
                KickDecision::Kick(KickReason::BetterMetric)
            } else {
                KickDecision::NoKick(NoKickReason::GoodEnough)
            }
        }
        _ => KickDecision::NoKick(NoKickReason::GoodEnough),
    }
}

/// Decide whether the station must be kicked off its current links.
/// A hard-block on any link wins over a better-metric vote.
pub fn kick_decision(list: &CandidateList, links: &[MacAddr]) -> KickDecision {
    if links.is_empty() {
        return KickDecision::NoKick(NoKickReason::Disconnected);
    }
    if !list.has_available() {
        return KickDecision::NoKick(NoKickReason::NoCandidatesLeft);
    }

    let verdicts: Vec<KickDecision> = links.iter().map(|l| link_verdict(list, l)).collect();
    if verdicts.contains(&KickDecision::Kick(KickReason::HardBlocked)) {
        return KickDecision::Kick(KickReason::HardBlocked);
    }
    if verdicts.contains(&KickDecision::Kick(KickReason::BetterMetric)) {
        return KickDecision::Kick(KickReason::BetterMetric);
    }
    if verdicts
        .iter()
        .all(|v| *v == KickDecision::NoKick(NoKickReason::LinkToNonCandidate))
    {
        return KickDecision::NoKick(NoKickReason::LinkToNonCandidate);
    }
    KickDecision::NoKick(NoKickReason::GoodEnough)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddr {
        MacAddr::new([0x02, 0, 0, 0, 0, last])
    }

    fn list(entries: &[(u8, Preference, u32)]) -> CandidateList {
        let mut l = CandidateList::new();
        for (id, pref, metric) in entries {
            l.insert(mac(*id));
            let c = l.lookup_mut(&mac(*id)).unwrap();
            c.set_preference(*pref);
            c.set_metric(*metric);
        }
        l
    }

    #[test]
    fn test_insert_is_unique() {
        let mut l = CandidateList::new();
        l.insert(mac(1));
        l.insert(mac(1));
        l.insert(mac(2));
        assert_eq!(l.len(), 2);

        l.remove(&mac(1));
        assert!(l.lookup(&mac(1)).is_none());
        assert_eq!(l.len(), 1);
    }

    #[test]
    fn test_sync_keeps_existing_entries() {
        let mut l = list(&[(1, Preference::Available, 7)]);
        l.sync(&[mac(1), mac(3)]);
        assert_eq!(l.len(), 2);
        assert_eq!(l.lookup(&mac(1)).unwrap().metric(), 7);
        assert_eq!(l.lookup(&mac(3)).unwrap().preference(), Preference::None);

        l.sync(&[mac(3)]);
        assert!(l.lookup(&mac(1)).is_none());
    }

    #[test]
    fn test_no_links_is_disconnected() {
        let l = list(&[(1, Preference::HardBlocked, 0), (2, Preference::Available, 0)]);
        assert_eq!(
            kick_decision(&l, &[]),
            KickDecision::NoKick(NoKickReason::Disconnected)
        );
    }

    #[test]
    fn test_no_available_means_no_kick() {
        let l = list(&[(1, Preference::HardBlocked, 0), (2, Preference::SoftBlocked, 0)]);
        assert_eq!(
            kick_decision(&l, &[mac(1)]),
            KickDecision::NoKick(NoKickReason::NoCandidatesLeft)
        );
    }

    #[test]
    fn test_hard_blocked_link_is_kicked() {
        let l = list(&[(1, Preference::HardBlocked, 0), (2, Preference::Available, 0)]);
        assert_eq!(
            kick_decision(&l, &[mac(1)]),
            KickDecision::Kick(KickReason::HardBlocked)
        );
    }

    #[test]
    fn test_better_metric() {
        let l = list(&[(1, Preference::Available, 10), (2, Preference::Available, 20)]);
        assert_eq!(
            kick_decision(&l, &[mac(1)]),
            KickDecision::Kick(KickReason::BetterMetric)
        );

        // Equal metric is not better
        let l = list(&[(1, Preference::Available, 20), (2, Preference::Available, 20)]);
        assert_eq!(
            kick_decision(&l, &[mac(1)]),
            KickDecision::NoKick(NoKickReason::GoodEnough)
        );
    }

    #[test]
    fn test_hard_block_wins_over_better_metric() {
        let l = list(&[
            (1, Preference::Available, 1),
            (2, Preference::HardBlocked, 0),
            (3, Preference::Available, 9),
        ]);
        assert_eq!(
            kick_decision(&l, &[mac(1), mac(2)]),
            KickDecision::Kick(KickReason::HardBlocked)
        );
    }

    #[test]
    fn test_link_to_non_candidate() {
        let l = list(&[(2, Preference::Available, 0)]);
        assert_eq!(
            kick_decision(&l, &[mac(9)]),
            KickDecision::NoKick(NoKickReason::LinkToNonCandidate)
        );
    }

    #[test]
    fn test_ranked_available() {
        let l = list(&[
            (1, Preference::Available, 5),
            (2, Preference::SoftBlocked, 50),
            (3, Preference::Available, 9),
            (4, Preference::Available, 5),
        ]);
        let ranked: Vec<MacAddr> = l.ranked_available(&mac(3)).iter().map(|c| *c.bssid()).collect();
        assert_eq!(ranked, vec![mac(1), mac(4)]);
    }

    #[test]
    fn test_fill_undecided() {
        let mut l = list(&[(1, Preference::None, 0), (2, Preference::HardBlocked, 0)]);
        l.fill_undecided(Preference::Available);
        assert_eq!(l.lookup(&mac(1)).unwrap().preference(), Preference::Available);
        assert_eq!(l.lookup(&mac(2)).unwrap().preference(), Preference::HardBlocked);
    }
}
