// Association request information elements

//! Association request parsing
//!
//! Extracts the station capabilities the steering logic cares about from
//! the raw information elements of an (re)association request: BSS
//! transition support, radio measurement capabilities, supported operating
//! classes and channels, and the PHY capability elements.

use crate::types::{chan_to_band_guess, op_class_info, Band, ParseError};

/// Element IDs
const IE_SSID: u8 = 0;
const IE_POWER_CAP: u8 = 33;
const IE_SUPPORTED_CHANNELS: u8 = 36;
const IE_HT_CAPS: u8 = 45;
const IE_SUPPORTED_OP_CLASSES: u8 = 59;
const IE_RM_ENABLED_CAPS: u8 = 70;
const IE_EXT_CAPS: u8 = 127;
const IE_VHT_CAPS: u8 = 191;
const IE_EXTENSION: u8 = 255;
const IE_EXT_HE_CAPS: u8 = 35;

/// Delimiters ending the op class list of the Supported Operating Classes element
const OP_CLASS_DELIM_130: u8 = 130;
const OP_CLASS_DELIM_ZERO: u8 = 0;

/// Radio measurement capabilities (RM Enabled Capabilities element)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RrmCaps {
    pub link_meas: bool,
    pub neigh_rpt: bool,
    pub bcn_rpt_passive: bool,
    pub bcn_rpt_active: bool,
    pub bcn_rpt_table: bool,
    pub lci_meas: bool,
    pub ftm_range_rpt: bool,
}

/// Bands a station claims to support
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BandCaps {
    pub band_2g: bool,
    pub band_5g: bool,
    pub band_6g: bool,
}

impl BandCaps {
    pub fn supports(&self, band: Band) -> bool {
        match band {
            Band::Band2G => self.band_2g,
            Band::Band5G => self.band_5g,
            Band::Band6G => self.band_6g,
        }
    }

    fn set(&mut self, band: Band) {
        match band {
            Band::Band2G => self.band_2g = true,
            Band::Band5G => self.band_5g = true,
            Band::Band6G => self.band_6g = true,
        }
    }
}

/// Capabilities parsed from association request IEs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssocReqInfo {
    pub ssid: Option<Vec<u8>>,
    pub op_classes: Vec<u8>,
    /// Channel numbers expanded from the Supported Channels element
    pub supported_channels: Vec<u8>,
    pub wnm_bss_trans: bool,
    pub rrm_caps: Option<RrmCaps>,
    pub ht_caps: bool,
    pub vht_caps: bool,
    pub he_caps: bool,
    pub max_chwidth_mhz: u32,
    pub max_streams: u8,
    pub is_static_smps: bool,
    pub is_mu_mimo_supported: bool,
    pub max_txpower_dbm: Option<i8>,
}

impl AssocReqInfo {
    /// Walk the element list. Unknown elements are skipped, a truncated
    /// element fails the whole parse.
    pub fn parse(ies: &[u8]) -> Result<Self, ParseError> {
        let mut info = AssocReqInfo {
            max_chwidth_mhz: 20,
            ..Default::default()
        };

        let mut offset = 0;
        while offset < ies.len() {
            let id = ies[offset];
            let len = *ies
                .get(offset + 1)
                .ok_or(ParseError::TruncatedIe { id, offset })? as usize;
            let body = ies
                .get(offset + 2..offset + 2 + len)
                .ok_or(ParseError::TruncatedIe { id, offset })?;
            info.apply(id, body);
            offset += 2 + len;
        }

        Ok(info)
    }

    fn apply(&mut self, id: u8, body: &[u8]) {
        match id {
            IE_SSID => self.ssid = Some(body.to_vec()),
            IE_POWER_CAP => {
                if let Some(max) = body.get(1) {
                    self.max_txpower_dbm = Some(*max as i8);
                }
            }
            IE_SUPPORTED_CHANNELS => {
                for pair in body.chunks_exact(2) {
                    let (first, count) = (pair[0], pair[1]);
                    let step = if first <= 14 { 1 } else { 4 };
                    for i in 0..count {
                        if let Some(chan) = first.checked_add(i.saturating_mul(step)) {
                            self.supported_channels.push(chan);
                        }
                    }
                }
            }
            IE_HT_CAPS => {
                self.ht_caps = true;
                if let Some(cap_lo) = body.first() {
                    if cap_lo & 0x02 != 0 {
                        self.max_chwidth_mhz = self.max_chwidth_mhz.max(40);
                    }
                    self.is_static_smps = (cap_lo >> 2) & 0x03 == 0;
                }
                // Rx MCS bitmask starts at byte 3, one byte per spatial stream
                if let Some(mcs) = body.get(3..7) {
                    let streams = mcs.iter().take_while(|b| **b != 0).count() as u8;
                    self.max_streams = self.max_streams.max(streams);
                }
            }
            IE_SUPPORTED_OP_CLASSES => {
                // First byte is the current op class, the list follows
                for op_class in body.iter().skip(1) {
                    if *op_class == OP_CLASS_DELIM_130 || *op_class == OP_CLASS_DELIM_ZERO {
                        break;
                    }
                    self.op_classes.push(*op_class);
                }
                if let Some(current) = body.first() {
                    if !self.op_classes.contains(current) {
                        self.op_classes.insert(0, *current);
                    }
                }
            }
            IE_RM_ENABLED_CAPS => {
                let byte = |i: usize| body.get(i).copied().unwrap_or(0);
                self.rrm_caps = Some(RrmCaps {
                    link_meas: byte(0) & 0x01 != 0,
                    neigh_rpt: byte(0) & 0x02 != 0,
                    bcn_rpt_passive: byte(0) & 0x10 != 0,
                    bcn_rpt_active: byte(0) & 0x20 != 0,
                    bcn_rpt_table: byte(0) & 0x40 != 0,
                    lci_meas: byte(1) & 0x10 != 0,
                    ftm_range_rpt: byte(4) & 0x04 != 0,
                });
            }
            IE_EXT_CAPS => {
                // Bit 19: BSS Transition
                self.wnm_bss_trans = body.get(2).is_some_and(|b| b & 0x08 != 0);
            }
            IE_VHT_CAPS => {
                self.vht_caps = true;
                self.max_chwidth_mhz = self.max_chwidth_mhz.max(80);
                if body.len() >= 4 {
                    let cap = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
                    if (cap >> 2) & 0x03 != 0 {
                        self.max_chwidth_mhz = 160;
                    }
                    self.is_mu_mimo_supported = cap & (1 << 20) != 0;
                }
            }
            IE_EXTENSION => {
                if body.first() == Some(&IE_EXT_HE_CAPS) {
                    self.he_caps = true;
                }
            }
            _ => {}
        }
    }

    /// Station can answer active beacon measurement requests
    pub fn rrm_neighbor_bcn_act_meas(&self) -> bool {
        self.rrm_caps.is_some_and(|c| c.bcn_rpt_active)
    }

    /// Bands the station advertises. Operating classes take precedence;
    /// otherwise Supported Channels are mapped at 20 MHz, which cannot
    /// express 6 GHz.
    pub fn band_caps(&self) -> BandCaps {
        let mut caps = BandCaps::default();
        if !self.op_classes.is_empty() {
            for op_class in &self.op_classes {
                if let Some(info) = op_class_info(*op_class) {
                    caps.set(info.band);
                }
            }
        } else {
            for chan in &self.supported_channels {
                if let Some(band) = chan_to_band_guess(*chan) {
                    caps.set(band);
                }
            }
        }
        caps
    }

    /// Coarse PHY generation for capability reports
    pub fn phy_mode(&self) -> &'static str {
        if self.he_caps {
            "11ax"
        } else if self.vht_caps {
            "11ac"
        } else if self.ht_caps {
            "11n"
        } else {
            "legacy"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ie(id: u8, body: &[u8]) -> Vec<u8> {
        let mut v = vec![id, body.len() as u8];
        v.extend_from_slice(body);
        v
    }

    #[test]
    fn test_parse_empty() {
        let info = AssocReqInfo::parse(&[]).unwrap();
        assert!(!info.wnm_bss_trans);
        assert!(info.rrm_caps.is_none());
        assert_eq!(info.band_caps(), BandCaps::default());
    }

    #[test]
    fn test_parse_truncated() {
        // Length says 4 bytes, only 2 present
        let err = AssocReqInfo::parse(&[IE_SSID, 4, b'a', b'b']).unwrap_err();
        assert_eq!(err, ParseError::TruncatedIe { id: 0, offset: 0 });

        // Missing length byte
        assert!(AssocReqInfo::parse(&[IE_SSID]).is_err());
    }

    #[test]
    fn test_parse_capabilities() {
        let mut ies = ie(IE_SSID, b"home");
        ies.extend(ie(IE_EXT_CAPS, &[0x00, 0x00, 0x08, 0x00]));
        ies.extend(ie(IE_RM_ENABLED_CAPS, &[0x33, 0x00, 0x00, 0x00, 0x00]));
        ies.extend(ie(IE_EXTENSION, &[IE_EXT_HE_CAPS, 0x00]));

        let info = AssocReqInfo::parse(&ies).unwrap();
        assert_eq!(info.ssid.as_deref(), Some(&b"home"[..]));
        assert!(info.wnm_bss_trans);
        assert!(info.rrm_neighbor_bcn_act_meas());
        let rrm = info.rrm_caps.unwrap();
        assert!(rrm.link_meas);
        assert!(rrm.neigh_rpt);
        assert!(rrm.bcn_rpt_passive);
        assert!(!rrm.bcn_rpt_table);
        assert!(info.he_caps);
        assert_eq!(info.phy_mode(), "11ax");
    }

    #[test]
    fn test_band_caps_from_supported_channels_only_5g() {
        // 36..48 in steps of 4, 149..161
        let ies = ie(IE_SUPPORTED_CHANNELS, &[36, 4, 149, 4]);
        let info = AssocReqInfo::parse(&ies).unwrap();
        assert_eq!(info.supported_channels, vec![36, 40, 44, 48, 149, 153, 157, 161]);

        let caps = info.band_caps();
        assert!(!caps.band_2g);
        assert!(caps.band_5g);
        assert!(!caps.band_6g);
    }

    #[test]
    fn test_band_caps_from_op_classes() {
        // Current 81, then 81, 115, 131, delimiter, trailing junk
        let ies = ie(IE_SUPPORTED_OP_CLASSES, &[81, 81, 115, 131, 130, 128]);
        let info = AssocReqInfo::parse(&ies).unwrap();
        assert_eq!(info.op_classes, vec![81, 115, 131]);

        let caps = info.band_caps();
        assert!(caps.band_2g);
        assert!(caps.band_5g);
        assert!(caps.band_6g);
    }

    #[test]
    fn test_op_classes_take_precedence_over_channels() {
        let mut ies = ie(IE_SUPPORTED_OP_CLASSES, &[115, 115]);
        ies.extend(ie(IE_SUPPORTED_CHANNELS, &[1, 13]));
        let caps = AssocReqInfo::parse(&ies).unwrap().band_caps();
        assert!(!caps.band_2g);
        assert!(caps.band_5g);
    }

    #[test]
    fn test_ht_vht_caps() {
        // HT cap info: 40 MHz supported, SMPS disabled (0b11), 2 streams
        let mut ht = vec![0x02 | 0x0c, 0x00, 0x00, 0xff, 0xff, 0x00, 0x00];
        ht.resize(26, 0);
        let mut ies = ie(IE_HT_CAPS, &ht);
        // VHT: 160 MHz, MU beamformee
        let vht_cap: u32 = (1 << 2) | (1 << 20);
        let mut vht = vht_cap.to_le_bytes().to_vec();
        vht.extend_from_slice(&[0; 8]);
        ies.extend(ie(IE_VHT_CAPS, &vht));

        let info = AssocReqInfo::parse(&ies).unwrap();
        assert!(info.ht_caps);
        assert!(info.vht_caps);
        assert!(!info.is_static_smps);
        assert_eq!(info.max_streams, 2);
        assert_eq!(info.max_chwidth_mhz, 160);
        assert!(info.is_mu_mimo_supported);
        assert_eq!(info.phy_mode(), "11ac");
    }
}
