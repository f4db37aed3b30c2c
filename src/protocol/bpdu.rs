//! Spanning-tree BPDU encoding and decoding (IEEE 802.1D)
//!
//! BPDUs travel in 802.3 frames: destination `01:80:C2:00:00:00`, a length
//! field, then the LLC header `42 42 03` and the BPDU body. Config BPDUs are
//! 52 bytes on the wire; TCN BPDUs carry a 3-byte body and total 21 bytes.

use super::{BridgeId, MacAddr};
use crate::{Error, Result};

/// Destination MAC for all bridge group traffic
pub const BPDU_DST_MAC: MacAddr = MacAddr([0x01, 0x80, 0xC2, 0x00, 0x00, 0x00]);

/// LLC header: DSAP 0x42, SSAP 0x42, control 0x03
pub const LLC_HEADER: [u8; 3] = [0x42, 0x42, 0x03];

/// Total wire length of a Config BPDU frame
pub const CONFIG_FRAME_LEN: usize = 52;
/// Total wire length of a TCN BPDU frame
pub const TCN_FRAME_LEN: usize = 21;

const BPDU_TYPE_CONFIG: u8 = 0x00;
const BPDU_TYPE_TCN: u8 = 0x80;

const FLAG_TOPOLOGY_CHANGE: u8 = 0x01;
const FLAG_TOPOLOGY_CHANGE_ACK: u8 = 0x80;

/// Config BPDU body fields. Timer values are in whole seconds; the wire
/// encoding multiplies by 256 (1/256 s units, big-endian 16-bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigBpdu {
    pub topology_change: bool,
    pub topology_change_ack: bool,
    pub root_id: BridgeId,
    pub root_path_cost: u32,
    pub bridge_id: BridgeId,
    pub port_id: u16,
    pub message_age: u16,
    pub max_age: u16,
    pub hello_time: u16,
    pub forward_delay: u16,
}

/// A decoded BPDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bpdu {
    Config(ConfigBpdu),
    TopologyChangeNotification,
}

/// Quick check whether a frame is addressed to the bridge group.
pub fn is_bpdu_frame(frame: &[u8]) -> bool {
    frame.len() >= 6 && frame[0..6] == BPDU_DST_MAC.0
}

impl Bpdu {
    /// Parse a BPDU from a full 802.3 frame.
    pub fn parse_frame(frame: &[u8]) -> Result<Self> {
        if frame.len() < TCN_FRAME_LEN {
            return Err(Error::Parse("BPDU frame too short".into()));
        }
        if frame[0..6] != BPDU_DST_MAC.0 {
            return Err(Error::Parse("not a bridge group frame".into()));
        }
        if frame[14..17] != LLC_HEADER {
            return Err(Error::Parse("bad LLC header in BPDU".into()));
        }
        // Protocol identifier 0x0000, version 0x00
        if frame[17] != 0 || frame[18] != 0 || frame[19] != 0 {
            return Err(Error::Parse("unknown BPDU protocol".into()));
        }

        match frame[20] {
            BPDU_TYPE_TCN => Ok(Bpdu::TopologyChangeNotification),
            BPDU_TYPE_CONFIG => {
                if frame.len() < CONFIG_FRAME_LEN {
                    return Err(Error::Parse("config BPDU truncated".into()));
                }
                let flags = frame[21];
                Ok(Bpdu::Config(ConfigBpdu {
                    topology_change: flags & FLAG_TOPOLOGY_CHANGE != 0,
                    topology_change_ack: flags & FLAG_TOPOLOGY_CHANGE_ACK != 0,
                    root_id: BridgeId::from_bytes(&frame[22..30]),
                    root_path_cost: u32::from_be_bytes([
                        frame[30], frame[31], frame[32], frame[33],
                    ]),
                    bridge_id: BridgeId::from_bytes(&frame[34..42]),
                    port_id: u16::from_be_bytes([frame[42], frame[43]]),
                    message_age: u16::from_be_bytes([frame[44], frame[45]]) / 256,
                    max_age: u16::from_be_bytes([frame[46], frame[47]]) / 256,
                    hello_time: u16::from_be_bytes([frame[48], frame[49]]) / 256,
                    forward_delay: u16::from_be_bytes([frame[50], frame[51]]) / 256,
                }))
            }
            other => Err(Error::Parse(format!("unknown BPDU type {:#04x}", other))),
        }
    }

    /// Encode this BPDU into a complete 802.3 frame sourced from `src_mac`.
    pub fn encode_frame(&self, src_mac: MacAddr) -> Vec<u8> {
        match self {
            Bpdu::Config(body) => {
                let mut frame = vec![0u8; CONFIG_FRAME_LEN];
                frame[0..6].copy_from_slice(&BPDU_DST_MAC.0);
                frame[6..12].copy_from_slice(&src_mac.0);
                // 802.3 length: LLC (3) + config body (35) = 38
                frame[12..14].copy_from_slice(&38u16.to_be_bytes());
                frame[14..17].copy_from_slice(&LLC_HEADER);
                // Protocol id + version already zero
                frame[20] = BPDU_TYPE_CONFIG;

                let mut flags = 0u8;
                if body.topology_change {
                    flags |= FLAG_TOPOLOGY_CHANGE;
                }
                if body.topology_change_ack {
                    flags |= FLAG_TOPOLOGY_CHANGE_ACK;
                }
                frame[21] = flags;
                frame[22..30].copy_from_slice(&body.root_id.to_bytes());
                frame[30..34].copy_from_slice(&body.root_path_cost.to_be_bytes());
                frame[34..42].copy_from_slice(&body.bridge_id.to_bytes());
                frame[42..44].copy_from_slice(&body.port_id.to_be_bytes());
                frame[44..46].copy_from_slice(&(body.message_age * 256).to_be_bytes());
                frame[46..48].copy_from_slice(&(body.max_age * 256).to_be_bytes());
                frame[48..50].copy_from_slice(&(body.hello_time * 256).to_be_bytes());
                frame[50..52].copy_from_slice(&(body.forward_delay * 256).to_be_bytes());
                frame
            }
            Bpdu::TopologyChangeNotification => {
                let mut frame = vec![0u8; TCN_FRAME_LEN];
                frame[0..6].copy_from_slice(&BPDU_DST_MAC.0);
                frame[6..12].copy_from_slice(&src_mac.0);
                // LLC (3) only
                frame[12..14].copy_from_slice(&3u16.to_be_bytes());
                frame[14..17].copy_from_slice(&LLC_HEADER);
                frame[20] = BPDU_TYPE_TCN;
                frame
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> ConfigBpdu {
        ConfigBpdu {
            topology_change: true,
            topology_change_ack: false,
            root_id: BridgeId::new(4096, MacAddr([0, 0, 0, 0, 0, 1])),
            root_path_cost: 19,
            bridge_id: BridgeId::new(32768, MacAddr([0, 0, 0, 0, 0, 2])),
            port_id: (128 << 8) | 3,
            message_age: 1,
            max_age: 20,
            hello_time: 2,
            forward_delay: 15,
        }
    }

    #[test]
    fn test_config_roundtrip() {
        let src = MacAddr([0, 0, 0, 0, 0, 2]);
        let frame = Bpdu::Config(sample_config()).encode_frame(src);
        assert_eq!(frame.len(), CONFIG_FRAME_LEN);
        assert_eq!(&frame[6..12], &src.0);

        match Bpdu::parse_frame(&frame).unwrap() {
            Bpdu::Config(parsed) => assert_eq!(parsed, sample_config()),
            other => panic!("expected config BPDU, got {:?}", other),
        }
    }

    #[test]
    fn test_tcn_roundtrip() {
        let frame =
            Bpdu::TopologyChangeNotification.encode_frame(MacAddr([0, 0, 0, 0, 0, 2]));
        assert_eq!(frame.len(), TCN_FRAME_LEN);
        assert_eq!(
            Bpdu::parse_frame(&frame).unwrap(),
            Bpdu::TopologyChangeNotification
        );
    }

    #[test]
    fn test_timers_encoded_times_256() {
        let frame = Bpdu::Config(sample_config()).encode_frame(MacAddr::ZERO);
        // max_age = 20 s -> 20 * 256 = 0x1400
        assert_eq!(&frame[46..48], &[0x14, 0x00]);
        // hello = 2 s -> 0x0200
        assert_eq!(&frame[48..50], &[0x02, 0x00]);
    }

    #[test]
    fn test_is_bpdu_frame() {
        let frame = Bpdu::TopologyChangeNotification.encode_frame(MacAddr::ZERO);
        assert!(is_bpdu_frame(&frame));
        assert!(!is_bpdu_frame(&[0xffu8; 60]));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Bpdu::parse_frame(&[0u8; 10]).is_err());

        let mut frame = Bpdu::TopologyChangeNotification.encode_frame(MacAddr::ZERO);
        frame[15] = 0xAA;
        assert!(Bpdu::parse_frame(&frame).is_err());

        let mut frame = Bpdu::TopologyChangeNotification.encode_frame(MacAddr::ZERO);
        frame[20] = 0x42;
        assert!(Bpdu::parse_frame(&frame).is_err());
    }
}
