//! This module implements discovery of the SLD nodes behind an Altera
//! Virtual JTAG hub.
//!
//! All SLD nodes are reached through two FPGA instructions, USER1 and
//! USER0. USER1 targets a virtual instruction register selected by an
//! address field inside the DR scan; USER0 targets the corresponding
//! virtual data register. The hub always holds address 0 and exposes one
//! HUB IP configuration register plus one SLD_NODE_INFO register per node,
//! shifted out as 4-bit nibbles. Discovery reads the hub configuration to
//! learn the node count and the VIR field width, then enumerates the node
//! info registers to find the Virtual JTAG instance and its address.

use std::convert::TryFrom;
use num_enum::TryFromPrimitive;
use thiserror::Error;

use crate::bits;
use crate::engine::{ScanEngine, Tap, Error as EngineError};
use crate::vjtag::{VjtagNode, Error as VjtagError, CMD_USER0, CMD_USER1, VIR_DTMCS};

/// JEDEC manufacturer ID the hub reports for Altera/Intel devices.
pub const ALTERA_MFG_ID: u16 = 0x06E;

/// The hub configuration register and each SLD_NODE_INFO register share one
/// layout: bits [31:27] version, [26:19] node count or node ID, [18:8]
/// manufacturer ID, [7:0] VIR width sum or instance ID.
const VERSION_OFFSET: u32 = 27;
const VERSION_WIDTH: u32 = 5;
const COUNT_ID_OFFSET: u32 = 19;
const COUNT_ID_WIDTH: u32 = 8;
const MFG_OFFSET: u32 = 8;
const MFG_WIDTH: u32 = 11;
const WIDTH_INST_OFFSET: u32 = 0;
const WIDTH_INST_WIDTH: u32 = 8;

/// Combined ADDR+VIR_VALUE width is unknown until the hub configuration is
/// read; 64 zero bits cover the most conservative case when selecting the
/// hub's own VIR.
const HUB_SELECT_BITS: usize = 64;

/// Nibble scans per 32-bit hub register.
const NIBBLES_PER_REGISTER: usize = 8;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Scan engine error")]
    Engine(#[from] EngineError),
    #[error("Virtual JTAG error")]
    Vjtag(#[from] VjtagError),
    #[error("No Virtual JTAG node found on the SLD hub.")]
    NoVjtagNode,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Node-ID values assigned by the SLD fabric to the IP types that can sit
/// on a hub.
#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum NodeId {
    SignalTap = 0x00,
    SerialFlashLoader = 0x04,
    VirtualJtag = 0x08,
    JtagToAvalon = 0x84,
}

impl NodeId {
    pub fn name(&self) -> &'static str {
        match self {
            NodeId::SignalTap => "Signal TAP",
            NodeId::SerialFlashLoader => "Serial Flash Loader",
            NodeId::VirtualJtag => "Virtual JTAG",
            NodeId::JtagToAvalon => "JTAG to Avalon bridge",
        }
    }
}

/// Decoded HUB IP configuration register.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HubConfig {
    pub version: u8,
    pub node_count: u8,
    pub mfg_id: u16,
    pub vir_width: u8,
}

impl HubConfig {
    pub fn from_word(word: u32) -> HubConfig {
        HubConfig {
            version: bits::field(word, VERSION_OFFSET, VERSION_WIDTH) as u8,
            node_count: bits::field(word, COUNT_ID_OFFSET, COUNT_ID_WIDTH) as u8,
            mfg_id: bits::field(word, MFG_OFFSET, MFG_WIDTH) as u16,
            vir_width: bits::field(word, WIDTH_INST_OFFSET, WIDTH_INST_WIDTH) as u8,
        }
    }
}

/// Decoded SLD_NODE_INFO register for one enumerated node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NodeInfo {
    pub version: u8,
    pub node_id: u8,
    pub mfg_id: u16,
    pub inst_id: u8,
}

impl NodeInfo {
    pub fn from_word(word: u32) -> NodeInfo {
        NodeInfo {
            version: bits::field(word, VERSION_OFFSET, VERSION_WIDTH) as u8,
            node_id: bits::field(word, COUNT_ID_OFFSET, COUNT_ID_WIDTH) as u8,
            mfg_id: bits::field(word, MFG_OFFSET, MFG_WIDTH) as u16,
            inst_id: bits::field(word, WIDTH_INST_OFFSET, WIDTH_INST_WIDTH) as u8,
        }
    }

    /// The node's IP type, if it is one the fabric defines.
    pub fn kind(&self) -> Option<NodeId> {
        NodeId::try_from(self.node_id).ok()
    }

    pub fn name(&self) -> &'static str {
        self.kind().map(|id| id.name()).unwrap_or("unknown")
    }
}

/// The SLD hub on one FPGA TAP, ready to run discovery.
pub struct SldHub<'a, E: ScanEngine> {
    engine: &'a mut E,
    tap: &'a Tap,
}

impl<'a, E: ScanEngine> SldHub<'a, E> {
    pub fn new(engine: &'a mut E, tap: &'a Tap) -> SldHub<'a, E> {
        SldHub { engine, tap }
    }

    /// Discover the Virtual JTAG node on this hub and pre-select the
    /// RISC-V debug transport's DTMCS register through it as a
    /// connectivity check.
    ///
    /// Runs once per debug session: reads the hub configuration register,
    /// enumerates every node's SLD_NODE_INFO register, and returns the
    /// node implementing the Virtual JTAG instance. Any scan engine
    /// failure aborts discovery immediately.
    pub fn discover(mut self) -> Result<VjtagNode> {
        log::debug!("Discovering SLD nodes behind the Virtual JTAG hub");
        self.engine.reset();

        // USER1 targets the virtual instruction path; the hub answers at
        // address 0 with the HUB_INFO instruction, also 0, so an
        // over-length all-zero scan selects it. USER0 then enables the
        // target register of HUB_INFO for the nibble reads.
        self.scan_ir(CMD_USER1);
        self.engine.scan_dr(None, HUB_SELECT_BITS, false);
        self.scan_ir(CMD_USER0);
        self.engine.flush()?;

        let config = HubConfig::from_word(self.read_register()?);
        log::debug!("SLD hub: version={} nodes={} mfg=0x{:03X} vir_width={}",
                    config.version, config.node_count, config.mfg_id, config.vir_width);
        log::debug!("USER1 DR length: {} bits",
                    usize::from(crate::vjtag::address_width(config.node_count))
                    + usize::from(config.vir_width));
        if config.mfg_id != ALTERA_MFG_ID {
            log::warn!("Hub reports manufacturer 0x{:03X}, expected 0x{:03X}",
                       config.mfg_id, ALTERA_MFG_ID);
        }

        // The nibble shifts below continue the HUB_INFO DR sequence; the
        // order nodes shift out in assigns their addresses, starting at 1
        // after the hub's own address 0.
        let mut vjtag = None;
        for index in 0..config.node_count {
            let info = NodeInfo::from_word(self.read_register()?);
            log::debug!("SLD node {}: id=0x{:02X} ({}) mfg=0x{:03X} inst={} version={}",
                        index + 1, info.node_id, info.name(), info.mfg_id,
                        info.inst_id, info.version);
            if info.kind() == Some(NodeId::VirtualJtag) {
                vjtag = Some(VjtagNode::new(index + 1, config.node_count,
                                            config.vir_width));
            }
        }

        let node = vjtag.ok_or(Error::NoVjtagNode)?;
        log::debug!("Virtual JTAG node at address {}", node.address());
        node.select_vir(self.engine, self.tap, VIR_DTMCS)?;
        Ok(node)
    }

    /// Shift one 32-bit hub register out as eight 4-bit nibble scans.
    ///
    /// Each nibble must pass through Update-DR before the next is shifted,
    /// so every scan is flushed individually.
    fn read_register(&mut self) -> Result<u32> {
        let mut word = 0;
        for _ in 0..NIBBLES_PER_REGISTER {
            self.engine.scan_dr(None, 4, true);
            let data = self.engine.flush()?;
            let nibble = *data.first().ok_or(EngineError::UnexpectedLength)?;
            word = bits::accumulate_nibble(word, nibble);
        }
        Ok(word)
    }

    fn scan_ir(&mut self, opcode: u32) {
        let ir = bits::word_to_bytes(opcode.into(), self.tap.ir_length());
        self.engine.scan_ir(&ir, self.tap.ir_length());
    }
}

#[cfg(test)]
use crate::engine::mock::{MockEngine, Op};

#[cfg(test)]
fn hub_word(version: u8, node_count: u8, mfg_id: u16, vir_width: u8) -> u32 {
    u32::from(version) << VERSION_OFFSET
        | u32::from(node_count) << COUNT_ID_OFFSET
        | u32::from(mfg_id) << MFG_OFFSET
        | u32::from(vir_width)
}

#[cfg(test)]
fn node_word(version: u8, node_id: u8, mfg_id: u16, inst_id: u8) -> u32 {
    hub_word(version, node_id, mfg_id, inst_id)
}

#[test]
fn test_hub_config_decode() {
    let config = HubConfig::from_word(0x03 << 19 | 0x05);
    assert_eq!(config.node_count, 0x03);
    assert_eq!(config.vir_width, 0x05);
    assert_eq!(config.version, 0);
    assert_eq!(config.mfg_id, 0);

    let config = HubConfig::from_word(hub_word(1, 2, ALTERA_MFG_ID, 4));
    assert_eq!(config, HubConfig { version: 1, node_count: 2,
                                   mfg_id: ALTERA_MFG_ID, vir_width: 4 });
}

#[test]
fn test_node_info_decode() {
    let info = NodeInfo::from_word(node_word(1, 0x08, ALTERA_MFG_ID, 3));
    assert_eq!(info.kind(), Some(NodeId::VirtualJtag));
    assert_eq!(info.name(), "Virtual JTAG");
    assert_eq!(info.inst_id, 3);

    let info = NodeInfo::from_word(node_word(0, 0x42, ALTERA_MFG_ID, 0));
    assert_eq!(info.kind(), None);
    assert_eq!(info.name(), "unknown");
}

#[test]
fn test_discover_end_to_end() {
    // Hub reports 2 nodes and a 4-bit VIR field; node 1 is Signal TAP,
    // node 2 the Virtual JTAG instance. Discovery must record address 2
    // and pre-select DTMCS as (2 << 4) | 0x10 = 0x30 over 2+4 = 6 bits.
    let tap = Tap::new(10);
    let mut engine = MockEngine::new();
    engine.push_register(hub_word(1, 2, ALTERA_MFG_ID, 4));
    engine.push_register(node_word(1, NodeId::SignalTap as u8, ALTERA_MFG_ID, 0));
    engine.push_register(node_word(1, NodeId::VirtualJtag as u8, ALTERA_MFG_ID, 0));

    let node = SldHub::new(&mut engine, &tap).discover().unwrap();
    assert_eq!(node.address(), 2);
    assert_eq!(node.vir_width(), 4);
    assert_eq!(node.dr_length(), 6);

    // Setup sequence: reset, USER1, 64-bit hub select, USER0, flush.
    assert_eq!(engine.ops[..5], [
        Op::Reset,
        Op::Ir { data: vec![0x0E, 0x00], nbits: 10 },
        Op::Dr { data: None, nbits: 64, capture: false },
        Op::Ir { data: vec![0x0C, 0x00], nbits: 10 },
        Op::Flush,
    ]);

    // 8 nibbles for the hub register plus 8 per node, each flushed.
    assert_eq!(engine.captures(), 24);

    // The trailing ops are the DTMCS pre-selection through select_vir.
    let n = engine.ops.len();
    assert_eq!(engine.ops[n - 4..], [
        Op::Ir { data: vec![0x0E, 0x00], nbits: 10 },
        Op::Dr { data: Some(vec![0x30]), nbits: 6, capture: false },
        Op::Ir { data: vec![0x0C, 0x00], nbits: 10 },
        Op::Flush,
    ]);
}

#[test]
fn test_discover_address_matches_enumeration_order() {
    // With 5 nodes and the Virtual JTAG instance at enumeration position
    // 3 (0-indexed), discovery must record address 4.
    let tap = Tap::new(10);
    let mut engine = MockEngine::new();
    engine.push_register(hub_word(1, 5, ALTERA_MFG_ID, 5));
    for position in 0..5 {
        let id = if position == 3 { NodeId::VirtualJtag as u8 }
                 else { NodeId::SignalTap as u8 };
        engine.push_register(node_word(1, id, ALTERA_MFG_ID, position));
    }

    let node = SldHub::new(&mut engine, &tap).discover().unwrap();
    assert_eq!(node.address(), 4);
    // 5 nodes plus the hub need 3 address bits.
    assert_eq!(node.dr_length(), 8);
}

#[test]
fn test_discover_no_vjtag_node() {
    let tap = Tap::new(10);
    for count in 0..4 {
        let mut engine = MockEngine::new();
        engine.push_register(hub_word(1, count, ALTERA_MFG_ID, 4));
        for _ in 0..count {
            engine.push_register(node_word(1, NodeId::SignalTap as u8,
                                           ALTERA_MFG_ID, 0));
        }
        let result = SldHub::new(&mut engine, &tap).discover();
        assert!(matches!(result, Err(Error::NoVjtagNode)));
    }
}

#[test]
fn test_discover_aborts_on_flush_failure() {
    // Fail the third nibble scan of the hub register read: flush 1 is the
    // setup sequence, flushes 2..9 the hub nibbles. Discovery must stop
    // immediately without issuing the remaining nibble scans.
    let tap = Tap::new(10);
    let mut engine = MockEngine::new();
    engine.push_register(hub_word(1, 2, ALTERA_MFG_ID, 4));
    engine.fail_on_flush = Some(4);

    let result = SldHub::new(&mut engine, &tap).discover();
    assert!(matches!(result, Err(Error::Engine(EngineError::Probe))));
    assert_eq!(engine.captures(), 3);
}
