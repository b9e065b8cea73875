//! This module implements addressed access to a discovered Virtual JTAG
//! node: composing the USER1 data-register payload that selects a virtual
//! instruction register on one SLD node, and issuing the scan sequence
//! that writes it.

use thiserror::Error;
use crate::bits;
use crate::engine::{ScanEngine, Tap, Error as EngineError};

/// FPGA instruction-register opcodes driving the SLD fabric. USER1 selects
/// the virtual instruction path, USER0 the virtual data path. These are
/// constant across every Altera device supporting Virtual JTAG, and are
/// not included in the BSDL.
pub const CMD_USER1: u32 = 0x0E;
pub const CMD_USER0: u32 = 0x0C;

/// Virtual IR values selecting the RISC-V debug transport module's
/// registers behind the Virtual JTAG node.
pub const VIR_DTMCS: u32 = 0x10;
pub const VIR_DMI: u32 = 0x11;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Scan engine error")]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A Virtual JTAG node located by SLD hub discovery.
///
/// Holding one is proof that discovery succeeded: the address and widths
/// are only produced by `SldHub::discover`, so an addressed scan can never
/// run with an undiscovered or bogus address.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VjtagNode {
    address: u8,
    addr_width: u8,
    vir_width: u8,
}

/// Widest VIR field the payload composition supports: the 8-bit address
/// must still fit alongside it in a 64-bit word.
const MAX_VIR_WIDTH: u8 = 56;

impl VjtagNode {
    pub(crate) fn new(address: u8, node_count: u8, vir_width: u8) -> VjtagNode {
        // The width comes from the hub's 8-bit field; cap it so the
        // address shift below stays defined.
        if vir_width > MAX_VIR_WIDTH {
            log::warn!("Hub reports {}-bit VIR field, capping at {}",
                       vir_width, MAX_VIR_WIDTH);
        }
        VjtagNode {
            address,
            addr_width: address_width(node_count),
            vir_width: vir_width.min(MAX_VIR_WIDTH),
        }
    }

    /// The node's 1-based address on the hub. The hub itself is always
    /// address 0.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Width in bits of the VIR_VALUE field, the largest virtual IR across
    /// all nodes in the design.
    pub fn vir_width(&self) -> u8 {
        self.vir_width
    }

    /// Total USER1 data-register length for addressed access:
    /// ADDR[(n-1)..0] in the high bits, VIR_VALUE[(m-1)..0] in the low.
    pub fn dr_length(&self) -> usize {
        usize::from(self.addr_width) + usize::from(self.vir_width)
    }

    /// Select virtual instruction register value `vir` on this node.
    ///
    /// Scans USER1 into the TAP's IR, writes `(address << vir_width) | vir`
    /// as the addressed VIR payload, then scans USER0 so that subsequent
    /// DR scans target the node's virtual data register. Values shorter
    /// than the VIR field are zero-padded by construction.
    pub fn select_vir<E: ScanEngine>(&self, engine: &mut E, tap: &Tap, vir: u32)
        -> Result<()>
    {
        let ir = bits::word_to_bytes(CMD_USER1.into(), tap.ir_length());
        engine.scan_ir(&ir, tap.ir_length());

        let payload = (u64::from(self.address) << self.vir_width) | u64::from(vir);
        let dr = bits::word_to_bytes(payload, self.dr_length());
        engine.scan_dr(Some(&dr), self.dr_length(), false);

        let ir = bits::word_to_bytes(CMD_USER0.into(), tap.ir_length());
        engine.scan_ir(&ir, tap.ir_length());

        engine.flush()?;
        Ok(())
    }
}

/// Bits needed to address `count` nodes plus the hub at address 0,
/// n = ceil(log2(count + 1)).
pub(crate) fn address_width(mut count: u8) -> u8 {
    let mut width = 0;
    while count != 0 {
        count >>= 1;
        width += 1;
    }
    width
}

#[cfg(test)]
use crate::engine::mock::{MockEngine, Op};

#[test]
fn test_address_width() {
    assert_eq!(address_width(0), 0);
    assert_eq!(address_width(1), 1);
    assert_eq!(address_width(2), 2);
    assert_eq!(address_width(3), 2);
    assert_eq!(address_width(4), 3);
    assert_eq!(address_width(255), 8);
}

#[test]
fn test_select_vir_payload() {
    // Two nodes, 4-bit VIR field, node address 2: selecting 0x10 scans
    // (2 << 4) | 0x10 = 0x30 as a 6-bit payload.
    let node = VjtagNode::new(2, 2, 4);
    let tap = Tap::new(10);
    let mut engine = MockEngine::new();
    node.select_vir(&mut engine, &tap, 0x10).unwrap();
    assert_eq!(engine.ops, vec![
        Op::Ir { data: vec![0x0E, 0x00], nbits: 10 },
        Op::Dr { data: Some(vec![0x30]), nbits: 6, capture: false },
        Op::Ir { data: vec![0x0C, 0x00], nbits: 10 },
        Op::Flush,
    ]);
}

#[test]
fn test_select_vir_wide_payload() {
    // Three nodes need 2 address bits; a 7-bit VIR field gives a 9-bit
    // payload spanning two bytes.
    let node = VjtagNode::new(3, 3, 7);
    let tap = Tap::new(10);
    let mut engine = MockEngine::new();
    node.select_vir(&mut engine, &tap, 0x5A).unwrap();
    assert_eq!(engine.ops[1],
               Op::Dr { data: Some(vec![0xDA, 0x01]), nbits: 9, capture: false });
}

#[test]
fn test_select_vir_zero_width_field() {
    // A zero-width VIR field leaves only the address bits in the payload.
    let node = VjtagNode::new(1, 1, 0);
    let tap = Tap::new(10);
    let mut engine = MockEngine::new();
    node.select_vir(&mut engine, &tap, 0).unwrap();
    assert_eq!(engine.ops[1],
               Op::Dr { data: Some(vec![0x01]), nbits: 1, capture: false });
}

#[test]
fn test_select_vir_propagates_engine_error() {
    let node = VjtagNode::new(1, 1, 8);
    let tap = Tap::new(10);
    let mut engine = MockEngine::new();
    engine.fail_on_flush = Some(1);
    let result = node.select_vir(&mut engine, &tap, VIR_DTMCS);
    assert!(matches!(result, Err(Error::Engine(EngineError::Probe))));
}

#[test]
fn test_select_vir_value_wider_than_field() {
    // DTMCS (0x10) on a hub with a 4-bit VIR field: the composition is a
    // raw OR, so the value's high bit lands in the address bits and
    // (1 << 4) | 0x10 = 0x20 goes out over the full 2+4 bit payload.
    let node = VjtagNode::new(1, 2, 4);
    let tap = Tap::new(10);
    let mut engine = MockEngine::new();
    node.select_vir(&mut engine, &tap, VIR_DTMCS).unwrap();
    assert_eq!(engine.ops[1],
               Op::Dr { data: Some(vec![0x20]), nbits: 6, capture: false });
}

#[test]
fn test_vir_width_capped_to_payload() {
    // An implausible hub width must not make the address shift overflow;
    // the field is capped so the address still lands above it.
    let node = VjtagNode::new(1, 1, 0xFF);
    assert_eq!(node.vir_width(), 56);
    assert_eq!(node.dr_length(), 57);
    let tap = Tap::new(10);
    let mut engine = MockEngine::new();
    node.select_vir(&mut engine, &tap, 0).unwrap();
    assert_eq!(engine.ops[1],
               Op::Dr { data: Some(vec![0, 0, 0, 0, 0, 0, 0, 0x01]), nbits: 57,
                        capture: false });
}
