//! sldscan
//!
//! Discovery and addressed access for Altera/Intel Virtual JTAG (SLD)
//! nodes, used to reach a RISC-V debug transport module embedded in an
//! FPGA bitstream through the device's USER0/USER1 instructions.
//!
//! The physical scan-chain engine is an external collaborator supplied
//! through the [`engine::ScanEngine`] trait. [`hub::SldHub::discover`]
//! runs the two-phase hub discovery once per debug session and returns a
//! [`vjtag::VjtagNode`]; [`vjtag::VjtagNode::select_vir`] then addresses
//! any virtual instruction register on that node for the debug traffic
//! layered above.

pub mod engine;
pub mod bits;
pub mod vjtag;
pub mod hub;

pub use engine::{ScanEngine, Tap};
pub use hub::{SldHub, HubConfig, NodeInfo, NodeId};
pub use vjtag::{VjtagNode, VIR_DTMCS, VIR_DMI};
