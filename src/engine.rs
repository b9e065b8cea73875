//! The engine module defines the boundary to the physical JTAG scan-chain
//! engine: a queue of IR/DR scans executed in order by `flush`. The engine
//! itself lives outside this crate (it owns the probe hardware, the TAP
//! state machine and any chain padding); discovery and addressed access
//! only ever drive it through the `ScanEngine` trait.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Probe disconnected or not responding.")]
    Probe,
    #[error("Unexpected scan length returned from probe.")]
    UnexpectedLength,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The physical TAP the SLD fabric sits behind.
///
/// Only the instruction register length matters at this layer; the TAP's
/// position in the scan chain and the bypass padding for its neighbours are
/// the engine's concern.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Tap {
    ir_length: usize,
}

impl Tap {
    pub fn new(ir_length: usize) -> Tap {
        Tap { ir_length }
    }

    pub fn ir_length(&self) -> usize {
        self.ir_length
    }
}

/// Queued access to a JTAG scan-chain engine.
///
/// Scans are queued and only hit the wire on `flush`, which executes them
/// in order and stops at the first failure. Every scan ends by passing the
/// TAP through the relevant update state and back to Run-Test/Idle, so two
/// consecutive DR scans shift into the same register with an Update-DR in
/// between.
pub trait ScanEngine {
    /// Force the TAP into Test-Logic-Reset, then return to Run-Test/Idle.
    fn reset(&mut self);

    /// Queue an instruction-register scan of `nbits` bits of `data`,
    /// least-significant-bit first.
    fn scan_ir(&mut self, data: &[u8], nbits: usize);

    /// Queue a data-register scan of `nbits` bits. When `data` is `None`,
    /// zero bits are shifted in. When `capture` is set, the bits shifted
    /// out are returned by the next `flush`, packed LSB-first.
    fn scan_dr(&mut self, data: Option<&[u8]>, nbits: usize, capture: bool);

    /// Execute all queued scans, returning any captured bytes, or the
    /// first error the transport reported.
    fn flush(&mut self) -> Result<Vec<u8>>;
}

#[cfg(test)]
pub(crate) mod mock {
    //! A scripted engine for exercising discovery without hardware: records
    //! every queued operation and answers captured DR scans from a queue of
    //! canned responses.

    use std::collections::VecDeque;
    use super::{Error, Result, ScanEngine};
    use crate::bits;

    #[derive(Clone, Debug, Eq, PartialEq)]
    pub enum Op {
        Reset,
        Ir { data: Vec<u8>, nbits: usize },
        Dr { data: Option<Vec<u8>>, nbits: usize, capture: bool },
        Flush,
    }

    #[derive(Default)]
    pub struct MockEngine {
        pub ops: Vec<Op>,
        pub responses: VecDeque<Vec<u8>>,
        /// 1-based index of the flush call that should fail, if any.
        pub fail_on_flush: Option<usize>,
        flushes: usize,
        pending: Vec<u8>,
    }

    impl MockEngine {
        pub fn new() -> MockEngine {
            MockEngine::default()
        }

        /// Script a 32-bit hub register, to be shifted out across eight
        /// captured nibble scans, low nibble first.
        pub fn push_register(&mut self, word: u32) {
            for i in 0..8 {
                self.responses.push_back(vec![((word >> (4 * i)) & 0xF) as u8]);
            }
        }

        /// Count of captured DR scans queued so far.
        pub fn captures(&self) -> usize {
            self.ops.iter().filter(|op| {
                matches!(op, Op::Dr { capture: true, .. })
            }).count()
        }
    }

    impl ScanEngine for MockEngine {
        fn reset(&mut self) {
            self.ops.push(Op::Reset);
        }

        fn scan_ir(&mut self, data: &[u8], nbits: usize) {
            self.ops.push(Op::Ir { data: data.to_vec(), nbits });
        }

        fn scan_dr(&mut self, data: Option<&[u8]>, nbits: usize, capture: bool) {
            if capture {
                let bytes = self.responses.pop_front()
                    .unwrap_or_else(|| vec![0; bits::bytes_for_bits(nbits)]);
                self.pending.extend_from_slice(&bytes);
            }
            self.ops.push(Op::Dr { data: data.map(|d| d.to_vec()), nbits, capture });
        }

        fn flush(&mut self) -> Result<Vec<u8>> {
            self.flushes += 1;
            self.ops.push(Op::Flush);
            if self.fail_on_flush == Some(self.flushes) {
                self.pending.clear();
                return Err(Error::Probe);
            }
            Ok(std::mem::take(&mut self.pending))
        }
    }
}
