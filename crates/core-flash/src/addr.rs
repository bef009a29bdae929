//! Physical addressing and the request surface.

use smallvec::SmallVec;
use std::fmt;

/// Physical flash location. Die 0 holds graph structure, die 1 holds node
/// features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlashAddress {
    pub channel: u32,
    pub chip: u32,
    pub die: u32,
    pub plane: u32,
    pub block: u32,
    pub page: u32,
}

impl fmt::Display for FlashAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}, {}, {}",
            self.channel, self.chip, self.die, self.plane, self.block, self.page
        )
    }
}

/// What a request does with the array and the channel bus. Local array
/// operations stay inside the chip (page register) and never cross the
/// bus; PULL/PUSH move already-staged bytes between chip and board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsdRequestKind {
    ReadLocal,
    Read,
    WriteLocal,
    Write,
    Pull,
    Push,
}

impl SsdRequestKind {
    pub fn is_array_op(self) -> bool {
        matches!(
            self,
            Self::ReadLocal | Self::Read | Self::WriteLocal | Self::Write
        )
    }

    pub fn is_bus_op(self) -> bool {
        matches!(self, Self::Pull | Self::Push)
    }

    pub fn is_write(self) -> bool {
        matches!(self, Self::WriteLocal | Self::Write)
    }

    pub fn is_local(self) -> bool {
        matches!(self, Self::ReadLocal | Self::WriteLocal)
    }
}

/// Per-plane address list of one request; sized for common plane counts.
pub type AddrVec = SmallVec<[FlashAddress; 8]>;

/// A request into the device. `bytes` is the per-plane payload for array
/// operations (split into pages when it exceeds the page capacity) and
/// the total payload for bus transfers. `completion` is handed back from
/// `FlashController::take_completions` when the request resolves.
#[derive(Debug)]
pub struct SsdRequest<C> {
    pub kind: SsdRequestKind,
    pub addrs: AddrVec,
    pub bytes: u32,
    pub completion: C,
}
