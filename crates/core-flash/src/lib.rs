//! core-flash: timing model of the NAND device seen by the data path.
//!
//! `FlashController` accepts `SsdRequest`s and resolves them in logical
//! cycles: array operations (READ/WRITE, local or board-bound) serialize
//! per chip and cost per-page latencies; board transfers (PULL/PUSH) queue
//! per channel and drain at the configured byte rate, pausing while the
//! channel is carrying array traffic. Completions surface as caller-owned
//! tokens from `take_completions`, in completion order, instead of stored
//! callbacks.

mod addr;
mod controller;
mod stats;

pub use addr::{AddrVec, FlashAddress, SsdRequest, SsdRequestKind};
pub use controller::FlashController;
pub use stats::{ChannelIoStats, ChipIoStats, IoStats};
