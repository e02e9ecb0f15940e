//! Host side driver for GHz DAC boards, written in Rust on top of [tokio].
//!
//! [tokio]: https://tokio.rs
//!
//! A GHz DAC board is an FPGA driving two 14 bit, 1 GS/s DACs (A and B). The
//! host talks to it with fixed size raw Ethernet frames addressed by the
//! board's MAC address. This crate provides:
//!
//! - [`ghzdac_packet`]: encoding and decoding of every frame on the link.
//! - [`board::DacBoard`]: a session with one board, serializing register
//!   exchanges, SRAM and memory writes, serial and I2C transactions.
//! - [`board::bringup`]: PLL, LVDS, FIFO and BIST bring-up of a board, with
//!   a retrying driver for several boards.
//! - [`calibration`]: measurement-in-the-loop calibration of the DAC zeros,
//!   the IQ mixer sidebands and the pulse timing.
//!
//! ## Usage overview
//!
//! The raw link, the registry, the instruments and the data vault are
//! reached through traits ([`link::BoardLink`], [`registry::Registry`] and
//! the traits in [`calibration`]). Implement them for your transport and
//! open a session with [`board::DacBoard::connect`]:
//!
//! ```ignore
//! let dac = DacBoard::connect(link, &registry, "Vince DAC 11", 11, 7).await?;
//! let report = bringup_device(&Device::Dac(dac), &BringupOptions::default()).await;
//! ```
//!
//! ## Limitations
//!
//! - Only the DAC board family is driven here; ADC boards only take part in
//!   bring-up through [`board::AdcBoard`].
//! - Multi-board sequence orchestration, the GUI and the instrument servers
//!   themselves are out of scope.
//!
//! ## Developers
//!
//! The integration tests in `tests/` run every operation against a simulated
//! board (`tests/common/mod.rs`). Enable the logs of a test with
//! `RUST_LOG=trace cargo test -- --nocapture`.

pub mod board;
pub mod calibration;
pub mod link;
pub mod registry;

pub use board::{AdcBoard, DacBoard, Device};
pub use ghzdac_globals::*;
pub use ghzdac_packet;
