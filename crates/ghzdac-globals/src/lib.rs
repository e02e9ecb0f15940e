//! Definitions shared by every crate that talks to a GHz DAC board:
//! the error type, protocol-wide constants, channel naming and the
//! build/board parameter sets loaded from the registry.

pub mod params;

pub use params::{BoardParameters, BuildParameters};

use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Length of a register command packet in bytes.
pub const REG_PACKET_LEN: usize = 56;
/// Length of a register readback packet in bytes.
pub const READBACK_LEN: usize = 70;
/// Length of an SRAM write packet: 2 byte derp index + 256 32-bit words.
pub const SRAM_WRITE_PACKET_LEN: usize = 1026;
/// Length of a memory write packet: 1 byte page index + 256 24-bit words.
pub const MEM_WRITE_PACKET_LEN: usize = 769;
/// Maximum number of words carried by one SRAM write packet.
pub const SRAM_DERP_MAX_WORDS: usize = 256;
/// Total length of the sequencer memory in words.
pub const MEM_LEN: usize = 512;
/// Length of one sequencer memory page in words.
pub const MEM_PAGE_LEN: usize = 256;
/// Length of a timing data packet streamed back while a sequence runs.
pub const TIMING_PACKET_LEN: usize = 30;
/// Timing estimates are multiplied by this factor to get a sequence timeout.
pub const TIMEOUT_FACTOR: u32 = 10;
/// Microseconds the master waits before SRAM to keep boards synchronized.
pub const MASTER_SRAM_DELAY_US: u32 = 2;

/// Default value of the sync byte in run commands.
pub const DEFAULT_SYNC: u8 = 249;

/// I2C word flag: read this byte back.
pub const I2C_RB: u16 = 0x100;
/// I2C word flag: acknowledge this byte.
pub const I2C_ACK: u16 = 0x200;
pub const I2C_RB_ACK: u16 = I2C_RB | I2C_ACK;
pub const I2C_END: u16 = 0x400;

/// Number of polarity flips tried while searching a FIFO phase offset.
pub const MAX_FIFO_TRIES: u32 = 5;
/// Number of whole-board bring-up attempts before a board is declared failed.
pub const NUM_TRIES: u32 = 2;

/// Default time to wait for a register readback.
pub const DEFAULT_READBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Every DAC board MAC address starts with this prefix.
pub const MAC_PREFIX: &str = "00:01:CA:AA:00:";

/// MAC address of a DAC board, derived from its board number.
pub fn mac_for(board: u8) -> String {
    format!("{MAC_PREFIX}{board:02X}")
}

pub fn is_mac(mac: &str) -> bool {
    mac.starts_with(MAC_PREFIX)
}

/// One of the two DAC channels on a board.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DacChannel {
    A = 0,
    B = 1,
}

impl DacChannel {
    pub const ALL: [DacChannel; 2] = [DacChannel::A, DacChannel::B];

    /// Serial interface operation addressing this DAC chip.
    pub fn serial_op(&self) -> u8 {
        match self {
            DacChannel::A => 2,
            DacChannel::B => 3,
        }
    }

    /// Bit position of this channel's 14 bit sample inside an SRAM word.
    pub fn sram_shift(&self) -> u32 {
        match self {
            DacChannel::A => 0,
            DacChannel::B => 14,
        }
    }
}

impl Display for DacChannel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DacChannel::A => f.write_str("A"),
            DacChannel::B => f.write_str("B"),
        }
    }
}

impl TryFrom<char> for DacChannel {
    type Error = Error;
    fn try_from(value: char) -> Result<Self> {
        match value.to_ascii_uppercase() {
            'A' => Ok(DacChannel::A),
            'B' => Ok(DacChannel::B),
            _ => {
                log::error!("unsupported DAC channel {value:?}");
                Err(Error::Argument(format!("unknown DAC channel {value:?}")))
            }
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Malformed or undersized readback frame.
    #[error("protocol: {0}")]
    Protocol(String),
    /// No readback arrived within the timeout.
    #[error("readback timed out after {0:?}")]
    Timeout(Duration),
    /// Invalid argument provided.
    #[error("{0}")]
    Argument(String),
    /// Handshake or parameter lookup failed while connecting to a board.
    #[error("connection: {0}")]
    Connection(String),
    /// Missing or mistyped configuration value.
    #[error("configuration: {0}")]
    Config(String),
    /// Another test mode operation is running on this board.
    #[error("board {0} is busy")]
    Busy(String),
    /// A search did not reach its target precision.
    #[error("calibration did not converge after {iterations} iterations")]
    CalibrationDivergence {
        /// Number of iterations run before giving up.
        iterations: u32,
    },
    /// Error reported by an external collaborator (link, instrument, store).
    #[error("instrument: {0}")]
    Instrument(#[from] anyhow::Error),
}

/// Result type for operations that may return an `Error`.
pub type Result<T> = std::result::Result<T, Error>;
