/* Register command packet sent from the host to a DAC board. All multi-byte
 * values are little-endian, every byte not listed is zero.
 *
 * +================+=========================================================+
 * |  Byte offset   |                       Description                       |
 * +================+=========================================================+
 * |        0       | Start mode: 0 no start, 1 run memory (bit 7 = page),    |
 * |                | 2 debug output, 3 SRAM loop, 4 SRAM single shot         |
 * +----------------+---------------------------------------------------------+
 * |        1       | Readback: 0 none, 1 after 2us, 2 I2C, 3 timing stream   |
 * +----------------+---------------------------------------------------------+
 * |        2       | I2C length indicator, 1 << (8 - n)                      |
 * +----------------+---------------------------------------------------------+
 * |        3       | I2C read mask, bit 7 = first byte                       |
 * +----------------+---------------------------------------------------------+
 * |        4       | I2C ack mask, bit 7 = first byte                        |
 * +----------------+---------------------------------------------------------+
 * |      12:5      | I2C data, first byte at 12, written downwards           |
 * +----------------+---------------------------------------------------------+
 * |      15:13     | SRAM start address (24 bit) / memory reps (16 bit)      |
 * +----------------+---------------------------------------------------------+
 * |      28:13     | Debug output words 1..4 (32 bit each)                   |
 * +----------------+---------------------------------------------------------+
 * |      18:16     | SRAM end address (24 bit)                               |
 * +----------------+---------------------------------------------------------+
 * |       19       | SRAM block delay                                        |
 * +----------------+---------------------------------------------------------+
 * |       43       | Slave / idle mode (3 = idle)                            |
 * +----------------+---------------------------------------------------------+
 * |       44       | Start delay, low byte                                   |
 * +----------------+---------------------------------------------------------+
 * |       45       | Sync                                                    |
 * +----------------+---------------------------------------------------------+
 * |       46       | Control: clock polarity bits, PLL reset (0x80)          |
 * +----------------+---------------------------------------------------------+
 * |       47       | Serial operation                                        |
 * +----------------+---------------------------------------------------------+
 * |      50:48     | Serial data (24 bit)                                    |
 * +----------------+---------------------------------------------------------+
 * |       51       | Start delay, high byte (added after the rest of the     |
 * |                | layout was fixed, hence not adjacent to byte 44)        |
 * +----------------+---------------------------------------------------------+
 */
use crate::{get_le, hex_dump, put_le};
use ghzdac_globals::{BuildParameters, DacChannel, Error, REG_PACKET_LEN, Result};
use std::fmt::{Debug, Display, Formatter};

/// Named fields of the register packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterField {
    Mode,
    Readback,
    I2cLength,
    I2cReadMask,
    I2cAckMask,
    I2cData,
    StartAddr,
    Reps,
    DebugWords,
    EndAddr,
    BlockDelay,
    Slave,
    DelayLow,
    Sync,
    Control,
    SerialOp,
    SerialData,
    DelayHigh,
}

impl RegisterField {
    pub const ALL: [RegisterField; 18] = [
        RegisterField::Mode,
        RegisterField::Readback,
        RegisterField::I2cLength,
        RegisterField::I2cReadMask,
        RegisterField::I2cAckMask,
        RegisterField::I2cData,
        RegisterField::StartAddr,
        RegisterField::Reps,
        RegisterField::DebugWords,
        RegisterField::EndAddr,
        RegisterField::BlockDelay,
        RegisterField::Slave,
        RegisterField::DelayLow,
        RegisterField::Sync,
        RegisterField::Control,
        RegisterField::SerialOp,
        RegisterField::SerialData,
        RegisterField::DelayHigh,
    ];

    /// Byte offset of the field.
    pub const fn offset(self) -> usize {
        match self {
            RegisterField::Mode => 0,
            RegisterField::Readback => 1,
            RegisterField::I2cLength => 2,
            RegisterField::I2cReadMask => 3,
            RegisterField::I2cAckMask => 4,
            RegisterField::I2cData => 5,
            RegisterField::StartAddr => 13,
            RegisterField::Reps => 13,
            RegisterField::DebugWords => 13,
            RegisterField::EndAddr => 16,
            RegisterField::BlockDelay => 19,
            RegisterField::Slave => 43,
            RegisterField::DelayLow => 44,
            RegisterField::Sync => 45,
            RegisterField::Control => 46,
            RegisterField::SerialOp => 47,
            RegisterField::SerialData => 48,
            RegisterField::DelayHigh => 51,
        }
    }

    /// Width of the field in bytes.
    pub const fn width(self) -> usize {
        match self {
            RegisterField::I2cData => 8,
            RegisterField::StartAddr | RegisterField::EndAddr | RegisterField::SerialData => 3,
            RegisterField::Reps => 2,
            RegisterField::DebugWords => 16,
            _ => 1,
        }
    }
}

pub struct RegisterPacket {
    buf: Vec<u8>,
}

impl RegisterPacket {
    pub const MODE_NO_START: u8 = 0;
    pub const MODE_RUN_MEMORY: u8 = 1;
    pub const MODE_DEBUG: u8 = 2;
    pub const MODE_SRAM_LOOP: u8 = 3;
    pub const MODE_SRAM_SINGLE: u8 = 4;

    pub const READBACK_NONE: u8 = 0;
    /// Readback after 2us, long enough for serial operations.
    pub const READBACK_DELAYED: u8 = 1;
    pub const READBACK_I2C: u8 = 2;
    pub const READBACK_TIMING: u8 = 3;

    pub const SLAVE_IDLE: u8 = 3;
    pub const CONTROL_PLL_RESET: u8 = 0x80;

    /// Maximum number of bytes in one I2C command.
    pub const I2C_MAX_BYTES: usize = 8;

    const ADDR_MASK: i64 = 0xFF_FFFF;

    fn zeroed(mode: u8, readback: u8) -> Self {
        let mut pkt = Self {
            buf: vec![0u8; REG_PACKET_LEN],
        };
        pkt.set_field(RegisterField::Mode, mode as u32)
            .set_field(RegisterField::Readback, readback as u32);
        pkt
    }

    /// Write a field of at most four bytes.
    pub fn set_field(&mut self, field: RegisterField, value: u32) -> &mut Self {
        debug_assert!(field.width() <= 4);
        put_le(&mut self.buf, field.offset(), field.width(), value);
        self
    }

    /// Read a field of at most four bytes.
    pub fn field(&self, field: RegisterField) -> u32 {
        get_le(&self.buf, field.offset(), field.width().min(4))
    }

    /// Idle command asking for a readback after 2us.
    pub fn ping() -> Self {
        Self::zeroed(Self::MODE_NO_START, Self::READBACK_DELAYED)
    }

    pub fn debug_output(word1: u32, word2: u32, word3: u32, word4: u32) -> Self {
        let mut pkt = Self::zeroed(Self::MODE_DEBUG, Self::READBACK_DELAYED);
        let base = RegisterField::DebugWords.offset();
        for (idx, word) in [word1, word2, word3, word4].into_iter().enumerate() {
            put_le(&mut pkt.buf, base + 4 * idx, 4, word);
        }
        pkt
    }

    /// Run SRAM from `start_addr` to `end_addr`, either looping or once.
    ///
    /// The end address is extended by `block_delay` times the build's
    /// SRAM delay length. Addresses are not checked against the SRAM size.
    pub fn run_sram(
        build: &BuildParameters,
        start_addr: u32,
        end_addr: u32,
        looping: bool,
        block_delay: u8,
        sync: u8,
    ) -> Self {
        let mode = if looping {
            Self::MODE_SRAM_LOOP
        } else {
            Self::MODE_SRAM_SINGLE
        };
        let end = end_addr as i64 - 1 + build.sram_delay_len as i64 * block_delay as i64;
        let mut pkt = Self::zeroed(mode, Self::READBACK_NONE);
        pkt.set_field(RegisterField::StartAddr, start_addr)
            .set_field(RegisterField::EndAddr, (end & Self::ADDR_MASK) as u32)
            .set_field(RegisterField::BlockDelay, block_delay as u32)
            .set_field(RegisterField::Sync, sync as u32);
        pkt
    }

    pub fn clock_polarity(channel: DacChannel, invert: bool) -> Self {
        let (enable_bit, invert_bit) = match channel {
            DacChannel::A => (4, 0),
            DacChannel::B => (5, 1),
        };
        let mut pkt = Self::zeroed(Self::MODE_NO_START, Self::READBACK_DELAYED);
        pkt.set_field(
            RegisterField::Control,
            (1 << enable_bit) + ((invert as u32 & 1) << invert_bit),
        );
        pkt
    }

    pub fn pll_reset() -> Self {
        let mut pkt = Self::zeroed(Self::MODE_NO_START, Self::READBACK_DELAYED);
        pkt.set_field(RegisterField::Control, Self::CONTROL_PLL_RESET as u32);
        pkt
    }

    /// The PLL state is part of every readback, so a query is a ping.
    pub fn pll_query() -> Self {
        Self::ping()
    }

    pub fn serial(op: u8, data: u32) -> Self {
        let mut pkt = Self::zeroed(Self::MODE_NO_START, Self::READBACK_DELAYED);
        pkt.set_field(RegisterField::SerialOp, op as u32)
            .set_field(RegisterField::SerialData, data & 0xFF_FFFF);
        pkt
    }

    /// Up to eight I2C bytes with per-byte read and acknowledge flags.
    pub fn i2c(data: &[u8], read: &[bool], ack: &[bool]) -> Result<Self> {
        if data.len() != read.len() || data.len() != ack.len() {
            return Err(Error::Argument(
                "data, read and ack must have same length for I2C".into(),
            ));
        }
        if data.len() > Self::I2C_MAX_BYTES {
            return Err(Error::Argument(format!(
                "cannot send more than {} I2C data bytes",
                Self::I2C_MAX_BYTES
            )));
        }

        let read_mask = read
            .iter()
            .enumerate()
            .fold(0u32, |mask, (i, r)| mask | ((*r as u32 & 1) << (7 - i)));
        // TODO: confirm on hardware which polarity the firmware expects for
        // the ack mask; no capture of an I2C transaction with acks exists yet.
        let ack_mask = ack
            .iter()
            .enumerate()
            .fold(0u32, |mask, (i, a)| mask | ((*a as u32) << (7 - i)));

        let mut pkt = Self::zeroed(Self::MODE_NO_START, Self::READBACK_I2C);
        pkt.set_field(RegisterField::I2cLength, (1u32 << (8 - data.len())) & 0xFF)
            .set_field(RegisterField::I2cReadMask, read_mask)
            .set_field(RegisterField::I2cAckMask, ack_mask);

        let last = RegisterField::I2cData.offset() + RegisterField::I2cData.width() - 1;
        for (i, byte) in data.iter().enumerate() {
            pkt.buf[last - i] = *byte;
        }
        Ok(pkt)
    }

    /// Run the sequencer memory of `page`, streaming timing data back.
    pub fn run(
        reps: u16,
        page: u8,
        slave: bool,
        delay: u16,
        block_delay: Option<u8>,
        sync: u8,
    ) -> Self {
        let mut pkt = Self::zeroed(
            Self::MODE_RUN_MEMORY + ((page & 1) << 7),
            Self::READBACK_TIMING,
        );
        let [delay_low, delay_high] = delay.to_le_bytes();
        pkt.set_field(RegisterField::Reps, reps as u32)
            .set_field(RegisterField::Slave, slave as u32)
            .set_field(RegisterField::DelayLow, delay_low as u32)
            .set_field(RegisterField::DelayHigh, delay_high as u32)
            .set_field(RegisterField::Sync, sync as u32);
        if let Some(block_delay) = block_delay {
            pkt.set_field(RegisterField::BlockDelay, block_delay as u32);
        }
        pkt
    }

    pub fn idle(delay: u16) -> Self {
        let mut pkt = Self::zeroed(Self::MODE_NO_START, Self::READBACK_NONE);
        pkt.set_field(RegisterField::Slave, Self::SLAVE_IDLE as u32)
            .set_field(RegisterField::DelayLow, (delay & 0xFF) as u32);
        pkt
    }

    pub fn mode(&self) -> u8 {
        self.buf[RegisterField::Mode.offset()]
    }

    pub fn readback(&self) -> u8 {
        self.buf[RegisterField::Readback.offset()]
    }

    /// Whether the board answers this packet with a readback frame.
    pub fn expects_readback(&self) -> bool {
        matches!(
            self.readback(),
            Self::READBACK_DELAYED | Self::READBACK_I2C
        )
    }

    pub fn start_delay(&self) -> u16 {
        u16::from_le_bytes([
            self.buf[RegisterField::DelayLow.offset()],
            self.buf[RegisterField::DelayHigh.offset()],
        ])
    }

    pub fn debug_word(&self, idx: usize) -> u32 {
        get_le(&self.buf, RegisterField::DebugWords.offset() + 4 * idx, 4)
    }

    /// I2C data bytes in the order they were given.
    pub fn i2c_data(&self) -> Vec<u8> {
        let count = match self.field(RegisterField::I2cLength) {
            0 => 0,
            len => 8 - len.trailing_zeros() as usize,
        };
        let last = RegisterField::I2cData.offset() + RegisterField::I2cData.width() - 1;
        (0..count).map(|i| self.buf[last - i]).collect()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl Default for RegisterPacket {
    fn default() -> Self {
        Self::ping()
    }
}

impl TryFrom<Vec<u8>> for RegisterPacket {
    type Error = Error;
    fn try_from(value: Vec<u8>) -> Result<Self> {
        if value.len() != REG_PACKET_LEN {
            return Err(Error::Protocol(format!(
                "register packet must be {REG_PACKET_LEN} bytes, got {}",
                value.len()
            )));
        }
        Ok(Self { buf: value })
    }
}

impl From<RegisterPacket> for Vec<u8> {
    fn from(value: RegisterPacket) -> Self {
        value.buf
    }
}

impl Debug for RegisterPacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterPacket")
            .field("mode", &format_args!("{:#x}", self.mode()))
            .field("readback", &self.readback())
            .field("control", &format_args!("{:#x}", self.field(RegisterField::Control)))
            .field("serial_op", &self.field(RegisterField::SerialOp))
            .field(
                "serial_data",
                &format_args!("{:#x}", self.field(RegisterField::SerialData)),
            )
            .finish()
    }
}

impl Display for RegisterPacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        hex_dump(&self.buf, f)
    }
}
