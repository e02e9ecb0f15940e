/* Register readback sent by the board after a register packet with a
 * nonzero readback mode.
 *
 * +================+=========================================================+
 * |  Byte offset   |                       Description                       |
 * +================+=========================================================+
 * |       51       | FPGA build number                                       |
 * +----------------+---------------------------------------------------------+
 * |       56       | Serial readback byte (DAC or PLL register)              |
 * +----------------+---------------------------------------------------------+
 * |       58       | Bit 7: PLL lost lock since last reset                   |
 * +----------------+---------------------------------------------------------+
 * |       61       | I2C acknowledge bits                                    |
 * +----------------+---------------------------------------------------------+
 * |      69:62     | I2C read bytes, first byte at 69                        |
 * +----------------+---------------------------------------------------------+
 */
use crate::hex_dump;
use ghzdac_globals::{Error, READBACK_LEN, Result};
use std::fmt::{Debug, Display, Formatter};

pub struct Readback {
    buf: Vec<u8>,
}

impl Readback {
    const IDX_BUILD: usize = 51;
    const IDX_SERIAL: usize = 56;
    const IDX_PLL: usize = 58;
    const IDX_I2C_ACK: usize = 61;
    const IDX_I2C_FIRST: usize = 62;
    const IDX_I2C_LAST: usize = 69;

    const PLL_UNLOCKED_BIT: u8 = 0x80;

    /// Decode a readback frame. Frames shorter than 70 bytes are rejected;
    /// trailing bytes beyond that are ignored.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        if frame.len() < READBACK_LEN {
            log::error!(
                "readback frame too short: {} < {READBACK_LEN} bytes",
                frame.len()
            );
            return Err(Error::Protocol(format!(
                "readback frame has {} bytes, expected {READBACK_LEN}",
                frame.len()
            )));
        }
        Ok(Self {
            buf: frame[..READBACK_LEN].to_vec(),
        })
    }

    pub fn build(&self) -> u8 {
        self.buf[Self::IDX_BUILD]
    }

    /// Byte shifted out of the serial interface by the last serial command.
    pub fn serial_echo(&self) -> u8 {
        self.buf[Self::IDX_SERIAL]
    }

    pub fn pll_unlocked(&self) -> bool {
        self.buf[Self::IDX_PLL] & Self::PLL_UNLOCKED_BIT != 0
    }

    pub fn i2c_ack(&self) -> u8 {
        self.buf[Self::IDX_I2C_ACK]
    }

    /// The eight I2C readback bytes, first byte first.
    pub fn i2c_bytes(&self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        for (dst, src) in bytes
            .iter_mut()
            .zip((Self::IDX_I2C_FIRST..=Self::IDX_I2C_LAST).rev())
        {
            *dst = self.buf[src];
        }
        bytes
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl TryFrom<Vec<u8>> for Readback {
    type Error = Error;
    fn try_from(value: Vec<u8>) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Readback> for Vec<u8> {
    fn from(value: Readback) -> Self {
        value.buf
    }
}

impl Debug for Readback {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Readback")
            .field("build", &self.build())
            .field("serial_echo", &format_args!("{:#x}", self.serial_echo()))
            .field("pll_unlocked", &self.pll_unlocked())
            .field("i2c_ack", &format_args!("{:#x}", self.i2c_ack()))
            .finish()
    }
}

impl Display for Readback {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        hex_dump(&self.buf, f)
    }
}
