use crate::{get_le, hex_dump, put_le};
use ghzdac_globals::{
    BuildParameters, Error, Result, SRAM_DERP_MAX_WORDS, SRAM_WRITE_PACKET_LEN,
};
use std::fmt::{Debug, Display, Formatter};

/// One derp of SRAM data: a 16-bit derp index followed by up to 256
/// little-endian 32-bit words. Unused word slots stay zero.
pub struct SramWritePacket {
    buf: Vec<u8>,
}

impl SramWritePacket {
    const IDX_DERP: usize = 0;
    const IDX_WORDS: usize = 2;

    pub fn new(build: &BuildParameters, derp: usize, words: &[u32]) -> Result<Self> {
        if derp >= build.sram_write_derps {
            return Err(Error::Argument(format!(
                "SRAM derp {derp} out of range, build has {} derps",
                build.sram_write_derps
            )));
        }
        if words.len() > SRAM_DERP_MAX_WORDS {
            return Err(Error::Argument(format!(
                "SRAM derp holds at most {SRAM_DERP_MAX_WORDS} words, got {}",
                words.len()
            )));
        }
        let mut buf = vec![0u8; SRAM_WRITE_PACKET_LEN];
        put_le(&mut buf, Self::IDX_DERP, 2, derp as u32);
        for (idx, word) in words.iter().enumerate() {
            put_le(&mut buf, Self::IDX_WORDS + 4 * idx, 4, *word);
        }
        Ok(Self { buf })
    }

    pub fn derp(&self) -> u16 {
        get_le(&self.buf, Self::IDX_DERP, 2) as u16
    }

    pub fn word(&self, idx: usize) -> u32 {
        get_le(&self.buf, Self::IDX_WORDS + 4 * idx, 4)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl From<SramWritePacket> for Vec<u8> {
    fn from(value: SramWritePacket) -> Self {
        value.buf
    }
}

impl Debug for SramWritePacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SramWritePacket")
            .field("derp", &self.derp())
            .field("word0", &format_args!("{:#010x}", self.word(0)))
            .finish()
    }
}

impl Display for SramWritePacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        hex_dump(&self.buf, f)
    }
}
