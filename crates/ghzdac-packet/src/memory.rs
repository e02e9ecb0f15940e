use crate::{get_le, hex_dump, put_le};
use ghzdac_globals::{BuildParameters, Error, MEM_PAGE_LEN, MEM_WRITE_PACKET_LEN, Result};
use std::fmt::{Debug, Display, Formatter};

/// Opcodes of sequencer commands carrying an SRAM address (call SRAM and
/// the dual-block variant). Their address field is relative to an SRAM page.
pub const SRAM_JUMP_OPCODES: [u32; 2] = [0x8, 0xA];

const OPCODE_MASK: u32 = 0xF0_0000;
const OPCODE_SHIFT: u32 = 20;
const ADDRESS_MASK: u32 = 0x0F_FFFF;

/// Opcode nibble of a 24-bit sequencer command.
pub fn opcode(cmd: u32) -> u32 {
    (cmd & OPCODE_MASK) >> OPCODE_SHIFT
}

/// Address bits of a 24-bit sequencer command.
pub fn address(cmd: u32) -> u32 {
    cmd & ADDRESS_MASK
}

/// Rebase the SRAM addresses of a sequencer program onto `page`.
///
/// Commands whose opcode is not an SRAM jump pass through unchanged.
pub fn shift_sram(build: &BuildParameters, words: &[u32], page: usize) -> Vec<u32> {
    let offset = (page * build.sram_page_len) as u32;
    words
        .iter()
        .map(|cmd| {
            let op = opcode(*cmd);
            if SRAM_JUMP_OPCODES.contains(&op) {
                (op << OPCODE_SHIFT) + address(*cmd) + offset
            } else {
                *cmd
            }
        })
        .collect()
}

/// One page of sequencer memory: a page byte followed by up to 256
/// little-endian 24-bit commands.
pub struct MemWritePacket {
    buf: Vec<u8>,
}

impl MemWritePacket {
    const IDX_PAGE: usize = 0;
    const IDX_WORDS: usize = 1;

    pub fn new(page: u8, words: &[u32]) -> Result<Self> {
        if words.len() > MEM_PAGE_LEN {
            return Err(Error::Argument(format!(
                "Memory write called with {} words. Maximum is {MEM_PAGE_LEN}",
                words.len()
            )));
        }
        let mut buf = vec![0u8; MEM_WRITE_PACKET_LEN];
        buf[Self::IDX_PAGE] = page;
        for (idx, word) in words.iter().enumerate() {
            put_le(&mut buf, Self::IDX_WORDS + 3 * idx, 3, *word & 0xFF_FFFF);
        }
        Ok(Self { buf })
    }

    pub fn page(&self) -> u8 {
        self.buf[Self::IDX_PAGE]
    }

    pub fn word(&self, idx: usize) -> u32 {
        get_le(&self.buf, Self::IDX_WORDS + 3 * idx, 3)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl From<MemWritePacket> for Vec<u8> {
    fn from(value: MemWritePacket) -> Self {
        value.buf
    }
}

impl Debug for MemWritePacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemWritePacket")
            .field("page", &self.page())
            .field("word0", &format_args!("{:#08x}", self.word(0)))
            .finish()
    }
}

impl Display for MemWritePacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        hex_dump(&self.buf, f)
    }
}
