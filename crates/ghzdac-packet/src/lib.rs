//! Wire formats of the GHz DAC board link.
//!
//! Every frame has a fixed size. The host sends 56 byte register packets,
//! 1026 byte SRAM write packets and 769 byte memory write packets; the
//! board answers register packets that request it with a 70 byte readback.
//! Nothing in this crate performs I/O.

pub mod memory;
pub mod readback;
pub mod register;
pub mod sram;

pub use memory::{MemWritePacket, shift_sram};
pub use readback::Readback;
pub use register::{RegisterField, RegisterPacket};
pub use sram::SramWritePacket;

use std::fmt::{Formatter, Result as FmtResult};

/// Write `width` bytes of `value` little-endian at `offset`.
pub(crate) fn put_le(buf: &mut [u8], offset: usize, width: usize, value: u32) {
    buf[offset..offset + width].copy_from_slice(&value.to_le_bytes()[..width]);
}

/// Read `width` bytes little-endian at `offset`.
pub(crate) fn get_le(buf: &[u8], offset: usize, width: usize) -> u32 {
    buf[offset..offset + width]
        .iter()
        .rev()
        .fold(0u32, |acc, byte| (acc << 8) | *byte as u32)
}

pub(crate) fn hex_dump(buf: &[u8], f: &mut Formatter<'_>) -> FmtResult {
    f.write_str("[")?;
    for elem in buf.iter() {
        f.write_fmt(format_args!("{elem:02x} "))?;
    }
    f.write_str("]")
}
