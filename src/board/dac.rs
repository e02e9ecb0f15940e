mod bist;
mod fifo;
mod lvds;

pub use bist::{BistReport, bist_checksum};
pub use fifo::FifoReport;
pub use lvds::LvdsReport;

use crate::link::BoardLink;
use crate::registry::{FPGA_SERVER_PATH, Registry};
use crate::{Error, Result};
use atomic_enum::atomic_enum;
use ghzdac_globals::{
    BoardParameters, BuildParameters, DEFAULT_READBACK_TIMEOUT, DEFAULT_SYNC, DacChannel, I2C_ACK,
    I2C_RB, MEM_PAGE_LEN, mac_for,
};
use ghzdac_packet::{MemWritePacket, Readback, RegisterPacket, SramWritePacket, shift_sram};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::Mutex;

/// PLL programming words sent on serial operation 1 by [`DacBoard::init_pll`].
const PLL_INIT_WORDS: [u32; 4] = [0x1F_C093, 0x1F_C092, 0x10_0004, 0x00_0C11];
const PLL_SERIAL_OP: u8 = 1;

#[atomic_enum]
#[derive(PartialEq, Eq)]
pub enum SessionMode {
    Idle = 0,
    TestMode,
}

/// Resets the session to idle when a test mode operation ends, however it ends.
struct TestModeGuard<'a> {
    mode: &'a AtomicSessionMode,
}

impl Drop for TestModeGuard<'_> {
    fn drop(&mut self) {
        self.mode.store(SessionMode::Idle, Ordering::Release);
    }
}

/// Session with one DAC board.
///
/// All traffic goes through a single link guarded by a mutex that is held
/// for a whole write + readback exchange, so operations issued on one
/// session complete in issue order.
pub struct DacBoard<L: BoardLink> {
    link: Mutex<L>,
    name: String,
    board: u8,
    mac: String,
    firmware_build: u32,
    build: Arc<BuildParameters>,
    board_params: BoardParameters,
    mode: AtomicSessionMode,
    timeout: Duration,
}

impl<L: BoardLink> DacBoard<L> {
    /// Create a session from parameters that are already known.
    pub async fn from_parts(
        mut link: L,
        name: &str,
        board: u8,
        firmware_build: u32,
        build: Arc<BuildParameters>,
        board_params: BoardParameters,
    ) -> Result<Self> {
        let mac = mac_for(board);
        link.listen(&mac)
            .await
            .map_err(|e| Error::Connection(format!("cannot listen on {mac}: {e}")))?;
        log::debug!("{name}: listening on {mac}");
        Ok(Self {
            link: Mutex::new(link),
            name: name.to_string(),
            board,
            mac,
            firmware_build,
            build,
            board_params,
            mode: AtomicSessionMode::new(SessionMode::Idle),
            timeout: DEFAULT_READBACK_TIMEOUT,
        })
    }

    /// Connect to board number `board` running firmware build `firmware_build`,
    /// loading its build and board parameters from the registry.
    ///
    /// The board parameters are stored under `dac<suffix>`, where the suffix
    /// is the last word of `name`.
    pub async fn connect(
        link: L,
        registry: &impl Registry,
        name: &str,
        board: u8,
        firmware_build: u32,
    ) -> Result<Self> {
        let build_key = format!("dacBuild{firmware_build}");
        let board_key = format!("dac{}", name.split(' ').next_back().unwrap_or(name));

        let build = registry
            .get(&FPGA_SERVER_PATH, &build_key)
            .await
            .map_err(|e| Error::Connection(format!("{name}: {e}")))?;
        let build = build
            .as_parameters()
            .and_then(BuildParameters::from_pairs)
            .map_err(|e| Error::Connection(format!("{name}: {build_key}: {e}")))?;

        let board_params = registry
            .get(&FPGA_SERVER_PATH, &board_key)
            .await
            .map_err(|e| Error::Connection(format!("{name}: {e}")))?;
        let board_params = board_params
            .as_parameters()
            .and_then(BoardParameters::from_pairs)
            .map_err(|e| Error::Connection(format!("{name}: {board_key}: {e}")))?;

        Self::from_parts(link, name, board, firmware_build, Arc::new(build), board_params).await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn board(&self) -> u8 {
        self.board
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    pub fn firmware_build(&self) -> u32 {
        self.firmware_build
    }

    pub fn build_parameters(&self) -> &Arc<BuildParameters> {
        &self.build
    }

    pub fn board_parameters(&self) -> &BoardParameters {
        &self.board_params
    }

    pub fn set_board_parameters(&mut self, params: BoardParameters) {
        self.board_params = params;
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn mode(&self) -> SessionMode {
        self.mode.load(Ordering::Acquire)
    }

    /// Run `f` with the session in test mode.
    ///
    /// Only one test mode operation may run at a time on a session; a second
    /// one fails with [`Error::Busy`] instead of interleaving with the first.
    pub async fn test_mode<T, F>(&self, f: F) -> Result<T>
    where
        F: AsyncFnOnce(&Self) -> Result<T>,
    {
        self.mode
            .compare_exchange(
                SessionMode::Idle,
                SessionMode::TestMode,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| Error::Busy(self.name.clone()))?;
        let _guard = TestModeGuard { mode: &self.mode };
        f(self).await
    }

    async fn write_frames<'a>(&self, frames: impl IntoIterator<Item = &'a [u8]>) -> Result<()> {
        let mut link = self.link.lock().await;
        for frame in frames {
            link.write(frame).await?;
        }
        Ok(())
    }

    /// Send a register packet without waiting for an answer.
    pub async fn send_registers(&self, regs: &RegisterPacket) -> Result<()> {
        log::trace!("{}: {regs:?}", self.name);
        let mut link = self.link.lock().await;
        link.write(regs.as_bytes()).await?;
        Ok(())
    }

    /// Send a register packet and wait at most `timeout` for its readback.
    pub async fn send_registers_readback(
        &self,
        regs: &RegisterPacket,
        timeout: Duration,
    ) -> Result<Readback> {
        log::trace!("{}: {regs:?}", self.name);
        let mut link = self.link.lock().await;
        link.write(regs.as_bytes()).await?;
        let frame = tokio::time::timeout(timeout, link.read())
            .await
            .map_err(|_| {
                log::warn!("{}: no readback after {timeout:?}", self.name);
                Error::Timeout(timeout)
            })??;
        let readback = Readback::parse(&frame)?;
        log::trace!("{}: {readback:?}", self.name);
        Ok(readback)
    }

    /// [`DacBoard::send_registers_readback`] with the session timeout.
    pub async fn exchange(&self, regs: &RegisterPacket) -> Result<Readback> {
        self.send_registers_readback(regs, self.timeout).await
    }

    fn sram_packets(&self, words: &[u32], page: usize) -> Result<Vec<SramWritePacket>> {
        let first = self.build.page_start_derp(page);
        words
            .chunks(self.build.sram_write_pkt_len)
            .enumerate()
            .map(|(idx, chunk)| SramWritePacket::new(&self.build, first + idx, chunk))
            .collect()
    }

    fn memory_packet(&self, words: &[u32], page: u8) -> Result<MemWritePacket> {
        if words.len() > MEM_PAGE_LEN {
            return Err(Error::Argument(format!(
                "memory length {} exceeds maximum memory length {MEM_PAGE_LEN} (one page)",
                words.len()
            )));
        }
        if page > 0 {
            MemWritePacket::new(page, &shift_sram(&self.build, words, page as usize))
        } else {
            MemWritePacket::new(page, words)
        }
    }

    /// Write SRAM data starting at the first derp of `page`.
    ///
    /// Every packet is built before the first one is sent, so an argument
    /// error leaves the board untouched.
    pub async fn write_sram(&self, words: &[u32], page: usize) -> Result<()> {
        let packets = self.sram_packets(words, page)?;
        log::debug!(
            "{}: writing {} SRAM words in {} packets to page {page}",
            self.name,
            words.len(),
            packets.len()
        );
        self.write_frames(packets.iter().map(|p| p.as_bytes())).await
    }

    /// Write one page of sequencer memory.
    pub async fn write_memory(&self, words: &[u32], page: u8) -> Result<()> {
        let packet = self.memory_packet(words, page)?;
        log::debug!("{}: writing {} memory words to page {page}", self.name, words.len());
        self.write_frames([packet.as_bytes()]).await
    }

    /// Write a sequencer program and its SRAM to `page`.
    pub async fn load(&self, mem: &[u32], sram: &[u32], page: u8) -> Result<()> {
        let memory = self.memory_packet(mem, page)?;
        let sram = self.sram_packets(sram, page as usize)?;
        self.write_frames(
            std::iter::once(memory.as_bytes()).chain(sram.iter().map(|p| p.as_bytes())),
        )
        .await
    }

    /// Send each word through serial interface `op`, collecting the echo bytes.
    pub async fn serial(&self, op: u8, words: &[u32]) -> Result<Vec<u8>> {
        let mut answer = Vec::with_capacity(words.len());
        for word in words {
            let readback = self.exchange(&RegisterPacket::serial(op, *word)).await?;
            answer.push(readback.serial_echo());
        }
        log::trace!("{}: serial op {op}: {answer:x?}", self.name);
        Ok(answer)
    }

    /// Run I2C transactions.
    ///
    /// Each packet is a list of words: a data byte in the low 8 bits plus the
    /// `I2C_RB`/`I2C_ACK` flags. Words above 0xFF send a zero data byte.
    /// Returns the bytes of every word flagged for readback, in order.
    pub async fn i2c(&self, packets: &[Vec<u16>]) -> Result<Vec<u8>> {
        let mut answer = Vec::new();
        for packet in packets {
            for chunk in packet.chunks(RegisterPacket::I2C_MAX_BYTES) {
                let data: Vec<u8> = chunk
                    .iter()
                    .map(|w| u8::try_from(*w).unwrap_or(0))
                    .collect();
                let read: Vec<bool> = chunk.iter().map(|w| w & I2C_RB != 0).collect();
                let ack: Vec<bool> = chunk.iter().map(|w| w & I2C_ACK != 0).collect();

                let readback = self
                    .exchange(&RegisterPacket::i2c(&data, &read, &ack)?)
                    .await?;
                // Read data wraps around to the end of the window.
                let window = readback.i2c_bytes();
                let window = &window[window.len() - chunk.len()..];
                answer.extend(
                    window
                        .iter()
                        .zip(read.iter())
                        .filter(|(_, r)| **r)
                        .map(|(b, _)| *b),
                );
            }
        }
        Ok(answer)
    }

    /// Set the clock polarity of one DAC, returning the polarity applied.
    pub async fn set_polarity(&self, channel: DacChannel, invert: bool) -> Result<bool> {
        self.exchange(&RegisterPacket::clock_polarity(channel, invert))
            .await?;
        Ok(invert)
    }

    /// Start playing SRAM from `start` to `end`.
    pub(crate) async fn start_sram(
        &self,
        start: usize,
        end: usize,
        looping: bool,
        block_delay: u8,
    ) -> Result<()> {
        if start > end || end > self.build.sram_len {
            return Err(Error::Argument(format!(
                "SRAM range {start}..{end} outside 0..{}",
                self.build.sram_len
            )));
        }
        let regs = RegisterPacket::run_sram(
            &self.build,
            start as u32,
            end as u32,
            looping,
            block_delay,
            DEFAULT_SYNC,
        );
        self.send_registers(&regs).await
    }

    /// Run the sequencer memory of `page`.
    pub async fn start_sequence(
        &self,
        reps: u16,
        page: u8,
        slave: bool,
        delay: u16,
        block_delay: Option<u8>,
        sync: u8,
    ) -> Result<()> {
        self.send_registers(&RegisterPacket::run(reps, page, slave, delay, block_delay, sync))
            .await
    }

    pub async fn idle(&self, delay: u16) -> Result<()> {
        self.send_registers(&RegisterPacket::idle(delay)).await
    }

    /// Wait at most `timeout` until `count` timing packets have arrived.
    pub async fn collect(&self, count: usize, timeout: Duration) -> Result<()> {
        let mut link = self.link.lock().await;
        tokio::time::timeout(timeout, link.collect(count))
            .await
            .map_err(|_| Error::Timeout(timeout))??;
        Ok(())
    }

    pub async fn read(&self, count: usize) -> Result<Vec<Vec<u8>>> {
        let mut link = self.link.lock().await;
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            frames.push(link.read().await?);
        }
        Ok(frames)
    }

    pub async fn discard(&self, count: usize) -> Result<()> {
        self.link.lock().await.discard(count).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        self.link.lock().await.clear().await?;
        Ok(())
    }

    pub async fn build_number(&self) -> Result<u8> {
        self.test_mode(async |dac| Ok(dac.exchange(&RegisterPacket::ping()).await?.build()))
            .await
    }

    pub async fn init_pll(&self) -> Result<()> {
        self.test_mode(async |dac| {
            dac.serial(PLL_SERIAL_OP, &PLL_INIT_WORDS).await?;
            dac.start_sram(0, 0, false, 0).await
        })
        .await
    }

    /// Returns true when the PLL lost lock since its last reset.
    pub async fn query_pll(&self) -> Result<bool> {
        self.test_mode(async |dac| {
            Ok(dac
                .exchange(&RegisterPacket::pll_query())
                .await?
                .pll_unlocked())
        })
        .await
    }

    pub async fn reset_pll(&self) -> Result<()> {
        self.test_mode(async |dac| {
            dac.exchange(&RegisterPacket::pll_reset()).await?;
            Ok(())
        })
        .await
    }

    pub async fn debug_output(&self, word1: u32, word2: u32, word3: u32, word4: u32) -> Result<()> {
        self.test_mode(async |dac| {
            dac.exchange(&RegisterPacket::debug_output(word1, word2, word3, word4))
                .await?;
            Ok(())
        })
        .await
    }

    /// Write `words` to SRAM page 0 and play them, once or in a loop.
    pub async fn run_sram(&self, words: &[u32], looping: bool, block_delay: u8) -> Result<()> {
        if words.len() > self.build.sram_len {
            return Err(Error::Argument(format!(
                "{} SRAM words exceed SRAM length {}",
                words.len(),
                self.build.sram_len
            )));
        }
        self.test_mode(async |dac| {
            dac.exchange(&RegisterPacket::ping()).await?;
            dac.write_sram(words, 0).await?;
            dac.start_sram(0, words.len(), looping, block_delay).await
        })
        .await
    }

    pub async fn run_serial(&self, op: u8, words: &[u32]) -> Result<Vec<u8>> {
        self.test_mode(async |dac| dac.serial(op, words).await).await
    }

    pub async fn run_i2c(&self, packets: &[Vec<u16>]) -> Result<Vec<u8>> {
        self.test_mode(async |dac| dac.i2c(packets).await).await
    }

    pub async fn set_clock_polarity(&self, channel: DacChannel, invert: bool) -> Result<bool> {
        self.test_mode(async |dac| dac.set_polarity(channel, invert).await)
            .await
    }
}
