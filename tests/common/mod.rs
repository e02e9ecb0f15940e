#![allow(dead_code)]
// This module has been created using mod.rs in a subfolder, instead of just creating a common.rs under tests
// This is due to the test runner then not searching for runnable tests in mod.rs
// https://doc.rust-lang.org/rust-by-example/testing/integration_testing.html

use anyhow::bail;
use libghzdac_rs::board::dac::bist_checksum;
use libghzdac_rs::board::{AdcBoard, DacBoard};
use libghzdac_rs::calibration::{
    Column, DataVault, DatasetId, IqCorrector, SamplingScope, ScopeSetup, ScopeTrace,
    SignalGenerator, SpectrumAnalyzer,
};
use libghzdac_rs::link::BoardLink;
use libghzdac_rs::registry::RegistryValue;
use libghzdac_rs::{
    BoardParameters, BuildParameters, MEM_WRITE_PACKET_LEN, READBACK_LEN, REG_PACKET_LEN,
    SRAM_WRITE_PACKET_LEN,
};
use ghzdac_packet::{RegisterField, RegisterPacket};
use num_complex::Complex64;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub fn logging_init(module: &str) {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Error)
        .filter_module(module, log::LevelFilter::Trace)
        .filter_module("libghzdac_rs", log::LevelFilter::Trace)
        .try_init();
}

pub const FIRMWARE_BUILD: u8 = 7;
/// MSD/MHD delay steps below this read a valid LVDS check bit.
pub const LVDS_WINDOW: u32 = 6;
/// The FIFO counter reaches the target only at this PHOF with inverted clock.
pub const GOOD_PHOF: u32 = 2;

pub fn build_parameters() -> BuildParameters {
    BuildParameters::new(18432, 9216, 1024, 16384, 2048, 256).unwrap()
}

pub fn board_parameters() -> BoardParameters {
    BoardParameters {
        fifo_counter: Some(3),
        lvds_sd: Some(2),
    }
}

/// Decode a 14 bit two's complement DAC sample.
pub fn sample(word: u32, shift: u32) -> i32 {
    let raw = ((word >> shift) & 0x3FFF) as i32;
    if raw >= 0x2000 { raw - 0x4000 } else { raw }
}

/// State of a simulated DAC board, shared between the link handed to the
/// session and the test.
#[derive(Debug)]
pub struct SimBoard {
    pub mac: Option<String>,
    /// Every frame written by the host, in order.
    pub frames: Vec<Vec<u8>>,
    /// Frames waiting to be read by the host.
    pub pending: VecDeque<Vec<u8>>,
    pub sram: Vec<u32>,
    pub memory: [Vec<u32>; 2],
    /// `(mode, start, end)` of every SRAM start command.
    pub sram_runs: Vec<(u8, u32, u32)>,
    /// Copy of the words played by every SRAM start command.
    pub waveforms: Vec<Vec<u32>>,
    pub polarity: [bool; 2],
    pub pll_unlocked: bool,
    pub pll_resets: u32,
    pub fifo_target: u8,
    /// Number of coming BIST runs reporting a wrong checksum.
    pub bist_failures: u32,
    /// Report the BIST lanes swapped, as some DAC revisions do.
    pub swap_bist_lanes: bool,
    /// Never answer register readbacks.
    pub silent: bool,
    /// Refuse every write.
    pub broken: bool,
    lvds: [(u32, u32); 2],
    phof: [u32; 2],
    bist_select: [u32; 2],
    bist_corrupt: [bool; 2],
}

impl SimBoard {
    pub fn new() -> Self {
        Self {
            mac: None,
            frames: Vec::new(),
            pending: VecDeque::new(),
            sram: vec![0; 18432],
            memory: [Vec::new(), Vec::new()],
            sram_runs: Vec::new(),
            waveforms: Vec::new(),
            polarity: [false; 2],
            pll_unlocked: true,
            pll_resets: 0,
            fifo_target: 3,
            bist_failures: 0,
            swap_bist_lanes: false,
            silent: false,
            broken: false,
            lvds: [(0, 0); 2],
            phof: [0; 2],
            bist_select: [0; 2],
            bist_corrupt: [false; 2],
        }
    }

    /// Register packets written so far.
    pub fn registers(&self) -> Vec<RegisterPacket> {
        self.frames
            .iter()
            .filter(|f| f.len() == REG_PACKET_LEN)
            .map(|f| RegisterPacket::try_from(f.clone()).unwrap())
            .collect()
    }

    /// SRAM words played by the last SRAM start command.
    pub fn played(&self) -> &[u32] {
        match self.sram_runs.last() {
            Some((_, start, end)) => self
                .sram
                .get(*start as usize..=*end as usize)
                .unwrap_or(&[]),
            None => &[],
        }
    }

    fn serial(&mut self, op: u32, word: u32) -> u8 {
        if !(2..=3).contains(&op) {
            return 0;
        }
        let ch = (op - 2) as usize;
        match word {
            0x8500 => {
                let (msd, mhd) = self.lvds[ch];
                (msd < LVDS_WINDOW && mhd < LVDS_WINDOW) as u8
            }
            0x8700 => {
                let counter = if self.polarity[ch] && self.phof[ch] == GOOD_PHOF {
                    self.fifo_target
                } else {
                    (self.fifo_target + 1) & 0xF
                };
                counter << 4
            }
            0x1107 => {
                self.bist_corrupt[ch] = self.bist_failures > 0;
                self.bist_failures = self.bist_failures.saturating_sub(1);
                0
            }
            0x9200..=0x9500 if word & 0xFF == 0 => {
                let shift = if ch == 0 { 0 } else { 14 };
                let samples: Vec<u32> = self
                    .played()
                    .iter()
                    .map(|w| (w >> shift) & 0x3FFF)
                    .collect();
                let mut checksum = bist_checksum(&samples);
                if self.swap_bist_lanes {
                    checksum.swap(0, 1);
                }
                if self.bist_corrupt[ch] {
                    checksum[0] ^= 1;
                }
                let value = match self.bist_select[ch] {
                    0x2 | 0xA => checksum[0],
                    _ => checksum[1],
                };
                (value >> (8 * (0x95 - (word >> 8)))) as u8
            }
            w if w & 0xFF00 == 0x0400 => {
                self.lvds[ch] = ((w >> 4) & 0xF, w & 0xF);
                0
            }
            w if w & 0xFF00 == 0x0700 => {
                self.phof[ch] = w & 0x3;
                0
            }
            w if w & 0xFF0F == 0x1106 && w != 0x1106 => {
                self.bist_select[ch] = (w >> 4) & 0xF;
                0
            }
            _ => 0,
        }
    }

    fn register(&mut self, pkt: RegisterPacket) {
        let control = pkt.field(RegisterField::Control);
        if control & 0x80 != 0 {
            self.pll_unlocked = false;
            self.pll_resets += 1;
        }
        if control & 0x10 != 0 {
            self.polarity[0] = control & 0x1 != 0;
        }
        if control & 0x20 != 0 {
            self.polarity[1] = control & 0x2 != 0;
        }
        if matches!(
            pkt.mode(),
            RegisterPacket::MODE_SRAM_LOOP | RegisterPacket::MODE_SRAM_SINGLE
        ) {
            self.sram_runs.push((
                pkt.mode(),
                pkt.field(RegisterField::StartAddr),
                pkt.field(RegisterField::EndAddr),
            ));
            let waveform = self.played().to_vec();
            self.waveforms.push(waveform);
        }
        let echo = self.serial(
            pkt.field(RegisterField::SerialOp),
            pkt.field(RegisterField::SerialData),
        );

        if !pkt.expects_readback() || self.silent {
            return;
        }
        let mut answer = vec![0u8; READBACK_LEN];
        answer[51] = FIRMWARE_BUILD;
        answer[56] = echo;
        answer[58] = if self.pll_unlocked { 0x80 } else { 0 };
        if pkt.readback() == RegisterPacket::READBACK_I2C {
            let data = pkt.i2c_data();
            answer[61] = pkt.field(RegisterField::I2cAckMask) as u8;
            let read_mask = pkt.field(RegisterField::I2cReadMask);
            // Read bytes come from the addressed chip, the rest echo the data.
            for (k, byte) in data.iter().enumerate() {
                answer[61 + data.len() - k] = if read_mask & (0x80 >> k) != 0 {
                    0xA0 + k as u8
                } else {
                    *byte
                };
            }
        }
        self.pending.push_back(answer);
    }

    fn write(&mut self, frame: &[u8]) -> anyhow::Result<()> {
        if self.broken {
            bail!("link down");
        }
        self.frames.push(frame.to_vec());
        match frame.len() {
            REG_PACKET_LEN => self.register(RegisterPacket::try_from(frame.to_vec())?),
            SRAM_WRITE_PACKET_LEN => {
                let derp = u16::from_le_bytes([frame[0], frame[1]]) as usize;
                for (i, word) in frame[2..].chunks(4).enumerate() {
                    self.sram[derp * 256 + i] =
                        u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                }
            }
            MEM_WRITE_PACKET_LEN => {
                let page = frame[0] as usize & 1;
                self.memory[page] = frame[1..]
                    .chunks(3)
                    .map(|w| u32::from_le_bytes([w[0], w[1], w[2], 0]))
                    .collect();
            }
            len => bail!("unexpected frame length {len}"),
        }
        Ok(())
    }
}

pub type SharedSim = Arc<Mutex<SimBoard>>;

pub struct SimLink {
    sim: SharedSim,
}

impl SimLink {
    pub fn new(sim: &SharedSim) -> Self {
        Self { sim: sim.clone() }
    }
}

impl BoardLink for SimLink {
    async fn listen(&mut self, mac: &str) -> anyhow::Result<()> {
        self.sim.lock().unwrap().mac = Some(mac.to_string());
        Ok(())
    }

    async fn write(&mut self, frame: &[u8]) -> anyhow::Result<()> {
        self.sim.lock().unwrap().write(frame)
    }

    async fn read(&mut self) -> anyhow::Result<Vec<u8>> {
        let frame = self.sim.lock().unwrap().pending.pop_front();
        match frame {
            Some(frame) => Ok(frame),
            None => {
                std::future::pending::<()>().await;
                bail!("link closed")
            }
        }
    }

    async fn collect(&mut self, count: usize) -> anyhow::Result<()> {
        let buffered = self.sim.lock().unwrap().pending.len();
        if buffered < count {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn discard(&mut self, count: usize) -> anyhow::Result<()> {
        let mut sim = self.sim.lock().unwrap();
        let count = count.min(sim.pending.len());
        sim.pending.drain(..count);
        Ok(())
    }

    async fn clear(&mut self) -> anyhow::Result<()> {
        self.sim.lock().unwrap().pending.clear();
        Ok(())
    }
}

/// A session with a fresh simulated board.
pub async fn sim_dac(name: &str, board: u8) -> (DacBoard<SimLink>, SharedSim) {
    let sim = Arc::new(Mutex::new(SimBoard::new()));
    let dac = DacBoard::from_parts(
        SimLink::new(&sim),
        name,
        board,
        FIRMWARE_BUILD as u32,
        Arc::new(build_parameters()),
        board_parameters(),
    )
    .await
    .unwrap();
    (dac, sim)
}

pub struct MockAdc {
    pub name: String,
    pub pass: bool,
}

impl AdcBoard for MockAdc {
    fn name(&self) -> &str {
        &self.name
    }

    async fn self_test(&self) -> anyhow::Result<bool> {
        Ok(self.pass)
    }
}

/// Spectrum analyzer reading its power from a model of the setup.
pub struct ModelSpectrum<F: FnMut() -> f64> {
    model: F,
    pub centers: Vec<f64>,
    pub active: bool,
    pub reads: usize,
}

impl<F: FnMut() -> f64> ModelSpectrum<F> {
    pub fn new(model: F) -> Self {
        Self {
            model,
            centers: Vec::new(),
            active: false,
            reads: 0,
        }
    }
}

impl<F: FnMut() -> f64> SpectrumAnalyzer for ModelSpectrum<F> {
    async fn init(&mut self) -> anyhow::Result<()> {
        self.active = true;
        Ok(())
    }

    async fn deinit(&mut self) -> anyhow::Result<()> {
        self.active = false;
        Ok(())
    }

    async fn set_center_frequency(&mut self, ghz: f64) -> anyhow::Result<()> {
        self.centers.push(ghz);
        Ok(())
    }

    async fn read_mean_power(&mut self) -> anyhow::Result<f64> {
        self.reads += 1;
        Ok((self.model)())
    }
}

/// Carrier leakage of the simulated board: quadratic around `(a0, b0)` in
/// the sample played last.
pub fn leakage_model(sim: &SharedSim, a0: i32, b0: i32) -> impl FnMut() -> f64 + use<> {
    let sim = sim.clone();
    move || {
        let word = sim.lock().unwrap().played()[1];
        let (a, b) = (sample(word, 0), sample(word, 14));
        let (da, db) = ((a - a0) as f64, (b - b0) as f64);
        da * da + db * db + 1.0
    }
}

#[derive(Debug, Default)]
pub struct RecordingGenerator {
    pub frequencies: Vec<f64>,
    pub amplitude: Option<f64>,
    pub output: bool,
    pub output_changes: Vec<bool>,
}

impl SignalGenerator for RecordingGenerator {
    async fn set_frequency(&mut self, ghz: f64) -> anyhow::Result<()> {
        self.frequencies.push(ghz);
        Ok(())
    }

    async fn set_amplitude(&mut self, dbm: f64) -> anyhow::Result<()> {
        self.amplitude = Some(dbm);
        Ok(())
    }

    async fn set_output_enabled(&mut self, enabled: bool) -> anyhow::Result<()> {
        self.output = enabled;
        self.output_changes.push(enabled);
        Ok(())
    }
}

/// Corrector recovering the compensation from the first signal sample and
/// publishing it for the spectrum model.
pub struct ModelCorrector {
    pub reserve: f64,
    pub compensation: Arc<Mutex<Complex64>>,
    pub reserves_used: Vec<f64>,
}

impl ModelCorrector {
    pub fn new(reserve: f64) -> Self {
        Self {
            reserve,
            compensation: Arc::new(Mutex::new(Complex64::new(0.0, 0.0))),
            reserves_used: Vec::new(),
        }
    }
}

impl IqCorrector for ModelCorrector {
    fn dynamic_reserve(&self) -> f64 {
        self.reserve
    }

    fn set_dynamic_reserve(&mut self, reserve: f64) {
        self.reserve = reserve;
    }

    fn dacify(
        &mut self,
        _carrier_ghz: f64,
        signal: &[Complex64],
        _looping: bool,
        _iq_correction: bool,
        _rescale: bool,
    ) -> anyhow::Result<Vec<u32>> {
        self.reserves_used.push(self.reserve);
        *self.compensation.lock().unwrap() = 2.0 * signal[0] - 1.0;
        Ok(vec![0; signal.len()])
    }

    fn last_rescale_factor(&self) -> f64 {
        1.0
    }
}

/// Opposite sideband power: quadratic around `target` in the compensation.
pub fn sideband_model(
    compensation: &Arc<Mutex<Complex64>>,
    target: Complex64,
) -> impl FnMut() -> f64 + use<> {
    let compensation = compensation.clone();
    move || (*compensation.lock().unwrap() - target).norm_sqr() + 1e-6
}

#[derive(Debug, Default)]
pub struct ScriptedScope {
    pub setups: Vec<ScopeSetup>,
    pub traces: VecDeque<ScopeTrace>,
}

impl ScriptedScope {
    /// Trace of `len` samples spaced by `step` s with a single peak.
    pub fn push_pulse(&mut self, len: usize, step: f64, peak: usize) {
        self.traces.push_back(ScopeTrace {
            times: (0..len).map(|i| 20e-9 + step * i as f64).collect(),
            volts: (0..len).map(|i| if i == peak { 0.25 } else { 0.0 }).collect(),
        });
    }
}

impl SamplingScope for ScriptedScope {
    async fn configure(&mut self, setup: &ScopeSetup) -> anyhow::Result<()> {
        self.setups.push(*setup);
        Ok(())
    }

    async fn get_trace(
        &mut self,
        _channel: u8,
        _record_length: usize,
        _averages: u32,
    ) -> anyhow::Result<ScopeTrace> {
        match self.traces.pop_front() {
            Some(trace) => Ok(trace),
            None => bail!("no trace armed"),
        }
    }
}

#[derive(Debug, Default)]
pub struct Dataset {
    pub path: Vec<String>,
    pub name: String,
    pub independents: Vec<Column>,
    pub dependents: Vec<Column>,
    pub parameters: Vec<(String, RegistryValue)>,
    pub rows: Vec<Vec<f64>>,
}

impl Dataset {
    pub fn parameter(&self, key: &str) -> Option<&RegistryValue> {
        self.parameters.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

#[derive(Debug, Default)]
pub struct MemoryVault {
    pub datasets: Vec<Dataset>,
}

impl MemoryVault {
    pub fn dataset(&self, id: DatasetId) -> &Dataset {
        &self.datasets[id as usize - 1]
    }
}

impl DataVault for MemoryVault {
    async fn new_dataset(
        &mut self,
        path: &[String],
        name: &str,
        independents: &[Column],
        dependents: &[Column],
    ) -> anyhow::Result<DatasetId> {
        self.datasets.push(Dataset {
            path: path.to_vec(),
            name: name.to_string(),
            independents: independents.to_vec(),
            dependents: dependents.to_vec(),
            ..Default::default()
        });
        Ok(self.datasets.len() as DatasetId)
    }

    async fn add_row(&mut self, dataset: DatasetId, row: &[f64]) -> anyhow::Result<()> {
        let Some(set) = self.datasets.get_mut(dataset as usize - 1) else {
            bail!("no dataset {dataset}");
        };
        if row.len() != set.independents.len() + set.dependents.len() {
            bail!("row of {} values for dataset {dataset}", row.len());
        }
        set.rows.push(row.to_vec());
        Ok(())
    }

    async fn add_parameter(
        &mut self,
        dataset: DatasetId,
        key: &str,
        value: RegistryValue,
    ) -> anyhow::Result<()> {
        let Some(set) = self.datasets.get_mut(dataset as usize - 1) else {
            bail!("no dataset {dataset}");
        };
        set.parameters.push((key.to_string(), value));
        Ok(())
    }
}
