//! Measurement-in-the-loop calibration of DAC zeros, sideband mixing and
//! pulse timing.
//!
//! Every routine drives a [`DacBoard`](crate::board::DacBoard) and one or
//! more instruments. Instruments and the data vault are reached through the
//! traits below; their errors are reported as [`crate::Error::Instrument`].

pub mod pulse;
pub mod scan;
pub mod settings;
pub mod sideband;
pub mod zero;

pub use pulse::{
    AcPulseResult, ImpulseResponse, calibrate_ac_pulse, calibrate_dc_pulse,
    measure_impulse_response,
};
pub use scan::{sideband_frequencies, sideband_scan_carrier, zero_scan_carrier};
pub use settings::{CalibrationSettings, ScanParameters};
pub use sideband::{DynamicReserveOverride, measure_opposite_sideband, sideband};
pub use zero::{measure_power, zero, zero_fixed_carrier};

use crate::registry::RegistryValue;
use num_complex::Complex64;
use std::f64::consts::PI;

/// Trigger bits S0..S3 of an SRAM word. Set on the first sample of a
/// calibration waveform so instruments can trigger on it.
pub const SRAM_TRIGGER: u32 = 0xF << 28;
/// Length in samples (ns) of the waveforms used for sideband and pulse
/// calibration.
pub const PERIOD: usize = 2000;
/// Largest and smallest value of a 14 bit DAC sample.
pub const DAC_MAX: i32 = 0x1FFF;
pub const DAC_MIN: i32 = -0x2000;

/// Spectrum analyzer reading the power at one frequency.
#[allow(async_fn_in_trait)]
pub trait SpectrumAnalyzer {
    /// Prepare the analyzer for zero span power readings.
    async fn init(&mut self) -> anyhow::Result<()>;
    /// Return the analyzer to continuous sweeping.
    async fn deinit(&mut self) -> anyhow::Result<()>;
    async fn set_center_frequency(&mut self, ghz: f64) -> anyhow::Result<()>;
    /// Mean power in mW.
    async fn read_mean_power(&mut self) -> anyhow::Result<f64>;
}

/// Microwave source driving the LO port of the IQ mixer.
#[allow(async_fn_in_trait)]
pub trait SignalGenerator {
    async fn set_frequency(&mut self, ghz: f64) -> anyhow::Result<()>;
    async fn set_amplitude(&mut self, dbm: f64) -> anyhow::Result<()>;
    async fn set_output_enabled(&mut self, enabled: bool) -> anyhow::Result<()>;
}

/// Horizontal, vertical and trigger settings of a sampling scope, in SI units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScopeSetup {
    pub channel: u8,
    pub trigger_level: f64,
    pub horizontal_position: f64,
    pub horizontal_scale: f64,
    pub vertical_scale: f64,
}

/// One averaged scope trace: sample times in s and voltages in V.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeTrace {
    pub times: Vec<f64>,
    pub volts: Vec<f64>,
}

#[allow(async_fn_in_trait)]
pub trait SamplingScope {
    async fn configure(&mut self, setup: &ScopeSetup) -> anyhow::Result<()>;
    async fn get_trace(
        &mut self,
        channel: u8,
        record_length: usize,
        averages: u32,
    ) -> anyhow::Result<ScopeTrace>;
}

/// Converts complex baseband signals to SRAM words, correcting for the
/// imperfections of the IQ mixer.
pub trait IqCorrector {
    /// Headroom kept free when rescaling signals to the DAC range.
    fn dynamic_reserve(&self) -> f64;
    fn set_dynamic_reserve(&mut self, reserve: f64);
    /// SRAM words producing `signal` around `carrier_ghz`.
    fn dacify(
        &mut self,
        carrier_ghz: f64,
        signal: &[Complex64],
        looping: bool,
        iq_correction: bool,
        rescale: bool,
    ) -> anyhow::Result<Vec<u32>>;
    /// Factor applied by the last rescaling [`IqCorrector::dacify`] call.
    fn last_rescale_factor(&self) -> f64;
}

/// Dataset number in the data vault.
pub type DatasetId = u32;

/// Axis or column of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub label: String,
    pub legend: String,
    pub unit: String,
}

impl Column {
    pub fn new(label: &str, legend: &str, unit: &str) -> Self {
        Self {
            label: label.to_string(),
            legend: legend.to_string(),
            unit: unit.to_string(),
        }
    }
}

/// Append-only store of calibration datasets.
#[allow(async_fn_in_trait)]
pub trait DataVault {
    async fn new_dataset(
        &mut self,
        path: &[String],
        name: &str,
        independents: &[Column],
        dependents: &[Column],
    ) -> anyhow::Result<DatasetId>;
    async fn add_row(&mut self, dataset: DatasetId, row: &[f64]) -> anyhow::Result<()>;
    async fn add_parameter(
        &mut self,
        dataset: DatasetId,
        key: &str,
        value: RegistryValue,
    ) -> anyhow::Result<()>;
}

/// Position of the minimum of the parabola through three equally spaced
/// points, in units of the spacing relative to the center point and bounded
/// by -1 and 1. Zero when the points have no minimum.
pub fn min_pos(left: f64, center: f64, right: f64) -> f64 {
    let curvature = left + right - 2.0 * center;
    if curvature <= 0.0 {
        return 0.0;
    }
    (0.5 * (left - right) / curvature).clamp(-1.0, 1.0)
}

/// SRAM word playing `a` on DAC A and `b` on DAC B.
pub fn make_sample(a: i32, b: i32) -> u32 {
    if a.max(b) > DAC_MAX || a.min(b) < DAC_MIN {
        log::warn!("DAC overflow: a = {a}, b = {b}");
    }
    ((a & 0x3FFF) as u32) | (((b & 0x3FFF) as u32) << 14)
}

/// Closest sideband frequency (GHz) with an even number of periods in
/// [`PERIOD`].
pub fn valid_sb_step(freq: f64) -> f64 {
    let period = PERIOD as f64;
    (0.5 * freq.clamp(2.0 / period, 1.0) * period).round() * 2.0 / period
}

/// Superposed sine waves of the given frequencies (GHz) on both DACs, with
/// the trigger on the first word.
pub fn sine_sram(freqs: &[f64], len: usize) -> Vec<u32> {
    let mut sram: Vec<u32> = (0..len)
        .map(|t| {
            let y: f64 = freqs.iter().map(|f| (2.0 * PI * t as f64 * f).sin()).sum();
            let sample = (DAC_MAX as f64 * y / freqs.len() as f64).round() as i32;
            (sample & 0x3FFF) as u32 * 0x4001
        })
        .collect();
    if let Some(first) = sram.first_mut() {
        *first = SRAM_TRIGGER;
    }
    sram
}

/// `%g`-like rendering used in dataset column names.
pub(crate) fn format_value(value: f64) -> String {
    let s = format!("{value:.6}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" { "0".to_string() } else { s.to_string() }
}
