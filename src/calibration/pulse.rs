use crate::board::DacBoard;
use crate::calibration::settings::{
    GENERATOR_POWER_KEY, IQ_WIRING_KEY, PULSE_CARRIER_FREQ_KEY, TIME_OFFSET_KEY,
};
use crate::calibration::{
    CalibrationSettings, Column, DAC_MAX, DAC_MIN, DataVault, DatasetId, PERIOD, SRAM_TRIGGER,
    SamplingScope, ScopeSetup, SignalGenerator, make_sample,
};
use crate::link::BoardLink;
use crate::registry::RegistryValue;
use crate::{Error, Result};
use anyhow::anyhow;
use ghzdac_globals::DacChannel;

pub const PULSE_DATASET: &str = "pulse";
/// Delay between the trigger sample and the scope trigger, in ns.
pub const TRIGGER_DELAY_NS: i64 = 30;
pub const AC_PULSE_HEIGHT: i32 = 0x1800;
/// Largest tolerated delay between the DAC A and DAC B pulses, in s.
pub const MAX_MISALIGNMENT: f64 = 0.5e-9;

const SCOPE_CHANNEL: u8 = 1;
const SCOPE_RECORD_LENGTH: usize = 8000;
const SCOPE_AVERAGES: u32 = 100;
const DC_PULSE_LEN: usize = 100;

/// Averaged scope response to a DAC pulse.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    /// Time of the first sample relative to the pulse, in s.
    pub start: f64,
    /// Sample spacing in s.
    pub step: f64,
    /// Voltages in V.
    pub samples: Vec<f64>,
}

impl ImpulseResponse {
    /// Sample times in ns.
    pub fn times_ns(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.samples.len()).map(|i| 1e9 * (self.start + self.step * i as f64))
    }

    /// Index of the sample furthest from the mean, if there are samples.
    pub fn peak_index(&self) -> Option<usize> {
        if self.samples.is_empty() {
            return None;
        }
        let mean = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        self.samples
            .iter()
            .map(|v| (v - mean).abs())
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
                Some((_, max)) if max >= d => best,
                _ => Some((i, d)),
            })
            .map(|(i, _)| i)
    }

    fn same_time_scale(&self, other: &Self) -> bool {
        self.start == other.start && self.step == other.step
    }
}

/// Outcome of [`calibrate_ac_pulse`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcPulseResult {
    pub dataset: DatasetId,
    /// Delay between the DAC A and DAC B pulse peaks, in s.
    pub misalignment: f64,
}

impl AcPulseResult {
    pub fn is_aligned(&self) -> bool {
        self.misalignment <= MAX_MISALIGNMENT
    }
}

fn scope_setup(horizontal_scale: f64, vertical_scale: f64) -> ScopeSetup {
    ScopeSetup {
        channel: SCOPE_CHANNEL,
        trigger_level: 0.3,
        horizontal_position: 30e-9,
        horizontal_scale,
        vertical_scale,
    }
}

/// Loop a [`PERIOD`] long waveform of `baseline` samples with `pulse_len`
/// samples of `pulse`, and record the averaged response on the scope.
///
/// `dac_offset_ns` is the delay of the DAC output relative to the trigger;
/// the pulse is placed that much earlier so it shows up at the trigger time.
pub async fn measure_impulse_response<L: BoardLink>(
    board: &DacBoard<L>,
    scope: &mut impl SamplingScope,
    baseline: u32,
    pulse: u32,
    dac_offset_ns: f64,
    pulse_len: usize,
) -> Result<ImpulseResponse> {
    let index = TRIGGER_DELAY_NS - dac_offset_ns.round() as i64;
    let index = usize::try_from(index)
        .ok()
        .filter(|i| i + pulse_len <= PERIOD)
        .ok_or_else(|| {
            Error::Argument(format!(
                "pulse of {pulse_len} samples at DAC offset {dac_offset_ns} ns does not fit in {PERIOD} samples"
            ))
        })?;

    let mut sram = vec![baseline; PERIOD];
    sram[index..index + pulse_len].fill(pulse);
    sram[0] |= SRAM_TRIGGER;
    board.run_sram(&sram, true, 0).await?;

    let trace = scope
        .get_trace(SCOPE_CHANNEL, SCOPE_RECORD_LENGTH, SCOPE_AVERAGES)
        .await?;
    if trace.times.len() < 2 || trace.volts.is_empty() {
        return Err(Error::Protocol(format!(
            "scope trace with {} time points is too short",
            trace.times.len()
        )));
    }
    Ok(ImpulseResponse {
        start: trace.times[0] - TRIGGER_DELAY_NS as f64 * 1e-9,
        step: trace.times[1] - trace.times[0],
        samples: trace.volts,
    })
}

/// Measure the pulse responses of DAC A and DAC B after the IQ mixer and
/// store them in a new dataset.
///
/// `baseline_a` and `baseline_b` are the DAC zeros at the pulse carrier
/// frequency. The output is set back to the baseline afterwards.
pub async fn calibrate_ac_pulse<L: BoardLink>(
    board: &DacBoard<L>,
    scope: &mut impl SamplingScope,
    generator: &mut impl SignalGenerator,
    vault: &mut impl DataVault,
    settings: &CalibrationSettings,
    baseline_a: i32,
    baseline_b: i32,
) -> Result<AcPulseResult> {
    let carrier = settings.pulse_carrier_freq()?;
    let offset = settings.time_offset()?;
    let wiring = settings.iq_wiring()?;

    generator.set_frequency(carrier).await?;
    generator.set_amplitude(settings.generator_power).await?;
    generator.set_output_enabled(true).await?;
    scope.configure(&scope_setup(2e-9, 20e-3)).await?;

    let baseline = make_sample(baseline_a, baseline_b);
    log::info!("{}: measuring pulse response of DAC A", settings.board);
    let pulse_a = make_sample(baseline_a + AC_PULSE_HEIGHT, baseline_b);
    let trace_a = measure_impulse_response(board, scope, baseline, pulse_a, offset, 1).await?;
    log::info!("{}: measuring pulse response of DAC B", settings.board);
    let pulse_b = make_sample(baseline_a, baseline_b + AC_PULSE_HEIGHT);
    let trace_b = measure_impulse_response(board, scope, baseline, pulse_b, offset, 1).await?;

    board.run_sram(&[baseline; 4], false, 0).await?;
    generator.set_output_enabled(false).await?;

    if !trace_a.same_time_scale(&trace_b) {
        return Err(anyhow!(
            "time scales of the DAC A and DAC B traces differ, scope settings changed during the measurement"
        )
        .into());
    }

    let dataset = vault
        .new_dataset(
            &settings.path(),
            PULSE_DATASET,
            &[Column::new("Time", "", "ns")],
            &[Column::new("Voltage", "A", "V"), Column::new("Voltage", "B", "V")],
        )
        .await?;
    vault
        .add_parameter(dataset, IQ_WIRING_KEY, RegistryValue::Str(wiring.to_string()))
        .await?;
    vault
        .add_parameter(dataset, PULSE_CARRIER_FREQ_KEY, RegistryValue::Float(carrier))
        .await?;
    vault
        .add_parameter(
            dataset,
            GENERATOR_POWER_KEY,
            RegistryValue::Float(settings.generator_power),
        )
        .await?;
    vault
        .add_parameter(dataset, TIME_OFFSET_KEY, RegistryValue::Float(offset))
        .await?;
    for ((t, a), b) in trace_a
        .times_ns()
        .zip(&trace_a.samples)
        .zip(&trace_b.samples)
    {
        vault.add_row(dataset, &[t, *a, *b]).await?;
    }

    let misalignment = match (trace_a.peak_index(), trace_b.peak_index()) {
        (Some(a), Some(b)) => a.abs_diff(b) as f64 * trace_a.step,
        _ => 0.0,
    };
    let result = AcPulseResult {
        dataset,
        misalignment,
    };
    if !result.is_aligned() {
        log::warn!(
            "{}: pulses from DAC A and B are {:.2} ns apart, sideband calibrations based on this \
             pulse calibration will be off; bring up the board and calibrate again",
            settings.board,
            misalignment * 1e9
        );
    }
    Ok(result)
}

/// Measure the step response of one DAC without the IQ mixer and store it in
/// a dataset named after the channel.
pub async fn calibrate_dc_pulse<L: BoardLink>(
    board: &DacBoard<L>,
    scope: &mut impl SamplingScope,
    vault: &mut impl DataVault,
    settings: &CalibrationSettings,
    channel: DacChannel,
) -> Result<DatasetId> {
    let offset = settings.time_offset()?;
    let (baseline, pulse) = match channel {
        DacChannel::A => (make_sample(DAC_MIN, 0), make_sample(DAC_MAX, 0)),
        DacChannel::B => (make_sample(0, DAC_MIN), make_sample(0, DAC_MAX)),
    };
    scope.configure(&scope_setup(5e-9, 100e-3)).await?;

    log::info!("{}: measuring step response of DAC {channel}", settings.board);
    let trace =
        measure_impulse_response(board, scope, baseline, pulse, offset, DC_PULSE_LEN).await?;
    // Leave the output at zero before the cable goes back to the fridge.
    board.run_sram(&[make_sample(0, 0); 4], false, 0).await?;

    let dataset = vault
        .new_dataset(
            &settings.path(),
            &format!("DAC {channel}"),
            &[Column::new("Time", "", "ns")],
            &[Column::new("Voltage", "", "V")],
        )
        .await?;
    vault
        .add_parameter(dataset, TIME_OFFSET_KEY, RegistryValue::Float(offset))
        .await?;
    for (t, v) in trace.times_ns().zip(&trace.samples) {
        vault.add_row(dataset, &[t, *v]).await?;
    }
    Ok(dataset)
}
