use crate::board::DacBoard;
use crate::calibration::{
    CalibrationSettings, SRAM_TRIGGER, SignalGenerator, SpectrumAnalyzer, make_sample, min_pos,
};
use crate::link::BoardLink;
use crate::{Error, Result};

/// Observed period of the zero measurement waveform, in samples.
const ZERO_SRAM_LEN: usize = 64;
const INITIAL_PRECISION: i32 = 0x800;
/// Halving 0x800 reaches zero after twelve iterations.
pub const ZERO_MAX_ITERATIONS: u32 = 12;

/// Play the constant sample `(a, b)` and read the power at the analyzer's
/// center frequency, in mW.
pub async fn measure_power<L: BoardLink>(
    board: &DacBoard<L>,
    spectrum: &mut impl SpectrumAnalyzer,
    a: i32,
    b: i32,
) -> Result<f64> {
    let mut sram = vec![make_sample(a, b); ZERO_SRAM_LEN];
    sram[0] |= SRAM_TRIGGER;
    board.run_sram(&sram, true, 0).await?;
    Ok(spectrum.read_mean_power().await?)
}

/// Find the DAC A and B offsets minimizing carrier leakage at `freq` GHz.
pub async fn zero<L: BoardLink>(
    board: &DacBoard<L>,
    spectrum: &mut impl SpectrumAnalyzer,
    generator: &mut impl SignalGenerator,
    freq: f64,
) -> Result<(i32, i32)> {
    generator.set_frequency(freq).await?;
    spectrum.set_center_frequency(freq).await?;
    log::info!("calibrating zeros at {freq} GHz");

    let (mut a, mut b) = (0, 0);
    let mut precision = INITIAL_PRECISION;
    let mut iterations = 0;
    while precision > 0 {
        if iterations == ZERO_MAX_ITERATIONS {
            return Err(Error::CalibrationDivergence { iterations });
        }
        iterations += 1;

        let left = measure_power(board, spectrum, a - precision, b).await?;
        let right = measure_power(board, spectrum, a + precision, b).await?;
        let center = measure_power(board, spectrum, a, b).await?;
        let corr_a = (precision as f64 * min_pos(left, center, right)).round() as i32;
        a += corr_a;

        let left = measure_power(board, spectrum, a, b - precision).await?;
        let right = measure_power(board, spectrum, a, b + precision).await?;
        let center = measure_power(board, spectrum, a, b).await?;
        let corr_b = (precision as f64 * min_pos(left, center, right)).round() as i32;
        b += corr_b;

        // Never search further than twice the last correction.
        precision = (precision / 2).min(2 * corr_a.abs().max(corr_b.abs()));
        log::info!(
            "a = {a:4} b = {b:4} uncertainty: {precision:4}, power {:6.1} dBm",
            10.0 * center.log10()
        );
    }
    Ok((a, b))
}

/// Zero calibration at the configured pulse carrier frequency.
pub async fn zero_fixed_carrier<L: BoardLink>(
    board: &DacBoard<L>,
    spectrum: &mut impl SpectrumAnalyzer,
    generator: &mut impl SignalGenerator,
    settings: &CalibrationSettings,
) -> Result<(i32, i32)> {
    let freq = settings.pulse_carrier_freq()?;
    spectrum.init().await?;
    generator.set_amplitude(settings.generator_power).await?;
    generator.set_output_enabled(true).await?;

    let zeros = zero(board, spectrum, generator, freq).await?;

    generator.set_output_enabled(false).await?;
    spectrum.deinit().await?;
    Ok(zeros)
}
