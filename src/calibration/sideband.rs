use crate::board::DacBoard;
use crate::calibration::{
    IqCorrector, PERIOD, SRAM_TRIGGER, SignalGenerator, SpectrumAnalyzer, min_pos,
};
use crate::link::BoardLink;
use crate::{Error, Result};
use num_complex::Complex64;
use std::f64::consts::PI;
use std::ops::{Deref, DerefMut};

/// Dynamic reserve used while measuring sidebands.
pub const SIDEBAND_DYNAMIC_RESERVE: f64 = 4.0;
/// Sideband frequencies (GHz) below this are treated as DC.
pub const MIN_SIDEBAND_FREQ: f64 = 3e-5;
const TARGET_PRECISION: f64 = 1.0 / (1 << 14) as f64;
/// Halving 1.0 gets below 2^-14 after fourteen iterations.
pub const SIDEBAND_MAX_ITERATIONS: u32 = 14;

/// Sets the dynamic reserve of a corrector and puts the previous value back
/// when dropped.
pub struct DynamicReserveOverride<'a, C: IqCorrector> {
    corrector: &'a mut C,
    saved: f64,
}

impl<'a, C: IqCorrector> DynamicReserveOverride<'a, C> {
    pub fn new(corrector: &'a mut C, reserve: f64) -> Self {
        let saved = corrector.dynamic_reserve();
        corrector.set_dynamic_reserve(reserve);
        Self { corrector, saved }
    }
}

impl<C: IqCorrector> Deref for DynamicReserveOverride<'_, C> {
    type Target = C;
    fn deref(&self) -> &C {
        self.corrector
    }
}

impl<C: IqCorrector> DerefMut for DynamicReserveOverride<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.corrector
    }
}

impl<C: IqCorrector> Drop for DynamicReserveOverride<'_, C> {
    fn drop(&mut self) {
        self.corrector.set_dynamic_reserve(self.saved);
    }
}

/// Play a tone at `carrier + sideband` with `compensation` times the mirror
/// tone added, and return the power at `carrier - sideband` relative to the
/// corrector's rescaling.
pub async fn measure_opposite_sideband<L: BoardLink>(
    board: &DacBoard<L>,
    spectrum: &mut impl SpectrumAnalyzer,
    corrector: &mut impl IqCorrector,
    carrier: f64,
    sideband: f64,
    compensation: Complex64,
) -> Result<f64> {
    let signal: Vec<Complex64> = (0..PERIOD)
        .map(|t| {
            let arg = Complex64::new(0.0, -2.0 * PI * sideband * t as f64);
            0.5 * arg.exp() + 0.5 * compensation * (-arg).exp()
        })
        .collect();
    let mut sram = corrector.dacify(carrier, &signal, true, false, true)?;
    if let Some(first) = sram.first_mut() {
        *first |= SRAM_TRIGGER;
    }
    board.run_sram(&sram, true, 0).await?;
    Ok(spectrum.read_mean_power().await? / corrector.last_rescale_factor())
}

/// Find the compensation cancelling the unwanted sideband at
/// `carrier - sideband` when generating `carrier + sideband` (GHz).
///
/// The corrector's dynamic reserve is raised for the duration of the search
/// and restored on return, including on errors.
pub async fn sideband<L: BoardLink, C: IqCorrector>(
    board: &DacBoard<L>,
    spectrum: &mut impl SpectrumAnalyzer,
    generator: &mut impl SignalGenerator,
    corrector: &mut C,
    carrier: f64,
    sideband: f64,
) -> Result<Complex64> {
    let mut corrector = DynamicReserveOverride::new(corrector, SIDEBAND_DYNAMIC_RESERVE);
    if sideband.abs() < MIN_SIDEBAND_FREQ {
        return Ok(Complex64::new(0.0, 0.0));
    }
    generator.set_frequency(carrier).await?;
    spectrum.set_center_frequency(carrier - sideband).await?;

    let mut comp = Complex64::new(0.0, 0.0);
    let mut precision = 1.0;
    let mut iterations = 0;
    while precision > TARGET_PRECISION {
        if iterations == SIDEBAND_MAX_ITERATIONS {
            return Err(Error::CalibrationDivergence { iterations });
        }
        iterations += 1;

        // Real part first, then imaginary part.
        let mut largest: f64 = 0.0;
        let mut power = 0.0;
        for axis in [Complex64::new(1.0, 0.0), Complex64::i()] {
            let step = axis * precision;
            let left = measure_opposite_sideband(
                board, spectrum, &mut *corrector, carrier, sideband, comp - step,
            )
            .await?;
            let right = measure_opposite_sideband(
                board, spectrum, &mut *corrector, carrier, sideband, comp + step,
            )
            .await?;
            power = measure_opposite_sideband(
                board, spectrum, &mut *corrector, carrier, sideband, comp,
            )
            .await?;
            let corr = precision * min_pos(left, power, right);
            comp += axis * corr;
            largest = largest.max(corr.abs());
        }

        precision = (2.0 * largest).min(precision / 2.0);
        log::info!(
            "compensation: {:.4}{:+.4}j +- {precision:.4}, opposite sb: {:6.1} dBm",
            comp.re,
            comp.im,
            10.0 * power.log10()
        );
    }
    Ok(comp)
}
