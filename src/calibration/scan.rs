use crate::Result;
use crate::board::DacBoard;
use crate::calibration::settings::GENERATOR_POWER_KEY;
use crate::calibration::{
    CalibrationSettings, Column, DataVault, DatasetId, IqCorrector, ScanParameters,
    SignalGenerator, SpectrumAnalyzer, format_value, sideband, valid_sb_step, zero,
};
use crate::link::BoardLink;
use crate::registry::RegistryValue;

pub const ZERO_DATASET: &str = "zero";
pub const SIDEBAND_DATASET: &str = "IQ";

/// Carrier frequencies from `min` to `max` inclusive, tolerating rounding
/// of the accumulated steps.
fn carrier_frequencies(min: f64, max: f64, step: f64) -> impl Iterator<Item = f64> {
    std::iter::successors(Some(min), move |f| Some(f + step))
        .take_while(move |f| *f < max + 0.001 * step)
}

/// `count` evenly spaced sideband frequencies (GHz) centered on zero.
pub fn sideband_frequencies(step: f64, count: usize) -> Vec<f64> {
    let step = valid_sb_step(step);
    let center = (count as f64 - 1.0) * 0.5;
    (0..count).map(|k| (k as f64 - center) * step).collect()
}

/// Measure the DAC zeros over the carrier range and log them to a new
/// dataset. Returns the dataset number.
pub async fn zero_scan_carrier<L: BoardLink>(
    board: &DacBoard<L>,
    spectrum: &mut impl SpectrumAnalyzer,
    generator: &mut impl SignalGenerator,
    vault: &mut impl DataVault,
    settings: &CalibrationSettings,
    scan: &ScanParameters,
) -> Result<DatasetId> {
    scan.validate()?;
    spectrum.init().await?;
    generator.set_amplitude(settings.generator_power).await?;
    generator.set_output_enabled(true).await?;
    log::info!(
        "zero calibration from {} GHz to {} GHz in steps of {} GHz",
        scan.carrier_min,
        scan.carrier_max,
        scan.carrier_step
    );

    let dataset = vault
        .new_dataset(
            &settings.path(),
            ZERO_DATASET,
            &[Column::new("Frequency", "", "GHz")],
            &[
                Column::new("DAC zero", "A", "clics"),
                Column::new("DAC zero", "B", "clics"),
            ],
        )
        .await?;
    vault
        .add_parameter(
            dataset,
            GENERATOR_POWER_KEY,
            RegistryValue::Float(settings.generator_power),
        )
        .await?;

    for freq in carrier_frequencies(scan.carrier_min, scan.carrier_max, scan.carrier_step) {
        let (a, b) = zero(board, spectrum, generator, freq).await?;
        vault.add_row(dataset, &[freq, a as f64, b as f64]).await?;
    }

    generator.set_output_enabled(false).await?;
    spectrum.deinit().await?;
    Ok(dataset)
}

/// Measure the sideband compensation over the carrier range, for a set of
/// sideband frequencies at each carrier. Returns the dataset number.
pub async fn sideband_scan_carrier<L: BoardLink>(
    board: &DacBoard<L>,
    spectrum: &mut impl SpectrumAnalyzer,
    generator: &mut impl SignalGenerator,
    corrector: &mut impl IqCorrector,
    vault: &mut impl DataVault,
    settings: &CalibrationSettings,
    scan: &ScanParameters,
) -> Result<DatasetId> {
    scan.validate()?;
    spectrum.init().await?;
    generator.set_amplitude(settings.generator_power).await?;
    generator.set_output_enabled(true).await?;
    log::info!(
        "sideband calibration from {} GHz to {} GHz in steps of {} GHz",
        scan.carrier_min,
        scan.carrier_max,
        scan.sideband_carrier_step
    );

    let sideband_freqs = sideband_frequencies(scan.sideband_freq_step, scan.sideband_freq_count);
    let dependents: Vec<Column> = sideband_freqs
        .iter()
        .flat_map(|f| {
            let mhz = format_value(f * 1e3);
            [
                Column::new("relative compensation", &format!("Q at f_SB = {mhz} MHz"), ""),
                Column::new("relative compensation", &format!("I at f_SB = {mhz} MHz"), ""),
            ]
        })
        .collect();
    let dataset = vault
        .new_dataset(
            &settings.path(),
            SIDEBAND_DATASET,
            &[Column::new("Frequency", "", "GHz")],
            &dependents,
        )
        .await?;
    vault
        .add_parameter(
            dataset,
            GENERATOR_POWER_KEY,
            RegistryValue::Float(settings.generator_power),
        )
        .await?;
    vault
        .add_parameter(
            dataset,
            "Sideband frequency step",
            RegistryValue::Float(scan.sideband_freq_step * 1e3),
        )
        .await?;
    vault
        .add_parameter(
            dataset,
            "Number of sideband frequencies",
            RegistryValue::Int(scan.sideband_freq_count as i64),
        )
        .await?;

    for freq in carrier_frequencies(
        scan.carrier_min,
        scan.carrier_max,
        scan.sideband_carrier_step,
    ) {
        log::info!("carrier frequency: {freq} GHz");
        let mut row = Vec::with_capacity(1 + 2 * sideband_freqs.len());
        row.push(freq);
        for sideband_freq in &sideband_freqs {
            log::debug!("sideband frequency: {sideband_freq} GHz");
            let comp = sideband(board, spectrum, generator, corrector, freq, *sideband_freq).await?;
            row.extend([comp.re, comp.im]);
        }
        vault.add_row(dataset, &row).await?;
    }

    generator.set_output_enabled(false).await?;
    spectrum.deinit().await?;
    Ok(dataset)
}
