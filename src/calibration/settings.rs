use crate::registry::Registry;
use crate::{Error, Result};

pub const SPECTRUM_ID_KEY: &str = "Spectrum Analyzer ID";
pub const GENERATOR_ID_KEY: &str = "Anritsu ID";
pub const GENERATOR_POWER_KEY: &str = "Anritsu Power";
pub const PULSE_CARRIER_FREQ_KEY: &str = "Pulse Carrier Frequency";
pub const SCOPE_ID_KEY: &str = "Scope ID";
pub const TIME_OFFSET_KEY: &str = "Timing Offset";
pub const IQ_WIRING_KEY: &str = "IQ Wiring";

/// Instrument assignment and constants for calibrating one board, stored
/// under `["", <session>, <board>]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSettings {
    pub session: String,
    pub board: String,
    pub spectrum_id: String,
    pub generator_id: String,
    /// dBm
    pub generator_power: f64,
    /// GHz
    pub pulse_carrier_freq: Option<f64>,
    pub scope_id: Option<String>,
    /// ns
    pub time_offset: Option<f64>,
    pub iq_wiring: Option<String>,
}

impl CalibrationSettings {
    pub async fn load(registry: &impl Registry, session: &str, board: &str) -> Result<Self> {
        let path = ["", session, board];
        let required = async |key: &str| {
            registry
                .get(&path, key)
                .await
                .map_err(|e| Error::Config(format!("{board}: {e}")))
        };
        let spectrum_id = required(SPECTRUM_ID_KEY).await?.as_str()?.to_string();
        let generator_id = required(GENERATOR_ID_KEY).await?.as_str()?.to_string();
        let generator_power = required(GENERATOR_POWER_KEY).await?.as_float()?;

        let pulse_carrier_freq = match registry.get(&path, PULSE_CARRIER_FREQ_KEY).await {
            Ok(v) => Some(v.as_float()?),
            Err(_) => None,
        };
        let scope_id = match registry.get(&path, SCOPE_ID_KEY).await {
            Ok(v) => Some(v.as_str()?.to_string()),
            Err(_) => None,
        };
        let time_offset = match registry.get(&path, TIME_OFFSET_KEY).await {
            Ok(v) => Some(v.as_float()?),
            Err(_) => None,
        };
        let iq_wiring = match registry.get(&path, IQ_WIRING_KEY).await {
            Ok(v) => Some(v.as_str()?.to_string()),
            Err(_) => None,
        };

        Ok(Self {
            session: session.to_string(),
            board: board.to_string(),
            spectrum_id,
            generator_id,
            generator_power,
            pulse_carrier_freq,
            scope_id,
            time_offset,
            iq_wiring,
        })
    }

    /// Data vault directory of this board's calibration datasets.
    pub fn path(&self) -> Vec<String> {
        vec![String::new(), self.session.clone(), self.board.clone()]
    }

    fn missing(&self, key: &str) -> Error {
        Error::Config(format!("{}: no {key} configured", self.board))
    }

    pub fn pulse_carrier_freq(&self) -> Result<f64> {
        self.pulse_carrier_freq
            .ok_or_else(|| self.missing(PULSE_CARRIER_FREQ_KEY))
    }

    pub fn time_offset(&self) -> Result<f64> {
        self.time_offset.ok_or_else(|| self.missing(TIME_OFFSET_KEY))
    }

    pub fn iq_wiring(&self) -> Result<&str> {
        self.iq_wiring
            .as_deref()
            .ok_or_else(|| self.missing(IQ_WIRING_KEY))
    }
}

/// Frequency ranges of the carrier scans, in GHz.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanParameters {
    pub carrier_min: f64,
    pub carrier_max: f64,
    pub carrier_step: f64,
    pub sideband_carrier_step: f64,
    pub sideband_freq_step: f64,
    pub sideband_freq_count: usize,
}

impl ScanParameters {
    /// Read `carrierMin`, `carrierMax`, `carrierStep`, `sidebandCarrierStep`,
    /// `sidebandFreqStep` and `sidebandFreqCount` from `path`.
    pub async fn load(registry: &impl Registry, path: &[&str]) -> Result<Self> {
        let get = async |key: &str| {
            registry
                .get(path, key)
                .await
                .map_err(|e| Error::Config(e.to_string()))
        };
        let count = get("sidebandFreqCount").await?.as_int()?;
        let params = Self {
            carrier_min: get("carrierMin").await?.as_float()?,
            carrier_max: get("carrierMax").await?.as_float()?,
            carrier_step: get("carrierStep").await?.as_float()?,
            sideband_carrier_step: get("sidebandCarrierStep").await?.as_float()?,
            sideband_freq_step: get("sidebandFreqStep").await?.as_float()?,
            sideband_freq_count: usize::try_from(count)
                .map_err(|_| Error::Config(format!("sidebandFreqCount {count} is negative")))?,
        };
        params.validate()?;
        Ok(params)
    }

    /// Steps must be positive for the scans to terminate.
    pub fn validate(&self) -> Result<()> {
        if self.carrier_step <= 0.0 || self.sideband_carrier_step <= 0.0 {
            return Err(Error::Config(format!(
                "carrier steps must be positive: {} / {}",
                self.carrier_step, self.sideband_carrier_step
            )));
        }
        Ok(())
    }
}
