use crate::board::dac::{BistReport, DacBoard, FifoReport, LvdsReport};
use crate::board::{AdcBoard, Device};
use crate::link::BoardLink;
use crate::{Error, Result};
use ghzdac_globals::{DacChannel, NUM_TRIES};

/// Number of samples in the BIST pattern played during bring-up.
pub const BIST_PATTERN_LEN: usize = 1000;

/// Fixed pseudo-random 14-bit test pattern.
pub fn bist_pattern(len: usize) -> Vec<u32> {
    let mut state: u32 = 0x2545_F491;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 16) & 0x3FFF
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct BringupOptions {
    /// Derive the LVDS sample delay from a sweep.
    pub optimize_sd: bool,
    /// LVDS sample delay to use instead of the `lvdsSD` board parameter.
    pub sd: Option<u8>,
    /// FIFO counter to search for instead of the `fifoCounter` board parameter.
    pub fifo_counter: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DacChannelReport {
    pub lvds: LvdsReport,
    pub fifo: FifoReport,
    pub bist: BistReport,
}

impl DacChannelReport {
    pub fn channel(&self) -> DacChannel {
        self.lvds.channel
    }
}

#[derive(Debug)]
pub enum BringupReport {
    Dac {
        name: String,
        channels: Vec<DacChannelReport>,
        /// FIFO and BIST passed on every channel.
        ok: bool,
        /// LVDS alignment passed on every channel.
        lvds_ok: bool,
    },
    Adc {
        name: String,
        ok: bool,
    },
    /// The PLL was still locked, bring-up was skipped.
    PllLocked {
        name: String,
    },
    /// Communication with the board failed.
    Exception {
        name: String,
        error: Error,
    },
}

impl BringupReport {
    pub fn name(&self) -> &str {
        match self {
            BringupReport::Dac { name, .. }
            | BringupReport::Adc { name, .. }
            | BringupReport::PllLocked { name }
            | BringupReport::Exception { name, .. } => name,
        }
    }

    pub fn is_ok(&self) -> bool {
        match self {
            BringupReport::Dac { ok, .. } | BringupReport::Adc { ok, .. } => *ok,
            BringupReport::PllLocked { .. } => true,
            BringupReport::Exception { .. } => false,
        }
    }

    /// The board works but LVDS alignment failed on some channel.
    pub fn lvds_warning(&self) -> bool {
        matches!(self, BringupReport::Dac { ok: true, lvds_ok: false, .. })
    }

    fn log(&self) {
        match self {
            BringupReport::Dac { name, channels, ok, lvds_ok } => {
                for ch in channels {
                    let dac = ch.channel();
                    log::info!(
                        "DAC {dac} LVDS: SD {}, check {}, MSD {}, MHD {}",
                        ch.lvds.sd,
                        ch.lvds.check,
                        LvdsReport::plot(&ch.lvds.msd_bits),
                        LvdsReport::plot(&ch.lvds.mhd_bits)
                    );
                    if ch.fifo.success {
                        log::info!(
                            "DAC {dac} FIFO: {} tries, PHOF {}, clock polarity {}, counter {}",
                            ch.fifo.tries,
                            ch.fifo.phof,
                            ch.fifo.clock_inverted as u8,
                            ch.fifo.counter
                        );
                    } else {
                        log::info!("DAC {dac} FIFO: failure after {} tries", ch.fifo.tries);
                    }
                    log::info!("DAC {dac} BIST: {}", if ch.bist.success { "Yes" } else { "No" });
                }
                if *ok {
                    log::info!("{name} ok");
                    if !*lvds_ok {
                        log::warn!("{name}: LVDS warning");
                    }
                } else {
                    log::error!("{name}: bring-up failure, reinitialize bring-up");
                }
            }
            BringupReport::Adc { name, ok } => {
                if *ok {
                    log::info!("{name} ok");
                } else {
                    log::error!("{name}: ADC self test failed");
                }
            }
            BringupReport::PllLocked { name } => log::info!("{name}: PLL locked"),
            BringupReport::Exception { name, error } => log::error!("{name}: {error}"),
        }
    }
}

async fn dac_bringup<L: BoardLink>(
    dac: &DacBoard<L>,
    options: &BringupOptions,
) -> Result<Vec<DacChannelReport>> {
    dac.init_pll().await?;
    dac.reset_pll().await?;
    let pattern = bist_pattern(BIST_PATTERN_LEN);

    let mut channels = Vec::with_capacity(DacChannel::ALL.len());
    for channel in DacChannel::ALL {
        log::debug!("{}: bringing up DAC {channel}", dac.name());
        let lvds = dac.set_lvds(channel, options.sd, options.optimize_sd).await?;
        let fifo = dac.set_fifo(channel, options.fifo_counter).await?;
        let bist = dac.run_bist(channel, &pattern).await?;
        channels.push(DacChannelReport { lvds, fifo, bist });
    }
    Ok(channels)
}

/// Bring up one board. Communication errors become
/// [`BringupReport::Exception`] instead of failing the caller.
pub async fn bringup_device<L: BoardLink, A: AdcBoard>(
    device: &Device<L, A>,
    options: &BringupOptions,
) -> BringupReport {
    let name = device.name().to_string();
    let report = match device {
        Device::Dac(dac) => match dac_bringup(dac, options).await {
            Ok(channels) => {
                let ok = channels.iter().all(|c| c.fifo.success && c.bist.success);
                let lvds_ok = channels.iter().all(|c| c.lvds.success);
                BringupReport::Dac {
                    name,
                    channels,
                    ok,
                    lvds_ok,
                }
            }
            Err(error) => BringupReport::Exception { name, error },
        },
        Device::Adc(adc) => match adc.self_test().await {
            Ok(ok) => BringupReport::Adc { name, ok },
            Err(error) => BringupReport::Exception {
                name,
                error: error.into(),
            },
        },
    };
    report.log();
    report
}

/// Bring up one board, first asking a DAC whether its PLL is still locked
/// when `check_lock` is set. A locked board is not brought up again.
pub async fn check_board<L: BoardLink, A: AdcBoard>(
    device: &Device<L, A>,
    options: &BringupOptions,
    check_lock: bool,
) -> BringupReport {
    if let (Device::Dac(dac), true) = (device, check_lock) {
        match dac.query_pll().await {
            Ok(false) => {
                let report = BringupReport::PllLocked {
                    name: dac.name().to_string(),
                };
                report.log();
                return report;
            }
            Ok(true) => log::info!("{}: PLL unlocked", dac.name()),
            Err(error) => {
                let report = BringupReport::Exception {
                    name: dac.name().to_string(),
                    error,
                };
                report.log();
                return report;
            }
        }
    }
    bringup_device(device, options).await
}

#[derive(Debug, Default)]
pub struct BringupSummary {
    /// Final report of every board, in input order.
    pub reports: Vec<BringupReport>,
    /// DAC boards that needed more than one try, with the number of tries.
    pub retried: Vec<(String, u32)>,
    /// Boards still failing after the last try.
    pub failed: Vec<String>,
}

impl BringupSummary {
    pub fn all_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Bring up every board, retrying failing DAC boards up to `NUM_TRIES` times.
pub async fn bringup_all<L: BoardLink, A: AdcBoard>(
    devices: &[Device<L, A>],
    options: &BringupOptions,
) -> BringupSummary {
    let mut summary = BringupSummary::default();
    for device in devices {
        log::info!("Bringing up {}...", device.name());
        let mut report = bringup_device(device, options).await;
        let mut tries = 1;
        if device.is_dac() {
            while tries < NUM_TRIES && !report.is_ok() {
                report = bringup_device(device, options).await;
                tries += 1;
            }
        }
        if !report.is_ok() {
            summary.failed.push(device.name().to_string());
        } else if tries > 1 {
            summary.retried.push((device.name().to_string(), tries));
        }
        summary.reports.push(report);
    }

    for (name, tries) in &summary.retried {
        log::info!("{name} took {tries} tries");
    }
    if summary.failed.is_empty() {
        log::info!("All boards successful");
    } else {
        log::error!("All boards brought up except: {:?}", summary.failed);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bist_pattern_is_fixed() {
        let a = bist_pattern(BIST_PATTERN_LEN);
        assert_eq!(a.len(), BIST_PATTERN_LEN);
        assert_eq!(a, bist_pattern(BIST_PATTERN_LEN));
        assert!(a.iter().all(|w| *w <= 0x3FFF));
        assert!(a.iter().any(|w| *w != 0));
    }
}
