use crate::Result;
use crate::board::dac::DacBoard;
use crate::link::BoardLink;
use ghzdac_globals::DacChannel;

/// Serial word setting the LVDS sample delay, SD in bits 7:4.
const LVDS_SET_SD: u32 = 0x0500;
/// Serial word reading the LVDS check bit back.
const LVDS_READ_CHECK: u32 = 0x8500;
const LVDS_STEPS: usize = 16;

/// Outcome of an LVDS alignment run on one DAC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LvdsReport {
    pub channel: DacChannel,
    pub success: bool,
    /// Minimum setup delay, -1 when not determined.
    pub msd: i32,
    /// Minimum hold delay, -1 when not determined.
    pub mhd: i32,
    /// Sample delay applied to the DAC.
    pub sd: u8,
    pub msd_bits: [bool; LVDS_STEPS],
    pub mhd_bits: [bool; LVDS_STEPS],
    /// Low three bits of the final check read.
    pub check: u8,
}

impl LvdsReport {
    /// Bit trace as a string of `_` and `-`, one character per delay step.
    pub fn plot(bits: &[bool]) -> String {
        bits.iter().map(|b| if *b { '-' } else { '_' }).collect()
    }
}

/// For every delay step: set MSD to the step, read the check bit, set MHD
/// to the step, read the check bit.
fn sweep_words() -> Vec<u32> {
    (0..LVDS_STEPS as u32)
        .flat_map(|i| [0x0400 + (i << 4), LVDS_READ_CHECK, 0x0400 + i, LVDS_READ_CHECK])
        .collect()
}

/// Index of the first 1 -> 0 transition, 0 when there is none.
fn falling_edge(bits: impl Iterator<Item = u8>) -> i32 {
    let mut edge = -2;
    for (i, bit) in bits.enumerate() {
        if edge == -2 && bit == 1 {
            edge = -1;
        }
        if edge == -1 && bit == 0 {
            edge = i as i32;
        }
    }
    edge.max(0)
}

/// Indices `i` where `bits[i + 1]` differs from `bits[i]`.
fn switches(bits: &[bool]) -> Vec<usize> {
    bits.windows(2)
        .enumerate()
        .filter(|(_, w)| w[0] != w[1])
        .map(|(i, _)| i)
        .collect()
}

impl<L: BoardLink> DacBoard<L> {
    /// Align the LVDS data clock of one DAC.
    ///
    /// With `optimize_sd` the sample delay is derived from a sweep of the
    /// setup and hold delays; otherwise `sd` is used, falling back to the
    /// `lvdsSD` board parameter.
    pub async fn set_lvds(
        &self,
        channel: DacChannel,
        sd: Option<u8>,
        optimize_sd: bool,
    ) -> Result<LvdsReport> {
        let fixed_sd = match (optimize_sd, sd) {
            (true, _) => None,
            (false, Some(sd)) => Some(sd),
            (false, None) => Some(self.board_params.lvds_sd()?),
        };
        self.test_mode(async |dac| dac.lvds(channel, fixed_sd).await)
            .await
    }

    async fn lvds(&self, channel: DacChannel, fixed_sd: Option<u8>) -> Result<LvdsReport> {
        let op = channel.serial_op();
        let sweep = sweep_words();

        let (sd, mut msd, mut mhd, measure_edges) = match fixed_sd {
            None => {
                let words: Vec<u32> = std::iter::once(LVDS_SET_SD)
                    .chain(sweep.iter().copied())
                    .collect();
                let answer = self.serial(op, &words).await?;
                let bits: Vec<u8> = (0..2 * LVDS_STEPS).map(|i| answer[i * 2 + 2] & 1).collect();
                let msd = falling_edge(bits.iter().step_by(2).copied());
                let mhd = falling_edge(bits.iter().skip(1).step_by(2).copied());
                let sd = ((mhd - msd).div_euclid(2) & 0xF) as u8;
                log::debug!("{} DAC {channel}: MSD {msd}, MHD {mhd}, optimal SD {sd}", self.name);
                (sd, msd, mhd, false)
            }
            Some(sd) => (sd & 0xF, -1, -1, true),
        };

        let words: Vec<u32> = std::iter::once(LVDS_SET_SD + ((sd as u32) << 4))
            .chain(sweep.iter().copied())
            .collect();
        let answer = self.serial(op, &words).await?;
        let msd_bits: [bool; LVDS_STEPS] = std::array::from_fn(|i| answer[i * 4 + 2] & 1 != 0);
        let mhd_bits: [bool; LVDS_STEPS] = std::array::from_fn(|i| answer[i * 4 + 4] & 1 != 0);

        let msd_switch = switches(&msd_bits);
        let mhd_switch = switches(&mhd_bits);
        let single_edges = msd_switch.len() == 1 && mhd_switch.len() == 1;
        if measure_edges {
            if msd_switch.len() == 1 {
                msd = msd_switch[0] as i32;
            }
            if mhd_switch.len() == 1 {
                mhd = mhd_switch[0] as i32;
            }
        }
        // More than one step between the edges means noise on the line.
        let success = match (msd_switch.first(), mhd_switch.first()) {
            (Some(leading), Some(trailing)) => single_edges && leading.abs_diff(*trailing) <= 1,
            _ => false,
        };

        let check = self.serial(op, &[LVDS_READ_CHECK]).await?[0] & 0x7;

        let report = LvdsReport {
            channel,
            success,
            msd,
            mhd,
            sd,
            msd_bits,
            mhd_bits,
            check,
        };
        if success {
            log::debug!("{} DAC {channel}: {report:?}", self.name);
        } else {
            log::warn!(
                "{} DAC {channel}: LVDS alignment failed, MSD {} MHD {}",
                self.name,
                LvdsReport::plot(&report.msd_bits),
                LvdsReport::plot(&report.mhd_bits)
            );
        }
        Ok(report)
    }
}
