use crate::Result;
use crate::board::dac::DacBoard;
use crate::link::BoardLink;
use ghzdac_globals::{DacChannel, MAX_FIFO_TRIES};

/// Set each of the four PHOF values and read the FIFO counter after each.
const PHOF_SWEEP: [u32; 8] = [
    0x0700, 0x8700, 0x0701, 0x8700, 0x0702, 0x8700, 0x0703, 0x8700,
];
const SET_PHOF: u32 = 0x0700;
const READ_FIFO: u32 = 0x8700;

/// Outcome of a FIFO phase offset search on one DAC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FifoReport {
    pub channel: DacChannel,
    pub success: bool,
    /// Clock polarity applied when the search ended.
    pub clock_inverted: bool,
    /// Selected phase offset, -1 when no offset gave the target counter.
    pub phof: i32,
    pub tries: u32,
    /// FIFO counter value searched for.
    pub counter: u8,
}

fn fifo_counter(reading: u8) -> u8 {
    (reading >> 4) & 0xF
}

impl<L: BoardLink> DacBoard<L> {
    /// Find a FIFO phase offset giving the `target` counter, falling back to
    /// the `fifoCounter` board parameter.
    pub async fn set_fifo(&self, channel: DacChannel, target: Option<u8>) -> Result<FifoReport> {
        let target = match target {
            Some(target) => target,
            None => self.board_params.fifo_counter()?,
        };
        self.test_mode(async |dac| dac.fifo(channel, target).await)
            .await
    }

    async fn fifo(&self, channel: DacChannel, target: u8) -> Result<FifoReport> {
        let op = channel.serial_op();
        let mut inverted = false;
        self.set_polarity(channel, inverted).await?;

        let mut tries = 1;
        let mut phof = -1;
        let mut success = false;
        while tries <= MAX_FIFO_TRIES {
            let reading = self.serial(op, &PHOF_SWEEP).await?;
            let counters: Vec<u8> = [1, 3, 5, 7].iter().map(|i| fifo_counter(reading[*i])).collect();
            log::debug!(
                "{} DAC {channel}: try {tries}, inverted {inverted}, FIFO counters {counters:?}",
                self.name
            );
            (phof, success) = self.check_phof(op, &counters, target).await?;
            if success {
                break;
            }
            inverted = !inverted;
            self.set_polarity(channel, inverted).await?;
            tries += 1;
        }

        let report = FifoReport {
            channel,
            success,
            clock_inverted: inverted,
            phof,
            tries: tries.min(MAX_FIFO_TRIES),
            counter: target,
        };
        if !success {
            log::warn!("{} DAC {channel}: no PHOF gives FIFO counter {target}", self.name);
        }
        Ok(report)
    }

    /// Re-apply every PHOF whose counter matched and confirm the counter.
    /// Returns the PHOF tried last, -1 if none matched.
    async fn check_phof(&self, op: u8, counters: &[u8], target: u8) -> Result<(i32, bool)> {
        let mut phof = -1;
        for candidate in (0..counters.len()).filter(|i| counters[*i] == target) {
            phof = candidate as i32;
            let reading = self
                .serial(op, &[SET_PHOF + candidate as u32, READ_FIFO])
                .await?;
            if fifo_counter(reading[1]) == target {
                return Ok((phof, true));
            }
        }
        Ok((phof, false))
    }
}
