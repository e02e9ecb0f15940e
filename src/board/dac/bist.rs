use crate::Result;
use crate::board::dac::DacBoard;
use crate::link::BoardLink;
use ghzdac_globals::DacChannel;

const SAMPLE_MASK: u32 = 0x3FFF;
/// SRAM words played by a BIST run, zero padded.
const BIST_MIN_LEN: usize = 20;
const BIST_LEAD_IN: usize = 4;
/// Reset and arm the checksum logic of the DAC.
const BIST_START: [u32; 3] = [0x0004, 0x1107, 0x1106];
/// Four checksum registers (LVDS lanes 0/1, FIFO lanes 0/1), four bytes each.
const BIST_READOUT: [u32; 20] = [
    0x1126, 0x9200, 0x9300, 0x9400, 0x9500, //
    0x1166, 0x9200, 0x9300, 0x9400, 0x9500, //
    0x11A6, 0x9200, 0x9300, 0x9400, 0x9500, //
    0x11E6, 0x9200, 0x9300, 0x9400, 0x9500,
];

/// Outcome of a built-in self test on one DAC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BistReport {
    pub channel: DacChannel,
    pub success: bool,
    pub expected: [u32; 2],
    pub lvds: [u32; 2],
    pub fifo: [u32; 2],
}

/// Checksum the DAC computes over a sample stream: two lanes over
/// alternating samples, each rotating left and xoring in the inverted
/// sample. Zero samples leave the lane unchanged.
pub fn bist_checksum(data: &[u32]) -> [u32; 2] {
    let mut bist = [0u32; 2];
    for pair in data.chunks(2) {
        for (lane, sample) in bist.iter_mut().zip(pair) {
            let sample = sample & SAMPLE_MASK;
            if sample != 0 {
                *lane = lane.rotate_left(1) ^ ((sample ^ SAMPLE_MASK) & SAMPLE_MASK);
            }
        }
    }
    bist
}

/// The hardware may report the two lanes swapped.
fn orient(reading: [u32; 2], expected: [u32; 2]) -> [u32; 2] {
    let swapped = [reading[1], reading[0]];
    if swapped == expected { swapped } else { reading }
}

impl<L: BoardLink> DacBoard<L> {
    /// Play `data` on one DAC and compare the checksums it computed on the
    /// LVDS and FIFO paths with the expected one.
    pub async fn run_bist(&self, channel: DacChannel, data: &[u32]) -> Result<BistReport> {
        self.test_mode(async |dac| dac.bist(channel, data).await)
            .await
    }

    async fn bist(&self, channel: DacChannel, data: &[u32]) -> Result<BistReport> {
        let op = channel.serial_op();
        self.start_sram(0, 0, false, 0).await?;

        let samples: Vec<u32> = data.iter().map(|d| d & SAMPLE_MASK).collect();
        let mut sram = vec![0u32; BIST_LEAD_IN];
        sram.extend(samples.iter().map(|d| d << channel.sram_shift()));
        if sram.len() < BIST_MIN_LEN {
            sram.resize(BIST_MIN_LEN, 0);
        }
        self.write_sram(&sram, 0).await?;
        self.serial(op, &BIST_START).await?;
        self.start_sram(0, sram.len(), false, 0).await?;

        let expected = bist_checksum(&samples);
        let bytes = self.serial(op, &BIST_READOUT).await?;
        let reading: Vec<u32> = [0, 5, 10, 15]
            .iter()
            .map(|i| u32::from_be_bytes([bytes[i + 1], bytes[i + 2], bytes[i + 3], bytes[i + 4]]))
            .collect();
        let lvds = orient([reading[0], reading[1]], expected);
        let fifo = orient([reading[2], reading[3]], expected);

        let report = BistReport {
            channel,
            success: lvds == expected && fifo == expected,
            expected,
            lvds,
            fifo,
        };
        log::debug!("{} DAC {channel}: {report:x?}", self.name);
        Ok(report)
    }
}
