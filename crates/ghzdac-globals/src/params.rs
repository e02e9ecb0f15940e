use crate::{Error, Result};

/// Hardware parameters of one FPGA firmware build.
///
/// Stored in the registry as `dacBuild<N>`, a list of `(name, value)` pairs:
///
/// +=======================+=================================================+
/// |  Name                 |  Meaning                                        |
/// +=======================+=================================================+
/// | SRAM_LEN              | total SRAM length in words                      |
/// +-----------------------+-------------------------------------------------+
/// | SRAM_PAGE_LEN         | words in one execute/download page (SRAM_LEN/2) |
/// +-----------------------+-------------------------------------------------+
/// | SRAM_DELAY_LEN        | clock cycles the end of block 0 is repeated per |
/// |                       | unit of block delay                             |
/// +-----------------------+-------------------------------------------------+
/// | SRAM_BLOCK0_LEN       | words in the first SRAM block                   |
/// +-----------------------+-------------------------------------------------+
/// | SRAM_BLOCK1_LEN       | words in the second SRAM block                  |
/// +-----------------------+-------------------------------------------------+
/// | SRAM_WRITE_PKT_LEN    | words written per SRAM write packet (one derp)  |
/// +-----------------------+-------------------------------------------------+
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildParameters {
    pub sram_len: usize,
    pub sram_page_len: usize,
    pub sram_delay_len: usize,
    pub sram_block0_len: usize,
    pub sram_block1_len: usize,
    pub sram_write_pkt_len: usize,
    /// Number of derps in the SRAM, `sram_len / sram_write_pkt_len`.
    pub sram_write_derps: usize,
}

fn lookup(pairs: &[(String, i64)], name: &str) -> Result<usize> {
    let (_, value) = pairs
        .iter()
        .find(|(key, _)| key == name)
        .ok_or_else(|| Error::Config(format!("missing parameter {name}")))?;
    usize::try_from(*value).map_err(|_| Error::Config(format!("negative parameter {name}={value}")))
}

impl BuildParameters {
    pub fn new(
        sram_len: usize,
        sram_page_len: usize,
        sram_delay_len: usize,
        sram_block0_len: usize,
        sram_block1_len: usize,
        sram_write_pkt_len: usize,
    ) -> Result<Self> {
        if sram_write_pkt_len == 0 {
            return Err(Error::Config("SRAM_WRITE_PKT_LEN must be nonzero".into()));
        }
        Ok(Self {
            sram_len,
            sram_page_len,
            sram_delay_len,
            sram_block0_len,
            sram_block1_len,
            sram_write_pkt_len,
            sram_write_derps: sram_len / sram_write_pkt_len,
        })
    }

    /// Parse the `(name, value)` list stored for a firmware build.
    pub fn from_pairs(pairs: &[(String, i64)]) -> Result<Self> {
        Self::new(
            lookup(pairs, "SRAM_LEN")?,
            lookup(pairs, "SRAM_PAGE_LEN")?,
            lookup(pairs, "SRAM_DELAY_LEN")?,
            lookup(pairs, "SRAM_BLOCK0_LEN")?,
            lookup(pairs, "SRAM_BLOCK1_LEN")?,
            lookup(pairs, "SRAM_WRITE_PKT_LEN")?,
        )
    }

    /// First derp of the given SRAM page.
    pub fn page_start_derp(&self, page: usize) -> usize {
        page * self.sram_page_len / self.sram_write_pkt_len
    }
}

/// Calibration constants of one physical board, stored as `dac<N>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardParameters {
    /// FIFO counter giving the right clock delay
    pub fifo_counter: Option<u8>,
    /// LVDS sample delay giving the right clock delay
    pub lvds_sd: Option<u8>,
}

impl BoardParameters {
    pub fn from_pairs(pairs: &[(String, i64)]) -> Result<Self> {
        let mut params = Self::default();
        for (key, value) in pairs {
            let value = u8::try_from(*value)
                .map_err(|_| Error::Config(format!("parameter {key}={value} out of range")))?;
            match key.as_str() {
                "fifoCounter" => params.fifo_counter = Some(value),
                "lvdsSD" => params.lvds_sd = Some(value),
                _ => log::debug!("ignoring board parameter {key}"),
            }
        }
        Ok(params)
    }

    pub fn fifo_counter(&self) -> Result<u8> {
        self.fifo_counter
            .ok_or_else(|| Error::Config("board has no fifoCounter".into()))
    }

    pub fn lvds_sd(&self) -> Result<u8> {
        self.lvds_sd
            .ok_or_else(|| Error::Config("board has no lvdsSD".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(list: &[(&str, i64)]) -> Vec<(String, i64)> {
        list.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn build_parameters_derive_derps() {
        let build = BuildParameters::from_pairs(&pairs(&[
            ("SRAM_LEN", 18432),
            ("SRAM_PAGE_LEN", 9216),
            ("SRAM_DELAY_LEN", 1024),
            ("SRAM_BLOCK0_LEN", 16384),
            ("SRAM_BLOCK1_LEN", 2048),
            ("SRAM_WRITE_PKT_LEN", 256),
        ]))
        .unwrap();
        assert_eq!(build.sram_write_derps, 72);
        assert_eq!(build.page_start_derp(1), 36);
    }

    #[test]
    fn build_parameters_missing_key() {
        let err = BuildParameters::from_pairs(&pairs(&[("SRAM_LEN", 18432)])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn board_parameters() {
        let board = BoardParameters::from_pairs(&pairs(&[("fifoCounter", 3), ("lvdsSD", 5)]))
            .unwrap();
        assert_eq!(board.fifo_counter().unwrap(), 3);
        assert_eq!(board.lvds_sd().unwrap(), 5);
        assert!(BoardParameters::default().lvds_sd().is_err());
    }
}
