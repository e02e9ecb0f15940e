pub mod bringup;
pub mod dac;

use crate::link::BoardLink;
pub use dac::DacBoard;

/// An ADC board sharing the board group with the DACs. Its bring-up is a
/// single self test run by the board itself.
#[allow(async_fn_in_trait)]
pub trait AdcBoard {
    fn name(&self) -> &str;

    /// Run the board's self test, returning whether it passed.
    async fn self_test(&self) -> anyhow::Result<bool>;
}

/// A board in a board group.
pub enum Device<L: BoardLink, A: AdcBoard> {
    Dac(DacBoard<L>),
    Adc(A),
}

impl<L: BoardLink, A: AdcBoard> Device<L, A> {
    pub fn name(&self) -> &str {
        match self {
            Device::Dac(dac) => dac.name(),
            Device::Adc(adc) => adc.name(),
        }
    }

    pub fn is_dac(&self) -> bool {
        matches!(self, Device::Dac(_))
    }
}
