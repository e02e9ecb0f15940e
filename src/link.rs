/// Raw frame transport to one DAC board.
///
/// Implementations deliver frames in order and keep request/response
/// pairing: the next frame returned by [`BoardLink::read`] after a register
/// packet asking for a readback is that readback.
#[allow(async_fn_in_trait)]
pub trait BoardLink {
    /// Start receiving frames whose source address is `mac`.
    async fn listen(&mut self, mac: &str) -> anyhow::Result<()>;

    /// Send one frame to the board.
    async fn write(&mut self, frame: &[u8]) -> anyhow::Result<()>;

    /// Receive the next frame from the board.
    async fn read(&mut self) -> anyhow::Result<Vec<u8>>;

    /// Wait until `count` frames are buffered.
    async fn collect(&mut self, count: usize) -> anyhow::Result<()>;

    /// Drop the next `count` buffered frames.
    async fn discard(&mut self, count: usize) -> anyhow::Result<()>;

    /// Drop every buffered frame.
    async fn clear(&mut self) -> anyhow::Result<()>;
}
