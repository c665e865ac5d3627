//! Bounded hand-off queue between the copy and upload stages.

/// Item carried on the copy-to-upload queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferItem {
    /// A staged file ready for upload dispatch.
    File(std::path::PathBuf),
    /// Sentinel: no further items will arrive for the worker receiving this.
    Done,
}

pub type Sender = async_channel::Sender<TransferItem>;
pub type Receiver = async_channel::Receiver<TransferItem>;

pub const DEFAULT_CAPACITY: usize = 50;

/// Bounded FIFO channel; sends suspend once `capacity` items are pending,
/// which is what caps the amount of staged-but-not-dispatched work.
#[must_use]
pub fn bounded(capacity: usize) -> (Sender, Receiver) {
    assert!(capacity > 0);
    async_channel::bounded(capacity)
}
