#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpcallError {
    /// Pushing into a full queue. Callers that cannot recover treat this as
    /// fatal, see [`crate::UpcallQueue::push`].
    #[error("upcall queue overflow (capacity {capacity})")]
    QueueFull { capacity: usize },
    #[error("upcall queue capacity must be a non-zero power of two, got {0}")]
    InvalidCapacity(usize),
    #[error("at least one capability is required")]
    NoCapabilities,
    #[error("capability {0} does not exist")]
    UnknownCapability(usize),
}
