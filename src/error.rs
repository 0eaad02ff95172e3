use thiserror::Error;

/// Errors returned by the fallible operations of a domain.
///
/// Allocation of a hazard slot or a retire entry is the only thing that can
/// fail; every other operation completes unconditionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The heap allocation backing a new hazard slot or retire entry failed.
    #[error("out of memory")]
    OutOfMemory,
}
