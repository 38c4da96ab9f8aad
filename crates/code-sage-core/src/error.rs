use thiserror::Error;

/// A vector whose length disagrees with the vectors it is compared against
/// or stored alongside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("embedding dimension mismatch: expected {expected}, got {actual}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub actual: usize,
}

impl DimensionMismatch {
    /// Returns `Err` when `actual` differs from `expected`.
    pub fn check(expected: usize, actual: usize) -> Result<(), Self> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self { expected, actual })
        }
    }
}
