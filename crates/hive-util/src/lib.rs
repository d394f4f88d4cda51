//! Small cross-cutting helpers shared by every coordination-core crate.

use std::fmt;

/// A type-erased error used at crate boundaries where callers should not have
/// to name every concrete error type of a dependency.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type BoxedErrorResult<T> = std::result::Result<T, BoxedError>;

/// Formats an error together with its `source()` chain on one line, the way
/// `tracing` fields read best (`err = %e.fmt_compact()`).
pub trait FmtCompact {
    fn fmt_compact(&self) -> FmtCompactDisplay<'_>;
}

impl<E> FmtCompact for E
where
    E: std::error::Error,
{
    fn fmt_compact(&self) -> FmtCompactDisplay<'_> {
        FmtCompactDisplay(self)
    }
}

pub struct FmtCompactDisplay<'e>(&'e dyn std::error::Error);

impl fmt::Display for FmtCompactDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut cur = self.0.source();
        while let Some(src) = cur {
            write!(f, ": {src}")?;
            cur = src.source();
        }
        Ok(())
    }
}
