/// Create-if-absent helper built on an existence lookup
use anyhow::Result;
use std::future::Future;
use tracing::info;

use crate::error::ProvisionError;

/// Outcome of an ensure: the identifier either predates this run or was just created
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ensured<T> {
    Existing(T),
    Created(T),
}

impl<T> Ensured<T> {
    /// The identifier, regardless of how it was obtained
    pub fn into_inner(self) -> T {
        match self {
            Ensured::Existing(v) | Ensured::Created(v) => v,
        }
    }

    pub fn get(&self) -> &T {
        match self {
            Ensured::Existing(v) | Ensured::Created(v) => v,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Ensured::Created(_))
    }

    /// Transform the identifier, keeping how it was obtained
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Ensured<U> {
        match self {
            Ensured::Existing(v) => Ensured::Existing(f(v)),
            Ensured::Created(v) => Ensured::Created(f(v)),
        }
    }
}

/// Look up `what`, creating it only when the lookup reports it absent
///
/// A lookup error is not treated as "absent": it aborts with `LookupFailed` and `create` is not run.
pub async fn ensure<P, PFut, C, CFut, T>(what: &str, lookup: P, create: C) -> Result<Ensured<T>>
where
    P: FnOnce() -> PFut,
    PFut: Future<Output = Result<Option<T>>>,
    C: FnOnce() -> CFut,
    CFut: Future<Output = Result<T>>,
{
    let found = lookup().await.map_err(|source| ProvisionError::LookupFailed {
        what: what.to_string(),
        source,
    })?;

    if let Some(existing) = found {
        info!("Using existing {}", what);
        return Ok(Ensured::Existing(existing));
    }

    info!("Creating {}", what);
    let created = create().await?;
    info!("✓ Created {}", what);
    Ok(Ensured::Created(created))
}
