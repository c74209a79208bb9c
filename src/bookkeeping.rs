use std::future::Future;
use tracing::warn;

/// Run a bookkeeping write (progress counters, ledger rows) without letting
/// its failure escape.
///
/// The error is logged and `None` is returned; the scan or translation the
/// write belongs to carries on unaffected.
pub async fn best_effort<T, E, Fut>(what: &str, write: Fut) -> Option<T>
where
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match write.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{} failed (ignored): {}", what, e);
            None
        }
    }
}
