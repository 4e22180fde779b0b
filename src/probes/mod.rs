pub mod latency;
pub mod transfer;

use crate::error::{ProbeError, Result};
use std::future::Future;
use tracing::debug;

/// Tries each strategy in order and returns the first value produced,
/// together with the name of the strategy that produced it.
///
/// Every failure except the last is narrated and swallowed; the last one is
/// returned to the caller as the stage failure.
pub async fn first_success<'a, S, T, F, Fut>(
    strategies: &'a [Box<S>],
    label: fn(&S) -> &'static str,
    mut attempt: F,
) -> Result<(T, &'static str)>
where
    S: ?Sized,
    F: FnMut(&'a S) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;

    for (i, strategy) in strategies.iter().enumerate() {
        let name = label(&**strategy);
        match attempt(&**strategy).await {
            Ok(value) => return Ok((value, name)),
            Err(e) => {
                debug!(strategy = name, error = %e, "strategy failed");
                if let Some(next) = strategies.get(i + 1) {
                    println!(
                        "{} failed ({}), falling back to {}...",
                        name,
                        e,
                        label(&**next)
                    );
                }
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ProbeError::Custom("No strategies configured".to_string())))
}
