//! Readiness waits used before a page is captured.

use std::{collections::HashSet, future::Future, time::Duration};

use futures::{Stream, StreamExt};
use tokio::time::timeout;

use super::EngineError;

/// One network event of the page being captured, keyed by request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum NetworkActivity {
    Started(String),
    Settled(String),
}

/// Resolve once no request has been in flight for `quiet`.
///
/// A redirect re-announces the same request id, so ids are tracked rather than
/// counted. The wait has no upper bound of its own; callers wrap it in the
/// navigation timeout. A closed stream means the page is gone and ends the wait.
pub(super) async fn network_idle<S>(mut activity: S, quiet: Duration)
where
    S: Stream<Item = NetworkActivity> + Unpin,
{
    let mut in_flight: HashSet<String> = HashSet::new();
    loop {
        let next = if in_flight.is_empty() {
            match timeout(quiet, activity.next()).await {
                Ok(next) => next,
                Err(_) => return,
            }
        } else {
            activity.next().await
        };

        match next {
            Some(NetworkActivity::Started(id)) => {
                in_flight.insert(id);
            }
            Some(NetworkActivity::Settled(id)) => {
                in_flight.remove(&id);
            }
            None => return,
        }
    }
}

/// Outcome of a wait whose failure must not stop the capture.
#[derive(Debug)]
pub(super) enum Readiness {
    Ready,
    TimedOut,
    Failed(EngineError),
}

/// Race `signal` against `limit`. Every outcome lets the caller proceed.
pub(super) async fn best_effort<F>(limit: Duration, signal: F) -> Readiness
where
    F: Future<Output = Result<(), EngineError>>,
{
    match timeout(limit, signal).await {
        Ok(Ok(())) => Readiness::Ready,
        Ok(Err(err)) => Readiness::Failed(err),
        Err(_) => Readiness::TimedOut,
    }
}
