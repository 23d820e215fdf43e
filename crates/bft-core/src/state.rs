//! §4.8 state machines, modeled as enums for observability and testing —
//! the step loops drive these transitions explicitly rather than leaving
//! the current phase implicit in a call stack.

/// Coordinator step state: `Broadcasting -> Collecting -> Reducing ->
/// Applying -> Persisting(optional) -> Broadcasting(next)`. Terminal on
/// `max_steps` or a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Broadcasting,
    Collecting,
    Reducing,
    Applying,
    Persisting,
    Terminal,
}

/// Worker step state: `AwaitStep -> FetchParams -> Compute -> Send ->
/// AwaitStep`. Terminal on transport EOF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    AwaitStep,
    FetchParams,
    Compute,
    Send,
    Terminal,
}
