//! Command execution: read, fold, decide, append, retry.
//!
//! A [`Command`] declares the streams that form its consistency boundary,
//! folds their events into a state value, and decides which new events to
//! emit. [`execute`] runs that cycle and appends the emitted events with the
//! exact versions that were read as preconditions. If another writer touched
//! any of those streams in between, the append fails, and the command is
//! re-run against fresh state — so business rules like "stock must cover the
//! requested quantity" are always evaluated against what is actually
//! committed, never against a stale read.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{WorkflowError, WorkflowResult};
use crate::store::{EventStore, EventToWrite, ExpectedVersion, ReadOptions, StoredEvent, StreamEvents};
use crate::types::{StreamId, StreamVersion};

/// A self-contained business operation over one or more streams.
#[async_trait]
pub trait Command: Send + Sync {
    /// State folded from the declared streams. `Default` is the state of a
    /// world where none of the streams exist yet.
    type State: Default + Send + Sync;

    /// The event type this command reads and emits.
    type Event: Send + Sync;

    /// Short name used in trace output.
    fn name(&self) -> &'static str;

    /// The streams this command must see and may write to.
    fn read_streams(&self) -> Vec<StreamId>;

    /// Folds one stored event into the state. Must be pure.
    fn apply(&self, state: &mut Self::State, event: &StoredEvent<Self::Event>);

    /// Business logic: inspects the folded state and either emits events or
    /// rejects the operation. Must not perform I/O; everything it needs is
    /// in `self` and `state`.
    async fn handle(&self, state: Self::State) -> WorkflowResult<Vec<(StreamId, Self::Event)>>;
}

/// Which errors warrant re-running the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryOn {
    /// Retry only when optimistic concurrency control reports a conflict.
    #[default]
    Conflicts,
    /// Never retry; surface the first error.
    Nothing,
}

impl RetryOn {
    fn should_retry(self, error: &WorkflowError) -> bool {
        match self {
            Self::Conflicts => matches!(error, WorkflowError::ConcurrencyConflict { .. }),
            Self::Nothing => false,
        }
    }
}

/// Retry schedule for conflicting commands: bounded attempts with
/// exponential backoff and jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
    /// Which errors are worth retrying.
    pub retry_on: RetryOn,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            retry_on: RetryOn::default(),
        }
    }
}

impl RetryPolicy {
    /// The default schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// A schedule that fails fast on the first error.
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            retry_on: RetryOn::Nothing,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), with ±25% jitter to
    /// spread out contending writers.
    fn delay_for(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let base = self.base_delay.as_millis() as f64;
        let cap = self.max_delay.as_millis() as f64;
        let raw = base * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = raw.min(cap);

        let mut rng = rand::rng();
        let jitter = capped * 0.25 * (rng.random::<f64>() - 0.5) * 2.0;
        let millis = (capped + jitter).clamp(0.0, cap) as u64;
        Duration::from_millis(millis)
    }
}

/// What an executed command did.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// How many attempts were needed (1 when there was no contention).
    pub attempts: u32,
    /// New version of every stream the command wrote to. Empty when the
    /// command decided there was nothing to do.
    pub versions: HashMap<StreamId, StreamVersion>,
}

impl ExecutionOutcome {
    /// Whether the command appended anything.
    pub fn wrote_events(&self) -> bool {
        !self.versions.is_empty()
    }
}

/// Runs a command to completion against the given store.
///
/// Terminal errors from the command's `handle` (validation, not-found,
/// insufficient stock, ...) return immediately. Version conflicts are
/// retried per the policy; if attempts run out, the caller sees the
/// conflict as a [`WorkflowError::ConcurrencyConflict`].
pub async fn execute<S, C>(
    store: &S,
    command: &C,
    retry: &RetryPolicy,
) -> WorkflowResult<ExecutionOutcome>
where
    S: EventStore,
    C: Command<Event = S::Event>,
{
    let mut streams = Vec::new();
    let mut seen = HashSet::new();
    for stream in command.read_streams() {
        if seen.insert(stream.clone()) {
            streams.push(stream);
        }
    }
    let declared: HashSet<StreamId> = seen;

    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        tracing::debug!(command = command.name(), attempt, "executing command");

        let data = store
            .read_streams(&streams, &ReadOptions::all())
            .await
            .map_err(WorkflowError::from)?;

        let mut state = C::State::default();
        for event in &data.events {
            command.apply(&mut state, event);
        }

        let emitted = command.handle(state).await?;

        if emitted.is_empty() {
            return Ok(ExecutionOutcome {
                attempts: attempt,
                versions: HashMap::new(),
            });
        }

        // Group emitted events per stream, preserving emission order, and
        // attach the exact version observed at read time.
        let mut order: Vec<StreamId> = Vec::new();
        let mut grouped: HashMap<StreamId, Vec<EventToWrite<S::Event>>> = HashMap::new();
        for (stream_id, payload) in emitted {
            if !declared.contains(&stream_id) {
                return Err(WorkflowError::Internal(format!(
                    "command '{}' wrote to undeclared stream '{stream_id}'",
                    command.name()
                )));
            }
            if !grouped.contains_key(&stream_id) {
                order.push(stream_id.clone());
            }
            grouped
                .entry(stream_id)
                .or_default()
                .push(EventToWrite::new(payload));
        }

        let writes: Vec<StreamEvents<S::Event>> = order
            .into_iter()
            .map(|stream_id| {
                let expected = ExpectedVersion::Exact(data.version_of(&stream_id));
                let events = grouped.remove(&stream_id).unwrap_or_default();
                StreamEvents::new(stream_id, expected, events)
            })
            .collect();

        match store.append(writes).await {
            Ok(versions) => {
                return Ok(ExecutionOutcome { attempts: attempt, versions });
            }
            Err(err) => {
                let err = WorkflowError::from(err);
                if attempt < max_attempts && retry.retry_on.should_retry(&err) {
                    let delay = retry.delay_for(attempt);
                    tracing::debug!(
                        command = command.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "version conflict, retrying with fresh state"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                return Err(err);
            }
        }
    }
}
