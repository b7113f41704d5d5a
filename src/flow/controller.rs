//! SignupFlowController: owns one flow's state and mediates every
//! transition, validation, submission and analytics call.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::sequence::StepSequence;
use super::state::{FlowPhase, FlowState};
use super::validation::validate_submission;
use crate::analytics::{AnalyticsEvent, AnalyticsSink, events};
use crate::config::FlowConfig;
use crate::error::FlowError;
use crate::sink::{SubmissionRecord, SubmissionSink};

/// Invoked once per successful submission, e.g. to trigger a celebration.
pub type SuccessHook = Arc<dyn Fn(&FlowState) + Send + Sync>;

/// Why a flow is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    User,
    Success,
}

/// Result of a step submission that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Moved to the next step; nothing was written.
    Advanced { step_index: usize },
    /// Record written. `step_index` is the share step when the flow has one.
    Completed { step_index: usize },
    /// Insert failed; the step is unchanged and may be resubmitted.
    SubmissionFailed { message: String },
}

/// Result of `close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CloseOutcome {
    Closed { abandoned: bool },
    /// A submission is in flight; the flow stays open.
    Ignored,
}

/// Drives one flow instance. Create one controller per open flow.
pub struct SignupFlowController {
    sequence: Arc<StepSequence>,
    config: Arc<FlowConfig>,
    sink: Arc<dyn SubmissionSink>,
    analytics: Arc<dyn AnalyticsSink>,
    on_success: Option<SuccessHook>,
    state: Arc<RwLock<FlowState>>,
}

/// What a validated step leads to.
enum Next {
    Advanced(usize),
    Persist(Submission),
}

impl SignupFlowController {
    pub fn new(
        sequence: Arc<StepSequence>,
        config: FlowConfig,
        sink: Arc<dyn SubmissionSink>,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Self {
        Self {
            sequence,
            config: Arc::new(config),
            sink,
            analytics,
            on_success: None,
            state: Arc::new(RwLock::new(FlowState::default())),
        }
    }

    pub fn with_success_hook(mut self, hook: SuccessHook) -> Self {
        self.on_success = Some(hook);
        self
    }

    pub fn sequence(&self) -> &StepSequence {
        &self.sequence
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> FlowState {
        self.state.read().await.clone()
    }

    /// Start (or restart) the flow.
    ///
    /// A non-blank `seed_email` is recorded and the flow starts at the first
    /// collecting step without an email field.
    pub async fn open(&self, seed_email: Option<&str>) -> Result<FlowState, FlowError> {
        let seed = seed_email.map(str::trim).filter(|s| !s.is_empty());
        let start = match seed {
            Some(_) => self.sequence.first_step_without_email().unwrap_or(0),
            None => 0,
        };

        let snapshot = {
            let mut state = self.state.write().await;
            if !state.phase.can_transition_to(FlowPhase::Active) {
                return Err(FlowError::SubmissionInProgress);
            }
            *state = FlowState::opened(start, seed);
            state.clone()
        };

        info!(
            flow_id = %snapshot.flow_id,
            source = %self.config.source,
            start_step = start,
            seeded = seed.is_some(),
            "Signup flow opened"
        );

        self.emit(
            AnalyticsEvent::new(events::FLOW_STARTED, snapshot.flow_id)
                .with("source", self.config.source.as_str())
                .with("seeded", seed.is_some())
                .with("skipped_email", start > 0)
                .with("step_count", self.sequence.len()),
        );
        self.emit(step_viewed(&self.sequence, snapshot.flow_id, start));

        Ok(snapshot)
    }

    /// Submit the values of the current step.
    ///
    /// Values are trimmed before validation and storage. Validation failures
    /// return `FlowError::Validation` and leave the state untouched.
    /// Submission failures are folded into the state and returned as
    /// `StepOutcome::SubmissionFailed`.
    ///
    /// The insert runs on its own task: dropping this future does not cancel
    /// it, and the state always leaves `Submitting`.
    pub async fn submit_step(
        &self,
        values: HashMap<String, String>,
    ) -> Result<StepOutcome, FlowError> {
        let values: HashMap<String, String> = values
            .into_iter()
            .map(|(k, v)| (k, v.trim().to_string()))
            .collect();

        let mut pending = Vec::new();
        let next = {
            let mut state = self.state.write().await;
            if !state.phase.accepts_input() {
                return Err(match state.phase {
                    FlowPhase::Submitting => FlowError::SubmissionInProgress,
                    FlowPhase::Succeeded => FlowError::AlreadyCompleted,
                    _ => FlowError::NotOpen,
                });
            }

            let index = state.current_step_index;
            let step = self.sequence.step(index).ok_or(FlowError::NotOpen)?;

            if let Err(e) = validate_submission(&self.sequence, index, &values) {
                debug!(flow_id = %state.flow_id, step_index = index, field = %e.field, "Step rejected");
                return Err(e.into());
            }

            let boundary = self.sequence.is_persistence_boundary(index);
            state.transition_to(if boundary {
                FlowPhase::Submitting
            } else {
                FlowPhase::Active
            })?;

            let elapsed_ms = state.step_elapsed_ms();
            state.merge(&values);
            pending.push(
                AnalyticsEvent::new(events::STEP_COMPLETED, state.flow_id)
                    .with("step_index", index)
                    .with("step_name", step.name())
                    .with("elapsed_ms", elapsed_ms),
            );

            if boundary {
                state.last_error = None;
                let record = self
                    .config
                    .column_mapping
                    .map_record(&self.sequence, &state.collected);
                Next::Persist(Submission {
                    sequence: Arc::clone(&self.sequence),
                    config: Arc::clone(&self.config),
                    sink: Arc::clone(&self.sink),
                    analytics: Arc::clone(&self.analytics),
                    on_success: self.on_success.clone(),
                    state: Arc::clone(&self.state),
                    flow_id: state.flow_id,
                    index,
                    record,
                })
            } else {
                let next = index + 1;
                state.enter_step(next);
                debug!(flow_id = %state.flow_id, step_index = next, "Advanced to next step");
                pending.push(step_viewed(&self.sequence, state.flow_id, next));
                Next::Advanced(next)
            }
        };

        for event in pending {
            self.emit(event);
        }

        match next {
            Next::Advanced(step_index) => Ok(StepOutcome::Advanced { step_index }),
            Next::Persist(submission) => {
                let flow_id = submission.flow_id;
                match tokio::spawn(submission.run()).await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(flow_id = %flow_id, error = %e, "Submission task aborted");
                        self.recover_from_aborted_submission().await
                    }
                }
            }
        }
    }

    /// Close the flow. Ignored while a submission is in flight.
    pub async fn close(&self, reason: CloseReason) -> CloseOutcome {
        let mut state = self.state.write().await;
        let abandoned = reason == CloseReason::User
            && state.current_step_index > 0
            && matches!(state.phase, FlowPhase::Active | FlowPhase::Failed);

        if let Err(e) = state.transition_to(FlowPhase::Idle) {
            debug!(flow_id = %state.flow_id, error = %e, "Close ignored");
            return CloseOutcome::Ignored;
        }

        let abandon_event = abandoned.then(|| {
            let index = state.current_step_index;
            AnalyticsEvent::new(events::FLOW_ABANDONED, state.flow_id)
                .with("step_index", index)
                .with("step_name", step_name(&self.sequence, index))
                .with("elapsed_ms", state.total_elapsed_ms())
        });

        let flow_id = state.flow_id;
        *state = FlowState::default();
        drop(state);

        info!(flow_id = %flow_id, ?reason, abandoned, "Signup flow closed");
        if let Some(event) = abandon_event {
            self.emit(event);
        }
        CloseOutcome::Closed { abandoned }
    }

    /// The submission task panicked. Leave `Submitting` so the flow can be
    /// retried or closed.
    async fn recover_from_aborted_submission(&self) -> Result<StepOutcome, FlowError> {
        let mut state = self.state.write().await;
        match state.phase {
            FlowPhase::Succeeded => Ok(StepOutcome::Completed {
                step_index: state.current_step_index,
            }),
            FlowPhase::Submitting => {
                state.transition_to(FlowPhase::Failed)?;
                let message = self.config.failure_message.clone();
                state.last_error = Some(message.clone());
                Ok(StepOutcome::SubmissionFailed { message })
            }
            _ => Ok(StepOutcome::SubmissionFailed {
                message: self.config.failure_message.clone(),
            }),
        }
    }

    fn emit(&self, event: AnalyticsEvent) {
        emit(self.analytics.as_ref(), event);
    }
}

/// An insert plus the state update that follows it, owned so it can run on
/// its own task.
struct Submission {
    sequence: Arc<StepSequence>,
    config: Arc<FlowConfig>,
    sink: Arc<dyn SubmissionSink>,
    analytics: Arc<dyn AnalyticsSink>,
    on_success: Option<SuccessHook>,
    state: Arc<RwLock<FlowState>>,
    flow_id: Uuid,
    index: usize,
    record: SubmissionRecord,
}

impl Submission {
    async fn run(self) -> Result<StepOutcome, FlowError> {
        let flow_id = self.flow_id;
        info!(
            flow_id = %flow_id,
            collection = %self.config.collection,
            columns = self.record.len(),
            "Submitting signup record"
        );
        let result = self.sink.insert(&self.config.collection, &self.record).await;

        let mut state = self.state.write().await;
        match result {
            Ok(()) => {
                state.transition_to(FlowPhase::Succeeded)?;
                state.last_error = None;
                let next = self.index + 1;
                let has_share_step = next < self.sequence.len();
                if has_share_step {
                    state.enter_step(next);
                }
                let snapshot = state.clone();
                drop(state);

                info!(flow_id = %flow_id, "Signup stored");
                emit(
                    self.analytics.as_ref(),
                    AnalyticsEvent::new(events::FLOW_COMPLETED, flow_id)
                        .with("total_elapsed_ms", snapshot.total_elapsed_ms())
                        .with("step_count", self.sequence.len())
                        .with("seeded", snapshot.seeded),
                );
                if let Some(hook) = &self.on_success {
                    hook(&snapshot);
                }
                if has_share_step {
                    emit(
                        self.analytics.as_ref(),
                        step_viewed(&self.sequence, flow_id, next),
                    );
                }
                Ok(StepOutcome::Completed {
                    step_index: snapshot.current_step_index,
                })
            }
            Err(e) => {
                state.transition_to(FlowPhase::Failed)?;
                let message = self.config.failure_message.clone();
                state.last_error = Some(message.clone());
                drop(state);

                warn!(
                    flow_id = %flow_id,
                    collection = %self.config.collection,
                    error = %e,
                    "Signup submission failed"
                );
                emit(
                    self.analytics.as_ref(),
                    AnalyticsEvent::new(events::SUBMISSION_FAILED, flow_id)
                        .with("step_index", self.index)
                        .with("step_name", step_name(&self.sequence, self.index)),
                );
                Ok(StepOutcome::SubmissionFailed { message })
            }
        }
    }
}

fn step_name(sequence: &StepSequence, index: usize) -> String {
    sequence
        .step(index)
        .map(|s| s.name().to_string())
        .unwrap_or_default()
}

fn step_viewed(sequence: &StepSequence, flow_id: Uuid, index: usize) -> AnalyticsEvent {
    AnalyticsEvent::new(events::STEP_VIEWED, flow_id)
        .with("step_index", index)
        .with("step_name", step_name(sequence, index))
        .with("step_count", sequence.len())
}

fn emit(analytics: &dyn AnalyticsSink, event: AnalyticsEvent) {
    if let Err(e) = analytics.track(&event) {
        warn!(event = %event.name, error = %e, "Analytics event dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, OnceLock};

    use async_trait::async_trait;

    use crate::error::{AnalyticsError, PersistenceError};
    use crate::flow::{FormFieldSchema, StepConfig};
    use crate::sink::SubmissionRecord;

    struct NullSink;

    #[async_trait]
    impl SubmissionSink for NullSink {
        async fn insert(&self, _c: &str, _r: &SubmissionRecord) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Names(Mutex<Vec<String>>);

    impl AnalyticsSink for Names {
        fn track(&self, event: &AnalyticsEvent) -> Result<(), AnalyticsError> {
            self.0.lock().unwrap().push(event.name.clone());
            Ok(())
        }
    }

    fn controller(analytics: Arc<Names>) -> SignupFlowController {
        let sequence = StepSequence::new(vec![
            StepConfig::single("Join", FormFieldSchema::email("Email")),
            StepConfig::single("Share", FormFieldSchema::terminal_share("share", "Share")),
        ])
        .unwrap();
        SignupFlowController::new(
            Arc::new(sequence),
            FlowConfig::default(),
            Arc::new(NullSink),
            analytics,
        )
    }

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn submit_before_open_is_rejected() {
        let c = controller(Arc::new(Names::default()));
        let err = c.submit_step(values(&[("email", "a@b.co")])).await.unwrap_err();
        assert_eq!(err, FlowError::NotOpen);
    }

    #[tokio::test]
    async fn single_collecting_step_completes_onto_share() {
        let names = Arc::new(Names::default());
        let c = controller(names.clone());
        c.open(None).await.unwrap();

        let outcome = c.submit_step(values(&[("email", "a@b.co")])).await.unwrap();
        assert_eq!(outcome, StepOutcome::Completed { step_index: 1 });

        let state = c.snapshot().await;
        assert_eq!(state.phase, FlowPhase::Succeeded);
        assert!(!state.submitting);

        let err = c.submit_step(values(&[("email", "a@b.co")])).await.unwrap_err();
        assert_eq!(err, FlowError::AlreadyCompleted);

        let names = names.0.lock().unwrap();
        assert_eq!(
            *names,
            vec![
                events::FLOW_STARTED,
                events::STEP_VIEWED,
                events::STEP_COMPLETED,
                events::FLOW_COMPLETED,
                events::STEP_VIEWED,
            ]
        );
    }

    #[tokio::test]
    async fn seed_on_email_only_flow_stays_on_email_step() {
        let c = controller(Arc::new(Names::default()));
        let state = c.open(Some("x@y.com")).await.unwrap();
        assert_eq!(state.current_step_index, 0);
        assert_eq!(state.collected["email"], "x@y.com");
    }

    #[tokio::test]
    async fn blank_seed_is_ignored() {
        let c = controller(Arc::new(Names::default()));
        let state = c.open(Some("   ")).await.unwrap();
        assert!(!state.seeded);
        assert!(state.collected.is_empty());
    }

    /// Counts events tracked while the flow's state lock was held.
    #[derive(Default)]
    struct LockWatcher {
        state: OnceLock<Arc<RwLock<FlowState>>>,
        tracked: AtomicUsize,
        under_lock: AtomicUsize,
    }

    impl AnalyticsSink for LockWatcher {
        fn track(&self, _event: &AnalyticsEvent) -> Result<(), AnalyticsError> {
            self.tracked.fetch_add(1, Ordering::SeqCst);
            if let Some(state) = self.state.get()
                && state.try_write().is_err()
            {
                self.under_lock.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn analytics_never_run_under_the_state_lock() {
        let watcher = Arc::new(LockWatcher::default());
        let sequence = StepSequence::new(vec![
            StepConfig::single("Join", FormFieldSchema::email("Email")),
            StepConfig::single("Why", FormFieldSchema::text("why", "Why").required(true)),
            StepConfig::single("Share", FormFieldSchema::terminal_share("share", "Share")),
        ])
        .unwrap();
        let c = SignupFlowController::new(
            Arc::new(sequence),
            FlowConfig::default(),
            Arc::new(NullSink),
            watcher.clone(),
        );
        assert!(watcher.state.set(Arc::clone(&c.state)).is_ok());

        c.open(None).await.unwrap();
        c.submit_step(values(&[("email", "a@b.co")])).await.unwrap();
        c.submit_step(values(&[("why", "speed")])).await.unwrap();
        c.close(CloseReason::Success).await;

        assert_eq!(watcher.tracked.load(Ordering::SeqCst), 7);
        assert_eq!(watcher.under_lock.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn close_goes_through_the_state_machine() {
        let c = controller(Arc::new(Names::default()));
        assert_eq!(c.close(CloseReason::User).await, CloseOutcome::Closed { abandoned: false });

        c.open(None).await.unwrap();
        {
            let mut state = c.state.write().await;
            state.transition_to(FlowPhase::Submitting).unwrap();
        }
        assert_eq!(c.close(CloseReason::User).await, CloseOutcome::Ignored);
        assert_eq!(c.snapshot().await.phase, FlowPhase::Submitting);
    }
}
