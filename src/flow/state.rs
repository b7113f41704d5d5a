//! Flow state machine: tracks which step the visitor is on and what they
//! have answered so far.

use std::collections::BTreeMap;
use std::collections::HashMap;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::FlowError;

/// Collected answers keyed by field name.
pub type SignupRecord = BTreeMap<String, String>;

/// Lifecycle of one flow instance.
///
/// Idle → Active → Submitting → Succeeded, with Submitting → Failed → Submitting
/// on retry and any phase but Submitting → Idle on close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPhase {
    #[default]
    Idle,
    Active,
    Submitting,
    Succeeded,
    Failed,
}

impl FlowPhase {
    pub fn can_transition_to(&self, target: FlowPhase) -> bool {
        use FlowPhase::*;
        matches!(
            (self, target),
            (Idle, Active)
                | (Idle, Idle)
                | (Active, Active)
                | (Active, Submitting)
                | (Failed, Submitting)
                | (Submitting, Succeeded)
                | (Submitting, Failed)
                | (Active, Idle)
                | (Failed, Idle)
                | (Succeeded, Idle)
                | (Failed, Active)
                | (Succeeded, Active)
        )
    }

    /// Whether `submit_step` may run in this phase.
    pub fn accepts_input(&self) -> bool {
        matches!(self, Self::Active | Self::Failed)
    }
}

impl std::fmt::Display for FlowPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Submitting => "submitting",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// State of one open flow.
#[derive(Debug, Clone, Serialize)]
pub struct FlowState {
    pub flow_id: Uuid,
    pub phase: FlowPhase,
    pub current_step_index: usize,
    pub collected: SignupRecord,
    pub submitting: bool,
    pub last_error: Option<String>,
    /// Whether the flow was opened with a known email.
    pub seeded: bool,
    #[serde(skip)]
    pub started_at: Option<Instant>,
    #[serde(skip)]
    pub step_started_at: Option<Instant>,
    /// Last mutation, used to expire abandoned instances.
    #[serde(skip)]
    pub touched_at: Option<Instant>,
}

impl Default for FlowState {
    fn default() -> Self {
        Self {
            flow_id: Uuid::nil(),
            phase: FlowPhase::Idle,
            current_step_index: 0,
            collected: SignupRecord::new(),
            submitting: false,
            last_error: None,
            seeded: false,
            started_at: None,
            step_started_at: None,
            touched_at: None,
        }
    }
}

impl FlowState {
    /// Fresh active state, optionally seeded with a known email.
    pub fn opened(start_index: usize, seed_email: Option<&str>) -> Self {
        let now = Instant::now();
        let mut collected = SignupRecord::new();
        if let Some(email) = seed_email {
            collected.insert("email".to_string(), email.to_string());
        }
        Self {
            flow_id: Uuid::new_v4(),
            phase: FlowPhase::Active,
            current_step_index: start_index,
            collected,
            seeded: seed_email.is_some(),
            started_at: Some(now),
            step_started_at: Some(now),
            touched_at: Some(now),
            ..Self::default()
        }
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    ///
    /// Keeps `submitting` in step with the `Submitting` phase.
    pub fn transition_to(&mut self, next: FlowPhase) -> Result<(), FlowError> {
        if !self.phase.can_transition_to(next) {
            return Err(FlowError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        self.submitting = next == FlowPhase::Submitting;
        self.touched_at = Some(Instant::now());
        Ok(())
    }

    /// Merge submitted values; later values overwrite earlier ones.
    pub fn merge(&mut self, values: &HashMap<String, String>) {
        for (k, v) in values {
            self.collected.insert(k.clone(), v.clone());
        }
        self.touched_at = Some(Instant::now());
    }

    /// Move to `index` and restart the step timer.
    pub fn enter_step(&mut self, index: usize) {
        let now = Instant::now();
        self.current_step_index = index;
        self.step_started_at = Some(now);
        self.touched_at = Some(now);
    }

    /// Time since the last mutation. Zero for a never-opened state.
    pub fn idle_for(&self) -> Duration {
        self.touched_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    pub fn step_elapsed_ms(&self) -> u64 {
        elapsed_ms(self.step_started_at)
    }

    pub fn total_elapsed_ms(&self) -> u64 {
        elapsed_ms(self.started_at)
    }
}

fn elapsed_ms(since: Option<Instant>) -> u64 {
    since
        .map(|t| u64::try_from(t.elapsed().as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        use FlowPhase::*;
        let transitions = [
            (Idle, Active),
            (Active, Submitting),
            (Submitting, Succeeded),
            (Submitting, Failed),
            (Failed, Submitting),
            (Active, Idle),
            (Succeeded, Idle),
            (Idle, Idle),
        ];
        for (from, to) in transitions {
            assert!(from.can_transition_to(to), "{from} should transition to {to}");
        }
    }

    #[test]
    fn invalid_transitions() {
        use FlowPhase::*;
        assert!(!Idle.can_transition_to(Submitting));
        assert!(!Submitting.can_transition_to(Idle));
        assert!(!Submitting.can_transition_to(Active));
        assert!(!Succeeded.can_transition_to(Submitting));
        assert!(!Idle.can_transition_to(Succeeded));
    }

    #[test]
    fn transition_to_checks_the_table() {
        let mut state = FlowState::opened(0, None);
        state.transition_to(FlowPhase::Submitting).unwrap();
        assert!(state.submitting);

        let err = state.transition_to(FlowPhase::Idle).unwrap_err();
        assert_eq!(
            err,
            FlowError::InvalidTransition {
                from: FlowPhase::Submitting,
                to: FlowPhase::Idle
            }
        );
        assert_eq!(state.phase, FlowPhase::Submitting);

        state.transition_to(FlowPhase::Failed).unwrap();
        assert!(!state.submitting);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_for_tracks_last_mutation() {
        let mut state = FlowState::opened(0, None);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(state.idle_for(), Duration::from_secs(30));

        state.enter_step(1);
        assert_eq!(state.idle_for(), Duration::ZERO);
        assert_eq!(FlowState::default().idle_for(), Duration::ZERO);
    }

    #[test]
    fn accepts_input_only_when_active_or_failed() {
        use FlowPhase::*;
        assert!(Active.accepts_input());
        assert!(Failed.accepts_input());
        assert!(!Idle.accepts_input());
        assert!(!Submitting.accepts_input());
        assert!(!Succeeded.accepts_input());
    }

    #[test]
    fn display_matches_serde() {
        use FlowPhase::*;
        for phase in [Idle, Active, Submitting, Succeeded, Failed] {
            let json = serde_json::to_string(&phase).unwrap();
            assert_eq!(format!("\"{phase}\""), json);
        }
    }

    #[test]
    fn opened_with_seed() {
        let state = FlowState::opened(1, Some("x@y.com"));
        assert_eq!(state.phase, FlowPhase::Active);
        assert_eq!(state.current_step_index, 1);
        assert_eq!(state.collected.get("email").map(String::as_str), Some("x@y.com"));
        assert!(state.seeded);
        assert!(!state.flow_id.is_nil());
    }

    #[test]
    fn merge_overwrites_same_key() {
        let mut state = FlowState::opened(0, None);
        let mut first = HashMap::new();
        first.insert("email".to_string(), "a@b.co".to_string());
        state.merge(&first);

        let mut second = HashMap::new();
        second.insert("email".to_string(), "c@d.co".to_string());
        second.insert("excitement".to_string(), "speed".to_string());
        state.merge(&second);

        assert_eq!(state.collected.len(), 2);
        assert_eq!(state.collected["email"], "c@d.co");
    }

    #[test]
    fn default_is_idle_and_empty() {
        let state = FlowState::default();
        assert_eq!(state.phase, FlowPhase::Idle);
        assert!(state.collected.is_empty());
        assert_eq!(state.total_elapsed_ms(), 0);
    }

    #[test]
    fn serialized_state_omits_timers() {
        let state = FlowState::opened(0, None);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["phase"], "active");
        assert!(json.get("started_at").is_none());
    }
}
