//! Registry of open flow instances.
//!
//! Every visitor gets their own controller; the registry only maps flow ids
//! to controllers and named templates to sequences. Instances nobody closes
//! are swept once idle for the configured TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::analytics::AnalyticsSink;
use crate::config::FlowConfig;
use crate::error::RegistryError;
use crate::flow::{
    CloseOutcome, CloseReason, FlowPhase, FlowState, SignupFlowController, StepSequence,
    SuccessHook,
};

/// Upper bound on how often the background sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
use crate::sink::SubmissionSink;

#[derive(Debug, Clone)]
struct FlowTemplate {
    sequence: Arc<StepSequence>,
    config: FlowConfig,
}

pub struct FlowRegistry {
    templates: HashMap<String, FlowTemplate>,
    default_flow: Option<String>,
    sink: Arc<dyn SubmissionSink>,
    analytics: Arc<dyn AnalyticsSink>,
    on_success: Option<SuccessHook>,
    flows: RwLock<HashMap<Uuid, Arc<SignupFlowController>>>,
}

impl FlowRegistry {
    pub fn new(sink: Arc<dyn SubmissionSink>, analytics: Arc<dyn AnalyticsSink>) -> Self {
        Self {
            templates: HashMap::new(),
            default_flow: None,
            sink,
            analytics,
            on_success: None,
            flows: RwLock::new(HashMap::new()),
        }
    }

    /// Register a named flow. The first one registered is the default.
    pub fn with_flow(mut self, name: impl Into<String>, sequence: StepSequence, config: FlowConfig) -> Self {
        let name = name.into();
        if self.default_flow.is_none() {
            self.default_flow = Some(name.clone());
        }
        self.templates.insert(
            name,
            FlowTemplate {
                sequence: Arc::new(sequence),
                config,
            },
        );
        self
    }

    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default_flow = Some(name.into());
        self
    }

    /// Hook run by every controller on successful persistence.
    pub fn with_success_hook(mut self, hook: SuccessHook) -> Self {
        self.on_success = Some(hook);
        self
    }

    pub fn flow_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Start a new instance of `flow` (or the default flow).
    pub async fn open(
        &self,
        flow: Option<&str>,
        seed_email: Option<&str>,
    ) -> Result<(Arc<SignupFlowController>, FlowState), RegistryError> {
        let name = flow
            .or(self.default_flow.as_deref())
            .ok_or_else(|| RegistryError::UnknownFlow(String::new()))?;
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| RegistryError::UnknownFlow(name.to_string()))?;

        let mut controller = SignupFlowController::new(
            Arc::clone(&template.sequence),
            template.config.clone(),
            Arc::clone(&self.sink),
            Arc::clone(&self.analytics),
        );
        if let Some(hook) = &self.on_success {
            controller = controller.with_success_hook(Arc::clone(hook));
        }
        let controller = Arc::new(controller);
        let state = controller.open(seed_email).await?;

        self.flows
            .write()
            .await
            .insert(state.flow_id, Arc::clone(&controller));
        info!(flow_id = %state.flow_id, flow = name, "Flow instance registered");
        Ok((controller, state))
    }

    pub async fn get(&self, flow_id: Uuid) -> Option<Arc<SignupFlowController>> {
        self.flows.read().await.get(&flow_id).cloned()
    }

    pub async fn remove(&self, flow_id: Uuid) -> Option<Arc<SignupFlowController>> {
        let removed = self.flows.write().await.remove(&flow_id);
        if removed.is_some() {
            debug!(flow_id = %flow_id, "Flow instance removed");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.flows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.flows.read().await.is_empty()
    }

    /// Close and drop every instance idle for at least `ttl`.
    ///
    /// Succeeded flows close with `CloseReason::Success`; anything else
    /// counts as the visitor walking away. Instances mid-submission are
    /// left for the next pass. Returns the number removed.
    pub async fn sweep(&self, ttl: Duration) -> usize {
        let candidates: Vec<(Uuid, Arc<SignupFlowController>)> = self
            .flows
            .read()
            .await
            .iter()
            .map(|(id, c)| (*id, Arc::clone(c)))
            .collect();

        let mut removed = 0;
        for (flow_id, controller) in candidates {
            let state = controller.snapshot().await;
            if state.phase == FlowPhase::Submitting || state.idle_for() < ttl {
                continue;
            }
            let reason = if state.phase == FlowPhase::Succeeded {
                CloseReason::Success
            } else {
                CloseReason::User
            };
            if let CloseOutcome::Closed { abandoned } = controller.close(reason).await {
                self.flows.write().await.remove(&flow_id);
                debug!(flow_id = %flow_id, abandoned, "Idle flow instance expired");
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, ttl_secs = ttl.as_secs(), "Swept idle flow instances");
        }
        removed
    }
}

/// Spawn a background task that periodically sweeps idle instances.
pub fn spawn_sweep_task(registry: Arc<FlowRegistry>, ttl: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ttl.min(SWEEP_INTERVAL));
        loop {
            interval.tick().await;
            registry.sweep(ttl).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Values;

    use async_trait::async_trait;

    use crate::analytics::TracingAnalytics;
    use crate::error::PersistenceError;
    use crate::flow::presets;
    use crate::sink::{LibSqlSink, SubmissionRecord, SubmissionSink};

    const TTL: Duration = Duration::from_secs(30 * 60);

    struct NullSink;

    #[async_trait]
    impl SubmissionSink for NullSink {
        async fn insert(&self, _c: &str, _r: &SubmissionRecord) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    /// Storage-free registry for tests on a paused clock.
    fn paused_registry() -> FlowRegistry {
        let (pmf, pmf_config) = presets::product_market_fit().unwrap();
        let (waitlist, waitlist_config) = presets::waitlist().unwrap();
        FlowRegistry::new(Arc::new(NullSink), Arc::new(TracingAnalytics))
            .with_flow(presets::PRODUCT_MARKET_FIT, pmf, pmf_config)
            .with_flow(presets::WAITLIST, waitlist, waitlist_config)
    }

    fn email(value: &str) -> Values<String, String> {
        [("email".to_string(), value.to_string())].into()
    }

    async fn registry() -> FlowRegistry {
        let sink = Arc::new(LibSqlSink::new_memory().await.unwrap());
        let (pmf, pmf_config) = presets::product_market_fit().unwrap();
        let (waitlist, waitlist_config) = presets::waitlist().unwrap();
        FlowRegistry::new(sink, Arc::new(TracingAnalytics))
            .with_flow(presets::PRODUCT_MARKET_FIT, pmf, pmf_config)
            .with_flow(presets::WAITLIST, waitlist, waitlist_config)
    }

    #[tokio::test]
    async fn open_uses_default_and_named_flows() {
        let registry = registry().await;
        let (controller, state) = registry.open(None, None).await.unwrap();
        assert_eq!(controller.sequence().len(), 4);
        assert_eq!(state.phase, FlowPhase::Active);

        let (controller, _) = registry.open(Some(presets::WAITLIST), None).await.unwrap();
        assert_eq!(controller.config().collection, "waitlist");
        assert_eq!(registry.len().await, 2);
        assert_eq!(registry.flow_names(), vec!["product_market_fit", "waitlist"]);
    }

    #[tokio::test]
    async fn unknown_flow_is_rejected() {
        let registry = registry().await;
        let err = registry.open(Some("newsletter"), None).await.err().unwrap();
        assert_eq!(err, RegistryError::UnknownFlow("newsletter".to_string()));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn instances_are_isolated() {
        let registry = registry().await;
        let (a, a_state) = registry.open(None, None).await.unwrap();
        let (_, b_state) = registry.open(None, None).await.unwrap();
        assert_ne!(a_state.flow_id, b_state.flow_id);

        let values: Values<String, String> =
            [("email".to_string(), "ada@example.com".to_string())].into();
        a.submit_step(values).await.unwrap();

        let b = registry.get(b_state.flow_id).await.unwrap();
        let b_snapshot = b.snapshot().await;
        assert_eq!(b_snapshot.current_step_index, 0);
        assert!(b_snapshot.collected.is_empty());

        assert!(registry.remove(a_state.flow_id).await.is_some());
        assert!(registry.get(a_state.flow_id).await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_expires_only_idle_instances() {
        let registry = paused_registry();
        let (active, active_state) = registry.open(None, None).await.unwrap();
        let (done, done_state) = registry.open(Some(presets::WAITLIST), None).await.unwrap();
        done.submit_step(email("grace@example.com")).await.unwrap();
        assert_eq!(done.snapshot().await.phase, FlowPhase::Succeeded);

        tokio::time::advance(Duration::from_secs(20 * 60)).await;
        active.submit_step(email("ada@example.com")).await.unwrap();
        tokio::time::advance(Duration::from_secs(11 * 60)).await;

        assert_eq!(registry.sweep(TTL).await, 1);
        assert!(registry.get(done_state.flow_id).await.is_none());
        assert_eq!(done.snapshot().await.phase, FlowPhase::Idle);

        let kept = registry.get(active_state.flow_id).await.unwrap();
        assert_eq!(kept.snapshot().await.current_step_index, 1);
        assert_eq!(registry.sweep(TTL).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_task_runs_in_background() {
        let registry = Arc::new(paused_registry());
        registry.open(None, Some("ada@example.com")).await.unwrap();
        registry.open(Some(presets::WAITLIST), None).await.unwrap();
        assert_eq!(registry.len().await, 2);

        let task = spawn_sweep_task(Arc::clone(&registry), TTL);
        tokio::time::sleep(TTL + SWEEP_INTERVAL * 3).await;
        assert!(registry.is_empty().await);
        task.abort();
    }
}
