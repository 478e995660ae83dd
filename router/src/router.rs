use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use cde_core::agents::{AgentAvailability, AgentDescriptor, SelectionPolicy};
use cde_core::circuit_breaker::{BreakerKey, BreakerRegistry};
use cde_core::classifier::Classification;
use cde_core::error::{AttemptFailure, CdeError, Result};

use crate::cancel::CancelToken;
use crate::progress::{ProgressObserver, ProgressReporter};
use crate::transport::{AgentOutcome, AgentTransport, ExecutionRequest};

/// Router tuning knobs
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Default total budget when the request does not carry one
    pub default_timeout: Duration,
    /// How long a cancelled agent gets to wind down before being abandoned
    pub cancel_grace: Duration,
    /// Minimum spacing of progress events
    pub heartbeat_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(1800),
            cancel_grace: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

/// Successful routing result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterOutcome {
    pub agent_id: String,
    pub output: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Failures of earlier candidates, in attempt order
    #[serde(default)]
    pub attempts: Vec<AttemptFailure>,
}

/// One entry of the agent listing exposed to callers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentListing {
    #[serde(flatten)]
    pub descriptor: AgentDescriptor,
    pub availability: AgentAvailability,
}

/// Agent routing engine.
///
/// Per call the router moves through selection → probing → execution, with
/// fallback to the next distinct available candidate on non-recoverable
/// agent failure. The per-call timeout bounds the whole operation
/// including fallback; each attempt receives the remaining budget.
/// Per-agent circuit breakers short-circuit known-bad agents out of
/// selection entirely.
///
/// Progress reporting goes to the observer supplied at construction;
/// delivery is best-effort and never blocks or fails a call.
pub struct AgentRouter {
    transports: Vec<Box<dyn AgentTransport>>,
    breakers: Arc<BreakerRegistry>,
    observer: Box<dyn ProgressObserver>,
    config: RouterConfig,
}

impl AgentRouter {
    pub fn new(
        transports: Vec<Box<dyn AgentTransport>>,
        breakers: Arc<BreakerRegistry>,
        observer: Box<dyn ProgressObserver>,
        config: RouterConfig,
    ) -> Self {
        Self {
            transports,
            breakers,
            observer,
            config,
        }
    }

    fn breaker_key(agent_id: &str) -> BreakerKey {
        (agent_id.to_string(), "transport".to_string())
    }

    /// Descriptors plus fresh availability for every registered agent
    pub async fn list_agents(&self) -> Vec<AgentListing> {
        let mut listings = Vec::with_capacity(self.transports.len());
        for transport in &self.transports {
            let descriptor = transport.descriptor().clone();
            let availability = self.availability_of(transport.as_ref()).await;
            listings.push(AgentListing {
                descriptor,
                availability,
            });
        }
        listings
    }

    /// Select the agent the policy would use for `classification`, without
    /// executing anything.
    pub async fn select(&self, classification: &Classification) -> Result<AgentDescriptor> {
        let (descriptors, availability) = self.probe_registry().await;
        let candidates =
            SelectionPolicy::candidates(classification, &descriptors, &availability)?;
        Ok(candidates.into_iter().next().expect("non-empty candidates"))
    }

    async fn availability_of(&self, transport: &dyn AgentTransport) -> AgentAvailability {
        let agent_id = transport.descriptor().agent_id.clone();
        // An open breaker removes the agent from selection without a probe
        if !self.breakers.can_attempt(&Self::breaker_key(&agent_id)) {
            return AgentAvailability::down(agent_id, "Circuit breaker open");
        }
        transport.probe().await
    }

    async fn probe_registry(&self) -> (Vec<AgentDescriptor>, Vec<AgentAvailability>) {
        let mut descriptors = Vec::with_capacity(self.transports.len());
        let mut availability = Vec::with_capacity(self.transports.len());
        for transport in &self.transports {
            descriptors.push(transport.descriptor().clone());
            availability.push(self.availability_of(transport.as_ref()).await);
        }
        (descriptors, availability)
    }

    /// Route one request: select, execute, and fall back across the
    /// candidate chain until success, exhaustion, cancellation, or a
    /// non-recoverable error.
    pub async fn route(
        &self,
        classification: &Classification,
        request: &ExecutionRequest,
        cancel: &CancelToken,
    ) -> Result<RouterOutcome> {
        self.route_with_preference(classification, request, None, cancel)
            .await
    }

    /// [`AgentRouter::route`] with an optional preferred agent, which is
    /// tried first when it is eligible; the policy chain follows as
    /// fallback.
    pub async fn route_with_preference(
        &self,
        classification: &Classification,
        request: &ExecutionRequest,
        preferred: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<RouterOutcome> {
        let (descriptors, availability) = self.probe_registry().await;
        let mut candidates =
            SelectionPolicy::candidates(classification, &descriptors, &availability)?;
        if let Some(preferred) = preferred {
            if let Some(position) = candidates.iter().position(|c| c.agent_id == preferred) {
                let chosen = candidates.remove(position);
                candidates.insert(0, chosen);
            }
        }

        let reporter = ProgressReporter::new(self.observer.as_ref(), self.config.heartbeat_interval);
        let deadline = Instant::now() + request.context.timeout;
        let mut failures: Vec<AttemptFailure> = Vec::new();

        for candidate in &candidates {
            if cancel.is_cancelled() {
                return Err(CdeError::Cancelled("Routing cancelled by caller".to_string()));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let key = Self::breaker_key(&candidate.agent_id);
            if let Err(e) = self.breakers.check(&key) {
                failures.push(AttemptFailure {
                    agent_id: candidate.agent_id.clone(),
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
                continue;
            }

            let transport = self
                .transports
                .iter()
                .find(|t| t.descriptor().agent_id == candidate.agent_id)
                .ok_or_else(|| {
                    CdeError::Internal(format!(
                        "Selected agent '{}' has no transport",
                        candidate.agent_id
                    ))
                })?;

            info!(agent = %candidate.agent_id, budget_s = remaining.as_secs(), "Executing agent attempt");
            reporter.begin_attempt();
            reporter.report(
                &request.phase_key,
                0.0,
                &format!("executing with agent '{}'", candidate.agent_id),
            );

            match self
                .run_attempt(transport.as_ref(), request, &reporter, cancel, remaining)
                .await
            {
                Ok(outcome) => {
                    self.breakers.record_success(&key);
                    reporter.report(&request.phase_key, 1.0, "agent attempt succeeded");
                    return Ok(RouterOutcome {
                        agent_id: outcome.agent_id,
                        output: outcome.output,
                        metadata: outcome.metadata,
                        attempts: failures,
                    });
                }
                Err(AttemptEnd::CallerCancelled) => {
                    return Err(CdeError::Cancelled(
                        "Routing cancelled by caller".to_string(),
                    ));
                }
                Err(AttemptEnd::BudgetExhausted) => {
                    self.breakers.record_failure(&key);
                    failures.push(AttemptFailure {
                        agent_id: candidate.agent_id.clone(),
                        code: "E400".to_string(),
                        message: "Attempt exhausted the remaining routing budget".to_string(),
                    });
                    // Next loop iteration observes the spent budget and ends
                    continue;
                }
                Err(AttemptEnd::Failed(e)) => {
                    warn!(agent = %candidate.agent_id, error = %e, "Agent attempt failed");
                    self.breakers.record_failure(&key);
                    failures.push(AttemptFailure {
                        agent_id: candidate.agent_id.clone(),
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                    if e.triggers_fallback() {
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        if failures.is_empty() {
            Err(CdeError::Cancelled(
                "Routing deadline elapsed before any attempt ran".to_string(),
            ))
        } else {
            Err(CdeError::Exhausted { failures })
        }
    }

    async fn run_attempt(
        &self,
        transport: &dyn AgentTransport,
        request: &ExecutionRequest,
        reporter: &ProgressReporter<'_>,
        cancel: &CancelToken,
        budget: Duration,
    ) -> std::result::Result<AgentOutcome, AttemptEnd> {
        let attempt_cancel = CancelToken::new();
        let execution = transport.execute(request, reporter, &attempt_cancel);
        tokio::pin!(execution);

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await; // first tick is immediate; skip it

        let attempt_deadline = tokio::time::Instant::now() + budget;

        loop {
            tokio::select! {
                result = &mut execution => {
                    return result.map_err(AttemptEnd::Failed);
                }
                _ = cancel.cancelled() => {
                    attempt_cancel.cancel();
                    // Grace period for the transport to wind down
                    let _ = tokio::time::timeout(self.config.cancel_grace, &mut execution).await;
                    return Err(AttemptEnd::CallerCancelled);
                }
                _ = tokio::time::sleep_until(attempt_deadline) => {
                    attempt_cancel.cancel();
                    let _ = tokio::time::timeout(self.config.cancel_grace, &mut execution).await;
                    return Err(AttemptEnd::BudgetExhausted);
                }
                _ = heartbeat.tick() => {
                    reporter.heartbeat(&request.phase_key, "agent attempt in progress");
                }
            }
        }
    }
}

/// Why one attempt ended without a result
enum AttemptEnd {
    Failed(CdeError),
    CallerCancelled,
    BudgetExhausted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cde_core::agents::builtin_agents;
    use cde_core::classifier::TaskClassifier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::progress::NoopObserver;
    use crate::transport::ExecutionContext;

    enum Behavior {
        Succeed(&'static str),
        Fail(CdeError),
        Hang,
    }

    struct Scripted {
        descriptor: AgentDescriptor,
        available: bool,
        behaviors: Mutex<Vec<Behavior>>,
        invocations: AtomicUsize,
    }

    impl Scripted {
        fn new(agent_id: &str, available: bool, behaviors: Vec<Behavior>) -> Self {
            let descriptor = builtin_agents()
                .into_iter()
                .find(|a| a.agent_id == agent_id)
                .unwrap_or_else(|| panic!("unknown agent {agent_id}"));
            Self {
                descriptor,
                available,
                behaviors: Mutex::new(behaviors),
                invocations: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AgentTransport for Scripted {
        fn descriptor(&self) -> &AgentDescriptor {
            &self.descriptor
        }

        async fn probe(&self) -> AgentAvailability {
            if self.available {
                AgentAvailability::up(self.descriptor.agent_id.clone())
            } else {
                AgentAvailability::down(self.descriptor.agent_id.clone(), "scripted down")
            }
        }

        async fn execute(
            &self,
            _request: &ExecutionRequest,
            progress: &ProgressReporter<'_>,
            cancel: &CancelToken,
        ) -> Result<AgentOutcome> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            let behavior = {
                let mut behaviors = self.behaviors.lock().unwrap();
                if behaviors.is_empty() {
                    Behavior::Succeed("default")
                } else {
                    behaviors.remove(0)
                }
            };
            match behavior {
                Behavior::Succeed(output) => {
                    progress.report("phase", 0.5, "halfway");
                    Ok(AgentOutcome {
                        agent_id: self.descriptor.agent_id.clone(),
                        output: output.to_string(),
                        metadata: BTreeMap::new(),
                    })
                }
                Behavior::Fail(e) => Err(e),
                Behavior::Hang => {
                    cancel.cancelled().await;
                    Err(CdeError::Cancelled("scripted hang cancelled".to_string()))
                }
            }
        }
    }

    fn router(transports: Vec<Box<dyn AgentTransport>>) -> AgentRouter {
        AgentRouter::new(
            transports,
            Arc::new(BreakerRegistry::new(3, Duration::from_secs(60))),
            Box::new(NoopObserver),
            RouterConfig {
                default_timeout: Duration::from_secs(5),
                cancel_grace: Duration::from_millis(100),
                heartbeat_interval: Duration::from_millis(50),
            },
        )
    }

    fn request(timeout: Duration) -> ExecutionRequest {
        ExecutionRequest {
            prompt: "do the thing".to_string(),
            phase_key: "implement".to_string(),
            context: ExecutionContext {
                timeout,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_single_cli_agent_succeeds() {
        let router = router(vec![Box::new(Scripted::new(
            "gemini",
            true,
            vec![Behavior::Succeed("fixed the typo")],
        ))]);
        let classification = TaskClassifier::classify("Fix typo in README");
        let outcome = router
            .route(
                &classification,
                &request(Duration::from_secs(5)),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.agent_id, "gemini");
        assert_eq!(outcome.output, "fixed the typo");
        assert!(outcome.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_after_transport_failure() {
        let jules = Scripted::new(
            "jules",
            true,
            vec![Behavior::Fail(CdeError::transport("jules", "api 500"))],
        );
        let deepagents = Scripted::new("deepagents", true, vec![Behavior::Succeed("done")]);
        let router = router(vec![Box::new(jules), Box::new(deepagents)]);

        let classification =
            TaskClassifier::classify("Rewrite entire system using microservices architecture");
        let outcome = router
            .route(
                &classification,
                &request(Duration::from_secs(5)),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.agent_id, "deepagents");
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].agent_id, "jules");
        assert_eq!(outcome.attempts[0].code, "E500");
    }

    #[tokio::test]
    async fn test_exhausted_collects_ordered_failures() {
        let router = router(vec![
            Box::new(Scripted::new(
                "gemini",
                true,
                vec![Behavior::Fail(CdeError::transport("gemini", "boom 1"))],
            )),
            Box::new(Scripted::new(
                "qwen",
                true,
                vec![Behavior::Fail(CdeError::transport("qwen", "boom 2"))],
            )),
        ]);
        let classification = TaskClassifier::classify("add a log line");
        let err = router
            .route(
                &classification,
                &request(Duration::from_secs(5)),
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            CdeError::Exhausted { failures } => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].agent_id, "gemini");
                assert_eq!(failures[1].agent_id, "qwen");
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_plan_approval_capability_unavailable() {
        let router = router(vec![Box::new(Scripted::new("gemini", true, vec![]))]);
        let mut classification = TaskClassifier::classify("Refactor auth");
        classification.required_capabilities.plan_approval = true;
        let err = router
            .route(
                &classification,
                &request(Duration::from_secs(5)),
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CdeError::CapabilityUnavailable(_)));
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold_and_skips_agent() {
        let gemini = Scripted::new(
            "gemini",
            true,
            vec![
                Behavior::Fail(CdeError::transport("gemini", "f1")),
                Behavior::Fail(CdeError::transport("gemini", "f2")),
                Behavior::Fail(CdeError::transport("gemini", "f3")),
                Behavior::Succeed("never reached"),
            ],
        );
        let router = AgentRouter::new(
            vec![Box::new(gemini)],
            Arc::new(BreakerRegistry::new(3, Duration::from_secs(600))),
            Box::new(NoopObserver),
            RouterConfig::default(),
        );
        let classification = TaskClassifier::classify("add a log line");

        for _ in 0..3 {
            let err = router
                .route(
                    &classification,
                    &request(Duration::from_secs(5)),
                    &CancelToken::new(),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, CdeError::Exhausted { .. }));
        }

        // Fourth call: breaker is open, agent is skipped without invocation
        let err = router
            .route(
                &classification,
                &request(Duration::from_secs(5)),
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CdeError::Unavailable(_)));

        // The breaker also shows up in the listing
        let listings = router.list_agents().await;
        assert!(!listings[0].availability.available);
        assert_eq!(
            listings[0].availability.reason.as_deref(),
            Some("Circuit breaker open")
        );
    }

    #[tokio::test]
    async fn test_cancellation_yields_cancelled() {
        let router = router(vec![Box::new(Scripted::new(
            "gemini",
            true,
            vec![Behavior::Hang],
        ))]);
        let classification = TaskClassifier::classify("add a log line");
        let cancel = CancelToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = router
            .route(&classification, &request(Duration::from_secs(30)), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_timeout_ends_call() {
        let router = router(vec![Box::new(Scripted::new(
            "gemini",
            true,
            vec![Behavior::Hang],
        ))]);
        let classification = TaskClassifier::classify("add a log line");
        let started = Instant::now();
        let err = router
            .route(
                &classification,
                &request(Duration::from_millis(100)),
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(err, CdeError::Exhausted { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_unavailable_agents_are_not_selected() {
        let down = Scripted::new("jules", false, vec![]);
        let up = Scripted::new("gemini", true, vec![Behavior::Succeed("ok")]);
        let router = router(vec![Box::new(down), Box::new(up)]);
        let classification = TaskClassifier::classify("add a log line");
        let outcome = router
            .route(
                &classification,
                &request(Duration::from_secs(5)),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.agent_id, "gemini");
    }

    #[tokio::test]
    async fn test_select_returns_primary_without_executing() {
        let router = router(vec![Box::new(Scripted::new("gemini", true, vec![]))]);
        let classification = TaskClassifier::classify("add a log line");
        let selected = router.select(&classification).await.unwrap();
        assert_eq!(selected.agent_id, "gemini");
    }
}
