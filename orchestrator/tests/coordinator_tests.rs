//! End-to-end coordinator tests over scripted transports.

use std::sync::Arc;
use std::time::Duration;

use cde_core::circuit_breaker::BreakerRegistry;
use cde_core::error::CdeError;
use cde_core::models::FeatureStatus;
use cde_core::workflow::Workflow;
use mocks::{artifact_complete_transport, Behavior, ProjectFixture, ScriptedTransport};
use orchestrator::{CoordinatorConfig, WorkflowCoordinator};
use router::{AgentRouter, AgentTransport, CancelToken, NoopObserver, RouterConfig};
use scanner::ScannerConfig;
use store::StateStore;

fn coordinator(transports: Vec<Box<dyn AgentTransport>>) -> (WorkflowCoordinator, Arc<StateStore>) {
    let state = Arc::new(StateStore::default());
    let router = Arc::new(AgentRouter::new(
        transports,
        Arc::new(BreakerRegistry::new(3, Duration::from_secs(60))),
        Box::new(NoopObserver),
        RouterConfig {
            default_timeout: Duration::from_secs(5),
            cancel_grace: Duration::from_millis(100),
            heartbeat_interval: Duration::from_millis(50),
        },
    ));
    let coordinator = WorkflowCoordinator::new(
        state.clone(),
        router,
        Workflow::standard(),
        CoordinatorConfig {
            max_phase_retries: 1,
            phase_timeout: Duration::from_secs(5),
        },
        ScannerConfig::default(),
    );
    (coordinator, state)
}

#[tokio::test]
async fn quick_fix_feature_completes_with_single_cli_agent() {
    let fixture = ProjectFixture::rust_cli();
    let transport = artifact_complete_transport("gemini");
    let (coordinator, state) = coordinator(vec![Box::new(transport)]);

    let outcome = coordinator
        .run_feature(fixture.path(), "Fix typo in README", &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, FeatureStatus::Completed);
    assert_eq!(outcome.phases_run, vec!["implement", "test"]);
    assert_eq!(
        outcome.phases_skipped,
        vec!["define", "decompose", "design", "review"]
    );
    assert_eq!(outcome.agents_used["implement"], "gemini");

    // Durable state reflects the run
    let project = state.get_by_path(fixture.path()).unwrap().unwrap();
    let feature = project.feature(&outcome.feature_id).unwrap();
    assert_eq!(feature.status, FeatureStatus::Completed);
    assert!(feature.has_artifacts_for("implement"));
    assert!(feature.has_artifacts_for("test"));
    assert!(!feature.has_artifacts_for("define"));
}

#[tokio::test]
async fn exhausted_router_fails_feature_and_keeps_partial_artifacts() {
    let fixture = ProjectFixture::rust_cli();
    let artifact_json = r#"{"code_changes": "diff", "files_modified": ["a.rs"]}"#;
    let transport = ScriptedTransport::new(
        "gemini",
        vec![
            Behavior::Succeed(artifact_json.to_string()),
            Behavior::Fail(CdeError::transport("gemini", "agent crashed")),
        ],
    );
    let (coordinator, state) = coordinator(vec![Box::new(transport)]);

    let err = coordinator
        .run_feature(fixture.path(), "Fix typo in README", &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CdeError::Exhausted { .. }));

    let project = state.get_by_path(fixture.path()).unwrap().unwrap();
    let feature = &project.features[0];
    assert_eq!(feature.status, FeatureStatus::Failed);
    // The implement phase's artifacts survived the failure in test
    assert!(feature.has_artifacts_for("implement"));
    assert!(!feature.has_artifacts_for("test"));
    assert!(feature.metadata.contains_key("failure"));
}

#[tokio::test]
async fn resumption_skips_phases_with_artifacts() {
    let fixture = ProjectFixture::rust_cli();
    let artifact_json = r#"{"code_changes": "diff", "files_modified": ["a.rs"]}"#;
    let transport = ScriptedTransport::new(
        "gemini",
        vec![
            Behavior::Succeed(artifact_json.to_string()),
            Behavior::Fail(CdeError::transport("gemini", "flaky network")),
        ],
    );
    let counter = transport.invocation_counter();
    let (coordinator, state) = coordinator(vec![Box::new(transport)]);

    let err = coordinator
        .run_feature(fixture.path(), "Fix typo in README", &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CdeError::Exhausted { .. }));
    let failed_invocations = counter.load(std::sync::atomic::Ordering::SeqCst);
    assert_eq!(failed_invocations, 2);

    // The failed feature cannot resume; reset it to non-terminal first,
    // as an operator re-running the phase would.
    let feature_id = {
        let mut project = state.get_by_path(fixture.path()).unwrap().unwrap();
        let id = project.features[0].id;
        project.features[0].status = FeatureStatus::Testing;
        state.save(&mut project).unwrap();
        id
    };

    let outcome = coordinator
        .resume_feature(fixture.path(), &feature_id, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, FeatureStatus::Completed);

    // Only the missing test phase ran again: one more invocation
    assert_eq!(
        counter.load(std::sync::atomic::Ordering::SeqCst),
        failed_invocations + 1
    );
}

#[tokio::test]
async fn resume_rejects_terminal_feature() {
    let fixture = ProjectFixture::rust_cli();
    let (coordinator, state) = coordinator(vec![Box::new(artifact_complete_transport("gemini"))]);

    let outcome = coordinator
        .run_feature(fixture.path(), "Fix typo in README", &CancelToken::new())
        .await
        .unwrap();

    let err = coordinator
        .resume_feature(fixture.path(), &outcome.feature_id, &CancelToken::new())
        .await
        .unwrap_err();
    assert!(err.is_validation());
    let _ = state;
}

#[tokio::test]
async fn cancellation_marks_feature_failed_with_reason() {
    let fixture = ProjectFixture::rust_cli();
    let transport = ScriptedTransport::new("gemini", vec![Behavior::Hang]);
    let (coordinator, state) = coordinator(vec![Box::new(transport)]);

    let cancel = CancelToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let err = coordinator
        .run_feature(fixture.path(), "Fix typo in README", &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());

    let project = state.get_by_path(fixture.path()).unwrap().unwrap();
    let feature = &project.features[0];
    assert_eq!(feature.status, FeatureStatus::Failed);
    assert_eq!(
        feature.metadata["failure_reason"].as_str(),
        Some("cancelled")
    );
}

#[tokio::test]
async fn epic_prompt_runs_every_phase() {
    let fixture = ProjectFixture::rust_cli();
    let (coordinator, _state) =
        coordinator(vec![Box::new(artifact_complete_transport("jules"))]);

    let outcome = coordinator
        .run_feature(
            fixture.path(),
            "Rewrite entire system using microservices architecture",
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, FeatureStatus::Completed);
    assert_eq!(outcome.phases_run.len(), 6);
    assert!(outcome.phases_skipped.is_empty());
    assert!(outcome.agents_used.values().all(|a| a == "jules"));
}
