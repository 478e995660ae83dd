//! Tool-surface integration tests over scripted transports.

use std::time::Duration;

use serde_json::json;

use cde_core::error::CdeError;
use mcp_server::{Config, ToolServer};
use mocks::{artifact_complete_transport, Behavior, ProjectFixture, ScriptedTransport};
use router::AgentTransport;

fn server_with(transports: Vec<Box<dyn AgentTransport>>) -> ToolServer {
    let mut config = Config::default();
    // Keep routing snappy in tests
    config.router.default_timeout_s = 5;
    config.router.cancel_grace_s = 1;
    ToolServer::with_transports(config, Some(transports)).unwrap()
}

#[tokio::test]
async fn scan_reports_orphans_missing_metadata_and_locations() {
    let fixture = ProjectFixture::empty();
    fixture.write("README.md", "---\ntitle: ok\n---\n# hi\n");
    fixture.write("RESUMEN-FOO.md", "orphan without frontmatter\n");
    fixture.write("specs/features/x.md", "---\nid: x\n---\nspec\n");

    let server = server_with(vec![]);
    let response = server
        .handle(
            "scan_documentation",
            &json!({"path": fixture.path(), "detail": "full"}),
        )
        .await;

    assert_eq!(response["status"], "success");
    assert_eq!(response["total"], 3);
    assert_eq!(response["orphaned"], json!(["RESUMEN-FOO.md"]));
    assert_eq!(response["missing_metadata"], json!(["RESUMEN-FOO.md"]));
    assert!(response["by_location"]["specs/features"].is_array());
}

#[tokio::test]
async fn analyse_documentation_reports_broken_links() {
    let fixture = ProjectFixture::documented();
    fixture.write("docs/bad.md", "[gone](missing/file.md)\n");

    let server = server_with(vec![]);
    let response = server
        .handle("analyse_documentation", &json!({"path": fixture.path()}))
        .await;

    assert_eq!(response["status"], "success");
    let broken = response["links"]["broken"].as_array().unwrap();
    assert_eq!(broken.len(), 1);
    assert_eq!(broken[0]["source"], "docs/bad.md");
}

#[tokio::test]
async fn execute_with_best_agent_uses_cli_agent() {
    let transport = ScriptedTransport::new(
        "gemini",
        vec![Behavior::Succeed("typo fixed".to_string())],
    );
    let server = server_with(vec![Box::new(transport)]);

    let response = server
        .handle(
            "execute_with_best_agent",
            &json!({"task": "Fix typo in README"}),
        )
        .await;

    assert_eq!(response["status"], "success");
    assert_eq!(response["agent_id"], "gemini");
    assert_eq!(response["output"], "typo fixed");
}

#[tokio::test]
async fn forced_plan_approval_fails_without_capable_agent() {
    let transport = ScriptedTransport::new("gemini", vec![]);
    let server = server_with(vec![Box::new(transport)]);

    let response = server
        .handle(
            "execute_with_best_agent",
            &json!({
                "task": "Refactor authentication module to use OAuth2",
                "require_plan_approval": true,
            }),
        )
        .await;

    assert_eq!(response["error"], true);
    assert_eq!(
        response["code"],
        CdeError::CapabilityUnavailable(String::new()).code()
    );
}

#[tokio::test]
async fn preferred_agent_is_tried_first() {
    let gemini = ScriptedTransport::new("gemini", vec![]);
    let qwen = ScriptedTransport::new("qwen", vec![Behavior::Succeed("from qwen".to_string())]);
    let server = server_with(vec![Box::new(gemini), Box::new(qwen)]);

    let response = server
        .handle(
            "execute_with_best_agent",
            &json!({"task": "add a log line", "preferred": "qwen"}),
        )
        .await;

    assert_eq!(response["agent_id"], "qwen");
    assert_eq!(response["output"], "from qwen");
}

#[tokio::test]
async fn delegated_feature_completes_in_background() {
    let fixture = ProjectFixture::rust_cli();
    let server = server_with(vec![Box::new(artifact_complete_transport("gemini"))]);

    let accepted = server
        .handle(
            "delegate_task",
            &json!({
                "description": "Fix typo in README",
                "type": "feature",
                "path": fixture.path(),
            }),
        )
        .await;
    assert_eq!(accepted["status"], "accepted");
    let task_id = accepted["task_id"].as_str().unwrap().to_string();

    // Poll until the background run settles
    let mut status = String::new();
    for _ in 0..100 {
        let response = server
            .handle("get_task_status", &json!({"id": task_id}))
            .await;
        status = response["task"]["status"].as_str().unwrap().to_string();
        if status != "running" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(status, "completed");
}

#[tokio::test]
async fn cancel_task_propagates_to_running_agent() {
    let fixture = ProjectFixture::rust_cli();
    let transport = ScriptedTransport::new("gemini", vec![Behavior::Hang]);
    let server = server_with(vec![Box::new(transport)]);

    let accepted = server
        .handle(
            "delegate_task",
            &json!({
                "description": "long running analysis",
                "type": "execute",
                "path": fixture.path(),
            }),
        )
        .await;
    let task_id = accepted["task_id"].as_str().unwrap().to_string();

    // Let the background task actually start
    tokio::time::sleep(Duration::from_millis(100)).await;

    let cancelled = server
        .handle("cancel_task", &json!({"id": task_id}))
        .await;
    assert_eq!(cancelled["status"], "success");
    assert_eq!(cancelled["task"]["status"], "cancelled");

    // The running work observed the token; the record stays cancelled
    tokio::time::sleep(Duration::from_millis(200)).await;
    let response = server
        .handle("get_task_status", &json!({"id": task_id}))
        .await;
    assert_eq!(response["task"]["status"], "cancelled");

    let active = server.handle("list_active_tasks", &json!({})).await;
    assert_eq!(active["tasks"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn onboarding_project_builds_context() {
    let fixture = ProjectFixture::rust_cli();
    let server = server_with(vec![]);

    let response = server
        .handle("onboarding_project", &json!({"path": fixture.path()}))
        .await;

    assert_eq!(response["status"], "success");
    assert_eq!(response["project"]["status"], "onboarding");
    assert_eq!(response["context"]["project_type"], "cli");
}

#[tokio::test]
async fn create_specification_writes_frontmatter() {
    let fixture = ProjectFixture::empty();
    let server = server_with(vec![]);

    let response = server
        .handle(
            "create_specification",
            &json!({
                "path": fixture.path(),
                "feature_name": "OAuth Login",
                "description": "Allow signing in with OAuth2 providers",
                "author": "dev",
            }),
        )
        .await;

    assert_eq!(response["status"], "success");
    assert_eq!(response["slug"], "oauth-login");
    let written = fixture.path().join("specs/features/oauth-login.md");
    let content = std::fs::read_to_string(written).unwrap();
    assert!(content.starts_with("---\n"));
    assert!(content.contains("title: OAuth Login"));
    assert!(content.contains("status: draft"));
}

#[tokio::test]
async fn publish_onboarding_requires_approval() {
    let fixture = ProjectFixture::empty();
    let server = server_with(vec![]);
    let documents = json!([{"path": "docs/overview.md", "content": "# Overview\n"}]);

    let pending = server
        .handle(
            "publish_onboarding",
            &json!({"path": fixture.path(), "documents": documents.clone(), "approve": false}),
        )
        .await;
    assert_eq!(pending["status"], "pending_approval");
    assert!(!fixture.path().join("docs/overview.md").exists());

    let published = server
        .handle(
            "publish_onboarding",
            &json!({"path": fixture.path(), "documents": documents, "approve": true}),
        )
        .await;
    assert_eq!(published["status"], "success");
    assert_eq!(published["project_status"], "active");
    assert!(fixture.path().join("docs/overview.md").exists());
}
