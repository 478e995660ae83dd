//! Line-based stdio transport for the tool surface.
//!
//! One JSON object per line: `{"id": 1, "tool": "health_check",
//! "arguments": {}}` in, `{"id": 1, "result": {...}}` out. Malformed lines
//! produce an error object with a null id. The richer MCP handshake lives
//! in the host process; this loop only carries tool calls.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use crate::tools::ToolServer;

pub struct StdioServer {
    tools: ToolServer,
}

impl StdioServer {
    pub fn new(tools: ToolServer) -> Self {
        Self { tools }
    }

    /// Serve tool calls from stdin until EOF
    pub async fn serve(self) -> Result<()> {
        info!("Serving tool calls over stdio");

        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    info!("stdin closed; shutting down");
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    debug!(line = trimmed, "Received tool call");

                    let response = self.process_line(trimmed).await;
                    let serialised = serde_json::to_string(&response)
                        .context("Failed to serialize tool response")?;
                    stdout
                        .write_all(serialised.as_bytes())
                        .await
                        .context("Failed to write response")?;
                    stdout.write_all(b"\n").await.context("Failed to write newline")?;
                    stdout.flush().await.context("Failed to flush stdout")?;
                }
                Err(e) => {
                    error!(error = %e, "Error reading stdin");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn process_line(&self, line: &str) -> Value {
        let request: Value = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                return json!({
                    "id": Value::Null,
                    "error": {
                        "error": true,
                        "message": format!("Malformed request: {e}"),
                        "recoverable": true,
                        "code": "E100",
                    },
                });
            }
        };

        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let tool = match request.get("tool").and_then(|t| t.as_str()) {
            Some(tool) => tool,
            None => {
                return json!({
                    "id": id,
                    "error": {
                        "error": true,
                        "message": "Request missing 'tool'",
                        "recoverable": true,
                        "code": "E100",
                    },
                });
            }
        };
        let default_args = json!({});
        let arguments = request.get("arguments").unwrap_or(&default_args);

        let result = self.tools.handle(tool, arguments).await;
        json!({ "id": id, "result": result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn server() -> StdioServer {
        StdioServer::new(ToolServer::new(Config::default()).unwrap())
    }

    #[tokio::test]
    async fn test_malformed_line() {
        let response = server().process_line("not json").await;
        assert_eq!(response["id"], Value::Null);
        assert_eq!(response["error"]["code"], "E100");
    }

    #[tokio::test]
    async fn test_missing_tool_field() {
        let response = server().process_line(r#"{"id": 7}"#).await;
        assert_eq!(response["id"], 7);
        assert_eq!(response["error"]["code"], "E100");
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let response = server()
            .process_line(r#"{"id": 1, "tool": "health_check", "arguments": {}}"#)
            .await;
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["status"], "healthy");
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_in_result() {
        let response = server()
            .process_line(r#"{"id": 2, "tool": "nope"}"#)
            .await;
        assert_eq!(response["result"]["code"], "E200");
    }
}
