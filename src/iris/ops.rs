//! Iris tool operations
//!
//! Thin typed wrappers over [`McpClient::call_tool`]. Each one builds the
//! argument object, invokes the named tool, and reshapes the untyped result
//! into a typed record. Tool payloads arrive as JSON text inside the first
//! text content item; an absent content array means the server returned the
//! payload directly.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{McpClientError, Result};
use crate::mcp::types::ToolResultContent;
use crate::mcp::McpClient;

use super::types::{DriftReport, InsightAck, ProjectEvaluation, ProjectSummary};

/// Tool names exposed by the Iris server
pub mod tools {
    pub const EVALUATE_PROJECT: &str = "iris_evaluate_project";
    pub const DETECT_DRIFT: &str = "iris_detect_drift";
    pub const LIST_PROJECTS: &str = "iris_list_projects";
    pub const RECORD_INSIGHT: &str = "iris_record_insight";
}

/// Typed access to the Iris project-health tools
#[derive(Clone)]
pub struct IrisTools {
    client: McpClient,
}

impl IrisTools {
    /// Wrap a connected client
    pub fn new(client: McpClient) -> Self {
        Self { client }
    }

    /// The underlying MCP client
    pub fn client(&self) -> &McpClient {
        &self.client
    }

    /// Run a full health evaluation of one project
    pub async fn evaluate_project(&self, project_id: &str) -> Result<ProjectEvaluation> {
        let content = self
            .client
            .call_tool(tools::EVALUATE_PROJECT, json!({ "projectId": project_id }))
            .await?;
        decode_payload(tools::EVALUATE_PROJECT, content)
    }

    /// Check whether a project has drifted from its stated goals
    pub async fn detect_drift(&self, project_id: &str) -> Result<DriftReport> {
        let content = self
            .client
            .call_tool(tools::DETECT_DRIFT, json!({ "projectId": project_id }))
            .await?;
        decode_payload(tools::DETECT_DRIFT, content)
    }

    /// List the projects Iris is tracking
    pub async fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        #[derive(Deserialize, Default)]
        struct ProjectsPayload {
            #[serde(default)]
            projects: Vec<ProjectSummary>,
        }

        let content = self
            .client
            .call_tool(tools::LIST_PROJECTS, json!({}))
            .await?;
        let payload = payload_value(tools::LIST_PROJECTS, content)?;

        // Servers return either a bare array or {"projects": [...]}.
        if payload.is_array() {
            decode_value(tools::LIST_PROJECTS, payload)
        } else {
            let parsed: ProjectsPayload = decode_value(tools::LIST_PROJECTS, payload)?;
            Ok(parsed.projects)
        }
    }

    /// Store a free-form insight against a project
    pub async fn record_insight(&self, project_id: &str, text: &str) -> Result<InsightAck> {
        let content = self
            .client
            .call_tool(
                tools::RECORD_INSIGHT,
                json!({ "projectId": project_id, "text": text }),
            )
            .await?;
        decode_payload(tools::RECORD_INSIGHT, content)
    }
}

/// Extract a tool's JSON payload from the value `call_tool` resolved with.
///
/// When the value is a content array, the payload is the first text item,
/// parsed as JSON. A text item starting with "Error:" is the conventional
/// tool-failure shape and surfaces as `ToolFailed`, as does any payload this
/// façade cannot decode; callers only ever see the documented error set.
fn payload_value(tool: &str, content: Value) -> Result<Value> {
    if !content.is_array() {
        return Ok(content);
    }

    let items: Vec<ToolResultContent> =
        serde_json::from_value(content).map_err(|e| McpClientError::ToolFailed {
            name: tool.to_string(),
            message: format!("malformed result content: {}", e),
        })?;
    let text = items
        .iter()
        .find_map(|item| match item {
            ToolResultContent::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .ok_or_else(|| McpClientError::ToolFailed {
            name: tool.to_string(),
            message: "result contained no text content".to_string(),
        })?;

    if let Some(message) = text.strip_prefix("Error:") {
        return Err(McpClientError::ToolFailed {
            name: tool.to_string(),
            message: message.trim().to_string(),
        });
    }

    serde_json::from_str(text).map_err(|e| McpClientError::ToolFailed {
        name: tool.to_string(),
        message: format!("payload is not valid JSON: {}", e),
    })
}

fn decode_value<T: DeserializeOwned>(tool: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| McpClientError::ToolFailed {
        name: tool.to_string(),
        message: format!("unexpected payload shape: {}", e),
    })
}

fn decode_payload<T: DeserializeOwned>(tool: &str, content: Value) -> Result<T> {
    let payload = payload_value(tool, content)?;
    decode_value(tool, payload)
}
