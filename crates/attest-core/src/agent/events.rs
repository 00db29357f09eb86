//! Typed stream events — the uniform output of every agent variant.
//!
//! Events are serialized as newline-delimited JSON records on the wire and
//! are never persisted. Every sequence is finite, FIFO-ordered, and ends
//! with the `done` sentinel.

use serde::{Deserialize, Serialize};

/// Per-node status within a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// A draft is being generated for this step.
    Executing,
    /// An unapproved draft is ready; carries the draft result.
    Review,
    /// The step's ledger entry was marked completed.
    Completed,
    /// Generation failed for this step; siblings continue.
    Error,
}

/// One event in an agent's output sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Text {
        text: String,
    },
    ToolCall {
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        name: String,
        output: serde_json::Value,
    },
    CodeExecution {
        code: String,
    },
    CodeResult {
        output: String,
    },
    Image {
        #[serde(rename = "mediaType")]
        media_type: String,
        data: String,
    },
    #[serde(rename_all = "camelCase")]
    StepStatus {
        node_id: String,
        status: NodeStatus,
        /// Present only when `status` is `review` (an unapproved draft).
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    Error {
        message: String,
    },
    Done,
}

impl StreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn step(node_id: impl Into<String>, status: NodeStatus) -> Self {
        Self::StepStatus {
            node_id: node_id.into(),
            status,
            result: None,
        }
    }

    pub fn review(node_id: impl Into<String>, draft: impl Into<String>) -> Self {
        Self::StepStatus {
            node_id: node_id.into(),
            status: NodeStatus::Review,
            result: Some(draft.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_string(&StreamEvent::text("hello")).unwrap();
        assert_eq!(json, r#"{"type":"text","text":"hello"}"#);

        let json = serde_json::to_string(&StreamEvent::Done).unwrap();
        assert_eq!(json, r#"{"type":"done"}"#);
    }

    #[test]
    fn test_step_status_carries_result_only_in_review() {
        let json = serde_json::to_string(&StreamEvent::step("plan", NodeStatus::Executing)).unwrap();
        assert_eq!(json, r#"{"type":"step_status","nodeId":"plan","status":"executing"}"#);

        let json = serde_json::to_string(&StreamEvent::review("plan", "draft body")).unwrap();
        assert_eq!(
            json,
            r#"{"type":"step_status","nodeId":"plan","status":"review","result":"draft body"}"#
        );
    }

    #[test]
    fn test_event_roundtrip() {
        let events = vec![
            StreamEvent::ToolCall {
                name: "next_available_steps".to_string(),
                input: serde_json::json!({"workflowId": "w1"}),
            },
            StreamEvent::error("model unavailable"),
        ];
        for ev in events {
            let json = serde_json::to_string(&ev).unwrap();
            let back: StreamEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(back, ev);
        }
    }
}
