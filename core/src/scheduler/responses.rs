// Function Responses
// Shapes tool outcomes into the parts replayed to the model

use serde_json::json;
use tern_protocol::{Part, ToolCallRequestInfo, ToolCallResponseInfo, ToolResultDisplay};

use crate::tools::ToolResult;

pub const REJECTED_REASON: &str = "User did not allow tool call";
pub const CANCELLED_REASON: &str = "User cancelled tool execution.";

fn function_response(request: &ToolCallRequestInfo, response: serde_json::Value) -> Part {
  Part::FunctionResponse {
    id: request.call_id.clone(),
    name: request.name.clone(),
    response,
  }
}

/// Text-only content folds into `{output}`; anything else is appended after
/// a stub response.
pub fn convert_to_function_response(request: &ToolCallRequestInfo, llm_content: Vec<Part>) -> Vec<Part> {
  let texts: Option<Vec<&str>> = llm_content.iter().map(Part::as_text).collect();
  match texts {
    Some(texts) => vec![function_response(request, json!({ "output": texts.join("\n") }))],
    None => {
      let mut parts = vec![function_response(
        request,
        json!({ "output": "Tool execution succeeded." }),
      )];
      parts.extend(llm_content);
      parts
    }
  }
}

pub fn success_response(request: &ToolCallRequestInfo, result: ToolResult) -> ToolCallResponseInfo {
  ToolCallResponseInfo {
    call_id: request.call_id.clone(),
    response_parts: convert_to_function_response(request, result.llm_content),
    result_display: result.return_display,
    error: None,
  }
}

pub fn error_response(request: &ToolCallRequestInfo, message: &str) -> ToolCallResponseInfo {
  ToolCallResponseInfo {
    call_id: request.call_id.clone(),
    response_parts: vec![function_response(request, json!({ "error": message }))],
    result_display: Some(ToolResultDisplay::Text {
      text: message.to_string(),
    }),
    error: Some(message.to_string()),
  }
}

pub fn cancelled_response(request: &ToolCallRequestInfo, reason: &str) -> ToolCallResponseInfo {
  let message = format!("[Operation Cancelled] Reason: {reason}");
  ToolCallResponseInfo {
    call_id: request.call_id.clone(),
    response_parts: vec![function_response(request, json!({ "error": message }))],
    result_display: Some(ToolResultDisplay::Text {
      text: reason.to_string(),
    }),
    error: None,
  }
}
