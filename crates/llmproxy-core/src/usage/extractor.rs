//! Token-usage extraction from backend responses (spec §4.5 "Extraction rules").
//! Grounded on the teacher's `llm` module's response-body usage parsing, generalized
//! from its single-provider JSON shape to the OpenAI-compatible non-streaming/SSE-tail
//! split this spec requires.

use serde_json::Value;

use crate::types::Usage;

/// Non-streaming: the complete response body is JSON; `usage` is read straight off it.
pub fn extract_from_body(body: &[u8]) -> Option<Usage> {
	let value: Value = serde_json::from_slice(body).ok()?;
	parse_usage(value.get("usage")?)
}

/// Streaming: scans the preserved SSE tail buffer line by line. Each `data: <payload>`
/// line is a candidate, `data: [DONE]` is the sentinel; the **last** non-sentinel
/// payload carrying a `usage` field wins (spec §4.5, §9 "the source takes the last").
pub fn extract_from_sse_tail(tail: &[u8]) -> Option<Usage> {
	let text = String::from_utf8_lossy(tail);
	let mut last_usage = None;
	for line in text.lines() {
		let Some(payload) = line.strip_prefix("data:") else { continue };
		let payload = payload.trim();
		if payload.is_empty() || payload == "[DONE]" {
			continue;
		}
		if let Ok(value) = serde_json::from_str::<Value>(payload) {
			if let Some(usage) = value.get("usage").and_then(parse_usage) {
				last_usage = Some(usage);
			}
		}
	}
	last_usage
}

fn parse_usage(v: &Value) -> Option<Usage> {
	Some(Usage {
		prompt_tokens: v.get("prompt_tokens")?.as_u64()?,
		completion_tokens: v.get("completion_tokens")?.as_u64()?,
		total_tokens: v.get("total_tokens")?.as_u64()?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extracts_from_complete_body() {
		let body = br#"{"id":"x","usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#;
		let usage = extract_from_body(body).unwrap();
		assert_eq!(usage.total_tokens, 5);
	}

	#[test]
	fn sse_tail_prefers_last_usage_chunk() {
		let tail = b"data: {\"choices\":[{\"delta\":{\"content\":\"he\"}}]}\n\n\
data: {\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":1,\"total_tokens\":2}}\n\n\
data: {\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2,\"total_tokens\":5}}\n\n\
data: [DONE]\n\n";
		let usage = extract_from_sse_tail(tail).unwrap();
		assert_eq!(usage.total_tokens, 5);
	}

	#[test]
	fn missing_usage_returns_none() {
		let tail = b"data: {\"choices\":[]}\n\ndata: [DONE]\n\n";
		assert!(extract_from_sse_tail(tail).is_none());
	}
}
