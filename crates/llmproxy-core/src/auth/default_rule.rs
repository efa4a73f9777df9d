//! The default allow/deny rule applied when a provider has no attached script (spec
//! §4.3 "The default rule applies when no script is configured"). Grounded on
//! `adi-family-cli/crates/llm-proxy/core`'s key-status gate, which is the closest match
//! in the pack — the teacher's CEL policies have no equivalent quota/balance check.

use serde_json::Value;

use crate::config::{DenyMessage, DenyMessages};
use crate::types::AuthDecision;

/// Coerces int, float, or numeric-string JSON values to `f64` (spec §9 "a single
/// `to_number` coercion ... to paper over schema drift from external sources").
fn to_number(v: &Value) -> Option<f64> {
	match v {
		Value::Number(n) => n.as_f64(),
		Value::String(s) => s.parse::<f64>().ok(),
		_ => None,
	}
}

fn status_denial<'a>(data: &std::collections::HashMap<String, Value>, messages: &'a DenyMessages) -> Option<&'a DenyMessage> {
	let status = data.get("status")?;
	match status {
		Value::String(s) => match s.as_str() {
			"disabled" => Some(&messages.account_disabled),
			"expired" => Some(&messages.key_expired),
			"quota_exceeded" => Some(&messages.quota_exceeded),
			_ => None,
		},
		Value::Number(n) => match n.as_i64() {
			Some(1) => Some(&messages.account_disabled),
			Some(2) => Some(&messages.key_expired),
			Some(3) => Some(&messages.quota_exceeded),
			_ => None,
		},
		_ => None,
	}
}

/// Applies the spec's default rule to one provider's result data, using the
/// operator-configured deny messages/codes (spec §4.3, §8 Scenario C).
pub fn evaluate(data: &std::collections::HashMap<String, Value>, messages: &DenyMessages) -> AuthDecision {
	if let Some(denial) = status_denial(data, messages) {
		return deny(denial);
	}

	let total_quota = data.get("total_quota").and_then(to_number);
	let used_quota = data.get("used_quota").and_then(to_number).unwrap_or(0.0);
	if let Some(total) = total_quota {
		if total > 0.0 && used_quota >= total {
			return deny(&messages.quota_exceeded);
		}
	}

	if let Some(balance) = data.get("balance").and_then(to_number) {
		if balance <= 0.0 {
			return deny(&messages.insufficient_balance);
		}
	}

	AuthDecision { allow: true, message: None, metadata: std::collections::HashMap::new() }
}

fn deny(denial: &DenyMessage) -> AuthDecision {
	AuthDecision {
		allow: false,
		message: Some(denial.message.clone()),
		metadata: std::collections::HashMap::from([("_code".to_string(), Value::from(denial.code))]),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	#[test]
	fn quota_exhausted_denies() {
		let messages = DenyMessages::default();
		let mut data = HashMap::new();
		data.insert("total_quota".to_string(), Value::from(100));
		data.insert("used_quota".to_string(), Value::from(100));
		let decision = evaluate(&data, &messages);
		assert!(!decision.allow);
		assert_eq!(decision.message.as_deref(), Some("quota_exceeded"));
	}

	#[test]
	fn no_quota_configured_allows() {
		let messages = DenyMessages::default();
		let data = HashMap::new();
		assert!(evaluate(&data, &messages).allow);
	}

	#[test]
	fn numeric_string_quota_is_coerced() {
		let messages = DenyMessages::default();
		let mut data = HashMap::new();
		data.insert("total_quota".to_string(), Value::from("100"));
		data.insert("used_quota".to_string(), Value::from("150"));
		assert!(!evaluate(&data, &messages).allow);
	}

	#[test]
	fn zero_balance_denies() {
		let messages = DenyMessages::default();
		let mut data = HashMap::new();
		data.insert("balance".to_string(), Value::from(0));
		assert!(!evaluate(&data, &messages).allow);
	}

	#[test]
	fn configured_message_overrides_default() {
		let mut messages = DenyMessages::default();
		messages.quota_exceeded = DenyMessage { message: "额度不足".to_string(), code: 429 };
		let mut data = HashMap::new();
		data.insert("total_quota".to_string(), Value::from(10));
		data.insert("used_quota".to_string(), Value::from(10));
		let decision = evaluate(&data, &messages);
		assert_eq!(decision.message.as_deref(), Some("额度不足"));
	}
}
