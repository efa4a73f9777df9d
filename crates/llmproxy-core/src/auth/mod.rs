//! Authentication pipeline (spec §4.3). Grounded on the teacher's CEL-based
//! `llm::AuthPolicy` executor for the *shape* of pipeline orchestration (providers are
//! data, the executor orchestrates, providers never call one another — spec §9), with
//! the scripted-decision bridge itself coming from `adi-family-cli`'s `rhai` sandbox.

pub mod default_rule;
pub mod provider;
pub mod script;

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use serde_json::Value;

use crate::config::{AuthConfig, AuthMode};
use crate::error::ProxyError;
use crate::types::AuthDecision;

use provider::Provider;
use script::{ScriptEngine, ScriptRequest};

pub struct AuthProviderHandle {
	pub name: String,
	pub provider: Provider,
	pub script: Option<Arc<str>>,
	pub enabled: bool,
}

pub struct AuthPipeline {
	cfg: AuthConfig,
	providers: Vec<AuthProviderHandle>,
	script_engine: ScriptEngine,
}

/// The outcome of a successful pipeline run: the caller forwards `user_id` (if any)
/// via `X-API-Key-UserID` and attaches `metadata` to the request's accumulated context
/// (spec §4.3).
pub struct AuthOutcome {
	pub user_id: Option<String>,
	pub metadata: HashMap<String, Value>,
}

impl AuthPipeline {
	pub fn new(cfg: AuthConfig, providers: Vec<AuthProviderHandle>) -> Self {
		let script_engine = ScriptEngine::new(cfg.script_timeout_ms, cfg.script_memory_bytes);
		AuthPipeline { cfg, providers, script_engine }
	}

	pub fn is_skip_path(&self, path: &str) -> bool {
		self.cfg.skip_paths.iter().any(|prefix| path.starts_with(prefix.as_str()))
	}

	/// Extracts the API key from the configured header list (spec §4.3 "Key
	/// extraction"). Bearer-prefix stripping applies only to `Authorization` (spec §6).
	pub fn extract_key(&self, headers: &HeaderMap) -> Option<String> {
		for name in &self.cfg.headers {
			let Some(raw) = headers.get(name.as_str()).and_then(|v| v.to_str().ok()) else {
				continue;
			};
			let value = if name.eq_ignore_ascii_case("authorization") {
				raw.strip_prefix("Bearer ").unwrap_or(raw)
			} else {
				raw
			};
			let trimmed = value.trim();
			if !trimmed.is_empty() {
				return Some(trimmed.to_string());
			}
		}
		None
	}

	pub async fn authenticate(&self, api_key: &str, request: ScriptRequest) -> Result<AuthOutcome, ProxyError> {
		match self.cfg.mode {
			AuthMode::FirstMatch => self.run_first_match(api_key, request).await,
			AuthMode::All => self.run_all(api_key, request).await,
		}
	}

	async fn run_first_match(&self, api_key: &str, request: ScriptRequest) -> Result<AuthOutcome, ProxyError> {
		let mut metadata = HashMap::new();
		let mut any_found = false;

		for handle in self.providers.iter().filter(|p| p.enabled) {
			let result = handle.provider.query(api_key).await;
			if !result.found {
				continue;
			}
			any_found = true;
			let decision = self.decide(handle, api_key, &result, request.clone(), &metadata).await?;
			if decision.allow {
				metadata.extend(decision.metadata);
				return Ok(AuthOutcome { user_id: metadata.get("user_id").and_then(|v| v.as_str().map(String::from)), metadata });
			}
			return Err(deny_error(&decision));
		}

		if !any_found {
			return Err(ProxyError::InvalidKey);
		}
		Err(ProxyError::InvalidKey)
	}

	async fn run_all(&self, api_key: &str, request: ScriptRequest) -> Result<AuthOutcome, ProxyError> {
		let mut metadata = HashMap::new();
		let mut any_found = false;

		for handle in self.providers.iter().filter(|p| p.enabled) {
			let result = handle.provider.query(api_key).await;
			if !result.found {
				continue;
			}
			any_found = true;
			let decision = self.decide(handle, api_key, &result, request.clone(), &metadata).await?;
			if !decision.allow {
				return Err(deny_error(&decision));
			}
			metadata.extend(decision.metadata);
		}

		if !any_found {
			return Err(ProxyError::InvalidKey);
		}
		Ok(AuthOutcome { user_id: metadata.get("user_id").and_then(|v| v.as_str().map(String::from)), metadata })
	}

	async fn decide(
		&self,
		handle: &AuthProviderHandle,
		api_key: &str,
		result: &crate::types::AuthProviderResult,
		request: ScriptRequest,
		metadata_so_far: &HashMap<String, Value>,
	) -> Result<AuthDecision, ProxyError> {
		if let Some(script) = &handle.script {
			let verdict = self
				.script_engine
				.run(script.clone(), api_key.to_string(), result.clone(), request, metadata_so_far.clone())
				.await?;
			if let Some(decision) = verdict {
				return Ok(decision);
			}
		}
		Ok(default_rule::evaluate(&result.data, &self.cfg.deny_messages))
	}
}

fn deny_error(decision: &AuthDecision) -> ProxyError {
	let code = decision
		.metadata
		.get("_code")
		.and_then(|v| v.as_u64())
		.map(|n| n as u16)
		.unwrap_or(403);
	ProxyError::AccessDenied {
		code,
		message: decision.message.clone().unwrap_or_else(|| "access_denied".to_string()),
	}
}
