//! Embedded scripting sandbox bridging provider/request data into per-provider policy
//! scripts (spec §4.3 "Script contract", §9 "Script values"). The teacher's policy
//! engine is CEL and has no notion of accumulated mutable state across a pipeline, so
//! this bridge is grounded instead on `adi-family-cli/crates/llm-proxy/core`'s `rhai`
//! sandbox, which is where this crate's `rhai` dependency comes from.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rhai::{Dynamic, Engine, Scope};
use serde_json::Value;

use crate::error::ProxyError;
use crate::types::{AuthDecision, AuthProviderResult};

/// The subset of the inbound request exposed to scripts (spec §4.3 `request` binding).
#[derive(Clone, serde::Serialize)]
pub struct ScriptRequest {
	pub method: String,
	pub path: String,
	pub ip: String,
	pub headers: HashMap<String, String>,
}

/// `None` means the script returned `nil`, deferring to the default rule (spec §4.3).
pub type ScriptVerdict = Option<AuthDecision>;

#[derive(Clone)]
pub struct ScriptEngine {
	timeout: Duration,
	max_memory: usize,
}

impl ScriptEngine {
	pub fn new(timeout_ms: u64, max_memory_bytes: usize) -> Self {
		ScriptEngine {
			timeout: Duration::from_millis(timeout_ms),
			max_memory: max_memory_bytes,
		}
	}

	fn build_engine(&self) -> Engine {
		let mut engine = Engine::new();
		// Sandbox guarantees (spec §4.3): no I/O, no process spawn, no module loading,
		// no filesystem or network access. Rhai has none of these by default; we only
		// need to cap resource usage and register the three pure host functions.
		engine.set_max_operations(2_000_000);
		engine.set_max_expr_depths(64, 64);
		engine.set_max_string_size(self.max_memory / 4);
		engine.set_max_array_size(10_000);
		engine.set_max_map_size(10_000);
		engine.register_fn("now", || -> i64 {
			SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
		});
		engine.register_fn("now_ms", || -> i64 {
			SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
		});
		engine.register_fn("log", |msg: &str| {
			tracing::info!(target: "llmproxy::auth::script", "{msg}");
		});
		engine
	}

	/// Compiles and evaluates `source` against the bound context, bounded by the
	/// configured wall-clock timeout. A timeout or panic is fail-closed: a 500-class
	/// deny, never an allow (spec §4.3 "Timeout or panic => ... fail-closed").
	pub async fn run(
		&self,
		source: Arc<str>,
		api_key: String,
		data: AuthProviderResult,
		request: ScriptRequest,
		metadata: HashMap<String, Value>,
	) -> Result<ScriptVerdict, ProxyError> {
		let engine_cfg = self.clone();
		let fut = tokio::task::spawn_blocking(move || engine_cfg.run_sync(&source, &api_key, &data, &request, &metadata));
		match tokio::time::timeout(self.timeout, fut).await {
			Ok(Ok(Ok(verdict))) => Ok(verdict),
			Ok(Ok(Err(e))) => Err(ProxyError::ScriptError(e)),
			Ok(Err(join_err)) => Err(ProxyError::ScriptError(format!("script task panicked: {join_err}"))),
			Err(_) => Err(ProxyError::ScriptError("script execution timed out".to_string())),
		}
	}

	fn run_sync(
		&self,
		source: &str,
		api_key: &str,
		data: &AuthProviderResult,
		request: &ScriptRequest,
		metadata: &HashMap<String, Value>,
	) -> Result<ScriptVerdict, String> {
		let engine = self.build_engine();
		let ast = engine.compile(source).map_err(|e| e.to_string())?;

		let mut scope = Scope::new();
		scope.push_constant("api_key", api_key.to_string());
		scope.push_constant("data", to_dynamic(&data.data)?);
		scope.push_constant("request", to_dynamic(request)?);
		scope.push_constant("metadata", to_dynamic(metadata)?);

		let result: Dynamic = engine.eval_ast_with_scope(&mut scope, &ast).map_err(|e| e.to_string())?;
		parse_verdict(result)
	}
}

fn to_dynamic<T: serde::Serialize>(value: &T) -> Result<Dynamic, String> {
	rhai::serde::to_dynamic(value).map_err(|e| e.to_string())
}

/// Interprets the script's return value per spec §4.3: a bare bool, a
/// `#{allow, message, metadata}` map, or unit/`()` (nil) to defer to the default rule.
fn parse_verdict(value: Dynamic) -> Result<ScriptVerdict, String> {
	if value.is_unit() {
		return Ok(None);
	}
	if let Ok(allow) = value.as_bool() {
		return Ok(Some(AuthDecision { allow, message: None, metadata: HashMap::new() }));
	}
	if value.is_map() {
		let map = value.cast::<rhai::Map>();
		let allow = map.get("allow").and_then(|v| v.clone().as_bool().ok()).unwrap_or(false);
		let message = map.get("message").and_then(|v| v.clone().into_string().ok());
		let metadata = map
			.get("metadata")
			.map(|v| rhai::serde::from_dynamic::<HashMap<String, Value>>(v))
			.transpose()
			.map_err(|e| e.to_string())?
			.unwrap_or_default();
		return Ok(Some(AuthDecision { allow, message, metadata }));
	}
	Err(format!("script returned an unsupported type: {}", value.type_name()))
}
