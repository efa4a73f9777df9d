//! The proxy engine (spec §4.1): terminate the client request, drive it through the
//! middleware stack, dispatch to a backend, and relay the response with zero added
//! buffering on the streaming path. Grounded on the teacher's `proxy::httpproxy`
//! request handler, which has the same ingress -> auth -> dispatch -> relay shape;
//! this version swaps its MCP/xDS concerns for the LLM-specific auth/ratelimit/usage
//! pipeline.

pub mod stream;

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::auth::AuthPipeline;
use crate::config::Config;
use crate::context::RequestContext;
use crate::error::{ProxyError, ProxyResult};
use crate::ratelimit::RateLimiter;
use crate::router::Router;
use crate::telemetry::RequestLog;
use crate::usage::{RawUsageInput, UsageProcessor};

/// Hop-by-hop headers are never forwarded in either direction (spec §4.1 "hop-by-hop
/// headers dropped"). RFC 7230 §6.1 plus `host`, which must be regenerated for the
/// backend's own authority.
const HOP_BY_HOP: &[&str] = &[
	"connection",
	"keep-alive",
	"proxy-authenticate",
	"proxy-authorization",
	"te",
	"trailer",
	"transfer-encoding",
	"upgrade",
	"host",
];

pub struct AppState {
	pub config: Arc<Config>,
	pub router: Router,
	pub auth: AuthPipeline,
	pub rate_limiter: Arc<RateLimiter>,
	pub usage: Arc<UsageProcessor>,
}

pub async fn proxy_handler(State(state): State<Arc<AppState>>, method: Method, uri: axum::http::Uri, headers: HeaderMap, body: Bytes) -> Response {
	let path = uri.path().to_string();
	if body.len() > state.config.server.max_body_bytes {
		return ProxyError::MalformedRequest.into_response();
	}

	let mut ctx = RequestContext::new(method.clone(), path.clone(), &headers, body.clone());
	let mut log = RequestLog::new(ctx.request_id.clone(), method.to_string(), path.clone(), ctx.client_ip.clone());

	match handle(&state, &mut ctx, headers, body).await {
		Ok(resp) => {
			log.status.store(resp.status().as_u16());
			log.finish();
			resp
		}
		Err(err) => {
			log.error.store(err.to_string());
			log.finish();
			err.into_response()
		}
	}
}

async fn handle(state: &Arc<AppState>, ctx: &mut RequestContext, headers: HeaderMap, body: Bytes) -> ProxyResult<Response> {
	if !state.auth.is_skip_path(&ctx.path) {
		let api_key = state.auth.extract_key(&headers).ok_or(ProxyError::MissingKey)?;
		ctx.api_key = Some(api_key.clone());

		state.rate_limiter.admit_request(&api_key).await?;

		let script_request = crate::auth::script::ScriptRequest {
			method: ctx.method.to_string(),
			path: ctx.path.clone(),
			ip: ctx.client_ip.clone(),
			headers: header_map_to_strings(&headers),
		};
		let outcome = state.auth.authenticate(&api_key, script_request).await?;
		for (k, v) in outcome.metadata {
			ctx.metadata.insert(k, v);
		}
		if let Some(user_id) = outcome.user_id {
			ctx.metadata.insert("user_id".to_string(), serde_json::Value::from(user_id));
		}
	}

	let api_key_for_limit = ctx.api_key.clone().unwrap_or_default();
	let concurrency_guard = state.rate_limiter.acquire_concurrency(&api_key_for_limit)?;

	let model_tag = headers
		.get(state.config.routing.model_tag_header.as_str())
		.and_then(|v| v.to_str().ok())
		.map(str::to_string);
	let forward_headers = build_forward_headers(&headers, &ctx.request_id, &ctx.metadata);

	let outcome = state
		.router
		.dispatch(ctx.method.clone(), &ctx.path, forward_headers, body.clone(), model_tag.as_deref(), &ctx.cancellation)
		.await?;

	ctx.selected_backend = Some(outcome.backend_url.clone());
	ctx.t_first_byte = Some(Instant::now());

	let response = if ctx.stream {
		relay_streaming(state, ctx, outcome, body, concurrency_guard)
	} else {
		relay_buffered(state, ctx, outcome, body).await?
	};
	Ok(response)
}

fn header_map_to_strings(headers: &HeaderMap) -> std::collections::HashMap<String, String> {
	headers
		.iter()
		.filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
		.collect()
}

/// Builds the header set sent to the backend: strips hop-by-hop headers, stamps the
/// request id, and propagates the resolved `user_id` into `X-API-Key-UserID`.
fn build_forward_headers(original: &HeaderMap, request_id: &str, metadata: &serde_json::Map<String, serde_json::Value>) -> HeaderMap {
	let mut out = HeaderMap::new();
	for (name, value) in original.iter() {
		if HOP_BY_HOP.contains(&name.as_str()) {
			continue;
		}
		out.insert(name.clone(), value.clone());
	}
	if let Ok(hv) = HeaderValue::from_str(request_id) {
		out.insert(HeaderName::from_static("x-request-id"), hv);
	}
	if let Some(user_id) = metadata.get("user_id").and_then(|v| v.as_str()) {
		if let Ok(hv) = HeaderValue::from_str(user_id) {
			out.insert(HeaderName::from_static("x-api-key-userid"), hv);
		}
	}
	out
}

/// Non-streaming relay (spec §4.1 "relay status code and headers unchanged; copy body
/// once, retaining the full bytes for usage extraction").
async fn relay_buffered(state: &Arc<AppState>, ctx: &RequestContext, outcome: crate::router::DispatchOutcome, request_body: Bytes) -> ProxyResult<Response> {
	let status = outcome.response.status();
	let resp_headers = outcome.response.headers().clone();
	let bytes = outcome.response.bytes().await.map_err(|e| ProxyError::Internal(e.into()))?;

	state.usage.process(RawUsageInput {
		request_id: ctx.request_id.clone(),
		user_id: ctx.metadata.get("user_id").and_then(|v| v.as_str().map(String::from)),
		api_key: ctx.api_key.clone(),
		request_body,
		method: ctx.method.to_string(),
		path: ctx.path.clone(),
		backend_url: outcome.backend_url.clone(),
		status_code: status.as_u16(),
		latency_ms: outcome.latency_ms,
		stream: false,
		response_snapshot: bytes.clone(),
	});

	let mut builder = Response::builder().status(status.as_u16());
	for (name, value) in resp_headers.iter() {
		if !HOP_BY_HOP.contains(&name.as_str()) {
			builder = builder.header(name, value);
		}
	}
	Ok(builder.body(Body::from(bytes)).unwrap())
}

/// Streaming relay (spec §4.1 "zero added buffering... a tee to an in-memory byte
/// accumulator... flush discipline"). Forwards each chunk through an mpsc channel so a
/// client disconnect (receiver dropped) is observable as a send failure, at which
/// point the request is marked cancelled (spec §4.1 "Failure semantics").
fn relay_streaming(
	state: &Arc<AppState>,
	ctx: &RequestContext,
	outcome: crate::router::DispatchOutcome,
	request_body: Bytes,
	concurrency_guard: crate::ratelimit::ConcurrencyGuard,
) -> Response {
	let tail = Arc::new(stream::TailBuffer::default());
	let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(16);

	let state = state.clone();
	let request_id = ctx.request_id.clone();
	let user_id = ctx.metadata.get("user_id").and_then(|v| v.as_str().map(String::from));
	let api_key = ctx.api_key.clone();
	let method = ctx.method.to_string();
	let path = ctx.path.clone();
	let backend_url = outcome.backend_url.clone();
	let latency_ms = outcome.latency_ms;
	let status_code = outcome.response.status().as_u16();
	let cancellation = ctx.cancellation.clone();
	let tail_for_task = tail.clone();

	tokio::spawn(async move {
		let _permit = concurrency_guard;
		let mut upstream = outcome.response.bytes_stream();
		let mut cancelled = false;

		loop {
			tokio::select! {
				biased;
				_ = cancellation.cancelled() => {
					cancelled = true;
					break;
				}
				next = upstream.next() => {
					match next {
						Some(Ok(chunk)) => {
							tail_for_task.push(&chunk);
							if tx.send(Ok(chunk)).await.is_err() {
								// Receiver dropped: the client disconnected mid-stream.
								cancelled = true;
								break;
							}
						}
						Some(Err(e)) => {
							warn!(error = %e, "error reading backend stream");
							let _ = tx.send(Err(std::io::Error::other(e))).await;
							break;
						}
						None => break,
					}
				}
			}
		}

		let effective_status = if cancelled { 499 } else { status_code };
		state.usage.process(RawUsageInput {
			request_id,
			user_id,
			api_key,
			request_body,
			method,
			path,
			backend_url,
			status_code: effective_status,
			latency_ms,
			stream: true,
			response_snapshot: Bytes::from(tail.snapshot()),
		});
	});

	let body_stream = ReceiverStream::new(rx);
	Response::builder()
		.status(StatusCode::OK)
		.header(axum::http::header::CONTENT_TYPE, "text/event-stream")
		.header(axum::http::header::CACHE_CONTROL, "no-cache")
		.header(axum::http::header::CONNECTION, "keep-alive")
		.body(Body::from_stream(body_stream))
		.unwrap()
}
