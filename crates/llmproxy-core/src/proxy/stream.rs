//! SSE tail capture (spec §4.1 "side-channel... preserves the tail of the stream", §9
//! "Implement as a `tee` writer ... appends to a bounded ring buffer (dropping
//! oldest)"). Grounded on the teacher's streaming-body relay in `proxy::httpproxy`,
//! which tees to telemetry; here the tee target is a fixed-capacity ring instead.

use std::sync::Mutex;

/// Lossy-on-overflow byte ring: pushes always succeed, oldest bytes are dropped first.
/// SSE usage chunks are emitted last by convention, so the final chunk survives even
/// when earlier chunks are evicted (spec §4.1 "Key design decisions").
pub struct TailBuffer {
	inner: Mutex<Vec<u8>>,
	capacity: usize,
}

impl TailBuffer {
	pub fn new(capacity: usize) -> Self {
		TailBuffer { inner: Mutex::new(Vec::with_capacity(capacity.min(4096))), capacity }
	}

	pub fn push(&self, chunk: &[u8]) {
		let mut buf = self.inner.lock().unwrap();
		buf.extend_from_slice(chunk);
		if buf.len() > self.capacity {
			let overflow = buf.len() - self.capacity;
			buf.drain(0..overflow);
		}
	}

	pub fn snapshot(&self) -> Vec<u8> {
		self.inner.lock().unwrap().clone()
	}
}

impl Default for TailBuffer {
	fn default() -> Self {
		// 256 KB, per spec §4.1 "capped at ~256 KB".
		TailBuffer::new(256 * 1024)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn retains_final_bytes_on_overflow() {
		let buf = TailBuffer::new(8);
		buf.push(b"aaaaaaaa");
		buf.push(b"bbbb");
		let snap = buf.snapshot();
		assert_eq!(snap.len(), 8);
		assert_eq!(&snap[4..], b"bbbb");
	}

	#[test]
	fn within_capacity_keeps_everything() {
		let buf = TailBuffer::new(64);
		buf.push(b"hello");
		assert_eq!(buf.snapshot(), b"hello");
	}
}
