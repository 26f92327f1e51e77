use std::{io::Write, sync::Mutex};

use slog::{o, Drain};

/// Assemble a logger that writes to the given writer.
pub fn assemble_logger<W: Write + Send + 'static>(w: W) -> slog::Logger {
	slog::Logger::root(Mutex::new(slog_json::Json::default(w)).fuse(), o!())
}

/// Assemble a logger backed by an asynchronous drain. Log records are handed off to a
/// dedicated thread, so callers on the hot path (cyclic I/O tasks, the watchdog) never
/// block on a write to `w`.
pub fn assemble_async_logger<W: Write + Send + 'static>(w: W) -> slog::Logger {
	let json = slog_json::Json::new(w).add_default_keys().build().fuse();
	let drain = slog_async::Async::new(json).build().fuse();
	slog::Logger::root(drain, o!())
}
