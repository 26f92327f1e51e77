use thiserror::Error;

/// Every error this crate can produce.
///
/// Mirrors the taxonomy in the spec (invalid argument, not-initialized, io,
/// timeout, protocol, CIP status, ForwardOpen failure, ownership conflict,
/// busy, exhausted, not-found) rather than leaking `std::io::Error` or raw
/// status bytes to callers everywhere.
#[derive(Debug, Error)]
pub enum EnipError {
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	#[error("scanner not initialized")]
	NotInitialized,

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("operation timed out")]
	Timeout,

	#[error("protocol error: {0}")]
	Protocol(String),

	#[error("CIP error: {message} (status=0x{status:02X}, extended={extended:02X?})")]
	Cip {
		status: u8,
		extended: Vec<u8>,
		message: String,
	},

	#[error("ForwardOpen failed (status=0x{status:02X}, extended={extended:02X?})")]
	ForwardOpenFailed { status: u8, extended: Vec<u8> },

	#[error("connection ownership conflict")]
	OwnershipConflict,

	#[error("connection already open for this peer")]
	Busy,

	#[error("resource exhausted")]
	Exhausted,

	#[error("no matching connection found")]
	NotFound,
}

pub type Result<T> = std::result::Result<T, EnipError>;
