//! CIP request/response framing (§3, §4.2-§4.5) — the Message Router
//! envelope carried inside a SendRRData/SendUnitData unconnected or
//! connected data item.

use crate::error::{EnipError, Result};

/// CIP service codes this crate issues (§4).
pub mod service {
	pub const GET_ATTRIBUTE_SINGLE: u8 = 0x0E;
	pub const SET_ATTRIBUTE_SINGLE: u8 = 0x10;
	pub const READ_TAG: u8 = 0x4C;
	pub const WRITE_TAG: u8 = 0x4D;
	pub const FORWARD_OPEN: u8 = 0x54;
	pub const FORWARD_CLOSE: u8 = 0x4E;
	pub const LARGE_FORWARD_OPEN: u8 = 0x5B;
}

/// Set on `service` in a response to mark it as a reply rather than a
/// request (§4.2: "the high bit of the service byte is always set on
/// responses").
pub const RESPONSE_FLAG: u8 = 0x80;

/// General status codes (§4.2) worth naming; anything else still decodes,
/// it just falls back to a generic message.
pub mod status {
	pub const SUCCESS: u8 = 0x00;
	pub const CONNECTION_FAILURE: u8 = 0x01;
	pub const RESOURCE_UNAVAILABLE: u8 = 0x02;
	pub const PATH_SEGMENT_ERROR: u8 = 0x04;
	pub const PATH_DESTINATION_UNKNOWN: u8 = 0x05;
	pub const PARTIAL_TRANSFER: u8 = 0x06;
	pub const CONNECTION_LOST: u8 = 0x07;
	pub const SERVICE_NOT_SUPPORTED: u8 = 0x08;
	pub const INVALID_ATTRIBUTE_VALUE: u8 = 0x09;
	pub const ATTRIBUTE_LIST_ERROR: u8 = 0x0A;
	pub const ALREADY_IN_REQUESTED_MODE: u8 = 0x0B;
	pub const OBJECT_STATE_CONFLICT: u8 = 0x0C;
	pub const OBJECT_ALREADY_EXISTS: u8 = 0x0D;
	pub const ATTRIBUTE_NOT_SETTABLE: u8 = 0x0E;
	pub const PRIVILEGE_VIOLATION: u8 = 0x0F;
	pub const DEVICE_STATE_CONFLICT: u8 = 0x10;
	pub const REPLY_DATA_TOO_LARGE: u8 = 0x11;
	pub const NOT_ENOUGH_DATA: u8 = 0x13;
	pub const ATTRIBUTE_NOT_SUPPORTED: u8 = 0x14;
	pub const TOO_MUCH_DATA: u8 = 0x15;
	pub const OBJECT_DOES_NOT_EXIST: u8 = 0x16;
	pub const DATA_SIZE_MISMATCH: u8 = 0x1D;
	pub const CONNECTION_RELATED_FAILURE: u8 = 0x1E;
}

/// Human-readable general status text (§4.2, §8 error reporting). Unknown
/// codes still return a usable message rather than failing.
pub fn status_message(status_code: u8) -> &'static str {
	match status_code {
		status::SUCCESS => "success",
		status::CONNECTION_FAILURE => "connection failure",
		status::RESOURCE_UNAVAILABLE => "resource unavailable",
		status::PATH_SEGMENT_ERROR => "path segment error",
		// Spec's general_status table names 0x05 "Object does not exist"
		// rather than ODVA's "Path destination unknown"; followed literally
		// here so callers see the documented message.
		status::PATH_DESTINATION_UNKNOWN => "object does not exist",
		status::PARTIAL_TRANSFER => "partial transfer",
		status::CONNECTION_LOST => "connection lost",
		status::SERVICE_NOT_SUPPORTED => "service not supported",
		status::INVALID_ATTRIBUTE_VALUE => "invalid attribute value",
		status::ATTRIBUTE_LIST_ERROR => "attribute list error",
		status::ALREADY_IN_REQUESTED_MODE => "already in requested mode",
		status::OBJECT_STATE_CONFLICT => "object state conflict",
		status::OBJECT_ALREADY_EXISTS => "object already exists",
		status::ATTRIBUTE_NOT_SETTABLE => "attribute not settable",
		status::PRIVILEGE_VIOLATION => "privilege violation",
		status::DEVICE_STATE_CONFLICT => "device state conflict",
		status::REPLY_DATA_TOO_LARGE => "reply data too large",
		status::NOT_ENOUGH_DATA => "not enough data",
		status::ATTRIBUTE_NOT_SUPPORTED => "attribute not supported",
		status::TOO_MUCH_DATA => "too much data",
		status::OBJECT_DOES_NOT_EXIST => "object does not exist",
		status::DATA_SIZE_MISMATCH => "data size mismatch",
		status::CONNECTION_RELATED_FAILURE => "connection related failure",
		_ => "unknown CIP general status",
	}
}

/// An outgoing CIP request: `service | path_size | path | data` (§4.2).
/// `path` must already be word-aligned — build it with [`crate::epath`].
pub struct CipRequest {
	pub service: u8,
	pub path: Vec<u8>,
	pub data: Vec<u8>,
}

impl CipRequest {
	pub fn new(service: u8, path: Vec<u8>, data: Vec<u8>) -> Self {
		Self { service, path, data }
	}

	pub fn encode(&self) -> Vec<u8> {
		let mut buf = Vec::with_capacity(2 + self.path.len() + self.data.len());
		buf.push(self.service);
		buf.push((self.path.len() / 2) as u8);
		buf.extend_from_slice(&self.path);
		buf.extend_from_slice(&self.data);
		buf
	}
}

/// A decoded CIP response: `service|0x80, reserved, general_status,
/// additional_status_size, additional_status..., data...` (§4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipResponse {
	pub service: u8,
	pub general_status: u8,
	pub extended_status: Vec<u8>,
	pub data: Vec<u8>,
}

impl CipResponse {
	pub fn parse(bytes: &[u8]) -> Result<Self> {
		if bytes.len() < 4 {
			return Err(EnipError::Protocol("CIP response shorter than the fixed header".into()));
		}

		let service = bytes[0];
		if service & RESPONSE_FLAG == 0 {
			return Err(EnipError::Protocol("CIP response service byte missing the reply bit".into()));
		}
		let general_status = bytes[2];
		let extended_words = bytes[3] as usize;
		let extended_len = extended_words * 2;

		let extended_status = bytes
			.get(4..4 + extended_len)
			.ok_or_else(|| EnipError::Protocol("CIP response additional status truncated".into()))?
			.to_vec();

		let data = bytes[4 + extended_len..].to_vec();

		Ok(Self {
			service,
			general_status,
			extended_status,
			data,
		})
	}

	pub fn is_success(&self) -> bool {
		self.general_status == status::SUCCESS
	}

	/// Returns `Ok(&data)` on success, or the appropriately-typed error
	/// otherwise. Route ForwardOpen responses through
	/// [`CipResponse::into_forward_open_result`] instead — its failures use
	/// a distinct error variant (§4.5, §8 scenario G).
	pub fn into_data(self) -> Result<Vec<u8>> {
		if self.is_success() {
			Ok(self.data)
		} else {
			Err(EnipError::Cip {
				status: self.general_status,
				extended: self.extended_status,
				message: status_message(self.general_status).to_string(),
			})
		}
	}

	/// The first word of the extended status, if present — this is where
	/// ForwardOpen failure codes like `0x0315` (§4.5, §8 scenario G) live.
	pub fn extended_status_word(&self) -> Option<u16> {
		if self.extended_status.len() < 2 {
			return None;
		}
		Some(u16::from_le_bytes([self.extended_status[0], self.extended_status[1]]))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn request_encodes_service_path_size_in_words() {
		let req = CipRequest::new(service::READ_TAG, vec![0x91, 0x02, b'O', b'k', 0x02, 0x00], vec![1, 0]);
		let encoded = req.encode();
		assert_eq!(encoded[0], service::READ_TAG);
		assert_eq!(encoded[1], 3); // 6 bytes of path -> 3 words
	}

	#[test]
	fn response_parse_roundtrips_success_with_data() {
		let bytes = vec![service::READ_TAG | RESPONSE_FLAG, 0x00, status::SUCCESS, 0x00, 0xC4, 0x00, 0x39, 0x30, 0x00, 0x00];
		let response = CipResponse::parse(&bytes).unwrap();
		assert!(response.is_success());
		assert_eq!(response.data, vec![0xC4, 0x00, 0x39, 0x30, 0x00, 0x00]);
	}

	#[test]
	fn response_parse_keeps_extended_status_for_failures() {
		// Scenario G: ForwardOpen fails with general status 0x01 and
		// extended status 0x0315 ("ownership conflict").
		let bytes = vec![
			service::FORWARD_OPEN | RESPONSE_FLAG,
			0x00,
			status::CONNECTION_FAILURE,
			0x01,
			0x15,
			0x03,
		];
		let response = CipResponse::parse(&bytes).unwrap();
		assert!(!response.is_success());
		assert_eq!(response.extended_status_word(), Some(0x0315));
	}

	#[test]
	fn into_data_surfaces_status_message_on_failure() {
		let bytes = vec![service::READ_TAG | RESPONSE_FLAG, 0x00, status::PATH_DESTINATION_UNKNOWN, 0x00];
		let response = CipResponse::parse(&bytes).unwrap();
		let err = response.into_data().unwrap_err();
		match err {
			EnipError::Cip { status, message, .. } => {
				assert_eq!(status, status::PATH_DESTINATION_UNKNOWN);
				assert_eq!(message, "object does not exist");
			}
			other => panic!("unexpected error variant: {other:?}"),
		}
	}

	#[test]
	fn parse_rejects_short_buffer() {
		assert!(CipResponse::parse(&[0x01, 0x02]).is_err());
	}

	#[test]
	fn parse_rejects_service_byte_without_reply_bit() {
		let bytes = vec![service::READ_TAG, 0x00, status::SUCCESS, 0x00];
		assert!(CipResponse::parse(&bytes).is_err());
	}
}
