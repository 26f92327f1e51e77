//! `ScannerConfig` (§6 "Configuration flags"): the structured config this
//! crate loads instead of reading a handful of global flags. Optionally
//! loadable from TOML behind the `config-toml` feature, mirroring the
//! pattern `qinit::config` uses for its own graph configuration.

use crate::error::{EnipError, Result};

#[cfg_attr(feature = "config-toml", derive(serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct ScannerConfig {
	/// Lower bound on an accepted Requested Packet Interval, in
	/// milliseconds (§6).
	pub min_rpi_ms: u32,
	/// Upper bound on an accepted Requested Packet Interval, in
	/// milliseconds (§6).
	pub max_rpi_ms: u32,
	/// Bound on simultaneous implicit connections (§6, §3).
	pub max_implicit_connections: usize,
	/// Originator vendor id sent in ForwardOpen requests (§9 design
	/// note: the reference's `0xFADA` is not a registered ODVA vendor id;
	/// this is deliberately a plain configurable field instead of a
	/// hardcoded constant).
	pub vendor_id: u16,
	pub enable_tag_support: bool,
	pub enable_implicit_support: bool,
	pub enable_motoman_support: bool,
}

impl Default for ScannerConfig {
	fn default() -> Self {
		Self {
			min_rpi_ms: 10,
			max_rpi_ms: 10_000,
			max_implicit_connections: crate::table::MAX_CONNECTIONS,
			vendor_id: 1,
			enable_tag_support: true,
			enable_implicit_support: true,
			enable_motoman_support: false,
		}
	}
}

impl ScannerConfig {
	/// Validates an RPI against the configured bounds (§6, §7
	/// `InvalidArgument`).
	pub fn validate_rpi(&self, rpi_ms: u32) -> Result<()> {
		if rpi_ms < self.min_rpi_ms || rpi_ms > self.max_rpi_ms {
			return Err(EnipError::InvalidArgument(format!(
				"RPI {}ms outside configured bounds [{}, {}]ms",
				rpi_ms, self.min_rpi_ms, self.max_rpi_ms
			)));
		}
		Ok(())
	}

	#[cfg(feature = "config-toml")]
	pub fn from_toml_str(text: &str) -> Result<Self> {
		toml::from_str(text).map_err(|err| EnipError::InvalidArgument(format!("invalid scanner config: {err}")))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_config_matches_documented_bounds() {
		let config = ScannerConfig::default();
		assert_eq!(config.min_rpi_ms, 10);
		assert_eq!(config.max_rpi_ms, 10_000);
		assert_eq!(config.max_implicit_connections, 8);
	}

	#[test]
	fn validate_rpi_rejects_out_of_range_values() {
		let config = ScannerConfig::default();
		assert!(config.validate_rpi(5).is_err());
		assert!(config.validate_rpi(20_000).is_err());
		assert!(config.validate_rpi(100).is_ok());
	}
}
