//! Error types for linkdiscd
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-11: Error Handling - Structured error types with contextual information
//! - AU-3: Content of Audit Records - Lookup errors name the endpoint or link

use crate::types::{Endpoint, Link};
use thiserror::Error;

/// Errors that can occur in linkdiscd
///
/// # NIST Controls
/// - SI-11(a): Generate error messages providing information necessary for corrective actions
///
/// Table lookups that race with port removal surface as `PortNotFound` /
/// `LinkNotFound`; callers in the discovery loops treat both as benign.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Frame is not a discovery probe, or its elements are malformed
    #[error("Unknown LLDP format: {0}")]
    UnknownFormat(String),

    /// Endpoint is not present in the port schedule
    #[error("Port not found: {0}")]
    PortNotFound(Endpoint),

    /// Directional link is not present in the link table
    #[error("Link not found: {0}")]
    LinkNotFound(Link),

    /// Configuration error
    /// NIST: CM-6 (Configuration Settings) - Invalid discovery or lab settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DiscoveryError {
    /// Returns true for the lookup misses produced by add/remove races.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DiscoveryError::PortNotFound(_) | DiscoveryError::LinkNotFound(_)
        )
    }
}

/// Result type alias for linkdiscd operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiscoveryError::UnknownFormat("unknown chassis id subtype 4".to_string());
        assert_eq!(
            err.to_string(),
            "Unknown LLDP format: unknown chassis id subtype 4"
        );
    }

    #[test]
    fn test_port_not_found_display() {
        let err = DiscoveryError::PortNotFound(Endpoint::new(0x1a, 3));
        assert_eq!(err.to_string(), "Port not found: 000000000000001a:3");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_config_is_not_lookup_miss() {
        let err = DiscoveryError::Config("sweep period is zero".to_string());
        assert!(!err.is_not_found());
    }
}
