//! Health reporting shared by the registry adapters.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Health of one storage component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Whether the component can serve requests
    pub is_up: bool,
    /// Backend-specific details such as collection sizes
    pub details: Value,
    /// Locations of the backing storage
    pub urls: Vec<String>,
}

impl HealthReport {
    /// A report for a component that is serving requests.
    pub fn up(details: Value, urls: Vec<String>) -> Self {
        Self {
            is_up: true,
            details,
            urls,
        }
    }

    /// A report for a component that is not serving requests.
    pub fn down(reason: impl Into<String>, urls: Vec<String>) -> Self {
        Self {
            is_up: false,
            details: Value::from(reason.into()),
            urls,
        }
    }

    /// Check if the component is up
    pub const fn is_healthy(&self) -> bool {
        self.is_up
    }
}
