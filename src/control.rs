use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::registry::SourceRegistry;

/// Settings a source's control endpoint understands. Only these three ever
/// reach the wire; anything else in an inbound payload is dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ControlRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_exposure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software_ev: Option<f64>,
}

impl ControlRequest {
    /// Filter an arbitrary JSON payload down to the recognized settings.
    pub fn from_value(value: &Value) -> Self {
        Self {
            auto_exposure: value.get("auto_exposure").and_then(Value::as_bool),
            exposure: value.get("exposure").and_then(Value::as_f64),
            software_ev: value.get("software_ev").and_then(Value::as_f64),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.auto_exposure.is_none() && self.exposure.is_none() && self.software_ev.is_none()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlResult {
    #[serde(default)]
    pub applied: Value,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Body returned by a source's control endpoint. A body without an `ok`
/// field counts as ok; the HTTP status still decides on its own.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlResponse {
    #[serde(default = "default_true")]
    pub ok: bool,
    #[serde(default)]
    pub result: ControlResult,
    #[serde(default)]
    pub controls: Value,
}

fn default_true() -> bool {
    true
}

impl Default for ControlResponse {
    fn default() -> Self {
        Self {
            ok: true,
            result: ControlResult::default(),
            controls: Value::Null,
        }
    }
}

#[derive(Debug, Error)]
pub enum ControlError {
    /// No worker has recorded where this slot's source lives.
    #[error("slot {slot} has no control target")]
    TargetUnknown { slot: usize },
    #[error("slot {slot} control endpoint unreachable: {source}")]
    Unreachable {
        slot: usize,
        #[source]
        source: reqwest::Error,
    },
    #[error("slot {slot} rejected control request (http {status}): {}", .errors.join("; "))]
    Rejected {
        slot: usize,
        status: u16,
        errors: Vec<String>,
    },
    #[error("slot {slot} control response unreadable: {source}")]
    BadResponse {
        slot: usize,
        #[source]
        source: reqwest::Error,
    },
}

/// Forwards parameter changes to whichever address/port is currently on
/// record for a slot. Lookup failures never touch the network; transport
/// and endpoint failures come back as structured errors, never silently.
pub struct ControlProxy {
    registry: Arc<SourceRegistry>,
    client: reqwest::Client,
}

impl ControlProxy {
    pub fn new(registry: Arc<SourceRegistry>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { registry, client })
    }

    /// POST the recognized settings to the slot's control endpoint.
    pub async fn apply(
        &self,
        slot: usize,
        request: &ControlRequest,
    ) -> Result<ControlResponse, ControlError> {
        let target = self
            .registry
            .control_target(slot)
            .ok_or(ControlError::TargetUnknown { slot })?;

        let url = target.url("/controls");
        debug!(slot, url = %url, "forwarding control request");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|source| ControlError::Unreachable { slot, source })?;

        let status = response.status();
        // Endpoints answer JSON even on failure; a non-JSON body is treated
        // as an empty one and the status decides.
        let body = response
            .json::<ControlResponse>()
            .await
            .unwrap_or_default();

        if !status.is_success() || !body.ok {
            warn!(
                slot,
                status = status.as_u16(),
                errors = ?body.result.errors,
                "control request rejected"
            );
            return Err(ControlError::Rejected {
                slot,
                status: status.as_u16(),
                errors: body.result.errors,
            });
        }
        Ok(body)
    }

    /// GET the slot's current control values.
    pub async fn read_back(&self, slot: usize) -> Result<Value, ControlError> {
        let target = self
            .registry
            .control_target(slot)
            .ok_or(ControlError::TargetUnknown { slot })?;

        let response = self
            .client
            .get(target.url("/controls"))
            .send()
            .await
            .map_err(|source| ControlError::Unreachable { slot, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControlError::Rejected {
                slot,
                status: status.as_u16(),
                errors: Vec::new(),
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|source| ControlError::BadResponse { slot, source })
    }
}
