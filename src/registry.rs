//! Device, session and detection records for traceability reports.
//!
//! [`Registry`] is an explicitly owned store: every write takes `&mut self`,
//! so a store has exactly one writer at a time. Wrap it in a lock to share it
//! across threads. It persists as a single pretty-printed JSON file.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detection::Detection;
use crate::error::{Error, Result};
use crate::payload::{Payload, FIELD_LEN};

/// Detections above this confidence are recorded as verified.
pub const VERIFIED_CONFIDENCE: f32 = 0.8;

/// Enrollment state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Device may open new sessions.
    Active,
    /// Device was withdrawn; its history still resolves in reports.
    Revoked,
}

/// An enrolled display device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Identifier embedded in the payload (1-16 bytes).
    pub device_id: String,
    /// Human-readable name.
    pub device_name: String,
    /// Physical location.
    pub location: String,
    /// Enrollment time.
    pub enrolled_at: DateTime<Utc>,
    /// Enrollment state.
    pub status: DeviceStatus,
}

/// A viewing session on a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Identifier embedded in the payload (`SESS-000001` form).
    pub session_id: String,
    /// Device the session belongs to.
    pub device_id: String,
    /// Human-readable name.
    pub session_name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Review state of a recorded detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStatus {
    /// Confidence above [`VERIFIED_CONFIDENCE`].
    Verified,
    /// Needs manual review.
    Pending,
}

/// A watermark found in a leaked capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    /// Record identifier (`DET-000001` form).
    pub detection_id: String,
    /// Recovered device identifier.
    pub device_id: String,
    /// Recovered session identifier, if any.
    pub session_id: Option<String>,
    /// Recovered payload in hex.
    pub payload: String,
    /// Detector confidence.
    pub confidence: f32,
    /// Recording time.
    pub detected_at: DateTime<Utc>,
    /// Review state.
    pub status: DetectionStatus,
}

/// Traceability report linking a detection to its source device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Report identifier (`RPT-<detection_id>`).
    pub report_id: String,
    /// Detection the report is about.
    pub detection_id: String,
    /// Source device.
    pub device_id: String,
    /// Source device name.
    pub device_name: String,
    /// Source device location.
    pub location: String,
    /// Source session, if recovered.
    pub session_id: Option<String>,
    /// Detector confidence.
    pub confidence: f32,
    /// When the detection was recorded.
    pub detected_at: DateTime<Utc>,
    /// When this report was generated.
    pub generated_at: DateTime<Utc>,
    /// Always verified for generated reports.
    pub status: DetectionStatus,
}

/// Record counts, used as a health summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Enrolled devices.
    pub devices: usize,
    /// Created sessions.
    pub sessions: usize,
    /// Recorded detections.
    pub detections: usize,
}

/// In-memory record store with JSON persistence.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Registry {
    devices: BTreeMap<String, Device>,
    sessions: BTreeMap<String, Session>,
    detections: BTreeMap<String, DetectionRecord>,
    session_counter: u64,
    detection_counter: u64,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a registry from `path`; a missing file yields an empty registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] or [`Error::Json`] if the file exists but cannot
    /// be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "registry file missing, starting empty");
            return Ok(Self::new());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write the registry to `path` as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] or [`Error::Json`] on failure.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        tracing::debug!(path = %path.display(), "registry saved");
        Ok(())
    }

    /// Enroll (or re-enroll) a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentifier`] unless `device_id` is 1-16 bytes.
    pub fn enroll_device(
        &mut self,
        device_id: &str,
        device_name: &str,
        location: &str,
    ) -> Result<&Device> {
        validate_identifier(device_id)?;
        let device = Device {
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
            location: location.to_string(),
            enrolled_at: Utc::now(),
            status: DeviceStatus::Active,
        };
        tracing::info!(device_id, "device enrolled");
        self.devices.insert(device_id.to_string(), device);
        Ok(&self.devices[device_id])
    }

    /// Look up a device.
    #[must_use]
    pub fn device(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    /// All devices, ordered by identifier.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// Mark a device as revoked.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] for an unknown device.
    pub fn revoke_device(&mut self, device_id: &str) -> Result<&Device> {
        let device = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))?;
        device.status = DeviceStatus::Revoked;
        tracing::info!(device_id, "device revoked");
        Ok(&*device)
    }

    /// Open a new session on an active device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if the device is unknown or revoked.
    pub fn create_session(&mut self, device_id: &str, session_name: &str) -> Result<&Session> {
        match self.devices.get(device_id) {
            Some(device) if device.status == DeviceStatus::Active => {}
            _ => return Err(Error::DeviceNotFound(device_id.to_string())),
        }
        self.session_counter += 1;
        let session_id = format!("SESS-{:06}", self.session_counter);
        debug_assert!(session_id.len() <= FIELD_LEN);
        let session = Session {
            session_id: session_id.clone(),
            device_id: device_id.to_string(),
            session_name: session_name.to_string(),
            created_at: Utc::now(),
        };
        tracing::info!(device_id, session_id = %session_id, "session created");
        Ok(&*self.sessions.entry(session_id).or_insert(session))
    }

    /// Look up a session.
    #[must_use]
    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    /// Record a detection reported by an external detector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingField`] if `device_id` or `payload` is empty.
    pub fn record_detection(
        &mut self,
        device_id: &str,
        session_id: Option<&str>,
        payload: &str,
        confidence: f32,
    ) -> Result<&DetectionRecord> {
        if device_id.is_empty() {
            return Err(Error::MissingField("device_id"));
        }
        if payload.is_empty() {
            return Err(Error::MissingField("payload"));
        }
        self.detection_counter += 1;
        let detection_id = format!("DET-{:06}", self.detection_counter);
        let status = if confidence > VERIFIED_CONFIDENCE {
            DetectionStatus::Verified
        } else {
            DetectionStatus::Pending
        };
        let record = DetectionRecord {
            detection_id: detection_id.clone(),
            device_id: device_id.to_string(),
            session_id: session_id.map(str::to_string),
            payload: payload.to_string(),
            confidence,
            detected_at: Utc::now(),
            status,
        };
        tracing::info!(detection_id = %detection_id, device_id, confidence, "detection recorded");
        Ok(&*self.detections.entry(detection_id).or_insert(record))
    }

    /// Record the outcome of a local [`Detection`].
    ///
    /// Returns `Ok(None)` when nothing was found.
    ///
    /// # Errors
    ///
    /// Same as [`Registry::record_detection`].
    pub fn record_found(&mut self, detection: &Detection) -> Result<Option<&DetectionRecord>> {
        let (Some(device_id), Some(payload)) = (&detection.device_id, &detection.payload) else {
            return Ok(None);
        };
        if !detection.found {
            return Ok(None);
        }
        let payload = payload.to_hex();
        self.record_detection(
            device_id,
            detection.session_id.as_deref(),
            &payload,
            detection.confidence,
        )
        .map(Some)
    }

    /// Look up a detection.
    #[must_use]
    pub fn detection(&self, detection_id: &str) -> Option<&DetectionRecord> {
        self.detections.get(detection_id)
    }

    /// All detections, ordered by identifier.
    pub fn detections(&self) -> impl Iterator<Item = &DetectionRecord> {
        self.detections.values()
    }

    /// Build a traceability report for a recorded detection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DetectionNotFound`] or [`Error::DeviceNotFound`] if
    /// the detection or its device is unknown.
    pub fn generate_report(&self, detection_id: &str) -> Result<Report> {
        let detection = self
            .detections
            .get(detection_id)
            .ok_or_else(|| Error::DetectionNotFound(detection_id.to_string()))?;
        let device = self
            .devices
            .get(&detection.device_id)
            .ok_or_else(|| Error::DeviceNotFound(detection.device_id.clone()))?;

        Ok(Report {
            report_id: format!("RPT-{detection_id}"),
            detection_id: detection_id.to_string(),
            device_id: device.device_id.clone(),
            device_name: device.device_name.clone(),
            location: device.location.clone(),
            session_id: detection.session_id.clone(),
            confidence: detection.confidence,
            detected_at: detection.detected_at,
            generated_at: Utc::now(),
            status: DetectionStatus::Verified,
        })
    }

    /// Current record counts.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            devices: self.devices.len(),
            sessions: self.sessions.len(),
            detections: self.detections.len(),
        }
    }
}

/// Identifiers must be non-empty and fit the payload field unclipped.
fn validate_identifier(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > FIELD_LEN {
        return Err(Error::InvalidIdentifier(id.to_string()));
    }
    // A trailing NUL would be stripped on decode.
    if id.ends_with('\0') {
        return Err(Error::InvalidIdentifier(id.to_string()));
    }
    Ok(())
}

/// Decode identifiers from a stored hex payload, independently of the detector.
///
/// # Errors
///
/// Returns [`Error::InvalidPayload`] or [`Error::Decode`].
pub fn decode_stored_payload(hex_payload: &str) -> Result<(String, String)> {
    Payload::from_hex(hex_payload)?.identifiers()
}
