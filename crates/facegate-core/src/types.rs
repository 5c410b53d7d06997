use crate::error::SubmissionError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An encoded camera frame (JPEG or PNG bytes) tagged with the tick it was acquired on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub data: Vec<u8>,
    /// MIME type of `data`, e.g. `image/jpeg`.
    pub content_type: String,
    /// Tick index within the burst (0-based). Ticks without a frame leave gaps.
    pub tick: usize,
}

/// A location fix attached to a submission when available.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
}

/// Which attendance step a captured burst is submitted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckAction {
    /// Driver check-in; opens a new trip.
    CheckIn,
    /// Driver check-out; closes the given trip.
    CheckOut { trip_id: String },
    HelperCheckIn { trip_id: String },
    HelperCheckOut { trip_id: String },
}

impl CheckAction {
    /// Endpoint path relative to the verifier base URL.
    pub fn endpoint(&self) -> String {
        match self {
            Self::CheckIn => "trips/driver-checkin/".to_string(),
            Self::CheckOut { trip_id } => format!("trips/{trip_id}/driver-checkout/"),
            Self::HelperCheckIn { trip_id } => format!("trips/{trip_id}/helper-checkin/"),
            Self::HelperCheckOut { trip_id } => format!("trips/{trip_id}/helper-checkout/"),
        }
    }

    pub fn is_helper(&self) -> bool {
        matches!(self, Self::HelperCheckIn { .. } | Self::HelperCheckOut { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CheckIn => "checkin",
            Self::CheckOut { .. } => "checkout",
            Self::HelperCheckIn { .. } => "helper-checkin",
            Self::HelperCheckOut { .. } => "helper-checkout",
        }
    }
}

/// Who is being verified and where the burst goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitTarget {
    pub action: CheckAction,
    pub org_code: String,
    pub employee_id: String,
    pub route_id: Option<String>,
    /// Helper endpoints accept an optional password alongside the face burst.
    pub password: Option<String>,
}

impl SubmitTarget {
    pub fn new(action: CheckAction, org_code: impl Into<String>, employee_id: impl Into<String>) -> Self {
        Self {
            action,
            org_code: org_code.into(),
            employee_id: employee_id.into(),
            route_id: None,
            password: None,
        }
    }

    pub fn check_in(org_code: impl Into<String>, employee_id: impl Into<String>) -> Self {
        Self::new(CheckAction::CheckIn, org_code, employee_id)
    }

    pub fn with_route(mut self, route_id: Option<String>) -> Self {
        self.route_id = route_id;
        self
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }
}

/// Raw verifier response body.
///
/// Only `success`, `message`, `error`, `trip_id` and `next_step` are
/// interpreted; every other field is kept verbatim in `extra`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifierResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    /// Either a plain string or an object carrying a `message` field.
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub trip_id: Option<Value>,
    #[serde(default)]
    pub next_step: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VerifierResponse {
    /// Human-readable reason for a rejection, if the body carries one.
    pub fn reason(&self) -> Option<String> {
        let from_error = match &self.error {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Object(obj)) => obj
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            Some(Value::String(_)) | Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };
        from_error.or_else(|| self.message.clone().filter(|m| !m.is_empty()))
    }

    /// Interpret the body: `success: false` becomes [`SubmissionError::ServerRejected`].
    pub fn into_result(self) -> Result<VerificationResult, SubmissionError> {
        if !self.success {
            let reason = self.reason().unwrap_or_else(|| "verification failed".to_string());
            return Err(SubmissionError::ServerRejected(reason));
        }

        let mut extra = self.extra;
        let matched = extra
            .remove("matched")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        let confidence = extra
            .get("confidence")
            .or_else(|| extra.get("face_confidence"))
            .and_then(Value::as_f64);
        let trip_id = self.trip_id.and_then(|v| match v {
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        });

        Ok(VerificationResult {
            matched,
            message: self.message,
            trip_id,
            next_step: self.next_step,
            confidence,
            details: extra,
        })
    }
}

/// Successful verification outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResult {
    pub matched: bool,
    pub message: Option<String>,
    pub trip_id: Option<String>,
    /// Opaque routing token for the caller (e.g. `helper-checkin`, `vehicle-checkin`).
    pub next_step: Option<String>,
    pub confidence: Option<f64>,
    /// Remaining response fields, passed through untouched.
    pub details: Map<String, Value>,
}
