//! Multipart payload for the verifier, independent of any HTTP client.

use crate::error::SubmissionError;
use crate::types::{CapturedFrame, GeoFix, SubmitTarget};

/// Form field carrying each burst frame, repeated in acquisition order.
pub const FRAMES_FIELD: &str = "frames";
/// Form field carrying the challenge index into the frame sequence.
pub const CHALLENGE_FIELD: &str = "challenge_frame";
/// Single representative frame required by the helper endpoints.
pub const IMAGE_FIELD: &str = "image";

/// One file part of the submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field: &'static str,
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Ordered text fields and file parts for one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionPayload {
    /// Endpoint path relative to the verifier base URL.
    pub endpoint: String,
    pub fields: Vec<(String, String)>,
    pub files: Vec<FilePart>,
}

impl SubmissionPayload {
    pub fn build(
        frames: Vec<CapturedFrame>,
        challenge_frame: usize,
        target: &SubmitTarget,
        geo: Option<GeoFix>,
    ) -> Result<Self, SubmissionError> {
        let employee_id = target.employee_id.trim();
        if employee_id.is_empty() {
            return Err(SubmissionError::InvalidPayload("employee_id is required".into()));
        }
        let org_code = target.org_code.trim();
        if org_code.is_empty() && !target.action.is_helper() {
            return Err(SubmissionError::InvalidPayload("org_code is required".into()));
        }
        if challenge_frame >= frames.len() {
            return Err(SubmissionError::InvalidPayload(format!(
                "challenge frame {challenge_frame} outside burst of {} frames",
                frames.len()
            )));
        }

        let mut fields = Vec::new();
        if !org_code.is_empty() {
            fields.push(("org_code".to_string(), org_code.to_string()));
        }
        fields.push(("employee_id".to_string(), employee_id.to_string()));
        if let Some(route) = target.route_id.as_deref().filter(|r| !r.is_empty()) {
            fields.push(("route_id".to_string(), route.to_string()));
        }
        if target.action.is_helper() {
            let password = target.password.clone().unwrap_or_default();
            fields.push(("password".to_string(), password));
        }
        fields.push((CHALLENGE_FIELD.to_string(), challenge_frame.to_string()));
        if let Some(fix) = geo {
            fields.push(("latitude".to_string(), fix.latitude.to_string()));
            fields.push(("longitude".to_string(), fix.longitude.to_string()));
        }

        let mut files = Vec::with_capacity(frames.len() + 1);
        if target.action.is_helper() {
            let middle = &frames[frames.len() / 2];
            files.push(FilePart {
                field: IMAGE_FIELD,
                file_name: format!("face.{}", extension(&middle.content_type)),
                content_type: middle.content_type.clone(),
                data: middle.data.clone(),
            });
        }
        for (i, frame) in frames.into_iter().enumerate() {
            files.push(FilePart {
                field: FRAMES_FIELD,
                file_name: format!("frame_{i:03}.{}", extension(&frame.content_type)),
                content_type: frame.content_type,
                data: frame.data,
            });
        }

        Ok(Self {
            endpoint: target.action.endpoint(),
            fields,
            files,
        })
    }

    /// Value of a text field, if present.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Number of burst frames in the payload.
    pub fn frame_parts(&self) -> usize {
        self.files.iter().filter(|f| f.field == FRAMES_FIELD).count()
    }
}

fn extension(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        _ => "jpg",
    }
}
