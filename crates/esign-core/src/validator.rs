use crate::error::EnvelopeError;
use crate::types::{normalize_email, FieldSubmission, FieldType, SignatureField};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Machine-readable rejection codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    NoSignatures,
    UnknownField,
    FieldNotAssigned,
    DuplicateField,
    RequiredFieldMissing,
    InvalidImage,
    ImageTooLarge,
    InvalidDate,
    EmptyValue,
    ValueTooLong,
    InvalidEnvelope,
}

impl ValidationCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoSignatures => "NO_SIGNATURES",
            Self::UnknownField => "UNKNOWN_FIELD",
            Self::FieldNotAssigned => "FIELD_NOT_ASSIGNED",
            Self::DuplicateField => "DUPLICATE_FIELD",
            Self::RequiredFieldMissing => "REQUIRED_FIELD_MISSING",
            Self::InvalidImage => "INVALID_IMAGE",
            Self::ImageTooLarge => "IMAGE_TOO_LARGE",
            Self::InvalidDate => "INVALID_DATE",
            Self::EmptyValue => "EMPTY_VALUE",
            Self::ValueTooLong => "VALUE_TOO_LONG",
            Self::InvalidEnvelope => "INVALID_ENVELOPE",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submission accepted for the field at `field_index` in the envelope's field list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedValue {
    pub field_index: usize,
    pub value: String,
}

/// Accepted image data URL media types.
const IMAGE_MEDIA_TYPES: [&str; 4] = ["image/png", "image/jpeg", "image/jpg", "image/svg+xml"];

/// Pure checks applied to a signer's submitted values.
#[derive(Debug, Clone)]
pub struct FieldValidator {
    max_image_bytes: usize,
    max_text_chars: usize,
}

impl Default for FieldValidator {
    fn default() -> Self {
        Self::new(2 * 1024 * 1024, 1000)
    }
}

impl FieldValidator {
    pub fn new(max_image_bytes: usize, max_text_chars: usize) -> Self {
        Self {
            max_image_bytes,
            max_text_chars,
        }
    }

    /// Validate `submissions` from `signer_email` against the envelope's fields.
    ///
    /// Returns the accepted values in submission order. Nothing is written.
    pub fn validate(
        &self,
        fields: &[SignatureField],
        signer_email: &str,
        submissions: &[FieldSubmission],
    ) -> Result<Vec<ValidatedValue>, EnvelopeError> {
        if submissions.is_empty() {
            return Err(EnvelopeError::validation(
                ValidationCode::NoSignatures,
                "at least one field value is required",
            ));
        }

        let email = normalize_email(signer_email);
        let mut seen = HashSet::new();
        let mut accepted = Vec::with_capacity(submissions.len());

        for submission in submissions {
            let field_index = fields
                .iter()
                .position(|f| f.id == submission.field_id)
                .ok_or_else(|| {
                    EnvelopeError::validation(
                        ValidationCode::UnknownField,
                        format!("field '{}' does not exist", submission.field_id),
                    )
                })?;
            let field = &fields[field_index];

            if field.assignee_email != email {
                return Err(EnvelopeError::validation(
                    ValidationCode::FieldNotAssigned,
                    format!("field '{}' is not assigned to this signer", field.id),
                ));
            }
            if !seen.insert(field.id.as_str()) {
                return Err(EnvelopeError::validation(
                    ValidationCode::DuplicateField,
                    format!("field '{}' was submitted more than once", field.id),
                ));
            }

            self.check_value(field, &submission.value)?;
            accepted.push(ValidatedValue {
                field_index,
                value: submission.value.trim().to_string(),
            });
        }

        if let Some(missing) = fields
            .iter()
            .find(|f| f.required && f.assignee_email == email && !seen.contains(f.id.as_str()))
        {
            return Err(EnvelopeError::validation(
                ValidationCode::RequiredFieldMissing,
                format!("required field '{}' has no value", missing.id),
            ));
        }

        Ok(accepted)
    }

    fn check_value(&self, field: &SignatureField, value: &str) -> Result<(), EnvelopeError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(EnvelopeError::validation(
                ValidationCode::EmptyValue,
                format!("field '{}' has an empty value", field.id),
            ));
        }

        match field.field_type {
            FieldType::Signature | FieldType::Initial => {
                let size = decode_image_payload(value).ok_or_else(|| {
                    EnvelopeError::validation(
                        ValidationCode::InvalidImage,
                        format!("field '{}' is not a valid base64 image", field.id),
                    )
                })?;
                if size > self.max_image_bytes {
                    return Err(EnvelopeError::validation(
                        ValidationCode::ImageTooLarge,
                        format!(
                            "field '{}' image is {} bytes (max {})",
                            field.id, size, self.max_image_bytes
                        ),
                    ));
                }
            }
            FieldType::Date => {
                let parses = DateTime::parse_from_rfc3339(value).is_ok()
                    || NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok();
                if !parses {
                    return Err(EnvelopeError::validation(
                        ValidationCode::InvalidDate,
                        format!("field '{}' is not a valid date", field.id),
                    ));
                }
            }
            FieldType::Text | FieldType::Location => {
                let chars = value.chars().count();
                if chars > self.max_text_chars {
                    return Err(EnvelopeError::validation(
                        ValidationCode::ValueTooLong,
                        format!(
                            "field '{}' has {} characters (max {})",
                            field.id, chars, self.max_text_chars
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Decoded size of a `data:image/...;base64,` URL or bare base64 string.
///
/// `None` when the media type is not an image or the payload is empty or malformed.
fn decode_image_payload(value: &str) -> Option<usize> {
    let encoded = match value.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest.split_once(',')?;
            let media_type = header.strip_suffix(";base64")?;
            if !IMAGE_MEDIA_TYPES.contains(&media_type.to_ascii_lowercase().as_str()) {
                return None;
            }
            payload
        }
        None => value,
    };

    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD.decode(compact.as_bytes()).ok()?;
    if bytes.is_empty() {
        None
    } else {
        Some(bytes.len())
    }
}
