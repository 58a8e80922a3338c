//! Identity signals: the validated `{email?, phoneNumber?}` input of a
//! resolution call.
//!
//! Signals are matched by exact string equality. No case folding, trimming
//! or phone formatting is applied; the only normalization is that numeric
//! phone numbers become their decimal string and blank strings count as
//! absent.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum accepted email length.
pub const MAX_EMAIL_LEN: usize = 255;

/// Maximum accepted phone number length.
pub const MAX_PHONE_NUMBER_LEN: usize = 50;

/// Validated resolution input. At least one signal is always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signals {
    Email(String),
    PhoneNumber(String),
    Both {
        email: String,
        phone_number: String,
    },
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn check_len(field: &'static str, value: &str, max_length: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max_length {
        return Err(ValidationError::FieldTooLong { field, max_length });
    }
    Ok(())
}

impl Signals {
    /// Validates raw input.
    ///
    /// # Errors
    /// - `MissingSignals` if neither signal is present
    /// - `FieldTooLong` if a signal exceeds its column width
    pub fn new(
        email: Option<String>,
        phone_number: Option<String>,
    ) -> Result<Self, ValidationError> {
        let signals = match (present(email), present(phone_number)) {
            (None, None) => return Err(ValidationError::MissingSignals),
            (Some(email), None) => Self::Email(email),
            (None, Some(phone_number)) => Self::PhoneNumber(phone_number),
            (Some(email), Some(phone_number)) => Self::Both {
                email,
                phone_number,
            },
        };

        if let Some(email) = signals.email() {
            check_len("email", email, MAX_EMAIL_LEN)?;
        }
        if let Some(phone_number) = signals.phone_number() {
            check_len("phoneNumber", phone_number, MAX_PHONE_NUMBER_LEN)?;
        }
        Ok(signals)
    }

    /// Email-only input.
    pub fn from_email(email: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(Some(email.into()), None)
    }

    /// Phone-only input.
    pub fn from_phone_number(phone_number: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(None, Some(phone_number.into()))
    }

    /// Input carrying both signals.
    pub fn from_both(
        email: impl Into<String>,
        phone_number: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Self::new(Some(email.into()), Some(phone_number.into()))
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        match self {
            Self::Email(email) | Self::Both { email, .. } => Some(email),
            Self::PhoneNumber(_) => None,
        }
    }

    #[must_use]
    pub fn phone_number(&self) -> Option<&str> {
        match self {
            Self::PhoneNumber(phone_number) | Self::Both { phone_number, .. } => Some(phone_number),
            Self::Email(_) => None,
        }
    }

    /// Short label of the present signals, safe to log.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Email(_) => "email",
            Self::PhoneNumber(_) => "phone",
            Self::Both { .. } => "email+phone",
        }
    }
}

/// A phone number as it arrives on the wire: JSON string or JSON number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PhoneInput {
    Text(String),
    Number(serde_json::Number),
}

impl PhoneInput {
    /// Normalizes the input to its string form.
    ///
    /// # Errors
    /// Returns `InvalidPhoneNumber` for negative or fractional numbers.
    pub fn normalize(self) -> Result<String, ValidationError> {
        match self {
            Self::Text(s) => Ok(s),
            Self::Number(n) => {
                if let Some(u) = n.as_u64() {
                    return Ok(u.to_string());
                }
                if n.as_i64().is_some() {
                    return Err(ValidationError::InvalidPhoneNumber {
                        reason: format!("negative number {n}"),
                    });
                }
                match n.as_f64() {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    Some(f) if f >= 0.0 && f.fract() == 0.0 && f < u64::MAX as f64 => {
                        Ok((f as u64).to_string())
                    }
                    _ => Err(ValidationError::InvalidPhoneNumber {
                        reason: format!("{n} is not a non-negative integer"),
                    }),
                }
            }
        }
    }
}

/// Untyped caller input, as parsed by the request-handling layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub phone_number: Option<PhoneInput>,
}

impl TryFrom<IdentifyRequest> for Signals {
    type Error = ValidationError;

    fn try_from(req: IdentifyRequest) -> Result<Self, Self::Error> {
        let phone_number = req.phone_number.map(PhoneInput::normalize).transpose()?;
        Self::new(req.email, phone_number)
    }
}
