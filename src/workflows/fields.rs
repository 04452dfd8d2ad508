//! Static field checklists.
//!
//! Each workflow declares the fields it collects as `(name, input class,
//! validator)` triples. Validators run before any mutation of session data,
//! so a rejected value never reaches the store.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use super::model::InputClass;

static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9][0-9 ()\-]{5,18}[0-9]$").expect("valid phone regex"));

static ITEM_CODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-]{0,63}$").expect("valid item code regex"));

/// Why an input was refused. Rendered into the retry prompt; never a fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryReason {
    WrongInputClass { expected: Vec<InputClass> },
    NotANumber { field: String },
    OutOfRange { field: String, constraint: String },
    EmptyText { field: String },
    TooLong { field: String, max: usize },
    InvalidFormat { field: String, hint: String },
    UnknownOption { choice: String },
    MediaUnavailable { detail: String },
    UnknownItem { code: String },
    AwaitingExternalDecision,
    MissingFields { fields: Vec<String> },
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryReason::WrongInputClass { expected } => {
                let names: Vec<String> = expected.iter().map(|c| c.to_string()).collect();
                write!(f, "Please send {}.", names.join(" or "))
            }
            RetryReason::NotANumber { field } => write!(f, "The {field} must be a number."),
            RetryReason::OutOfRange { field, constraint } => {
                write!(f, "The {field} {constraint}.")
            }
            RetryReason::EmptyText { field } => write!(f, "The {field} cannot be empty."),
            RetryReason::TooLong { field, max } => {
                write!(f, "The {field} is too long (at most {max} characters).")
            }
            RetryReason::InvalidFormat { field, hint } => {
                write!(f, "That does not look like a valid {field}. {hint}")
            }
            RetryReason::UnknownOption { choice } => {
                write!(f, "\"{choice}\" is not one of the offered options.")
            }
            RetryReason::MediaUnavailable { detail } => {
                write!(f, "The attachment could not be processed ({detail}). Please send it again.")
            }
            RetryReason::UnknownItem { code } => {
                write!(f, "No item with code {code} was found. Check the label and send it again.")
            }
            RetryReason::AwaitingExternalDecision => {
                write!(f, "Your request is waiting for a supervisor's decision.")
            }
            RetryReason::MissingFields { fields } => {
                write!(f, "Still missing: {}.", fields.join(", "))
            }
        }
    }
}

/// Value-level check attached to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    PositiveNumber,
    NonNegativeNumber,
    Text { max_len: usize },
    PhoneNumber,
    ItemCode,
    AnyPhoto,
    AnyLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub class: InputClass,
    pub validator: Validator,
}

impl FieldSpec {
    pub const fn new(name: &'static str, class: InputClass, validator: Validator) -> Self {
        Self {
            name,
            class,
            validator,
        }
    }

    /// Parse and range-check a numeric field from raw text.
    pub fn parse_number(&self, raw: &str) -> Result<f64, RetryReason> {
        let value = parse_decimal(raw).ok_or_else(|| RetryReason::NotANumber {
            field: self.label(),
        })?;

        match self.validator {
            Validator::PositiveNumber if value <= 0.0 => Err(RetryReason::OutOfRange {
                field: self.label(),
                constraint: "must be greater than zero".to_string(),
            }),
            Validator::NonNegativeNumber if value < 0.0 => Err(RetryReason::OutOfRange {
                field: self.label(),
                constraint: "cannot be negative".to_string(),
            }),
            _ => Ok(value),
        }
    }

    /// Validate and normalize a free-text field.
    pub fn check_text(&self, raw: &str) -> Result<String, RetryReason> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RetryReason::EmptyText {
                field: self.label(),
            });
        }

        match self.validator {
            Validator::Text { max_len } => {
                if trimmed.chars().count() > max_len {
                    return Err(RetryReason::TooLong {
                        field: self.label(),
                        max: max_len,
                    });
                }
                Ok(trimmed.to_string())
            }
            Validator::PhoneNumber => {
                if !PHONE_PATTERN.is_match(trimmed) {
                    return Err(RetryReason::InvalidFormat {
                        field: self.label(),
                        hint: "Use digits only, optionally starting with +.".to_string(),
                    });
                }
                Ok(normalize_phone(trimmed))
            }
            Validator::ItemCode => {
                if !ITEM_CODE_PATTERN.is_match(trimmed) {
                    return Err(RetryReason::InvalidFormat {
                        field: self.label(),
                        hint: "Item codes contain letters, digits, '.', '_' or '-'.".to_string(),
                    });
                }
                Ok(trimmed.to_uppercase())
            }
            _ => Ok(trimmed.to_string()),
        }
    }

    fn label(&self) -> String {
        self.name.replace('_', " ")
    }
}

/// Accepts both `.` and `,` as decimal separator. Rejects NaN and infinities.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let normalized = raw.trim().replace(',', ".");
    if normalized.is_empty() {
        return None;
    }
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if raw.starts_with('+') {
        format!("+{digits}")
    } else {
        digits
    }
}
