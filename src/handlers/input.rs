use crate::session::RawInput;
use crate::workflows::{parse_decimal, InputClass};

const CANCEL_WORDS: [&str; 3] = ["cancel", "/cancel", "stop"];

/// Raw input after cancellation has been recognised.
#[derive(Debug, Clone, PartialEq)]
pub enum StepInput {
    Text(String),
    Photo(String),
    Location { latitude: f64, longitude: f64 },
    Choice(String),
    Cancel,
}

impl StepInput {
    pub fn from_raw(raw: &RawInput) -> Self {
        match raw {
            RawInput::Text { text } if is_cancel_word(text) => StepInput::Cancel,
            RawInput::Choice { key } if is_cancel_word(key) => StepInput::Cancel,
            RawInput::Text { text } => StepInput::Text(text.trim().to_string()),
            RawInput::Choice { key } => StepInput::Choice(key.trim().to_string()),
            RawInput::Photo { attachment_id } => StepInput::Photo(attachment_id.clone()),
            RawInput::Location {
                latitude,
                longitude,
            } => StepInput::Location {
                latitude: *latitude,
                longitude: *longitude,
            },
        }
    }

    /// Shape of the input, for logging and wrong-class replies.
    pub fn class(&self) -> InputClass {
        match self {
            StepInput::Text(text) if parse_decimal(text).is_some() => InputClass::Numeric,
            StepInput::Text(_) => InputClass::FreeText,
            StepInput::Photo(_) => InputClass::PhotoAttachment,
            StepInput::Location { .. } => InputClass::GeoCoordinate,
            StepInput::Choice(_) => InputClass::MenuSelection,
            StepInput::Cancel => InputClass::Cancellation,
        }
    }

    /// Menu key for a selection. Typed text matching a key counts as picking it.
    pub fn menu_key(&self) -> Option<&str> {
        match self {
            StepInput::Choice(key) => Some(key),
            StepInput::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn selects(&self, key: &str) -> bool {
        self.menu_key()
            .is_some_and(|k| k.eq_ignore_ascii_case(key))
    }
}

fn is_cancel_word(text: &str) -> bool {
    let text = text.trim();
    CANCEL_WORDS.iter().any(|w| text.eq_ignore_ascii_case(w))
}
