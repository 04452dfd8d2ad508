use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Transport-neutral message: text plus the options the actor may pick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub text: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub key: String,
    pub label: String,
}

impl Choice {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
        }
    }
}

impl Prompt {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            choices: Vec::new(),
        }
    }

    pub fn with_choice(mut self, key: impl Into<String>, label: impl Into<String>) -> Self {
        self.choices.push(Choice::new(key, label));
        self
    }

    /// Prefix the text with a line, keeping the choices.
    pub fn prefixed(mut self, line: impl AsRef<str>) -> Self {
        self.text = format!("{}\n{}", line.as_ref(), self.text);
        self
    }

    pub fn has_choice(&self, key: &str) -> bool {
        self.choices.iter().any(|c| c.key == key)
    }
}

/// Static prompt text for a workflow state. `{name}` placeholders are filled
/// from session data at render time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTemplate {
    pub text: &'static str,
    pub choices: &'static [(&'static str, &'static str)],
}

impl PromptTemplate {
    pub const fn new(text: &'static str) -> Self {
        Self { text, choices: &[] }
    }

    pub const fn with_choices(
        text: &'static str,
        choices: &'static [(&'static str, &'static str)],
    ) -> Self {
        Self { text, choices }
    }

    pub fn render(&self, vars: &HashMap<&str, String>) -> Prompt {
        let mut text = self.text.to_string();
        for (name, value) in vars {
            text = text.replace(&format!("{{{name}}}"), value);
        }
        Prompt {
            text,
            choices: self
                .choices
                .iter()
                .map(|(key, label)| Choice::new(*key, *label))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_renders_placeholders_and_choices() {
        let template = PromptTemplate::with_choices(
            "Bunker {position} of {total}: remains?",
            &[("cancel", "Cancel")],
        );
        let vars = HashMap::from([("position", "2".to_string()), ("total", "3".to_string())]);
        let prompt = template.render(&vars);
        assert_eq!(prompt.text, "Bunker 2 of 3: remains?");
        assert!(prompt.has_choice("cancel"));
    }

    #[test]
    fn test_unknown_placeholders_are_left_in_place() {
        let prompt = PromptTemplate::new("Hello {name}").render(&HashMap::new());
        assert_eq!(prompt.text, "Hello {name}");
    }
}
