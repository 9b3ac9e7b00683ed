//! Plain-text chat prompt formatting.
//!
//! A model-agnostic `Role: content` transcript with an optional block
//! describing callable functions, ending in an open `Assistant:` turn.

use serde::{Deserialize, Serialize};

const SYSTEM_LINE: &str = "System: You are a helpful assistant capable of calling functions \
by returning a JSON object with keys 'name' and 'arguments'.";

/// A single chat message (role + content).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

/// A function the model may ask the host to call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON schema of the arguments object.
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

/// How strongly the prompt steers toward a function call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FunctionCallMode {
    #[default]
    Auto,
    /// Forbid function calls.
    None,
    /// Require a call to the named function.
    Force(String),
}

/// Render `messages` (and any `functions`) into a single prompt string.
pub fn build_prompt(
    messages: &[ChatMessage],
    functions: &[FunctionDefinition],
    mode: &FunctionCallMode,
) -> String {
    let mut lines = vec![SYSTEM_LINE.to_string()];

    if !functions.is_empty() {
        lines.push(
            "Tools: The following functions are available. Describe parameters using JSON schema."
                .into(),
        );
        for f in functions {
            let schema = if has_properties(f.parameters.as_ref()) {
                "(schema present)"
            } else {
                "(no schema)"
            };
            lines.push(format!(
                "- {}: {} {schema}",
                f.name,
                f.description.as_deref().unwrap_or_default()
            ));
        }
        lines.push(match mode {
            FunctionCallMode::None => {
                "Directive: Do NOT call any function. Provide a plain text answer.".into()
            }
            FunctionCallMode::Force(name) => {
                format!("Directive: You MUST call function named '{name}'.")
            }
            FunctionCallMode::Auto => {
                "Directive: Call a function when appropriate; otherwise, reply with text.".into()
            }
        });
    }

    for m in messages {
        lines.push(format!(
            "{}: {}",
            capitalize(&m.role),
            m.content.as_deref().unwrap_or_default()
        ));
    }
    lines.push("Assistant:".into());
    lines.join("\n")
}

fn has_properties(schema: Option<&serde_json::Value>) -> bool {
    schema
        .and_then(|s| s.get("properties"))
        .is_some_and(|p| !p.is_null())
}

fn capitalize(role: &str) -> String {
    let mut chars = role.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
