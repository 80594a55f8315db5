//! Conversation content in the provider's wire shape.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Conversation role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// A function call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// The result of executing a function call, sent back in a user entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub response: serde_json::Value,
}

/// A single part of an entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn is_function_call(&self) -> bool {
        matches!(self, Self::FunctionCall(_))
    }

    pub fn is_function_response(&self) -> bool {
        matches!(self, Self::FunctionResponse(_))
    }
}

/// One history entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    /// Create a user entry with a single text part.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    /// Create a model entry with a single text part.
    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, vec![Part::text(text)])
    }

    /// Create a model entry carrying one function call.
    pub fn function_call(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self::new(
            Role::Model,
            vec![Part::FunctionCall(FunctionCall {
                id: None,
                name: name.into(),
                args,
            })],
        )
    }

    /// Create a user entry carrying one function response.
    pub fn function_response(name: impl Into<String>, response: serde_json::Value) -> Self {
        Self::new(
            Role::User,
            vec![Part::FunctionResponse(FunctionResponse {
                id: None,
                name: name.into(),
                response,
            })],
        )
    }

    pub fn has_function_call(&self) -> bool {
        self.parts.iter().any(Part::is_function_call)
    }

    pub fn has_function_response(&self) -> bool {
        self.parts.iter().any(Part::is_function_response)
    }

    /// Concatenate all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Function calls carried by this entry.
    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::FunctionCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    /// Model output is valid when it has parts and none of them is an empty text.
    pub fn is_valid_model_output(&self) -> bool {
        !self.parts.is_empty()
            && self.parts.iter().all(|part| match part {
                Part::Text(text) => !text.is_empty(),
                _ => true,
            })
    }
}
