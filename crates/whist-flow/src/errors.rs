use std::any::Any;

use serde::{Deserialize, Serialize};

/// A flow could not produce its outputs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum FlowError {
    /// The flow body returned an error while wiring its channels.
    #[error("flow {flow} failed: {message}")]
    Build { flow: String, message: String },
    /// The flow body panicked while wiring its channels.
    #[error("flow {flow} panicked: {message}")]
    Panicked { flow: String, message: String },
}

impl FlowError {
    pub fn build(flow: &str, message: impl Into<String>) -> Self {
        Self::Build {
            flow: flow.to_string(),
            message: message.into(),
        }
    }

    pub fn flow(&self) -> &str {
        match self {
            Self::Build { flow, .. } | Self::Panicked { flow, .. } => flow,
        }
    }
}

pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_flow() {
        let err = FlowError::build("auth", "no refresher");
        assert_eq!(err.to_string(), "flow auth failed: no refresher");
        assert_eq!(err.flow(), "auth");
    }

    #[test]
    fn panic_message_extracts_payloads() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("boom"));
        let borrowed: Box<dyn Any + Send> = Box::new("bang");
        let other: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&owned), "boom");
        assert_eq!(panic_message(&borrowed), "bang");
        assert_eq!(panic_message(&other), "unknown panic");
    }
}
