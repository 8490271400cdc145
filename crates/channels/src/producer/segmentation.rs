//! Classification of call arguments into bucket segments.

use {bytes::Bytes, serde::Serialize};

use backbone_core::Result;

/// Value of one call argument before classification.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Json(serde_json::Value),
    Bytes(Bytes),
}

/// A named argument of an outgoing call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallArgument {
    pub name: String,
    pub value: ArgValue,
}

impl CallArgument {
    pub fn json<T: Serialize + ?Sized>(name: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            value: ArgValue::Json(serde_json::to_value(value)?),
        })
    }

    pub fn bytes(name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: ArgValue::Bytes(value.into()),
        }
    }
}

/// An outgoing operation with its arguments, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub operation: String,
    pub arguments: Vec<CallArgument>,
}

impl Call {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            arguments: Vec::new(),
        }
    }

    /// Add a JSON-serialized argument.
    pub fn arg<T: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Result<Self> {
        self.arguments.push(CallArgument::json(name, value)?);
        Ok(self)
    }

    /// Add a raw bytes argument.
    #[must_use]
    pub fn bytes(mut self, name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.arguments.push(CallArgument::bytes(name, value));
        self
    }
}

/// Inspects one argument and either classifies it (returns its segment
/// bytes) or passes it on to the next strategy (`None`).
///
/// The segment key is always `{operation}~{argument}`; strategies only decide
/// whether and how the value is encoded.
pub trait SegmentationStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn classify(&self, operation: &str, argument: &CallArgument) -> Result<Option<Bytes>>;
}

/// Encodes JSON arguments as UTF-8 JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSegmentation;

impl SegmentationStrategy for JsonSegmentation {
    fn name(&self) -> &str {
        "json"
    }

    fn classify(&self, _operation: &str, argument: &CallArgument) -> Result<Option<Bytes>> {
        match &argument.value {
            ArgValue::Json(value) => Ok(Some(Bytes::from(serde_json::to_vec(value)?))),
            ArgValue::Bytes(_) => Ok(None),
        }
    }
}

/// Passes raw byte arguments through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesSegmentation;

impl SegmentationStrategy for BytesSegmentation {
    fn name(&self) -> &str {
        "bytes"
    }

    fn classify(&self, _operation: &str, argument: &CallArgument) -> Result<Option<Bytes>> {
        match &argument.value {
            ArgValue::Bytes(raw) => Ok(Some(raw.clone())),
            ArgValue::Json(_) => Ok(None),
        }
    }
}
