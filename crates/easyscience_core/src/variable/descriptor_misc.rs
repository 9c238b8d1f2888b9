use super::{impl_meta_builders, Descriptor, DescriptorMeta};
use serde_json::Value;
use std::fmt;

/// A named string value.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorStr {
    pub(crate) meta: DescriptorMeta,
    value: String,
}

impl_meta_builders!(DescriptorStr);

impl DescriptorStr {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            meta: DescriptorMeta::new(name),
            value: value.into(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        self.value = value.into();
    }
}

impl fmt::Display for DescriptorStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<DescriptorStr '{}': {}>", self.name(), self.value)
    }
}

/// A named boolean flag.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorBool {
    pub(crate) meta: DescriptorMeta,
    value: bool,
}

impl_meta_builders!(DescriptorBool);

impl DescriptorBool {
    pub fn new(name: impl Into<String>, value: bool) -> Self {
        Self {
            meta: DescriptorMeta::new(name),
            value,
        }
    }

    pub fn value(&self) -> bool {
        self.value
    }

    pub fn set_value(&mut self, value: bool) {
        self.value = value;
    }
}

impl fmt::Display for DescriptorBool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<DescriptorBool '{}': {}>", self.name(), self.value)
    }
}

/// A named value of arbitrary structure (numbers, strings, lists, maps).
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorAnyType {
    pub(crate) meta: DescriptorMeta,
    value: Value,
}

impl_meta_builders!(DescriptorAnyType);

impl DescriptorAnyType {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            meta: DescriptorMeta::new(name),
            value: value.into(),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn set_value(&mut self, value: impl Into<Value>) {
        self.value = value.into();
    }
}

impl fmt::Display for DescriptorAnyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<DescriptorAnyType '{}': {}>", self.name(), self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_descriptor() {
        let mut d = DescriptorStr::new("label", "hello").with_description("greeting");
        assert_eq!(d.value(), "hello");
        d.set_value("bye");
        assert_eq!(d.to_string(), "<DescriptorStr 'label': bye>");
        assert_eq!(d.description(), "greeting");
    }

    #[test]
    fn bool_descriptor() {
        let mut d = DescriptorBool::new("flag", true);
        d.set_value(false);
        assert!(!d.value());
        assert_eq!(d.to_string(), "<DescriptorBool 'flag': false>");
    }

    #[test]
    fn any_type_holds_structured_values() {
        let mut d = DescriptorAnyType::new("payload", json!([1, 2, 3]));
        assert_eq!(d.value(), &json!([1, 2, 3]));
        d.set_value(json!({"a": 1.5}));
        assert_eq!(d.to_string(), "<DescriptorAnyType 'payload': {\"a\":1.5}>");
        d.set_value("text");
        assert_eq!(d.value(), &json!("text"));
    }
}
