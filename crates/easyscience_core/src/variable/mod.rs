//! Descriptors: named values with metadata, units and uncertainties.
//!
//! Every descriptor carries a [`DescriptorMeta`]. Numeric descriptors also carry
//! a [`Unit`](crate::units::Unit) and an optional variance; [`Parameter`] adds
//! bounds and fitting flags on top of [`DescriptorNumber`].

mod descriptor_array;
mod descriptor_misc;
mod descriptor_number;
mod parameter;

pub use descriptor_array::DescriptorArray;
pub(crate) use descriptor_array::{matrix_from_rows, matrix_to_rows};
pub use descriptor_misc::{DescriptorAnyType, DescriptorBool, DescriptorStr};
pub use descriptor_number::{DescriptorNumber, FullValue};
pub use parameter::Parameter;

use serde::{Deserialize, Serialize};

/// Metadata shared by every object in a session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DescriptorMeta {
    pub name: String,
    pub display_name: Option<String>,
    pub description: String,
    pub url: String,
    /// Assigned by the session on registration when absent.
    pub unique_name: Option<String>,
}

impl DescriptorMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Access to the metadata of a descriptor-like object.
pub trait Descriptor {
    fn meta(&self) -> &DescriptorMeta;
    fn meta_mut(&mut self) -> &mut DescriptorMeta;

    /// Type name used for unique-name prefixes and the `@class` marker.
    fn class_name(&self) -> &str;

    fn name(&self) -> &str {
        &self.meta().name
    }

    /// Pretty name; falls back to `name` when none was set.
    fn display_name(&self) -> &str {
        let meta = self.meta();
        meta.display_name.as_deref().unwrap_or(&meta.name)
    }

    fn description(&self) -> &str {
        &self.meta().description
    }

    fn url(&self) -> &str {
        &self.meta().url
    }

    fn unique_name(&self) -> Option<&str> {
        self.meta().unique_name.as_deref()
    }
}

/// Builder methods for the metadata fields, shared by all descriptor types.
macro_rules! impl_meta_builders {
    (@builders $ty:ident) => {
        impl $ty {
            pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
                self.meta.display_name = Some(display_name.into());
                self
            }

            pub fn with_description(mut self, description: impl Into<String>) -> Self {
                self.meta.description = description.into();
                self
            }

            pub fn with_url(mut self, url: impl Into<String>) -> Self {
                self.meta.url = url.into();
                self
            }

            pub fn with_unique_name(mut self, unique_name: impl Into<String>) -> Self {
                self.meta.unique_name = Some(unique_name.into());
                self
            }
        }
    };
    ($ty:ident) => {
        $crate::variable::impl_meta_builders!(@builders $ty);

        impl $crate::variable::Descriptor for $ty {
            fn meta(&self) -> &$crate::variable::DescriptorMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut $crate::variable::DescriptorMeta {
                &mut self.meta
            }

            fn class_name(&self) -> &str {
                stringify!($ty)
            }
        }
    };
}

pub(crate) use impl_meta_builders;

/// Python-style float text (`1.0`, `0.25`, `inf`) used in bound displays.
pub(crate) fn format_float(value: f64) -> String {
    if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// Operand label used when naming arithmetic results.
pub(crate) fn scalar_label(value: f64) -> String {
    value.to_string()
}
