//! Objects stored in a session: descriptors, groups and collections.
//!
//! Groups ([`BaseObj`]) and collections ([`BaseCollection`]) never own their
//! children. They hold the unique names of other registered objects, so the
//! same parameter can be shared between several groups and edits to it are
//! recorded once.

use crate::error::{CoreError, Result};
use crate::session::Session;
use crate::variable::{
    impl_meta_builders, Descriptor, DescriptorAnyType, DescriptorArray, DescriptorBool,
    DescriptorMeta, DescriptorNumber, DescriptorStr, Parameter,
};
use indexmap::{IndexMap, IndexSet};
use std::fmt;

/// Any object that can be registered in a [`Session`].
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Number(DescriptorNumber),
    Parameter(Parameter),
    Array(DescriptorArray),
    Str(DescriptorStr),
    Bool(DescriptorBool),
    Any(DescriptorAnyType),
    Group(BaseObj),
    Collection(BaseCollection),
}

macro_rules! dispatch {
    ($object:expr, $inner:ident => $body:expr) => {
        match $object {
            Object::Number($inner) => $body,
            Object::Parameter($inner) => $body,
            Object::Array($inner) => $body,
            Object::Str($inner) => $body,
            Object::Bool($inner) => $body,
            Object::Any($inner) => $body,
            Object::Group($inner) => $body,
            Object::Collection($inner) => $body,
        }
    };
}

impl Descriptor for Object {
    fn meta(&self) -> &DescriptorMeta {
        dispatch!(self, inner => inner.meta())
    }

    fn meta_mut(&mut self) -> &mut DescriptorMeta {
        dispatch!(self, inner => inner.meta_mut())
    }

    fn class_name(&self) -> &str {
        dispatch!(self, inner => inner.class_name())
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dispatch!(self, inner => fmt::Display::fmt(inner, f))
    }
}

impl Object {
    /// Unique names of the objects this one refers to.
    pub fn references(&self) -> Vec<String> {
        match self {
            Object::Group(group) => group.children.values().cloned().collect(),
            Object::Collection(collection) => collection.items.clone(),
            _ => Vec::new(),
        }
    }

    /// Value of a numeric descriptor.
    pub fn numeric_value(&self) -> Option<f64> {
        match self {
            Object::Number(n) => Some(n.value()),
            Object::Parameter(p) => Some(p.value()),
            _ => None,
        }
    }
}

/// Typed access to the variants of [`Object`].
pub trait ObjectKind: Sized {
    const KIND: &'static str;

    fn from_object(object: &Object) -> Option<&Self>;
    fn from_object_mut(object: &mut Object) -> Option<&mut Self>;
}

macro_rules! object_kinds {
    ($($variant:ident => $ty:ident),* $(,)?) => {
        $(
            impl From<$ty> for Object {
                fn from(value: $ty) -> Self {
                    Object::$variant(value)
                }
            }

            impl ObjectKind for $ty {
                const KIND: &'static str = stringify!($ty);

                fn from_object(object: &Object) -> Option<&Self> {
                    match object {
                        Object::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }

                fn from_object_mut(object: &mut Object) -> Option<&mut Self> {
                    match object {
                        Object::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }
            }
        )*
    };
}

object_kinds!(
    Number => DescriptorNumber,
    Parameter => Parameter,
    Array => DescriptorArray,
    Str => DescriptorStr,
    Bool => DescriptorBool,
    Any => DescriptorAnyType,
    Group => BaseObj,
    Collection => BaseCollection,
);

/// A named group of child objects addressed by attribute name.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseObj {
    pub(crate) meta: DescriptorMeta,
    class_name: String,
    children: IndexMap<String, String>,
}

impl_meta_builders!(@builders BaseObj);

impl BaseObj {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_class("BaseObj", name)
    }

    /// A group reporting `class_name` (e.g. `Line`) as its type.
    pub fn with_class(class_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            meta: DescriptorMeta::new(name),
            class_name: class_name.into(),
            children: IndexMap::new(),
        }
    }

    pub fn with_child(mut self, attribute: impl Into<String>, key: impl Into<String>) -> Self {
        self.insert_child(attribute, key);
        self
    }

    pub(crate) fn insert_child(&mut self, attribute: impl Into<String>, key: impl Into<String>) {
        self.children.insert(attribute.into(), key.into());
    }

    pub(crate) fn remove_child(&mut self, attribute: &str) -> Option<String> {
        self.children.shift_remove(attribute)
    }

    pub fn child_key(&self, attribute: &str) -> Option<&str> {
        self.children.get(attribute).map(String::as_str)
    }

    /// Attribute name to child unique name, in insertion order.
    pub fn children(&self) -> &IndexMap<String, String> {
        &self.children
    }

    pub fn group_class(&self) -> &str {
        &self.class_name
    }
}

impl Descriptor for BaseObj {
    fn meta(&self) -> &DescriptorMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut DescriptorMeta {
        &mut self.meta
    }

    fn class_name(&self) -> &str {
        &self.class_name
    }
}

impl fmt::Display for BaseObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attributes: Vec<&str> = self.children.keys().map(String::as_str).collect();
        write!(f, "<{} '{}': {}>", self.class_name, self.meta.name, attributes.join(", "))
    }
}

/// An ordered list of object references.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseCollection {
    pub(crate) meta: DescriptorMeta,
    items: Vec<String>,
}

impl_meta_builders!(BaseCollection);

impl BaseCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: DescriptorMeta::new(name),
            items: Vec::new(),
        }
    }

    pub fn with_items<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.items.extend(items.into_iter().map(Into::into));
        self
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn check_index(&self, index: usize, allow_end: bool) -> Result<()> {
        let limit = if allow_end { self.items.len() + 1 } else { self.items.len() };
        if index < limit {
            Ok(())
        } else {
            Err(CoreError::Value(format!(
                "index {index} out of range for collection '{}' of length {}",
                self.meta.name,
                self.items.len()
            )))
        }
    }

    pub(crate) fn insert(&mut self, index: usize, key: String) -> Result<()> {
        self.check_index(index, true)?;
        self.items.insert(index, key);
        Ok(())
    }

    pub(crate) fn remove(&mut self, index: usize) -> Result<String> {
        self.check_index(index, false)?;
        Ok(self.items.remove(index))
    }

    pub(crate) fn retain(&mut self, keep: impl FnMut(&String) -> bool) {
        self.items.retain(keep);
    }

    pub(crate) fn set_item(&mut self, index: usize, key: String) -> Result<()> {
        self.check_index(index, false)?;
        self.items[index] = key;
        Ok(())
    }
}

impl fmt::Display for BaseCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BaseCollection `{}` of length {}", self.meta.name, self.items.len())
    }
}

impl Session {
    /// Registers a group of class `class_name` over already registered
    /// children, given as `(attribute, unique name)` pairs.
    pub fn add_group(&mut self, class_name: &str, name: &str, children: &[(&str, &str)]) -> Result<String> {
        let group = children
            .iter()
            .fold(BaseObj::with_class(class_name, name), |group, (attribute, key)| {
                group.with_child(*attribute, *key)
            });
        self.add(group)
    }

    /// The child registered under `attribute` of group `group`.
    pub fn child(&self, group: &str, attribute: &str) -> Result<&Object> {
        let key = self.group(group)?.child_key(attribute).ok_or_else(|| {
            CoreError::Attribute(format!("'{group}' has no attribute '{attribute}'"))
        })?;
        self.get(key)
    }

    /// Points `attribute` of a group at another registered object.
    pub fn set_child(&mut self, group: &str, attribute: &str, child: &str) -> Result<()> {
        self.get(child)?;
        let child = child.to_string();
        let attribute = attribute.to_string();
        self.edit_as::<BaseObj, _>(group, format!("Setting {attribute} of {group}"), move |g| {
            g.insert_child(attribute, child);
            Ok(())
        })
    }

    pub fn collection_insert(&mut self, collection: &str, index: usize, item: &str) -> Result<()> {
        self.get(item)?;
        let item = item.to_string();
        self.edit_as::<BaseCollection, _>(
            collection,
            format!("Inserting into {collection}"),
            move |c| c.insert(index, item),
        )
    }

    pub fn collection_push(&mut self, collection: &str, item: &str) -> Result<()> {
        let end = self.collection(collection)?.len();
        self.collection_insert(collection, end, item)
    }

    /// Removes the item at `index`, returning its key. The item stays registered.
    pub fn collection_remove(&mut self, collection: &str, index: usize) -> Result<String> {
        let mut removed = String::new();
        self.edit_as::<BaseCollection, _>(
            collection,
            format!("Removing from {collection}"),
            |c| {
                removed = c.remove(index)?;
                Ok(())
            },
        )?;
        Ok(removed)
    }

    pub fn collection_set_item(&mut self, collection: &str, index: usize, item: &str) -> Result<()> {
        self.get(item)?;
        let item = item.to_string();
        self.edit_as::<BaseCollection, _>(
            collection,
            format!("Setting item {index} of {collection}"),
            move |c| c.set_item(index, item),
        )
    }

    /// Unique names of every parameter reachable from `key`, depth first.
    pub fn get_parameters(&self, key: &str) -> Result<Vec<String>> {
        let mut found = IndexSet::new();
        let mut visited = IndexSet::new();
        self.collect_parameters(key, &mut found, &mut visited)?;
        Ok(found.into_iter().collect())
    }

    /// Parameters reachable from `key` that are free and enabled.
    pub fn get_fit_parameters(&self, key: &str) -> Result<Vec<String>> {
        let mut fit = Vec::new();
        for name in self.get_parameters(key)? {
            let parameter = self.parameter(&name)?;
            if parameter.free() && parameter.enabled() {
                fit.push(name);
            }
        }
        Ok(fit)
    }

    fn collect_parameters(
        &self,
        key: &str,
        found: &mut IndexSet<String>,
        visited: &mut IndexSet<String>,
    ) -> Result<()> {
        if !visited.insert(key.to_string()) {
            return Ok(());
        }
        let object = self.get(key)?;
        if let Object::Parameter(_) = object {
            found.insert(key.to_string());
        }
        for child in object.references() {
            self.collect_parameters(&child, found, visited)?;
        }
        Ok(())
    }
}
