//! The session: owner of every registered object, the undo/redo stack and the
//! constraint registry.
//!
//! Objects are addressed by unique name. All edits that should be undoable go
//! through `Session` setters, which snapshot the edited object before and after
//! the change and push the pair onto the [`UndoStack`].

mod map;
mod undo;

pub use map::ObjectMap;
pub use undo::{Command, UndoStack};

use crate::constraints::{Constraint, ConstraintId};
use crate::error::{CoreError, Result};
use crate::objects::{BaseCollection, BaseObj, Object, ObjectKind};
use crate::variable::{
    Descriptor, DescriptorAnyType, DescriptorArray, DescriptorBool, DescriptorNumber,
    DescriptorStr, Parameter,
};
use indexmap::IndexMap;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Turn ignored writes (e.g. to disabled parameters) into errors.
    pub debug: bool,
    /// Initial state of the undo/redo stack.
    pub undo_enabled: bool,
    /// Oldest steps are dropped beyond this many; unbounded when `None`.
    pub max_history: Option<usize>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            debug: false,
            undo_enabled: false,
            max_history: None,
        }
    }
}

impl SessionSettings {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Registry of objects, history and constraints.
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) objects: ObjectMap,
    pub(crate) stack: UndoStack,
    pub(crate) constraints: IndexMap<ConstraintId, Constraint>,
    pub(crate) next_constraint_id: u64,
    pub(crate) settings: SessionSettings,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_settings(SessionSettings::default())
    }

    pub fn with_settings(settings: SessionSettings) -> Self {
        Self {
            objects: ObjectMap::new(),
            stack: UndoStack::new(settings.undo_enabled, settings.max_history),
            constraints: IndexMap::new(),
            next_constraint_id: 0,
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.settings.debug = debug;
    }

    pub fn objects(&self) -> &ObjectMap {
        &self.objects
    }

    pub fn stack(&self) -> &UndoStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut UndoStack {
        &mut self.stack
    }

    // --- Registration ---

    /// Registers an object and returns its unique name. Groups and collections
    /// may only reference objects that are already registered.
    pub fn add(&mut self, object: impl Into<Object>) -> Result<String> {
        let object = object.into();
        for child in object.references() {
            if !self.objects.contains(&child) {
                return Err(CoreError::NotFound(child));
            }
        }
        let key = self.objects.insert(object)?;
        debug!(key = %key, "registered object");
        Ok(key)
    }

    pub fn get(&self, key: &str) -> Result<&Object> {
        self.objects.get(key)
    }

    pub fn get_as<T: ObjectKind>(&self, key: &str) -> Result<&T> {
        let object = self.objects.get(key)?;
        T::from_object(object).ok_or_else(|| CoreError::type_mismatch(T::KIND, object.class_name()))
    }

    /// Mutable access that bypasses the undo stack and constraints.
    pub(crate) fn get_as_mut<T: ObjectKind>(&mut self, key: &str) -> Result<&mut T> {
        let object = self.objects.get_mut(key)?;
        let got = object.class_name().to_string();
        T::from_object_mut(object).ok_or_else(|| CoreError::type_mismatch(T::KIND, &got))
    }

    pub fn number(&self, key: &str) -> Result<&DescriptorNumber> {
        self.get_as(key)
    }

    pub fn parameter(&self, key: &str) -> Result<&Parameter> {
        self.get_as(key)
    }

    pub fn array(&self, key: &str) -> Result<&DescriptorArray> {
        self.get_as(key)
    }

    pub fn string(&self, key: &str) -> Result<&DescriptorStr> {
        self.get_as(key)
    }

    pub fn boolean(&self, key: &str) -> Result<&DescriptorBool> {
        self.get_as(key)
    }

    pub fn any(&self, key: &str) -> Result<&DescriptorAnyType> {
        self.get_as(key)
    }

    pub fn group(&self, key: &str) -> Result<&BaseObj> {
        self.get_as(key)
    }

    pub fn collection(&self, key: &str) -> Result<&BaseCollection> {
        self.get_as(key)
    }

    /// Value of a number or parameter.
    pub fn value(&self, key: &str) -> Result<f64> {
        let object = self.get(key)?;
        object
            .numeric_value()
            .ok_or_else(|| CoreError::type_mismatch("DescriptorNumber or Parameter", object.class_name()))
    }

    /// Unregisters an object as one undo step. References to it are dropped
    /// from groups and collections, and undo restores both. Constraints that
    /// mention it are removed for good.
    pub fn remove(&mut self, key: &str) -> Result<Object> {
        self.objects.get(key)?;
        let stale: Vec<ConstraintId> = self
            .constraints
            .iter()
            .filter(|(_, c)| c.dependent() == key || c.independents().iter().any(|i| i == key))
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            self.remove_constraint(id)?;
        }

        let text = format!("Removing {key}");
        let own_macro = !self.stack.is_macro_open();
        if own_macro {
            self.stack.begin_macro(text.clone())?;
        }
        let outcome = self.unregister(key, &text);
        if own_macro {
            if outcome.is_ok() {
                self.stack.end_macro()?;
            } else {
                self.stack.abort_macro();
            }
        }
        if !self.stack.enabled() {
            self.stack.forget(key);
        }
        let removed = outcome?;
        debug!(key, "removed object");
        Ok(removed)
    }

    fn unregister(&mut self, key: &str, text: &str) -> Result<Object> {
        for parent in self.objects.parents(key) {
            self.edit(&parent, text.to_string(), |object| {
                match object {
                    Object::Group(group) => {
                        let attributes: Vec<String> = group
                            .children()
                            .iter()
                            .filter(|(_, child)| *child == key)
                            .map(|(attribute, _)| attribute.clone())
                            .collect();
                        for attribute in attributes {
                            group.remove_child(&attribute);
                        }
                    }
                    Object::Collection(collection) => collection.retain(|item| item != key),
                    _ => {}
                }
                Ok(())
            })?;
        }
        let (index, removed) = self.objects.remove_full(key)?;
        self.stack.push(Command::removal(key, index, removed.clone(), text));
        Ok(removed)
    }

    /// Drops every object, constraint and history entry.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.constraints.clear();
        self.stack.clear();
    }

    // --- Recording ---

    /// Runs `edit` on an object and records the change as one undo step.
    /// On error the object is restored and nothing is recorded.
    pub(crate) fn edit<F>(&mut self, key: &str, text: String, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Object) -> Result<()>,
    {
        let object = self.objects.get_mut(key)?;
        let before = object.clone();
        if let Err(err) = edit(object) {
            *object = before;
            return Err(err);
        }
        if *object == before {
            return Ok(());
        }
        let after = object.clone();
        self.stack.push(Command::snapshot(key, before, after, text));
        Ok(())
    }

    pub(crate) fn edit_as<T, F>(&mut self, key: &str, text: String, edit: F) -> Result<()>
    where
        T: ObjectKind,
        F: FnOnce(&mut T) -> Result<()>,
    {
        self.edit(key, text, |object| {
            let got = object.class_name().to_string();
            let inner = T::from_object_mut(object).ok_or_else(|| CoreError::type_mismatch(T::KIND, &got))?;
            edit(inner)
        })
    }

    /// Like [`edit`](Self::edit) but for edits that touch either kind of number.
    fn edit_numeric<F, G>(&mut self, key: &str, text: String, on_number: F, on_parameter: G) -> Result<()>
    where
        F: FnOnce(&mut DescriptorNumber) -> Result<()>,
        G: FnOnce(&mut Parameter) -> Result<()>,
    {
        self.edit(key, text, |object| match object {
            Object::Number(n) => on_number(n),
            Object::Parameter(p) => on_parameter(p),
            other => Err(CoreError::type_mismatch(
                "DescriptorNumber or Parameter",
                other.class_name(),
            )),
        })
    }

    // --- Metadata ---

    pub fn set_name(&mut self, key: &str, name: &str) -> Result<()> {
        let name = name.to_string();
        self.edit(key, format!("Setting name of {key}"), |o| {
            o.meta_mut().name = name;
            Ok(())
        })
    }

    pub fn set_display_name(&mut self, key: &str, display_name: &str) -> Result<()> {
        let display_name = display_name.to_string();
        self.edit(key, format!("Setting display_name of {key}"), |o| {
            o.meta_mut().display_name = Some(display_name);
            Ok(())
        })
    }

    pub fn set_description(&mut self, key: &str, description: &str) -> Result<()> {
        let description = description.to_string();
        self.edit(key, format!("Setting description of {key}"), |o| {
            o.meta_mut().description = description;
            Ok(())
        })
    }

    pub fn set_url(&mut self, key: &str, url: &str) -> Result<()> {
        let url = url.to_string();
        self.edit(key, format!("Setting url of {key}"), |o| {
            o.meta_mut().url = url;
            Ok(())
        })
    }

    // --- Numbers and parameters ---

    /// Sets the value of a number, or of a parameter through its bounds and
    /// user constraints.
    pub fn set_value(&mut self, key: &str, value: f64) -> Result<()> {
        if let Object::Parameter(_) = self.get(key)? {
            return self.write_parameter_value(key, value, 0);
        }
        self.edit_as::<DescriptorNumber, _>(key, format!("Setting value of {key}"), |n| {
            n.set_value(value);
            Ok(())
        })
    }

    pub fn set_variance(&mut self, key: &str, variance: Option<f64>) -> Result<()> {
        self.edit_numeric(
            key,
            format!("Setting variance of {key}"),
            |n| n.set_variance(variance),
            |p| p.set_variance(variance),
        )
    }

    pub fn set_error(&mut self, key: &str, error: Option<f64>) -> Result<()> {
        self.edit_numeric(
            key,
            format!("Setting error of {key}"),
            |n| n.set_error(error),
            |p| p.set_error(error),
        )
    }

    pub fn convert_unit(&mut self, key: &str, unit: &str) -> Result<()> {
        self.edit(key, format!("Setting unit of {key}"), |object| match object {
            Object::Number(n) => n.convert_unit(unit),
            Object::Parameter(p) => p.convert_unit(unit),
            Object::Array(a) => a.convert_unit(unit),
            other => Err(CoreError::type_mismatch("a numeric descriptor", other.class_name())),
        })
    }

    pub fn set_min(&mut self, key: &str, min: f64) -> Result<()> {
        self.edit_as::<Parameter, _>(key, format!("Setting min of {key}"), |p| p.set_min(min))
    }

    pub fn set_max(&mut self, key: &str, max: f64) -> Result<()> {
        self.edit_as::<Parameter, _>(key, format!("Setting max of {key}"), |p| p.set_max(max))
    }

    /// Sets both bounds as one undo step, enabling and freeing the parameter.
    /// The value is moved inside the new bounds if needed. Nothing changes on
    /// failure.
    pub fn set_bounds(&mut self, key: &str, min: f64, max: f64) -> Result<()> {
        let original = self.parameter(key)?.clone();
        self.stack.begin_macro("Setting bounds")?;
        let outcome = self.apply_bounds(key, min, max);
        if let Err(err) = outcome {
            self.stack.abort_macro();
            self.objects.replace(key, Object::Parameter(original))?;
            return Err(err);
        }
        self.stack.end_macro()
    }

    fn apply_bounds(&mut self, key: &str, min: f64, max: f64) -> Result<()> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(CoreError::Value(format!(
                "invalid bounds [{min}:{max}] for '{key}'"
            )));
        }
        self.set_enabled(key, true)?;
        self.set_fixed(key, false)?;
        self.edit_as::<Parameter, _>(key, format!("Setting bounds of {key}"), |p| {
            p.replace_bounds(min, max);
            Ok(())
        })
    }

    pub fn set_fixed(&mut self, key: &str, fixed: bool) -> Result<()> {
        self.edit_as::<Parameter, _>(key, format!("Setting fixed of {key}"), |p| {
            p.set_fixed(fixed);
            Ok(())
        })
    }

    pub fn set_free(&mut self, key: &str, free: bool) -> Result<()> {
        self.set_fixed(key, !free)
    }

    pub fn set_enabled(&mut self, key: &str, enabled: bool) -> Result<()> {
        self.edit_as::<Parameter, _>(key, format!("Setting enabled of {key}"), |p| {
            p.set_enabled(enabled);
            Ok(())
        })
    }

    // --- Other descriptors ---

    pub fn set_string(&mut self, key: &str, value: &str) -> Result<()> {
        self.edit_as::<DescriptorStr, _>(key, format!("Setting value of {key}"), |d| {
            d.set_value(value);
            Ok(())
        })
    }

    pub fn set_bool(&mut self, key: &str, value: bool) -> Result<()> {
        self.edit_as::<DescriptorBool, _>(key, format!("Setting value of {key}"), |d| {
            d.set_value(value);
            Ok(())
        })
    }

    pub fn set_any(&mut self, key: &str, value: impl Into<serde_json::Value>) -> Result<()> {
        let value = value.into();
        self.edit_as::<DescriptorAnyType, _>(key, format!("Setting value of {key}"), |d| {
            d.set_value(value);
            Ok(())
        })
    }

    pub fn set_array_value(&mut self, key: &str, value: DMatrix<f64>) -> Result<()> {
        self.edit_as::<DescriptorArray, _>(key, format!("Setting value of {key}"), |a| a.set_value(value))
    }

    pub fn set_array_variance(&mut self, key: &str, variance: Option<DMatrix<f64>>) -> Result<()> {
        self.edit_as::<DescriptorArray, _>(key, format!("Setting variance of {key}"), |a| {
            a.set_variance(variance)
        })
    }

    // --- History ---

    pub fn begin_macro(&mut self, text: &str) -> Result<()> {
        self.stack.begin_macro(text)
    }

    pub fn end_macro(&mut self) -> Result<()> {
        self.stack.end_macro()
    }

    /// Undoes the latest step, then re-applies the external constraints of the
    /// parameters it touched.
    pub fn undo(&mut self) -> Result<()> {
        let touched = self.stack.undo(&mut self.objects)?;
        self.reapply_constraints(&touched)
    }

    pub fn redo(&mut self) -> Result<()> {
        let touched = self.stack.redo(&mut self.objects)?;
        self.reapply_constraints(&touched)
    }
}
