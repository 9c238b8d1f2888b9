use crate::error::{CoreError, Result};
use crate::objects::Object;
use crate::variable::Descriptor;
use indexmap::IndexMap;

/// Registered objects keyed by unique name, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ObjectMap {
    objects: IndexMap<String, Object>,
}

impl ObjectMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// `{prefix}_{n}` with `n` one past the largest suffix in use for `prefix`.
    pub fn generate_unique_name(&self, prefix: &str) -> String {
        let next = self
            .objects
            .keys()
            .filter_map(|key| key.strip_prefix(prefix)?.strip_prefix('_')?.parse::<usize>().ok())
            .max()
            .map_or(0, |max| max + 1);
        format!("{prefix}_{next}")
    }

    /// Registers `object`, assigning a unique name when it has none.
    pub fn insert(&mut self, mut object: Object) -> Result<String> {
        let key = match object.unique_name() {
            Some(name) => name.to_string(),
            None => {
                let generated = self.generate_unique_name(object.class_name());
                object.meta_mut().unique_name = Some(generated.clone());
                generated
            }
        };
        if self.objects.contains_key(&key) {
            return Err(CoreError::Value(format!(
                "an object with unique name '{key}' is already registered"
            )));
        }
        self.objects.insert(key.clone(), object);
        Ok(key)
    }

    pub fn get(&self, key: &str) -> Result<&Object> {
        self.objects
            .get(key)
            .ok_or_else(|| CoreError::NotFound(key.to_string()))
    }

    pub fn get_mut(&mut self, key: &str) -> Result<&mut Object> {
        self.objects
            .get_mut(key)
            .ok_or_else(|| CoreError::NotFound(key.to_string()))
    }

    /// Overwrites a registered object, keeping its position.
    pub(crate) fn replace(&mut self, key: &str, object: Object) -> Result<()> {
        *self.get_mut(key)? = object;
        Ok(())
    }

    /// Writes back a recorded state. Constraint attachments live outside the
    /// history, so a parameter keeps the ones it has now.
    pub(crate) fn restore(&mut self, key: &str, mut object: Object) -> Result<()> {
        let current = self.get_mut(key)?;
        if let (Object::Parameter(now), Object::Parameter(then)) = (&*current, &mut object) {
            then.adopt_user_constraints(now);
        }
        *current = object;
        Ok(())
    }

    /// Removes `key`, also returning the position it held.
    pub(crate) fn remove_full(&mut self, key: &str) -> Result<(usize, Object)> {
        self.objects
            .shift_remove_full(key)
            .map(|(index, _, object)| (index, object))
            .ok_or_else(|| CoreError::NotFound(key.to_string()))
    }

    /// Puts a removed object back at `index` under its old key.
    pub(crate) fn reinsert(&mut self, index: usize, key: &str, object: Object) -> Result<()> {
        if self.objects.contains_key(key) {
            return Err(CoreError::Value(format!(
                "an object with unique name '{key}' is already registered"
            )));
        }
        let index = index.min(self.objects.len());
        self.objects.shift_insert(index, key.to_string(), object);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Result<Object> {
        self.objects
            .shift_remove(key)
            .ok_or_else(|| CoreError::NotFound(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Object)> {
        self.objects.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }

    /// Groups and collections that reference `key`.
    pub fn parents(&self, key: &str) -> Vec<String> {
        self.objects
            .iter()
            .filter(|(_, object)| object.references().iter().any(|child| child == key))
            .map(|(parent, _)| parent.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::BaseObj;
    use crate::variable::{DescriptorNumber, Parameter};

    #[test]
    fn unique_names_count_up_per_prefix() {
        let mut map = ObjectMap::new();
        assert_eq!(map.generate_unique_name("Parameter"), "Parameter_0");
        assert_eq!(map.insert(Parameter::new("a", 1.0).into()).unwrap(), "Parameter_0");
        assert_eq!(map.insert(Parameter::new("b", 1.0).into()).unwrap(), "Parameter_1");
        assert_eq!(
            map.insert(DescriptorNumber::new("c", 1.0).into()).unwrap(),
            "DescriptorNumber_0"
        );
        map.remove("Parameter_0").unwrap();
        assert_eq!(map.generate_unique_name("Parameter"), "Parameter_2");
    }

    #[test]
    fn explicit_unique_names_must_be_free() {
        let mut map = ObjectMap::new();
        let p = Parameter::new("a", 1.0).with_unique_name("alpha");
        assert_eq!(map.insert(p.clone().into()).unwrap(), "alpha");
        assert!(matches!(map.insert(p.into()), Err(CoreError::Value(_))));
        assert!(matches!(map.get("missing"), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn parents_lists_referencing_groups() {
        let mut map = ObjectMap::new();
        let child = map.insert(Parameter::new("m", 1.0).into()).unwrap();
        let mut group = BaseObj::new("line");
        group.insert_child("m", &child);
        let group_key = map.insert(group.into()).unwrap();
        assert_eq!(map.parents(&child), vec![group_key]);
        assert!(map.parents("nothing").is_empty());
    }
}
