//! Dictionary encoding of session objects.
//!
//! Full dictionaries carry `@module`, `@class` and `@version` markers and can be
//! decoded back into a session. Data dictionaries hold the same fields without
//! markers and are one-way. Groups nest their children under the attribute
//! names; collections list their items under `data`. Infinite floats are
//! stored as the strings `"inf"` and `"-inf"`.

use crate::error::{CoreError, Result};
use crate::objects::{BaseCollection, BaseObj, Object};
use crate::session::Session;
use crate::units::Unit;
use crate::variable::{
    matrix_from_rows, matrix_to_rows, Descriptor, DescriptorAnyType, DescriptorArray, DescriptorBool, DescriptorMeta,
    DescriptorNumber, DescriptorStr, Parameter,
};
use indexmap::IndexSet;
use serde_json::{json, Map, Value};
use tracing::debug;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const MARKERS: [&str; 3] = ["@module", "@class", "@version"];
const META_KEYS: [&str; 5] = ["name", "display_name", "description", "url", "unique_name"];

fn module_of(object: &Object) -> &'static str {
    match object {
        Object::Group(_) | Object::Collection(_) => "easyscience_core.objects",
        _ => "easyscience_core.variable",
    }
}

fn encode_float(value: f64) -> Value {
    if value.is_nan() {
        json!("nan")
    } else if value.is_infinite() {
        json!(if value > 0.0 { "inf" } else { "-inf" })
    } else {
        json!(value)
    }
}

fn decode_float(value: &Value, field: &str) -> Result<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| CoreError::Serialization(format!("'{field}' is out of range"))),
        Value::String(s) => match s.as_str() {
            "inf" => Ok(f64::INFINITY),
            "-inf" => Ok(f64::NEG_INFINITY),
            "nan" => Ok(f64::NAN),
            other => Err(CoreError::Serialization(format!(
                "'{field}' must be a number, got '{other}'"
            ))),
        },
        other => Err(CoreError::Serialization(format!(
            "'{field}' must be a number, got {other}"
        ))),
    }
}

fn encode_rows(rows: Vec<Vec<f64>>) -> Value {
    Value::Array(
        rows.into_iter()
            .map(|row| Value::Array(row.into_iter().map(encode_float).collect()))
            .collect(),
    )
}

fn decode_rows(value: &Value, field: &str) -> Result<Vec<Vec<f64>>> {
    let not_rows = || CoreError::Serialization(format!("'{field}' must be a list of rows"));
    value
        .as_array()
        .ok_or_else(not_rows)?
        .iter()
        .map(|row| -> Result<Vec<f64>> {
            row.as_array()
                .ok_or_else(not_rows)?
                .iter()
                .map(|v| decode_float(v, field))
                .collect()
        })
        .collect()
}

fn meta_fields(object: &Object, out: &mut Map<String, Value>) {
    let meta = object.meta();
    out.insert("name".into(), json!(meta.name));
    out.insert("display_name".into(), json!(object.display_name()));
    out.insert("description".into(), json!(meta.description));
    out.insert("url".into(), json!(meta.url));
    out.insert("unique_name".into(), json!(meta.unique_name));
}

impl Session {
    /// Full dictionary of `key`, leaving out the fields named in `skip` at
    /// every nesting level.
    pub fn as_dict(&self, key: &str, skip: &[&str]) -> Result<Value> {
        let object = self.get(key)?;
        let mut out = Map::new();
        out.insert("@module".into(), json!(module_of(object)));
        out.insert("@class".into(), json!(object.class_name()));
        out.insert("@version".into(), json!(VERSION));
        meta_fields(object, &mut out);

        match object {
            Object::Number(n) => {
                out.insert("value".into(), encode_float(n.value()));
                out.insert("variance".into(), n.variance().map_or(Value::Null, encode_float));
                out.insert("unit".into(), json!(n.unit().to_string()));
            }
            Object::Parameter(p) => {
                out.insert("value".into(), encode_float(p.value()));
                out.insert("variance".into(), p.variance().map_or(Value::Null, encode_float));
                out.insert("unit".into(), json!(p.unit().to_string()));
                out.insert("min".into(), encode_float(p.min()));
                out.insert("max".into(), encode_float(p.max()));
                out.insert("fixed".into(), json!(p.fixed()));
                out.insert("enabled".into(), json!(p.enabled()));
            }
            Object::Array(a) => {
                out.insert("value".into(), encode_rows(matrix_to_rows(a.value())));
                out.insert(
                    "variance".into(),
                    a.variance()
                        .map_or(Value::Null, |v| encode_rows(matrix_to_rows(v))),
                );
                out.insert("unit".into(), json!(a.unit().to_string()));
            }
            Object::Str(s) => {
                out.insert("value".into(), json!(s.value()));
            }
            Object::Bool(b) => {
                out.insert("value".into(), json!(b.value()));
            }
            Object::Any(a) => {
                out.insert("value".into(), a.value().clone());
            }
            Object::Group(group) => {
                for (attribute, child) in group.children() {
                    out.insert(attribute.clone(), self.as_dict(child, skip)?);
                }
            }
            Object::Collection(collection) => {
                let data = collection
                    .items()
                    .iter()
                    .map(|item| self.as_dict(item, skip))
                    .collect::<Result<Vec<_>>>()?;
                out.insert("data".into(), Value::Array(data));
            }
        }

        for field in skip {
            out.remove(*field);
        }
        Ok(Value::Object(out))
    }

    /// Like [`as_dict`](Self::as_dict) without the `@` markers.
    pub fn as_data_dict(&self, key: &str, skip: &[&str]) -> Result<Value> {
        let mut value = self.as_dict(key, skip)?;
        strip_markers(&mut value);
        Ok(value)
    }

    pub fn to_json(&self, key: &str) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.as_dict(key, &[])?)?)
    }

    /// Registers the objects described by a full dictionary and returns the
    /// unique name of the outermost one.
    pub fn from_dict(&mut self, value: &Value) -> Result<String> {
        let mut decoded = IndexSet::new();
        let key = self.decode(value, &mut decoded)?;
        debug!(key = %key, objects = decoded.len(), "decoded objects");
        Ok(key)
    }

    pub fn from_json(&mut self, text: &str) -> Result<String> {
        let value: Value = serde_json::from_str(text)?;
        self.from_dict(&value)
    }

    fn decode(&mut self, value: &Value, decoded: &mut IndexSet<String>) -> Result<String> {
        let map = value
            .as_object()
            .ok_or_else(|| CoreError::Serialization(format!("expected a dictionary, got {value}")))?;
        let class = map.get("@class").and_then(Value::as_str).ok_or_else(|| {
            CoreError::NotImplemented("dictionaries without '@class' can not be decoded".to_string())
        })?;
        let meta = decode_meta(map)?;
        if let Some(unique_name) = &meta.unique_name {
            if decoded.contains(unique_name) {
                // Shared child that was already decoded elsewhere in the tree.
                return Ok(unique_name.clone());
            }
        }

        let object: Object = match class {
            "DescriptorNumber" => decode_number(map, meta)?.into(),
            "Parameter" => decode_parameter(map, meta)?.into(),
            "DescriptorArray" => {
                let value = matrix_from_rows(&decode_rows(field(map, "value")?, "value")?)?;
                let variance = match map.get("variance") {
                    None | Some(Value::Null) => None,
                    Some(v) => Some(matrix_from_rows(&decode_rows(v, "variance")?)?),
                };
                DescriptorArray::restore(meta, value, variance, decode_unit(map)?)?.into()
            }
            "DescriptorStr" => {
                let text = field(map, "value")?
                    .as_str()
                    .ok_or_else(|| CoreError::Serialization("'value' must be a string".to_string()))?;
                with_meta(DescriptorStr::new("", text), meta).into()
            }
            "DescriptorBool" => {
                let flag = field(map, "value")?
                    .as_bool()
                    .ok_or_else(|| CoreError::Serialization("'value' must be a boolean".to_string()))?;
                with_meta(DescriptorBool::new("", flag), meta).into()
            }
            "DescriptorAnyType" => {
                with_meta(DescriptorAnyType::new("", field(map, "value")?.clone()), meta).into()
            }
            "BaseCollection" => {
                let data = field(map, "data")?
                    .as_array()
                    .ok_or_else(|| CoreError::Serialization("'data' must be a list".to_string()))?;
                let mut items = Vec::with_capacity(data.len());
                for item in data {
                    items.push(self.decode(item, decoded)?);
                }
                with_meta(BaseCollection::new("").with_items(items), meta).into()
            }
            group_class => {
                let mut group = BaseObj::with_class(group_class, "");
                for (attribute, child) in map {
                    if MARKERS.contains(&attribute.as_str()) || META_KEYS.contains(&attribute.as_str()) {
                        continue;
                    }
                    if child.get("@class").is_some() {
                        let child_key = self.decode(child, decoded)?;
                        group = group.with_child(attribute, child_key);
                    }
                }
                with_meta(group, meta).into()
            }
        };

        let key = self.add(object)?;
        decoded.insert(key.clone());
        Ok(key)
    }
}

fn strip_markers(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|k, _| !k.starts_with('@'));
            map.values_mut().for_each(strip_markers);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_markers),
        _ => {}
    }
}

fn field<'a>(map: &'a Map<String, Value>, name: &str) -> Result<&'a Value> {
    map.get(name)
        .ok_or_else(|| CoreError::Serialization(format!("missing field '{name}'")))
}

fn optional_str(map: &Map<String, Value>, name: &str) -> Option<String> {
    map.get(name).and_then(Value::as_str).map(str::to_string)
}

fn decode_meta(map: &Map<String, Value>) -> Result<DescriptorMeta> {
    let name = field(map, "name")?
        .as_str()
        .ok_or_else(|| CoreError::Serialization("'name' must be a string".to_string()))?
        .to_string();
    // A display name equal to the name was never set explicitly.
    let display_name = optional_str(map, "display_name").filter(|d| *d != name);
    Ok(DescriptorMeta {
        display_name,
        description: optional_str(map, "description").unwrap_or_default(),
        url: optional_str(map, "url").unwrap_or_default(),
        unique_name: optional_str(map, "unique_name"),
        name,
    })
}

fn with_meta<T: Descriptor>(mut object: T, meta: DescriptorMeta) -> T {
    *object.meta_mut() = meta;
    object
}

fn decode_unit(map: &Map<String, Value>) -> Result<Unit> {
    match map.get("unit") {
        None | Some(Value::Null) => Ok(Unit::dimensionless()),
        Some(Value::String(text)) => Unit::parse(text),
        Some(other) => Err(CoreError::Serialization(format!("'unit' must be a string, got {other}"))),
    }
}

fn decode_variance(map: &Map<String, Value>) -> Result<Option<f64>> {
    match map.get("variance") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => decode_float(v, "variance").map(Some),
    }
}

fn decode_number(map: &Map<String, Value>, meta: DescriptorMeta) -> Result<DescriptorNumber> {
    let value = decode_float(field(map, "value")?, "value")?;
    DescriptorNumber::restore(meta, value, decode_variance(map)?, decode_unit(map)?)
}

fn decode_parameter(map: &Map<String, Value>, meta: DescriptorMeta) -> Result<Parameter> {
    let bound = |name: &str, default: f64| -> Result<f64> {
        map.get(name).map_or(Ok(default), |v| decode_float(v, name))
    };
    let flag = |name: &str, default: bool| map.get(name).and_then(Value::as_bool).unwrap_or(default);

    let mut parameter = Parameter::from(decode_number(map, meta)?)
        .with_fixed(flag("fixed", false))
        .with_enabled(flag("enabled", true));
    let (min, max) = (bound("min", f64::NEG_INFINITY)?, bound("max", f64::INFINITY)?);
    if min > max {
        return Err(CoreError::Serialization(format!("invalid bounds [{min}:{max}]")));
    }
    parameter.replace_bounds(min, max);
    Ok(parameter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn number_session() -> (Session, String) {
        let mut session = Session::new();
        let key = session
            .add(
                DescriptorNumber::new("a", 1.0)
                    .with_unique_name("a")
                    .with_unit("m")
                    .unwrap()
                    .with_variance(0.5)
                    .unwrap(),
            )
            .unwrap();
        (session, key)
    }

    #[test]
    fn number_dict_has_markers_and_fields() {
        let (session, key) = number_session();
        let dict = session.as_dict(&key, &[]).unwrap();
        assert_eq!(
            dict,
            json!({
                "@module": "easyscience_core.variable",
                "@class": "DescriptorNumber",
                "@version": VERSION,
                "name": "a",
                "display_name": "a",
                "description": "",
                "url": "",
                "unique_name": "a",
                "value": 1.0,
                "variance": 0.5,
                "unit": "m",
            })
        );
    }

    #[test]
    fn skipped_fields_are_left_out() {
        let (session, key) = number_session();
        let dict = session.as_dict(&key, &["unique_name", "variance"]).unwrap();
        assert!(dict.get("unique_name").is_none());
        assert!(dict.get("variance").is_none());

        let data = session.as_data_dict(&key, &[]).unwrap();
        assert!(data.get("@class").is_none());
        assert_eq!(data["value"], json!(1.0));
    }

    #[test]
    fn parameter_bounds_encode_infinity_as_text() {
        let mut session = Session::new();
        let key = session.add(Parameter::new("p", 2.0).with_min(0.0).unwrap()).unwrap();
        let dict = session.as_dict(&key, &[]).unwrap();
        assert_eq!(dict["min"], json!(0.0));
        assert_eq!(dict["max"], json!("inf"));
        assert_eq!(dict["fixed"], json!(false));
    }

    #[test]
    fn round_trip_restores_objects() {
        let mut session = Session::new();
        let p = session
            .add(Parameter::new("p", 2.0).with_unit("cm").unwrap().with_max(5.0).unwrap().with_fixed(true))
            .unwrap();
        let arr = session
            .add(DescriptorArray::new("arr", &[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap().with_unit("s").unwrap())
            .unwrap();
        let flag = session.add(DescriptorBool::new("flag", true).with_display_name("Flag")).unwrap();
        let group = session
            .add(BaseObj::with_class("Sample", "sample").with_child("p", &p).with_child("arr", &arr).with_child("flag", &flag))
            .unwrap();
        let text = session.to_json(&group).unwrap();
        let originals: Vec<Object> = [&p, &arr, &flag, &group].iter().map(|k| session.get(k).unwrap().clone()).collect();

        session.clear();
        let key = session.from_json(&text).unwrap();
        assert_eq!(key, group);
        for original in originals {
            let unique_name = original.unique_name().unwrap().to_string();
            assert_eq!(session.get(&unique_name).unwrap(), &original);
        }
    }

    #[test]
    fn collections_list_their_items() {
        let mut session = Session::new();
        let a = session.add(DescriptorNumber::new("a", 0.0)).unwrap();
        let b = session.add(DescriptorNumber::new("b", 1.0)).unwrap();
        let collection = session.add(BaseCollection::new("test").with_items([a.clone(), b])).unwrap();
        let outer = session.add(BaseObj::new("outer").with_child("b", &collection)).unwrap();

        let dict = session.as_dict(&collection, &[]).unwrap();
        assert!(dict["data"].is_array());
        assert_eq!(dict["data"][0]["unique_name"], json!(a));
        let dict = session.as_dict(&outer, &[]).unwrap();
        assert!(dict["b"].is_object());

        session.clear();
        let key = session.from_dict(&dict).unwrap();
        let decoded = session.child(&key, "b").unwrap().unique_name().unwrap().to_string();
        assert_eq!(session.collection(&decoded).unwrap().len(), 2);
    }

    #[test]
    fn shared_children_decode_once() {
        let mut session = Session::new();
        let p = session.add(Parameter::new("p", 1.0)).unwrap();
        let group = session.add(BaseObj::new("g").with_child("x", &p).with_child("y", &p)).unwrap();
        let dict = session.as_dict(&group, &[]).unwrap();
        session.clear();
        let key = session.from_dict(&dict).unwrap();
        let g = session.group(&key).unwrap();
        assert_eq!(g.child_key("x"), g.child_key("y"));
    }

    #[test]
    fn data_dicts_can_not_be_decoded() {
        let (mut session, key) = number_session();
        let data = session.as_data_dict(&key, &[]).unwrap();
        assert!(matches!(session.from_dict(&data), Err(CoreError::NotImplemented(_))));
    }
}
