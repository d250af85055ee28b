//! Materialize JSON documents as object graphs.
//!
//! Every JSON object position gets its own object type, named by its route
//! from the document root (`Document`, `Document.owner`, `Document.items[*]`),
//! and every JSON array position a collection type (`Document.items[]`).
//! Shapes are merged over all documents before any type is built, so the
//! graphs share type descriptors and an object type's members are the union
//! of the keys seen at that position.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value as Json;

use graphdelta_types::{scalar, Object, ObjectRef, TypeInfo, Value};

/// Type name of the document root.
pub const ROOT_TYPE: &str = "Document";

pub fn read_document(path: &Path) -> Result<Json> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn list_type(route: &str) -> String {
    format!("{route}[]")
}

fn item_route(route: &str) -> String {
    format!("{route}[*]")
}

// ---------------------------------------------------------------
// Shape inference
// ---------------------------------------------------------------

/// Everything observed at one position across the documents.
#[derive(Debug, Default)]
struct Shape {
    scalar: Option<&'static str>,
    object: Option<BTreeMap<String, Shape>>,
    list: Option<Box<Shape>>,
}

impl Shape {
    fn observe(&mut self, json: &Json) {
        match json {
            Json::Null => {}
            Json::Bool(_) => self.observe_scalar(scalar::BOOL),
            Json::Number(n) if n.is_i64() => self.observe_scalar(scalar::INT),
            Json::Number(_) => self.observe_scalar(scalar::FLOAT),
            Json::String(_) => self.observe_scalar(scalar::STRING),
            Json::Array(items) => {
                let shape = self.list.get_or_insert_with(Box::default);
                for item in items {
                    shape.observe(item);
                }
            }
            Json::Object(map) => {
                let members = self.object.get_or_insert_with(BTreeMap::new);
                for (key, value) in map {
                    members.entry(key.clone()).or_default().observe(value);
                }
            }
        }
    }

    fn observe_scalar(&mut self, name: &'static str) {
        self.scalar = match self.scalar {
            Some(seen) if seen != name => Some(scalar::ANY),
            _ => Some(name),
        };
    }

    /// Declared type of a position holding values of this shape.
    fn declared_type(&self, route: &str) -> String {
        match (self.scalar, &self.object, &self.list) {
            (None, None, None) => scalar::NULL.to_string(),
            (Some(name), None, None) => name.to_string(),
            (None, Some(_), None) => route.to_string(),
            (None, None, Some(_)) => list_type(route),
            _ => scalar::ANY.to_string(),
        }
    }
}

// ---------------------------------------------------------------
// Schema
// ---------------------------------------------------------------

/// Type descriptors inferred from a set of documents.
#[derive(Debug, Default)]
pub struct Schema {
    types: HashMap<String, Arc<TypeInfo>>,
}

impl Schema {
    pub fn infer<'a, I>(documents: I) -> Self
    where
        I: IntoIterator<Item = &'a Json>,
    {
        let mut shape = Shape::default();
        for document in documents {
            shape.observe(document);
        }
        let mut schema = Self::default();
        schema.register(ROOT_TYPE, &shape);
        schema
    }

    fn register(&mut self, route: &str, shape: &Shape) {
        if let Some(members) = &shape.object {
            let mut builder = TypeInfo::object(route);
            for (name, member) in members {
                let member_route = format!("{route}.{name}");
                builder = builder.member(name.as_str(), member.declared_type(&member_route));
                self.register(&member_route, member);
            }
            self.types.insert(route.to_string(), builder.build());
        }
        if let Some(items) = &shape.list {
            let items_route = item_route(route);
            let list = TypeInfo::list(list_type(route), items.declared_type(&items_route));
            self.types.insert(list_type(route), list);
            self.register(&items_route, items);
        }
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<TypeInfo>> {
        self.types.get(type_name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Build the object graph of a document. The root must be a JSON object
    /// or array.
    pub fn materialize(&self, document: &Json) -> Result<ObjectRef> {
        match self.value(ROOT_TYPE, document)? {
            Value::Ref(root) => Ok(root),
            other => bail!(
                "document root must be a JSON object or array, found {}",
                other.type_name()
            ),
        }
    }

    fn value(&self, route: &str, json: &Json) -> Result<Value> {
        let value = match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::from(s.as_str()),
            Json::Array(items) => {
                let list = self.lookup(&list_type(route))?;
                let items_route = item_route(route);
                let items = items
                    .iter()
                    .map(|item| self.value(&items_route, item))
                    .collect::<Result<Vec<_>>>()?;
                Value::Ref(Object::list(list, items)?)
            }
            Json::Object(map) => {
                let ty = self.lookup(route)?;
                let mut values = Vec::with_capacity(map.len());
                for (key, value) in map {
                    values.push((key.as_str(), self.value(&format!("{route}.{key}"), value)?));
                }
                Value::Ref(Object::with_values(ty, values)?)
            }
        };
        Ok(value)
    }

    fn lookup(&self, type_name: &str) -> Result<&Arc<TypeInfo>> {
        self.types
            .get(type_name)
            .with_context(|| format!("no type inferred for {type_name}"))
    }
}
