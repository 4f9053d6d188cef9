//! Runtime argument schemas for dynamic topics.
//!
//! Typed [`Event`](crate::event::Event) variants are checked by the compiler.
//! Topics that only exist at runtime can declare the shape of their payload
//! here; the event manager validates dynamic payloads against it and logs
//! any violation without blocking delivery.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Accepted JSON type for one payload argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Bool,
    Int,
    Float,
    Str,
    List,
    Map,
    Any,
}

impl ArgType {
    /// Whether `value` is of this type. `Float` also accepts integers.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ArgType::Bool => value.is_boolean(),
            ArgType::Int => value.is_i64() || value.is_u64(),
            ArgType::Float => value.is_number(),
            ArgType::Str => value.is_string(),
            ArgType::List => value.is_array(),
            ArgType::Map => value.is_object(),
            ArgType::Any => true,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ArgType::Bool => "bool",
            ArgType::Int => "int",
            ArgType::Float => "float",
            ArgType::Str => "str",
            ArgType::List => "list",
            ArgType::Map => "map",
            ArgType::Any => "any",
        }
    }
}

/// A mismatch between a payload and its topic schema.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaViolation {
    #[error("topic '{topic}': missing argument '{arg}'")]
    MissingArgument { topic: String, arg: String },

    #[error("topic '{topic}': argument '{arg}' expected {expected}, got {actual}")]
    InvalidType {
        topic: String,
        arg: String,
        expected: String,
        actual: String,
    },
}

/// Expected arguments of one topic.
///
/// Each argument lists one or more accepted types. `null` is accepted
/// unless every accepted type is [`ArgType::Bool`].
#[derive(Debug, Clone, Default)]
pub struct TopicSchema {
    args: Vec<(String, Vec<ArgType>)>,
}

impl TopicSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an argument with a single accepted type.
    pub fn arg(self, name: impl Into<String>, ty: ArgType) -> Self {
        self.arg_any_of(name, &[ty])
    }

    /// Declare an argument accepting any of `types`.
    pub fn arg_any_of(mut self, name: impl Into<String>, types: &[ArgType]) -> Self {
        self.args.push((name.into(), types.to_vec()));
        self
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Check `payload`, returning every violation found.
    pub fn validate(&self, topic: &str, payload: &Map<String, Value>) -> Vec<SchemaViolation> {
        let mut violations = Vec::new();

        for (name, types) in &self.args {
            let Some(value) = payload.get(name) else {
                violations.push(SchemaViolation::MissingArgument {
                    topic: topic.to_string(),
                    arg: name.clone(),
                });
                continue;
            };

            if value.is_null() {
                if types.iter().any(|t| *t != ArgType::Bool) {
                    continue;
                }
            } else if types.iter().any(|t| t.matches(value)) {
                continue;
            }

            violations.push(SchemaViolation::InvalidType {
                topic: topic.to_string(),
                arg: name.clone(),
                expected: types
                    .iter()
                    .map(ArgType::name)
                    .collect::<Vec<_>>()
                    .join("|"),
                actual: json_type_name(value).to_string(),
            });
        }

        violations
    }
}

/// Topic -> schema table.
#[derive(Debug, Clone, Default)]
pub struct EventSchema {
    topics: HashMap<String, TopicSchema>,
}

impl EventSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare (or replace) the schema of `topic`.
    pub fn declare(&mut self, topic: impl Into<String>, schema: TopicSchema) {
        self.topics.insert(topic.into(), schema);
    }

    pub fn get(&self, topic: &str) -> Option<&TopicSchema> {
        self.topics.get(topic)
    }

    /// Validate `payload` for `topic`. Undeclared topics always pass.
    pub fn validate(&self, topic: &str, payload: &Map<String, Value>) -> Vec<SchemaViolation> {
        self.topics
            .get(topic)
            .map(|schema| schema.validate(topic, payload))
            .unwrap_or_default()
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
