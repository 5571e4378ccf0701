use crate::app::capture::Convert;
use derivative::*;
use liquid::{Object, Parser};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Session state shared by the sequences of one testing session. Tests read
/// their inputs from it and write their outputs back by field name.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct Instance {
    id: Uuid,
    fields: Map<String, Value>,
    #[derivative(Debug = "ignore")]
    parser: Arc<Parser>,
}

impl Instance {
    pub fn new() -> Result<Self, liquid::Error> {
        Self::with_fields(Map::new())
    }

    pub fn with_fields<T>(iter: T) -> Result<Self, liquid::Error>
    where
        T: IntoIterator<Item = (String, Value)>,
    {
        Ok(Self {
            id: Uuid::new_v4(),
            fields: iter.into_iter().collect(),
            parser: Arc::new(liquid::ParserBuilder::with_stdlib().build()?),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|value| !value.is_null())
    }

    /// String value of a field; empty strings count as absent.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn has(&self, name: &str) -> bool {
        match self.get(name) {
            Some(Value::String(value)) => !value.is_empty(),
            Some(_) => true,
            None => false,
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        trace!("Instance {} field '{}' = {}", self.id, name, value);
        self.fields.insert(name, value);
    }

    pub fn missing<'a>(&self, names: &'a [String]) -> Vec<&'a str> {
        names
            .iter()
            .filter(|name| !self.has(name))
            .map(String::as_str)
            .collect()
    }

    /// Renders a liquid template against the instance fields.
    pub fn render(&self, template: &str) -> Result<String, liquid::Error> {
        let template = self.parser.parse(template)?;
        template.render(&self.variables())
    }

    fn variables(&self) -> Object {
        let mut object = Object::new();
        for (key, value) in &self.fields {
            object.insert(key.clone().into(), value.convert());
        }
        object
    }
}
