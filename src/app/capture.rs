use crate::app::context::Instance;
use crate::app::signal::Signal;
use derivative::*;
use jsonpath::Selector;
use liquid::Object;
use serde_json::Value;

pub type CaptureValue = liquid::model::Value;

pub trait Convert<T> {
    fn convert(&self) -> T;
}

impl Convert<CaptureValue> for Value {
    fn convert(&self) -> CaptureValue {
        match self {
            Value::Null => CaptureValue::Nil,
            Value::Number(num) => match num.as_i64() {
                Some(int) => CaptureValue::scalar(int),
                None => CaptureValue::scalar(num.as_f64().unwrap_or_default()),
            },
            Value::Bool(boolean) => CaptureValue::scalar(*boolean),
            Value::String(string) => CaptureValue::scalar(string.to_string()),
            Value::Array(array) => CaptureValue::Array(array.iter().map(Value::convert).collect()),
            Value::Object(object) => {
                let mut liq_object = Object::new();
                for (key, value) in object {
                    liq_object.insert(key.clone().into(), value.convert());
                }
                CaptureValue::Object(liq_object)
            }
        }
    }
}

/// Extracts a value from a response body.
#[derive(Derivative)]
#[derivative(Debug)]
pub enum Capture {
    Json(#[derivative(Debug = "ignore")] Selector, String),
}

impl Capture {
    pub fn json(expression: &str) -> Result<Self, Signal> {
        let selector = Selector::new(expression).map_err(|err| {
            Signal::fatal(format!("Invalid JSON path '{}': {:?}", expression, err))
        })?;
        Ok(Capture::Json(selector, expression.to_owned()))
    }

    /// One match yields the value itself, several an array, none `None`.
    pub fn capture(&self, data: &Value) -> Option<Value> {
        match self {
            Capture::Json(selector, expression) => {
                let mut captured: Vec<Value> = selector.find(data).cloned().collect();
                trace!("Captured {} value(s) with {}", captured.len(), expression);
                match captured.len() {
                    0 => None,
                    1 => captured.pop(),
                    _ => Some(Value::Array(captured)),
                }
            }
        }
    }

    /// Captures into `field`, returning whether anything was found.
    pub fn capture_into(&self, data: &Value, instance: &mut Instance, field: &str) -> bool {
        match self.capture(data) {
            Some(value) => {
                instance.set(field, value);
                true
            }
            None => false,
        }
    }
}
