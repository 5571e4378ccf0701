use crate::app::signal::{Outcome, Signal};
use crate::app::validator::ResourceValidator;
use crate::connection::Exchange;
use crate::time::{validate_date_search, Target};
use regex::Regex;
use serde_json::Value;
use std::fmt::Debug;

pub trait Assertable<T> {
    fn assert(&self, data: &T) -> Outcome;
}

/// Expectation on a captured value.
#[derive(Debug, Clone)]
pub enum Expectation {
    Present,
    Equal(Value),
    NotEqual(Value),
    Matches(Regex),
}

impl Assertable<Option<Value>> for Expectation {
    fn assert(&self, data: &Option<Value>) -> Outcome {
        trace!("Assertation value: {:#?} to {:#?}", data, self);
        match (self, data) {
            (Expectation::Present, Some(_)) => Ok(()),
            (Expectation::Equal(expected), Some(actual)) if expected == actual => Ok(()),
            (Expectation::NotEqual(expected), Some(actual)) if expected != actual => Ok(()),
            (Expectation::Matches(regex), Some(Value::String(actual))) if regex.is_match(actual) => {
                Ok(())
            }
            (expectation, Some(actual)) => Err(Signal::fail(format!(
                "Expected value {} {}",
                describe(expectation),
                actual
            ))),
            (expectation, None) => Err(Signal::fail(format!(
                "Expected value {} but nothing was found",
                describe(expectation)
            ))),
        }
    }
}

fn describe(expectation: &Expectation) -> String {
    match expectation {
        Expectation::Present => "to be present".to_owned(),
        Expectation::Equal(value) => format!("to equal {}, got", value),
        Expectation::NotEqual(value) => format!("to differ from {}, got", value),
        Expectation::Matches(regex) => format!("to match /{}/, got", regex),
    }
}

pub fn assert(condition: bool, message: impl Into<String>) -> Outcome {
    if condition {
        Ok(())
    } else {
        Err(Signal::fail(message))
    }
}

pub fn assert_equal<T: PartialEq + Debug>(expected: T, actual: T, message: &str) -> Outcome {
    if expected == actual {
        Ok(())
    } else {
        Err(Signal::fail_with_details(
            format!("{} Expected: {:?}, but found: {:?}.", message, expected, actual),
            format!("expected {:?}\nactual   {:?}", expected, actual),
        ))
    }
}

pub fn assert_response_code(exchange: &Exchange, codes: &[u16]) -> Outcome {
    if codes.contains(&exchange.status) {
        Ok(())
    } else {
        Err(Signal::fail_with_details(
            format!(
                "Bad response code from {}: expected {:?}, but found {}",
                exchange.url, codes, exchange.status
            ),
            exchange.response_body.clone(),
        ))
    }
}

pub fn assert_response_ok(exchange: &Exchange) -> Outcome {
    assert_response_code(exchange, &[200, 201])
}

pub fn assert_content_type(exchange: &Exchange, expected: &str) -> Outcome {
    let header = exchange
        .response_header("Content-Type")
        .ok_or_else(|| Signal::fail("Response does not have a Content-Type header"))?;
    let media_type = header.split(';').next().unwrap_or_default().trim();
    assert(
        media_type.eq_ignore_ascii_case(expected),
        format!("Expected Content-Type {}, but found {}", expected, header),
    )
}

pub fn assert_resource_type(resource: &Value, expected: &str) -> Outcome {
    let found = resource.get("resourceType").and_then(Value::as_str);
    assert_equal(Some(expected), found, "Unexpected resource type.")
}

pub fn assert_valid_resource(
    validator: &dyn ResourceValidator,
    resource: &Value,
    profile: Option<&str>,
) -> Outcome {
    let errors = validator.validate(resource, profile);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Signal::fail_with_details(
            format!("Resource failed validation with {} error(s)", errors.len()),
            errors.join("\n"),
        ))
    }
}

/// Checks that `target` (a dateTime or Period JSON value) satisfies `search`.
pub fn assert_date_search(search: &str, target: &Value) -> Outcome {
    let parsed = Target::from_json(target).ok_or_else(|| {
        Signal::fail(format!("{} is neither a dateTime nor a Period", target))
    })?;
    assert(
        validate_date_search(search, &parsed)?,
        format!("Value {} does not satisfy date search '{}'", target, search),
    )
}
