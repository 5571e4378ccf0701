use crate::app::assert::{assert_date_search, assert_resource_type, assert_response_ok};
use crate::app::sequence::{DefinitionError, SequenceDefinition};
use crate::app::signal::{omit, skip, skip_if, Outcome, Signal};
use crate::app::unit::{TestContext, TestDefinition};
use crate::connection::Request;
use serde_json::Value;
use url::Url;

/// Observation fields that carry its clinically relevant time.
const EFFECTIVE: [&str; 3] = ["effectiveDateTime", "effectiveInstant", "effectivePeriod"];

pub fn observation_date_search() -> Result<SequenceDefinition, DefinitionError> {
    SequenceDefinition::builder("ObservationDateSearch")
        .title("Observation Date Search")
        .description("Verify that the server supports searching Observations by date.")
        .id_prefix("ODS")
        .requires(&["url", "access_token", "patient_id"])
        .defines(&["observation_effective", "observation_date"])
        .optional()
        .test(
            TestDefinition::builder()
                .id("01")
                .name("Server returns valid results for Observation search by patient")
                .reference("http://hl7.org/fhir/R4/search.html")
                .build()?,
            |ctx| {
                let patient = field(ctx, "patient_id")?;
                let observations = search(ctx, &[("patient", patient.as_str())])?;
                skip_if(observations.is_empty(), "No Observations were found for the patient")?;
                let effective = observations.iter().find_map(effective);
                let effective = match effective {
                    Some(effective) => effective,
                    None => return skip("No Observation for the patient has an effective time"),
                };
                let literal = match &effective {
                    Value::String(literal) => Some(literal.clone()),
                    period => ["start", "end"]
                        .iter()
                        .find_map(|bound| period.get(*bound).and_then(Value::as_str))
                        .map(str::to_owned),
                };
                ctx.instance.set("observation_effective", effective);
                if let Some(literal) = literal {
                    ctx.instance.set("observation_date", literal);
                }
                Ok(())
            },
        )
        .test(
            TestDefinition::builder()
                .id("02")
                .name("Server returns valid results for Observation search by patient + date")
                .description("Every returned Observation must fall exactly on the searched date.")
                .build()?,
            |ctx| {
                if let Some(Value::Object(_)) = ctx.instance.get("observation_effective") {
                    return omit("The Observation found has an effective Period; exact date searches need a dateTime");
                }
                search_by_date(ctx, "eq")
            },
        )
        .test(
            TestDefinition::builder()
                .id("03")
                .name("Server returns valid results for Observation search by patient + date with ap comparator")
                .build()?,
            |ctx| search_by_date(ctx, "ap"),
        )
        .build()
}

fn field(ctx: &TestContext<'_>, name: &str) -> Result<String, Signal> {
    match ctx.instance.get_str(name) {
        Some(value) => Ok(value.to_owned()),
        None => skip(format!("'{}' has not been provided", name)),
    }
}

fn effective(resource: &Value) -> Option<Value> {
    EFFECTIVE
        .iter()
        .find_map(|name| resource.get(*name))
        .cloned()
}

fn search_by_date(ctx: &mut TestContext<'_>, comparator: &str) -> Outcome {
    let date = match ctx.instance.get_str("observation_date") {
        Some(date) => date.to_owned(),
        None => return skip("No date to search with"),
    };
    search_and_check(ctx, &format!("{}{}", comparator, date))
}

/// Searches by `date` and checks every Observation returned against it.
fn search_and_check(ctx: &mut TestContext<'_>, date: &str) -> Outcome {
    let patient = field(ctx, "patient_id")?;
    let observations = search(ctx, &[("patient", patient.as_str()), ("date", date)])?;
    skip_if(observations.is_empty(), format!("Search with date={} returned nothing", date))?;
    for observation in &observations {
        match effective(observation) {
            Some(value) => assert_date_search(date, &value)?,
            None => {
                return Err(Signal::fail(format!(
                    "Observation {} matched date={} without an effective time",
                    observation.get("id").unwrap_or(&Value::Null),
                    date
                )))
            }
        }
    }
    Ok(())
}

/// GETs `[base]/Observation` and returns the Observations in the bundle.
fn search(ctx: &mut TestContext<'_>, params: &[(&str, &str)]) -> Result<Vec<Value>, Signal> {
    let base = ctx.instance.render("{{url}}/Observation")?;
    let url = Url::parse_with_params(&base, params)?;
    let mut request = Request::get(url.to_string());
    if let Some(token) = ctx.instance.get_str("access_token") {
        request = request.bearer(token);
    }
    let exchange = ctx.send(request)?;
    assert_response_ok(&exchange)?;
    let bundle = exchange.json()?;
    assert_resource_type(&bundle, "Bundle")?;
    Ok(bundle
        .get("entry")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("resource"))
                .filter(|resource| {
                    resource.get("resourceType").and_then(Value::as_str) == Some("Observation")
                })
                .cloned()
                .collect()
        })
        .unwrap_or_default())
}
