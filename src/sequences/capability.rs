use crate::app::assert::{
    assert, assert_content_type, assert_resource_type, assert_response_ok, assert_valid_resource,
    Assertable, Expectation,
};
use crate::app::capture::Capture;
use crate::app::sequence::{DefinitionError, SequenceDefinition};
use crate::app::signal::{skip, Signal};
use crate::app::unit::{TestContext, TestDefinition};
use lazy_static::*;
use regex::Regex;
use serde_json::Value;

const OAUTH_URIS: &str = "http://fhir-registry.smarthealthit.org/StructureDefinition/oauth-uris";

lazy_static! {
    static ref FHIR_R4: Regex = Regex::new(r"^4\.0\.\d+$").expect("Regex compilation error");
}

pub fn capability_statement() -> Result<SequenceDefinition, DefinitionError> {
    SequenceDefinition::builder("CapabilityStatement")
        .title("Capability Statement")
        .description("Retrieve information about supported server functionality in the Capability Statement.")
        .details(
            "The server must serve a CapabilityStatement at [base]/metadata that declares \
             FHIR R4 and advertises its SMART on FHIR authorization endpoints.",
        )
        .id_prefix("C")
        .requires(&["url"])
        .defines(&["oauth_authorize_endpoint", "oauth_token_endpoint"])
        .test(
            TestDefinition::builder()
                .id("01")
                .name("FHIR server responds to the capabilities interaction")
                .reference("http://hl7.org/fhir/R4/http.html#capabilities")
                .build()?,
            |ctx| {
                let exchange = ctx.fhir_get("{{url}}/metadata")?;
                assert_response_ok(&exchange)?;
                ctx.warning(|_| assert_content_type(&exchange, "application/fhir+json"))?;
                let statement = exchange.json()?;
                ctx.instance.set("capability_statement", statement);
                Ok(())
            },
        )
        .test(
            TestDefinition::builder()
                .id("02")
                .name("Capability Statement is a valid resource")
                .reference("http://hl7.org/fhir/R4/capabilitystatement.html")
                .build()?,
            |ctx| {
                let statement = statement(ctx)?;
                assert_resource_type(&statement, "CapabilityStatement")?;
                assert_valid_resource(ctx.validator(), &statement, None)
            },
        )
        .test(
            TestDefinition::builder()
                .id("03")
                .name("FHIR version of the server matches the FHIR version expected by tests")
                .description("The server must declare a FHIR 4.0.x version.")
                .build()?,
            |ctx| {
                let statement = statement(ctx)?;
                let version = Capture::json("$.fhirVersion")?.capture(&statement);
                Expectation::Matches(FHIR_R4.clone()).assert(&version)
            },
        )
        .test(
            TestDefinition::builder()
                .id("04")
                .name("Capability Statement advertises SMART on FHIR OAuth endpoints")
                .reference("http://hl7.org/fhir/smart-app-launch/1.0.0/conformance/index.html")
                .build()?,
            |ctx| {
                let statement = statement(ctx)?;
                let extensions = Capture::json("$.rest.*.security.extension.*")?.capture(&statement);
                let endpoints = oauth_uris(extensions);
                let authorize = endpoints.iter().find(|(kind, _)| kind == "authorize");
                let token = endpoints.iter().find(|(kind, _)| kind == "token");
                assert(authorize.is_some(), "No authorize endpoint in the oauth-uris extension")?;
                assert(token.is_some(), "No token endpoint in the oauth-uris extension")?;
                for (kind, uri) in &endpoints {
                    match kind.as_str() {
                        "authorize" => ctx.instance.set("oauth_authorize_endpoint", uri.as_str()),
                        "token" => ctx.instance.set("oauth_token_endpoint", uri.as_str()),
                        "register" => ctx.instance.set("oauth_register_endpoint", uri.as_str()),
                        _ => {}
                    }
                }
                Ok(())
            },
        )
        .build()
}

fn statement(ctx: &TestContext<'_>) -> Result<Value, Signal> {
    match ctx.instance.get("capability_statement") {
        Some(statement) => Ok(statement.clone()),
        None => skip("No Capability Statement was retrieved"),
    }
}

/// `(kind, uri)` pairs from the SMART oauth-uris extension.
fn oauth_uris(extensions: Option<Value>) -> Vec<(String, String)> {
    let extensions = match extensions {
        Some(Value::Array(extensions)) => extensions,
        Some(extension) => vec![extension],
        None => return Vec::new(),
    };
    extensions
        .iter()
        .filter(|extension| extension.get("url").and_then(Value::as_str) == Some(OAUTH_URIS))
        .filter_map(|extension| extension.get("extension").and_then(Value::as_array))
        .flatten()
        .filter_map(|inner| {
            let kind = inner.get("url").and_then(Value::as_str)?;
            let uri = inner.get("valueUri").and_then(Value::as_str)?;
            Some((kind.to_owned(), uri.to_owned()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_oauth_uris_from_extensions() {
        let extensions = json!([
            { "url": "http://example.org/other", "valueString": "x" },
            {
                "url": OAUTH_URIS,
                "extension": [
                    { "url": "authorize", "valueUri": "http://auth/authorize" },
                    { "url": "token", "valueUri": "http://auth/token" }
                ]
            }
        ]);
        assert_eq!(
            oauth_uris(Some(extensions)),
            vec![
                ("authorize".to_owned(), "http://auth/authorize".to_owned()),
                ("token".to_owned(), "http://auth/token".to_owned()),
            ]
        );
        assert!(oauth_uris(None).is_empty());
    }

    #[test]
    fn test_fhir_version_pattern() {
        assert!(FHIR_R4.is_match("4.0.1"));
        assert!(!FHIR_R4.is_match("3.0.2"));
        assert!(!FHIR_R4.is_match("4.0"));
    }
}
