use crate::app::assert::{assert, assert_equal, assert_response_ok, Assertable, Expectation};
use crate::app::capture::Capture;
use crate::app::sequence::{DefinitionError, SequenceDefinition};
use crate::app::signal::{skip, wait_at_endpoint, Signal};
use crate::app::unit::{TestContext, TestDefinition};
use crate::connection::Request;
use lazy_static::*;
use regex::Regex;
use url::Url;

pub const REDIRECT_ENDPOINT: &str = "redirect";

lazy_static! {
    static ref BEARER: Regex = Regex::new(r"(?i)^bearer$").expect("Regex compilation error");
}

pub fn standalone_launch() -> Result<SequenceDefinition, DefinitionError> {
    SequenceDefinition::builder("StandaloneLaunch")
        .title("Standalone Launch")
        .description("Demonstrate the SMART Standalone Launch Sequence.")
        .details(
            "The app redirects the browser to the authorization endpoint, receives an \
             authorization code at its redirect URI, and exchanges it for an access token.",
        )
        .id_prefix("SLS")
        .requires(&[
            "url",
            "client_id",
            "redirect_uri",
            "oauth_authorize_endpoint",
            "oauth_token_endpoint",
        ])
        .defines(&["access_token", "patient_id", "token_scope", "refresh_token"])
        .suspendable()
        .test(
            TestDefinition::builder()
                .id("01")
                .name("OAuth server redirects client browser to app redirect URI")
                .reference("http://hl7.org/fhir/smart-app-launch/1.0.0/index.html#step-1-app-asks-for-authorization")
                .description("Client browser sent to OAuth server and redirect URI requested to be the same as the registered redirect URI.")
                .build()?,
            |ctx| {
                let state = ctx.run_id().to_string();
                ctx.instance.set("state", state.clone());
                let authorize = field(ctx, "oauth_authorize_endpoint")?;
                let client_id = field(ctx, "client_id")?;
                let redirect_uri = field(ctx, "redirect_uri")?;
                let audience = field(ctx, "url")?;
                let scopes = ctx.instance.get_str("scopes").unwrap_or("launch/patient openid").to_owned();
                let url = Url::parse_with_params(
                    &authorize,
                    &[
                        ("response_type", "code"),
                        ("client_id", client_id.as_str()),
                        ("redirect_uri", redirect_uri.as_str()),
                        ("scope", scopes.as_str()),
                        ("state", state.as_str()),
                        ("aud", audience.as_str()),
                    ],
                )?;
                wait_at_endpoint(REDIRECT_ENDPOINT, Some(url.to_string()))
            },
        )
        .test(
            TestDefinition::builder()
                .id("02")
                .name("Client app receives code parameter and correct state parameter from OAuth server at redirect URI")
                .reference("http://hl7.org/fhir/smart-app-launch/1.0.0/index.html#step-2-ehr-evaluates-authorization-request-asking-for-end-user-input")
                .build()?,
            |ctx| {
                if let Some(error) = ctx.param("error") {
                    return Err(Signal::fail_with_details(
                        format!("Error returned from authorization server: {}", error),
                        ctx.param("error_description").unwrap_or_default(),
                    ));
                }
                assert_equal(
                    ctx.instance.get_str("state"),
                    ctx.param("state"),
                    "State provided in redirect does not match expected state.",
                )?;
                let code = match ctx.param("code") {
                    Some(code) if !code.is_empty() => code.to_owned(),
                    _ => return Err(Signal::fail("Expected code to be submitted in request")),
                };
                ctx.instance.set("code", code);
                Ok(())
            },
        )
        .test(
            TestDefinition::builder()
                .id("03")
                .name("OAuth token exchange request succeeds when supplied correct information")
                .reference("http://hl7.org/fhir/smart-app-launch/1.0.0/index.html#step-3-app-exchanges-authorization-code-for-access-token")
                .build()?,
            |ctx| {
                let code = match ctx.instance.get_str("code") {
                    Some(code) => code.to_owned(),
                    None => return skip("No authorization code was received"),
                };
                let token_endpoint = field(ctx, "oauth_token_endpoint")?;
                let client_id = field(ctx, "client_id")?;
                let redirect_uri = field(ctx, "redirect_uri")?;
                let secret = ctx.instance.get_str("client_secret").map(str::to_owned);

                let mut form = vec![
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("redirect_uri", redirect_uri.as_str()),
                ];
                let request = match &secret {
                    Some(secret) => Request::post(token_endpoint.as_str())
                        .form(&form)
                        .basic_auth(&client_id, secret),
                    None => {
                        form.push(("client_id", client_id.as_str()));
                        Request::post(token_endpoint.as_str()).form(&form)
                    }
                };
                let exchange = ctx.send(request)?;
                assert_response_ok(&exchange)?;
                let body = exchange.json()?;
                ctx.instance.set("token_response", body);
                Ok(())
            },
        )
        .test(
            TestDefinition::builder()
                .id("04")
                .name("Token exchange response body contains required information encoded in JSON")
                .reference("http://hl7.org/fhir/smart-app-launch/1.0.0/index.html#step-3-app-exchanges-authorization-code-for-access-token")
                .build()?,
            |ctx| {
                let body = match ctx.instance.get("token_response") {
                    Some(body) => body.clone(),
                    None => return skip("No token response was received"),
                };
                let token_type = Capture::json("$.token_type")?.capture(&body);
                Expectation::Matches(BEARER.clone()).assert(&token_type)?;
                assert(
                    Capture::json("$.access_token")?.capture_into(&body, ctx.instance, "access_token"),
                    "Token response did not contain access_token",
                )?;
                assert(
                    Capture::json("$.scope")?.capture_into(&body, ctx.instance, "token_scope"),
                    "Token response did not contain scope",
                )?;
                Capture::json("$.refresh_token")?.capture_into(&body, ctx.instance, "refresh_token");
                let patient = Capture::json("$.patient")?;
                ctx.warning(|ctx| {
                    assert(
                        patient.capture_into(&body, ctx.instance, "patient_id"),
                        "Token response did not contain patient context",
                    )
                })?;
                let expires_in = Capture::json("$.expires_in")?.capture(&body);
                ctx.warning(|_| Expectation::Present.assert(&expires_in))
            },
        )
        .build()
}

fn field(ctx: &TestContext<'_>, name: &str) -> Result<String, Signal> {
    match ctx.instance.get_str(name) {
        Some(value) => Ok(value.to_owned()),
        None => skip(format!("'{}' has not been provided", name)),
    }
}
