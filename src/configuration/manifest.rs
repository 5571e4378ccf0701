use crate::configuration::constants::common::{DEFAULT_CALLBACK_BIND, DEFAULT_TIMEOUT_SECS, ENV_PREFIX};
use config::{Config, ConfigError, Environment, File, FileFormat};
use derivative::*;
use serde_derive::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Deserialize)]
pub struct Manifest {
    pub name: String,
    /// Base URL of the FHIR server under test.
    #[serde(with = "crate::configuration::deserialize::url")]
    pub server: Url,
    pub client: ClientEntry,
    #[serde(default)]
    pub callback: CallbackEntry,
    #[serde(
        default = "default_timeout",
        with = "crate::configuration::deserialize::duration"
    )]
    pub timeout: Duration,
    #[serde(default)]
    pub sequences: Vec<String>,
    #[serde(default)]
    pub vars: HashMap<String, Value>,
    #[serde(default)]
    pub confirm: bool,
    #[serde(default)]
    pub report: Option<PathBuf>,
}

#[derive(Deserialize, Derivative)]
#[derivative(Debug)]
pub struct ClientEntry {
    pub id: String,
    #[derivative(Debug = "ignore")]
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default, with = "crate::configuration::deserialize::scopes")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackEntry {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for CallbackEntry {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> SocketAddr {
    DEFAULT_CALLBACK_BIND
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 4567)))
}

fn default_timeout() -> Duration {
    Duration::from_secs(DEFAULT_TIMEOUT_SECS)
}

impl Manifest {
    pub fn from(file: PathBuf) -> Result<Self, ConfigError> {
        let mut config = Config::new();
        config.merge(File::from(file))?;
        config.merge(Environment::with_prefix(ENV_PREFIX).separator("__"))?;
        config.try_into()
    }

    pub fn parse(content: &str, format: FileFormat) -> Result<Self, ConfigError> {
        let mut config = Config::new();
        config.merge(File::from_str(content, format))?;
        config.try_into()
    }

    /// Where the authorization server sends the browser back to.
    pub fn redirect_uri(&self) -> String {
        match &self.client.redirect_uri {
            Some(uri) => uri.clone(),
            None => format!("http://{}/callback/redirect", self.callback.bind),
        }
    }

    /// Initial testing-instance fields. Explicit `vars` win over derived ones.
    pub fn instance_fields(&self) -> Vec<(String, Value)> {
        let mut fields = vec![
            (
                "url".to_owned(),
                Value::from(self.server.as_str().trim_end_matches('/')),
            ),
            ("client_id".to_owned(), Value::from(self.client.id.clone())),
            ("scopes".to_owned(), Value::from(self.client.scopes.join(" "))),
            ("redirect_uri".to_owned(), Value::from(self.redirect_uri())),
        ];
        if let Some(secret) = &self.client.secret {
            fields.push(("client_secret".to_owned(), Value::from(secret.clone())));
        }
        fields.extend(self.vars.iter().map(|(key, value)| (key.clone(), value.clone())));
        fields
    }

    /// Sequences to run; a non-empty `overrides` replaces the manifest selection.
    pub fn selection<'a>(&'a self, overrides: &'a [String]) -> &'a [String] {
        if overrides.is_empty() {
            &self.sequences
        } else {
            overrides
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MANIFEST: &str = r#"
name: local
server: http://localhost:8080/fhir/
client:
  id: harness
  secret: s3cr3t
  scopes: launch/patient openid patient/*.read
callback:
  bind: 127.0.0.1:9000
sequences:
  - CapabilityStatement
vars:
  patient_id: "85"
"#;

    #[test]
    fn test_parse_yaml_manifest() {
        let manifest = Manifest::parse(MANIFEST, FileFormat::Yaml).unwrap();

        assert_eq!(manifest.name, "local");
        assert_eq!(manifest.client.scopes, vec!["launch/patient", "openid", "patient/*.read"]);
        assert_eq!(manifest.timeout, Duration::from_secs(10));
        assert_eq!(manifest.callback.bind, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(manifest.redirect_uri(), "http://127.0.0.1:9000/callback/redirect");
        assert!(!manifest.confirm);
    }

    #[test]
    fn test_instance_fields() {
        let manifest = Manifest::parse(MANIFEST, FileFormat::Yaml).unwrap();
        let fields: HashMap<String, Value> = manifest.instance_fields().into_iter().collect();

        assert_eq!(fields["url"], json!("http://localhost:8080/fhir"));
        assert_eq!(fields["client_secret"], json!("s3cr3t"));
        assert_eq!(fields["patient_id"], json!("85"));
    }

    #[test]
    fn test_selection_overrides() {
        let manifest = Manifest::parse(MANIFEST, FileFormat::Yaml).unwrap();
        assert_eq!(manifest.selection(&[]), &["CapabilityStatement".to_owned()][..]);
        let overrides = vec!["StandaloneLaunch".to_owned()];
        assert_eq!(manifest.selection(&overrides), &overrides[..]);
    }

    #[test]
    fn test_invalid_server_url_is_rejected() {
        let content = "name: broken\nserver: not a url\nclient:\n  id: harness\n";
        assert!(Manifest::parse(content, FileFormat::Yaml).is_err());
    }
}
