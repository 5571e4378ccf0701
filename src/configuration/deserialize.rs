pub mod url {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use ::url::Url;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Url, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Url::parse(value.as_str()).map_err(|err| D::Error::custom(format!("{}: {}", value, err)))
    }
}

pub mod scopes {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ScopeEntry {
        Single(String),
        Array(Vec<String>),
    }

    /// Accepts either a space separated string or a list.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match ScopeEntry::deserialize(deserializer)? {
            ScopeEntry::Single(scopes) => scopes.split_whitespace().map(str::to_owned).collect(),
            ScopeEntry::Array(scopes) => scopes,
        })
    }
}

pub mod duration {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    /// Whole seconds.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
