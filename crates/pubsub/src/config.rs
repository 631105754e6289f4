use crate::error::{Error, Result};

use serde::Deserialize;

/// Environment variable holding the project id.
pub const PROJECT_ID_VAR: &str = "PUBSUB_PROJECT_ID";

/// Environment variable holding the topic name.
pub const TOPIC_VAR: &str = "PUBSUB_TOPIC";

/// Environment variable holding the subscription name.
pub const SUBSCRIPTION_VAR: &str = "PUBSUB_SUBSCRIPTION";

/// Configuration for a [`crate::Publisher`].
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Project the publisher connects to.
    pub project_id: String,
}

impl PublisherConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    /// Returns an error if `PUBSUB_PROJECT_ID` is unset or empty.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through the given lookup.
    ///
    /// # Errors
    /// Returns an error if the project id is missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            project_id: required(&lookup, PROJECT_ID_VAR)?,
        })
    }
}

/// Configuration for a [`crate::Subscriber`].
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct SubscriberConfig {
    /// Project the subscriber connects to.
    pub project_id: String,

    /// Topic to subscribe to. Created if absent.
    pub topic_name: String,

    /// Subscription to pull from. Created if absent.
    pub subscription_name: String,
}

impl SubscriberConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    /// Returns an error if any of `PUBSUB_PROJECT_ID`, `PUBSUB_TOPIC` or
    /// `PUBSUB_SUBSCRIPTION` is unset or empty.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through the given lookup.
    ///
    /// # Errors
    /// Returns an error if any value is missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            project_id: required(&lookup, PROJECT_ID_VAR)?,
            topic_name: required(&lookup, TOPIC_VAR)?,
            subscription_name: required(&lookup, SUBSCRIPTION_VAR)?,
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        Some(_) => Err(Error::Config(format!("{key} is empty"))),
        None => Err(Error::Config(format!("{key} is not set"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use assert_matches::assert_matches;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_subscriber_config_from_lookup() {
        let config = SubscriberConfig::from_lookup(lookup(&[
            (PROJECT_ID_VAR, "local-project"),
            (TOPIC_VAR, "orders"),
            (SUBSCRIPTION_VAR, "orders-billing"),
        ]))
        .unwrap();

        assert_eq!(
            config,
            SubscriberConfig {
                project_id: "local-project".to_string(),
                topic_name: "orders".to_string(),
                subscription_name: "orders-billing".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_and_empty_values_are_rejected() {
        let missing = SubscriberConfig::from_lookup(lookup(&[(PROJECT_ID_VAR, "p")]));
        assert_matches!(missing, Err(Error::Config(message)) if message.contains(TOPIC_VAR));

        let empty = PublisherConfig::from_lookup(lookup(&[(PROJECT_ID_VAR, "  ")]));
        assert_matches!(empty, Err(Error::Config(message)) if message.contains("empty"));
    }

    #[test]
    fn test_deserialize_publisher_config() {
        let config: PublisherConfig =
            serde_json::from_str(r#"{ "project_id": "local-project" }"#).unwrap();

        assert_eq!(config.project_id, "local-project");
    }
}
