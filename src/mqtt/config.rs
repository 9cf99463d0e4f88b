use std::time::Duration;

use rand::Rng;
use rumqttc::QoS;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id_prefix: String,
    /// Leading topic segment shared by every greenhouse topic
    pub namespace: String,
    pub qos: u8,
    pub keep_alive_secs: u64,
    pub channel_capacity: usize,
    pub connect_attempts: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "broker.emqx.io".to_string(),
            port: 1883,
            client_id_prefix: "MY_CLIENT_ID".to_string(),
            namespace: "pilyavin".to_string(),
            qos: 2,
            keep_alive_secs: 30,
            channel_capacity: 100,
            connect_attempts: 5,
            backoff_initial_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

impl MqttConfig {
    // Out of range values fall back to exactly-once
    pub fn qos(&self) -> QoS {
        match self.qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }

    /// Random suffix keeps concurrently running instances from kicking each
    /// other off the broker.
    pub fn client_id(&self) -> String {
        let suffix: u32 = rand::thread_rng().gen_range(10_000..=99_999);
        format!("{}_{}", self.client_id_prefix, suffix)
    }

    pub fn topics(&self) -> Topics {
        Topics::new(&self.namespace)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    pub luminosity: String,
    pub light_state: String,
}

impl Topics {
    pub fn new(namespace: &str) -> Self {
        let namespace = namespace.trim_end_matches('/');
        Self {
            luminosity: format!("{}/greenhouse/luminosity", namespace),
            light_state: format!("{}/greenhouse/light_state", namespace),
        }
    }

    pub fn all(&self) -> [&str; 2] {
        [&self.luminosity, &self.light_state]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_namespaced() {
        let topics = Topics::new("pilyavin");
        assert_eq!(topics.luminosity, "pilyavin/greenhouse/luminosity");
        assert_eq!(topics.light_state, "pilyavin/greenhouse/light_state");
        assert_eq!(Topics::new("lab/"), Topics::new("lab"));
    }

    #[test]
    fn client_ids_carry_prefix_and_five_digit_suffix() {
        let config = MqttConfig::default();
        let id = config.client_id();
        let suffix = id.strip_prefix("MY_CLIENT_ID_").unwrap();
        assert_eq!(suffix.len(), 5);
        assert!(suffix.parse::<u32>().is_ok());
    }

    #[test]
    fn qos_levels_map_to_rumqttc() {
        let mut config = MqttConfig::default();
        assert_eq!(config.qos(), QoS::ExactlyOnce);
        config.qos = 1;
        assert_eq!(config.qos(), QoS::AtLeastOnce);
        config.qos = 0;
        assert_eq!(config.qos(), QoS::AtMostOnce);
        config.qos = 7;
        assert_eq!(config.qos(), QoS::ExactlyOnce);
    }
}
