//! Config schema types.

use std::collections::HashMap;

use {
    backbone_core::{ConsumerOptions, ConsumerPlan, ProducerOptions, ProducerPlan, Result, Route},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackboneConfig {
    /// Stream coordinates shared by the producer and the consumer.
    pub route: Route,
    pub producer: ProducerOptions,
    pub consumer: ConsumerConfig,
    pub sqlite: SqliteConfig,
    pub metrics: MetricsConfig,
}

impl BackboneConfig {
    pub fn producer_plan(&self) -> Result<ProducerPlan> {
        ProducerPlan::builder(self.route.uri.clone())
            .route(self.route.clone())
            .options(self.producer.clone())
            .build()
    }

    /// Consumer plan; `group` overrides `consumer.group` when given.
    pub fn consumer_plan(&self, group: Option<&str>) -> Result<ConsumerPlan> {
        let mut builder = ConsumerPlan::builder(self.route.uri.clone())
            .route(self.route.clone())
            .options(self.consumer.options.clone());
        if let Some(group) = group.or(self.consumer.group.as_deref()) {
            builder = builder.group(group);
        }
        if let Some(name) = &self.consumer.consumer_name {
            builder = builder.consumer_name(name.clone());
        }
        builder.build()
    }
}

/// Consumer group membership plus the receive loop options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Defaults to the stream uri.
    pub group: Option<String>,
    /// Defaults to a random instance id.
    pub consumer_name: Option<String>,
    #[serde(flatten)]
    pub options: ConsumerOptions,
}

/// Durable log location. Without a url the in-memory log is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    pub url: Option<String>,
}

/// Prometheus metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Labels added to every metric.
    pub labels: HashMap<String, String>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, backbone_core::AckBehavior};

    #[test]
    fn plans_carry_route_and_options() {
        let cfg: BackboneConfig = toml::from_str(
            r#"
[route]
environment = "dev"
uri = "orders"
shard = "7"

[consumer]
group = "billing"
consumer_name = "node-1"
ack_behavior = "manual"
"#,
        )
        .unwrap();

        let producer = cfg.producer_plan().unwrap();
        assert_eq!(producer.key(), "dev:orders::7");

        let consumer = cfg.consumer_plan(None).unwrap();
        assert_eq!(consumer.key(), "dev:orders::7");
        assert_eq!(consumer.group(), "billing");
        assert_eq!(consumer.consumer_name(), "node-1");
        assert_eq!(consumer.options().ack_behavior, AckBehavior::Manual);

        assert_eq!(cfg.consumer_plan(Some("audit")).unwrap().group(), "audit");
    }

    #[test]
    fn default_config_has_no_route() {
        assert!(BackboneConfig::default().producer_plan().is_err());
    }
}
