//! Routing and configuration bound at build time.
//!
//! A plan is owned by the pipeline or receive loop built from it and never
//! changes afterwards. Each plan carries a `tracing::Span` tagged with its
//! routing so everything done on its behalf is attributed to the stream.

use tracing::{Span, info_span};

use crate::{ConsumerOptions, Error, ProducerOptions, Result, Route};

/// Immutable producer routing and options.
#[derive(Debug, Clone)]
pub struct ProducerPlan {
    route: Route,
    options: ProducerOptions,
    span: Span,
}

impl ProducerPlan {
    pub fn builder(uri: impl Into<String>) -> ProducerPlanBuilder {
        ProducerPlanBuilder {
            route: Route::new(uri),
            options: ProducerOptions::default(),
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn key(&self) -> String {
        self.route.key()
    }

    pub fn options(&self) -> &ProducerOptions {
        &self.options
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

#[derive(Debug, Clone)]
pub struct ProducerPlanBuilder {
    route: Route,
    options: ProducerOptions,
}

impl ProducerPlanBuilder {
    #[must_use]
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.route.environment = environment.into();
        self
    }

    #[must_use]
    pub fn partition(mut self, partition: impl Into<String>) -> Self {
        self.route.partition = partition.into();
        self
    }

    #[must_use]
    pub fn shard(mut self, shard: impl Into<String>) -> Self {
        self.route.shard = shard.into();
        self
    }

    #[must_use]
    pub fn route(mut self, route: Route) -> Self {
        self.route = route;
        self
    }

    #[must_use]
    pub fn options(mut self, options: ProducerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<ProducerPlan> {
        validate_route(&self.route)?;
        let span = info_span!(
            "producer",
            stream = %self.route.key(),
            environment = %self.route.environment,
            uri = %self.route.uri,
        );
        Ok(ProducerPlan {
            route: self.route,
            options: self.options,
            span,
        })
    }
}

/// Immutable consumer routing, group identity and options.
#[derive(Debug, Clone)]
pub struct ConsumerPlan {
    route: Route,
    group: String,
    consumer_name: String,
    options: ConsumerOptions,
    span: Span,
}

impl ConsumerPlan {
    pub fn builder(uri: impl Into<String>) -> ConsumerPlanBuilder {
        ConsumerPlanBuilder {
            route: Route::new(uri),
            group: None,
            consumer_name: None,
            options: ConsumerOptions::default(),
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn key(&self) -> String {
        self.route.key()
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerPlanBuilder {
    route: Route,
    group: Option<String>,
    consumer_name: Option<String>,
    options: ConsumerOptions,
}

impl ConsumerPlanBuilder {
    #[must_use]
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.route.environment = environment.into();
        self
    }

    #[must_use]
    pub fn partition(mut self, partition: impl Into<String>) -> Self {
        self.route.partition = partition.into();
        self
    }

    #[must_use]
    pub fn shard(mut self, shard: impl Into<String>) -> Self {
        self.route.shard = shard.into();
        self
    }

    #[must_use]
    pub fn route(mut self, route: Route) -> Self {
        self.route = route;
        self
    }

    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    #[must_use]
    pub fn consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn options(mut self, options: ConsumerOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate and freeze. The group defaults to the stream uri and the
    /// consumer name to a random instance id.
    pub fn build(self) -> Result<ConsumerPlan> {
        validate_route(&self.route)?;
        if self.options.batch_size == 0 {
            return Err(Error::invalid_plan("batch_size must be at least 1"));
        }
        if self.options.max_degree_of_parallelism == Some(0) {
            return Err(Error::invalid_plan(
                "max_degree_of_parallelism must be at least 1 when set",
            ));
        }
        let delay = &self.options.delay_when_empty;
        if delay.max_delay.is_zero() {
            return Err(Error::invalid_plan(
                "delay_when_empty.max_delay must be greater than zero",
            ));
        }
        if delay.delay_factor.is_nan() || delay.delay_factor < 1.0 {
            return Err(Error::invalid_plan(format!(
                "delay_when_empty.delay_factor must be at least 1.0, got {}",
                delay.delay_factor
            )));
        }
        let group = match self.group {
            Some(group) if group.trim().is_empty() => {
                return Err(Error::invalid_plan("consumer group must not be empty"));
            },
            Some(group) => group,
            None => self.route.uri.clone(),
        };
        let consumer_name = self
            .consumer_name
            .unwrap_or_else(|| format!("consumer-{}", uuid::Uuid::new_v4().simple()));
        let span = info_span!(
            "consumer",
            stream = %self.route.key(),
            group = %group,
            consumer = %consumer_name,
        );
        Ok(ConsumerPlan {
            route: self.route,
            group,
            consumer_name,
            options: self.options,
            span,
        })
    }
}

fn validate_route(route: &Route) -> Result<()> {
    if route.uri.trim().is_empty() {
        return Err(Error::invalid_plan("uri must not be empty"));
    }
    let parts = [
        &route.environment,
        &route.uri,
        &route.partition,
        &route.shard,
    ];
    if parts.iter().any(|p| p.contains(':')) {
        return Err(Error::invalid_plan(
            "routing coordinates must not contain ':'",
        ));
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::DelayWhenEmptyBehavior,
        rstest::rstest,
        std::time::Duration,
    };

    #[test]
    fn producer_and_consumer_agree_on_key() {
        let producer = ProducerPlan::builder("orders")
            .environment("prod")
            .partition("P")
            .shard("S")
            .build()
            .unwrap();
        let consumer = ConsumerPlan::builder("orders")
            .environment("prod")
            .partition("P")
            .shard("S")
            .group("billing")
            .build()
            .unwrap();
        assert_eq!(producer.key(), consumer.key());
        assert_eq!(consumer.key(), "prod:orders:P:S");
    }

    #[test]
    fn consumer_defaults() {
        let plan = ConsumerPlan::builder("orders").build().unwrap();
        assert_eq!(plan.group(), "orders");
        assert!(plan.consumer_name().starts_with("consumer-"));
        assert_eq!(plan.options().batch_size, 100);
    }

    #[test]
    fn rejects_bad_routing() {
        assert!(ProducerPlan::builder("").build().is_err());
        assert!(ProducerPlan::builder("a:b").build().is_err());
        assert!(ConsumerPlan::builder("orders").group(" ").build().is_err());
    }

    #[rstest]
    #[case::zero_max_delay(DelayWhenEmptyBehavior::new(Duration::ZERO, 1.2))]
    #[case::shrinking_factor(DelayWhenEmptyBehavior::new(Duration::from_secs(5), 0.5))]
    #[case::nan_factor(DelayWhenEmptyBehavior::new(Duration::from_secs(5), f64::NAN))]
    fn rejects_idle_delay_that_spins(#[case] delay_when_empty: DelayWhenEmptyBehavior) {
        let options = ConsumerOptions {
            delay_when_empty,
            ..Default::default()
        };
        assert!(matches!(
            ConsumerPlan::builder("orders").options(options).build(),
            Err(Error::InvalidPlan { .. })
        ));
    }

    #[test]
    fn accepts_flat_idle_delay() {
        let options = ConsumerOptions {
            delay_when_empty: DelayWhenEmptyBehavior::new(Duration::from_secs(1), 1.0),
            ..Default::default()
        };
        assert!(ConsumerPlan::builder("orders").options(options).build().is_ok());
    }

    #[test]
    fn rejects_zero_batch() {
        let options = ConsumerOptions {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            ConsumerPlan::builder("orders").options(options).build(),
            Err(Error::InvalidPlan { .. })
        ));
    }
}
