//! Producer and consumer behavior switches.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ClaimingTrigger, DelayWhenEmptyBehavior};

/// When the consumer commits an entry after its handler returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckBehavior {
    /// Ack on success; failures stay pending for reprocessing.
    #[default]
    OnSucceed,
    /// Ack whatever the handler outcome.
    OnFinally,
    /// The handler acks through its `ConsumerContext`.
    Manual,
}

/// What an elapsed ack timer does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutBehavior {
    /// Commit the entry.
    #[default]
    Ack,
    /// Leave the entry pending so a claim check redelivers it.
    LeavePending,
}

/// What to do with an entry no registered handler matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialConsumerBehavior {
    /// Fault the batch; the entry and the rest of the batch stay pending.
    #[default]
    ThrowIfNotHandled,
    /// Leave the entry pending for another consumer and keep order.
    Sequential,
    /// Ack and skip.
    Loose,
}

/// How several handlers registered for one operation share a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiConsumerBehavior {
    /// Race all handlers; the first success wins and the others are cancelled.
    #[default]
    Once,
    /// Run every handler; at least one must succeed.
    All,
}

/// Which origins are dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginFilter {
    #[default]
    Original,
    All,
}

impl OriginFilter {
    pub fn accepts(self, origin: crate::Origin) -> bool {
        match self {
            Self::Original => origin == crate::Origin::Original,
            Self::All => true,
        }
    }
}

/// How long a `Sequential` consumer waits for another consumer to take an
/// entry it has no handler for before continuing with the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SequentialWait {
    #[default]
    NoWait,
    Until {
        #[serde(rename = "timeout_ms", with = "millis")]
        timeout: Duration,
    },
    Indefinitely,
}

/// Verbosity of per-send diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryLevel {
    None,
    #[default]
    Basic,
    Verbose,
}

/// Producer side options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerOptions {
    pub telemetry: TelemetryLevel,
}

/// Consumer side options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerOptions {
    pub batch_size: usize,
    pub ack_behavior: AckBehavior,
    pub timeout_behavior: TimeoutBehavior,
    /// Arms `AckAfter` on every dispatched entry when set.
    #[serde(rename = "ack_timeout_ms", with = "millis_opt")]
    pub ack_timeout: Option<Duration>,
    /// Unset means unbounded for `Loose`, in-order for the other behaviors.
    pub max_degree_of_parallelism: Option<usize>,
    pub partial_behavior: PartialConsumerBehavior,
    pub multi_consumer: MultiConsumerBehavior,
    pub origin_filter: OriginFilter,
    pub claiming: ClaimingTrigger,
    pub delay_when_empty: DelayWhenEmptyBehavior,
    pub sequential_wait: SequentialWait,
    pub telemetry: TelemetryLevel,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            ack_behavior: AckBehavior::default(),
            timeout_behavior: TimeoutBehavior::default(),
            ack_timeout: None,
            max_degree_of_parallelism: None,
            partial_behavior: PartialConsumerBehavior::default(),
            multi_consumer: MultiConsumerBehavior::default(),
            origin_filter: OriginFilter::default(),
            claiming: ClaimingTrigger::default(),
            delay_when_empty: DelayWhenEmptyBehavior::default(),
            sequential_wait: SequentialWait::default(),
            telemetry: TelemetryLevel::default(),
        }
    }
}

impl ConsumerOptions {
    /// Whether entries of one batch must be dispatched and committed in order.
    pub fn is_ordered(&self) -> bool {
        self.max_degree_of_parallelism.is_none()
            && self.partial_behavior != PartialConsumerBehavior::Loose
    }
}

/// `Duration` as integer milliseconds.
pub(crate) mod millis {
    use {
        serde::{Deserialize, Deserializer, Serializer},
        std::time::Duration,
    };

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// `Option<Duration>` as integer milliseconds.
pub(crate) mod millis_opt {
    use {
        serde::{Deserialize, Deserializer, Serializer},
        std::time::Duration,
    };

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
