//! Announcement model and contracts of the channel runtime.
//!
//! Producers turn calls into [`Announcement`]s (metadata plus a [`Bucket`] of
//! segments), run them through a [`StorageStrategyChain`] and publish the
//! resulting [`Envelope`] to a [`StreamLog`]. Consumers read it back, resolve
//! stored segments and acknowledge through a [`ConsumerContext`].

pub mod ack;
pub mod announcement;
pub mod backoff;
pub mod bucket;
pub mod claim;
pub mod envelope;
pub mod error;
pub mod log;
pub mod metadata;
pub mod options;
pub mod plan;
pub mod provider;
pub mod storage;

pub use {
    ack::{AckOutcome, AckState, ConsumerContext},
    announcement::{Announcement, EventBucketCategories, segment_key},
    backoff::{DelayWhenEmptyBehavior, EmptyBackoff, MIN_EMPTY_DELAY},
    bucket::Bucket,
    claim::{ClaimTracker, ClaimingTrigger},
    envelope::{EntryFields, Envelope},
    error::{Error, Reason, Result},
    log::{PendingEntry, StreamEntry, StreamLog},
    metadata::{Metadata, Origin, Route},
    options::{
        AckBehavior, ConsumerOptions, MultiConsumerBehavior, OriginFilter,
        PartialConsumerBehavior, ProducerOptions, SequentialWait, TelemetryLevel,
        TimeoutBehavior,
    },
    plan::{ConsumerPlan, ConsumerPlanBuilder, ProducerPlan, ProducerPlanBuilder},
    provider::{AnnouncementHandler, ChannelProvider, ConsumerBridge, HandlerFn, handler_fn},
    storage::{
        Locators, StorageStrategy, StorageStrategyChain, VoidStorage, fetch_with_legacy_fallback,
        legacy_storage_key, storage_key,
    },
};
