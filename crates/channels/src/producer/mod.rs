//! Producer side: turn calls into announcements and publish them.

mod interceptor;
mod pipeline;
mod segmentation;

pub use {
    interceptor::{HostInterceptor, ProducerInterceptor, StaticInterceptor},
    pipeline::ProducerPipeline,
    segmentation::{
        ArgValue, BytesSegmentation, Call, CallArgument, JsonSegmentation, SegmentationStrategy,
    },
};
