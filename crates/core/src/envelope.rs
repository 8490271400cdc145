//! Broker entry encoding of an announcement.
//!
//! Field layout:
//! - `meta`: JSON of [`Metadata`]
//! - `s:{key}`: inline segment bytes
//! - `i:{key}`: inline interception bytes
//! - `l:{key}`: storage locator (UTF-8)

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::{Bucket, Error, EventBucketCategories, Metadata, Result, storage::Locators};

/// Raw broker entry fields.
pub type EntryFields = BTreeMap<String, Bytes>;

const META_FIELD: &str = "meta";
const SEGMENT_PREFIX: &str = "s:";
const INTERCEPTION_PREFIX: &str = "i:";
const LOCATOR_PREFIX: &str = "l:";

/// What actually travels through the broker: metadata, whatever stayed
/// inline after the storage chain ran, and the chain's locators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub metadata: Metadata,
    pub segments: Bucket,
    pub interceptions: Bucket,
    pub locators: Locators,
}

impl Envelope {
    pub(crate) fn bucket_mut(&mut self, category: EventBucketCategories) -> &mut Bucket {
        if category == EventBucketCategories::INTERCEPTIONS {
            &mut self.interceptions
        } else {
            &mut self.segments
        }
    }

    pub fn encode(&self) -> Result<EntryFields> {
        let mut fields = EntryFields::new();
        fields.insert(
            META_FIELD.to_string(),
            Bytes::from(serde_json::to_vec(&self.metadata)?),
        );
        for (key, value) in self.segments.iter() {
            fields.insert(format!("{SEGMENT_PREFIX}{key}"), value.clone());
        }
        for (key, value) in self.interceptions.iter() {
            fields.insert(format!("{INTERCEPTION_PREFIX}{key}"), value.clone());
        }
        for (key, value) in &self.locators {
            fields.insert(
                format!("{LOCATOR_PREFIX}{key}"),
                Bytes::from(value.clone().into_bytes()),
            );
        }
        Ok(fields)
    }

    pub fn decode(fields: &EntryFields) -> Result<Self> {
        let meta = fields
            .get(META_FIELD)
            .ok_or_else(|| Error::invalid_envelope("missing `meta` field"))?;
        let metadata: Metadata = serde_json::from_slice(meta)
            .map_err(|e| Error::invalid_envelope(format!("bad `meta` field: {e}")))?;

        let mut segments = Vec::new();
        let mut interceptions = Vec::new();
        let mut locators = Locators::new();
        for (name, value) in fields {
            if let Some(key) = name.strip_prefix(SEGMENT_PREFIX) {
                segments.push((key.to_string(), value.clone()));
            } else if let Some(key) = name.strip_prefix(INTERCEPTION_PREFIX) {
                interceptions.push((key.to_string(), value.clone()));
            } else if let Some(key) = name.strip_prefix(LOCATOR_PREFIX) {
                let locator = std::str::from_utf8(value)
                    .map_err(|e| Error::invalid_envelope(format!("locator `{key}`: {e}")))?;
                locators.insert(key.to_string(), locator.to_string());
            }
        }

        Ok(Self {
            metadata,
            segments: segments.into_iter().collect(),
            interceptions: interceptions.into_iter().collect(),
            locators,
        })
    }
}
