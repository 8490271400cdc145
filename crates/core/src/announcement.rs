//! The announcement envelope and its bucket categories.

use std::{fmt, ops::BitOr};

use {bytes::Bytes, serde::de::DeserializeOwned};

use crate::{Bucket, Error, Metadata, Result};

/// Bit flags naming which part of an announcement a storage strategy owns.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventBucketCategories(u8);

impl EventBucketCategories {
    pub const NONE: Self = Self(0);
    pub const SEGMENTS: Self = Self(0b01);
    pub const INTERCEPTIONS: Self = Self(0b10);
    pub const ALL: Self = Self(0b11);

    /// The single-category values, in the order the chain walks them.
    pub const EACH: [Self; 2] = [Self::SEGMENTS, Self::INTERCEPTIONS];

    pub const fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Lowercase name used in storage keys.
    pub fn as_str(self) -> &'static str {
        match self.0 {
            0 => "none",
            0b01 => "segments",
            0b10 => "interceptions",
            _ => "all",
        }
    }
}

impl BitOr for EventBucketCategories {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for EventBucketCategories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBucketCategories({})", self.as_str())
    }
}

impl fmt::Display for EventBucketCategories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bucket key of a call argument: `{operation}~{argument}`.
pub fn segment_key(operation: &str, argument: &str) -> String {
    format!("{operation}~{argument}")
}

/// Metadata plus the classified payload of one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub metadata: Metadata,
    pub segments: Bucket,
    pub interceptions: Bucket,
}

impl Announcement {
    pub fn new(metadata: Metadata, segments: Bucket) -> Self {
        Self {
            metadata,
            segments,
            interceptions: Bucket::new(),
        }
    }

    #[must_use]
    pub fn with_interceptions(mut self, interceptions: Bucket) -> Self {
        self.interceptions = interceptions;
        self
    }

    pub fn operation(&self) -> &str {
        &self.metadata.operation
    }

    pub fn bucket(&self, category: EventBucketCategories) -> &Bucket {
        if category == EventBucketCategories::INTERCEPTIONS {
            &self.interceptions
        } else {
            &self.segments
        }
    }

    /// Raw bytes of a named call argument.
    pub fn raw_argument(&self, name: &str) -> Option<&Bytes> {
        self.segments
            .get(&segment_key(&self.metadata.operation, name))
    }

    /// Deserialize a named JSON call argument.
    pub fn argument<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let raw = self.raw_argument(name).ok_or_else(|| {
            Error::invalid_envelope(format!(
                "argument `{name}` missing from `{}`",
                self.metadata.operation
            ))
        })?;
        Ok(serde_json::from_slice(raw)?)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::Route};

    #[test]
    fn categories_behave_as_flags() {
        let all = EventBucketCategories::SEGMENTS | EventBucketCategories::INTERCEPTIONS;
        assert_eq!(all, EventBucketCategories::ALL);
        assert!(all.contains(EventBucketCategories::SEGMENTS));
        assert!(!EventBucketCategories::SEGMENTS.contains(EventBucketCategories::INTERCEPTIONS));
        assert!(!all.contains(EventBucketCategories::NONE));
        assert!(EventBucketCategories::NONE.is_empty());
        assert_eq!(EventBucketCategories::SEGMENTS.to_string(), "segments");
    }

    #[test]
    fn arguments_are_read_by_name() {
        let meta = Metadata::new(Route::new("orders"), "OrderPlaced");
        let segments = Bucket::new()
            .try_add(segment_key("OrderPlaced", "id"), serde_json::to_vec(&42).unwrap())
            .try_add(segment_key("OrderPlaced", "blob"), Bytes::from_static(b"\x01\x02"));
        let announcement = Announcement::new(meta, segments);

        assert_eq!(announcement.argument::<u32>("id").unwrap(), 42);
        assert_eq!(announcement.raw_argument("blob").unwrap().as_ref(), b"\x01\x02");
        assert!(matches!(
            announcement.argument::<u32>("missing"),
            Err(Error::InvalidEnvelope { .. })
        ));
    }
}
