//! Channel ID - opaque key naming a channel

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::DomainError;

/// Maximum length of a channel key
pub const MAX_CHANNEL_ID_LENGTH: usize = 100;

/// Opaque channel key.
///
/// Clients may send it as a string or as a number; both normalize to the
/// trimmed string form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(String);

impl ChannelId {
    /// Parse and validate a channel key
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(DomainError::InvalidChannelId(
                "channel id must not be empty".to_string(),
            ));
        }

        if trimmed.chars().count() > MAX_CHANNEL_ID_LENGTH {
            return Err(DomainError::InvalidChannelId(format!(
                "channel id must be at most {MAX_CHANNEL_ID_LENGTH} characters"
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the key as a string slice
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Display name given to a channel created lazily on first join
    pub fn default_display_name(&self) -> String {
        format!("Room {}", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for ChannelId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ChannelId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

// Deserialize from string or number
impl<'de> Deserialize<'de> for ChannelId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct ChannelIdVisitor;

        impl<'de> Visitor<'de> for ChannelIdVisitor {
            type Value = ChannelId;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string or integer channel id")
            }

            fn visit_i64<E>(self, value: i64) -> Result<ChannelId, E>
            where
                E: de::Error,
            {
                ChannelId::parse(&value.to_string()).map_err(de::Error::custom)
            }

            fn visit_u64<E>(self, value: u64) -> Result<ChannelId, E>
            where
                E: de::Error,
            {
                ChannelId::parse(&value.to_string()).map_err(de::Error::custom)
            }

            fn visit_str<E>(self, value: &str) -> Result<ChannelId, E>
            where
                E: de::Error,
            {
                ChannelId::parse(value).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_any(ChannelIdVisitor)
    }
}
