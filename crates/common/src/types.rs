//! Common data types for Podium components.
//!
//! Identifiers are newtypes so a `DocumentId` can never be passed where a
//! `QuestionId` is expected. Numeric ids mirror the store's auto-increment
//! keys; user ids are the caller-chosen login names.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Raw store key.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

numeric_id!(
    /// Unique identifier for a meeting
    MeetingId
);

numeric_id!(
    /// Unique identifier for a presenter's document
    DocumentId
);

numeric_id!(
    /// Unique identifier for a question
    QuestionId
);

/// Unique identifier for a user (login name chosen at signup)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Create a user id from anything string-like.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A page of a presenter's document, or the whole document.
///
/// Stored as a plain integer; `-1` means "general", i.e. not tied to a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Page(pub i32);

impl Page {
    /// Question or reaction about the document as a whole.
    pub const GENERAL: Page = Page(-1);

    /// Whether this is the general (page-less) sentinel.
    #[must_use]
    pub const fn is_general(self) -> bool {
        self.0 == Self::GENERAL.0
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_general() {
            f.write_str("general")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Position of a participant in the presenter rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantOrder {
    /// Presenter with the given rank, starting at 0.
    Ranked(u32),
    /// Audience member, never presents.
    Audience,
}

impl ParticipantOrder {
    /// Stored value for audience members.
    pub const AUDIENCE_SENTINEL: i32 = -1;

    /// Decode the stored integer. Any negative value is the audience sentinel.
    #[must_use]
    pub fn from_stored(value: i32) -> Self {
        u32::try_from(value).map_or(Self::Audience, Self::Ranked)
    }

    /// Encode for storage.
    #[must_use]
    pub fn to_stored(self) -> i32 {
        match self {
            Self::Ranked(rank) => i32::try_from(rank).unwrap_or(i32::MAX),
            Self::Audience => Self::AUDIENCE_SENTINEL,
        }
    }

    /// Rank if this participant presents.
    #[must_use]
    pub const fn rank(self) -> Option<u32> {
        match self {
            Self::Ranked(rank) => Some(rank),
            Self::Audience => None,
        }
    }

    /// Whether this participant is a presenter.
    #[must_use]
    pub const fn is_presenter(self) -> bool {
        matches!(self, Self::Ranked(_))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_order_round_trips_through_storage() {
        assert_eq!(ParticipantOrder::from_stored(-1), ParticipantOrder::Audience);
        assert_eq!(ParticipantOrder::from_stored(0), ParticipantOrder::Ranked(0));
        assert_eq!(ParticipantOrder::Ranked(3).to_stored(), 3);
        assert_eq!(ParticipantOrder::Audience.to_stored(), -1);
    }

    #[test]
    fn test_any_negative_order_is_audience() {
        assert_eq!(ParticipantOrder::from_stored(-7), ParticipantOrder::Audience);
        assert!(!ParticipantOrder::from_stored(-7).is_presenter());
    }

    #[test]
    fn test_general_page_display() {
        assert_eq!(Page::GENERAL.to_string(), "general");
        assert_eq!(Page(4).to_string(), "4");
        assert!(Page(-1).is_general());
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&MeetingId(42)).unwrap();
        assert_eq!(json, "42");

        let user: UserId = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(user.as_str(), "alice");
    }
}
