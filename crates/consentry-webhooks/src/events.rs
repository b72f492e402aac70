//! Webhook event types and the envelope sent to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::WebhookError;

/// All supported webhook event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum EventType {
    #[serde(rename = "contributor.onboarded")]
    ContributorOnboarded,
    #[serde(rename = "contributor.consent_updated")]
    ContributorConsentUpdated,
    #[serde(rename = "contributor.photos_added")]
    ContributorPhotosAdded,
    #[serde(rename = "contributor.opted_out")]
    ContributorOptedOut,
    #[serde(rename = "bounty.created")]
    BountyCreated,
    #[serde(rename = "registry.identity_created")]
    RegistryIdentityCreated,
    #[serde(rename = "match.detected")]
    MatchDetected,
}

impl EventType {
    /// Returns all available event types
    pub fn all() -> Vec<Self> {
        vec![
            Self::ContributorOnboarded,
            Self::ContributorConsentUpdated,
            Self::ContributorPhotosAdded,
            Self::ContributorOptedOut,
            Self::BountyCreated,
            Self::RegistryIdentityCreated,
            Self::MatchDetected,
        ]
    }

    /// Returns the wire representation of the event type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContributorOnboarded => "contributor.onboarded",
            Self::ContributorConsentUpdated => "contributor.consent_updated",
            Self::ContributorPhotosAdded => "contributor.photos_added",
            Self::ContributorOptedOut => "contributor.opted_out",
            Self::BountyCreated => "bounty.created",
            Self::RegistryIdentityCreated => "registry.identity_created",
            Self::MatchDetected => "match.detected",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::ContributorOnboarded => "A contributor completed onboarding",
            Self::ContributorConsentUpdated => "A contributor changed their consent settings",
            Self::ContributorPhotosAdded => "A contributor uploaded new reference photos",
            Self::ContributorOptedOut => "A contributor opted out of all programs",
            Self::BountyCreated => "A new bounty was published",
            Self::RegistryIdentityCreated => "An identity was added to the protection registry",
            Self::MatchDetected => "A likeness match was detected for a registered identity",
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::ContributorOnboarded
            | Self::ContributorConsentUpdated
            | Self::ContributorPhotosAdded
            | Self::ContributorOptedOut => "Contributor",
            Self::BountyCreated => "Bounty",
            Self::RegistryIdentityCreated => "Registry",
            Self::MatchDetected => "Matching",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| WebhookError::UnknownEventType(s.to_string()))
    }
}

/// Body POSTed to subscribers.
///
/// Field order is part of the wire contract: `event`, `data`, `timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventEnvelope {
    pub event: EventType,
    #[schema(value_type = Object)]
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event: EventType, data: Map<String, Value>) -> Self {
        Self {
            event,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Serialize once; the returned string is what gets signed, stored and sent.
    pub fn to_payload(&self) -> Result<String, WebhookError> {
        Ok(serde_json::to_string(self)?)
    }
}
