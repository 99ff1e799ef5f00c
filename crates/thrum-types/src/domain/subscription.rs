use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::message::FilterType;

/// Filter carried by a subscription.
///
/// `selector` meaning depends on `filter_type`: a `type:value` pair for
/// scope filters (the value position may be `*`), an agent id or group
/// name for mention, a message id for thread, an agent id for author.
/// `all` takes no selector; `include_self` opts in to the subscriber's
/// own messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    pub filter_type: FilterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default)]
    pub include_self: bool,
}

/// Local-only subscription record; never written to the synced branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: String,
    pub session_id: String,
    pub filter: SubscriptionFilter,
    pub created_at: DateTime<Utc>,
}

/// Local-only sync progress marker per peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub peer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ack_event_id: Option<Ulid>,
    pub last_ack_at: DateTime<Utc>,
}
