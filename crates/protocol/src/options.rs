//! Request and result shapes for gateway operations.
//!
//! These mirror the payloads the external controller layer accepts, after
//! validation. They carry no validation logic themselves.

use serde::{Deserialize, Serialize};

/// A participant to add to an existing group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Phone number as a digit string (8–15 digits).
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Options for creating a mentoring group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupOptions {
    /// Display name of the group owner (≤ 100 chars).
    pub owner_name: String,
    /// Initial participant phone numbers (digit strings, 8–15 digits).
    pub participants: Vec<String>,
    pub title: String,
    pub expiration_date: String,
    /// Whether this is a single-mentee group.
    pub is_single: bool,
}

/// A group as reported by the transport after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    /// Group jid, e.g. `123456789@g.us`.
    pub id: String,
    pub subject: String,
}

/// Options for adding participants to an existing group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddParticipantsOptions {
    /// Target group jid.
    pub group_id: String,
    pub participants: Vec<Participant>,
}
