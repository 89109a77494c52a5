//! Input validation for gateway operations.
//!
//! Validation runs before any registry lookup or transport call, so a
//! malformed request never consumes a connection. Failures carry one
//! [`FieldError`] per offending field.

use std::sync::LazyLock;

use regex_lite::Regex;
use zap_protocol::{AddParticipantsOptions, CreateGroupOptions};

use crate::error::{FieldError, GatewayError, Result};

/// Phone numbers are bare digit strings, 8 to 15 digits.
static PHONE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{8,15}$").unwrap_or_else(|e| panic!("phone number pattern: {e}"))
});

/// Group jids look like `123456789@g.us`.
static GROUP_JID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]+@[A-Za-z0-9_.]+$").unwrap_or_else(|e| panic!("group jid pattern: {e}"))
});

const MAX_OWNER_NAME_LEN: usize = 100;

fn reject(message: &str, details: Vec<FieldError>) -> Result<()> {
    if details.is_empty() {
        Ok(())
    } else {
        Err(GatewayError::validation(message, details))
    }
}

pub fn validate_create_group(options: &CreateGroupOptions) -> Result<()> {
    let mut details = Vec::new();

    if options.owner_name.is_empty() {
        details.push(FieldError::new("ownerName", "must not be empty"));
    } else if options.owner_name.chars().count() > MAX_OWNER_NAME_LEN {
        details.push(FieldError::new("ownerName", "must be at most 100 characters"));
    }
    if options.title.is_empty() {
        details.push(FieldError::new("title", "must not be empty"));
    }
    if options.expiration_date.is_empty() {
        details.push(FieldError::new("expirationDate", "must not be empty"));
    }
    if options.participants.is_empty() {
        details.push(FieldError::new("participants", "must contain at least one number"));
    }
    for (index, number) in options.participants.iter().enumerate() {
        if !PHONE_NUMBER.is_match(number) {
            details.push(FieldError::new(
                format!("participants[{index}]"),
                "must be a digit string of 8 to 15 digits",
            ));
        }
    }

    reject("invalid group options", details)
}

pub fn validate_add_participants(options: &AddParticipantsOptions) -> Result<()> {
    let mut details = Vec::new();

    if options.group_id.is_empty() {
        details.push(FieldError::new("groupId", "must not be empty"));
    }
    if options.participants.is_empty() {
        details.push(FieldError::new("participants", "must contain at least one participant"));
    }
    for (index, participant) in options.participants.iter().enumerate() {
        if !PHONE_NUMBER.is_match(&participant.number) {
            details.push(FieldError::new(
                format!("participants[{index}].number"),
                "must be a digit string of 8 to 15 digits",
            ));
        }
    }

    reject("invalid participants", details)
}

pub fn validate_campaign(message: &str, groups: &[String]) -> Result<()> {
    let mut details = Vec::new();

    if message.is_empty() {
        details.push(FieldError::new("message", "must not be empty"));
    }
    if groups.is_empty() {
        details.push(FieldError::new("groups", "must contain at least one group jid"));
    }
    for (index, group) in groups.iter().enumerate() {
        if !GROUP_JID.is_match(group) {
            details.push(FieldError::new(
                format!("groups[{index}]"),
                "must match <digits>@<domain>",
            ));
        }
    }

    reject("invalid campaign", details)
}
