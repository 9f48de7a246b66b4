//! User record stored at `users/{userId}` and the identity that creates it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Identity handed over by the external sign-in provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
}

/// Per-user document in the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    /// Collected item ids. Presence means membership; values are always `true`.
    #[serde(default, deserialize_with = "member_entries")]
    pub collect: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl UserRecord {
    pub fn for_identity(identity: &Identity, created_at: String) -> Self {
        Self {
            email: identity.email.clone(),
            name: identity.display_name.clone(),
            photo_url: identity.photo_url.clone(),
            collect: BTreeMap::new(),
            created_at: Some(created_at),
        }
    }

    /// Ids whose entry is `true`. Anything else is not a member.
    pub fn members(&self) -> BTreeSet<String> {
        self.collect
            .iter()
            .filter(|(_, present)| **present)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Keep only `true` entries of a stored `collect` map. Legacy `false` or
/// non-boolean values, or a `collect` that is not a map, are not members.
fn member_entries<'de, D>(deserializer: D) -> Result<BTreeMap<String, bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(raw
        .as_object()
        .map(|entries| {
            entries
                .iter()
                .filter(|(_, present)| present.as_bool() == Some(true))
                .map(|(id, _)| (id.clone(), true))
                .collect()
        })
        .unwrap_or_default())
}
