//! Animal record as published by the open-data adoption API.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A single adoptable animal.
///
/// Only the fields the service filters on are typed; everything else the
/// upstream sends is kept in `extra` and written back out unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Animal {
    /// Upstream sends a number; stored and compared as a string.
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub animal_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animal_place: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animal_kind: Option<String>,
    #[serde(
        rename = "animal_Variety",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub animal_variety: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animal_bodytype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animal_colour: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animal_sex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_file: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Animal {
    /// A bare record carrying only an id, handy for tests and lookups.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            animal_id: id.into(),
            animal_place: None,
            animal_kind: None,
            animal_variety: None,
            animal_bodytype: None,
            animal_colour: None,
            animal_sex: None,
            album_file: None,
            extra: Map::new(),
        }
    }

    /// First three characters of the shelter location, which name the county.
    pub fn area(&self) -> Option<String> {
        self.animal_place
            .as_deref()
            .map(|place| place.chars().take(3).collect())
    }
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.trim().is_empty() => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "animal_id must be a non-empty string or number, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_id_is_normalised() {
        let animal: Animal = serde_json::from_value(json!({
            "animal_id": 371234,
            "animal_kind": "貓",
            "animal_Variety": "混種貓",
            "shelter_name": "臺北市動物之家"
        }))
        .unwrap();

        assert_eq!(animal.animal_id, "371234");
        assert_eq!(animal.animal_variety.as_deref(), Some("混種貓"));
        assert_eq!(animal.extra["shelter_name"], json!("臺北市動物之家"));
    }

    #[test]
    fn test_unknown_fields_survive_a_roundtrip() {
        let raw = json!({
            "animal_id": "A1",
            "animal_Variety": "米克斯",
            "animal_opendate": "2024-03-01",
        });
        let animal: Animal = serde_json::from_value(raw).unwrap();
        let back = serde_json::to_value(&animal).unwrap();

        assert_eq!(back["animal_Variety"], json!("米克斯"));
        assert_eq!(back["animal_opendate"], json!("2024-03-01"));
        assert!(back.get("animal_place").is_none());
    }

    #[test]
    fn test_missing_id_is_rejected() {
        assert!(serde_json::from_value::<Animal>(json!({"animal_kind": "狗"})).is_err());
        assert!(serde_json::from_value::<Animal>(json!({"animal_id": ""})).is_err());
    }

    #[test]
    fn test_area_uses_characters_not_bytes() {
        let mut animal = Animal::with_id("1");
        animal.animal_place = Some("臺北市動物之家".to_string());
        assert_eq!(animal.area().as_deref(), Some("臺北市"));

        animal.animal_place = Some("AB".to_string());
        assert_eq!(animal.area().as_deref(), Some("AB"));
    }
}
