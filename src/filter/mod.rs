//! Attribute filtering over a loaded animal dataset.
//!
//! Filtering runs in process against the whole dataset; the upstream API is
//! never asked to filter.

use serde::{Deserialize, Serialize};

use crate::models::Animal;

/// Sex codes that narrow the list. Anything else means "any".
const SEX_CODES: [&str; 3] = ["M", "F", "N"];

/// Query-string filter. Missing or empty fields do not constrain.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimalFilter {
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub body_type: Option<String>,
    #[serde(default)]
    pub breed: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub sex: Option<String>,
}

impl AnimalFilter {
    pub fn matches(&self, animal: &Animal) -> bool {
        if let Some(area) = constraint(&self.area) {
            if animal.area().as_deref() != Some(area) {
                return false;
            }
        }

        let exact = [
            (&self.kind, &animal.animal_kind),
            (&self.body_type, &animal.animal_bodytype),
            (&self.breed, &animal.animal_variety),
            (&self.color, &animal.animal_colour),
        ];
        for (wanted, actual) in exact {
            if let Some(wanted) = constraint(wanted) {
                if actual.as_deref() != Some(wanted) {
                    return false;
                }
            }
        }

        match constraint(&self.sex) {
            Some(sex) if SEX_CODES.contains(&sex) => animal.animal_sex.as_deref() == Some(sex),
            _ => true,
        }
    }

    /// Matching animals in dataset order.
    pub fn apply<'a>(&self, animals: &'a [Animal]) -> Vec<&'a Animal> {
        animals.iter().filter(|animal| self.matches(animal)).collect()
    }
}

fn constraint(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Values available for each filter, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    pub areas: Vec<String>,
    pub kinds: Vec<String>,
    pub body_types: Vec<String>,
    pub breeds: Vec<String>,
    pub colors: Vec<String>,
}

impl FilterOptions {
    pub fn collect(animals: &[Animal]) -> Self {
        let mut options = Self::default();
        for animal in animals {
            push_distinct(&mut options.areas, animal.area());
            push_distinct(&mut options.kinds, animal.animal_kind.clone());
            push_distinct(&mut options.body_types, animal.animal_bodytype.clone());
            push_distinct(&mut options.breeds, animal.animal_variety.clone());
            push_distinct(&mut options.colors, animal.animal_colour.clone());
        }
        options
    }
}

fn push_distinct(values: &mut Vec<String>, value: Option<String>) {
    if let Some(value) = value {
        let value = value.trim();
        if !value.is_empty() && !values.iter().any(|v| v == value) {
            values.push(value.to_string());
        }
    }
}
