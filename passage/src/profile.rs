use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single named attribute as reported by the identity provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAttribute {
    /// The attribute name, such as `email` or `custom:tenant`
    pub name: String,
    /// The attribute value
    pub value: String,
}

impl UserAttribute {
    /// Constructs a new attribute
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The profile of the signed-in user, as published to the host
///
/// Serializes as a single flat object: attributes, then `groups`, then any
/// custom fields contributed by a profile enricher.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UserProfile {
    #[serde(flatten)]
    attributes: BTreeMap<String, String>,
    groups: Vec<String>,
    #[serde(flatten)]
    custom: Map<String, Value>,
}

impl UserProfile {
    /// Builds a profile from provider attributes and group memberships
    ///
    /// When an attribute name repeats, the last value wins.
    pub fn from_attributes<I>(attributes: I, groups: Vec<String>) -> Self
    where
        I: IntoIterator<Item = UserAttribute>,
    {
        let mut map = BTreeMap::new();
        for UserAttribute { name, value } in attributes {
            if let Some(previous) = map.insert(name, value) {
                tracing::trace!(previous.len = previous.len(), "duplicate user attribute replaced");
            }
        }

        Self {
            attributes: map,
            groups,
            custom: Map::new(),
        }
    }

    /// Gets a string attribute by name
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Iterates over the string attributes
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The user's group memberships, in the order the provider reported them
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Whether the user belongs to the named group
    pub fn is_member_of(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Gets a custom field contributed by a profile enricher
    pub fn custom(&self, name: &str) -> Option<&Value> {
        self.custom.get(name)
    }

    /// Merges enrichment fields into the profile, later values winning
    ///
    /// String values land among the attributes. A `groups` field holding a
    /// list of strings replaces the group memberships. Anything else is kept
    /// as a custom field. A key only ever lives in one of these places.
    pub fn merge(&mut self, fields: Map<String, Value>) {
        for (name, value) in fields {
            if name == "groups" {
                if let Some(groups) = string_list(&value) {
                    self.groups = groups;
                    continue;
                }
            }

            match value {
                Value::String(s) => {
                    self.custom.remove(&name);
                    self.attributes.insert(name, s);
                }
                other => {
                    self.attributes.remove(&name);
                    self.custom.insert(name, other);
                }
            }
        }
    }
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_owned))
        .collect()
}
