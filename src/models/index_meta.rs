use serde_json::{Map, Value};

/// A restored index under its temporary name, with the payload returned by
/// `GET /<index>` (`settings`, `mappings`, `aliases`).
#[derive(Debug, Clone, PartialEq)]
pub struct StagingIndex {
    pub name: String,
    pub payload: Value,
}

impl StagingIndex {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Builds the list from a `GET /<pattern>` response, keeping the server's key order.
    pub fn from_listing(listing: Map<String, Value>) -> Vec<StagingIndex> {
        listing
            .into_iter()
            .map(|(name, payload)| StagingIndex { name, payload })
            .collect()
    }
}

/// Mutable access to `settings.index`, creating the objects on the way when missing.
pub fn index_settings_mut(payload: &mut Value) -> Option<&mut Map<String, Value>> {
    let root = payload.as_object_mut()?;
    let settings = root
        .entry("settings")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()?;
    settings
        .entry("index")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
}
