//! Entity metadata consulted while folding and when naming entities in messages.

use std::{collections::HashMap, fmt::Debug, sync::Arc};

use serde::{Deserialize, Serialize};

/// Describes one entity type of the remote record store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub logical_name: String,
    /// Singular display name, e.g. `account`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Plural display name, e.g. `accounts`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_collection_name: Option<String>,
    /// Columns that together identify a record. A single id column for most entities, the two
    /// related ids for an intersect entity.
    pub primary_key: Vec<String>,
    /// A base type shared by several concrete entities. Records of a polymorphic base can't be
    /// mutated directly, they have to be read first to find their concrete type.
    #[serde(default)]
    pub polymorphic_base: bool,
}

impl EntityMetadata {
    pub fn new(logical_name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            logical_name: logical_name.into(),
            display_name: None,
            display_collection_name: None,
            primary_key: vec![primary_key.into()],
            polymorphic_base: false,
        }
    }

    pub fn with_display_names(
        mut self,
        singular: impl Into<String>,
        plural: impl Into<String>,
    ) -> Self {
        self.display_name = Some(singular.into());
        self.display_collection_name = Some(plural.into());
        self
    }

    pub fn with_primary_key(mut self, columns: impl IntoIterator<Item: Into<String>>) -> Self {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn polymorphic_base(mut self) -> Self {
        self.polymorphic_base = true;
        self
    }

    /// The name to use in messages for `count` records of this entity
    pub fn display_name_for(&self, count: usize) -> &str {
        let name = if count == 1 {
            self.display_name.as_deref()
        } else {
            self.display_collection_name.as_deref()
        };
        name.unwrap_or(&self.logical_name)
    }
}

/// Source of [`EntityMetadata`] for a data source
pub trait MetadataCache: Debug + Send + Sync + 'static {
    fn entity(&self, logical_name: &str) -> Option<Arc<EntityMetadata>>;
}

/// A [`MetadataCache`] over a fixed set of entities
#[derive(Debug, Default)]
pub struct InMemoryMetadataCache {
    entities: HashMap<String, Arc<EntityMetadata>>,
}

impl InMemoryMetadataCache {
    pub fn new(entities: impl IntoIterator<Item = EntityMetadata>) -> Self {
        Self {
            entities: entities
                .into_iter()
                .map(|e| (e.logical_name.to_lowercase(), Arc::new(e)))
                .collect(),
        }
    }
}

impl MetadataCache for InMemoryMetadataCache {
    fn entity(&self, logical_name: &str) -> Option<Arc<EntityMetadata>> {
        self.entities.get(&logical_name.to_lowercase()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_is_singular_only_for_one() {
        let meta =
            EntityMetadata::new("account", "accountid").with_display_names("account", "accounts");

        assert_eq!(meta.display_name_for(0), "accounts");
        assert_eq!(meta.display_name_for(1), "account");
        assert_eq!(meta.display_name_for(250), "accounts");
    }

    #[test]
    fn display_name_falls_back_to_logical_name() {
        let meta = EntityMetadata::new("new_widget", "new_widgetid");
        assert_eq!(meta.display_name_for(3), "new_widget");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let cache = InMemoryMetadataCache::new([EntityMetadata::new("Contact", "contactid")]);
        assert!(cache.entity("contact").is_some());
        assert!(cache.entity("CONTACT").is_some());
        assert!(cache.entity("lead").is_none());
    }
}
