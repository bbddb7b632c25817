//! Declarative migration rules, one per legacy entity.
//!
//! A [`MigrationMapping`] says where an entity's rows come from and go to,
//! how fields are renamed, which target fields are computed by a
//! [`ValueConverter`], which fields are dropped, and which other entities
//! must be migrated first. [`MappingRegistry`] holds the full set, keyed by
//! the closed [`EntityKey`] enum so a typo in a dependency cannot compile.

pub mod derive;
mod registry;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{Record, SqlValue};
use crate::error::{MigrateError, Result};

/// Every entity the legacy portal schema knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKey {
    Role,
    Institution,
    Author,
    Genre,
    Tag,
    Theme,
    TargetAudience,
    EducationPeriod,
    EducationalStage,
    User,
    Unit,
    UnitClass,
    File,
    TvShow,
    Video,
    Question,
    Answer,
}

impl EntityKey {
    /// All keys in registry declaration order.
    pub const ALL: [EntityKey; 17] = [
        EntityKey::Role,
        EntityKey::Institution,
        EntityKey::Author,
        EntityKey::Genre,
        EntityKey::Tag,
        EntityKey::Theme,
        EntityKey::TargetAudience,
        EntityKey::EducationPeriod,
        EntityKey::EducationalStage,
        EntityKey::User,
        EntityKey::Unit,
        EntityKey::UnitClass,
        EntityKey::File,
        EntityKey::TvShow,
        EntityKey::Video,
        EntityKey::Question,
        EntityKey::Answer,
    ];

    /// Key name, which is also the legacy table name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKey::Role => "role",
            EntityKey::Institution => "institution",
            EntityKey::Author => "author",
            EntityKey::Genre => "genre",
            EntityKey::Tag => "tag",
            EntityKey::Theme => "theme",
            EntityKey::TargetAudience => "target_audience",
            EntityKey::EducationPeriod => "education_period",
            EntityKey::EducationalStage => "educational_stage",
            EntityKey::User => "user",
            EntityKey::Unit => "unit",
            EntityKey::UnitClass => "unit_class",
            EntityKey::File => "file",
            EntityKey::TvShow => "tv_show",
            EntityKey::Video => "video",
            EntityKey::Question => "question",
            EntityKey::Answer => "answer",
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKey {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        EntityKey::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| MigrateError::UnknownEntity(s.to_string()))
    }
}

/// Computes a derived target value from the source field value and the
/// whole raw record. An `Err` drops the record.
pub type DeriveFn = fn(&SqlValue, &Record) -> std::result::Result<SqlValue, String>;

/// How one target field is computed.
#[derive(Clone)]
pub enum ValueConverter {
    /// Always the same value.
    Constant(SqlValue),
    /// Always NULL.
    Null,
    /// The legacy field as a boolean: set only for `1` / `true`.
    Flag,
    /// Remap a legacy foreign key into the new id of an already migrated entity.
    /// A missing correspondence yields NULL.
    Lookup {
        entity: EntityKey,
        source_field: String,
    },
    /// Any other pure computation.
    Derive(DeriveFn),
}

impl fmt::Debug for ValueConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueConverter::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            ValueConverter::Null => f.write_str("Null"),
            ValueConverter::Flag => f.write_str("Flag"),
            ValueConverter::Lookup {
                entity,
                source_field,
            } => f
                .debug_struct("Lookup")
                .field("entity", entity)
                .field("source_field", source_field)
                .finish(),
            ValueConverter::Derive(_) => f.write_str("Derive(..)"),
        }
    }
}

/// Resolves legacy foreign keys of already migrated entities.
///
/// Converters receive this explicitly instead of reaching into shared state,
/// which keeps them pure and lets tests hand in a fixed table.
pub trait IdResolver {
    fn resolve(&self, entity: EntityKey, legacy_id: i64) -> Option<Uuid>;
}

/// What a converter produced for one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Converted {
    Value(SqlValue),
    /// A lookup whose legacy key had no correspondence.
    Unresolved,
}

impl ValueConverter {
    /// Compute the value of `field` for `raw`.
    pub fn apply(
        &self,
        field: &str,
        raw: &Record,
        resolver: &dyn IdResolver,
    ) -> std::result::Result<Converted, String> {
        match self {
            ValueConverter::Constant(v) => Ok(Converted::Value(v.clone())),
            ValueConverter::Null => Ok(Converted::Value(SqlValue::Null)),
            ValueConverter::Flag => Ok(Converted::Value(SqlValue::Bool(
                raw.value(field).is_truthy(),
            ))),
            ValueConverter::Lookup {
                entity,
                source_field,
            } => {
                let value = raw.value(source_field);
                if value.is_null() {
                    return Ok(Converted::Value(SqlValue::Null));
                }
                match value.as_i64() {
                    // 0 is the legacy "no reference" marker
                    Some(0) => Ok(Converted::Value(SqlValue::Null)),
                    Some(legacy_id) => Ok(resolver
                        .resolve(*entity, legacy_id)
                        .map(|id| Converted::Value(SqlValue::Uuid(id)))
                        .unwrap_or(Converted::Unresolved)),
                    None => Ok(Converted::Unresolved),
                }
            }
            ValueConverter::Derive(f) => f(raw.value(field), raw).map(Converted::Value),
        }
    }
}

/// Migration rule for one legacy entity.
#[derive(Debug, Clone)]
pub struct MigrationMapping {
    pub key: EntityKey,
    pub source_table: String,
    pub target_table: String,
    pub generates_id: bool,
    /// Source field to target field, applied in order. One source field may
    /// feed several targets.
    pub field_mappings: Vec<(String, String)>,
    pub skip_fields: Vec<String>,
    pub value_converters: Vec<(String, ValueConverter)>,
    pub dependencies: Vec<EntityKey>,
    pub batch_size: Option<usize>,
}

impl MigrationMapping {
    /// Start a mapping whose legacy table is named after the key.
    pub fn new(key: EntityKey, target_table: impl Into<String>) -> Self {
        Self {
            key,
            source_table: key.as_str().to_string(),
            target_table: target_table.into(),
            generates_id: false,
            field_mappings: Vec::new(),
            skip_fields: Vec::new(),
            value_converters: Vec::new(),
            dependencies: Vec::new(),
            batch_size: None,
        }
    }

    pub fn source_table(mut self, table: impl Into<String>) -> Self {
        self.source_table = table.into();
        self
    }

    pub fn generates_id(mut self) -> Self {
        self.generates_id = true;
        self
    }

    pub fn field(mut self, source: &str, target: &str) -> Self {
        self.field_mappings.push((source.to_string(), target.to_string()));
        self
    }

    /// Map fields whose names stay the same.
    pub fn fields(mut self, names: &[&str]) -> Self {
        for name in names {
            self.field_mappings.push((name.to_string(), name.to_string()));
        }
        self
    }

    /// `date_created` and `last_updated` to the target audit columns.
    pub fn audit_fields(self) -> Self {
        self.field("date_created", "created_at")
            .field("last_updated", "updated_at")
    }

    pub fn skip(mut self, fields: &[&str]) -> Self {
        self.skip_fields.extend(fields.iter().map(|f| f.to_string()));
        self
    }

    pub fn convert(mut self, target: &str, converter: ValueConverter) -> Self {
        match self.value_converters.iter_mut().find(|(t, _)| t == target) {
            Some((_, slot)) => *slot = converter,
            None => self.value_converters.push((target.to_string(), converter)),
        }
        self
    }

    pub fn constant(self, target: &str, value: impl Into<SqlValue>) -> Self {
        self.convert(target, ValueConverter::Constant(value.into()))
    }

    /// Remap the legacy foreign key stored under the same field name.
    pub fn lookup(self, target: &str, entity: EntityKey) -> Self {
        self.lookup_from(target, target, entity)
    }

    pub fn lookup_from(self, target: &str, source_field: &str, entity: EntityKey) -> Self {
        self.convert(
            target,
            ValueConverter::Lookup {
                entity,
                source_field: source_field.to_string(),
            },
        )
    }

    pub fn derive(self, target: &str, f: DeriveFn) -> Self {
        self.convert(target, ValueConverter::Derive(f))
    }

    pub fn depends_on(mut self, deps: &[EntityKey]) -> Self {
        for dep in deps {
            if !self.dependencies.contains(dep) {
                self.dependencies.push(*dep);
            }
        }
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Batch size to use, falling back to the configured default.
    pub fn effective_batch_size(&self, default: usize) -> usize {
        self.batch_size.unwrap_or(default).max(1)
    }

    /// Entities this mapping resolves foreign keys into.
    pub fn lookup_entities(&self) -> impl Iterator<Item = (EntityKey, &str)> {
        self.value_converters.iter().filter_map(|(_, c)| match c {
            ValueConverter::Lookup {
                entity,
                source_field,
            } => Some((*entity, source_field.as_str())),
            _ => None,
        })
    }
}

/// One side of a join-table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipEndpoint {
    pub source_field: String,
    pub target_field: String,
    pub entity: EntityKey,
}

/// Many-to-many join table migrated after every entity.
#[derive(Debug, Clone)]
pub struct RelationshipMapping {
    pub name: String,
    pub source_table: String,
    pub target_table: String,
    pub endpoints: Vec<RelationshipEndpoint>,
    /// Give each join row a generated `id` column.
    pub generates_id: bool,
    pub batch_size: Option<usize>,
}

impl RelationshipMapping {
    pub fn new(name: &str, target_table: &str) -> Self {
        Self {
            name: name.to_string(),
            source_table: name.to_string(),
            target_table: target_table.to_string(),
            endpoints: Vec::new(),
            generates_id: true,
            batch_size: None,
        }
    }

    pub fn endpoint(mut self, source_field: &str, target_field: &str, entity: EntityKey) -> Self {
        self.endpoints.push(RelationshipEndpoint {
            source_field: source_field.to_string(),
            target_field: target_field.to_string(),
            entity,
        });
        self
    }

    pub fn without_id(mut self) -> Self {
        self.generates_id = false;
        self
    }
}

/// The full set of rules for one migration.
#[derive(Debug, Clone, Default)]
pub struct MappingRegistry {
    mappings: BTreeMap<EntityKey, MigrationMapping>,
    /// Keys in insertion order; the resolver walks them in this order.
    order: Vec<EntityKey>,
    relationships: Vec<RelationshipMapping>,
}

impl MappingRegistry {
    /// Build a registry, rejecting duplicate entities or relationships.
    pub fn new(
        mappings: Vec<MigrationMapping>,
        relationships: Vec<RelationshipMapping>,
    ) -> Result<Self> {
        let mut registry = MappingRegistry::default();
        for mapping in mappings {
            if registry.mappings.contains_key(&mapping.key) {
                return Err(MigrateError::Config(format!(
                    "entity '{}' is mapped more than once",
                    mapping.key
                )));
            }
            registry.order.push(mapping.key);
            registry.mappings.insert(mapping.key, mapping);
        }
        for rel in relationships {
            if registry.relationships.iter().any(|r| r.name == rel.name) {
                return Err(MigrateError::Config(format!(
                    "relationship '{}' is mapped more than once",
                    rel.name
                )));
            }
            if rel.endpoints.is_empty() {
                return Err(MigrateError::Config(format!(
                    "relationship '{}' has no endpoints",
                    rel.name
                )));
            }
            registry.relationships.push(rel);
        }
        Ok(registry)
    }

    /// The legacy portal registry.
    pub fn portal() -> Result<Self> {
        registry::portal()
    }

    pub fn get(&self, key: EntityKey) -> Option<&MigrationMapping> {
        self.mappings.get(&key)
    }

    pub fn contains(&self, key: EntityKey) -> bool {
        self.mappings.contains_key(&key)
    }

    /// Mappings in declaration order.
    pub fn mappings(&self) -> impl Iterator<Item = &MigrationMapping> {
        self.order.iter().filter_map(|k| self.mappings.get(k))
    }

    pub fn keys(&self) -> &[EntityKey] {
        &self.order
    }

    pub fn relationships(&self) -> &[RelationshipMapping] {
        &self.relationships
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Legacy table whose ids an entity's correspondences are stored under.
    ///
    /// Entities missing from the registry fall back to their key name.
    pub fn source_table_of(&self, key: EntityKey) -> String {
        self.get(key)
            .map(|m| m.source_table.clone())
            .unwrap_or_else(|| key.as_str().to_string())
    }
}
