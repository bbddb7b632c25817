//! Legacy record to target record conversion.

use chrono::Utc;
use uuid::Uuid;

use crate::core::{Record, SqlValue};
use crate::mapping::{Converted, IdResolver, MigrationMapping};

/// A converted record and how many of its lookups found no correspondence.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub record: Record,
    pub unresolved: usize,
}

/// Source field names whose 0/1 values become booleans.
fn is_flag_field(name: &str) -> bool {
    name.contains("is_") || name.contains("enabled") || name.contains("deleted")
}

/// Convert one raw legacy record.
///
/// Steps run in a fixed order: id, field mappings, converters, skip removal,
/// audit defaults. A field that a converter computes and `skip_fields` names
/// is therefore absent from the result. An `Err` means the record must be
/// dropped.
pub fn convert_record(
    raw: &Record,
    mapping: &MigrationMapping,
    new_id: Option<Uuid>,
    resolver: &dyn IdResolver,
) -> Result<Conversion, String> {
    let mut out = Record::new();
    let mut unresolved = 0;

    if mapping.generates_id {
        let id = new_id.ok_or_else(|| "no new id was assigned".to_string())?;
        out.set("id", id);
    }

    for (source, target) in &mapping.field_mappings {
        let value = raw.value(source);
        if value.is_null() {
            continue;
        }
        let value = if is_flag_field(source) {
            SqlValue::Bool(value.is_truthy())
        } else {
            value.clone()
        };
        out.set(target.as_str(), value);
    }

    for (target, converter) in &mapping.value_converters {
        match converter.apply(target, raw, resolver)? {
            Converted::Value(v) => out.set(target.as_str(), v),
            Converted::Unresolved => {
                unresolved += 1;
                out.set(target.as_str(), SqlValue::Null);
            }
        }
    }

    for field in &mapping.skip_fields {
        out.remove(field);
    }

    if out.value("created_at").is_null() {
        let created = first_present(raw, &["date_created"]);
        out.set("created_at", created);
    }
    if out.value("updated_at").is_null() {
        let updated = first_present(raw, &["last_updated", "date_created"]);
        out.set("updated_at", updated);
    }

    Ok(Conversion {
        record: out,
        unresolved,
    })
}

/// First non-null of `fields` in `raw`, or the current time.
fn first_present(raw: &Record, fields: &[&str]) -> SqlValue {
    fields
        .iter()
        .map(|f| raw.value(f))
        .find(|v| !v.is_null())
        .cloned()
        .unwrap_or_else(|| SqlValue::DateTime(Utc::now().naive_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{EntityKey, ValueConverter};
    use chrono::NaiveDate;
    use std::collections::HashMap;

    struct Fixed(HashMap<(EntityKey, i64), Uuid>);

    impl IdResolver for Fixed {
        fn resolve(&self, entity: EntityKey, legacy_id: i64) -> Option<Uuid> {
            self.0.get(&(entity, legacy_id)).copied()
        }
    }

    fn none() -> Fixed {
        Fixed(HashMap::new())
    }

    fn raw(fields: &[(&str, SqlValue)]) -> Record {
        fields.iter().cloned().collect()
    }

    #[test]
    fn test_simple_mapping_with_skip() {
        let mapping = MigrationMapping::new(EntityKey::Genre, "genres")
            .generates_id()
            .field("name", "name")
            .skip(&["version"]);
        let id = Uuid::new_v4();
        let converted = convert_record(
            &raw(&[
                ("id", SqlValue::I64(1)),
                ("name", SqlValue::from("A")),
                ("version", SqlValue::I64(7)),
            ]),
            &mapping,
            Some(id),
            &none(),
        )
        .unwrap();

        let record = converted.record;
        assert_eq!(record.get("id"), Some(&SqlValue::Uuid(id)));
        assert_eq!(record.get("name"), Some(&SqlValue::from("A")));
        assert!(!record.contains("version"));
        assert_eq!(converted.unresolved, 0);
    }

    #[test]
    fn test_skip_wins_over_converter() {
        let mapping = MigrationMapping::new(EntityKey::Tag, "tags")
            .generates_id()
            .constant("version", 0_i64)
            .skip(&["version"]);
        let converted =
            convert_record(&raw(&[("id", SqlValue::I64(1))]), &mapping, Some(Uuid::new_v4()), &none())
                .unwrap();
        assert!(!converted.record.contains("version"));
    }

    #[test]
    fn test_null_source_fields_are_not_copied() {
        let mapping = MigrationMapping::new(EntityKey::Author, "authors")
            .generates_id()
            .fields(&["name", "email"]);
        let converted = convert_record(
            &raw(&[("id", SqlValue::I64(1)), ("name", SqlValue::from("x")), ("email", SqlValue::Null)]),
            &mapping,
            Some(Uuid::new_v4()),
            &none(),
        )
        .unwrap();
        assert!(!converted.record.contains("email"));
    }

    #[test]
    fn test_flag_fields_become_booleans() {
        let mapping = MigrationMapping::new(EntityKey::User, "users")
            .generates_id()
            .field("enabled", "is_active")
            .field("account_locked", "account_locked");
        let converted = convert_record(
            &raw(&[
                ("id", SqlValue::I64(3)),
                ("enabled", SqlValue::I64(1)),
                ("account_locked", SqlValue::I64(0)),
            ]),
            &mapping,
            Some(Uuid::new_v4()),
            &none(),
        )
        .unwrap();
        assert_eq!(converted.record.get("is_active"), Some(&SqlValue::Bool(true)));
        // Not a flag name: copied as is.
        assert_eq!(converted.record.get("account_locked"), Some(&SqlValue::I64(0)));
    }

    #[test]
    fn test_missing_parent_yields_null() {
        let mapping = MigrationMapping::new(EntityKey::Unit, "units")
            .generates_id()
            .lookup("institution_id", EntityKey::Institution);
        let converted = convert_record(
            &raw(&[("id", SqlValue::I64(1)), ("institution_id", SqlValue::I64(99))]),
            &mapping,
            Some(Uuid::new_v4()),
            &none(),
        )
        .unwrap();
        assert_eq!(converted.record.get("institution_id"), Some(&SqlValue::Null));
        assert_eq!(converted.unresolved, 1);
    }

    #[test]
    fn test_resolved_parent_yields_new_id() {
        let parent = Uuid::new_v4();
        let resolver = Fixed(HashMap::from([((EntityKey::Institution, 5), parent)]));
        let mapping = MigrationMapping::new(EntityKey::Unit, "units")
            .generates_id()
            .lookup("institution_id", EntityKey::Institution);
        let converted = convert_record(
            &raw(&[("id", SqlValue::I64(1)), ("institution_id", SqlValue::I64(5))]),
            &mapping,
            Some(Uuid::new_v4()),
            &resolver,
        )
        .unwrap();
        assert_eq!(
            converted.record.get("institution_id"),
            Some(&SqlValue::Uuid(parent))
        );
    }

    #[test]
    fn test_audit_defaults_from_legacy_fields() {
        let created = NaiveDate::from_ymd_opt(2020, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let mapping = MigrationMapping::new(EntityKey::Theme, "themes").generates_id();
        let converted = convert_record(
            &raw(&[("id", SqlValue::I64(1)), ("date_created", SqlValue::DateTime(created))]),
            &mapping,
            Some(Uuid::new_v4()),
            &none(),
        )
        .unwrap();
        assert_eq!(converted.record.get("created_at"), Some(&SqlValue::DateTime(created)));
        assert_eq!(converted.record.get("updated_at"), Some(&SqlValue::DateTime(created)));
    }

    #[test]
    fn test_derive_error_drops_record() {
        fn fail(_: &SqlValue, _: &Record) -> Result<SqlValue, String> {
            Err("bad size".into())
        }
        let mapping = MigrationMapping::new(EntityKey::File, "files")
            .generates_id()
            .convert("size_formatted", ValueConverter::Derive(fail));
        let err = convert_record(
            &raw(&[("id", SqlValue::I64(1))]),
            &mapping,
            Some(Uuid::new_v4()),
            &none(),
        )
        .unwrap_err();
        assert_eq!(err, "bad size");
    }

    #[test]
    fn test_missing_assigned_id_is_an_error() {
        let mapping = MigrationMapping::new(EntityKey::Role, "roles").generates_id();
        assert!(convert_record(&raw(&[("id", SqlValue::I64(1))]), &mapping, None, &none()).is_err());
    }
}
