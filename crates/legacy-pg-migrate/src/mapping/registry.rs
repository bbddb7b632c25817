//! Entity and join-table rules for the legacy portal database.

use super::derive;
use super::{EntityKey, MappingRegistry, MigrationMapping, RelationshipMapping, ValueConverter};
use crate::core::SqlValue;
use crate::error::Result;

use EntityKey::*;

/// Catalog entities: name plus description, nothing to remap.
fn catalog(key: EntityKey, target: &str) -> MigrationMapping {
    MigrationMapping::new(key, target)
        .generates_id()
        .fields(&["name", "description"])
        .audit_fields()
        .skip(&["version", "deleted"])
        .batch_size(1000)
}

pub(super) fn portal() -> Result<MappingRegistry> {
    let mappings = vec![
        // Independent tables first
        MigrationMapping::new(Role, "roles")
            .generates_id()
            .fields(&["name", "description"])
            .audit_fields()
            .skip(&["version", "deleted"])
            .constant("type", "system")
            .constant("status", "active")
            .constant("user_count", 0i64)
            .batch_size(1000),
        MigrationMapping::new(Institution, "institutions")
            .generates_id()
            .field("name", "name")
            .field("document", "code")
            .field("company_name", "description")
            .field("street", "address")
            .field("district", "city")
            .field("state", "state")
            .field("postal_code", "zip_code")
            .field("accountable_contact", "phone")
            .field("accountable_contact", "email")
            .audit_fields()
            .skip(&[
                "version",
                "deleted",
                "contract_disabled",
                "contract_num",
                "invoice_date",
            ])
            .constant("status", "active")
            .batch_size(500),
        catalog(Author, "authors"),
        catalog(Genre, "genres"),
        catalog(Tag, "tags"),
        catalog(Theme, "themes"),
        catalog(TargetAudience, "target_audiences"),
        MigrationMapping::new(EducationPeriod, "education_cycles")
            .generates_id()
            .field("description", "name")
            .field("is_active", "is_active")
            .skip(&["version"])
            .derive("description", derive::period_name)
            .convert("is_active", ValueConverter::Flag)
            .batch_size(1000),
        MigrationMapping::new(EducationalStage, "educational_stages")
            .generates_id()
            .field("name", "name")
            .audit_fields()
            .skip(&[
                "version", "deleted", "grade_1", "grade_2", "grade_3", "grade_4", "grade_5",
                "grade_6", "grade_7", "grade_8", "grade_9", "uuid",
            ])
            .derive("description", derive::stage_description)
            .constant("status", "active")
            .batch_size(1000),
        // Tables that reference others
        MigrationMapping::new(User, "users")
            .generates_id()
            .depends_on(&[Role, Institution])
            .fields(&["full_name", "email", "password"])
            .field("enabled", "is_active")
            .fields(&["phone", "address", "language", "username"])
            .audit_fields()
            .skip(&[
                "version",
                "deleted",
                "account_expired",
                "account_locked",
                "password_expired",
                "invitation_sent",
                "reset_password",
                "pause_video_on_click",
                "uuid",
                "is_manager",
                "type",
                "certificate_path",
                "is_certified",
                "is_student",
                "is_teacher",
                "subject",
                "subject_data_id",
                "amount_of_media_entries",
            ])
            .convert("is_admin", ValueConverter::Flag)
            .lookup("institution_id", Institution)
            // Roles arrive through the user_role join table
            .convert("role_id", ValueConverter::Null)
            .batch_size(500),
        MigrationMapping::new(Unit, "schools")
            .generates_id()
            .depends_on(&[Institution])
            .fields(&["name", "description"])
            .audit_fields()
            .skip(&["version", "deleted"])
            .lookup("institution_id", Institution)
            .constant("status", "active")
            .derive("code", derive::unit_code)
            .batch_size(500),
        MigrationMapping::new(UnitClass, "classes")
            .generates_id()
            .depends_on(&[Unit, EducationPeriod])
            .fields(&["name", "description"])
            .audit_fields()
            .skip(&["version", "deleted"])
            .lookup("school_id", Unit)
            .lookup("education_cycle_id", EducationPeriod)
            .constant("status", "active")
            .batch_size(500),
        MigrationMapping::new(File, "files")
            .generates_id()
            .fields(&["name", "original_name"])
            .field("content_type", "type")
            .field("size", "size")
            .field("url", "s3_url")
            .field("description", "description")
            .audit_fields()
            .skip(&["version", "deleted"])
            .constant("bucket", "legacy-files")
            .derive("s3_key", derive::legacy_s3_key)
            .derive("size_formatted", derive::size_formatted)
            .constant("category", "literario")
            .constant("is_active", true)
            .convert("uploaded_by", ValueConverter::Null)
            .batch_size(200),
        MigrationMapping::new(TvShow, "tv_shows")
            .generates_id()
            .depends_on(&[File])
            .field("name", "title")
            .field("overview", "synopsis")
            .field("overview", "description")
            .field("poster_path", "cover_image_url")
            .field("backdrop_path", "banner_image_url")
            .field("first_air_date", "release_date")
            .field("original_language", "language")
            .fields(&["popularity", "vote_average"])
            .audit_fields()
            .skip(&[
                "version",
                "deleted",
                "api_id",
                "imdb_id",
                "manual_input",
                "manual_support_id",
                "manual_support_path",
                "producer",
                "contract_term_end",
            ])
            .constant("total_episodes", 0i64)
            .constant("total_seasons", 1i64)
            .constant("total_duration", 0i64)
            .constant("genre", "educacional")
            .constant("target_audience", "geral")
            .constant("content_rating", "livre")
            .constant("is_public", false)
            .constant("is_premium", false)
            .constant("is_featured", false)
            .constant("status", "published")
            .constant("views_count", 0i64)
            .constant("likes_count", 0i64)
            .lookup("poster_image_id", File)
            .lookup("backdrop_image_id", File)
            .batch_size(200),
        MigrationMapping::new(Video, "videos")
            .generates_id()
            .depends_on(&[TvShow, File])
            .field("title", "title")
            .field("name", "title")
            .field("overview", "synopsis")
            .field("overview", "description")
            .field("duration", "duration")
            .field("release_date", "release_date")
            .field("air_date", "release_date")
            .field("poster_path", "poster_url")
            .field("backdrop_path", "backdrop_url")
            .field("still_path", "thumbnail_url")
            .field("original_language", "language")
            .field("popularity", "popularity")
            .field("vote_average", "rating")
            .field("vote_count", "rating_count")
            .fields(&[
                "episode_number",
                "season_number",
                "intro_start",
                "intro_end",
                "outro_start",
            ])
            .audit_fields()
            .skip(&[
                "version",
                "deleted",
                "api_id",
                "imdb_id",
                "class",
                "episode_string",
                "season_episode_merged",
                "trailer_key",
                "report_count",
            ])
            .lookup("tv_show_id", TvShow)
            .lookup("poster_image_id", File)
            .lookup("backdrop_image_id", File)
            .lookup("still_image_id", File)
            .lookup("show_id", TvShow)
            .constant("video_type", "episode")
            .constant("is_public", false)
            .constant("status", "published")
            .constant("views_count", 0i64)
            .derive("duration_seconds", derive::duration_seconds)
            .batch_size(100),
        MigrationMapping::new(Question, "questions")
            .generates_id()
            .depends_on(&[Video])
            .field("description", "question_text")
            .field("title", "title")
            .audit_fields()
            .skip(&["version", "deleted"])
            .lookup("video_id", Video)
            .constant("question_type", "multiple_choice")
            .constant("points", 10i64)
            .constant("is_active", true)
            .batch_size(500),
        MigrationMapping::new(Answer, "question_answers")
            .generates_id()
            .depends_on(&[Question])
            .field("description", "answer_text")
            .field("is_correct", "is_correct")
            .audit_fields()
            .skip(&["version", "deleted"])
            .lookup("question_id", Question)
            .convert("is_correct", ValueConverter::Flag)
            .constant("order_position", SqlValue::I64(0))
            .batch_size(1000),
    ];

    let relationships = vec![
        RelationshipMapping::new("user_role", "user_roles")
            .endpoint("user_roles_id", "user_id", User)
            .endpoint("role_id", "role_id", Role),
        RelationshipMapping::new("video_author", "video_authors")
            .endpoint("video_authors_id", "video_id", Video)
            .endpoint("author_id", "author_id", Author),
    ];

    MappingRegistry::new(mappings, relationships)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portal_registry_covers_every_entity() {
        let registry = portal().unwrap();
        assert_eq!(registry.len(), EntityKey::ALL.len());
        for key in EntityKey::ALL {
            let mapping = registry.get(key).unwrap();
            assert_eq!(mapping.source_table, key.as_str());
            assert!(mapping.generates_id);
        }
        assert_eq!(registry.relationships().len(), 2);
    }

    #[test]
    fn test_portal_dependencies_are_registered() {
        let registry = portal().unwrap();
        for mapping in registry.mappings() {
            for dep in &mapping.dependencies {
                assert!(registry.contains(*dep), "{} -> {}", mapping.key, dep);
            }
            for (entity, _) in mapping.lookup_entities() {
                assert!(
                    mapping.dependencies.contains(&entity) || entity == mapping.key,
                    "{} looks up {} without depending on it",
                    mapping.key,
                    entity
                );
            }
        }
    }

    #[test]
    fn test_one_source_field_feeds_two_targets() {
        let registry = portal().unwrap();
        let tv = registry.get(TvShow).unwrap();
        let targets: Vec<_> = tv
            .field_mappings
            .iter()
            .filter(|(s, _)| s == "overview")
            .map(|(_, t)| t.as_str())
            .collect();
        assert_eq!(targets, vec!["synopsis", "description"]);
    }

    #[test]
    fn test_catalog_batch_sizes() {
        let registry = portal().unwrap();
        assert_eq!(registry.get(Genre).unwrap().batch_size, Some(1000));
        assert_eq!(registry.get(Video).unwrap().batch_size, Some(100));
        assert_eq!(registry.get(File).unwrap().batch_size, Some(200));
    }
}
