//! Post-migration row count comparison.
//!
//! Advisory only: a mismatch is reported, never acted upon. Counts can
//! legitimately differ when records were dropped during conversion or when
//! the target already held rows of its own.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::mapping::MappingRegistry;
use crate::source::SourceReader;
use crate::target::TargetWriter;

/// Row counts of one source/target table pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableVerifyResult {
    pub entity: String,
    pub source_table: String,
    pub target_table: String,
    pub source_count: i64,
    pub target_count: i64,
    pub matches: bool,
}

/// Result of a verification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub tables: Vec<TableVerifyResult>,
}

impl VerifyResult {
    pub fn mismatches(&self) -> impl Iterator<Item = &TableVerifyResult> {
        self.tables.iter().filter(|t| !t.matches)
    }

    pub fn all_match(&self) -> bool {
        self.mismatches().next().is_none()
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Compare source and target row counts for every mapped entity.
pub async fn verify_counts(
    source: &Arc<dyn SourceReader>,
    target: &Arc<dyn TargetWriter>,
    registry: &MappingRegistry,
) -> Result<VerifyResult> {
    let mut result = VerifyResult::default();

    for mapping in registry.mappings() {
        let source_count = source.count(&mapping.source_table).await?;
        let target_count = match target.row_count(&mapping.target_table).await {
            Ok(n) => n,
            Err(e) if e.is_connection_error() => return Err(e),
            Err(e) => {
                warn!("{}: could not count target rows: {}", mapping.target_table, e);
                0
            }
        };

        let matches = source_count == target_count;
        if matches {
            info!("{}: {} rows (match)", mapping.key, source_count);
        } else {
            warn!(
                "{}: source={} target={} (MISMATCH)",
                mapping.key, source_count, target_count
            );
        }

        result.tables.push(TableVerifyResult {
            entity: mapping.key.to_string(),
            source_table: mapping.source_table.clone(),
            target_table: mapping.target_table.clone(),
            source_count,
            target_count,
            matches,
        });
    }

    Ok(result)
}
