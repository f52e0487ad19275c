//! Row visibility under the versioned data model.
//!
//! Rows carry `CreatedVersion` and `DeletedVersion` markers. The current
//! snapshot is every row that has not been deleted; a historical instance
//! `V` sees rows created at or before `V` and not deleted before `V`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::model::{CREATED_VERSION_COLUMN, DELETED_VERSION_COLUMN};
use crate::predicate::{CompareOp, Predicate};
use crate::provider::{cancellable, VersionCatalog};

/// Rows of the current snapshot.
pub fn current_snapshot() -> Predicate {
    Predicate::is_null(DELETED_VERSION_COLUMN)
}

/// Rows visible at `version`.
///
/// Rows with neither marker predate versioning and are always visible.
pub fn at_version(version: i32) -> Predicate {
    Predicate::Or(vec![
        Predicate::And(vec![
            Predicate::compare(CREATED_VERSION_COLUMN, CompareOp::Le, version),
            Predicate::compare(DELETED_VERSION_COLUMN, CompareOp::Ge, version),
        ]),
        Predicate::And(vec![
            Predicate::compare(CREATED_VERSION_COLUMN, CompareOp::Le, version),
            Predicate::is_null(DELETED_VERSION_COLUMN),
        ]),
        Predicate::And(vec![
            Predicate::is_null(CREATED_VERSION_COLUMN),
            Predicate::is_null(DELETED_VERSION_COLUMN),
        ]),
    ])
}

/// Turns an optional instance id into a visibility predicate.
#[derive(Clone)]
pub struct VersionVisibilityResolver {
    catalog: Arc<dyn VersionCatalog>,
}

impl VersionVisibilityResolver {
    pub fn new(catalog: Arc<dyn VersionCatalog>) -> Self {
        Self { catalog }
    }

    /// Resolve `instance_id` for a collection.
    ///
    /// An absent or blank instance selects the current snapshot. Otherwise
    /// the id must be an integer listed in the collection's version catalog.
    pub async fn resolve(
        &self,
        collection_id: i32,
        instance_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> EngineResult<Predicate> {
        let instance_id = match instance_id.map(str::trim) {
            Some(id) if !id.is_empty() => id,
            _ => return Ok(current_snapshot()),
        };

        let version: i32 = instance_id
            .parse()
            .map_err(|_| EngineError::InstanceNotFound(instance_id.to_string()))?;

        let versions = cancellable(cancel, self.catalog.versions(collection_id)).await?;
        if !versions.contains(&version) {
            return Err(EngineError::InstanceNotFound(instance_id.to_string()));
        }

        debug!(collection_id, version, "Resolved instance visibility");
        Ok(at_version(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldValue, Row};
    use async_trait::async_trait;
    use std::collections::BTreeSet;

    struct FixedVersions(BTreeSet<i32>);

    #[async_trait]
    impl VersionCatalog for FixedVersions {
        async fn versions(&self, _collection_id: i32) -> EngineResult<BTreeSet<i32>> {
            Ok(self.0.clone())
        }
    }

    fn resolver() -> VersionVisibilityResolver {
        VersionVisibilityResolver::new(Arc::new(FixedVersions((1..=6).collect())))
    }

    fn row(created: Option<i64>, deleted: Option<i64>) -> Row {
        Row::new()
            .with(CREATED_VERSION_COLUMN, FieldValue::from(created))
            .with(DELETED_VERSION_COLUMN, FieldValue::from(deleted))
    }

    #[test]
    fn test_versioned_row_visibility() {
        let r = row(Some(2), Some(5));
        assert!(at_version(3).matches(&r));
        assert!(at_version(5).matches(&r));
        assert!(!at_version(1).matches(&r));
        assert!(!at_version(6).matches(&r));
    }

    #[test]
    fn test_unversioned_row_always_visible() {
        let r = row(None, None);
        for version in 1..=6 {
            assert!(at_version(version).matches(&r));
        }
        assert!(current_snapshot().matches(&r));
    }

    #[test]
    fn test_live_row_visible_from_creation() {
        let r = row(Some(3), None);
        assert!(!at_version(2).matches(&r));
        assert!(at_version(3).matches(&r));
        assert!(at_version(6).matches(&r));
    }

    #[test]
    fn test_deleted_row_not_current() {
        assert!(!current_snapshot().matches(&row(Some(1), Some(4))));
        assert!(!current_snapshot().matches(&row(None, Some(4))));
    }

    #[tokio::test]
    async fn test_resolve_absent_instance() {
        let cancel = CancellationToken::new();
        assert_eq!(resolver().resolve(1, None, &cancel).await.unwrap(), current_snapshot());
        assert_eq!(resolver().resolve(1, Some(""), &cancel).await.unwrap(), current_snapshot());
    }

    #[tokio::test]
    async fn test_resolve_known_instance() {
        let cancel = CancellationToken::new();
        assert_eq!(resolver().resolve(1, Some("3"), &cancel).await.unwrap(), at_version(3));
    }

    #[tokio::test]
    async fn test_resolve_unknown_instance() {
        let cancel = CancellationToken::new();
        for instance in ["7", "latest", "2.5"] {
            assert!(matches!(
                resolver().resolve(1, Some(instance), &cancel).await,
                Err(EngineError::InstanceNotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_resolve_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            resolver().resolve(1, Some("3"), &cancel).await,
            Err(EngineError::Cancelled)
        ));
    }
}
