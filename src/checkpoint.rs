//! Checkpoint Facility (C9): a named snapshot bound to an external
//! immutable tag; restore goes through the store's own backup/restore.

use crate::store::Store;
use crate::tagger::Tagger;
use chrono::Utc;
use geoffrussy_common::Checkpoint;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Storage location of a checkpoint's backup file is this facility's
/// responsibility, not the store's — the store only knows how to produce
/// and consume a backup at an arbitrary path.
pub fn backup_path_for(checkpoints_dir: &Path, checkpoint_id: &str) -> PathBuf {
    checkpoints_dir.join(format!("{checkpoint_id}.db"))
}

pub async fn create_checkpoint(
    store: &Store,
    tagger: &dyn Tagger,
    checkpoints_dir: &Path,
    project_id: &str,
    name: &str,
    metadata: Option<HashMap<String, String>>,
) -> anyhow::Result<Checkpoint> {
    let external_tag = tagger.tag(name)?;
    let checkpoint = Checkpoint {
        id: format!("checkpoint-{}", Uuid::new_v4()),
        project_id: project_id.to_string(),
        name: name.to_string(),
        external_tag,
        created_at: Utc::now(),
        metadata,
    };
    store.create_checkpoint(&checkpoint).await?;

    std::fs::create_dir_all(checkpoints_dir)?;
    store.backup(backup_path_for(checkpoints_dir, &checkpoint.id)).await?;
    Ok(checkpoint)
}

pub async fn list_checkpoints(store: &Store, project_id: &str) -> anyhow::Result<Vec<Checkpoint>> {
    Ok(store.list_checkpoints(project_id).await?)
}

/// Restores via the store's backup/restore facility, then checks out the
/// checkpoint's external tag so the working tree matches the snapshot.
pub async fn restore_checkpoint(
    store: &Store,
    tagger: &dyn Tagger,
    checkpoints_dir: &Path,
    checkpoint: &Checkpoint,
) -> anyhow::Result<()> {
    store.restore(backup_path_for(checkpoints_dir, &checkpoint.id)).await?;
    tagger.checkout_tag(&checkpoint.external_tag)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoffrussy_common::{Project, ProjectStage};
    use std::sync::Mutex;

    struct FakeTagger {
        tags: Mutex<Vec<String>>,
        checked_out: Mutex<Vec<String>>,
    }

    impl FakeTagger {
        fn new() -> Self {
            Self { tags: Mutex::new(Vec::new()), checked_out: Mutex::new(Vec::new()) }
        }
    }

    impl Tagger for FakeTagger {
        fn tag(&self, name: &str) -> anyhow::Result<String> {
            self.tags.lock().unwrap().push(name.to_string());
            Ok(name.to_string())
        }
        fn commit(&self, _message: &str) -> anyhow::Result<String> {
            Ok("deadbeef".to_string())
        }
        fn checkout_tag(&self, tag_id: &str) -> anyhow::Result<()> {
            self.checked_out.lock().unwrap().push(tag_id.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn checkpoint_round_trips_through_create_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.db");
        let store = Store::open(&db_path).await.unwrap();
        store
            .save_project(&Project {
                id: "proj-1".into(),
                name: "demo".into(),
                created_at: Utc::now(),
                current_stage: ProjectStage::Develop,
                current_phase_id: None,
            })
            .await
            .unwrap();
        let tagger = FakeTagger::new();
        let checkpoints_dir = dir.path().join("checkpoints");

        let cp = create_checkpoint(&store, &tagger, &checkpoints_dir, "proj-1", "cp1", None)
            .await
            .unwrap();

        let list = list_checkpoints(&store, "proj-1").await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, cp.id);
        assert!(backup_path_for(&checkpoints_dir, &cp.id).exists());
    }
}
