//! SQLite saver tests: durability across saver instances

use futures::StreamExt;
use serde_json::json;
use stategraph_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, CheckpointSource, Cursor, PendingTask,
    SqliteCheckpointSaver,
};

async fn put_step(saver: &SqliteCheckpointSaver, config: &CheckpointConfig, step: i64) -> String {
    saver
        .put(
            config,
            Checkpoint::new(json!({"step": step}), Cursor::default()),
            CheckpointMetadata::new(CheckpointSource::Loop, step),
        )
        .await
        .unwrap()
        .checkpoint_id
        .unwrap()
}

#[tokio::test]
async fn test_checkpoints_survive_new_saver_instance() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("runs.db");
    let config = CheckpointConfig::for_thread("research/run:1");

    {
        let saver = SqliteCheckpointSaver::open(&path).await.unwrap();
        let mut cursor = Cursor::new(vec![PendingTask::node("user_input")]);
        cursor.interrupted_before = Some("user_input".to_string());
        saver
            .put(
                &config,
                Checkpoint::new(json!({"messages": ["hi"]}), cursor),
                CheckpointMetadata::new(CheckpointSource::Loop, 0),
            )
            .await
            .unwrap();
        saver.pool().close().await;
    }

    let reopened = SqliteCheckpointSaver::open(&path).await.unwrap();
    let tuple = reopened.get_tuple(&config).await.unwrap().unwrap();
    assert_eq!(tuple.checkpoint.values["messages"], json!(["hi"]));
    assert!(tuple.checkpoint.cursor.is_interrupted());
    assert_eq!(tuple.config.thread_id.as_deref(), Some("research/run:1"));
    assert!(tuple.parent_config.is_none());
}

#[tokio::test]
async fn test_history_and_parent_links() {
    let saver = SqliteCheckpointSaver::in_memory().await.unwrap();
    let config = CheckpointConfig::for_thread("run-2");

    let mut ids = Vec::new();
    for step in -1..2 {
        ids.push(put_step(&saver, &config, step).await);
    }
    put_step(&saver, &CheckpointConfig::for_thread("other"), 7).await;

    let history: Vec<_> = saver
        .list(&config, None)
        .await
        .unwrap()
        .map(|t| t.unwrap())
        .collect()
        .await;
    let steps: Vec<i64> = history.iter().map(|t| t.metadata.step).collect();
    assert_eq!(steps, vec![1, 0, -1]);
    assert_eq!(
        history[0].parent_config.as_ref().and_then(|c| c.checkpoint_id.clone()),
        Some(ids[1].clone())
    );
    assert!(history[2].parent_config.is_none());

    let limited: Vec<_> = saver.list(&config, Some(1)).await.unwrap().collect().await;
    assert_eq!(limited.len(), 1);

    let first = saver
        .get(&CheckpointConfig::for_thread("run-2").with_checkpoint_id(ids[0].clone()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.values["step"], -1);
}

#[tokio::test]
async fn test_explicit_parent_is_kept() {
    let saver = SqliteCheckpointSaver::in_memory().await.unwrap();
    let config = CheckpointConfig::for_thread("fork");
    let root = put_step(&saver, &config, 0).await;
    put_step(&saver, &config, 1).await;

    let forked = put_step(&saver, &config.clone().with_checkpoint_id(root.clone()), 1).await;
    let tuple = saver
        .get_tuple(&config.clone().with_checkpoint_id(forked))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tuple.parent_config.and_then(|c| c.checkpoint_id), Some(root));
}

#[tokio::test]
async fn test_interrupted_write_keeps_earlier_history() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.db");
    let saver = SqliteCheckpointSaver::open(&path).await.unwrap();
    let config = CheckpointConfig::for_thread("r1");
    let committed = put_step(&saver, &config, 0).await;

    // A writer that dies before committing leaves nothing behind
    {
        let mut tx = saver.pool().begin().await.unwrap();
        sqlx::query(
            "INSERT INTO checkpoints (thread_id, checkpoint_id, step, checkpoint, metadata, created_at)
             VALUES ('r1', 'torn', 1, '{\"config\":{\"thread_id\":\"r1\"', '{}', '')",
        )
        .execute(&mut *tx)
        .await
        .unwrap();
    }

    let latest = saver.get_tuple(&config).await.unwrap().unwrap();
    assert_eq!(latest.config.checkpoint_id, Some(committed));
    let history: Vec<_> = saver.list(&config, None).await.unwrap().collect().await;
    assert_eq!(history.len(), 1);
    assert!(history[0].is_ok());
}

#[tokio::test]
async fn test_missing_thread_and_delete() {
    let saver = SqliteCheckpointSaver::in_memory().await.unwrap();
    let config = CheckpointConfig::for_thread("ghost");

    assert!(saver.get_tuple(&config).await.unwrap().is_none());
    saver.delete_thread("ghost").await.unwrap();

    put_step(&saver, &config, -1).await;
    saver.delete_thread("ghost").await.unwrap();
    assert!(saver.get_tuple(&config).await.unwrap().is_none());

    let err = saver.get_tuple(&CheckpointConfig::new()).await.unwrap_err();
    assert!(err.to_string().contains("thread_id"));
}
