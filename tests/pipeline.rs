//! End-to-end flow: provider changes through the sync task to handlers.

use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use vault_metadata_cache::prelude::*;
use vault_metadata_cache::vault::{FileChangeEvent, FileChangeKind, Frontmatter};

fn snapshot(yaml: &str) -> MetadataSnapshot {
    MetadataSnapshot::with_frontmatter(Frontmatter::from_yaml(yaml).unwrap())
}

async fn next(rx: &mut broadcast::Receiver<DomainEvent>) -> DomainEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_handlers_see_derived_events_in_order() {
    let provider = Arc::new(MemoryVaultProvider::new());
    provider.seed("projects/site.md", snapshot("type: Project\nstatus: Active"));
    provider.seed("Templates/project.md", snapshot("type: Project\nstatus: Draft"));

    let config = VaultConfig::builder("/vault").template_folder("Templates").build();
    let sync = VaultSync::new(provider.clone(), &config);
    let store = sync.store();

    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    for kind in [
        DomainEventKind::StatusChanged,
        DomainEventKind::TaskFileChanged,
        DomainEventKind::KanbanChanged,
    ] {
        let seen = Arc::clone(&seen);
        store.on(kind, move |event| {
            let path = event.file().map(|f| f.path().display().to_string());
            seen.lock().push(format!("{kind}:{}", path.unwrap_or_default()));
            Ok(())
        });
    }
    store.on(DomainEventKind::StatusChanged, |_| anyhow::bail!("handler failure"));
    let mut events = store.subscribe();

    sync.start().unwrap();
    store.wait_until_ready().await;
    assert_eq!(store.len().await, 2);

    provider.modify(
        "projects/site.md",
        snapshot("type: Project\nstatus: Done\nsubType: Kanban"),
    );
    provider.modify("Templates/project.md", snapshot("type: Project\nstatus: Ready"));
    provider.create("projects/new.md", snapshot("type: Task\nstatus: Open"));

    for _ in 0..3 {
        next(&mut events).await;
    }
    // Created files carry no change events; wait for the entry itself.
    let entry = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(entry) = store.get_entry_by_path(Path::new("projects/new.md")).await {
                return entry;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(entry.metadata.frontmatter.get_str("status"), Some("Open"));

    assert_eq!(
        *seen.lock(),
        vec![
            "status-changed:projects/site.md",
            "task-file-changed:projects/site.md",
            "kanban-changed:projects/site.md",
        ]
    );
    assert_eq!(store.entries_of_type(FileType::Project).await.len(), 2);

    sync.stop().await;
}

#[tokio::test]
async fn test_local_vault_batches_reach_the_store() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    fs::create_dir_all(root.join("tasks")).unwrap();
    fs::write(root.join("tasks/write.md"), "---\ntype: Task\nstatus: Open\n---\n").unwrap();
    fs::write(root.join("index.md"), "# Index\n[[write]]\n").unwrap();

    let config = VaultConfig::builder(root).build();
    let provider = Arc::new(LocalVaultProvider::open(&config).await.unwrap());
    let sync = VaultSync::new(provider.clone(), &config);
    let store = sync.store();
    let mut events = store.subscribe();

    sync.start().unwrap();
    store.wait_until_ready().await;

    let task = FileHandle::new("tasks/write.md");
    let backlinks = store.get_backlinks(&task).await;
    assert_eq!(backlinks, vec![FileHandle::new("index.md")]);

    fs::write(root.join("tasks/write.md"), "---\ntype: Task\nstatus: Done\n---\n").unwrap();
    let abs = provider.root().join("tasks/write.md");
    provider
        .apply_batch(vec![FileChangeEvent::new(abs, FileChangeKind::Modify)])
        .await;

    assert_eq!(next(&mut events).await, DomainEvent::StatusChanged(task.clone()));
    assert_eq!(next(&mut events).await, DomainEvent::TaskFileChanged(task.clone()));

    fs::rename(root.join("tasks/write.md"), root.join("tasks/written.md")).unwrap();
    provider
        .apply_batch(vec![FileChangeEvent::rename(
            provider.root().join("tasks/write.md"),
            provider.root().join("tasks/written.md"),
        )])
        .await;
    assert_eq!(
        next(&mut events).await,
        DomainEvent::FileRenamed {
            old_path: PathBuf::from("tasks/write.md"),
            new_path: PathBuf::from("tasks/written.md"),
        }
    );
    assert_eq!(
        sync.names().find_by_name("written"),
        NameLookup::Unique(FileHandle::new("tasks/written.md"))
    );

    sync.stop().await;
}
