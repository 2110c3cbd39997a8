//! Watches the trigger inbox and submits bulk requests dropped into it

use letter_core::{BulkTriggerInbox, TriggerOutcome};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::sync::Arc;
use tokio::sync::mpsc;

pub async fn monitor_triggers(inbox: Arc<BulkTriggerInbox>) -> anyhow::Result<()> {
    let triggers_path = inbox.triggers_dir().to_path_buf();
    log::info!("Monitoring bulk triggers in {}/", triggers_path.display());

    let (tx, mut rx) = mpsc::channel::<Event>(64);
    let mut watcher = RecommendedWatcher::new(
        move |result: Result<Event, notify::Error>| match result {
            Ok(event) => {
                if tx.blocking_send(event).is_err() {
                    log::debug!("Trigger monitor stopped, dropping file event");
                }
            }
            Err(e) => log::error!("Watcher error: {}", e),
        },
        notify::Config::default(),
    )?;
    watcher.watch(&triggers_path, RecursiveMode::NonRecursive)?;

    // Files that arrived while the service was down
    inbox.process_existing().await?;

    while let Some(event) = rx.recv().await {
        log::debug!("File system event: {:?}", event);

        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            continue;
        }

        for path in event.paths {
            match inbox.process_file(&path).await {
                Ok(TriggerOutcome::Ignored) => {}
                Ok(outcome) => log::debug!("Trigger {:?}: {:?}", path, outcome),
                Err(e) => log::error!("Failed to process trigger file {:?}: {}", path, e),
            }
        }
    }

    anyhow::bail!("File watcher for {} closed", triggers_path.display())
}
