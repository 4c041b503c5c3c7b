// SPDX-License-Identifier: Apache-2.0

//! Policy file watcher.
//!
//! Uses the platform-native filesystem notification backend. Events are
//! debounced to a whole-file re-parse: editors and config pushers tend to
//! emit bursts (write + rename + chmod), and the policy loader validates
//! the document whole anyway. A failed reload keeps the previous policy and
//! feeds the governance failure counter; enough consecutive failures trip
//! safe mode there.

use crate::extension::Governance;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use phoenix_config::Policy;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEBOUNCE: Duration = Duration::from_millis(250);

/// Watches `path` and reloads the policy on change until cancelled.
///
/// # Errors
///
/// Returns the watcher construction error when the platform backend cannot
/// be initialized; runtime watch events never fail the task.
pub async fn watch_policy(
    governance: Governance,
    path: PathBuf,
    cancel: CancellationToken,
) -> notify::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |event: notify::Result<Event>| {
            match event {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "policy watcher backend error"),
            }
        })?;

    // Watch the parent directory: atomic config pushes replace the file,
    // which would silently detach a file-level watch.
    let watch_root = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    watcher.watch(watch_root, RecursiveMode::NonRecursive)?;
    info!(path = %path.display(), "policy watcher started");

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("policy watcher cancelled");
                return Ok(());
            }
            event = rx.recv() => {
                if event.is_none() {
                    return Ok(());
                }
                // Debounce the burst, then re-parse once.
                tokio::time::sleep(DEBOUNCE).await;
                while rx.try_recv().is_ok() {}
                reload(&governance, &path);
            }
        }
    }
}

fn reload(governance: &Governance, path: &Path) {
    match Policy::load(path) {
        Ok(policy) => {
            info!(path = %path.display(), "policy file reloaded");
            governance.reload_policy(policy);
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "policy reload failed, keeping previous");
            governance.record_reload_failure();
        }
    }
}
