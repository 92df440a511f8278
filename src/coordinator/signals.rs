// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! OS signal handling.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::error;

use super::Coordinator;

/// Route SIGTERM and ctrl-c to [`Coordinator::handle_signal`].
///
/// The listener keeps running after the first signal so duplicates are seen
/// and ignored rather than killing the process with the default handler.
pub fn spawn_signal_listener(coordinator: Arc<Coordinator>) -> JoinHandle<()> {
    tokio::spawn(listen(coordinator))
}

#[cfg(unix)]
async fn listen(coordinator: Arc<Coordinator>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            return;
        }
    };

    loop {
        tokio::select! {
            received = term.recv() => {
                if received.is_none() {
                    return;
                }
                coordinator.handle_signal("SIGTERM");
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for ctrl-c: {}", e);
                    return;
                }
                coordinator.handle_signal("SIGINT");
            }
        }
    }
}

#[cfg(not(unix))]
async fn listen(coordinator: Arc<Coordinator>) {
    loop {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            return;
        }
        coordinator.handle_signal("ctrl-c");
    }
}
