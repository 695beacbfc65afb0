//! Couples consensus leadership to the service registry and to command
//! forwarding.
//!
//! On becoming leader: this instance goes into service, every other peer
//! goes out of service, and local mutation events start flowing into the
//! replicated log. On losing leadership both stop immediately.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::raft::{RaftNode, RaftRole};
use crate::sync::commands::Command;
use crate::sync::events::SyncPublisher;

pub struct SyncService {
    raft: Arc<RaftNode>,
    publisher: SyncPublisher,
}

impl SyncService {
    pub fn new(raft: Arc<RaftNode>, publisher: SyncPublisher) -> Self {
        Self { raft, publisher }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut state_rx = self.raft.subscribe_state();
        // Subscribed only while this node leads
        let mut events: Option<broadcast::Receiver<Command>> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let is_leader = *state_rx.borrow_and_update() == RaftRole::Leader;
                    if is_leader && events.is_none() {
                        if let Err(e) = self.raft.take_into_service().await {
                            tracing::warn!(error = %e, "unable to update service registry");
                        }
                        tracing::info!("leadership gained, forwarding sync events");
                        events = Some(self.publisher.subscribe());
                    } else if !is_leader && events.is_some() {
                        tracing::info!("leadership lost, stop forwarding sync events");
                        events = None;
                        if let Err(e) = self.raft.take_out_of_service().await {
                            tracing::warn!(error = %e, "unable to update service registry");
                        }
                    }
                }

                event = recv_event(&mut events) => match event {
                    Ok(command) => {
                        let outcome = self.raft.start_command(command).await;
                        if !outcome.is_leader {
                            tracing::debug!("dropped sync event, no longer leader");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "sync event stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}

async fn recv_event(
    events: &mut Option<broadcast::Receiver<Command>>,
) -> Result<Command, RecvError> {
    match events.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
