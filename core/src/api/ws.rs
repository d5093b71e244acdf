// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Orchestrator ↔ worker transport: a persistent WebSocket connection
//! per worker, dispatching incoming `WorkerMessage`s to the registry
//! and deployment manager.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, error, info, warn};

use crate::orchestrator::Orchestrator;
use crate::protocol::{ServerMessage, WorkerMessage};
use crate::types::WorkerId;

/// Upgrade an incoming HTTP connection to a worker WebSocket session.
pub async fn ws_handler(ws: WebSocketUpgrade, State(orchestrator): State<Arc<Orchestrator>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, orchestrator))
}

async fn handle_socket(socket: WebSocket, orchestrator: Arc<Orchestrator>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = unbounded_channel::<ServerMessage>();

    let mut worker_id: Option<WorkerId> = None;

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(err) => {
                    error!(%err, "failed to serialize outgoing message");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                warn!("worker disconnected mid-send");
                break;
            }
        }
    });

    let orchestrator_for_recv = orchestrator.clone();
    let tx_for_recv = tx.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut registered_id: Option<WorkerId> = None;
        while let Some(Ok(message)) = receiver.next().await {
            let Message::Text(text) = message else {
                continue;
            };

            match serde_json::from_str::<WorkerMessage>(&text) {
                Ok(parsed) => {
                    registered_id = handle_worker_message(&orchestrator_for_recv, &tx_for_recv, registered_id, parsed);
                }
                Err(err) => {
                    debug!(%err, "protocol error, ignoring message");
                    let _ = tx_for_recv.send(ServerMessage::Error {
                        message: format!("malformed message: {err}"),
                    });
                }
            }
        }
        registered_id
    });

    tokio::select! {
        result = &mut recv_task => {
            send_task.abort();
            if let Ok(Some(id)) = result {
                worker_id = Some(id);
            }
        }
        _ = &mut send_task => {
            recv_task.abort();
        }
    }

    if let Some(id) = worker_id {
        orchestrator.registry().detach(id);
        info!(worker_id = %id, "worker detached on disconnect");
    }
}

fn handle_worker_message(
    orchestrator: &Arc<Orchestrator>,
    tx: &tokio::sync::mpsc::UnboundedSender<ServerMessage>,
    registered_id: Option<WorkerId>,
    message: WorkerMessage,
) -> Option<WorkerId> {
    match message {
        WorkerMessage::RegisterWorker { hostname, .. } => {
            let id = orchestrator.registry().register(hostname, tx.clone());
            let _ = tx.send(ServerMessage::WorkerRegistered { id });
            Some(id)
        }
        WorkerMessage::WorkerStatus {
            worker_id,
            status,
            load,
            ..
        } => {
            if let Err(err) = orchestrator.registry().update_status(worker_id, status, load) {
                warn!(%err, %worker_id, "status update for unknown worker");
            }
            registered_id
        }
        WorkerMessage::DeploymentStatus {
            deployment_id,
            replica_id,
            status,
            metrics,
            error,
            ..
        } => {
            if let Some(error) = &error {
                warn!(%deployment_id, replica_id, %error, "worker reported task failure");
            }
            if let Err(err) = orchestrator
                .deployment_manager()
                .on_deployment_status(deployment_id, replica_id, status, metrics)
            {
                warn!(%err, %deployment_id, replica_id, "failed to record deployment status");
            }
            registered_id
        }
        WorkerMessage::ReplicaRemoved {
            deployment_id,
            replica_id,
            ..
        } => {
            info!(%deployment_id, replica_id, "worker confirmed replica removal");
            registered_id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::{Load, WorkerStatus};

    #[tokio::test]
    async fn test_register_then_status_round_trip() {
        let orchestrator = Orchestrator::new(Config::default());
        let (tx, _rx) = unbounded_channel();

        let id = handle_worker_message(
            &orchestrator,
            &tx,
            None,
            WorkerMessage::RegisterWorker {
                hostname: "host-a".to_string(),
                start_time: chrono::Utc::now(),
                current_user: "agent".to_string(),
            },
        );
        assert_eq!(id, Some(WorkerId(1)));

        handle_worker_message(
            &orchestrator,
            &tx,
            id,
            WorkerMessage::WorkerStatus {
                worker_id: WorkerId(1),
                status: WorkerStatus::Busy,
                load: Load {
                    cpu_usage: 65.0,
                    memory_usage: 40.0,
                    running_containers: 1,
                },
                timestamp: chrono::Utc::now(),
            },
        );

        let worker = orchestrator.workers_by_freshness().remove(0);
        assert_eq!(worker.status, WorkerStatus::Busy);
    }
}
