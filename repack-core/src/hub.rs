// repack-core/src/hub.rs
// Real-time notification hub. Subscribers attach to a task id and receive a
// JSON-serializable frame stream: the current snapshot first, then every
// accepted state change, interleaved with heartbeats. A terminal update is
// the last data frame; the stream closes right after it.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use repack_common::error::{RepackError, Result};
use repack_common::model::{Task, TaskId};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::registry::TaskRegistry;

const FRAME_BUFFER: usize = 64;

/// One message on a subscription stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Full task snapshot. Sent once on subscribe, then on every change.
    Update {
        #[serde(flatten)]
        task: Task,
    },
    /// Liveness probe; the subscriber must acknowledge within twice the
    /// heartbeat interval or the hub drops the connection.
    Heartbeat,
    /// Terminal frame for subscriptions to ids the registry does not know.
    NotFound,
}

/// A live attachment to one task's frame stream.
pub struct Subscription {
    pub task_id: TaskId,
    pub client_id: u64,
    pub frames: mpsc::Receiver<Frame>,
}

struct Client {
    id: u64,
    tx: mpsc::Sender<Frame>,
    last_ack: Instant,
}

#[derive(Default)]
struct Clients {
    by_task: HashMap<TaskId, Vec<Client>>,
}

pub struct NotificationHub {
    registry: Arc<TaskRegistry>,
    clients: Mutex<Clients>,
    heartbeat_interval: Duration,
    next_client_id: AtomicU64,
}

impl NotificationHub {
    pub fn new(registry: Arc<TaskRegistry>, heartbeat_interval: Duration) -> Arc<Self> {
        Arc::new(NotificationHub {
            registry,
            clients: Mutex::new(Clients::default()),
            heartbeat_interval,
            next_client_id: AtomicU64::new(1),
        })
    }

    /// Starts the fan-out and heartbeat loops. The handle runs until the
    /// registry's update channel closes (i.e. the registry is dropped).
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = self.clone();
        let mut updates = self.registry.updates();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(hub.heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    update = updates.recv() => match update {
                        Ok(task) => hub.publish(&task),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("Notification hub lagged behind {missed} task updates");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = ticker.tick() => hub.sweep_heartbeats(),
                }
            }
            debug!("Notification hub loop finished");
        })
    }

    /// Attaches to a task's stream. The first frame is always determined
    /// before this returns: the current snapshot for a known id, a single
    /// `NotFound` (followed by stream close) otherwise.
    pub async fn subscribe(&self, task_id: TaskId) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let client_id = self.next_client_id.fetch_add(1, Ordering::SeqCst);

        match self.registry.get(task_id).await? {
            None => {
                // tx dropped after this send, closing the stream.
                tx.try_send(Frame::NotFound)
                    .map_err(|_| RepackError::Hub("Could not queue not-found frame".to_string()))?;
            }
            Some(task) => {
                let terminal = task.status.is_terminal();
                tx.try_send(Frame::Update { task })
                    .map_err(|_| RepackError::Hub("Could not queue snapshot frame".to_string()))?;
                // A terminal snapshot is also the final frame; do not
                // register the client, so the stream closes after it.
                if !terminal {
                    {
                        let mut clients = self.clients.lock().unwrap();
                        clients.by_task.entry(task_id).or_default().push(Client {
                            id: client_id,
                            tx: tx.clone(),
                            last_ack: Instant::now(),
                        });
                    }
                    // The task can reach a terminal state between the
                    // snapshot read and registration; that fan-out saw no
                    // registered client. Deliver the final state here and
                    // withdraw the registration, unless the fan-out already
                    // reached this client.
                    if let Ok(Some(current)) = self.registry.get(task_id).await {
                        if current.status.is_terminal()
                            && self.remove_client(task_id, client_id)
                        {
                            let _ = tx.try_send(Frame::Update { task: current });
                        }
                    }
                }
            }
        }

        Ok(Subscription {
            task_id,
            client_id,
            frames: rx,
        })
    }

    /// Marks a subscriber as alive. Consumers call this on every heartbeat
    /// frame they receive.
    pub fn ack_heartbeat(&self, task_id: TaskId, client_id: u64) {
        let mut clients = self.clients.lock().unwrap();
        if let Some(list) = clients.by_task.get_mut(&task_id) {
            if let Some(client) = list.iter_mut().find(|c| c.id == client_id) {
                client.last_ack = Instant::now();
            }
        }
    }

    /// Removes one client from a task's list, reporting whether it was
    /// still registered. Runs under the same lock as `publish`, so exactly
    /// one of the two delivers a racing terminal frame.
    fn remove_client(&self, task_id: TaskId, client_id: u64) -> bool {
        let mut clients = self.clients.lock().unwrap();
        let Some(list) = clients.by_task.get_mut(&task_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|c| c.id != client_id);
        let removed = list.len() != before;
        if list.is_empty() {
            clients.by_task.remove(&task_id);
        }
        removed
    }

    /// Number of live subscriptions, for the status surface.
    pub fn subscriber_count(&self) -> usize {
        let clients = self.clients.lock().unwrap();
        clients.by_task.values().map(Vec::len).sum()
    }

    fn publish(&self, task: &Task) {
        let terminal = task.status.is_terminal();
        let mut clients = self.clients.lock().unwrap();
        let now_empty = {
            let Some(list) = clients.by_task.get_mut(&task.id) else {
                return;
            };
            list.retain(|client| {
                match client.tx.try_send(Frame::Update { task: task.clone() }) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        // A consumer that cannot keep up with a 64-frame
                        // buffer is disconnected rather than allowed to
                        // stall the hub.
                        warn!("Dropping slow subscriber {} for task {}", client.id, task.id);
                        false
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                }
            });
            list.is_empty()
        };
        // Closing the senders after a terminal update ends every remaining
        // stream once the final frame is consumed.
        if terminal || now_empty {
            clients.by_task.remove(&task.id);
        }
    }

    fn sweep_heartbeats(&self) {
        let grace = self.heartbeat_interval * 2;
        let mut clients = self.clients.lock().unwrap();
        clients.by_task.retain(|task_id, list| {
            list.retain(|client| {
                if client.last_ack.elapsed() > grace {
                    debug!(
                        "Dropping unresponsive subscriber {} for task {task_id}",
                        client.id
                    );
                    return false;
                }
                client.tx.try_send(Frame::Heartbeat).is_ok()
            });
            !list.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_serialize_with_type_tags() {
        let heartbeat = serde_json::to_value(Frame::Heartbeat).unwrap();
        assert_eq!(heartbeat["type"], "heartbeat");
        let not_found = serde_json::to_value(Frame::NotFound).unwrap();
        assert_eq!(not_found["type"], "not_found");
    }

    #[test]
    fn update_frame_flattens_the_task() {
        use repack_common::model::{SourceRef, Task};

        let task = Task::new(
            SourceRef::DirectUrl {
                url: "https://example.com/plugin.difypkg".to_string(),
            },
            "manylinux2014_x86_64".to_string(),
            "offline".to_string(),
        );
        let frame = serde_json::to_value(Frame::Update { task }).unwrap();
        assert_eq!(frame["type"], "update");
        assert_eq!(frame["status"], "pending");
        assert_eq!(frame["progress"], 0);
        assert!(frame.get("task").is_none());
    }
}
