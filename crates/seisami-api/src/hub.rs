//! Per-user wake-up hub
//!
//! One task owns the registry of live sync sockets. Everything else talks to
//! it through an unbounded command channel, so registration, eviction and
//! fan-out are serialized without a lock.

use std::collections::HashMap;

use seisami_core::sync::WakeMessage;
use seisami_core::TableName;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// A live wake-up connection.
#[derive(Debug)]
pub struct HubClient {
    pub user_id: String,
    pub connection_id: Uuid,
    pub device_id: Option<String>,
    pub outbound: mpsc::Sender<String>,
}

impl HubClient {
    pub fn new(
        user_id: impl Into<String>,
        device_id: Option<String>,
        outbound: mpsc::Sender<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            connection_id: Uuid::now_v7(),
            device_id: device_id.filter(|device| !device.trim().is_empty()),
            outbound,
        }
    }
}

enum HubCommand {
    Register(HubClient),
    Unregister {
        user_id: String,
        connection_id: Uuid,
    },
    Notify {
        user_id: String,
        table: TableName,
        origin_device: Option<String>,
    },
    Snapshot(oneshot::Sender<usize>),
}

/// Handle to the hub task. Cheap to clone.
#[derive(Clone)]
pub struct NotificationHub {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl NotificationHub {
    /// Start the hub task. It stops once every handle is dropped.
    pub fn spawn() -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_hub(receiver));
        Self { commands }
    }

    /// Register a connection, replacing any earlier one for the same user.
    ///
    /// The registration is released when the returned guard drops.
    pub fn register(&self, client: HubClient) -> HubRegistration {
        let registration = HubRegistration {
            hub: self.clone(),
            user_id: client.user_id.clone(),
            connection_id: client.connection_id,
        };
        self.send(HubCommand::Register(client));
        registration
    }

    /// Tell the user's other device that `table` changed.
    pub fn notify(&self, user_id: &str, table: TableName, origin_device: Option<&str>) {
        self.send(HubCommand::Notify {
            user_id: user_id.to_string(),
            table,
            origin_device: origin_device.map(str::to_string),
        });
    }

    /// Number of users with a live connection.
    pub async fn connected_users(&self) -> usize {
        let (reply, response) = oneshot::channel();
        self.send(HubCommand::Snapshot(reply));
        response.await.unwrap_or(0)
    }

    fn send(&self, command: HubCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("Notification hub is not running");
        }
    }
}

/// Drop guard that unregisters one connection.
pub struct HubRegistration {
    hub: NotificationHub,
    user_id: String,
    connection_id: Uuid,
}

impl Drop for HubRegistration {
    fn drop(&mut self) {
        self.hub.send(HubCommand::Unregister {
            user_id: std::mem::take(&mut self.user_id),
            connection_id: self.connection_id,
        });
    }
}

async fn run_hub(mut commands: mpsc::UnboundedReceiver<HubCommand>) {
    let mut clients: HashMap<String, HubClient> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            HubCommand::Register(client) => {
                let connection_id = client.connection_id;
                if let Some(previous) = clients.insert(client.user_id.clone(), client) {
                    // Dropping the old sender closes that connection's writer
                    tracing::info!(
                        replaced = %previous.connection_id,
                        connection = %connection_id,
                        "Replaced existing sync connection"
                    );
                } else {
                    tracing::debug!(connection = %connection_id, "Registered sync connection");
                }
            }
            HubCommand::Unregister {
                user_id,
                connection_id,
            } => {
                if clients
                    .get(&user_id)
                    .is_some_and(|client| client.connection_id == connection_id)
                {
                    clients.remove(&user_id);
                    tracing::debug!(connection = %connection_id, "Unregistered sync connection");
                }
            }
            HubCommand::Notify {
                user_id,
                table,
                origin_device,
            } => notify(&mut clients, &user_id, table, origin_device.as_deref()),
            HubCommand::Snapshot(reply) => {
                let _ = reply.send(clients.len());
            }
        }
    }
}

fn notify(
    clients: &mut HashMap<String, HubClient>,
    user_id: &str,
    table: TableName,
    origin_device: Option<&str>,
) {
    let Some(client) = clients.get(user_id) else {
        return;
    };
    if origin_device.is_some() && client.device_id.as_deref() == origin_device {
        return;
    }

    let message = WakeMessage::SyncUpdate { table_name: table }.to_json();
    match client.outbound.try_send(message) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(
                connection = %client.connection_id,
                table = %table,
                "Sync connection is not draining; evicting"
            );
            clients.remove(user_id);
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            clients.remove(user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(
        user_id: &str,
        device_id: Option<&str>,
        capacity: usize,
    ) -> (HubClient, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            HubClient::new(user_id, device_id.map(str::to_string), sender),
            receiver,
        )
    }

    #[tokio::test]
    async fn notify_reaches_only_the_target_user() {
        let hub = NotificationHub::spawn();
        let (alice, mut alice_rx) = client("alice", Some("laptop"), 4);
        let (bob, mut bob_rx) = client("bob", Some("phone"), 4);
        let _alice_guard = hub.register(alice);
        let _bob_guard = hub.register(bob);

        hub.notify("alice", TableName::Cards, Some("desktop"));
        assert_eq!(hub.connected_users().await, 2);

        assert_eq!(
            alice_rx.recv().await.unwrap(),
            r#"{"type":"sync_update","table_name":"cards"}"#
        );
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn notify_skips_the_originating_device() {
        let hub = NotificationHub::spawn();
        let (alice, mut alice_rx) = client("alice", Some("laptop"), 4);
        let _guard = hub.register(alice);

        hub.notify("alice", TableName::Boards, Some("laptop"));
        assert_eq!(hub.connected_users().await, 1);
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_evicts_the_client() {
        let hub = NotificationHub::spawn();
        let (alice, mut alice_rx) = client("alice", None, 1);
        let _guard = hub.register(alice);

        hub.notify("alice", TableName::Cards, None);
        hub.notify("alice", TableName::Columns, None);
        assert_eq!(hub.connected_users().await, 0);

        assert!(alice_rx.recv().await.unwrap().contains("cards"));
        assert!(alice_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn replaced_connection_cleanup_keeps_the_successor() {
        let hub = NotificationHub::spawn();
        let (first, mut first_rx) = client("alice", Some("laptop"), 4);
        let first_guard = hub.register(first);
        let (second, mut second_rx) = client("alice", Some("phone"), 4);
        let _second_guard = hub.register(second);

        // The replaced connection's queue is closed
        assert!(first_rx.recv().await.is_none());

        drop(first_guard);
        assert_eq!(hub.connected_users().await, 1);

        hub.notify("alice", TableName::Transcriptions, None);
        assert!(second_rx.recv().await.unwrap().contains("transcriptions"));
    }

    #[tokio::test]
    async fn dropping_the_guard_unregisters() {
        let hub = NotificationHub::spawn();
        let (alice, _alice_rx) = client("alice", None, 4);
        let guard = hub.register(alice);
        assert_eq!(hub.connected_users().await, 1);

        drop(guard);
        assert_eq!(hub.connected_users().await, 0);
    }
}
