//! Operation-log synchronization between a device and the sync service.

mod bootstrap;
mod http;
mod reconciler;
mod reduce;
mod scheduler;
mod transport;
mod wake;

pub use bootstrap::{bootstrap_cloud, merge_exports, merge_latest, BootstrapReport};
pub use http::HttpSyncTransport;
pub use reconciler::{FetchMode, Reconciler, SyncReport};
pub use reduce::{decode_operations, latest_by_record, record_ids};
pub use scheduler::SyncScheduler;
pub use transport::{PushReceipt, StoreTransport, SyncTransport, TransportError, TransportResult};
pub use wake::{parse_wake_message, WakeListener, WakeMessage, RECONNECT_DELAY, WAKE_PATH};
