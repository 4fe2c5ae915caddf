//! Session lifecycle: the adapter contract, the live rumqttc adapter, the
//! reconciling coordinator, and the save-gate connectivity test.

pub mod adapter;
pub mod coordinator;
pub mod rumqtt;
pub mod tester;

pub use adapter::{AdapterError, ClientEvent, ConnectionStatus, ProtocolAdapter};
pub use coordinator::{ConnectionSnapshot, Coordinator, SnapshotStatus};
pub use rumqtt::RumqttAdapter;
pub use tester::test_broker;
