//! One-shot connectivity test used to gate broker saves.

use crate::connection::adapter::{AdapterError, ProtocolAdapter};
use crate::core::time::Clock;
use crate::store::types::BrokerConfig;

/// Open a throwaway session against the candidate config and close it again.
/// Returns the pass timestamp to stamp into `last_test_passed_at`.
pub async fn test_broker<C: Clock>(
    adapter: &dyn ProtocolAdapter,
    clock: &C,
    config: &BrokerConfig,
    secret: Option<String>,
) -> Result<i64, AdapterError> {
    adapter.connect(config, secret).await?;
    adapter.disconnect().await;
    Ok(clock.now_millis())
}
