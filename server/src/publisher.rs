//! Forwarding signal changes to an external MQTT broker is explicitly
//! out of scope for this crate (spec's Non-goals). This logging
//! publisher is what `RequestProcessor` is handed in its place, so a
//! `set` still has somewhere visible to go.

use async_trait::async_trait;
use broker_core::interfaces::Publisher;
use broker_core::path::PathAddress;
use broker_core::tree::node::Attribute;
use broker_core::tree::RenderedDataPoint;

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPublisher;

#[async_trait]
impl Publisher for LoggingPublisher {
    async fn send_path_value(
        &self,
        path: &PathAddress,
        attribute: Attribute,
        datapoint: &RenderedDataPoint,
    ) {
        tracing::debug!(
            path = %path.as_origin_form(),
            attribute = attribute.as_str(),
            value = %datapoint.value,
            "signal changed"
        );
    }
}
