//! # Connection Lifecycle
//!
//! Explicit connect/disconnect transitions, and reconnection driven by the
//! application.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{counting_listener, settle, Cluster, TOPIC};
    use courier_bus::{BusError, ChannelError, TransportError};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_reconnect_after_disconnect() {
        let cluster = Cluster::connect(2).await;
        let hits = counting_listener(cluster.bus(1), "tick", false);

        cluster.bus(1).disconnect().await.unwrap();
        cluster.bus(0).emit("tick", vec![json!("while away")]).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        // Listeners survive the reconnect.
        cluster.bus(1).connect().await.unwrap();
        cluster.bus(0).emit("tick", vec![json!("back")]).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_double_connect_and_disconnect_rejected() {
        let cluster = Cluster::connect(1).await;
        let bus = cluster.bus(0);

        assert_eq!(bus.connect().await, Err(BusError::AlreadyConnected));
        bus.disconnect().await.unwrap();
        assert_eq!(bus.disconnect().await, Err(BusError::NotConnected));
        assert_eq!(bus.pause(), Err(BusError::NotConnected));
        assert_eq!(bus.resume(), Err(BusError::NotConnected));
    }

    #[tokio::test]
    async fn test_disconnect_releases_subscription() {
        let cluster = Cluster::connect(3).await;
        assert_eq!(cluster.transport.subscriber_count(TOPIC), 3);

        cluster.bus(2).disconnect().await.unwrap();
        assert_eq!(cluster.transport.subscriber_count(TOPIC), 2);

        let transport = cluster.transport.clone();
        cluster.shutdown().await;
        assert_eq!(transport.subscriber_count(TOPIC), 0);
    }

    #[tokio::test]
    async fn test_transport_fault_reported_without_reconnect() {
        let cluster = Cluster::connect(1).await;
        let mut errors = cluster.bus(0).errors();

        cluster
            .transport
            .inject_error(TransportError::Connection("broker restarted".to_string()));
        settle().await;

        assert_eq!(
            errors.try_recv().ok(),
            Some(BusError::Channel(ChannelError::Transport(
                TransportError::Connection("broker restarted".to_string())
            )))
        );
        // Still connected: recovery is up to the application.
        assert!(cluster.bus(0).is_connected());
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_background_connect() {
        let cluster = Cluster::connect(0).await;
        let bus = courier_bus::EventBus::new(
            courier_bus::BusConfig::for_topic(TOPIC),
            std::sync::Arc::new(cluster.transport.clone()),
        )
        .unwrap();

        bus.connect_in_background().await.unwrap();
        assert!(bus.is_connected());
        assert_eq!(cluster.transport.subscriber_count(TOPIC), 1);
    }
}
