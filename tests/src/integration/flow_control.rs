//! # Flow Control and Protocol Errors
//!
//! - Pausing drops, it does not buffer
//! - A corrupt payload yields one error and nothing else
//! - `emit` without payload publishes nothing

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{drain, settle, total, Cluster, TOPIC};
    use courier_bus::BusError;
    use serde_json::json;

    #[tokio::test]
    async fn test_paused_instance_never_sees_messages_from_the_pause() {
        let cluster = Cluster::connect(2).await;
        let hits = cluster.count_on("tick", false);

        cluster.bus(1).pause().unwrap();
        for n in 0..3 {
            cluster.bus(0).emit("tick", vec![json!(n)]).await;
        }
        settle().await;
        assert_eq!(hits[0].load(std::sync::atomic::Ordering::SeqCst), 3);

        cluster.bus(1).resume().unwrap();
        settle().await;
        assert_eq!(hits[1].load(std::sync::atomic::Ordering::SeqCst), 0);

        cluster.bus(0).emit("tick", vec![json!("after")]).await;
        settle().await;
        assert_eq!(hits[1].load(std::sync::atomic::Ordering::SeqCst), 1);
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_paused_emit_reports_success_but_publishes_nothing() {
        let cluster = Cluster::connect(2).await;
        let hits = cluster.count_on("tick", false);
        let mut errors = cluster.bus(0).errors();

        cluster.bus(0).pause().unwrap();
        cluster.bus(0).emit("tick", vec![json!(1)]).await;
        settle().await;

        assert_eq!(cluster.transport.messages_published(), 0);
        assert_eq!(total(&hits), 0);
        assert!(drain(&mut errors).is_empty());
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_pause_and_resume_are_idempotent() {
        let cluster = Cluster::connect(1).await;
        let bus = cluster.bus(0);

        bus.pause().unwrap();
        bus.pause().unwrap();
        assert!(bus.is_paused());
        bus.resume().unwrap();
        bus.resume().unwrap();
        assert!(!bus.is_paused());
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_corrupt_payload_isolated() {
        let cluster = Cluster::connect(2).await;
        let hits = cluster.count_on("tick", false);
        let mut errors = cluster.error_receivers();

        cluster.transport.publish_raw(TOPIC, "}}} definitely not json");
        cluster.bus(0).emit("tick", vec![json!(1)]).await;
        settle().await;

        for receiver in errors.iter_mut() {
            let reported = drain(receiver);
            assert_eq!(reported.len(), 1);
            assert!(matches!(reported[0], BusError::Parse(_)));
        }
        assert_eq!(total(&hits), 2);
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_envelope_without_event_is_corrupt() {
        let cluster = Cluster::connect(1).await;
        let hits = cluster.count_on("tick", false);
        let mut errors = cluster.bus(0).errors();

        cluster
            .transport
            .publish_raw(TOPIC, r#"{"id":"x","event":"","args":[1]}"#);
        cluster.transport.publish_raw(TOPIC, r#"{"id":"y","args":[1]}"#);
        settle().await;

        let reported = drain(&mut errors);
        assert_eq!(reported.len(), 2);
        assert!(reported
            .iter()
            .all(|e| matches!(e, BusError::CorruptMessage(_))));
        assert_eq!(total(&hits), 0);
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_utf8_payload_is_parse_error() {
        let cluster = Cluster::connect(1).await;
        let mut errors = cluster.bus(0).errors();

        cluster.transport.publish_raw(TOPIC, vec![0xff, 0xfe, 0xfd]);
        settle().await;

        let reported = drain(&mut errors);
        assert_eq!(reported.len(), 1);
        assert!(matches!(reported[0], BusError::Parse(_)));
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_emit_without_payload_publishes_nothing() {
        let cluster = Cluster::connect(2).await;
        let hits = cluster.count_on("tick", false);
        let mut errors = cluster.bus(0).errors();

        cluster.bus(0).emit("tick", Vec::new()).await;
        cluster.bus(0).emit("", vec![json!(1)]).await;
        settle().await;

        assert_eq!(cluster.transport.messages_published(), 0);
        assert_eq!(total(&hits), 0);
        assert_eq!(
            drain(&mut errors),
            vec![BusError::MissingPayload, BusError::MissingPayload]
        );
        cluster.shutdown().await;
    }
}
