//! # Telemetry Wiring
//!
//! Buses report through the Prometheus recorder and the atomic counters.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{settle, Cluster, TOPIC};
    use courier_bus::{BusConfig, BusMetrics, MetricsRecorder};
    use courier_telemetry::{encode_metrics, register_metrics, PrometheusRecorder};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_prometheus_recorder_sees_bus_traffic() {
        register_metrics().unwrap();
        let recorder: Arc<dyn MetricsRecorder> = Arc::new(PrometheusRecorder::new());
        let cluster = Cluster::connect_with(2, BusConfig::for_topic(TOPIC), Some(recorder)).await;
        cluster.count_on("telemetry.race", true);

        cluster.bus(0).emit("telemetry.race", vec![json!(1)]).await;
        cluster.transport.publish_raw(TOPIC, "garbage");
        settle().await;

        let text = encode_metrics().unwrap();
        assert!(text.contains("courier_messages_published_total{event=\"telemetry.race\"}"));
        assert!(text.contains("courier_messages_received_total{event=\"telemetry.race\"}"));
        assert!(text.contains("courier_race_outcomes_total{outcome=\"won\"}"));
        assert!(text.contains("courier_race_outcomes_total{outcome=\"lost\"}"));
        assert!(text.contains("courier_messages_dropped_total{reason=\"parse\"}"));
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_bus_metrics_snapshot() {
        let metrics = Arc::new(BusMetrics::new());
        let cluster =
            Cluster::connect_with(3, BusConfig::for_topic(TOPIC), Some(metrics.clone())).await;
        cluster.count_on("job", true);

        for n in 0..4 {
            cluster.bus(0).emit("job", vec![json!(n)]).await;
        }
        settle().await;
        cluster.bus(0).health_check().await.unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.published, 5);
        assert_eq!(snapshot.races_won, 4);
        assert_eq!(snapshot.races_lost, 8);
        assert_eq!(snapshot.health_checks_ok, 1);
        cluster.shutdown().await;
    }
}
