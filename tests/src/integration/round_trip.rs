//! # Round Trip
//!
//! An instance listening on `e` receives exactly the arguments another
//! instance emitted, in order.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{settle, Cluster};
    use rand::Rng;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn random_value(rng: &mut impl Rng, depth: u8) -> Value {
        match rng.gen_range(0..6) {
            0 => Value::Null,
            1 => json!(rng.gen::<bool>()),
            2 => json!(rng.gen_range(-1_000_000i64..1_000_000)),
            3 => json!(format!("s-{}", rng.gen::<u32>())),
            4 if depth > 0 => Value::Array(
                (0..rng.gen_range(0..4))
                    .map(|_| random_value(rng, depth - 1))
                    .collect(),
            ),
            _ => json!({ "k": rng.gen::<u16>(), "nested": [depth] }),
        }
    }

    #[tokio::test]
    async fn test_args_arrive_unchanged_on_other_instance() {
        let cluster = Cluster::connect(2).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        cluster.bus(1).on("payload", move |args: &[Value]| {
            let _ = tx.send(args.to_vec());
        });

        let mut rng = rand::thread_rng();
        let mut sent = Vec::new();
        for _ in 0..25 {
            let args: Vec<Value> = (0..rng.gen_range(1..6))
                .map(|_| random_value(&mut rng, 2))
                .collect();
            cluster.bus(0).emit("payload", args.clone()).await;
            sent.push(args);
        }

        for expected in sent {
            let received = timeout(Duration::from_millis(500), rx.recv())
                .await
                .expect("timeout waiting for envelope")
                .expect("listener dropped");
            assert_eq!(received, expected);
        }
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_emitter_receives_its_own_event() {
        let cluster = Cluster::connect(1).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        cluster.bus(0).on("echo", move |args: &[Value]| {
            let _ = tx.send(args.to_vec());
        });

        cluster.bus(0).emit("echo", vec![json!("hi")]).await;

        let received = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("timeout")
            .expect("listener dropped");
        assert_eq!(received, vec![json!("hi")]);
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_events_are_isolated_by_name() {
        let cluster = Cluster::connect(2).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        cluster.bus(1).on("wanted", move |args: &[Value]| {
            let _ = tx.send(args.to_vec());
        });

        cluster.bus(0).emit("unwanted", vec![json!(1)]).await;
        cluster.bus(0).emit("wanted", vec![json!(2)]).await;
        settle().await;

        assert_eq!(rx.try_recv().ok(), Some(vec![json!(2)]));
        assert!(rx.try_recv().is_err());
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_topics_do_not_leak() {
        let cluster = Cluster::connect(1).await;
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        cluster.bus(0).on("e", move |_: &[Value]| {
            let _ = tx.send(());
        });

        // Same broker, different topic.
        let stranger = courier_bus::EventBus::new(
            courier_bus::BusConfig::for_topic("elsewhere"),
            std::sync::Arc::new(cluster.transport.clone()),
        )
        .unwrap();
        stranger.connect().await.unwrap();
        stranger.emit("e", vec![json!(1)]).await;
        settle().await;

        assert!(rx.try_recv().is_err());
        cluster.shutdown().await;
    }
}
