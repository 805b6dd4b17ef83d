//! # Race Arbitration
//!
//! With N instances all listening in race mode and K emits, exactly K
//! listener invocations happen across the cluster. Without race mode, K×N.
//! Plain listeners registered next to race-mode ones still fire K×N times.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{drain, settle, total, Cluster};
    use courier_bus::{BusError, LockError};
    use serde_json::json;

    const EMITS: [usize; 3] = [1, 5, 20];

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_race_exclusivity_across_cluster_sizes() {
        for size in 1..=4 {
            for emits in EMITS {
                let cluster = Cluster::connect(size).await;
                let hits = cluster.count_on("job", true);

                for n in 0..emits {
                    cluster.bus(0).emit("job", vec![json!(n)]).await;
                }
                settle().await;

                assert_eq!(
                    total(&hits),
                    emits,
                    "{size} instances, {emits} emits: expected one winner per envelope"
                );
                cluster.shutdown().await;
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_non_race_fans_out_to_every_instance() {
        for size in 1..=4 {
            for emits in EMITS {
                let cluster = Cluster::connect(size).await;
                let hits = cluster.count_on("tick", false);

                for n in 0..emits {
                    cluster.bus(0).emit("tick", vec![json!(n)]).await;
                }
                settle().await;

                assert_eq!(total(&hits), emits * size);
                cluster.shutdown().await;
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mixed_mode_plain_listeners_fire_everywhere() {
        for size in 2..=4 {
            let cluster = Cluster::connect(size).await;
            let raced = cluster.count_on("job", true);
            let plain = cluster.count_on("job", false);

            for n in 0..5 {
                cluster.bus(0).emit("job", vec![json!(n)]).await;
            }
            settle().await;

            assert_eq!(total(&raced), 5, "{size} instances: one race winner per envelope");
            assert_eq!(total(&plain), 5 * size, "{size} instances: plain listeners on every bus");
            cluster.shutdown().await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_loser_reports_race_lost() {
        let cluster = Cluster::connect(3).await;
        let hits = cluster.count_on("job", true);
        let mut errors = cluster.error_receivers();

        for n in 0..5 {
            cluster.bus(0).emit("job", vec![json!(n)]).await;
        }
        settle().await;

        let losses: usize = errors
            .iter_mut()
            .flat_map(drain)
            .filter(|error| {
                matches!(
                    error,
                    BusError::RaceLost {
                        reason: LockError::Contended { .. },
                        ..
                    }
                )
            })
            .count();
        assert_eq!(total(&hits), 5);
        assert_eq!(losses, 5 * 2);
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_lock_keys_are_scoped_to_topic() {
        let cluster = Cluster::connect(1).await;
        cluster.count_on("job", true);

        cluster.bus(0).emit("job", vec![json!(1)]).await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        assert_eq!(cluster.locks.held_count(), 1);
        assert!(!cluster.locks.is_locked("courier:mutex:other-topic:anything"));
        cluster.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_race_stops_after_last_race_listener_removed() {
        let cluster = Cluster::connect(2).await;
        let a = cluster.bus(0).on_race("job", |_: &[serde_json::Value]| {});
        let b = cluster.bus(0).on_race("job", |_: &[serde_json::Value]| {});
        cluster.bus(1).on("job", |_: &[serde_json::Value]| {});

        assert!(cluster.bus(0).remove_listener("job", a));
        assert_eq!(cluster.bus(0).race_count("job"), 1);
        assert!(cluster.bus(0).remove_listener("job", b));
        assert_eq!(cluster.bus(0).race_count("job"), 0);

        // No race registration left anywhere: plain fan-out, no locks taken.
        cluster.bus(0).emit("job", vec![json!(1)]).await;
        settle().await;
        assert_eq!(cluster.locks.held_count(), 0);
        cluster.shutdown().await;
    }
}
