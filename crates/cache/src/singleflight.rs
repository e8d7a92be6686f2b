//! Per-fingerprint single-flight guard
//!
//! Coalesces concurrent misses: the first caller for a fingerprint becomes
//! the leader and runs the pipeline; latecomers wait until the leader's
//! permit is released, then re-read the cache. The permit releases on drop,
//! so a failed leader cannot strand its followers.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Outcome of joining a flight
pub enum FlightRole {
    /// This caller runs the pipeline; dropping the permit wakes followers
    Leader(FlightPermit),
    /// Another execution finished while we waited; re-read the cache
    Follower,
}

/// Held by the leader for the duration of one pipeline execution
pub struct FlightPermit {
    key: String,
    gate: Arc<Semaphore>,
    flights: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        self.flights.lock().remove(&self.key);
        // Waking followers: a closed semaphore fails every pending and
        // future acquire immediately
        self.gate.close();
    }
}

/// Registry of in-flight pipeline executions keyed by fingerprint
#[derive(Default)]
pub struct SingleFlight {
    flights: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`: become leader if none is running,
    /// otherwise wait for the running one to finish.
    pub async fn join(&self, key: &str) -> FlightRole {
        let joined = {
            let mut flights = self.flights.lock();
            match flights.get(key) {
                Some(gate) => Err(gate.clone()),
                None => {
                    let gate = Arc::new(Semaphore::new(0));
                    flights.insert(key.to_string(), gate.clone());
                    Ok(gate)
                }
            }
        };

        match joined {
            Err(gate) => {
                // Resolves with Err(Closed) once the leader drops its permit
                let _ = gate.acquire().await;
                FlightRole::Follower
            }
            Ok(gate) => FlightRole::Leader(FlightPermit {
                key: key.to_string(),
                gate,
                flights: self.flights.clone(),
            }),
        }
    }

    /// Number of flights currently in progress
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn first_joiner_leads() {
        let flights = SingleFlight::new();
        match flights.join("k").await {
            FlightRole::Leader(_permit) => {}
            FlightRole::Follower => panic!("first joiner must lead"),
        }
        // Permit dropped: the key is released
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn followers_wait_for_the_leader() {
        let flights = Arc::new(SingleFlight::new());
        let leaders = Arc::new(AtomicUsize::new(0));

        let permit = match flights.join("k").await {
            FlightRole::Leader(permit) => permit,
            FlightRole::Follower => panic!("expected leader"),
        };

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = flights.clone();
            let leaders = leaders.clone();
            handles.push(tokio::spawn(async move {
                match flights.join("k").await {
                    FlightRole::Leader(_) => {
                        leaders.fetch_add(1, Ordering::SeqCst);
                    }
                    FlightRole::Follower => {}
                }
            }));
        }

        // Followers are parked until the leader finishes
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(flights.in_flight(), 1);
        drop(permit);

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(leaders.load(Ordering::SeqCst), 0);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_interfere() {
        let flights = SingleFlight::new();
        let a = flights.join("a").await;
        let b = flights.join("b").await;
        assert!(matches!(a, FlightRole::Leader(_)));
        assert!(matches!(b, FlightRole::Leader(_)));
        assert_eq!(flights.in_flight(), 2);
    }

    #[tokio::test]
    async fn dropped_leader_releases_followers_even_on_failure() {
        let flights = Arc::new(SingleFlight::new());

        let permit = match flights.join("k").await {
            FlightRole::Leader(permit) => permit,
            _ => panic!("expected leader"),
        };

        let follower = {
            let flights = flights.clone();
            tokio::spawn(async move { flights.join("k").await })
        };

        // Simulate a failed pipeline: the permit is dropped without a put
        drop(permit);

        let role = tokio::time::timeout(Duration::from_secs(1), follower)
            .await
            .expect("follower must not hang")
            .unwrap();
        assert!(matches!(role, FlightRole::Follower));
    }
}
