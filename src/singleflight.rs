//! Collapses concurrent loads of the same key into a single computation.
//!
//! When a cold key is requested by many clients at once, only the first caller
//! (the "leader") actually performs the expensive load. Everyone else arriving
//! while that load is in flight (the "joiners") simply waits and receives the
//! leader's outcome. Once the leader finishes, its registration is removed, so a
//! later call for the same key starts a fresh computation.
//!
//! Outcomes are broadcast to joiners. Because [anyhow::Error] is not clonable,
//! errors travel wrapped in an [Arc]; the [group](crate::group) layer unwraps
//! them at its public boundary.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

/// The shared result of one in-flight computation.
pub type Outcome<T> = Result<T, Arc<anyhow::Error>>;

type FlightMap<T> = Mutex<HashMap<String, broadcast::Sender<Outcome<T>>>>;

/// A per-key barrier deduplicating concurrent computations.
///
/// # Examples
/// ```
/// # use callisto::singleflight::Singleflight;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let flights: Singleflight<String> = Singleflight::default();
///
/// let value = flights
///     .execute("answer", || async { Ok("42".to_owned()) })
///     .await
///     .unwrap();
/// assert_eq!(value, "42");
/// # }
/// ```
pub struct Singleflight<T: Clone> {
    flights: FlightMap<T>,
}

impl<T: Clone> Default for Singleflight<T> {
    fn default() -> Self {
        Singleflight {
            flights: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> Singleflight<T> {
    /// Runs `task` for the given key, unless a task for that key is already in
    /// flight - in that case the running task's outcome is awaited and shared.
    ///
    /// The internal lock is only held to register, discover or remove a flight,
    /// never while `task` runs. Therefore `task` may block or perform I/O for as
    /// long as it needs to.
    pub async fn execute<F, Fut>(&self, key: &str, task: F) -> Outcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let role = {
            let mut flights = self.flights.lock().unwrap();
            match flights.get(key) {
                Some(sender) => Err(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    let _ = flights.insert(key.to_owned(), sender.clone());
                    Ok(sender)
                }
            }
        };

        match role {
            // Joiner: wait for the leader to publish its outcome. A closed
            // channel means the leader was dropped mid-flight.
            Err(mut receiver) => match receiver.recv().await {
                Ok(outcome) => outcome,
                Err(_) => Err(Arc::new(anyhow::anyhow!(
                    "the in-flight load for this key was aborted"
                ))),
            },

            // Leader: run the task, deregister the flight, then publish.
            Ok(sender) => {
                let registration = Registration {
                    flights: &self.flights,
                    key,
                };

                let outcome = task().await.map_err(Arc::new);

                // Removing the registration before publishing guarantees that a
                // caller arriving now starts a fresh flight instead of receiving
                // this (already completed) outcome.
                drop(registration);
                let _ = sender.send(outcome.clone());

                outcome
            }
        }
    }
}

/// Removes a flight from the registry on drop.
///
/// Dropping the registration (and with it the only sender) on an unwind closes
/// the channel, which releases all joiners instead of leaving them waiting
/// forever.
struct Registration<'a, T: Clone> {
    flights: &'a FlightMap<T>,
    key: &'a str,
}

impl<T: Clone> Drop for Registration<'_, T> {
    fn drop(&mut self) {
        let _ = self.flights.lock().unwrap().remove(self.key);
    }
}
