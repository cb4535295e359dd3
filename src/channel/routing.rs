//! Channel selection strategies for a demultiplexer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::channel::ApiChannel;
use crate::config::RoutingKind;

/// Picks one channel from the live set. Must never block.
pub trait RoutingStrategy<C>: Send + Sync {
    fn choose(&self, channels: &[Arc<C>]) -> Option<Arc<C>>;
}

/// Rotates through channels, skipping ones known to be failing.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: ApiChannel> RoutingStrategy<C> for RoundRobin {
    fn choose(&self, channels: &[Arc<C>]) -> Option<Arc<C>> {
        if channels.is_empty() {
            return None;
        }

        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        let len = channels.len();
        (0..len)
            .map(|i| &channels[(start + i) % len])
            .find(|channel| channel.connection().is_available())
            // Every channel failing: still hand one out rather than refuse outright.
            .or_else(|| channels.get(start % len))
            .cloned()
    }
}

/// Picks the available channel with the fewest calls in flight.
#[derive(Debug, Default)]
pub struct LeastInFlight;

impl LeastInFlight {
    pub fn new() -> Self {
        Self
    }
}

impl<C: ApiChannel> RoutingStrategy<C> for LeastInFlight {
    fn choose(&self, channels: &[Arc<C>]) -> Option<Arc<C>> {
        // Ties go to the first channel in the set.
        channels
            .iter()
            .filter(|c| c.connection().is_available())
            .min_by_key(|c| c.connection().in_flight())
            .or_else(|| channels.first())
            .cloned()
    }
}

pub fn strategy_for<C: ApiChannel>(kind: RoutingKind) -> Box<dyn RoutingStrategy<C>> {
    match kind {
        RoutingKind::RoundRobin => Box::new(RoundRobin::new()),
        RoutingKind::LeastInFlight => Box::new(LeastInFlight::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelSettings, ConnectionChannel, RemoteApiChannel};

    fn channel(host: &str) -> Arc<RemoteApiChannel> {
        Arc::new(RemoteApiChannel::new(ConnectionChannel::new(
            "device-management",
            host,
            9000,
            ChannelSettings::default(),
        )))
    }

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let channels = vec![channel("a"), channel("b"), channel("c")];

        let picked: Vec<String> = (0..6)
            .map(|_| lb.choose(&channels).unwrap().host().to_string())
            .collect();
        assert_eq!(picked, vec!["a", "b", "c", "a", "b", "c"]);
        assert!(RoutingStrategy::<RemoteApiChannel>::choose(&lb, &[]).is_none());
    }

    #[test]
    fn test_least_in_flight() {
        let lb = LeastInFlight::new();
        let a = channel("a");
        let b = channel("b");
        let channels = vec![a.clone(), b.clone()];

        let _busy_a = a.connection().track_call();
        assert_eq!(lb.choose(&channels).unwrap().host(), "b");

        let _busy_b1 = b.connection().track_call();
        let _busy_b2 = b.connection().track_call();
        assert_eq!(lb.choose(&channels).unwrap().host(), "a");
    }
}
