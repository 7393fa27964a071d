//! Component E — the accept-path load balancer (§4.5).
//!
//! Holds a fixed, up-front set of loops and picks the one with the fewest
//! currently-registered channel references, breaking ties by the order
//! loops were added. Spreading work this way — rather than round-robin —
//! keeps a fleet balanced even when some connections live much longer
//! than others.
use std::sync::Arc;

use crate::error::NetError;
use crate::reactor::{ChannelConfig, LoopConfig, LoopHandle, LoopWorker};

/// Fleet sizing knobs for [`LoopBalancer::spawn_fleet`] (§4.8).
#[derive(Debug, Clone)]
pub struct BalancerConfig {
    pub loop_count: usize,
    pub loop_config: LoopConfig,
    pub channel_config: ChannelConfig,
}

impl Default for BalancerConfig {
    fn default() -> BalancerConfig {
        BalancerConfig {
            loop_count: 4,
            loop_config: LoopConfig::default(),
            channel_config: ChannelConfig::default(),
        }
    }
}

struct Shared {
    members: Vec<LoopHandle>,
}

/// A cloneable, `Send + Sync` handle to a fixed fleet of loops (§4.5).
/// Built once, from a set of [`LoopHandle`]s, and then handed to every
/// listening [`crate::reactor::Loop`] that should spray its accepted
/// children across the fleet via
/// [`Loop::set_balancer`](crate::reactor::Loop::set_balancer).
#[derive(Clone)]
pub struct LoopBalancer(Arc<Shared>);

impl LoopBalancer {
    /// Builds a balancer over `members`, in the order they should be
    /// favored on a tie. Panics if `members` is empty — a balancer with
    /// nothing to balance across is a construction bug, not a runtime
    /// condition.
    pub fn new(members: Vec<LoopHandle>) -> LoopBalancer {
        assert!(!members.is_empty(), "LoopBalancer needs at least one member");
        LoopBalancer(Arc::new(Shared { members }))
    }

    /// Spawns `config.loop_count` loops as background workers to serve as
    /// accept targets, and returns the balancer over them alongside the
    /// workers (dropping a worker stops it; keep them alive for as long
    /// as the fleet should run). The caller's own listening loop attaches
    /// the returned balancer via
    /// [`Loop::set_balancer`](crate::reactor::Loop::set_balancer) before
    /// it starts running.
    pub fn spawn_fleet(config: BalancerConfig) -> Result<(LoopBalancer, Vec<LoopWorker>), NetError> {
        let mut loop_config = config.loop_config;
        loop_config.channel = config.channel_config;
        let workers: Vec<LoopWorker> = (0..config.loop_count)
            .map(|i| LoopWorker::spawn_named(&format!("netloop-worker-{i}"), loop_config.clone()))
            .collect::<Result<_, _>>()?;
        let balancer = LoopBalancer::new(workers.iter().map(LoopWorker::handle).collect());
        Ok((balancer, workers))
    }

    pub fn len(&self) -> usize {
        self.0.members.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Picks the loop with the fewest registered channel references,
    /// breaking ties by the order loops were added (§4.5).
    pub fn choose(&self) -> LoopHandle {
        self.0
            .members
            .iter()
            .min_by_key(|h| h.channel_count())
            .expect("LoopBalancer is never empty")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::{Loop, LoopConfig};

    #[test]
    fn picks_least_loaded_member() {
        let mut loops: Vec<Loop> = (0..3)
            .map(|_| Loop::new(LoopConfig::default()).unwrap())
            .collect();
        let handles: Vec<LoopHandle> = loops.iter().map(|l| l.handle()).collect();
        let balancer = LoopBalancer::new(handles.clone());

        assert!(balancer.choose().ptr_eq(&handles[0]));

        let callback: crate::callback::Callback = Arc::new(|_r, _e| {});
        loops[1].listen("127.0.0.1", 0, callback).unwrap();
        assert!(balancer.choose().ptr_eq(&handles[0]));

        let callback2: crate::callback::Callback = Arc::new(|_r, _e| {});
        loops[0].listen("127.0.0.1", 0, callback2).unwrap();
        let callback3: crate::callback::Callback = Arc::new(|_r, _e| {});
        loops[0].listen("127.0.0.1", 0, callback3).unwrap();
        assert!(balancer.choose().ptr_eq(&handles[2]));
    }
}
