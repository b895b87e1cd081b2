//! Thread placement onto worker nodes.

use std::collections::BTreeMap;

use compact_str::{
    format_compact,
    CompactString,
};
use smallvec::SmallVec;
use tracing::{
    debug,
    info,
    warn,
};

use crate::{
    batch::{
        Batch,
        BatchId,
        LegKind,
    },
    config::ThreadCosts,
    error::{
        SchedulerError,
        SchedulerResult,
    },
    host::Host,
    inventory::Capacity,
    script_deploy::Operation,
};

/// Threads of one operation started on one node.
#[derive(Clone, Debug, PartialEq)]
pub struct Placement {
    pub node: CompactString,
    pub threads: u32,
    pub pid: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Distribution {
    pub launched: u32,
    pub placements: SmallVec<[Placement; 4]>,
}

/// Packs threads onto nodes, largest free capacity first.
///
/// Works on its own copy of the capacity snapshot and debits it as threads
/// are launched, so consecutive calls within a cycle see what is left.
#[derive(Debug)]
pub struct Dispatcher {
    costs: ThreadCosts,
    pool: Vec<Capacity>,
}

impl Dispatcher {
    pub fn new(
        costs: ThreadCosts,
        pool: Vec<Capacity>,
    ) -> Dispatcher {
        let mut dispatcher = Dispatcher { costs, pool };
        dispatcher.resort();
        dispatcher
    }

    // stable, so equal nodes keep their order
    fn resort(&mut self) {
        self.pool.sort_by(|a, b| b.free.total_cmp(&a.free));
    }

    pub fn pool(&self) -> &[Capacity] {
        &self.pool
    }

    pub fn total_free(&self) -> f64 {
        self.pool.iter().map(|c| c.free).sum()
    }

    /// Launches up to `threads` threads of `op` against `target`. Returns
    /// how many were started, which is never more than requested.
    pub fn distribute(
        &mut self,
        host: &impl Host,
        op: Operation,
        threads: u32,
        delay: f64,
        target: &str,
        tag: &str,
    ) -> Distribution {
        let mut distribution = Distribution::default();
        let cost = self.costs.of(op);
        if threads == 0 || cost <= 0. {
            return distribution;
        }

        self.resort();

        let script = op.script().filename;
        let args = [target.to_owned(), format!("{}", delay), tag.to_owned()];
        let mut remaining = threads;

        for capacity in self.pool.iter_mut() {
            if remaining == 0 {
                break;
            }

            let per_node = (capacity.free / cost).floor() as u32;
            if per_node == 0 {
                continue;
            }

            let count = per_node.min(remaining);
            let pid = match host.launch(script, &capacity.hostname, count, &args) {
                Some(pid) => pid,
                None => {
                    let error = SchedulerError::TransientActionFailure {
                        action: op.as_str(),
                        node: capacity.hostname.to_string(),
                    };
                    warn!(%error, threads = count, "skipping node");
                    continue;
                },
            };

            capacity.free = (capacity.free - count as f64 * cost).max(0.);
            remaining -= count;
            distribution.launched += count;
            distribution.placements.push(Placement {
                node: capacity.hostname.clone(),
                threads: count,
                pid,
            });
        }

        if 0 < remaining {
            debug!(
                op = op.as_str(),
                target,
                requested = threads,
                launched = distribution.launched,
                "ran out of capacity"
            );
        }

        distribution
    }

    /// Launches every leg of `batch` in landing order and records the
    /// result in `registry`.
    pub fn dispatch_batch(
        &mut self,
        host: &impl Host,
        batch: &Batch,
        now: f64,
        registry: &mut BatchRegistry,
    ) -> SchedulerResult<BatchLaunch> {
        let needed = batch.ram_required(&self.costs);
        let available = self.total_free();
        if available < needed {
            return Err(SchedulerError::InsufficientResources { needed, available });
        }

        let mut launch = BatchLaunch {
            id: batch.id,
            requested: 0,
            launched: 0,
            partial: false,
        };
        let mut legs = vec![];

        for leg in batch.legs.iter() {
            let tag = format_compact!("{}-{}", batch.id, leg.kind.as_str());
            let distribution = self.distribute(
                host,
                leg.operation(),
                leg.threads,
                leg.delay,
                &batch.target,
                &tag,
            );

            launch.requested += leg.threads;
            launch.launched += distribution.launched;
            launch.partial |= distribution.launched < leg.threads;

            legs.extend(distribution.placements.into_iter().map(|p| LegHandle {
                kind: leg.kind,
                node: p.node,
                pid: p.pid,
                threads: p.threads,
            }));
        }

        if launch.launched == 0 {
            warn!(
                batch = %batch.id,
                target = %batch.target,
                requested = launch.requested,
                "no batch leg launched"
            );
            return Err(SchedulerError::TransientActionFailure {
                action: "batch launch",
                node: batch.target.to_string(),
            });
        }

        if launch.partial {
            warn!(
                batch = %batch.id,
                target = %batch.target,
                requested = launch.requested,
                launched = launch.launched,
                "batch partially launched"
            );
        }
        else {
            info!(
                batch = %batch.id,
                target = %batch.target,
                threads = launch.launched,
                "batch launched"
            );
        }

        registry.record(batch.id, InFlight {
            target: batch.target.clone(),
            legs,
            lands_at: now + batch.span(),
            partial: launch.partial,
        });

        Ok(launch)
    }
}

/// Outcome of [`Dispatcher::dispatch_batch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchLaunch {
    pub id: BatchId,
    pub requested: u32,
    pub launched: u32,
    pub partial: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LegHandle {
    pub kind: LegKind,
    pub node: CompactString,
    pub pid: u32,
    pub threads: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InFlight {
    pub target: CompactString,
    pub legs: Vec<LegHandle>,
    /// Absolute time the last leg lands.
    pub lands_at: f64,
    pub partial: bool,
}

/// Batches launched but not yet landed.
#[derive(Debug, Default)]
pub struct BatchRegistry {
    batches: BTreeMap<BatchId, InFlight>,
}

impl BatchRegistry {
    pub fn record(
        &mut self,
        id: BatchId,
        in_flight: InFlight,
    ) {
        self.batches.insert(id, in_flight);
    }

    pub fn get(
        &self,
        id: BatchId,
    ) -> Option<&InFlight> {
        self.batches.get(&id)
    }

    /// Drops every batch that has landed by `now`.
    pub fn retire_landed(
        &mut self,
        now: f64,
    ) -> usize {
        let before = self.batches.len();
        self.batches.retain(|_, b| now < b.lands_at);
        before - self.batches.len()
    }

    pub fn in_flight_for(
        &self,
        target: &str,
    ) -> usize {
        self.batches.values().filter(|b| b.target == target).count()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}
