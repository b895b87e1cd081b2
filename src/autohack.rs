//! The batch scheduler daemon.
//!
//! Every cycle picks the best targets, prepares the ones that are not ready
//! and fires an HWGW batch at the ones that are. Legs are fire and forget;
//! the registry only remembers when they land.

use std::collections::HashMap;

use clap::Args;
use compact_str::{
    format_compact,
    CompactString,
};
use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    error,
    info,
};

use crate::{
    batch::{
        prep_legs,
        BatchId,
        BatchPlanner,
    },
    config::{
        SchedulerConfig,
        Tunables,
    },
    dispatch::{
        BatchRegistry,
        Dispatcher,
    },
    error::{
        SchedulerError,
        SchedulerResult,
    },
    event_pool::{
        Event,
        EventLoop,
        EventLoopContext,
        EventLoopState,
    },
    host::Host,
    inventory::{
        NodeInventory,
        ROOT,
    },
    netscript::NsWrapper,
    prep::{
        classify,
        correction,
        ReadinessGate,
        TargetState,
    },
    script_deploy::Operation,
    store::{
        feedback_key,
        save_json,
        Document,
        FileStore,
    },
    target::{
        Target,
        TargetSelector,
    },
};

#[derive(Args, Debug, Clone, Default)]
pub struct HackMode {
    /// Only prepare targets, never batch them.
    #[arg(long)]
    pub prep_only: bool,
    /// Number of targets worked at once.
    #[arg(long)]
    pub pool_size: Option<usize>,
    /// Skip targets that still have a batch in flight.
    #[arg(long)]
    pub track: bool,
}

pub async fn auto_hack(
    ns: &NsWrapper<'_>,
    mode: &HackMode,
) {
    let daemon = HackDaemon::new(ns, mode);
    let mut event_loop = EventLoop::new(daemon);
    event_loop.run(ns).await;
}

#[derive(Debug)]
pub enum HackEvent {
    Schedule(f64),
    Refresh(f64),
    LegsLanded(f64, BatchId),
}

impl Event for HackEvent {
    fn trigger_time(&self) -> f64 {
        use HackEvent::*;

        match self {
            Schedule(t) | Refresh(t) | LegsLanded(t, _) => *t,
        }
    }
}

/// Telemetry published for the optimizer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HackFeedback {
    pub preset: String,
    pub batches: u64,
    pub partial_batches: u64,
    pub prep_passes: u64,
    pub skipped: u64,
    pub in_flight: usize,
    pub pool: Vec<String>,
    pub last_update: f64,
}

/// Makes sure every worker script can be written on the current node.
pub fn check_capabilities(host: &impl Host) -> SchedulerResult<()> {
    for op in Operation::ALL {
        let script = op.script();
        if !script.materialize(host) {
            return Err(SchedulerError::CapabilityUnavailable(format!(
                "cannot write {}",
                script.filename
            )));
        }
    }

    Ok(())
}

#[derive(Debug)]
pub struct HackDaemon {
    tunables: Tunables,
    prep_only: bool,
    pool_size: usize,
    config: SchedulerConfig,
    inventory: NodeInventory,
    selector: TargetSelector,
    gate: ReadinessGate,
    planner: BatchPlanner,
    registry: BatchRegistry,
    /// Targets with a preparation pass in flight, and when it lands.
    preparing: HashMap<CompactString, f64>,
    prep_count: u64,
    feedback: HackFeedback,
    stopped: bool,
}

impl HackDaemon {
    pub fn new(
        host: &impl Host,
        mode: &HackMode,
    ) -> HackDaemon {
        let mut tunables = Tunables::load(&FileStore::new(host)).sanitized();
        tunables.track_batches |= mode.track;

        HackDaemon {
            prep_only: mode.prep_only,
            pool_size: mode.pool_size.unwrap_or(tunables.pool_size).max(1),
            config: SchedulerConfig::default(),
            inventory: NodeInventory::new(ROOT, tunables.home_reserve_gb),
            selector: TargetSelector::new(tunables.score_smoothing),
            gate: ReadinessGate::new(tunables.ready_streak),
            planner: BatchPlanner::new(&tunables),
            registry: BatchRegistry::default(),
            preparing: HashMap::new(),
            prep_count: 0,
            feedback: HackFeedback::default(),
            stopped: false,
            tunables,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn feedback(&self) -> &HackFeedback {
        &self.feedback
    }

    pub fn registry(&self) -> &BatchRegistry {
        &self.registry
    }

    /// `redeploy` overwrites worker copies left by an older build.
    fn refresh_network(
        &mut self,
        host: &impl Host,
        redeploy: bool,
    ) {
        self.inventory.refresh(host);
        self.inventory.unlock_all(host);
        let deployed = self.inventory.deploy_workers(host, redeploy);
        debug!(deployed, redeploy, "workers deployed");
    }

    fn prepare(
        &mut self,
        host: &impl Host,
        dispatcher: &mut Dispatcher,
        target: &Target,
        state: TargetState,
        now: f64,
    ) {
        if self.preparing.contains_key(&target.hostname) {
            return;
        }

        let fix = correction(host, target, state, &self.tunables);
        if fix.is_empty() {
            return;
        }

        self.prep_count += 1;
        let legs = prep_legs(
            &target.durations,
            fix.grow,
            fix.weaken,
            self.tunables.step_ms,
        );

        let mut launched = 0;
        let mut lands_at = now;
        for leg in legs.iter() {
            let tag = format_compact!("prep{}-{}", self.prep_count, leg.kind.as_str());
            let distribution = dispatcher.distribute(
                host,
                leg.operation(),
                leg.threads,
                leg.delay,
                &target.hostname,
                &tag,
            );

            if 0 < distribution.launched {
                launched += distribution.launched;
                lands_at = lands_at.max(now + leg.lands_after());
            }
        }

        if launched == 0 {
            return;
        }

        info!(
            target = %target.hostname,
            state = ?state,
            grow = fix.grow,
            weaken = fix.weaken,
            launched,
            "preparing target"
        );

        self.feedback.prep_passes += 1;
        self.preparing.insert(target.hostname.clone(), lands_at);
    }

    fn batch(
        &mut self,
        host: &impl Host,
        dispatcher: &mut Dispatcher,
        target: &Target,
        now: f64,
        ctx: &mut EventLoopContext<HackEvent>,
    ) {
        if self.tunables.track_batches &&
            0 < self.registry.in_flight_for(&target.hostname)
        {
            return;
        }

        let batch = self.planner.plan(host, target, &self.config);

        match dispatcher.dispatch_batch(host, &batch, now, &mut self.registry) {
            Ok(launch) => {
                self.feedback.batches += 1;
                if launch.partial {
                    self.feedback.partial_batches += 1;
                }

                ctx.add_event(HackEvent::LegsLanded(
                    now + batch.span() + ctx.get_grace_period(),
                    batch.id,
                ));
            },

            Err(error) => {
                self.feedback.skipped += 1;
                info!(%error, target = %target.hostname, "batch skipped");
            },
        }
    }

    /// One scheduling pass.
    pub fn run_cycle(
        &mut self,
        host: &impl Host,
        ctx: &mut EventLoopContext<HackEvent>,
    ) {
        let now = ctx.now();
        let store = FileStore::new(host);

        self.config = SchedulerConfig::load(&store).sanitized();
        self.registry.retire_landed(now);
        self.preparing.retain(|_, lands_at| now < *lands_at);

        self.inventory.refresh(host);
        let pool = self.selector.select_pool(
            host,
            self.inventory.machines(),
            self.inventory.root(),
            &self.config,
            &self.tunables,
            self.pool_size,
        );

        let mut dispatcher = Dispatcher::new(
            self.tunables.thread_costs,
            self.inventory.available_capacity(),
        );

        for target in pool.iter() {
            let state = self
                .gate
                .admit(&target.hostname, classify(target, &self.config));

            match state {
                TargetState::NeedsWeaken | TargetState::NeedsGrow => {
                    self.prepare(host, &mut dispatcher, target, state, now)
                },
                TargetState::Ready if self.prep_only => {},
                TargetState::Ready => {
                    self.batch(host, &mut dispatcher, target, now, ctx)
                },
            }
        }

        self.feedback.preset = self.config.preset_name.clone();
        self.feedback.in_flight = self.registry.len();
        self.feedback.pool = pool.iter().map(|t| t.hostname.to_string()).collect();
        self.feedback.last_update = now;
        save_json(&store, &feedback_key("hack"), &self.feedback);
    }
}

impl<H> EventLoopState<H> for HackDaemon
where
    H: Host,
{
    type Event = HackEvent;

    fn initial_run(
        &mut self,
        host: &H,
        ctx: &mut EventLoopContext<HackEvent>,
    ) {
        if let Err(error) = check_capabilities(host) {
            error!(%error, "scheduler cannot start");
            self.stopped = true;
            return;
        }

        self.refresh_network(host, true);
        info!(
            nodes = self.inventory.machines().len(),
            pool_size = self.pool_size,
            prep_only = self.prep_only,
            tracking = self.tunables.track_batches,
            "scheduler started"
        );

        let now = ctx.now();
        ctx.add_event(HackEvent::Schedule(now));
        ctx.add_event(HackEvent::Refresh(now + self.tunables.refresh_interval_ms));
    }

    fn on_event(
        &mut self,
        host: &H,
        event: HackEvent,
        ctx: &mut EventLoopContext<HackEvent>,
    ) {
        use HackEvent::*;

        match event {
            Schedule(_) => {
                self.run_cycle(host, ctx);
                ctx.add_event(Schedule(
                    ctx.now() + self.config.inter_batch_delay_ms as f64,
                ));
            },

            Refresh(_) => {
                self.refresh_network(host, false);
                ctx.add_event(Refresh(ctx.now() + self.tunables.refresh_interval_ms));
            },

            LegsLanded(_, id) => {
                let retired = self.registry.retire_landed(ctx.now());
                debug!(batch = %id, retired, "legs landed");
            },
        }
    }

    fn on_event_fail(
        &mut self,
        host: &H,
        event: HackEvent,
        ctx: &mut EventLoopContext<HackEvent>,
    ) {
        use HackEvent::*;

        match event {
            // a late cycle is dropped rather than run in a burst
            Schedule(due) => {
                debug!(late_by = ctx.now() - due, "scheduling cycle skipped");
                ctx.add_event(Schedule(
                    ctx.now() + self.config.inter_batch_delay_ms as f64,
                ));
            },
            other => self.on_event(host, other, ctx),
        }
    }

    fn should_stop(&self) -> bool {
        self.stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event_pool::Stepped,
        host::Durations,
        store::{
            load_json,
            StateStore,
        },
        testing::FakeHost,
    };

    fn network() -> FakeHost {
        let host = FakeHost::new();
        host.add_node("home", &[], |s| {
            s.has_root = true;
            s.max_ram = 8.;
        });
        host.add_worker("pserv-0", 4096.);
        host
    }

    fn started(
        host: &FakeHost,
        mode: HackMode,
    ) -> EventLoop<FakeHost, HackDaemon> {
        let mut event_loop = EventLoop::new(HackDaemon::new(host, &mode));
        event_loop.start(host);
        event_loop
    }

    fn ops(host: &FakeHost) -> Vec<Operation> {
        host.launches().iter().filter_map(|l| l.operation()).collect()
    }

    #[test]
    fn unwritable_workers_stop_the_daemon() {
        let host = network();
        host.read_only.set(true);

        let event_loop = started(&host, HackMode::default());

        assert!(event_loop.state().is_stopped());
        assert_eq!(event_loop.pending(), 0);
    }

    #[test]
    fn prepared_target_gets_a_batch() {
        let host = network();
        host.add_target("joesguns", 1e6, 1e6, 10., 10.);
        let mut event_loop = started(&host, HackMode::default());

        assert_eq!(event_loop.step(&host, host.now()), Stepped::Handled);

        assert_eq!(ops(&host), [
            Operation::Hack,
            Operation::Weaken,
            Operation::Grow,
            Operation::Weaken
        ]);
        assert!(host.launches().iter().all(|l| l.node == "pserv-0"));
        assert_eq!(event_loop.state().feedback().batches, 1);

        let store = FileStore::new(&host);
        let feedback: HackFeedback = load_json(&store, &feedback_key("hack"));
        assert_eq!(feedback.batches, 1);
        assert_eq!(feedback.pool, ["joesguns"]);
        assert_eq!(feedback.preset, "balanced");
    }

    #[test]
    fn insecure_target_is_weakened_once_per_pass() {
        let host = network();
        host.add_target("joesguns", 1e6, 1e6, 10., 30.);
        let mut event_loop = started(&host, HackMode::default());
        let now = host.now();

        event_loop.step(&host, now);
        assert_eq!(ops(&host), [Operation::Weaken]);
        assert_eq!(
            host.launches()[0].threads,
            crate::prep::weaken_threads_for(&host, 20.)
        );

        // the next cycle sees the pass in flight
        event_loop.step(&host, now + 200.);
        assert_eq!(host.launches().len(), 1);
        assert_eq!(event_loop.state().feedback().prep_passes, 1);
    }

    #[test]
    fn prep_only_leaves_ready_targets_alone() {
        let host = network();
        host.add_target("joesguns", 1e6, 1e6, 10., 10.);
        let mut event_loop = started(&host, HackMode {
            prep_only: true,
            ..HackMode::default()
        });

        event_loop.step(&host, host.now());

        assert!(host.launches().is_empty());
    }

    #[test]
    fn tracking_waits_for_landing() {
        let host = network();
        host.add_target("joesguns", 1e6, 1e6, 10., 10.);
        let mut event_loop = started(&host, HackMode {
            track: true,
            ..HackMode::default()
        });
        let now = host.now();

        event_loop.step(&host, now);
        event_loop.step(&host, now + 200.);

        assert_eq!(host.launches().len(), 4);
        assert_eq!(event_loop.state().registry().in_flight_for("joesguns"), 1);
    }

    #[test]
    fn untracked_batches_pipeline() {
        let host = network();
        host.add_target("joesguns", 1e6, 1e6, 10., 10.);
        let mut event_loop = started(&host, HackMode::default());
        let now = host.now();

        event_loop.step(&host, now);
        event_loop.step(&host, now + 200.);

        assert_eq!(host.launches().len(), 8);
        assert_eq!(event_loop.state().feedback().batches, 2);
    }

    #[test]
    fn leg_args_carry_target_delay_and_tag() {
        let host = network();
        host.add_target("joesguns", 1e6, 1e6, 10., 10.);
        host.set_durations("joesguns", Durations {
            hack: 2000.,
            grow: 6400.,
            weaken: 8000.,
        });
        let mut event_loop = started(&host, HackMode::default());

        event_loop.step(&host, host.now());

        let args = host
            .launches()
            .into_iter()
            .map(|l| l.args)
            .collect::<Vec<_>>();
        assert_eq!(args, [
            ["joesguns", "5880", "b1-hack"],
            ["joesguns", "0", "b1-weaken1"],
            ["joesguns", "1640", "b1-grow"],
            ["joesguns", "80", "b1-weaken2"],
        ]);
    }

    #[test]
    fn short_pool_skips_and_counts() {
        let host = FakeHost::new();
        host.add_node("home", &[], |s| {
            s.has_root = true;
            s.max_ram = 16.;
        });
        host.add_target("joesguns", 1e6, 1e6, 10., 10.);
        let mut event_loop = started(&host, HackMode::default());

        event_loop.step(&host, host.now());

        assert!(host.launches().is_empty());
        assert_eq!(event_loop.state().feedback().skipped, 1);
    }

    #[test]
    fn controller_config_is_picked_up_next_cycle() {
        let host = network();
        host.add_target("joesguns", 1e6, 1e6, 10., 10.);
        let store = FileStore::new(&host);
        let mut event_loop = started(&host, HackMode::default());

        let mut config = SchedulerConfig::default();
        config.hack_fraction = 0.25;
        config.preset_name = "conservative".to_owned();
        config.save(&store);

        event_loop.step(&host, host.now());

        assert_eq!(host.launches()[0].threads, 125);
        assert!(store.get(&feedback_key("hack")).unwrap().contains("conservative"));
    }

    #[test]
    fn failed_batch_is_skipped_not_tracked() {
        let host = network();
        host.add_target("joesguns", 1e6, 1e6, 10., 10.);
        host.fail_launches_on("home");
        host.fail_launches_on("pserv-0");
        let mut event_loop = started(&host, HackMode {
            track: true,
            ..HackMode::default()
        });
        let now = host.now();

        event_loop.step(&host, now);
        event_loop.step(&host, now + 200.);

        let feedback = event_loop.state().feedback();
        assert!(host.launches().is_empty());
        assert_eq!(feedback.batches, 0);
        assert_eq!(feedback.skipped, 2);
        assert_eq!(event_loop.state().registry().in_flight_for("joesguns"), 0);
    }

    #[test]
    fn zero_refresh_interval_still_yields() {
        let host = network();
        Tunables {
            refresh_interval_ms: 0.,
            ..Tunables::default()
        }
        .save(&FileStore::new(&host));
        let mut event_loop = started(&host, HackMode::default());
        let now = host.now();

        let handled = (0..10)
            .filter(|_| event_loop.step(&host, now) == Stepped::Handled)
            .count();

        assert_eq!(handled, 1);
        assert_eq!(event_loop.step(&host, now), Stepped::NotYet);
    }
}
