//! The controller daemon.
//!
//! Samples player income at a fixed interval, feeds it to the
//! [`AdaptiveController`] and publishes whatever preset it settles on.

use clap::Args;
use itertools::Itertools;
use tracing::{
    debug,
    info,
};

use crate::{
    autohack::HackFeedback,
    config::{
        Preset,
        SchedulerConfig,
        Tunables,
    },
    controller::{
        AdaptiveController,
        ControllerSettings,
        ControllerSnapshot,
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
    store::{
        feedback_key,
        load_json,
        AggregateStats,
        Coordination,
        Document,
        FileStore,
        GamePhase,
    },
    target::TargetSelector,
};

pub const OBSERVE_INTERVAL_MS: f64 = 10_000.;

#[derive(Args, Debug, Clone, Default)]
pub struct OptimizeMode {
    /// Seconds between income samples.
    #[arg(long)]
    pub interval: Option<f64>,
    /// Preset to start on, overriding the saved one.
    #[arg(long)]
    pub preset: Option<String>,
}

pub async fn optimize(
    ns: &NsWrapper<'_>,
    mode: &OptimizeMode,
) {
    let daemon = OptimizerDaemon::new(ns, mode);
    let mut event_loop = EventLoop::new(daemon);
    event_loop.run(ns).await;
}

#[derive(Debug)]
pub enum OptimizeEvent {
    Observe(f64),
}

impl Event for OptimizeEvent {
    fn trigger_time(&self) -> f64 {
        match self {
            OptimizeEvent::Observe(t) => *t,
        }
    }
}

#[derive(Debug)]
pub struct OptimizerDaemon {
    controller: AdaptiveController,
    tunables: Tunables,
    inventory: NodeInventory,
    selector: TargetSelector,
    interval_ms: f64,
    /// Time and player money at the previous sample.
    last: (f64, f64),
    phase: Option<GamePhase>,
}

impl OptimizerDaemon {
    pub fn new(
        host: &impl Host,
        mode: &OptimizeMode,
    ) -> OptimizerDaemon {
        let store = FileStore::new(host);
        let tunables = Tunables::load(&store).sanitized();
        let mut snapshot = ControllerSnapshot::load(&store);

        let initial = match &mode.preset {
            Some(preset) => preset.clone(),
            None if !snapshot.active.is_empty() => snapshot.active.clone(),
            None => SchedulerConfig::load(&store).preset_name,
        };
        snapshot.active = initial.clone();

        let mut controller = AdaptiveController::new(
            ControllerSettings::default(),
            Preset::ladder(),
            &initial,
            host.now().to_bits(),
        );
        controller.restore(snapshot);

        let interval_ms = mode
            .interval
            .filter(|s| s.is_finite() && 0. < *s)
            .map(|s| s * 1000.)
            .unwrap_or(OBSERVE_INTERVAL_MS);

        OptimizerDaemon {
            controller,
            inventory: NodeInventory::new(ROOT, tunables.home_reserve_gb),
            selector: TargetSelector::new(tunables.score_smoothing),
            tunables,
            interval_ms,
            last: (host.now(), host.player_money()),
            phase: None,
        }
    }

    pub fn controller(&self) -> &AdaptiveController {
        &self.controller
    }

    pub fn selector(&self) -> &TargetSelector {
        &self.selector
    }

    /// Income since the previous sample, per second.
    fn sample(
        &mut self,
        host: &impl Host,
        now: f64,
    ) -> Option<f64> {
        let money = host.player_money();
        let (then, before) = std::mem::replace(&mut self.last, (now, money));

        let elapsed = (now - then) / 1000.;
        (0. < elapsed).then(|| (money - before) / elapsed)
    }

    /// Keeps the smoothed target scores current.
    fn rank_targets(
        &mut self,
        host: &impl Host,
        config: &SchedulerConfig,
    ) {
        self.inventory.refresh(host);
        let ranked = self.selector.select_pool(
            host,
            self.inventory.machines(),
            self.inventory.root(),
            config,
            &self.tunables,
            usize::MAX,
        );

        debug!(
            ranked = ranked.len(),
            top = %self
                .selector
                .leaderboard(5)
                .iter()
                .map(|(name, score)| format!("{}={:.1}", name, score))
                .join(", "),
            "target leaderboard"
        );
    }

    fn coordinate(
        &mut self,
        host: &impl Host,
        income: f64,
        now: f64,
    ) {
        let store = FileStore::new(host);
        let money = host.player_money();
        let level = host.player_level();
        let phase = GamePhase::detect(money, level);

        if self.phase != Some(phase) {
            info!(?phase, priority = ?phase.priority(), "game phase");
            self.phase = Some(phase);
        }

        Coordination {
            phase,
            priority: phase.priority(),
            stats: AggregateStats {
                income,
                hacking_level: level,
                net_worth: money,
            },
            last_update: now,
        }
        .save(&store);
    }

    pub fn observe(
        &mut self,
        host: &impl Host,
        now: f64,
    ) {
        let income = match self.sample(host, now) {
            Some(income) => income,
            None => return,
        };

        let store = FileStore::new(host);
        let adjustment = self.controller.observe(income);
        let config = self.controller.publish(&store, now);
        self.controller.persist(&store);

        self.rank_targets(host, &config);
        self.coordinate(host, income, now);

        let feedback: HackFeedback = load_json(&store, &feedback_key("hack"));
        info!(
            income = format_args!("{:.0}/s", income),
            preset = %config.preset_name,
            ?adjustment,
            batches = feedback.batches,
            partial = feedback.partial_batches,
            skipped = feedback.skipped,
            in_flight = feedback.in_flight,
            "observed"
        );
    }
}

impl<H> EventLoopState<H> for OptimizerDaemon
where
    H: Host,
{
    type Event = OptimizeEvent;

    fn initial_run(
        &mut self,
        host: &H,
        ctx: &mut EventLoopContext<OptimizeEvent>,
    ) {
        let now = ctx.now();
        let config = self.controller.publish(&FileStore::new(host), now);
        info!(
            preset = %config.preset_name,
            observations = self.controller.observations(),
            interval_ms = self.interval_ms,
            "optimizer started"
        );

        ctx.add_event(OptimizeEvent::Observe(now + self.interval_ms));
    }

    fn on_event(
        &mut self,
        host: &H,
        event: OptimizeEvent,
        ctx: &mut EventLoopContext<OptimizeEvent>,
    ) {
        match event {
            OptimizeEvent::Observe(_) => {
                self.observe(host, ctx.now());
                ctx.add_event(OptimizeEvent::Observe(ctx.now() + self.interval_ms));
            },
        }
    }

    // income is measured over the real elapsed time, so a late sample is
    // still valid
    fn on_event_fail(
        &mut self,
        host: &H,
        event: OptimizeEvent,
        ctx: &mut EventLoopContext<OptimizeEvent>,
    ) {
        self.on_event(host, event, ctx)
    }
}
