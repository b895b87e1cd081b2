//! HWGW batch planning.
//!
//! A batch is four legs aimed at one prepared target. Each leg sleeps for its
//! delay, then runs for its duration. Landings are spaced `step` apart in the
//! order hack, weaken, grow, weaken, so that each weaken lands right after the
//! leg whose security it cancels.

use std::fmt;

use compact_str::CompactString;
use smallvec::{
    smallvec,
    SmallVec,
};
use tracing::{
    debug,
    warn,
};

use crate::{
    config::{
        SchedulerConfig,
        ThreadCosts,
        Tunables,
    },
    host::{
        Durations,
        Host,
    },
    prep::weaken_threads_for,
    script_deploy::Operation,
    target::Target,
    utils::to_threads,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Position of a leg in the landing order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LegKind {
    Hack,
    Weaken1,
    Grow,
    Weaken2,
}

impl LegKind {
    pub const LANDING_ORDER: [LegKind; 4] =
        [LegKind::Hack, LegKind::Weaken1, LegKind::Grow, LegKind::Weaken2];

    pub fn operation(&self) -> Operation {
        use LegKind::*;

        match self {
            Hack => Operation::Hack,
            Weaken1 | Weaken2 => Operation::Weaken,
            Grow => Operation::Grow,
        }
    }

    pub fn as_str(&self) -> &'static str {
        use LegKind::*;

        match self {
            Hack => "hack",
            Weaken1 => "weaken1",
            Grow => "grow",
            Weaken2 => "weaken2",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Leg {
    pub kind: LegKind,
    pub threads: u32,
    /// Sleep before the operation starts, in milliseconds.
    pub delay: f64,
    pub duration: f64,
}

impl Leg {
    pub fn operation(&self) -> Operation {
        self.kind.operation()
    }

    /// Landing time relative to dispatch.
    pub fn lands_after(&self) -> f64 {
        self.delay + self.duration
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimingSource {
    /// Formulas at minimum security and maximum money.
    Exact,
    /// Live estimators at the current target state.
    Estimated,
}

/// Start delays for the four legs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Delays {
    pub hack: f64,
    pub weaken1: f64,
    pub grow: f64,
    pub weaken2: f64,
    /// A delay was clamped to zero, moving its landing.
    pub clamped: bool,
}

impl Delays {
    fn of(
        &self,
        kind: LegKind,
    ) -> f64 {
        use LegKind::*;

        match kind {
            Hack => self.hack,
            Weaken1 => self.weaken1,
            Grow => self.grow,
            Weaken2 => self.weaken2,
        }
    }
}

/// Delays that land H at `W - 3s`, W1 at `W`, G at `W + s` and W2 at
/// `W + 2s`, where `W` is the weaken duration and `s` the step.
pub fn delays(
    durations: &Durations,
    step: f64,
) -> Delays {
    let raw = [
        durations.weaken - durations.hack - 3. * step,
        0.,
        durations.weaken - durations.grow + step,
        2. * step,
    ];

    Delays {
        hack: raw[0].max(0.),
        weaken1: raw[1].max(0.),
        grow: raw[2].max(0.),
        weaken2: raw[3].max(0.),
        clamped: raw.iter().any(|d| *d < 0. || !d.is_finite()),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    pub id: BatchId,
    pub target: CompactString,
    pub hack_amount: f64,
    pub grow_multiplier: f64,
    /// In landing order.
    pub legs: SmallVec<[Leg; 4]>,
    pub timing: TimingSource,
    pub ordering_degraded: bool,
}

impl Batch {
    pub fn leg(
        &self,
        kind: LegKind,
    ) -> Option<&Leg> {
        self.legs.iter().find(|l| l.kind == kind)
    }

    pub fn threads(&self) -> u32 {
        self.legs.iter().map(|l| l.threads).sum()
    }

    /// Total GB needed to launch every leg.
    pub fn ram_required(
        &self,
        costs: &ThreadCosts,
    ) -> f64 {
        self.legs
            .iter()
            .map(|l| l.threads as f64 * costs.of(l.operation()))
            .sum()
    }

    /// Time from dispatch until the last leg lands.
    pub fn span(&self) -> f64 {
        self.legs
            .iter()
            .map(|l| l.lands_after())
            .fold(0., f64::max)
    }
}

/// Turns a prepared target and the current configuration into a batch.
#[derive(Debug)]
pub struct BatchPlanner {
    next_id: u64,
    step: f64,
    prefer_exact: bool,
}

impl BatchPlanner {
    pub fn new(tunables: &Tunables) -> BatchPlanner {
        BatchPlanner {
            next_id: 0,
            step: tunables.step_ms.max(0.),
            prefer_exact: tunables.prefer_exact_timing,
        }
    }

    fn timing(
        &self,
        host: &impl Host,
        target: &Target,
    ) -> (Durations, TimingSource) {
        if self.prefer_exact {
            if let Some(exact) = host.exact_durations(&target.hostname) {
                return (exact, TimingSource::Exact);
            }
        }

        (target.durations, TimingSource::Estimated)
    }

    pub fn plan(
        &mut self,
        host: &impl Host,
        target: &Target,
        config: &SchedulerConfig,
    ) -> Batch {
        let name = target.hostname.as_str();
        let fraction = config.hack_fraction;

        let hack_amount = target.max_money * fraction;
        let hack =
            to_threads(host.hack_threads_for(name, hack_amount).floor()).max(1);
        let weaken1 = weaken_threads_for(
            host,
            Operation::Hack.security_effect(host, name, hack),
        );

        let grow_multiplier = 1. / (1. - fraction);
        let grow = to_threads(host.grow_threads_for(name, grow_multiplier).ceil());
        let weaken2 = weaken_threads_for(
            host,
            Operation::Grow.security_effect(host, name, grow),
        );

        let (durations, timing) = self.timing(host, target);
        let delays = delays(&durations, self.step);

        let threads = [hack, weaken1, grow, weaken2];
        let legs: SmallVec<[Leg; 4]> = LegKind::LANDING_ORDER
            .iter()
            .zip(threads)
            .map(|(kind, threads)| Leg {
                kind: *kind,
                threads,
                delay: delays.of(*kind),
                duration: match kind.operation() {
                    Operation::Hack => durations.hack,
                    Operation::Grow => durations.grow,
                    Operation::Weaken => durations.weaken,
                },
            })
            .collect();

        self.next_id += 1;
        let batch = Batch {
            id: BatchId(self.next_id),
            target: target.hostname.clone(),
            hack_amount,
            grow_multiplier,
            legs,
            timing,
            ordering_degraded: delays.clamped,
        };

        if batch.ordering_degraded {
            warn!(
                batch = %batch.id,
                target = name,
                "delay clamped, landing order not guaranteed"
            );
        }

        debug!(
            batch = %batch.id,
            target = name,
            hack, weaken1, grow, weaken2,
            timing = ?timing,
            "batch planned"
        );

        batch
    }
}

/// Single-leg plan used while preparing a target.
pub fn prep_legs(
    durations: &Durations,
    grow: u32,
    weaken: u32,
    step: f64,
) -> SmallVec<[Leg; 4]> {
    let step = step.max(0.);
    let mut legs = smallvec![];

    if 0 < grow {
        legs.push(Leg {
            kind: LegKind::Grow,
            threads: grow,
            // land just before the weaken that cancels it
            delay: (durations.weaken - durations.grow - step).max(0.),
            duration: durations.grow,
        });
    }

    if 0 < weaken {
        legs.push(Leg {
            kind: LegKind::Weaken2,
            threads: weaken,
            delay: 0.,
            duration: durations.weaken,
        });
    }

    legs
}
