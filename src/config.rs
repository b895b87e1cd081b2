//! Scheduler configuration and tunables.
//!
//! [`SchedulerConfig`] is the small record the optimizer writes and the
//! scheduler reads every cycle. [`Tunables`] holds the heuristic constants;
//! they are read once when a daemon starts.

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    script_deploy::Operation,
    store::Document,
};

/// Aggressiveness parameters shared between daemons.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// Fraction of a target's maximum money taken by one batch.
    pub hack_fraction: f64,
    /// Security above the minimum that still counts as prepared.
    pub security_tolerance: f64,
    /// Fraction of maximum money that still counts as prepared.
    pub money_tolerance: f64,
    pub inter_batch_delay_ms: u64,
    pub preset_name: String,
    pub written_at: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Preset::BALANCED.to_config(0.)
    }
}

impl SchedulerConfig {
    /// Clamps values written by another process into usable ranges.
    pub fn sanitized(mut self) -> Self {
        let fallback = SchedulerConfig::default();

        if !(self.hack_fraction > 0. && self.hack_fraction < 1.) {
            self.hack_fraction = fallback.hack_fraction;
        }
        if !(self.security_tolerance.is_finite() && 0. <= self.security_tolerance)
        {
            self.security_tolerance = fallback.security_tolerance;
        }
        if !(self.money_tolerance > 0. && self.money_tolerance <= 1.) {
            self.money_tolerance = fallback.money_tolerance;
        }
        if self.inter_batch_delay_ms == 0 {
            self.inter_batch_delay_ms = fallback.inter_batch_delay_ms;
        }

        self
    }
}

impl Document for SchedulerConfig {
    const KEY: &'static str = "optimizer-config";
}

/// A named bundle of aggressiveness parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub name: String,
    pub hack_fraction: f64,
    pub security_tolerance: f64,
    pub money_tolerance: f64,
}

/// `Preset` with a static name, usable in constants.
pub struct PresetDef {
    pub name: &'static str,
    pub hack_fraction: f64,
    pub security_tolerance: f64,
    pub money_tolerance: f64,
}

impl Preset {
    pub const CONSERVATIVE: PresetDef = PresetDef {
        name: "conservative",
        hack_fraction: 0.25,
        security_tolerance: 2.,
        money_tolerance: 0.9,
    };
    pub const BALANCED: PresetDef = PresetDef {
        name: "balanced",
        hack_fraction: 0.5,
        security_tolerance: 5.,
        money_tolerance: 0.75,
    };
    pub const AGGRESSIVE: PresetDef = PresetDef {
        name: "aggressive",
        hack_fraction: 0.7,
        security_tolerance: 8.,
        money_tolerance: 0.6,
    };
    pub const EXTREME: PresetDef = PresetDef {
        name: "extreme",
        hack_fraction: 0.9,
        security_tolerance: 10.,
        money_tolerance: 0.5,
    };

    /// Presets ordered from least to most aggressive.
    pub fn ladder() -> Vec<Preset> {
        [
            Preset::CONSERVATIVE,
            Preset::BALANCED,
            Preset::AGGRESSIVE,
            Preset::EXTREME,
        ]
        .iter()
        .map(Preset::from)
        .collect()
    }

    pub fn to_config(
        &self,
        written_at: f64,
    ) -> SchedulerConfig {
        SchedulerConfig {
            hack_fraction: self.hack_fraction,
            security_tolerance: self.security_tolerance,
            money_tolerance: self.money_tolerance,
            inter_batch_delay_ms: DEFAULT_INTER_BATCH_DELAY_MS,
            preset_name: self.name.clone(),
            written_at,
        }
    }
}

impl PresetDef {
    pub fn to_config(
        &self,
        written_at: f64,
    ) -> SchedulerConfig {
        Preset::from(self).to_config(written_at)
    }
}

impl From<&PresetDef> for Preset {
    fn from(def: &PresetDef) -> Preset {
        Preset {
            name: def.name.to_owned(),
            hack_fraction: def.hack_fraction,
            security_tolerance: def.security_tolerance,
            money_tolerance: def.money_tolerance,
        }
    }
}

pub const DEFAULT_INTER_BATCH_DELAY_MS: u64 = 200;

/// RAM used per thread by each worker script, in GB.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadCosts {
    pub hack: f64,
    pub grow: f64,
    pub weaken: f64,
}

impl Default for ThreadCosts {
    fn default() -> Self {
        ThreadCosts {
            hack: 1.7,
            grow: 1.75,
            weaken: 1.75,
        }
    }
}

impl ThreadCosts {
    pub fn uniform(cost: f64) -> ThreadCosts {
        ThreadCosts {
            hack: cost,
            grow: cost,
            weaken: cost,
        }
    }

    pub fn of(
        &self,
        op: Operation,
    ) -> f64 {
        match op {
            Operation::Hack => self.hack,
            Operation::Grow => self.grow,
            Operation::Weaken => self.weaken,
        }
    }
}

/// Empirically tuned constants. Overridable through the
/// `scheduler-tunables` document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Tunables {
    /// Spacing between leg landings, in milliseconds.
    pub step_ms: f64,
    /// Upper bound on threads committed to one corrective action.
    pub max_prep_threads: u32,
    pub pool_size: usize,
    pub security_penalty: f64,
    pub money_penalty: f64,
    pub preparedness_bonus: f64,
    /// Weight of a new observation in the theoretical score average.
    pub score_smoothing: f64,
    pub thread_costs: ThreadCosts,
    /// RAM left untouched on the root node, in GB.
    pub home_reserve_gb: f64,
    /// Consecutive ready classifications before a target is batched.
    pub ready_streak: u32,
    /// Skip targets that still have legs in flight.
    pub track_batches: bool,
    pub prefer_exact_timing: bool,
    /// How often to unlock new nodes and deploy workers, in milliseconds.
    pub refresh_interval_ms: f64,
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            step_ms: 40.,
            max_prep_threads: 1000,
            pool_size: 3,
            security_penalty: 0.15,
            money_penalty: 0.3,
            preparedness_bonus: 2.,
            score_smoothing: 0.3,
            thread_costs: ThreadCosts::default(),
            home_reserve_gb: 8.,
            ready_streak: 1,
            track_batches: false,
            prefer_exact_timing: true,
            refresh_interval_ms: 10_000.,
        }
    }
}

impl Tunables {
    /// Replaces hand-edited values the daemons cannot run with.
    pub fn sanitized(mut self) -> Self {
        let fallback = Tunables::default();

        if !(self.refresh_interval_ms.is_finite() && 0. < self.refresh_interval_ms) {
            self.refresh_interval_ms = fallback.refresh_interval_ms;
        }
        if !self.step_ms.is_finite() {
            self.step_ms = fallback.step_ms;
        }
        self.step_ms = self.step_ms.max(0.);
        if !self.home_reserve_gb.is_finite() {
            self.home_reserve_gb = fallback.home_reserve_gb;
        }
        self.home_reserve_gb = self.home_reserve_gb.max(0.);
        if !(0. < self.score_smoothing && self.score_smoothing <= 1.) {
            self.score_smoothing = fallback.score_smoothing;
        }

        let costs = &mut self.thread_costs;
        for (cost, default) in [
            (&mut costs.hack, fallback.thread_costs.hack),
            (&mut costs.grow, fallback.thread_costs.grow),
            (&mut costs.weaken, fallback.thread_costs.weaken),
        ] {
            if !(cost.is_finite() && 0. < *cost) {
                *cost = default;
            }
        }

        self
    }
}

impl Document for Tunables {
    const KEY: &'static str = "scheduler-tunables";
}
