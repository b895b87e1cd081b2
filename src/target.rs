//! Target scoring and pool selection.

use std::{
    cmp::Reverse,
    collections::HashMap,
};

use compact_str::CompactString;
use decorum::N64;
use itertools::Itertools;
use tracing::{
    debug,
    trace,
};

use crate::{
    config::{
        SchedulerConfig,
        Tunables,
    },
    host::{
        Durations,
        Host,
        ServerSnapshot,
    },
    machine::Machine,
};

/// A money-holding node as observed at the start of a cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    pub hostname: CompactString,
    pub max_money: f64,
    pub money: f64,
    pub min_security: f64,
    pub security: f64,
    pub required_level: u32,
    pub chance: f64,
    pub durations: Durations,
}

impl Target {
    /// Reads the live figures for `server`, clamping money into
    /// `[0, max_money]` and security to at least its floor.
    pub fn observe(
        host: &impl Host,
        server: &ServerSnapshot,
    ) -> Target {
        let name = server.hostname.as_str();
        let max_money = server.max_money.max(0.);

        Target {
            hostname: server.hostname.clone(),
            max_money,
            money: server.money.clamp(0., max_money),
            min_security: server.min_security,
            security: server.security.max(server.min_security),
            required_level: server.required_level,
            chance: host.hack_chance(name),
            durations: Durations {
                hack: host.hack_time(name),
                grow: host.grow_time(name),
                weaken: host.weaken_time(name),
            },
        }
    }

    pub fn security_excess(&self) -> f64 {
        self.security - self.min_security
    }

    pub fn money_ratio(&self) -> f64 {
        if self.max_money <= 0. {
            return 0.;
        }

        self.money / self.max_money
    }

    /// Within both tolerances of `config`.
    pub fn is_prepared(
        &self,
        config: &SchedulerConfig,
    ) -> bool {
        self.security_excess() <= config.security_tolerance &&
            self.max_money * config.money_tolerance <= self.money
    }
}

/// Expected money per millisecond of hack time, discounted for excess
/// security and missing money.
pub fn score(
    target: &Target,
    config: &SchedulerConfig,
    tunables: &Tunables,
) -> f64 {
    if target.max_money <= 0. || target.durations.hack <= 0. {
        return 0.;
    }

    let bonus = if target.is_prepared(config) {
        tunables.preparedness_bonus
    }
    else {
        1.
    };

    let security_factor =
        1. + target.security_excess() * tunables.security_penalty;
    let money_factor = 1. + (1. - target.money_ratio()) * tunables.money_penalty;

    let score = (target.max_money * target.chance * bonus) /
        (target.durations.hack * security_factor * money_factor);

    if score.is_finite() {
        score.max(0.)
    }
    else {
        0.
    }
}

pub fn is_eligible(
    machine: &Machine,
    root: &str,
    hacking_level: u32,
) -> bool {
    machine.get_hostname() != root &&
        !machine.is_player_owned() &&
        machine.get_min_hacking_skill() <= hacking_level &&
        0. < machine.get_max_money() &&
        machine.is_root()
}

/// Ranks targets and keeps a smoothed score per hostname.
#[derive(Debug)]
pub struct TargetSelector {
    smoothing: f64,
    averages: HashMap<CompactString, f64>,
}

impl TargetSelector {
    pub fn new(smoothing: f64) -> TargetSelector {
        TargetSelector {
            smoothing: smoothing.clamp(0., 1.),
            averages: HashMap::new(),
        }
    }

    fn record(
        &mut self,
        hostname: &CompactString,
        score: f64,
    ) {
        let smoothing = self.smoothing;

        self.averages
            .entry(hostname.clone())
            .and_modify(|avg| {
                *avg = (1. - smoothing) * *avg + smoothing * score
            })
            .or_insert(score);
    }

    pub fn average(
        &self,
        hostname: &str,
    ) -> Option<f64> {
        self.averages.get(hostname).copied()
    }

    /// Top `n` eligible targets by score. Ties keep `machines` order.
    pub fn select_pool(
        &mut self,
        host: &impl Host,
        machines: &[Machine],
        root: &str,
        config: &SchedulerConfig,
        tunables: &Tunables,
        n: usize,
    ) -> Vec<Target> {
        let level = host.player_level();

        let scored = machines
            .iter()
            .filter(|m| is_eligible(m, root, level))
            .map(|m| {
                let target = Target::observe(host, m.server());
                let score = score(&target, config, tunables);
                (target, score)
            })
            .collect::<Vec<_>>();

        for (target, score) in scored.iter() {
            self.record(&target.hostname, *score);
            trace!(target = %target.hostname, score, "scored");
        }

        let pool = scored
            .into_iter()
            .sorted_by_key(|(_, score)| Reverse(N64::from_inner(*score)))
            .take(n)
            .map(|(target, _)| target)
            .collect::<Vec<_>>();

        debug!(
            pool = %pool.iter().map(|t| t.hostname.as_str()).join(", "),
            "target pool selected"
        );

        pool
    }

    /// Top `k` hostnames by smoothed score.
    pub fn leaderboard(
        &self,
        k: usize,
    ) -> Vec<(CompactString, f64)> {
        self.averages
            .iter()
            .map(|(name, avg)| (name.clone(), *avg))
            .sorted_by(|(an, a), (bn, b)| b.total_cmp(a).then_with(|| an.cmp(bn)))
            .take(k)
            .collect()
    }
}
