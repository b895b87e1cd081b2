//! Per-target preparation state.

use std::collections::HashMap;

use compact_str::CompactString;

use crate::{
    config::{
        SchedulerConfig,
        Tunables,
    },
    host::Host,
    script_deploy::Operation,
    target::Target,
    utils::to_threads,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetState {
    NeedsWeaken,
    NeedsGrow,
    Ready,
}

pub fn classify(
    target: &Target,
    config: &SchedulerConfig,
) -> TargetState {
    use TargetState::*;

    if target.min_security + config.security_tolerance < target.security {
        NeedsWeaken
    }
    else if target.money < target.max_money * config.money_tolerance {
        NeedsGrow
    }
    else {
        Ready
    }
}

/// Threads to launch to move a target toward readiness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Correction {
    pub grow: u32,
    pub weaken: u32,
}

impl Correction {
    pub fn is_empty(&self) -> bool {
        self.grow == 0 && self.weaken == 0
    }
}

/// Weaken threads that remove `security`.
pub fn weaken_threads_for(
    host: &impl Host,
    security: f64,
) -> u32 {
    let per_thread = host.weaken_per_thread();
    if per_thread <= 0. {
        return 0;
    }

    to_threads((security / per_thread).ceil())
}

pub fn correction(
    host: &impl Host,
    target: &Target,
    state: TargetState,
    tunables: &Tunables,
) -> Correction {
    use TargetState::*;

    let cap = tunables.max_prep_threads;
    let name = target.hostname.as_str();

    match state {
        NeedsWeaken => Correction {
            grow: 0,
            weaken: weaken_threads_for(host, target.security_excess()).min(cap),
        },

        NeedsGrow => {
            let multiplier = target.max_money / target.money.max(1.);
            let grow = to_threads(host.grow_threads_for(name, multiplier).ceil())
                .min(cap);

            // grows raise security; cancel it out in the same pass
            let added = Operation::Grow.security_effect(host, name, grow);
            let weaken = weaken_threads_for(host, added).min(cap);

            Correction { grow, weaken }
        },

        Ready => Correction::default(),
    }
}

/// Requires a run of consecutive ready classifications before a target is
/// batched.
#[derive(Debug)]
pub struct ReadinessGate {
    required: u32,
    streaks: HashMap<CompactString, u32>,
}

impl ReadinessGate {
    pub fn new(required: u32) -> ReadinessGate {
        ReadinessGate {
            required: required.max(1),
            streaks: HashMap::new(),
        }
    }

    /// Returns `state`, except that a ready target stays `NeedsGrow` until
    /// its streak is long enough.
    pub fn admit(
        &mut self,
        hostname: &str,
        state: TargetState,
    ) -> TargetState {
        if state != TargetState::Ready {
            self.streaks.remove(hostname);
            return state;
        }

        let streak = self.streaks.entry(CompactString::from(hostname)).or_insert(0);
        *streak = streak.saturating_add(1);

        if self.required <= *streak {
            TargetState::Ready
        }
        else {
            TargetState::NeedsGrow
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{
        rngs::StdRng,
        Rng,
        SeedableRng,
    };

    use super::*;
    use crate::{
        host::Durations,
        testing::{
            FakeHost,
            GROW_SECURITY_PER_THREAD,
        },
    };

    fn target(
        money: f64,
        security: f64,
    ) -> Target {
        Target {
            hostname: "phantasy".into(),
            max_money: 1e6,
            money,
            min_security: 10.,
            security,
            required_level: 1,
            chance: 0.5,
            durations: Durations {
                hack: 1.,
                grow: 1.,
                weaken: 1.,
            },
        }
    }

    #[test]
    fn classification_boundaries() {
        let config = SchedulerConfig::default();

        assert_eq!(classify(&target(1e6, 15.), &config), TargetState::Ready);
        assert_eq!(
            classify(&target(1e6, 15.01), &config),
            TargetState::NeedsWeaken
        );
        // weaken takes priority over grow
        assert_eq!(classify(&target(0., 20.), &config), TargetState::NeedsWeaken);
        assert_eq!(classify(&target(7.5e5, 10.), &config), TargetState::Ready);
        assert_eq!(
            classify(&target(7.4e5, 10.), &config),
            TargetState::NeedsGrow
        );
    }

    #[test]
    fn classify_is_idempotent() {
        let config = SchedulerConfig::default();
        let mut rng = StdRng::seed_from_u64(4);

        for _ in 0..500 {
            let t = target(rng.gen_range(0. ..=1e6), rng.gen_range(10. ..60.));
            assert_eq!(classify(&t, &config), classify(&t, &config));
        }
    }

    #[test]
    fn weaken_correction_is_capped() {
        let host = FakeHost::new();
        let tunables = Tunables::default();

        let c = correction(&host, &target(1e6, 12.), TargetState::NeedsWeaken, &tunables);
        assert_eq!(c, Correction { grow: 0, weaken: 40 });

        let c = correction(&host, &target(1e6, 99.), TargetState::NeedsWeaken, &tunables);
        assert_eq!(c.weaken, 1000);
    }

    #[test]
    fn grow_correction_carries_its_own_weaken() {
        let host = FakeHost::new();
        let tunables = Tunables::default();

        // multiplier 4, fake host needs 50 threads per unit above one
        let c = correction(&host, &target(2.5e5, 10.), TargetState::NeedsGrow, &tunables);
        assert_eq!(c.grow, 150);
        let expected = (150. * GROW_SECURITY_PER_THREAD / 0.05).ceil() as u32;
        assert_eq!(c.weaken, expected);

        // an empty target is grown from one dollar
        let c = correction(&host, &target(0., 10.), TargetState::NeedsGrow, &tunables);
        assert_eq!(c.grow, 1000);
    }

    #[test]
    fn ready_needs_no_correction() {
        let host = FakeHost::new();

        let c = correction(
            &host,
            &target(1e6, 10.),
            TargetState::Ready,
            &Tunables::default(),
        );
        assert!(c.is_empty());
    }

    #[test]
    fn gate_requires_a_streak() {
        let mut gate = ReadinessGate::new(2);

        assert_eq!(gate.admit("a", TargetState::Ready), TargetState::NeedsGrow);
        assert_eq!(gate.admit("a", TargetState::Ready), TargetState::Ready);
        assert_eq!(
            gate.admit("a", TargetState::NeedsWeaken),
            TargetState::NeedsWeaken
        );
        assert_eq!(gate.admit("a", TargetState::Ready), TargetState::NeedsGrow);
    }

    #[test]
    fn default_gate_passes_through() {
        let mut gate = ReadinessGate::new(Tunables::default().ready_streak);

        assert_eq!(gate.admit("a", TargetState::Ready), TargetState::Ready);
    }
}
