//! Self-tuning aggressiveness.
//!
//! The controller watches realized throughput, steps along the preset ladder
//! when the trend is clearly up or down, and now and then explores or falls
//! back to the best preset seen so far.

use std::collections::{
    BTreeMap,
    VecDeque,
};

use rand::{
    rngs::StdRng,
    Rng,
    SeedableRng,
};
use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    info,
    warn,
};

use crate::{
    config::{
        Preset,
        SchedulerConfig,
    },
    store::{
        Document,
        StateStore,
    },
};

#[derive(Clone, Debug, PartialEq)]
pub struct ControllerSettings {
    pub history_cap: usize,
    pub evaluate_every: u64,
    pub explore_every: u64,
    pub epsilon: f64,
    /// Samples a preset needs before it can be adopted as the best.
    pub min_samples: u32,
    pub recent_window: usize,
    pub older_window: usize,
    pub min_older: usize,
    pub step_down_below: f64,
    pub step_up_above: f64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        ControllerSettings {
            history_cap: 100,
            evaluate_every: 6,
            explore_every: 30,
            epsilon: 0.1,
            min_samples: 5,
            recent_window: 10,
            older_window: 20,
            min_older: 5,
            step_down_below: -0.10,
            step_up_above: 0.20,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetStats {
    pub samples: u32,
    pub total: f64,
}

impl PresetStats {
    pub fn mean(&self) -> Option<f64> {
        (0 < self.samples).then(|| self.total / self.samples as f64)
    }
}

/// Persisted learning state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControllerSnapshot {
    pub history: Vec<f64>,
    pub stats: BTreeMap<String, PresetStats>,
    pub active: String,
    pub observations: u64,
}

impl Document for ControllerSnapshot {
    const KEY: &'static str = "optimizer-data";
}

/// Trailing averages over the throughput history.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Trend {
    pub short: f64,
    pub medium: f64,
    pub long: f64,
    /// Relative change of the recent window against the one before it.
    pub ratio: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Adjustment {
    Hold,
    StepDown { from: String, to: String },
    StepUp { from: String, to: String },
    Explore { from: String, to: String },
    Exploit { from: String, to: String },
}

impl Adjustment {
    pub fn is_change(&self) -> bool {
        !matches!(self, Adjustment::Hold)
    }
}

fn mean<'a>(values: impl Iterator<Item = &'a f64>) -> Option<f64> {
    let (sum, count) = values.fold((0., 0usize), |(s, c), v| (s + v, c + 1));
    (0 < count).then(|| sum / count as f64)
}

#[derive(Debug)]
pub struct AdaptiveController {
    settings: ControllerSettings,
    presets: Vec<Preset>,
    stats: Vec<PresetStats>,
    active: usize,
    history: VecDeque<f64>,
    observations: u64,
    rng: StdRng,
}

impl AdaptiveController {
    /// `presets` must be ordered from least to most aggressive. Starts on
    /// `initial` when it names a preset, otherwise on the middle rung.
    pub fn new(
        settings: ControllerSettings,
        presets: Vec<Preset>,
        initial: &str,
        seed: u64,
    ) -> AdaptiveController {
        let presets = if presets.is_empty() {
            Preset::ladder()
        }
        else {
            presets
        };

        let active = presets
            .iter()
            .position(|p| p.name == initial)
            .unwrap_or((presets.len() - 1) / 2);

        AdaptiveController {
            stats: vec![PresetStats::default(); presets.len()],
            history: VecDeque::with_capacity(settings.history_cap),
            settings,
            presets,
            active,
            observations: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn active_preset(&self) -> &Preset {
        &self.presets[self.active]
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }

    pub fn history(&self) -> impl Iterator<Item = &f64> {
        self.history.iter()
    }

    pub fn stats_for(
        &self,
        name: &str,
    ) -> Option<PresetStats> {
        self.presets
            .iter()
            .position(|p| p.name == name)
            .map(|i| self.stats[i])
    }

    pub fn trend(&self) -> Trend {
        let len = self.history.len();
        let tail = |n: usize| self.history.iter().skip(len.saturating_sub(n));

        let recent_window = self.settings.recent_window;
        let older_len = len
            .saturating_sub(recent_window)
            .min(self.settings.older_window);

        let recent = mean(tail(recent_window));
        let older = mean(
            tail(recent_window + self.settings.older_window).take(older_len),
        );

        let ratio = match (recent, older) {
            (Some(recent), Some(older)) if self.settings.min_older <= older_len => {
                Some((recent - older) / older.abs().max(1.))
            },
            _ => None,
        };

        Trend {
            short: recent.unwrap_or(0.),
            medium: mean(tail(30)).unwrap_or(0.),
            long: mean(self.history.iter()).unwrap_or(0.),
            ratio,
        }
    }

    fn switch_to(
        &mut self,
        index: usize,
    ) -> (String, String) {
        let from = self.presets[self.active].name.clone();
        self.active = index;
        (from, self.presets[index].name.clone())
    }

    fn evaluate_trend(&mut self) -> Adjustment {
        let trend = self.trend();
        let ratio = match trend.ratio {
            Some(r) => r,
            None => return Adjustment::Hold,
        };

        debug!(
            ratio,
            short = trend.short,
            medium = trend.medium,
            long = trend.long,
            "throughput trend"
        );

        if ratio < self.settings.step_down_below && 0 < self.active {
            let (from, to) = self.switch_to(self.active - 1);
            Adjustment::StepDown { from, to }
        }
        else if self.settings.step_up_above < ratio &&
            self.active + 1 < self.presets.len()
        {
            let (from, to) = self.switch_to(self.active + 1);
            Adjustment::StepUp { from, to }
        }
        else {
            Adjustment::Hold
        }
    }

    fn best_proven(&self) -> Option<usize> {
        self.stats
            .iter()
            .enumerate()
            .filter(|(_, s)| self.settings.min_samples <= s.samples)
            .filter_map(|(i, s)| s.mean().map(|m| (i, m)))
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i)
    }

    fn explore(&mut self) -> Adjustment {
        if self.rng.gen::<f64>() < self.settings.epsilon {
            let pick = self.rng.gen_range(0..self.presets.len());
            if pick == self.active {
                return Adjustment::Hold;
            }

            let (from, to) = self.switch_to(pick);
            return Adjustment::Explore { from, to };
        }

        match self.best_proven() {
            Some(best) if best != self.active => {
                let (from, to) = self.switch_to(best);
                Adjustment::Exploit { from, to }
            },
            _ => Adjustment::Hold,
        }
    }

    /// Records one throughput sample for the active preset. Changes the
    /// preset at most once.
    pub fn observe(
        &mut self,
        throughput: f64,
    ) -> Adjustment {
        if !throughput.is_finite() {
            warn!(throughput, "ignoring non-finite sample");
            return Adjustment::Hold;
        }

        if self.settings.history_cap <= self.history.len() {
            self.history.pop_front();
        }
        self.history.push_back(throughput);

        let stats = &mut self.stats[self.active];
        stats.samples += 1;
        stats.total += throughput;

        self.observations += 1;

        let mut adjustment = Adjustment::Hold;
        if self.observations % self.settings.evaluate_every.max(1) == 0 {
            adjustment = self.evaluate_trend();
        }

        if !adjustment.is_change() &&
            self.observations % self.settings.explore_every.max(1) == 0
        {
            adjustment = self.explore();
        }

        if adjustment.is_change() {
            info!(?adjustment, "preset changed");
        }

        adjustment
    }

    /// Writes the active preset as the shared configuration.
    pub fn publish(
        &self,
        store: &impl StateStore,
        now: f64,
    ) -> SchedulerConfig {
        let config = self.active_preset().to_config(now);
        config.save(store);
        config
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            history: self.history.iter().copied().collect(),
            stats: self
                .presets
                .iter()
                .zip(self.stats.iter())
                .map(|(p, s)| (p.name.clone(), *s))
                .collect(),
            active: self.active_preset().name.clone(),
            observations: self.observations,
        }
    }

    /// Continues from a persisted snapshot. Unknown preset names are
    /// dropped.
    pub fn restore(
        &mut self,
        snapshot: ControllerSnapshot,
    ) {
        let skip = snapshot
            .history
            .len()
            .saturating_sub(self.settings.history_cap);
        self.history = snapshot
            .history
            .into_iter()
            .skip(skip)
            .filter(|v| v.is_finite())
            .collect();

        for (i, preset) in self.presets.iter().enumerate() {
            if let Some(stats) = snapshot.stats.get(&preset.name) {
                self.stats[i] = *stats;
            }
        }

        if let Some(i) = self.presets.iter().position(|p| p.name == snapshot.active) {
            self.active = i;
        }

        self.observations = snapshot.observations;
    }

    pub fn persist(
        &self,
        store: &impl StateStore,
    ) {
        self.snapshot().save(store);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn controller(initial: &str) -> AdaptiveController {
        AdaptiveController::new(
            ControllerSettings::default(),
            Preset::ladder(),
            initial,
            42,
        )
    }

    #[test]
    fn falling_throughput_steps_down_once_per_evaluation() {
        let mut c = controller("extreme");
        let mut value = 1e6;
        let mut changes = vec![];

        for n in 1..=36u64 {
            value *= 0.9;
            let adjustment = c.observe(value);

            if adjustment.is_change() {
                assert_eq!(n % 6, 0);
                assert!(matches!(adjustment, Adjustment::StepDown { .. }));
                changes.push(n);
            }
        }

        // the first evaluation with enough older samples is the third
        assert_eq!(changes, [18, 24, 30]);
        assert_eq!(c.active_preset().name, "conservative");
    }

    #[test]
    fn rising_throughput_steps_up() {
        let mut c = controller("conservative");

        for n in 1..=18 {
            c.observe(1000. * 1.1f64.powi(n));
        }

        assert_eq!(c.active_preset().name, "balanced");
    }

    #[test]
    fn flat_throughput_holds() {
        let mut c = controller("balanced");

        for _ in 0..29 {
            assert_eq!(c.observe(500.), Adjustment::Hold);
        }
    }

    #[test]
    fn trend_needs_older_samples() {
        let mut c = controller("balanced");
        for v in 0..14 {
            c.observe(v as f64);
        }
        assert_eq!(c.trend().ratio, None);

        c.observe(14.);
        let trend = c.trend();
        // older is 0..=4, recent is 5..=14
        assert_eq!(trend.ratio, Some((9.5 - 2.) / 2.));
        assert_eq!(trend.short, 9.5);
        assert_eq!(trend.long, 7.);
    }

    #[test]
    fn history_is_bounded() {
        let mut c = AdaptiveController::new(
            ControllerSettings {
                epsilon: 0.,
                ..ControllerSettings::default()
            },
            Preset::ladder(),
            "balanced",
            1,
        );

        for _ in 0..250 {
            c.observe(1.);
        }

        assert_eq!(c.history().count(), 100);
        assert_eq!(c.observations(), 250);
    }

    #[test]
    fn proven_best_preset_is_adopted() {
        let mut c = AdaptiveController::new(
            ControllerSettings {
                epsilon: 0.,
                ..ControllerSettings::default()
            },
            Preset::ladder(),
            "balanced",
            1,
        );

        let mut snapshot = c.snapshot();
        snapshot.stats.insert("aggressive".to_owned(), PresetStats {
            samples: 10,
            total: 1e9,
        });
        c.restore(snapshot);

        let mut last = Adjustment::Hold;
        for _ in 0..30 {
            last = c.observe(100.);
        }

        assert!(matches!(last, Adjustment::Exploit { .. }));
        assert_eq!(c.active_preset().name, "aggressive");
    }

    #[test]
    fn exploration_sometimes_moves() {
        let moved = (0..20)
            .filter(|seed| {
                let mut c = AdaptiveController::new(
                    ControllerSettings {
                        epsilon: 1.,
                        ..ControllerSettings::default()
                    },
                    Preset::ladder(),
                    "balanced",
                    *seed,
                );

                (0..30)
                    .map(|_| c.observe(100.))
                    .any(|a| matches!(a, Adjustment::Explore { .. }))
            })
            .count();

        assert!(0 < moved);
    }

    #[test]
    fn ignores_non_finite_samples() {
        let mut c = controller("balanced");

        assert_eq!(c.observe(f64::NAN), Adjustment::Hold);
        assert_eq!(c.observations(), 0);
    }

    #[test]
    fn publish_and_restore_round_trip_through_the_store() {
        let store = MemoryStore::default();
        let mut c = controller("aggressive");
        for v in [1., 2., 3.] {
            c.observe(v);
        }

        let config = c.publish(&store, 77.);
        assert_eq!(config.preset_name, "aggressive");
        assert_eq!(SchedulerConfig::load(&store), config);

        c.persist(&store);
        let mut restored = controller("balanced");
        restored.restore(ControllerSnapshot::load(&store));

        assert_eq!(restored.active_preset().name, "aggressive");
        assert_eq!(restored.history().copied().collect::<Vec<_>>(), [1., 2., 3.]);
        assert_eq!(restored.stats_for("aggressive").unwrap().samples, 3);
    }
}
