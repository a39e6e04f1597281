// ==============================================================================
// turbo.rs — FORCED INDUCTION (PSI SPOOL / DECAY + BLOW-OFF / BACKFIRE EVENTS)
// ==============================================================================
// Per tick:
// 1) PSI update
//    - ShiftDecay: lerp(decay_start, decay_start * retention, t) over a fixed
//      duration after an upshift, then back to normal spooling.
//    - otherwise: target = max_psi * throttle; spool rate depends on the
//      current PSI band (low < mid < high, models turbo lag); above target the
//      PSI bleeds at drop_rate. Always clamped to [0, max_psi].
// 2) Throttle-release edge (>= full -> < full) above min_blow_off_psi:
//    one BlowOff event, maybe a backfire sequence.
// 3) Upshift above shift_blow_off_psi: BlowOff, maybe backfire, then decay.
// 4) Sustained limiter: independent, lower-probability backfire roll.
//
// Backfire sequences are 1..=4 pops spaced by random sub-second delays on the
// turbo's own simulated clock; a sequence cannot start while another one is
// pending or inside the cooldown window.
//
// Output:
// - current_psi(), normalized_boost(), boost_multiplier()
// - Vec<TurboEvent> for audio / particles (consumers may ignore them)
// ==============================================================================

use std::collections::VecDeque;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::drivetrain::rng::RandomSource;
use crate::drivetrain::types::{GearShift, ShiftKind};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurboConfig {
    pub max_psi: f32,
    pub boost_per_psi: f32,         // torque multiplier gain per PSI

    pub spool_rate_low: f32,        // PSI/s below low_band_psi
    pub spool_rate_mid: f32,        // PSI/s below mid_band_psi
    pub spool_rate_high: f32,       // PSI/s above
    pub low_band_psi: f32,
    pub mid_band_psi: f32,
    pub drop_rate: f32,             // PSI/s toward a lower target

    pub full_throttle: f32,         // release edge threshold
    pub min_blow_off_psi: f32,
    pub shift_blow_off_psi: f32,
    pub shift_retention: f32,       // fraction kept after an upshift
    pub shift_decay_duration: f32,  // s

    pub backfire_chance: f32,       // 0..1
    pub backfire_min_pops: u8,
    pub backfire_max_pops: u8,
    pub backfire_min_delay: f32,    // s
    pub backfire_max_delay: f32,    // s
    pub backfire_cooldown: f32,     // s
    pub limiter_backfire_delay: f32,// s on the limiter before rolling
    pub limiter_chance_scale: f32,
}

impl Default for TurboConfig {
    fn default() -> Self {
        Self {
            max_psi: 20.0,
            boost_per_psi: 0.06,

            spool_rate_low: 1.5,
            spool_rate_mid: 4.0,
            spool_rate_high: 8.0,
            low_band_psi: 3.0,
            mid_band_psi: 10.0,
            drop_rate: 15.0,

            full_throttle: 0.99,
            min_blow_off_psi: 2.0,
            shift_blow_off_psi: 1.0,
            shift_retention: 0.7,
            shift_decay_duration: 0.5,

            backfire_chance: 0.7,
            backfire_min_pops: 1,
            backfire_max_pops: 4,
            backfire_min_delay: 0.05,
            backfire_max_delay: 0.2,
            backfire_cooldown: 0.1,
            limiter_backfire_delay: 0.5,
            limiter_chance_scale: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurboPhase {
    Idle,
    Spooling,
    Holding,
    ShiftDecay,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TurboEvent {
    BlowOff { psi: f32, normalized: f32 },
    BackfireSequence { pops: u8 },
    BackfirePop { psi: f32, normalized: f32 },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TurboInput {
    pub throttle: f32,
    pub shift: Option<GearShift>,
    pub at_limiter: bool,
}

#[derive(Debug, Clone, Copy)]
struct ShiftDecay {
    start_psi: f32,
    elapsed: f32,
}

#[derive(Debug, Clone)]
pub struct TurboModel {
    config: TurboConfig,
    current_psi: f32,
    target_psi: f32,
    last_throttle: f32,
    released: bool,
    decay: Option<ShiftDecay>,
    clock: f32,
    last_backfire: Option<f32>,
    pending_pops: VecDeque<f32>,
    limiter_time: f32,
}

#[inline]
fn move_towards(current: f32, target: f32, max_delta: f32) -> f32 {
    if (target - current).abs() <= max_delta {
        target
    } else {
        current + (target - current).signum() * max_delta
    }
}

impl TurboModel {
    pub fn new(config: TurboConfig) -> Self {
        Self {
            config,
            current_psi: 0.0,
            target_psi: 0.0,
            last_throttle: 0.0,
            released: true,
            decay: None,
            clock: 0.0,
            last_backfire: None,
            pending_pops: VecDeque::new(),
            limiter_time: 0.0,
        }
    }

    pub fn current_psi(&self) -> f32 {
        self.current_psi
    }

    pub fn max_psi(&self) -> f32 {
        self.config.max_psi
    }

    pub fn normalized_boost(&self) -> f32 {
        if self.config.max_psi > 0.0 {
            (self.current_psi / self.config.max_psi).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn boost_multiplier(&self) -> f32 {
        1.0 + self.current_psi * self.config.boost_per_psi
    }

    pub fn phase(&self) -> TurboPhase {
        if self.decay.is_some() {
            TurboPhase::ShiftDecay
        } else if self.target_psi <= 0.0 {
            TurboPhase::Idle
        } else if self.current_psi + 1e-3 < self.target_psi {
            TurboPhase::Spooling
        } else {
            TurboPhase::Holding
        }
    }

    /// Turbo stage change; current PSI is pulled back inside the new range.
    pub fn set_max_psi(&mut self, max_psi: f32) {
        self.config.max_psi = if max_psi.is_finite() { max_psi.max(0.0) } else { 0.0 };
        self.current_psi = self.current_psi.clamp(0.0, self.config.max_psi);
        self.target_psi = self.target_psi.clamp(0.0, self.config.max_psi);
        if let Some(d) = self.decay.as_mut() {
            d.start_psi = d.start_psi.min(self.config.max_psi);
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }

    pub fn update(
        &mut self,
        input: &TurboInput,
        dt: f32,
        rng: &mut dyn RandomSource,
    ) -> Vec<TurboEvent> {
        let mut events = Vec::new();
        let cfg = self.config;
        let throttle = input.throttle.clamp(0.0, 1.0);
        self.clock += dt;

        // --------------------------------------------------
        // PSI
        // --------------------------------------------------
        if let Some(mut decay) = self.decay.take() {
            decay.elapsed += dt;
            let t = if cfg.shift_decay_duration > 0.0 {
                (decay.elapsed / cfg.shift_decay_duration).clamp(0.0, 1.0)
            } else {
                1.0
            };
            let retained = decay.start_psi * cfg.shift_retention;
            self.current_psi = decay.start_psi + (retained - decay.start_psi) * t;
            if t < 1.0 {
                self.decay = Some(decay);
            }
        } else {
            self.target_psi = cfg.max_psi * throttle;

            let build_rate = if self.current_psi < cfg.low_band_psi {
                cfg.spool_rate_low
            } else if self.current_psi < cfg.mid_band_psi {
                cfg.spool_rate_mid
            } else {
                cfg.spool_rate_high
            };

            if self.current_psi < self.target_psi {
                self.current_psi = move_towards(self.current_psi, self.target_psi, build_rate * dt);
            } else if self.current_psi > self.target_psi {
                self.current_psi = move_towards(self.current_psi, self.target_psi, cfg.drop_rate * dt);
            }
        }
        self.current_psi = self.current_psi.clamp(0.0, cfg.max_psi);

        // --------------------------------------------------
        // Throttle release -> blow-off
        // --------------------------------------------------
        if self.last_throttle >= cfg.full_throttle
            && throttle < cfg.full_throttle
            && !self.released
            && self.current_psi > cfg.min_blow_off_psi
        {
            events.push(self.blow_off_event());
            if rng.next_f32() < cfg.backfire_chance {
                self.start_backfire(rng, &mut events);
            }
            self.released = true;
        } else if throttle >= cfg.full_throttle {
            self.released = false;
        }

        // --------------------------------------------------
        // Upshift -> blow-off + PSI decay
        // --------------------------------------------------
        if let Some(shift) = input
            .shift
            .filter(|s| s.kind == ShiftKind::Upshift && s.from.is_forward()) {
            if self.current_psi > cfg.shift_blow_off_psi {
                events.push(self.blow_off_event());
                if rng.next_f32() < cfg.backfire_chance {
                    self.start_backfire(rng, &mut events);
                }
            }
            debug!(
                "turbo: {} -> {} upshift, decaying from {:.1} psi",
                shift.from, shift.to, self.current_psi
            );
            self.decay = Some(ShiftDecay { start_psi: self.current_psi, elapsed: 0.0 });
        }

        // --------------------------------------------------
        // Sustained limiter -> backfire roll
        // --------------------------------------------------
        if input.at_limiter {
            self.limiter_time += dt;
            if self.limiter_time >= cfg.limiter_backfire_delay
                && rng.next_f32() < cfg.backfire_chance * cfg.limiter_chance_scale
            {
                self.start_backfire(rng, &mut events);
            }
        } else {
            self.limiter_time = 0.0;
        }

        // --------------------------------------------------
        // Pops due on this tick
        // --------------------------------------------------
        while self.pending_pops.front().is_some_and(|&at| at <= self.clock + 1e-6) {
            self.pending_pops.pop_front();
            events.push(TurboEvent::BackfirePop {
                psi: self.current_psi,
                normalized: self.normalized_boost(),
            });
        }

        self.last_throttle = throttle;
        events
    }

    fn blow_off_event(&self) -> TurboEvent {
        debug!("turbo: blow-off at {:.1} psi", self.current_psi);
        TurboEvent::BlowOff {
            psi: self.current_psi,
            normalized: self.normalized_boost(),
        }
    }

    fn start_backfire(&mut self, rng: &mut dyn RandomSource, events: &mut Vec<TurboEvent>) {
        let cfg = &self.config;
        if !self.pending_pops.is_empty() {
            return;
        }
        if let Some(last) = self.last_backfire {
            if self.clock - last < cfg.backfire_cooldown {
                return;
            }
        }
        self.last_backfire = Some(self.clock);

        let lo = cfg.backfire_min_pops.max(1);
        let hi = cfg.backfire_max_pops.max(lo);
        let span = (hi - lo) as f32 + 1.0;
        let pops = (lo as f32 + (rng.next_f32() * span).floor()).min(hi as f32) as u8;

        // first pop is immediate, the rest follow at random spacing
        let mut at = self.clock;
        for i in 0..pops {
            if i > 0 {
                let r = rng.next_f32();
                at += cfg.backfire_min_delay + (cfg.backfire_max_delay - cfg.backfire_min_delay) * r;
            }
            self.pending_pops.push_back(at);
        }

        debug!("turbo: backfire sequence, {pops} pops");
        events.push(TurboEvent::BackfireSequence { pops });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivetrain::rng::ScriptedRandom;
    use crate::drivetrain::types::Gear;

    const DT: f32 = 0.01;

    fn throttle(t: f32) -> TurboInput {
        TurboInput { throttle: t, ..Default::default() }
    }

    fn upshift() -> TurboInput {
        TurboInput {
            throttle: 1.0,
            shift: Some(GearShift::between(Gear::Forward(2), Gear::Forward(3))),
            at_limiter: false,
        }
    }

    fn count_blow_offs(events: &[TurboEvent]) -> usize {
        events.iter().filter(|e| matches!(e, TurboEvent::BlowOff { .. })).count()
    }

    #[test]
    fn spool_is_band_limited() {
        let mut turbo = TurboModel::new(TurboConfig::default());
        let mut rng = ScriptedRandom::constant(0.99);

        // 1 s of full throttle from 0 stays in the low band: 1.5 psi
        for _ in 0..100 {
            turbo.update(&throttle(1.0), DT, &mut rng);
        }
        assert!((turbo.current_psi() - 1.5).abs() < 0.05, "psi {}", turbo.current_psi());
        assert_eq!(turbo.phase(), TurboPhase::Spooling);
    }

    #[test]
    fn reaches_and_holds_max() {
        let mut turbo = TurboModel::new(TurboConfig::default());
        let mut rng = ScriptedRandom::constant(0.99);
        for _ in 0..800 {
            turbo.update(&throttle(1.0), DT, &mut rng);
        }
        assert_eq!(turbo.current_psi(), 20.0);
        assert_eq!(turbo.phase(), TurboPhase::Holding);
        assert!((turbo.boost_multiplier() - 2.2).abs() < 1e-4);
        assert_eq!(turbo.normalized_boost(), 1.0);
    }

    #[test]
    fn release_fires_one_blow_off() {
        let mut turbo = TurboModel::new(TurboConfig::default());
        let mut rng = ScriptedRandom::constant(0.99); // never backfire
        for _ in 0..400 {
            turbo.update(&throttle(1.0), DT, &mut rng);
        }
        let events = turbo.update(&throttle(0.0), DT, &mut rng);
        assert_eq!(count_blow_offs(&events), 1);

        for _ in 0..50 {
            let events = turbo.update(&throttle(0.0), DT, &mut rng);
            assert_eq!(count_blow_offs(&events), 0);
        }
        assert_eq!(turbo.phase(), TurboPhase::Idle);
    }

    #[test]
    fn no_blow_off_below_threshold() {
        let mut turbo = TurboModel::new(TurboConfig::default());
        let mut rng = ScriptedRandom::constant(0.0);
        for _ in 0..50 {
            turbo.update(&throttle(1.0), DT, &mut rng);
        }
        // ~0.75 psi, under min_blow_off_psi
        let events = turbo.update(&throttle(0.0), DT, &mut rng);
        assert!(events.is_empty());
    }

    #[test]
    fn upshift_decays_to_retained_fraction() {
        let mut turbo = TurboModel::new(TurboConfig::default());
        let mut rng = ScriptedRandom::constant(0.99);
        for _ in 0..800 {
            turbo.update(&throttle(1.0), DT, &mut rng);
        }
        let events = turbo.update(&upshift(), DT, &mut rng);
        assert_eq!(count_blow_offs(&events), 1);
        assert_eq!(turbo.phase(), TurboPhase::ShiftDecay);

        // 70% throttle asks for exactly the retained 14 psi once decay ends
        let mut last = turbo.current_psi();
        for _ in 0..70 {
            turbo.update(&throttle(0.7), DT, &mut rng);
            assert!(turbo.current_psi() <= last + 1e-4);
            last = turbo.current_psi();
        }
        assert!((turbo.current_psi() - 14.0).abs() < 0.05, "psi {}", turbo.current_psi());
        assert_eq!(turbo.phase(), TurboPhase::Holding);
    }

    #[test]
    fn backfire_pops_are_scheduled_and_do_not_overlap() {
        let mut turbo = TurboModel::new(TurboConfig::default());
        // chance roll 0.0 -> backfire; pop count roll 0.99 -> 4 pops; delays 0.0 -> 50 ms
        let mut rng = ScriptedRandom::new(vec![0.0, 0.99, 0.0, 0.0, 0.0]);
        for _ in 0..400 {
            turbo.update(&throttle(1.0), DT, &mut ScriptedRandom::constant(0.99));
        }
        let events = turbo.update(&throttle(0.0), DT, &mut rng);
        assert!(events.contains(&TurboEvent::BackfireSequence { pops: 4 }));

        let mut pops = events
            .iter()
            .filter(|e| matches!(e, TurboEvent::BackfirePop { .. }))
            .count();
        assert_eq!(pops, 1);

        // a second trigger while pops are pending is ignored
        let again = turbo.update(&upshift(), DT, &mut ScriptedRandom::constant(0.0));
        assert!(!again.iter().any(|e| matches!(e, TurboEvent::BackfireSequence { .. })));
        pops += again.iter().filter(|e| matches!(e, TurboEvent::BackfirePop { .. })).count();

        for _ in 0..30 {
            let ev = turbo.update(&throttle(0.0), DT, &mut ScriptedRandom::constant(0.99));
            pops += ev.iter().filter(|e| matches!(e, TurboEvent::BackfirePop { .. })).count();
        }
        assert_eq!(pops, 4);
    }

    #[test]
    fn limiter_needs_sustained_time() {
        let mut turbo = TurboModel::new(TurboConfig::default());
        let mut rng = ScriptedRandom::constant(0.0);
        let input = TurboInput { throttle: 1.0, shift: None, at_limiter: true };
        for _ in 0..40 {
            let ev = turbo.update(&input, DT, &mut rng);
            assert!(ev.is_empty());
        }
        let mut fired = false;
        for _ in 0..20 {
            let ev = turbo.update(&input, DT, &mut rng);
            fired |= ev.iter().any(|e| matches!(e, TurboEvent::BackfireSequence { .. }));
        }
        assert!(fired);
    }

    #[test]
    fn stage_change_reclamps_psi() {
        let mut turbo = TurboModel::new(TurboConfig::default());
        let mut rng = ScriptedRandom::constant(0.99);
        for _ in 0..800 {
            turbo.update(&throttle(1.0), DT, &mut rng);
        }
        turbo.set_max_psi(5.0);
        assert_eq!(turbo.current_psi(), 5.0);
        turbo.reset();
        assert_eq!(turbo.current_psi(), 0.0);
        assert_eq!(turbo.max_psi(), 5.0);
    }
}
