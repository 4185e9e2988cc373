//! Per-train kinematic model (§4.9): a 28-entry speed table with online
//! EWMA calibration. Grounded on `train2/train.h`'s
//! `kinematic_speed_params_t`/`train_kinematic_model_t` and `train2/model.c`.

use std::collections::HashMap;

use marklin_common::consts::{EWMA_ALPHA_DENOM, KINEMATIC_TABLE_SIZE, MAX_SPEED};
use marklin_common::fixed::{ewma_update, Fixed};
use marklin_common::ids::{Tick, TrainId};

/// Per-speed-level parameters, indexed by [`table_index`].
#[derive(Debug, Clone, Copy)]
pub struct SpeedParams {
    /// Steady-state velocity, mm/tick.
    pub velocity: Fixed,
    /// Acceleration to this speed, mm/tick^2.
    pub acceleration: Fixed,
    /// Deceleration from this speed, mm/tick^2.
    pub deceleration: Fixed,
    /// Distance needed to come to a full stop from this speed, mm.
    pub stop_distance_mm: u32,
    /// Time needed to come to a full stop from this speed, ticks.
    pub stop_time_ticks: u64,
    /// When each field was last refreshed by a calibration sample.
    pub last_velocity_update: Tick,
    pub last_stop_update: Tick,
}

impl Default for SpeedParams {
    fn default() -> Self {
        Self {
            velocity: Fixed::ZERO,
            acceleration: Fixed::from_int(1),
            deceleration: Fixed::from_int(1),
            stop_distance_mm: 0,
            stop_time_ticks: 0,
            last_velocity_update: Tick(0),
            last_stop_update: Tick(0),
        }
    }
}

/// Resolve the `speeds[]` index for a commanded speed level and hysteresis
/// direction. Speed 0 and 14 have a single entry each; speeds 1..=13 have
/// two, depending on whether the command arrived from a higher or lower
/// speed (accounting for motor hysteresis), giving `2*13 + 2 == 28` entries.
pub const fn table_index(speed: u8, from_higher: bool) -> usize {
    match speed {
        0 => 0,
        s if s >= MAX_SPEED => KINEMATIC_TABLE_SIZE - 1,
        s => 1 + (s as usize - 1) * 2 + if from_higher { 1 } else { 0 },
    }
}

/// One train's kinematic model: a seeded table, refined over time by
/// [`KinematicModel::calibrate_velocity`]/[`KinematicModel::calibrate_stop`].
///
/// The seed values are a synthetic straight-line ramp (not transcribed from
/// any real calibration run); see `DESIGN.md`.
#[derive(Debug, Clone)]
pub struct KinematicModel {
    pub train_id: TrainId,
    speeds: [SpeedParams; KINEMATIC_TABLE_SIZE],
}

impl KinematicModel {
    /// Build a freshly seeded model: velocity and stop distance scale
    /// roughly linearly with commanded speed.
    pub fn seeded(train_id: TrainId) -> Self {
        let mut speeds = [SpeedParams::default(); KINEMATIC_TABLE_SIZE];
        for level in 0..=MAX_SPEED {
            for &from_higher in &[false, true] {
                let idx = table_index(level, from_higher);
                let level_i64 = level as i64;
                speeds[idx] = SpeedParams {
                    velocity: Fixed::from_int(level_i64 * 4),
                    acceleration: Fixed::from_int(2),
                    deceleration: Fixed::from_int(3),
                    stop_distance_mm: (level as u32) * 120,
                    stop_time_ticks: (level as u64) * 40,
                    last_velocity_update: Tick(0),
                    last_stop_update: Tick(0),
                };
                if level == 0 || level == MAX_SPEED {
                    break;
                }
            }
        }
        Self { train_id, speeds }
    }

    pub fn params(&self, speed: u8, from_higher: bool) -> &SpeedParams {
        &self.speeds[table_index(speed, from_higher)]
    }

    pub fn velocity(&self, speed: u8, from_higher: bool) -> Fixed {
        self.params(speed, from_higher).velocity
    }

    pub fn stop_distance_mm(&self, speed: u8, from_higher: bool) -> u32 {
        self.params(speed, from_higher).stop_distance_mm
    }

    pub fn stop_time_ticks(&self, speed: u8, from_higher: bool) -> u64 {
        self.params(speed, from_higher).stop_time_ticks
    }

    /// Fold an observed velocity sample (mm/tick, measured between two
    /// sensor triggers) into the table via EWMA.
    pub fn calibrate_velocity(&mut self, speed: u8, from_higher: bool, observed: Fixed, now: Tick) {
        let idx = table_index(speed, from_higher);
        let entry = &mut self.speeds[idx];
        entry.velocity = ewma_update(entry.velocity, observed, EWMA_ALPHA_DENOM);
        entry.last_velocity_update = now;
    }

    /// Fold an observed stop distance/time sample (measured during an
    /// actual stop) into the table via EWMA.
    pub fn calibrate_stop(&mut self, speed: u8, from_higher: bool, observed_mm: u32, observed_ticks: u64, now: Tick) {
        let idx = table_index(speed, from_higher);
        let entry = &mut self.speeds[idx];
        let observed = Fixed::from_int(observed_mm as i64);
        let current = Fixed::from_int(entry.stop_distance_mm as i64);
        entry.stop_distance_mm = ewma_update(current, observed, EWMA_ALPHA_DENOM).to_int().max(0) as u32;
        let observed_t = Fixed::from_int(observed_ticks as i64);
        let current_t = Fixed::from_int(entry.stop_time_ticks as i64);
        entry.stop_time_ticks = ewma_update(current_t, observed_t, EWMA_ALPHA_DENOM).to_int().max(0) as u64;
        entry.last_stop_update = now;
    }
}

/// Collection of kinematic models, one per active train, built lazily.
#[derive(Debug, Default)]
pub struct KinematicModelCollection {
    models: HashMap<TrainId, KinematicModel>,
}

impl KinematicModelCollection {
    pub fn new() -> Self {
        Self { models: HashMap::new() }
    }

    pub fn get_or_seed(&mut self, train_id: TrainId) -> &mut KinematicModel {
        self.models.entry(train_id).or_insert_with(|| KinematicModel::seeded(train_id))
    }

    pub fn get(&self, train_id: TrainId) -> Option<&KinematicModel> {
        self.models.get(&train_id)
    }

    pub fn active_model_count(&self) -> usize {
        self.models.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_index_covers_all_28_slots_without_collision() {
        let mut seen = [false; KINEMATIC_TABLE_SIZE];
        for level in 0..=MAX_SPEED {
            for &from_higher in &[false, true] {
                let idx = table_index(level, from_higher);
                seen[idx] = true;
                if level == 0 || level == MAX_SPEED {
                    break;
                }
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn seeded_model_velocity_increases_with_speed() {
        let model = KinematicModel::seeded(TrainId(24));
        assert!(model.velocity(10, false) > model.velocity(5, false));
    }

    #[test]
    fn calibrate_velocity_moves_toward_observed_sample() {
        let mut model = KinematicModel::seeded(TrainId(24));
        let before = model.velocity(8, false);
        let observed = before.add(Fixed::from_int(20));
        for _ in 0..500 {
            model.calibrate_velocity(8, false, observed, Tick(1));
        }
        let after = model.velocity(8, false);
        assert!(after > before);
        assert!((after.to_int() - observed.to_int()).abs() <= 1);
    }

    #[test]
    fn collection_seeds_models_on_first_access() {
        let mut collection = KinematicModelCollection::new();
        assert_eq!(collection.active_model_count(), 0);
        collection.get_or_seed(TrainId(5));
        assert_eq!(collection.active_model_count(), 1);
        assert!(collection.get(TrainId(5)).is_some());
    }
}
