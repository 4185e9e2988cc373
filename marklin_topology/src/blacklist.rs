//! Sensor blacklist (§4.6 "unless the sensor is blacklisted").
//!
//! Grounded on `topology/api.h`'s `sensor_blacklist_t`/`Marklin_*Blacklisted*`
//! API; reimplemented here as a plain in-process set rather than a fixed
//! array, since the service already runs behind a single-owner thread.

use std::collections::HashSet;

/// One physical sensor address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SensorAddr {
    pub bank: u8,
    pub sensor_id: u8,
}

/// The set of sensors the conductor should never act on, even if triggered
/// (known-faulty detectors).
#[derive(Debug, Default)]
pub struct SensorBlacklist {
    entries: HashSet<SensorAddr>,
}

impl SensorBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, bank: u8, sensor_id: u8) {
        self.entries.insert(SensorAddr { bank, sensor_id });
    }

    pub fn remove(&mut self, bank: u8, sensor_id: u8) {
        self.entries.remove(&SensorAddr { bank, sensor_id });
    }

    pub fn contains(&self, bank: u8, sensor_id: u8) -> bool {
        self.entries.contains(&SensorAddr { bank, sensor_id })
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorAddr> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_contains() {
        let mut bl = SensorBlacklist::new();
        assert!(!bl.contains(0, 5));
        bl.add(0, 5);
        assert!(bl.contains(0, 5));
    }

    #[test]
    fn remove_clears_membership() {
        let mut bl = SensorBlacklist::new();
        bl.add(2, 9);
        bl.remove(2, 9);
        assert!(!bl.contains(2, 9));
    }

    #[test]
    fn duplicate_add_is_idempotent() {
        let mut bl = SensorBlacklist::new();
        bl.add(1, 1);
        bl.add(1, 1);
        assert_eq!(bl.len(), 1);
    }
}
