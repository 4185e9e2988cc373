//! System-wide constants for the Marklin workspace.
//!
//! Single source of truth for all numeric limits and default paths.
//! Imported by every crate — no duplication permitted.

/// Tick granularity, in milliseconds.
pub const TICK_MS: u64 = 10;

/// Maximum number of track nodes in the static graph.
pub const TRACK_MAX: usize = 144;

/// Maximum number of exit nodes.
pub const EXIT_NODE_MAX_COUNT: usize = 16;

/// Maximum number of track blocks.
pub const MAX_TRACK_BLOCKS: usize = 32;

/// Maximum boundary (entry or exit) sensors per block.
pub const MAX_BOUNDARY_SENSORS_PER_BLOCK: usize = 8;

/// Maximum internal sensors per block.
pub const MAX_INTERNAL_SENSORS_PER_BLOCK: usize = 8;

/// Maximum turnouts per block.
pub const MAX_TURNOUTS_PER_BLOCK: usize = 8;

/// Maximum connected-block references per block.
pub const MAX_CONNECTED_BLOCKS_PER_BLOCK: usize = 8;

/// Number of fixed-size path pools.
pub const MAX_PATH_POOLS: usize = 8;

/// Number of path nodes per path pool.
pub const PATH_POOL_SIZE: usize = 256;

/// Maximum nodes walked while iterating a path or predecessor chain before
/// a cycle is assumed and the walk aborts defensively.
pub const MAX_PATH_ITERATION: usize = 100;

/// Edge cost of a reversal in the doubled Dijkstra graph (mm-equivalent).
pub const PATH_COST_REVERSAL: u32 = 1000;

/// Number of sensor banks (A..E).
pub const SENSOR_BANKS: usize = 5;

/// Number of sensor ids per bank (1..16).
pub const SENSOR_IDS_PER_BANK: usize = 16;

/// Maximum number of per-subscription queued messages on the pub/sub bus.
pub const MAX_SUB_QUEUE: usize = 128;

/// Maximum simultaneously registered subscriptions.
pub const MAX_SUBSCRIPTIONS: usize = 64;

/// Maximum queued commands in the command scheduler's heap.
pub const MAX_SCHEDULED_COMMANDS: usize = 64;

/// Maximum number of trains running concurrently.
pub const MAX_TRAINS: usize = 16;

/// Minimum train speed level (inclusive).
pub const MIN_SPEED: u8 = 0;

/// Maximum train speed level (inclusive).
pub const MAX_SPEED: u8 = 14;

/// Number of kinematic table entries: 2 each for speeds 1..=13 (hysteresis),
/// 1 each for 0 and 14 => 2*13 + 2 = 28.
pub const KINEMATIC_TABLE_SIZE: usize = 28;

/// Sensor-trigger acceptance tolerance for interior sensors, in ticks (2 s).
pub const SENSOR_TOLERANCE_INTERIOR_TICKS: u64 = 200;

/// Sensor-trigger acceptance tolerance for block-boundary sensors, in ticks (3 s).
pub const SENSOR_TOLERANCE_BOUNDARY_TICKS: u64 = 300;

/// Minimum sensor timeout grace period, in ticks (4 s), used when 50% of the
/// expected travel time is smaller than this floor.
pub const SENSOR_TIMEOUT_MIN_GRACE_TICKS: u64 = 400;

/// Deadlock-detection failure-record expiry, in ticks (5 s).
pub const DEADLOCK_RECORD_EXPIRY_TICKS: u64 = 500;

/// Maximum number of recent path-activation failure records retained for
/// mutual-deadlock detection.
pub const MAX_DEADLOCK_RECORDS: usize = 32;

/// Initial conductor-failure retry backoff, in ticks (1 s).
pub const RETRY_BACKOFF_INITIAL_TICKS: u64 = 100;

/// Maximum conductor-failure retry backoff, in ticks (8 s).
pub const RETRY_BACKOFF_MAX_TICKS: u64 = 800;

/// Maximum number of retry attempts before giving up and surfacing the error.
pub const RETRY_BACKOFF_MAX_ATTEMPTS: u32 = 5;

/// Switch-command minimum quiet gap before another command on the line, in ticks (150 ms).
pub const SWITCH_GAP_TICKS: u64 = 15;

/// Switch-command minimum quiet gap when the solenoid will be disengaged, in ticks (250 ms).
pub const SWITCH_GAP_SOLENOID_TICKS: u64 = 25;

/// Delay before a scheduled follow-up `SolenoidOff`, in ticks (250 ms).
pub const SOLENOID_OFF_DELAY_TICKS: u64 = 25;

/// Sensor poll period, in ticks (~100 ms).
pub const SENSOR_POLL_PERIOD_TICKS: u64 = 10;

/// Waypoint path-find retry period while in `PathState::None`, in ticks (2 s).
pub const PATH_FIND_RETRY_PERIOD_TICKS: u64 = 200;

/// Physical length of a train consist, in millimetres, used to compensate
/// stopping offsets so the train's far end (not just its front) clears
/// the target.
pub const TRAIN_LENGTH_MM: u32 = 200;

/// Default distance budget for a single path activation, in millimetres.
/// Bounds how far ahead of its current position a train reserves track in
/// one call, regardless of how much further the found path continues.
pub const PATH_ACTIVATION_BUDGET_MM: u32 = 3000;

/// Fixed-point scale applied to velocity and acceleration (10^8).
pub const KINEMATIC_SCALE: i64 = 100_000_000;

/// Fixed-point scale applied to resistance coefficients (1000 = 1.0).
pub const RESISTANCE_SCALE: u32 = 1000;

/// EWMA smoothing factor denominator for online kinematic calibration (alpha = 1/256).
pub const EWMA_ALPHA_DENOM: i64 = 256;

/// Default configuration directory.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/marklin/config";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(TRACK_MAX > 0 && TRACK_MAX <= u16::MAX as usize);
        assert!(MAX_TRACK_BLOCKS > 0);
        assert_eq!(KINEMATIC_TABLE_SIZE, 2 * 13 + 2);
        assert!(MAX_SPEED as usize + 1 <= 32);
        assert!(RETRY_BACKOFF_INITIAL_TICKS * (1 << (RETRY_BACKOFF_MAX_ATTEMPTS - 1)) >= RETRY_BACKOFF_MAX_TICKS);
    }

    #[test]
    fn sensor_bank_layout_matches_wire_format() {
        // 5 banks * 16 ids = 80 physical sensors, 2 bytes per bank on the wire.
        assert_eq!(SENSOR_BANKS * SENSOR_IDS_PER_BANK, 80);
    }

    #[test]
    fn path_pool_capacity_covers_track_max() {
        assert!(PATH_POOL_SIZE >= MAX_PATH_ITERATION);
    }
}
