//! Marklin UART wire format helpers (§6).
//!
//! One- or two-byte opcodes at 2400 baud, 8N1, with hardware CTS. Sensor
//! reports come back bit-reversed per bank (hardware byte order).

use marklin_common::ids::{SwitchId, TrainId};

/// `21 + switch id` — set a branch to `Straight`.
pub const OPCODE_SWITCH_STRAIGHT: u8 = 0x21;
/// `22 + switch id` — set a branch to `Curved`.
pub const OPCODE_SWITCH_CURVED: u8 = 0x22;
/// `20` — disengage all switch solenoids.
pub const OPCODE_SOLENOID_OFF: u8 = 0x20;
/// `80` — sensor reset off.
pub const OPCODE_SENSOR_RESET_OFF: u8 = 0x80;
/// `85` — report all 5 sensor banks (returns 10 bytes).
pub const OPCODE_REPORT_ALL_BANKS: u8 = 0x85;
/// `15` — reverse direction, `+16` if headlight is on.
pub const OPCODE_REVERSE: u8 = 0x15;
/// Added to the speed/reverse opcode when the headlight should be on.
pub const HEADLIGHT_BIT: u8 = 16;

/// Number of raw bytes returned by [`OPCODE_REPORT_ALL_BANKS`] (2 per bank, 5 banks).
pub const SENSOR_REPORT_BYTES: usize = 10;

/// `21 <id>`: set switch `id` to `Straight`.
pub fn switch_straight(id: SwitchId) -> [u8; 2] {
    [OPCODE_SWITCH_STRAIGHT, id.0]
}

/// `22 <id>`: set switch `id` to `Curved`.
pub fn switch_curved(id: SwitchId) -> [u8; 2] {
    [OPCODE_SWITCH_CURVED, id.0]
}

/// `20`: disengage switch solenoids.
pub fn solenoid_off() -> [u8; 1] {
    [OPCODE_SOLENOID_OFF]
}

/// `80`: sensor reset off.
pub fn sensor_reset_off() -> [u8; 1] {
    [OPCODE_SENSOR_RESET_OFF]
}

/// `85`: request a report of all 5 sensor banks.
pub fn report_all_banks() -> [u8; 1] {
    [OPCODE_REPORT_ALL_BANKS]
}

/// `<speed [+16]> <train id>`: set a train's commanded speed.
pub fn train_speed(train: TrainId, speed: u8, headlight: bool) -> [u8; 2] {
    let opcode = speed + if headlight { HEADLIGHT_BIT } else { 0 };
    [opcode, train.0]
}

/// Emergency stop: speed 0 for `train`, to be enqueued at `Priority::Critical`.
pub fn emergency_stop(train: TrainId, headlight: bool) -> [u8; 2] {
    train_speed(train, 0, headlight)
}

/// `15 [+16] <train id>`: reverse direction.
pub fn reverse(train: TrainId, headlight: bool) -> [u8; 2] {
    let opcode = OPCODE_REVERSE + if headlight { HEADLIGHT_BIT } else { 0 };
    [opcode, train.0]
}

/// True if `bytes` is exactly the solenoid-off opcode (used for scheduler dedup).
pub fn is_solenoid_off(bytes: &[u8]) -> bool {
    bytes == [OPCODE_SOLENOID_OFF]
}

/// Decode 10 raw report bytes (MSB-first per bank, bit-reversed from the
/// physical order) into 5 banks of 16 sensor bits.
pub fn decode_sensor_banks(raw: &[u8; SENSOR_REPORT_BYTES]) -> [u16; 5] {
    let mut banks = [0u16; 5];
    for (i, bank) in banks.iter_mut().enumerate() {
        let hi = raw[2 * i].reverse_bits();
        let lo = raw[2 * i + 1].reverse_bits();
        *bank = ((hi as u16) << 8) | lo as u16;
    }
    banks
}
