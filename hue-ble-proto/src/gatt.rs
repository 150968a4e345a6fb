//! GATT characteristics exposed by Philips Hue Bluetooth lamps
//!
//! All of them live on the lamp's light control service. A device is only
//! treated as a lamp when every entry of [`REQUIRED`] is present.

use uuid::Uuid;

/// Model number as an ASCII string (standard Device Information characteristic)
pub const MODEL_UUID: Uuid = Uuid::from_u128(0x00002a24_0000_1000_8000_00805f9b34fb);

/// Power state, one byte: 0x00 off, 0x01 on (read/write/notify)
pub const POWER_UUID: Uuid = Uuid::from_u128(0x932c32bd_0002_47a2_835a_a8d455b859dd);

/// Brightness, one byte in 1..=254 (read/write/notify)
pub const BRIGHTNESS_UUID: Uuid = Uuid::from_u128(0x932c32bd_0003_47a2_835a_a8d455b859dd);

/// Color temperature in mireds, u16 little-endian in 153..=454 (read/write/notify)
pub const TEMPERATURE_UUID: Uuid = Uuid::from_u128(0x932c32bd_0004_47a2_835a_a8d455b859dd);

/// CIE xy color, two u16 little-endian scaled to 0..=0xFFFF (read/write/notify)
pub const COLOR_UUID: Uuid = Uuid::from_u128(0x932c32bd_0005_47a2_835a_a8d455b859dd);

/// Characteristics a candidate must expose to be accepted during discovery
pub const REQUIRED: [Uuid; 5] = [
    MODEL_UUID,
    POWER_UUID,
    BRIGHTNESS_UUID,
    TEMPERATURE_UUID,
    COLOR_UUID,
];
