//! Hue BLE wire protocol - characteristic payloads and device scales
//!
//! Every characteristic carries a fixed-size little-endian payload. The
//! functions here convert between those payloads, the raw device-scale
//! integers and the normalized `0.0..=1.0` values exposed to callers.

mod gatt;

pub use gatt::{
    BRIGHTNESS_UUID, COLOR_UUID, MODEL_UUID, POWER_UUID, REQUIRED, TEMPERATURE_UUID,
};

/// Payload byte for "off"
pub const POWER_OFF: u8 = 0x00;
/// Payload byte for "on"
pub const POWER_ON: u8 = 0x01;

/// Highest brightness code; 0 is not writable and means "off"
pub const BRIGHTNESS_MAX: u8 = 0xFE;

/// Coolest color temperature in mireds
pub const TEMPERATURE_MIN: u16 = 153;
/// Warmest color temperature in mireds
pub const TEMPERATURE_MAX: u16 = 454;

/// Full scale of a color coordinate
pub const COLOR_MAX: u16 = 0xFFFF;

/// A payload that does not match its characteristic's format
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{attribute} payload must be {expected} byte(s), got {actual}")]
    Length {
        attribute: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("power payload must be 0x00 or 0x01, got 0x{0:02x}")]
    Power(u8),
    #[error("model payload is not ASCII")]
    Model,
}

fn exact<const N: usize>(attribute: &'static str, data: &[u8]) -> Result<[u8; N], DecodeError> {
    data.try_into().map_err(|_| DecodeError::Length {
        attribute,
        expected: N,
        actual: data.len(),
    })
}

/// Decode the model number, dropping trailing NUL padding
pub fn decode_model(data: &[u8]) -> Result<String, DecodeError> {
    if !data.is_ascii() {
        return Err(DecodeError::Model);
    }
    let text = String::from_utf8_lossy(data);
    Ok(text.trim_end_matches('\0').to_string())
}

pub fn decode_power(data: &[u8]) -> Result<bool, DecodeError> {
    match exact::<1>("power", data)? {
        [POWER_OFF] => Ok(false),
        [POWER_ON] => Ok(true),
        [other] => Err(DecodeError::Power(other)),
    }
}

pub fn encode_power(on: bool) -> [u8; 1] {
    [if on { POWER_ON } else { POWER_OFF }]
}

/// Decode the raw brightness code. 0 is passed through untouched.
pub fn decode_brightness(data: &[u8]) -> Result<u8, DecodeError> {
    let [code] = exact::<1>("brightness", data)?;
    Ok(code)
}

pub fn encode_brightness(code: u8) -> [u8; 1] {
    [code]
}

/// Quantize a normalized brightness to the nearest device code in `0..=254`
pub fn brightness_code(level: f64) -> u8 {
    (level.clamp(0.0, 1.0) * f64::from(BRIGHTNESS_MAX)).round() as u8
}

pub fn brightness_level(code: u8) -> f64 {
    f64::from(code) / f64::from(BRIGHTNESS_MAX)
}

pub fn decode_temperature(data: &[u8]) -> Result<u16, DecodeError> {
    Ok(u16::from_le_bytes(exact::<2>("temperature", data)?))
}

pub fn encode_temperature(mireds: u16) -> [u8; 2] {
    mireds.to_le_bytes()
}

/// Quantize a normalized temperature (0.0 coolest, 1.0 warmest) to mireds
pub fn temperature_code(level: f64) -> u16 {
    let span = f64::from(TEMPERATURE_MAX - TEMPERATURE_MIN);
    let mireds = TEMPERATURE_MIN + (level.clamp(0.0, 1.0) * span).round() as u16;
    mireds.min(TEMPERATURE_MAX)
}

pub fn temperature_level(mireds: u16) -> f64 {
    let span = f64::from(TEMPERATURE_MAX - TEMPERATURE_MIN);
    (f64::from(mireds.saturating_sub(TEMPERATURE_MIN)) / span).min(1.0)
}

/// CIE xy chromaticity in device scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub x: u16,
    pub y: u16,
}

impl Color {
    pub fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }

    /// Quantize normalized coordinates to the nearest device codes
    pub fn from_normalized(x: f64, y: f64) -> Self {
        let scale = |v: f64| (v.clamp(0.0, 1.0) * f64::from(COLOR_MAX)).round() as u16;
        Self {
            x: scale(x),
            y: scale(y),
        }
    }

    pub fn normalized(&self) -> (f64, f64) {
        (
            f64::from(self.x) / f64::from(COLOR_MAX),
            f64::from(self.y) / f64::from(COLOR_MAX),
        )
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        let [x0, x1] = self.x.to_le_bytes();
        let [y0, y1] = self.y.to_le_bytes();
        [x0, x1, y0, y1]
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let [x0, x1, y0, y1] = exact::<4>("color", data)?;
        Ok(Self {
            x: u16::from_le_bytes([x0, x1]),
            y: u16::from_le_bytes([y0, y1]),
        })
    }
}
