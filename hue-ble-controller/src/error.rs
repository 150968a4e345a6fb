use uuid::Uuid;

pub use hue_ble_proto::DecodeError;

/// Failure of the BLE stack underneath a lamp operation
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Ble(#[from] btleplug::Error),
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("device {0} not found")]
    NotFound(String),
    #[error("characteristic {0} not found")]
    MissingCharacteristic(Uuid),
    #[error("connection timed out")]
    Timeout,
    #[error("connection lost")]
    Disconnected,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    #[error("lamp is not connected")]
    NotConnected,
}
