//! Hue BLE Controller
//!
//! Discovery and stateful control of Philips Hue Bluetooth lamps.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use hue_ble_controller::{BtleCentral, Lamp, Rgb};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let central = BtleCentral::new().await?;
//!
//!     // Scan for lamps
//!     let mut lamps = Lamp::discover(&central, Duration::from_secs(5)).await?;
//!     let Some(lamp) = lamps.first_mut() else {
//!         return Ok(());
//!     };
//!
//!     // Connect and change its state
//!     lamp.connect().await?;
//!     lamp.set_brightness(0.5).await?;
//!     lamp.set_color_rgb(Rgb::new(1.0, 0.5, 0.0)).await?;
//!     println!("{lamp} is {:?}", lamp.get_power());
//!
//!     lamp.disconnect().await?;
//!     Ok(())
//! }
//! ```

mod btle;
mod color;
mod discovery;
mod error;
#[cfg(test)]
mod fake;
mod lamp;
mod transport;

pub use btle::{BtleCentral, BtleLink};
pub use color::{Converter, Gamut, Rgb, XyPoint, gamut_for_model};
pub use discovery::{Endpoint, discover};
pub use error::{DecodeError, Error, TransportError};
pub use lamp::Lamp;
pub use transport::{Advertisement, Central, Link, NotificationHandler, Target, WriteMode};

pub use hue_ble_proto as proto;
