//! A session with one lamp
//!
//! [`Lamp::connect`] opens a connection and mirrors the model, power,
//! brightness and color characteristics locally. The mirror follows the
//! device through notifications, so getters never touch the radio and
//! setters only write when the quantized value differs from the mirror.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use hue_ble_proto::{
    self as proto, BRIGHTNESS_UUID, COLOR_UUID, Color, DecodeError, MODEL_UUID, POWER_UUID,
    TEMPERATURE_UUID,
};

use crate::color::{Converter, Rgb, XyPoint};
use crate::discovery::{self, Endpoint};
use crate::error::{Error, TransportError};
use crate::transport::{Central, Link, Target, WriteMode};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Mirrored characteristics that follow the device through notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attribute {
    Power,
    Brightness,
    Color,
}

impl Attribute {
    const ALL: [Attribute; 3] = [Attribute::Power, Attribute::Brightness, Attribute::Color];

    fn uuid(self) -> Uuid {
        match self {
            Self::Power => POWER_UUID,
            Self::Brightness => BRIGHTNESS_UUID,
            Self::Color => COLOR_UUID,
        }
    }
}

/// Last known device state. `None` means not read yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Mirror {
    model: Option<String>,
    power: Option<bool>,
    brightness: Option<u8>,
    color: Option<Color>,
}

impl Mirror {
    /// Decode `payload` into the mirror. On error the mirror is untouched.
    fn apply(&mut self, attribute: Attribute, payload: &[u8]) -> Result<(), DecodeError> {
        match attribute {
            Attribute::Power => self.power = Some(proto::decode_power(payload)?),
            Attribute::Brightness => self.brightness = Some(proto::decode_brightness(payload)?),
            Attribute::Color => self.color = Some(Color::from_bytes(payload)?),
        }
        Ok(())
    }

    fn is_populated(&self) -> bool {
        self.model.is_some()
            && self.power.is_some()
            && self.brightness.is_some()
            && self.color.is_some()
    }
}

type SharedMirror = Arc<Mutex<Mirror>>;

fn lock(mirror: &SharedMirror) -> MutexGuard<'_, Mirror> {
    mirror.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A Philips Hue Bluetooth lamp
pub struct Lamp<C: Central> {
    central: C,
    address: String,
    name: Option<String>,
    target: Target<C::Device>,
    connect_timeout: Option<Duration>,
    link: Option<C::Link>,
    /// Replaced on every connect and disconnect, so handlers of an earlier
    /// connection can no longer reach the current mirror
    mirror: SharedMirror,
    converter: Option<Converter>,
}

impl<C: Central> Lamp<C> {
    /// A session reaching the lamp by address
    pub fn new(central: C, address: impl Into<String>, name: Option<String>) -> Self {
        let address = address.into();
        let target = Target::Address(address.clone());
        Self::with_target(central, address, name, target)
    }

    /// A session for a discovered endpoint, reusing its device handle
    pub fn from_endpoint(central: C, endpoint: Endpoint<C::Device>) -> Self {
        let target = endpoint.target();
        Self::with_target(central, endpoint.address, endpoint.name, target)
    }

    fn with_target(
        central: C,
        address: String,
        name: Option<String>,
        target: Target<C::Device>,
    ) -> Self {
        Self {
            central,
            address,
            name,
            target,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            link: None,
            mirror: SharedMirror::default(),
            converter: None,
        }
    }

    /// Discover nearby lamps, see [`discovery::discover`]
    pub async fn discover(central: &C, timeout: Duration) -> Result<Vec<Self>, Error> {
        let endpoints = discovery::discover(central, timeout).await?;
        Ok(endpoints
            .into_iter()
            .map(|endpoint| Self::from_endpoint(central.clone(), endpoint))
            .collect())
    }

    /// Deadline for opening the connection, `None` to wait indefinitely
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Connected, and every mirrored attribute has been read at least once
    pub async fn is_connected(&self) -> bool {
        let Some(link) = &self.link else {
            return false;
        };
        let populated = lock(&self.mirror).is_populated();
        populated && link.is_connected().await
    }

    /// Open a new connection and bring the mirror up to date. Any previous
    /// connection is closed first. On error the session stays disconnected.
    pub async fn connect(&mut self) -> Result<(), Error> {
        if self.link.is_some() {
            self.disconnect().await?;
        }
        self.reset();

        let link = self.central.connect(&self.target, self.connect_timeout).await?;
        match self.bootstrap(&link).await {
            Ok(()) => {
                self.link = Some(link);
                info!(lamp = %self, model = ?self.model(), "connected");
                Ok(())
            }
            Err(e) => {
                if let Err(err) = link.disconnect().await {
                    warn!(lamp = %self, %err, "failed to disconnect after bootstrap error");
                }
                self.reset();
                Err(e)
            }
        }
    }

    async fn bootstrap(&mut self, link: &C::Link) -> Result<(), Error> {
        let model = proto::decode_model(&link.read(MODEL_UUID).await?)?;
        self.converter = Some(Converter::for_model(&model));
        lock(&self.mirror).model = Some(model);

        for attribute in Attribute::ALL {
            // subscribe first so an update racing the read is not lost
            let mirror = self.mirror.clone();
            let address = self.address.clone();
            link.subscribe(
                attribute.uuid(),
                Box::new(move |payload: &[u8]| {
                    if let Err(err) = lock(&mirror).apply(attribute, payload) {
                        warn!(%address, ?attribute, %err, "dropping malformed notification");
                    }
                }),
            )
            .await?;

            let payload = link.read(attribute.uuid()).await?;
            lock(&self.mirror).apply(attribute, &payload)?;
        }
        Ok(())
    }

    /// Close the connection. Mirrored values become unknown.
    pub async fn disconnect(&mut self) -> Result<(), Error> {
        let link = self.link.take();
        self.reset();
        if let Some(link) = link {
            link.disconnect().await?;
            info!(lamp = %self, "disconnected");
        }
        Ok(())
    }

    /// Disconnect, then hand back `result`. An error in `result` takes
    /// precedence over one from disconnecting.
    pub async fn finish<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        let closed = self.disconnect().await;
        let value = result?;
        closed?;
        Ok(value)
    }

    fn reset(&mut self) {
        self.mirror = SharedMirror::default();
        self.converter = None;
    }

    fn link(&self) -> Result<&C::Link, Error> {
        self.link.as_ref().ok_or(Error::NotConnected)
    }

    /// The link, provided the peer is still there. Setters check this
    /// before comparing with the mirror so a dropped connection is reported
    /// even when nothing would be written.
    async fn live_link(&self) -> Result<&C::Link, Error> {
        let link = self.link()?;
        if !link.is_connected().await {
            return Err(TransportError::Disconnected.into());
        }
        Ok(link)
    }

    fn mirror(&self) -> MutexGuard<'_, Mirror> {
        lock(&self.mirror)
    }

    pub fn model(&self) -> Option<String> {
        self.mirror().model.clone()
    }

    pub fn get_power(&self) -> Option<bool> {
        self.mirror().power
    }

    pub async fn set_power(&self, on: bool) -> Result<(), Error> {
        let link = self.live_link().await?;
        if self.mirror().power == Some(on) {
            debug!(lamp = %self, on, "power unchanged");
            return Ok(());
        }
        link.write(POWER_UUID, &proto::encode_power(on), WriteMode::WithResponse)
            .await?;
        self.mirror().power = Some(on);
        Ok(())
    }

    /// Brightness in `0.0..=1.0`
    pub fn get_brightness(&self) -> Option<f64> {
        self.mirror().brightness.map(proto::brightness_level)
    }

    /// Set brightness in `0.0..=1.0` and make sure the lamp is on. A level
    /// that rounds to zero turns the lamp off instead.
    pub async fn set_brightness(&self, level: f64) -> Result<(), Error> {
        let link = self.live_link().await?;
        let code = proto::brightness_code(level);
        if code == 0 {
            return self.set_power(false).await;
        }

        if self.mirror().brightness != Some(code) {
            link.write(
                BRIGHTNESS_UUID,
                &proto::encode_brightness(code),
                WriteMode::WithResponse,
            )
            .await?;
            self.mirror().brightness = Some(code);
        } else {
            debug!(lamp = %self, code, "brightness unchanged");
        }

        self.set_power(true).await
    }

    /// CIE xy color, both coordinates in `0.0..=1.0`
    pub fn get_color(&self) -> Option<(f64, f64)> {
        self.mirror().color.map(|color| color.normalized())
    }

    pub async fn set_color(&self, x: f64, y: f64) -> Result<(), Error> {
        let link = self.live_link().await?;
        let color = Color::from_normalized(x, y);
        if self.mirror().color == Some(color) {
            debug!(lamp = %self, ?color, "color unchanged");
            return Ok(());
        }
        link.write(COLOR_UUID, &color.to_bytes(), WriteMode::WithResponse)
            .await?;
        self.mirror().color = Some(color);
        Ok(())
    }

    pub fn get_color_rgb(&self) -> Option<Rgb> {
        let converter = self.converter?;
        let (x, y) = self.get_color()?;
        Some(converter.xy_to_rgb(XyPoint::new(x, y)))
    }

    pub async fn set_color_rgb(&self, rgb: Rgb) -> Result<(), Error> {
        let converter = self.converter.ok_or(Error::NotConnected)?;
        let xy = converter.rgb_to_xy(rgb);
        self.set_color(xy.x, xy.y).await
    }

    /// Color temperature read from the device, 0.0 coolest to 1.0 warmest
    pub async fn get_temperature(&self) -> Result<f64, Error> {
        let payload = self.link()?.read(TEMPERATURE_UUID).await?;
        Ok(proto::temperature_level(proto::decode_temperature(&payload)?))
    }

    pub async fn set_temperature(&self, level: f64) -> Result<(), Error> {
        let mireds = proto::temperature_code(level);
        self.link()?
            .write(
                TEMPERATURE_UUID,
                &proto::encode_temperature(mireds),
                WriteMode::WithResponse,
            )
            .await?;
        Ok(())
    }
}

impl<C: Central> fmt::Display for Lamp<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}
