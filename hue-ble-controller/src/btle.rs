//! [`Central`] and [`Link`] on top of btleplug

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central as _, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{BoxStream, StreamExt};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::{
    Advertisement, Central, Link, NotificationHandler, ReleaseGuard, Releases, Target, WriteMode,
};

/// How long an address target may take to show up in a scan
const RESOLVE_WINDOW: Duration = Duration::from_secs(5);
const RESOLVE_POLL: Duration = Duration::from_millis(250);

type Handlers = Arc<Mutex<HashMap<Uuid, NotificationHandler>>>;

/// The first Bluetooth adapter of the host
#[derive(Clone)]
pub struct BtleCentral {
    adapter: Adapter,
    releases: Releases,
}

impl BtleCentral {
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters.into_iter().next().ok_or(TransportError::NoAdapter)?;
        Ok(Self {
            adapter,
            releases: Releases::default(),
        })
    }

    async fn find(&self, address: &str) -> Result<Option<Peripheral>, TransportError> {
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.address().to_string().eq_ignore_ascii_case(address) {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }

    /// Look the address up among known peripherals, scanning for it if needed
    async fn resolve(&self, address: &str) -> Result<Peripheral, TransportError> {
        if let Some(peripheral) = self.find(address).await? {
            return Ok(peripheral);
        }

        debug!(address, "scanning to resolve address");
        self.adapter.start_scan(ScanFilter::default()).await?;
        let deadline = Instant::now() + RESOLVE_WINDOW;
        let found = loop {
            if let Some(peripheral) = self.find(address).await? {
                break Some(peripheral);
            }
            if Instant::now() >= deadline {
                break None;
            }
            sleep(RESOLVE_POLL).await;
        };
        if let Err(err) = self.adapter.stop_scan().await {
            debug!(%err, "failed to stop scan");
        }

        found.ok_or_else(|| TransportError::NotFound(address.to_string()))
    }
}

#[async_trait]
impl Central for BtleCentral {
    type Device = Peripheral;
    type Link = BtleLink;

    async fn scan(&self) -> Result<BoxStream<'static, Advertisement<Peripheral>>, TransportError> {
        let events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        let adapter = self.adapter.clone();
        let adverts = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => return None,
                };
                let peripheral = adapter.peripheral(&id).await.ok()?;
                let properties = peripheral.properties().await.ok().flatten();
                Some(Advertisement {
                    address: peripheral.address().to_string(),
                    name: properties.and_then(|p| p.local_name),
                    device: peripheral,
                })
            }
        });
        Ok(adverts.boxed())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(
        &self,
        target: &Target<Peripheral>,
        timeout: Option<Duration>,
    ) -> Result<BtleLink, TransportError> {
        let peripheral = match target {
            Target::Device(peripheral) => peripheral.clone(),
            Target::Address(address) => self.resolve(address).await?,
        };

        let open = BtleLink::open(peripheral, &self.releases);
        let Some(limit) = timeout else {
            return open.await;
        };
        // a timed out open is released by its guard
        tokio::time::timeout(limit, open).await.unwrap_or_else(|_| {
            debug!(?limit, "connection timed out");
            Err(TransportError::Timeout)
        })
    }

    async fn settle(&self) {
        self.releases.settle().await;
    }
}

/// A connected peripheral with its notification pump
pub struct BtleLink {
    peripheral: Peripheral,
    handlers: Handlers,
    pump: JoinHandle<()>,
}

impl BtleLink {
    /// Connect and set up notifications. If the returned future is dropped
    /// half way, the connection is closed in the background.
    async fn open(peripheral: Peripheral, releases: &Releases) -> Result<Self, TransportError> {
        let guard = ReleaseGuard::new(releases, {
            let peripheral = peripheral.clone();
            async move {
                if let Err(err) = peripheral.disconnect().await {
                    warn!(%err, "failed to release abandoned connection");
                }
            }
        });

        let attached = match peripheral.connect().await {
            Ok(()) => Self::attach(peripheral.clone()).await,
            Err(e) => Err(e.into()),
        };
        guard.disarm();

        match attached {
            Ok(link) => Ok(link),
            Err(e) => {
                if let Err(err) = peripheral.disconnect().await {
                    warn!(%err, "failed to disconnect after setup error");
                }
                Err(e)
            }
        }
    }

    async fn attach(peripheral: Peripheral) -> Result<Self, TransportError> {
        peripheral.discover_services().await?;

        let mut notifications = peripheral.notifications().await?;
        let handlers = Handlers::default();
        let pump = tokio::spawn({
            let handlers = handlers.clone();
            async move {
                while let Some(notification) = notifications.next().await {
                    trace!(uuid = %notification.uuid, len = notification.value.len(), "notification");
                    let handlers = handlers.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Some(handler) = handlers.get(&notification.uuid) {
                        handler(&notification.value);
                    }
                }
            }
        });

        Ok(Self {
            peripheral,
            handlers,
            pump,
        })
    }

    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::MissingCharacteristic(uuid))
    }
}

impl Drop for BtleLink {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[async_trait]
impl Link for BtleLink {
    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn characteristics(&self) -> Result<HashSet<Uuid>, TransportError> {
        Ok(self
            .peripheral
            .services()
            .iter()
            .flat_map(|service| service.characteristics.iter().map(|c| c.uuid))
            .collect())
    }

    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>, TransportError> {
        let characteristic = self.characteristic(uuid)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    async fn write(&self, uuid: Uuid, data: &[u8], mode: WriteMode) -> Result<(), TransportError> {
        let characteristic = self.characteristic(uuid)?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        self.peripheral.write(&characteristic, data, write_type).await?;
        Ok(())
    }

    async fn subscribe(&self, uuid: Uuid, handler: NotificationHandler) -> Result<(), TransportError> {
        let characteristic = self.characteristic(uuid)?;
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uuid, handler);

        if let Err(e) = self.peripheral.subscribe(&characteristic).await {
            self.handlers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&uuid);
            return Err(e.into());
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.pump.abort();
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
