//! In-memory [`Central`] used by the tests
//!
//! Devices are plain maps from characteristic UUID to value. Every
//! transport call is recorded so tests can assert on ordering and on the
//! writes that reached the "device".

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use uuid::Uuid;

use hue_ble_proto::{BRIGHTNESS_UUID, COLOR_UUID, MODEL_UUID, POWER_UUID, TEMPERATURE_UUID};

use crate::error::TransportError;
use crate::transport::{
    Advertisement, Central, Link, NotificationHandler, ReleaseGuard, Releases, Target, WriteMode,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    Connect(String),
    Subscribe(Uuid),
    Read(Uuid),
    Write(Uuid, Vec<u8>),
    Disconnect(String),
}

#[derive(Default)]
struct Device {
    values: HashMap<Uuid, Vec<u8>>,
    hang: Option<Hang>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Hang {
    /// The radio link comes up but connect never returns
    Connect,
    /// Connect returns, listing characteristics never does
    Enumerate,
}

type SharedHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

#[derive(Default)]
struct State {
    devices: Mutex<HashMap<String, Device>>,
    adverts: Mutex<Vec<(String, Option<String>)>>,
    ops: Mutex<Vec<Op>>,
    handlers: Mutex<HashMap<Uuid, SharedHandler>>,
    race: Mutex<HashMap<Uuid, Vec<u8>>>,
    fail_writes: AtomicBool,
    releases: Releases,
}

#[derive(Clone, Default)]
pub(crate) struct FakeCentral {
    state: Arc<State>,
}

impl FakeCentral {
    /// A lamp that is on, at brightness 100, color (0x4000, 0x5000)
    pub(crate) fn add_lamp(&self, address: &str, model: &str) {
        let values = HashMap::from([
            (MODEL_UUID, model.as_bytes().to_vec()),
            (POWER_UUID, vec![0x01]),
            (BRIGHTNESS_UUID, vec![100]),
            (TEMPERATURE_UUID, vec![0x99, 0x00]),
            (COLOR_UUID, vec![0x00, 0x40, 0x00, 0x50]),
        ]);
        self.state
            .devices
            .lock()
            .unwrap()
            .insert(address.to_string(), Device { values, hang: None });
    }

    pub(crate) fn add_device(&self, address: &str, characteristics: &[Uuid]) {
        let values = characteristics.iter().map(|uuid| (*uuid, vec![0])).collect();
        self.state
            .devices
            .lock()
            .unwrap()
            .insert(address.to_string(), Device { values, hang: None });
    }

    pub(crate) fn hang(&self, address: &str, hang: Hang) {
        if let Some(device) = self.state.devices.lock().unwrap().get_mut(address) {
            device.hang = Some(hang);
        }
    }

    pub(crate) fn advertise(&self, address: &str, name: Option<&str>) {
        self.state
            .adverts
            .lock()
            .unwrap()
            .push((address.to_string(), name.map(str::to_string)));
    }

    pub(crate) fn set_value(&self, address: &str, uuid: Uuid, value: &[u8]) {
        if let Some(device) = self.state.devices.lock().unwrap().get_mut(address) {
            device.values.insert(uuid, value.to_vec());
        }
    }

    pub(crate) fn value(&self, address: &str, uuid: Uuid) -> Option<Vec<u8>> {
        let devices = self.state.devices.lock().unwrap();
        devices.get(address)?.values.get(&uuid).cloned()
    }

    /// Push a notification to whoever subscribed to `uuid`
    pub(crate) fn notify(&self, uuid: Uuid, payload: &[u8]) -> bool {
        let handler = self.state.handlers.lock().unwrap().get(&uuid).cloned();
        match handler {
            Some(handler) => {
                handler(payload);
                true
            }
            None => false,
        }
    }

    /// Deliver `payload` on `uuid` as soon as a subscription is made,
    /// before the subscribing call returns
    pub(crate) fn race_on_subscribe(&self, uuid: Uuid, payload: &[u8]) {
        self.state.race.lock().unwrap().insert(uuid, payload.to_vec());
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// The device goes away; further calls on open links fail
    pub(crate) fn remove(&self, address: &str) {
        self.state.devices.lock().unwrap().remove(address);
    }

    pub(crate) fn ops(&self) -> Vec<Op> {
        self.state.ops.lock().unwrap().clone()
    }

    pub(crate) fn writes(&self, uuid: Uuid) -> Vec<Vec<u8>> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Write(u, data) if u == uuid => Some(data),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn count(&self, predicate: impl Fn(&Op) -> bool) -> usize {
        self.ops().iter().filter(|op| predicate(op)).count()
    }

    pub(crate) fn clear_ops(&self) {
        self.state.ops.lock().unwrap().clear();
    }

    fn record(&self, op: Op) {
        self.state.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl Central for FakeCentral {
    type Device = String;
    type Link = FakeLink;

    async fn scan(&self) -> Result<BoxStream<'static, Advertisement<String>>, TransportError> {
        let adverts: Vec<_> = self
            .state
            .adverts
            .lock()
            .unwrap()
            .iter()
            .map(|(address, name)| Advertisement {
                address: address.clone(),
                name: name.clone(),
                device: address.clone(),
            })
            .collect();
        Ok(stream::iter(adverts).boxed())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn settle(&self) {
        self.state.releases.settle().await;
    }

    async fn connect(
        &self,
        target: &Target<String>,
        _timeout: Option<Duration>,
    ) -> Result<FakeLink, TransportError> {
        let address = match target {
            Target::Address(address) | Target::Device(address) => address.clone(),
        };
        let hang = match self.state.devices.lock().unwrap().get(&address) {
            Some(device) => device.hang,
            None => return Err(TransportError::NotFound(address)),
        };
        self.record(Op::Connect(address.clone()));

        if hang == Some(Hang::Connect) {
            let _guard = ReleaseGuard::new(&self.state.releases, {
                let central = self.clone();
                let address = address.clone();
                async move { central.record(Op::Disconnect(address)) }
            });
            std::future::pending::<()>().await;
        }

        Ok(FakeLink {
            address,
            central: self.clone(),
            open: AtomicBool::new(true),
        })
    }
}

pub(crate) struct FakeLink {
    address: String,
    central: FakeCentral,
    open: AtomicBool,
}

impl FakeLink {
    fn with_device<T>(&self, f: impl FnOnce(&mut Device) -> T) -> Result<T, TransportError> {
        let gone = || TransportError::NotFound(self.address.clone());
        if !self.open.load(Ordering::SeqCst) {
            return Err(gone());
        }
        let mut devices = self.central.state.devices.lock().unwrap();
        devices.get_mut(&self.address).map(f).ok_or_else(gone)
    }
}

#[async_trait]
impl Link for FakeLink {
    async fn is_connected(&self) -> bool {
        self.with_device(|_| ()).is_ok()
    }

    async fn characteristics(&self) -> Result<HashSet<Uuid>, TransportError> {
        let (hang, uuids): (Option<Hang>, HashSet<Uuid>) =
            self.with_device(|device| (device.hang, device.values.keys().copied().collect()))?;
        if hang == Some(Hang::Enumerate) {
            std::future::pending::<()>().await;
        }
        Ok(uuids)
    }

    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>, TransportError> {
        self.central.record(Op::Read(uuid));
        self.with_device(|device| device.values.get(&uuid).cloned())?
            .ok_or(TransportError::MissingCharacteristic(uuid))
    }

    async fn write(&self, uuid: Uuid, data: &[u8], _mode: WriteMode) -> Result<(), TransportError> {
        self.central.record(Op::Write(uuid, data.to_vec()));
        if self.central.state.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Timeout);
        }
        self.with_device(|device| device.values.insert(uuid, data.to_vec()))?;
        Ok(())
    }

    async fn subscribe(&self, uuid: Uuid, handler: NotificationHandler) -> Result<(), TransportError> {
        self.with_device(|_| ())?;
        self.central.record(Op::Subscribe(uuid));
        let handler: SharedHandler = Arc::from(handler);
        self.central
            .state
            .handlers
            .lock()
            .unwrap()
            .insert(uuid, handler.clone());

        let race = self.central.state.race.lock().unwrap().get(&uuid).cloned();
        if let Some(payload) = race {
            handler(&payload);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.central.record(Op::Disconnect(self.address.clone()));
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}
