//! BLE transport traits
//!
//! The discovery engine and lamp sessions only talk to the radio through
//! [`Central`] and [`Link`]. [`crate::btle`] implements them on top of
//! btleplug; tests use an in-memory fake.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::error::TransportError;

/// Callback invoked with the raw payload of every notification
pub type NotificationHandler = Box<dyn Fn(&[u8]) + Send + Sync + 'static>;

/// What to connect to: a bare address that has to be resolved first, or a
/// platform handle obtained from a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target<D> {
    Address(String),
    Device(D),
}

/// One advertisement seen during a scan
#[derive(Debug, Clone)]
pub struct Advertisement<D> {
    pub address: String,
    pub name: Option<String>,
    pub device: D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Wait for the device to acknowledge the write
    WithResponse,
    WithoutResponse,
}

/// BLE central role: scanning and opening connections
#[async_trait]
pub trait Central: Clone + Send + Sync + 'static {
    /// Platform handle of a peripheral
    type Device: Clone + Send + Sync + 'static;
    /// A live connection
    type Link: Link;

    /// Start scanning. Advertisements keep arriving until the stream is
    /// dropped and [`Central::stop_scan`] is called; the same device may be
    /// reported many times.
    async fn scan(&self) -> Result<BoxStream<'static, Advertisement<Self::Device>>, TransportError>;

    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Open a fresh connection. `None` waits for the connection as long as
    /// it takes.
    async fn connect(
        &self,
        target: &Target<Self::Device>,
        timeout: Option<Duration>,
    ) -> Result<Self::Link, TransportError>;

    /// Wait until connections abandoned by cancelled [`Central::connect`]
    /// calls have been closed
    async fn settle(&self) {}
}

/// An open GATT connection, exclusively owned by its holder
#[async_trait]
pub trait Link: Send + Sync + 'static {
    async fn is_connected(&self) -> bool;

    /// UUIDs of every characteristic across all services of the peer
    async fn characteristics(&self) -> Result<HashSet<Uuid>, TransportError>;

    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>, TransportError>;

    async fn write(&self, uuid: Uuid, data: &[u8], mode: WriteMode) -> Result<(), TransportError>;

    /// Route notifications of `uuid` to `handler`. The handler is in place
    /// before the subscription is enabled on the device.
    async fn subscribe(&self, uuid: Uuid, handler: NotificationHandler) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Disconnects running in the background for connections whose owner went
/// away without closing them
#[derive(Clone, Default)]
pub(crate) struct Releases {
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Releases {
    pub(crate) fn spawn(&self, release: impl Future<Output = ()> + Send + 'static) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("connection dropped outside the runtime, not released");
            return;
        };
        let handle = runtime.spawn(release);
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|task| !task.is_finished());
        pending.push(handle);
    }

    /// Wait for every release spawned so far, including ones spawned while
    /// waiting
    pub(crate) async fn settle(&self) {
        loop {
            let pending =
                std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(err) = handle.await {
                    warn!(%err, "connection release failed");
                }
            }
        }
    }
}

/// Runs `release` in the background if dropped before [`ReleaseGuard::disarm`]
pub(crate) struct ReleaseGuard<F>
where
    F: Future<Output = ()> + Send + 'static,
{
    release: Option<F>,
    releases: Releases,
}

impl<F> ReleaseGuard<F>
where
    F: Future<Output = ()> + Send + 'static,
{
    pub(crate) fn new(releases: &Releases, release: F) -> Self {
        Self {
            release: Some(release),
            releases: releases.clone(),
        }
    }

    pub(crate) fn disarm(mut self) {
        self.release = None;
    }
}

impl<F> Drop for ReleaseGuard<F>
where
    F: Future<Output = ()> + Send + 'static,
{
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            self.releases.spawn(release);
        }
    }
}
