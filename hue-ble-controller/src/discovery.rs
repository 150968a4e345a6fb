//! Discovery of lamps among nearby advertisers
//!
//! Advertisements are consumed by a single loop which owns the set of
//! addresses already claimed, so a device is probed at most once per call
//! no matter how often it advertises. Every probe is a task of its own
//! that connects, checks the characteristic set and disconnects. When the
//! scan window closes all outstanding probes are aborted, and their
//! connections are closed before [`discover`] returns.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace, warn};

use hue_ble_proto::REQUIRED;

use crate::error::{Error, TransportError};
use crate::transport::{Advertisement, Central, Link, Releases, Target};

/// Upper bound on closing the connections of aborted probes
const RELEASE_LIMIT: Duration = Duration::from_secs(2);

/// A device confirmed to expose the lamp characteristics
#[derive(Debug, Clone)]
pub struct Endpoint<D> {
    pub address: String,
    pub name: Option<String>,
    /// Handle from the scan, saves resolving the address again on connect
    pub device: Option<D>,
}

impl<D> Endpoint<D> {
    pub fn new(address: impl Into<String>, name: Option<String>) -> Self {
        Self {
            address: address.into(),
            name,
            device: None,
        }
    }

    /// How a session should reach this endpoint
    pub fn target(&self) -> Target<D>
    where
        D: Clone,
    {
        match &self.device {
            Some(device) => Target::Device(device.clone()),
            None => Target::Address(self.address.clone()),
        }
    }
}

impl<D> fmt::Display for Endpoint<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}

type Found<D> = Arc<Mutex<BTreeMap<String, Endpoint<D>>>>;

/// Scan for `timeout` and return every device that exposes all of
/// [`REQUIRED`], ordered by address.
///
/// Individual probe failures are logged and skipped. Only a failure to
/// start the scan is returned as an error.
pub async fn discover<C: Central>(
    central: &C,
    timeout: Duration,
) -> Result<Vec<Endpoint<C::Device>>, Error> {
    let window = sleep_until(Instant::now() + timeout);
    tokio::pin!(window);

    let mut adverts = central.scan().await?;
    let found: Found<C::Device> = Default::default();
    let mut claimed = HashSet::new();
    let mut probes = JoinSet::new();
    let releases = Releases::default();

    loop {
        tokio::select! {
            _ = &mut window => break,
            advert = adverts.next() => {
                let Some(advert) = advert else {
                    (&mut window).await;
                    break;
                };
                if !claimed.insert(advert.address.clone()) {
                    trace!(address = %advert.address, "already probed");
                    continue;
                }
                debug!(address = %advert.address, name = ?advert.name, "probing");
                probes.spawn(probe(
                    central.clone(),
                    advert,
                    found.clone(),
                    releases.clone(),
                ));
            }
        }
    }

    drop(adverts);
    if let Err(err) = central.stop_scan().await {
        warn!(%err, "failed to stop scan");
    }

    probes.abort_all();
    while probes.join_next().await.is_some() {}
    let settled = tokio::time::timeout(RELEASE_LIMIT, async {
        releases.settle().await;
        central.settle().await;
    });
    if settled.await.is_err() {
        warn!("gave up waiting for aborted probes to disconnect");
    }

    let found = std::mem::take(&mut *found.lock().await);
    info!(
        candidates = claimed.len(),
        lamps = found.len(),
        "discovery finished"
    );
    Ok(found.into_values().collect())
}

async fn probe<C: Central>(
    central: C,
    advert: Advertisement<C::Device>,
    found: Found<C::Device>,
    releases: Releases,
) {
    let Advertisement {
        address,
        name,
        device,
    } = advert;

    match verify(&central, &device, &releases).await {
        Ok(true) => {
            debug!(%address, "lamp confirmed");
            found.lock().await.insert(
                address.clone(),
                Endpoint {
                    address,
                    name,
                    device: Some(device),
                },
            );
        }
        Ok(false) => debug!(%address, "missing lamp characteristics"),
        Err(err) => debug!(%address, %err, "probe failed"),
    }
}

async fn verify<C: Central>(
    central: &C,
    device: &C::Device,
    releases: &Releases,
) -> Result<bool, TransportError> {
    let link = central.connect(&Target::Device(device.clone()), None).await?;
    let link = ScopedLink::new(link, releases);
    let characteristics = link.characteristics().await?;
    link.release().await;
    Ok(REQUIRED.iter().all(|uuid| characteristics.contains(uuid)))
}

/// Owns a probe connection and disconnects it on every exit path,
/// including abortion of the probe task
struct ScopedLink<L: Link> {
    link: Option<L>,
    releases: Releases,
}

impl<L: Link> ScopedLink<L> {
    fn new(link: L, releases: &Releases) -> Self {
        Self {
            link: Some(link),
            releases: releases.clone(),
        }
    }

    async fn release(mut self) {
        if let Some(link) = self.link.take() {
            if let Err(err) = link.disconnect().await {
                warn!(%err, "failed to disconnect probe");
            }
        }
    }
}

impl<L: Link> Deref for ScopedLink<L> {
    type Target = L;

    fn deref(&self) -> &L {
        self.link.as_ref().expect("probe link used after release")
    }
}

impl<L: Link> Drop for ScopedLink<L> {
    fn drop(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        self.releases.spawn(async move {
            if let Err(err) = link.disconnect().await {
                warn!(%err, "failed to disconnect abandoned probe");
            }
        });
    }
}
