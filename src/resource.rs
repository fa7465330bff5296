//! Single-owner access guard.
//!
//! A [`Resource`] keeps one value on a dedicated worker thread and lends it
//! out through a one-slot request channel. Whoever holds the
//! [`ResourceGuard`] has exclusive use of the value; dropping the guard hands
//! it back through a one-slot return channel, on every exit path including
//! `?` and panics. There is no lock: a second caller simply finds the request
//! slot empty and times out.

use std::ops::{Deref, DerefMut};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace};

use crate::client::{connect_with_config, Backend, Channel, Connection, MqConnection};
use crate::config::MqConfig;
use crate::errors::{MqError, Result};
use crate::in_memory::BrokerRegistry;

enum Returned<T> {
    Keep(T),
    Close,
}

pub struct Resource<T: Send + 'static> {
    request: Receiver<T>,
    ret: Sender<Returned<T>>,
    access_timeout: Duration,
    return_poll: Duration,
}

impl<T: Send + 'static> Resource<T> {
    /// Starts the worker, which builds the value with `constructor` and
    /// offers it for access.
    pub fn new<F>(constructor: F) -> Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::with_config(constructor, &MqConfig::default())
    }

    /// Like [`Resource::new`], taking the default access timeout and the
    /// worker's return poll from `config`.
    pub fn with_config<F>(constructor: F, config: &MqConfig) -> Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::spawn(constructor, config.resource_access_timeout(), config.resource_return_poll())
    }

    fn spawn<F>(constructor: F, access_timeout: Duration, return_poll: Duration) -> Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (offer, request) = bounded(1);
        let (ret, returns) = bounded(1);
        let reclaim = request.clone();

        thread::Builder::new()
            .name("resource".to_string())
            .spawn(move || run_worker(constructor, offer, reclaim, returns, return_poll))
            .map_err(|e| MqError::BrokerInternal(format!("Failed to spawn resource worker: {}", e)))?;

        Ok(Self {
            request,
            ret,
            access_timeout,
            return_poll,
        })
    }

    pub fn access_timeout(&self) -> Duration {
        self.access_timeout
    }

    /// Takes the value for the lifetime of the returned guard.
    ///
    /// Fails with [`MqError::ResourceNotAvailable`] when nothing is offered
    /// within `timeout`: another guard is alive (including one further up
    /// the same call stack), the worker has not built the value yet, or the
    /// resource was closed.
    pub fn access(&self, timeout: Duration) -> Result<ResourceGuard<'_, T>> {
        let value = self
            .request
            .recv_timeout(timeout)
            .map_err(|_| MqError::ResourceNotAvailable(timeout))?;

        trace!("Resource acquired");
        Ok(ResourceGuard {
            value: Some(value),
            ret: &self.ret,
        })
    }

    /// [`Resource::access`] with the configured access timeout.
    pub fn access_default(&self) -> Result<ResourceGuard<'_, T>> {
        self.access(self.access_timeout)
    }

    /// Tells the worker to stop offering the value and exit.
    pub fn close(&self) {
        if self.ret.send(Returned::Close).is_err() {
            debug!("Resource worker already stopped");
        }
    }
}

/// Exclusive borrow of a [`Resource`]'s value.
pub struct ResourceGuard<'a, T: Send + 'static> {
    value: Option<T>,
    ret: &'a Sender<Returned<T>>,
}

impl<T: Send + 'static> Deref for ResourceGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only taken in drop.
        self.value.as_ref().expect("resource guard used after release")
    }
}

impl<T: Send + 'static> DerefMut for ResourceGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("resource guard used after release")
    }
}

impl<T: Send + 'static> Drop for ResourceGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            if self.ret.send(Returned::Keep(value)).is_err() {
                debug!("Resource worker gone, dropping returned value");
            } else {
                trace!("Resource released");
            }
        }
    }
}

fn wait_for_return<T>(returns: &Receiver<Returned<T>>, poll: Duration) -> Result<Returned<T>> {
    match returns.recv_timeout(poll) {
        Ok(returned) => Ok(returned),
        Err(RecvTimeoutError::Timeout) => Err(MqError::ReturnTimeout),
        // Every handle is gone, nobody can return or request it any more.
        Err(RecvTimeoutError::Disconnected) => Ok(Returned::Close),
    }
}

fn run_worker<T, F>(
    constructor: F,
    offer: Sender<T>,
    reclaim: Receiver<T>,
    returns: Receiver<Returned<T>>,
    poll: Duration,
) where
    F: FnOnce() -> T,
{
    let mut value = constructor();
    debug!("Resource constructed");

    'offer: loop {
        if offer.send(value).is_err() {
            break;
        }

        loop {
            match wait_for_return(&returns, poll) {
                Ok(Returned::Keep(returned)) => {
                    value = returned;
                    continue 'offer;
                }
                Ok(Returned::Close) => {
                    // Pull the value back if nobody holds it.
                    let _ = reclaim.try_recv();
                    break 'offer;
                }
                Err(_) => continue,
            }
        }
    }

    debug!("Resource worker stopped");
}

/// Connects to `(host, port)` on `backend` and boxes the connection in its
/// own guard, with the guard timeouts taken from `config`.
pub async fn connection_resource(
    registry: &BrokerRegistry,
    host: &str,
    port: u16,
    backend: Backend,
    config: MqConfig,
) -> Result<Resource<Connection>> {
    let connection = connect_with_config(registry, host, port, backend, config.clone()).await?;
    Resource::with_config(move || connection, &config)
}

/// Opens a channel on the guarded connection and boxes it in a guard with
/// the same timeouts. The connection stays held while the channel is opened.
pub async fn channel_resource(connection: &Resource<Connection>) -> Result<Resource<Channel>> {
    let guard = connection.access_default()?;
    let channel = guard.create_channel().await?;
    drop(guard);

    Resource::spawn(move || channel, connection.access_timeout, connection.return_poll)
}
