//! Event Listeners
//!
//! Listeners turn ModemManager signals into chat notifications. Each listener
//! names the interface and signal member it consumes; the
//! [`ListenerSupervisor`] subscribes it on the modem object and runs it on its
//! own task.
//!
//! ## Processing Rules
//!
//! - Signals are handled strictly in arrival order, one at a time
//! - A signal with a different member is ignored
//! - A signal whose first argument is not an object path is dropped
//! - A listener may skip signals it does not own, such as locally created SMS
//! - A failed handler is logged and the listener moves on
//!
//! ## Shutdown
//!
//! `shutdown()` flips a watch channel. Each task finishes the event it is
//! handling, handles what is already queued, and exits; the supervisor then
//! joins every task.

mod call;
mod sms;

pub use call::CallListener;
pub use sms::SmsListener;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::BusSignal;
use crate::engine::EventSource;
use crate::transport::{ChatId, ChatTransport};
use crate::{EngineError, Result};

/// Shared by every listener task
pub struct ListenerContext {
    pub source: EventSource,
    pub transport: Arc<dyn ChatTransport>,
    /// Chat that receives event notifications
    pub notify_chat: ChatId,
}

impl ListenerContext {
    /// Read a string property of an event object
    pub async fn read_text(&self, path: &str, interface: &str, name: &str) -> Result<String> {
        let value = self.source.bus.property(path, interface, name).await?;
        value
            .as_str()
            .map(String::from)
            .ok_or_else(|| EngineError::BusCall(format!("{} on {} is not a string", name, path)))
    }

    pub async fn notify(&self, text: &str) -> Result<()> {
        self.transport
            .deliver(self.notify_chat, text)
            .await
            .map_err(EngineError::from)
    }
}

/// Consumer of one bus signal
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Interface the signal is emitted on
    fn interface(&self) -> &'static str;

    /// Signal member handled
    fn signal(&self) -> &'static str;

    /// Whether a signal of the handled member is for this listener
    fn accepts(&self, _signal: &BusSignal) -> bool {
        true
    }

    /// Handle one event object
    async fn handle(&self, ctx: &ListenerContext, object: &str) -> Result<()>;
}

/// Owns the listener tasks and their shutdown signal
pub struct ListenerSupervisor {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl ListenerSupervisor {
    /// Subscribe every listener and spawn its task
    ///
    /// # Errors
    ///
    /// Returns error if any subscription fails; tasks already started are
    /// stopped before returning.
    pub async fn start(listeners: Vec<Arc<dyn Listener>>, ctx: Arc<ListenerContext>) -> Result<Self> {
        let (shutdown, _) = watch::channel(false);
        let mut supervisor = Self {
            shutdown,
            tasks: Vec::new(),
        };

        for listener in listeners {
            let subscription = ctx
                .source
                .bus
                .subscribe(ctx.source.modem.as_str(), listener.interface())
                .await;

            let signals = match subscription {
                Ok(signals) => signals,
                Err(e) => {
                    supervisor.shutdown().await;
                    return Err(e);
                }
            };

            let name = listener.name();
            let handle = tokio::spawn(run_listener(
                listener,
                Arc::clone(&ctx),
                signals,
                supervisor.shutdown.subscribe(),
            ));
            info!("Started {} listener on {}", name, ctx.source.modem);
            supervisor.tasks.push((name, handle));
        }

        Ok(supervisor)
    }

    /// Names of the listeners still running
    pub fn running(&self) -> Vec<&'static str> {
        self.tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(name, _)| *name)
            .collect()
    }

    /// Signal every task to stop and wait for all of them
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                warn!("{} listener task ended abnormally: {}", name, e);
            } else {
                debug!("{} listener stopped", name);
            }
        }
    }
}

async fn run_listener(
    listener: Arc<dyn Listener>,
    ctx: Arc<ListenerContext>,
    mut signals: mpsc::Receiver<BusSignal>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                // Queued events were already accepted; handle them before exiting
                while let Ok(signal) = signals.try_recv() {
                    dispatch(listener.as_ref(), &ctx, signal).await;
                }
                break;
            }
            signal = signals.recv() => match signal {
                Some(signal) => dispatch(listener.as_ref(), &ctx, signal).await,
                None => {
                    warn!("{} listener subscription closed", listener.name());
                    break;
                }
            },
        }
    }
}

async fn dispatch(listener: &dyn Listener, ctx: &ListenerContext, signal: BusSignal) {
    if signal.member != listener.signal() {
        debug!(
            "{} listener ignoring {}.{}",
            listener.name(),
            signal.interface,
            signal.member
        );
        return;
    }

    let Some(object) = signal.object_path() else {
        let error = EngineError::MalformedEvent(format!(
            "{} without an object path: {:?}",
            signal.member, signal.args
        ));
        debug!("{} listener dropped event: {}", listener.name(), error);
        return;
    };

    if !listener.accepts(&signal) {
        debug!("{} listener skipping {}", listener.name(), object);
        return;
    }

    if let Err(e) = listener.handle(ctx, object).await {
        warn!("{} listener failed on {}: {}", listener.name(), object, e);
    }
}

/// Default listener set
pub fn default_listeners(enable_calls: bool, enable_sms: bool, delete_after_forward: bool) -> Vec<Arc<dyn Listener>> {
    let mut listeners: Vec<Arc<dyn Listener>> = Vec::new();
    if enable_calls {
        listeners.push(Arc::new(CallListener));
    }
    if enable_sms {
        listeners.push(Arc::new(SmsListener::new(delete_after_forward)));
    }
    listeners
}
