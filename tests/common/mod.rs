//! Shared fixtures: a scripted in-memory store driver and manager wiring

#![allow(dead_code)]

use async_trait::async_trait;
use envconfig::Envconfig;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use store_lifecycle::pool::PoolOptions;
use store_lifecycle::{
    ConnectionManager, DriverError, DriverEvent, EnvSettings, MemoryAuditSink, ReadyState,
    SequenceJitter, StoreDriver, StoreUri,
};
use tokio::sync::broadcast;

/// What a scripted ping or close does
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(&'static str),
    Delay(Duration),
    Hang,
}

impl Behavior {
    async fn run(&self) -> Result<(), DriverError> {
        match self {
            Behavior::Succeed => Ok(()),
            Behavior::Fail(message) => Err(DriverError::new(*message)),
            Behavior::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(())
            }
            Behavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

/// Store driver whose every answer is scripted by the test
pub struct ScriptedDriver {
    open_script: Mutex<VecDeque<Result<(), &'static str>>>,
    open_fallback: Option<&'static str>,
    open_delay: Duration,
    ping: Mutex<Behavior>,
    close: Mutex<Behavior>,
    ready: Mutex<ReadyState>,
    events: broadcast::Sender<DriverEvent>,
    pub open_calls: AtomicU32,
    pub ping_calls: AtomicU32,
    pub close_calls: AtomicU32,
}

impl ScriptedDriver {
    fn build(open_fallback: Option<&'static str>) -> Self {
        Self {
            open_script: Mutex::new(VecDeque::new()),
            open_fallback,
            open_delay: Duration::ZERO,
            ping: Mutex::new(Behavior::Succeed),
            close: Mutex::new(Behavior::Succeed),
            ready: Mutex::new(ReadyState::Uninitialized),
            events: broadcast::channel(32).0,
            open_calls: AtomicU32::new(0),
            ping_calls: AtomicU32::new(0),
            close_calls: AtomicU32::new(0),
        }
    }

    /// Every open succeeds
    pub fn healthy() -> Self {
        Self::build(None)
    }

    /// Every open fails with `message`
    pub fn failing(message: &'static str) -> Self {
        Self::build(Some(message))
    }

    /// Answer the next opens from `script`, then fall back
    pub fn with_script(self, script: Vec<Result<(), &'static str>>) -> Self {
        *self.open_script.lock().unwrap() = script.into();
        self
    }

    /// Make every open take `delay`
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn with_close(self, behavior: Behavior) -> Self {
        self.set_close(behavior);
        self
    }

    pub fn set_ping(&self, behavior: Behavior) {
        *self.ping.lock().unwrap() = behavior;
    }

    pub fn set_close(&self, behavior: Behavior) {
        *self.close.lock().unwrap() = behavior;
    }

    /// Change the reported ready state without publishing anything
    pub fn set_ready(&self, state: ReadyState) {
        *self.ready.lock().unwrap() = state;
    }

    /// Publish a backend-initiated transition
    pub fn emit(&self, event: DriverEvent) {
        let ready = match &event {
            DriverEvent::Connected | DriverEvent::Reconnected => ReadyState::Connected,
            DriverEvent::Error(_) | DriverEvent::Disconnected | DriverEvent::Closed => {
                ReadyState::Disconnected
            }
        };
        self.set_ready(ready);
        let _ = self.events.send(event);
    }

    pub fn opens(&self) -> u32 {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> u32 {
        self.ping_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreDriver for ScriptedDriver {
    async fn open(&self, _uri: &StoreUri, _pool: &PoolOptions) -> Result<(), DriverError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        self.set_ready(ReadyState::Connecting);
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }

        let scripted = self.open_script.lock().unwrap().pop_front();
        let outcome = match scripted {
            Some(outcome) => outcome,
            None => match self.open_fallback {
                Some(message) => Err(message),
                None => Ok(()),
            },
        };

        match outcome {
            Ok(()) => {
                self.set_ready(ReadyState::Connected);
                Ok(())
            }
            Err(message) => {
                self.set_ready(ReadyState::Disconnected);
                Err(DriverError::new(message))
            }
        }
    }

    async fn ping(&self) -> Result<(), DriverError> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.ping.lock().unwrap().clone();
        behavior.run().await
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.set_ready(ReadyState::Disconnecting);
        let behavior = self.close.lock().unwrap().clone();
        let result = behavior.run().await;
        self.set_ready(ReadyState::Disconnected);
        result
    }

    fn ready_state(&self) -> ReadyState {
        *self.ready.lock().unwrap()
    }

    fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }
}

pub fn settings(pairs: &[(&str, &str)]) -> EnvSettings {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    EnvSettings::init_from_hashmap(&map).expect("settings")
}

/// Development tier with auditing on
pub fn dev_settings() -> EnvSettings {
    settings(&[
        ("APP_ENV", "development"),
        ("STORE_URI", "mongodb://scheduler:pw@localhost:27017/rostering"),
        ("AUDIT_LOGGING_ENABLED", "true"),
    ])
}

/// Manager over `driver` with no jitter and an in-memory audit trail
pub fn manager(driver: &Arc<ScriptedDriver>, sink: &MemoryAuditSink) -> ConnectionManager {
    let config = store_lifecycle::config::validate(&dev_settings()).expect("valid config");
    ConnectionManager::builder(config, driver.clone())
        .audit_sink(Arc::new(sink.clone()))
        .jitter(Arc::new(SequenceJitter::none()))
        .build()
        .expect("manager")
}

/// Wait until the sink holds at least `count` records
pub async fn wait_for_audit(sink: &MemoryAuditSink, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while sink.events().len() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("audit records did not arrive");
}
