//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use service_host::component::{Component, ComponentError, StopAck, StopError, StopHandle};
use service_host::config::{ConfigLoader, ConfigView, FlagError, ScopedFlags};
use service_host::http::HttpListener;

/// Ordered record of lifecycle calls across components.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

/// What `run` does.
#[derive(Debug, Clone, Copy)]
pub enum RunBehavior {
    /// Return `Ok` right away.
    Return,
    /// Block until `stop` is called.
    UntilStopped,
    /// Fail after the delay.
    FailAfter(Duration),
}

/// How `stop` acknowledges.
#[derive(Debug, Clone, Copy)]
pub enum StopBehavior {
    /// Acknowledge success after the delay.
    Ack(Duration),
    /// Acknowledge failure after the delay.
    Fail(Duration),
    /// Never acknowledge (the ack sender is kept alive).
    Never,
}

/// Scriptable component that records every lifecycle call.
pub struct RecordingComponent {
    name: String,
    log: EventLog,
    critical: bool,
    reject_config: bool,
    run: RunBehavior,
    stop: StopBehavior,
    stop_calls: AtomicUsize,
    stopped: watch::Sender<bool>,
    held_acks: Mutex<Vec<StopAck>>,
}

impl RecordingComponent {
    pub fn new(name: &str, log: &EventLog) -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            name: name.to_string(),
            log: log.clone(),
            critical: true,
            reject_config: false,
            run: RunBehavior::UntilStopped,
            stop: StopBehavior::Ack(Duration::ZERO),
            stop_calls: AtomicUsize::new(0),
            stopped,
            held_acks: Mutex::new(Vec::new()),
        }
    }

    pub fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }

    pub fn rejecting_config(mut self) -> Self {
        self.reject_config = true;
        self
    }

    pub fn with_run(mut self, run: RunBehavior) -> Self {
        self.run = run;
        self
    }

    pub fn with_stop(mut self, stop: StopBehavior) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Component for RecordingComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn init_flags(&self, flags: &mut ScopedFlags<'_>) -> Result<(), FlagError> {
        self.log.push(format!("init_flags:{}", self.name));
        flags.bool("enabled", true, "Whether the component does anything")
    }

    fn configure(&self, config: &ConfigView<'_>) -> Result<(), ComponentError> {
        self.log.push(format!("configure:{}", self.name));
        config.bool("enabled")?;
        if self.reject_config {
            return Err(ComponentError::InvalidConfig(format!("{} refuses", self.name)));
        }
        Ok(())
    }

    async fn run(&self) -> Result<(), ComponentError> {
        self.log.push(format!("run:{}", self.name));
        match self.run {
            RunBehavior::Return => Ok(()),
            RunBehavior::UntilStopped => {
                let mut stopped = self.stopped.subscribe();
                let _ = stopped.wait_for(|s| *s).await;
                Ok(())
            }
            RunBehavior::FailAfter(delay) => {
                tokio::time::sleep(delay).await;
                Err(ComponentError::InvalidConfig(format!("{} crashed", self.name)))
            }
        }
    }

    fn stop(&self) -> StopHandle {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("stop:{}", self.name));
        self.stopped.send_replace(true);

        match self.stop {
            StopBehavior::Ack(delay) => StopHandle::spawn(async move {
                tokio::time::sleep(delay).await;
                Ok(())
            }),
            StopBehavior::Fail(delay) => StopHandle::spawn(async move {
                tokio::time::sleep(delay).await;
                Err(StopError::Failed("flush failed".into()))
            }),
            StopBehavior::Never => {
                let (ack, handle) = StopHandle::channel();
                self.held_acks.lock().push(ack);
                handle
            }
        }
    }

    fn is_critical(&self) -> bool {
        self.critical
    }
}

/// Loader isolated from the process environment.
pub fn loader(overrides: &[&str]) -> ConfigLoader {
    ConfigLoader::new()
        .with_env_vars(Vec::<(String, String)>::new())
        .with_overrides(overrides.iter().copied())
}

/// HTTP client that never goes through a proxy and never pools connections.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Wait until `listener` is serving.
pub async fn wait_until_serving(listener: &HttpListener) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !listener.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("listener did not start serving");
}

/// Whether anything accepts TCP connections on `port`.
pub async fn accepts(port: u16) -> bool {
    tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok()
}
