//! Loopback backend
//!
//! A protocol backend without a protocol: channels are plain names, input
//! arrives through an injection pipe as newline-separated `channel value`
//! lines, and applied output batches are recorded in an observable log.
//! An optional forward map re-emits an input event when an output is
//! applied, which makes routing cascades reproducible in tests.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use patch_core::{Backend, BackendError, BackendFactory, ChannelEvent, ManagedFd, RouterCtx};
use tracing::{debug, warn};

/// Token under which the injection pipe is registered
const INJECT_TOKEN: u64 = 0;

/// Observable record of the batches applied to a loopback instance
#[derive(Debug, Clone, Default)]
pub struct LoopbackLog {
    batches: Arc<Mutex<Vec<Vec<(String, f64)>>>>,
}

impl LoopbackLog {
    /// All applied batches so far, one inner vec per notification call
    pub fn batches(&self) -> Vec<Vec<(String, f64)>> {
        self.batches.lock().unwrap().clone()
    }

    fn push(&self, batch: Vec<(String, f64)>) {
        self.batches.lock().unwrap().push(batch);
    }
}

/// Writes input events into a loopback instance's injection pipe
#[derive(Debug)]
pub struct LoopbackInjector {
    tx: File,
}

impl LoopbackInjector {
    /// Report an input event on the named channel
    pub fn send(&mut self, channel: &str, value: f64) -> std::io::Result<()> {
        writeln!(self.tx, "{channel} {value}")
    }
}

/// Simulated loopback backend instance
pub struct LoopbackBackend {
    instance: String,
    channels: Vec<String>,
    forward: Vec<(String, String)>,
    rx: File,
    tx: Option<File>,
    buffer: String,
    interval: Duration,
    log: LoopbackLog,
}

impl LoopbackBackend {
    /// Create an instance with default options
    pub fn new(instance: impl Into<String>) -> Result<Self, BackendError> {
        Self::with_options(&instance.into(), &BTreeMap::new())
    }

    /// Create an instance from configuration options
    ///
    /// Recognized options: `forward.<channel> = <channel>` re-emits an input
    /// on the right-hand channel whenever an output is applied to the
    /// left-hand one; `interval_ms` overrides the requested poll interval.
    pub fn with_options(
        instance: &str,
        options: &BTreeMap<String, String>,
    ) -> Result<Self, BackendError> {
        let mut forward = Vec::new();
        let mut interval = Duration::from_millis(250);
        for (key, value) in options {
            if let Some(from) = key.strip_prefix("forward.") {
                forward.push((from.to_string(), value.clone()));
            } else if key == "interval_ms" {
                let ms: u64 = value.parse().map_err(|_| BackendError::InvalidOption {
                    key: key.clone(),
                    reason: format!("expected a millisecond count, got {value:?}"),
                })?;
                interval = Duration::from_millis(ms);
            } else {
                return Err(BackendError::InvalidOption {
                    key: key.clone(),
                    reason: "unknown option".to_string(),
                });
            }
        }

        let (rx, tx) = nix::unistd::pipe().map_err(std::io::Error::from)?;
        Ok(Self {
            instance: instance.to_string(),
            channels: Vec::new(),
            forward,
            rx: File::from(rx),
            tx: Some(File::from(tx)),
            buffer: String::new(),
            interval,
            log: LoopbackLog::default(),
        })
    }

    /// Take the injector for this instance's pipe
    ///
    /// Once taken, dropping the injector closes the pipe's write end; the
    /// backend then unregisters the read end on end-of-file.
    pub fn take_injector(&mut self) -> Option<LoopbackInjector> {
        self.tx.take().map(|tx| LoopbackInjector { tx })
    }

    /// The applied-batch log for this instance
    pub fn log(&self) -> LoopbackLog {
        self.log.clone()
    }

    fn find_or_create(&mut self, name: &str) -> u64 {
        if let Some(idx) = self.channels.iter().position(|c| c == name) {
            return idx as u64;
        }
        self.channels.push(name.to_string());
        (self.channels.len() - 1) as u64
    }

    fn dispatch_lines(&mut self, ctx: &mut RouterCtx<'_>) -> Result<(), BackendError> {
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some((name, raw_value)) = line.split_once(' ') else {
                warn!(instance = %self.instance, line, "ignoring malformed input line");
                continue;
            };
            let Ok(value) = raw_value.trim().parse::<f64>() else {
                warn!(instance = %self.instance, line, "ignoring unparseable value");
                continue;
            };
            let Some(idx) = self.channels.iter().position(|c| c == name) else {
                warn!(instance = %self.instance, channel = name, "input for unknown channel");
                continue;
            };

            ctx.channel_event(ctx.channel(idx as u64), patch_core::ChannelValue::new(value))
                .map_err(|e| BackendError::Other(e.to_string()))?;
        }
        Ok(())
    }
}

impl Backend for LoopbackBackend {
    fn start(&mut self, ctx: &mut RouterCtx<'_>) -> Result<(), BackendError> {
        debug!(instance = %self.instance, "registering injection pipe");
        ctx.manage_fd(self.rx.as_raw_fd(), true, INJECT_TOKEN)
            .map_err(|e| BackendError::Other(e.to_string()))
    }

    fn stop(&mut self, ctx: &mut RouterCtx<'_>) {
        // the pipe ends close with this instance; leave nothing for the
        // registry sweep
        if let Err(e) = ctx.manage_fd(self.rx.as_raw_fd(), false, INJECT_TOKEN) {
            warn!(instance = %self.instance, "failed to unregister injection pipe: {e}");
        }
    }

    fn poll_interval(&self) -> Option<Duration> {
        Some(self.interval)
    }

    fn channel(&mut self, spec: &str) -> Result<u64, BackendError> {
        if spec.is_empty() || spec.contains(char::is_whitespace) {
            return Err(BackendError::InvalidChannel(spec.to_string()));
        }
        Ok(self.find_or_create(spec))
    }

    fn handle_ready(
        &mut self,
        ready: &[ManagedFd],
        ctx: &mut RouterCtx<'_>,
    ) -> Result<(), BackendError> {
        for entry in ready {
            if entry.token != INJECT_TOKEN {
                continue;
            }

            let mut chunk = [0u8; 1024];
            let n = self.rx.read(&mut chunk)?;
            if n == 0 {
                // injector dropped; stop watching the pipe
                debug!(instance = %self.instance, "injection pipe closed");
                ctx.manage_fd(entry.fd, false, INJECT_TOKEN)
                    .map_err(|e| BackendError::Other(e.to_string()))?;
                continue;
            }
            self.buffer.push_str(&String::from_utf8_lossy(&chunk[..n]));
            self.dispatch_lines(ctx)?;
        }
        Ok(())
    }

    fn apply(
        &mut self,
        batch: &[ChannelEvent],
        ctx: &mut RouterCtx<'_>,
    ) -> Result<(), BackendError> {
        let mut applied = Vec::with_capacity(batch.len());
        for event in batch {
            let Some(name) = self.channels.get(event.channel.token() as usize).cloned() else {
                warn!(instance = %self.instance, channel = %event.channel, "output for unknown channel");
                continue;
            };
            applied.push((name.clone(), event.value.normalised));

            let targets: Vec<String> = self
                .forward
                .iter()
                .filter(|(from, _)| *from == name)
                .map(|(_, to)| to.clone())
                .collect();
            for target in targets {
                let token = self.find_or_create(&target);
                ctx.channel_event(ctx.channel(token), event.value)
                    .map_err(|e| BackendError::Other(e.to_string()))?;
            }
        }
        debug!(instance = %self.instance, events = applied.len(), "applied output batch");
        self.log.push(applied);
        Ok(())
    }
}

/// Factory for config-driven loopback instances
#[derive(Debug, Default)]
pub struct LoopbackFactory;

impl BackendFactory for LoopbackFactory {
    fn backend_type(&self) -> &str {
        "loopback"
    }

    fn create(
        &self,
        instance: &str,
        options: &BTreeMap<String, String>,
    ) -> Result<Box<dyn Backend>, BackendError> {
        Ok(Box::new(LoopbackBackend::with_options(instance, options)?))
    }
}
