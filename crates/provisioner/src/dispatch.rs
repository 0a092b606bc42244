//! Event dispatch loop
//!
//! Consumes [`DeviceEvent`]s and runs one provisioning attempt per
//! `Connected` event on its own tokio task, so attempts for different devices
//! proceed concurrently and a panic in one attempt stays inside its task.
//!
//! At most one attempt runs per serial. A `Connected` for a serial whose
//! attempt is still running is dropped, unless a `Disconnected` for that
//! serial came in between: the device was replugged, so a fresh attempt is
//! queued and started as soon as the running one ends.

use crate::bridge::{CommandExecutor, DeviceRegistry};
use crate::orchestrator::{AttemptOutcome, Orchestrator, ProvisioningAttempt};
use common::{DeviceEvent, EventSubscriber};
use protocol::DeviceSerial;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, error, info};

/// Attempt counts over the lifetime of a dispatcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Attempt tasks that panicked
    pub crashed: u64,
}

impl DispatchSummary {
    pub fn total(&self) -> u64 {
        self.succeeded + self.skipped + self.failed + self.crashed
    }
}

/// Running attempt for one serial
struct Slot {
    /// Device went away after this attempt started
    disconnected: bool,
    /// Device came back; start a new attempt when this one ends
    requeued: bool,
}

pub struct Dispatcher<B> {
    orchestrator: Orchestrator<B>,
    attempts: JoinSet<ProvisioningAttempt>,
    slots: HashMap<DeviceSerial, Slot>,
    tasks: HashMap<task::Id, DeviceSerial>,
    summary: DispatchSummary,
    sink: Option<UnboundedSender<ProvisioningAttempt>>,
}

impl<B> Dispatcher<B>
where
    B: DeviceRegistry + CommandExecutor,
{
    pub fn new(orchestrator: Orchestrator<B>) -> Self {
        Self {
            orchestrator,
            attempts: JoinSet::new(),
            slots: HashMap::new(),
            tasks: HashMap::new(),
            summary: DispatchSummary::default(),
            sink: None,
        }
    }

    /// Also hand every finished attempt to `sink`
    pub fn report_to(mut self, sink: UnboundedSender<ProvisioningAttempt>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Dispatch events until the channel closes
    ///
    /// Attempts still running (or queued) at that point are awaited before
    /// returning.
    pub async fn run(mut self, events: EventSubscriber) -> DispatchSummary {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(event),
                    Err(_) => break,
                },
                Some(result) = self.attempts.join_next_with_id(), if !self.attempts.is_empty() => {
                    self.finish(result);
                }
            }
        }

        debug!(
            "Event channel closed, waiting for {} attempt(s)",
            self.attempts.len()
        );

        while let Some(result) = self.attempts.join_next_with_id().await {
            self.finish(result);
        }

        self.summary
    }

    fn handle_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Connected { serial } => {
                info!("{}: connected", serial);

                match self.slots.get_mut(&serial) {
                    None => self.start(serial),
                    Some(slot) if slot.disconnected => {
                        debug!("{}: reconnected while provisioning, queued", serial);
                        slot.disconnected = false;
                        slot.requeued = true;
                    }
                    Some(_) => debug!("{}: attempt already running, ignoring connect", serial),
                }
            }
            DeviceEvent::Disconnected { serial } => {
                info!("{}: disconnected", serial);

                if let Some(slot) = self.slots.get_mut(&serial) {
                    slot.disconnected = true;
                    // The queued connection is gone as well
                    slot.requeued = false;
                }
            }
        }
    }

    fn start(&mut self, serial: DeviceSerial) {
        let orchestrator = self.orchestrator.clone();
        let task_serial = serial.clone();
        let handle = self
            .attempts
            .spawn(async move { orchestrator.provision(task_serial).await });

        self.tasks.insert(handle.id(), serial.clone());
        self.slots.insert(
            serial,
            Slot {
                disconnected: false,
                requeued: false,
            },
        );
    }

    fn finish(&mut self, result: Result<(task::Id, ProvisioningAttempt), JoinError>) {
        let id = match &result {
            Ok((id, _)) => *id,
            Err(e) => e.id(),
        };
        let Some(serial) = self.tasks.remove(&id) else {
            return;
        };
        let slot = self.slots.remove(&serial);

        match result {
            Ok((_, attempt)) => self.record(attempt),
            Err(e) => {
                if e.is_panic() {
                    error!("{}: provisioning task panicked", serial);
                } else {
                    error!("{}: provisioning task failed: {}", serial, e);
                }
                self.summary.crashed += 1;
            }
        }

        if slot.is_some_and(|slot| slot.requeued) {
            info!("{}: starting new attempt after reconnect", serial);
            self.start(serial);
        }
    }

    fn record(&mut self, attempt: ProvisioningAttempt) {
        match attempt.outcome {
            AttemptOutcome::Success => self.summary.succeeded += 1,
            AttemptOutcome::Skipped(_) => self.summary.skipped += 1,
            AttemptOutcome::Failed(_) => self.summary.failed += 1,
        }

        if let Some(sink) = &self.sink {
            // Receiver gone: nobody is collecting anymore
            let _ = sink.send(attempt);
        }
    }
}
