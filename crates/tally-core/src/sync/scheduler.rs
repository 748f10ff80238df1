//! Background triggers for sync passes: reconnection, a periodic timer,
//! explicit requests and debounced local mutations.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::engine::SyncEngine;
use crate::store::{LocalStore, RemoteStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    SyncNow,
    LocalChange,
    Shutdown,
}

/// Handle to a running scheduler task
#[derive(Debug)]
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Ask for a pass as soon as possible.
    pub fn request_sync(&self) {
        self.send(Command::SyncNow);
    }

    /// Note a local mutation; a pass follows once mutations go quiet.
    pub fn notify_local_change(&self) {
        self.send(Command::LocalChange);
    }

    /// Stop the scheduler and wait for it to exit. A pass already in
    /// flight runs to completion on its own task.
    pub async fn shutdown(self) {
        self.send(Command::Shutdown);
        if let Err(error) = self.task.await {
            tracing::warn!(%error, "Sync scheduler task ended abnormally");
        }
    }

    fn send(&self, command: Command) -> bool {
        match self.commands.send(command) {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!(command = ?error.0, "Sync scheduler already stopped; command dropped");
                false
            }
        }
    }
}

impl<L, R> SyncEngine<L, R>
where
    L: LocalStore + 'static,
    R: RemoteStore + 'static,
{
    /// Start driving this engine from the background.
    pub fn spawn_scheduler(self: &Arc<Self>) -> SchedulerHandle {
        let (commands, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(Arc::clone(self), receiver));
        SchedulerHandle { commands, task }
    }
}

async fn run<L, R>(engine: Arc<SyncEngine<L, R>>, mut commands: mpsc::UnboundedReceiver<Command>)
where
    L: LocalStore + 'static,
    R: RemoteStore + 'static,
{
    let settings = *engine.settings();
    let mut network = engine.network();
    let mut network_open = true;
    let mut timer = settings.interval().map(|period| {
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer
    });
    let mut debounce_deadline: Option<Instant> = None;

    tracing::debug!(?settings, "Sync scheduler started");
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::SyncNow) => trigger(&engine, "request"),
                Some(Command::LocalChange) => {
                    debounce_deadline = Some(Instant::now() + settings.debounce());
                }
                Some(Command::Shutdown) | None => break,
            },
            () = wait_until(debounce_deadline) => {
                debounce_deadline = None;
                trigger(&engine, "local change");
            }
            () = tick(&mut timer) => trigger(&engine, "interval"),
            changed = network.changed(), if network_open => {
                if changed.is_err() {
                    network_open = false;
                    continue;
                }
                let online = *network.borrow_and_update();
                engine.set_online(online);
                if online {
                    trigger(&engine, "reconnect");
                }
            }
        }
    }
    tracing::debug!("Sync scheduler stopped");
}

/// Run a pass on its own task so triggers keep flowing and coalesce.
fn trigger<L, R>(engine: &Arc<SyncEngine<L, R>>, reason: &'static str)
where
    L: LocalStore + 'static,
    R: RemoteStore + 'static,
{
    tracing::debug!(reason, "Sync triggered");
    let engine = Arc::clone(engine);
    tokio::spawn(async move {
        let report = engine.sync_all().await;
        tracing::debug!(reason, outcome = ?report.outcome, "Triggered sync finished");
    });
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
