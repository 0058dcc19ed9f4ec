// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: startup, the dispatch loop, reload, shutdown.

use crate::cert::CredentialStore;
use crate::client::ClientManager;
use crate::config::{ConfigError, ServerConfig};
use crate::netif::NetIfList;
use crate::reactor::{IoTag, Reactor, ReactorError, TimerTag};
use crate::scheduler::{OsGroups, Spooler};
use fs2::FileExt;
use press_core::{Clock, EventKind, JobState, SystemClock};
use press_storage::{load_destinations, load_subscriptions, save_destinations, save_subscriptions, write_printcap};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, IntoRawFd, RawFd};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Dispatch-loop poll granularity.
const TICK: Duration = Duration::from_secs(1);

/// Sweep cadence for subscription leases.
const EXPIRY_SWEEP: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("another pressd owns {0}")]
    Locked(PathBuf),
    #[error("unable to bind required listener {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("spool directory unusable: {0}")]
    Spool(String),
    #[error("unable to create the credential store: {0}")]
    Credentials(std::io::Error),
    #[error(transparent)]
    Reactor(#[from] ReactorError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// The assembled daemon.
pub struct Daemon {
    pub spooler: Spooler<SystemClock, OsGroups>,
    pub reactor: Reactor,
    pub clients: ClientManager,
    pub certs: CredentialStore,
    pub netifs: NetIfList,
    signal_fds: HashMap<RawFd, i32>,
    signal_pipes: Vec<mio::unix::pipe::Receiver>,
    // NOTE(lifetime): held to keep the exclusive daemon lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    shutting_down: bool,
    reload_requested: bool,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon").finish_non_exhaustive()
    }
}

/// Build the daemon: lock, logging targets, persisted state, listeners,
/// signal arm, initial timers.
pub fn startup(config: ServerConfig) -> Result<Daemon, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;
    std::fs::create_dir_all(config.server_root())?;

    let lock_path = config.state_dir.join("pressd.pid");
    let lock_file = File::create(&lock_path)?;
    if lock_file.try_lock_exclusive().is_err() {
        return Err(LifecycleError::Locked(lock_path));
    }
    writeln!(&lock_file, "{}", std::process::id())?;

    let clock = SystemClock;
    let mut spooler = Spooler::new(config, clock, OsGroups);
    spooler
        .spool
        .ensure()
        .map_err(|e| LifecycleError::Spool(e.to_string()))?;
    load_state(&mut spooler);

    // Fatal when the default security profile cannot be created.
    let now = spooler.clock.epoch_secs();
    let certs = CredentialStore::init(
        &spooler.config.server_root(),
        &spooler.config.system_group,
        now,
    )
    .map_err(LifecycleError::Credentials)?;

    let mut reactor = Reactor::new()?;

    let addrs: Vec<SocketAddr> = spooler
        .config
        .listen
        .iter()
        .filter_map(|a| match a.parse() {
            Ok(addr) => Some(addr),
            Err(e) => {
                tracing::warn!(addr = %a, error = %e, "unparseable listen address");
                None
            }
        })
        .collect();
    if addrs.is_empty() {
        return Err(LifecycleError::Bind {
            addr: spooler.config.listen.first().cloned().unwrap_or_default(),
            source: std::io::Error::other("no usable listen addresses"),
        });
    }
    let clients = ClientManager::bind(
        &addrs,
        spooler.config.max_clients,
        spooler.config.max_clients_per_host,
        spooler.config.spool_dir().join("tmp"),
        &mut reactor,
    )
    .map_err(|source| LifecycleError::Bind { addr: addrs[0].to_string(), source })?;

    let (signal_fds, signal_pipes) = install_signal_arm(&mut reactor)?;

    let netifs = NetIfList::new(Duration::from_secs(spooler.config.netif_ttl));
    reactor.add_timer(Instant::now(), TimerTag::NetifRefresh);
    reactor.add_timer(Instant::now() + EXPIRY_SWEEP, TimerTag::SubscriptionExpiry);
    reactor.add_timer(Instant::now(), TimerTag::SelectJobs);

    spooler.emit(EventKind::ServerStarted, None, None, "server started".to_string());
    tracing::info!(listeners = addrs.len(), "pressd started");

    Ok(Daemon {
        spooler,
        reactor,
        clients,
        certs,
        netifs,
        signal_fds,
        signal_pipes,
        lock_file,
        shutting_down: false,
        reload_requested: false,
    })
}

/// Self-pipe per signal, each read end a reactor registration. The mio
/// pipe ends are nonblocking, which signal-hook's writer requires.
fn install_signal_arm(
    reactor: &mut Reactor,
) -> Result<(HashMap<RawFd, i32>, Vec<mio::unix::pipe::Receiver>), LifecycleError> {
    use signal_hook::consts::{SIGCHLD, SIGHUP, SIGINT, SIGTERM};

    let mut fds = HashMap::new();
    let mut pipes = Vec::new();
    for signal in [SIGTERM, SIGINT, SIGHUP, SIGCHLD] {
        let (tx, rx) = mio::unix::pipe::new()?;
        // The write end is handed to the signal handler for the process
        // lifetime.
        signal_hook::low_level::pipe::register_raw(signal, tx.into_raw_fd())?;
        reactor.add(rx.as_raw_fd(), crate::reactor::IoMode::Read, IoTag::Signals)?;
        fds.insert(rx.as_raw_fd(), signal);
        pipes.push(rx);
    }
    Ok((fds, pipes))
}

impl Daemon {
    /// Run until a shutdown signal, then tear down cleanly.
    pub fn run(&mut self) -> Result<(), LifecycleError> {
        while !self.shutting_down {
            self.run_once()?;
            if self.reload_requested {
                self.reload_requested = false;
                self.reload();
            }
        }
        self.shutdown();
        Ok(())
    }

    /// One reactor turn plus housekeeping. Public so tests can drive the
    /// daemon deterministically.
    pub fn run_once(&mut self) -> Result<(), LifecycleError> {
        let (wakeups, expired) = self.reactor.run_once(TICK)?;

        for wakeup in wakeups {
            if !self.reactor.is_current(&wakeup) {
                continue;
            }
            match wakeup.tag {
                IoTag::Listener => self.clients.accept_ready(&mut self.reactor),
                IoTag::Client(id) => {
                    self.clients.handle(id, wakeup, &mut self.spooler, &mut self.reactor)
                }
                IoTag::PipelineStatus(job_id) => {
                    self.spooler.handle_pipeline_status(job_id, &mut self.reactor)
                }
                IoTag::NotifierPipe(_) => {}
                IoTag::Signals => self.handle_signal(wakeup.fd),
            }
        }

        for timer in expired {
            match timer.tag {
                TimerTag::NetifRefresh => {
                    let listeners = self.clients.local_addr().ok().into_iter().collect::<Vec<_>>();
                    let server_name = self.spooler.config.server_name.clone();
                    self.netifs.update(Instant::now(), &server_name, &[], &listeners);
                    let ttl = Duration::from_secs(self.spooler.config.netif_ttl.max(1));
                    self.reactor.add_timer(Instant::now() + ttl, TimerTag::NetifRefresh);
                }
                TimerTag::SubscriptionExpiry => {
                    self.spooler.handle_timer(timer.tag, &mut self.reactor);
                    self.reactor
                        .add_timer(Instant::now() + EXPIRY_SWEEP, TimerTag::SubscriptionExpiry);
                }
                tag => self.spooler.handle_timer(tag, &mut self.reactor),
            }
        }

        if self.spooler.registry.take_dirty() {
            self.write_printcap();
        }
        Ok(())
    }

    fn handle_signal(&mut self, fd: RawFd) {
        let mut buf = [0u8; 64];
        if let Some(pipe) = self.signal_pipes.iter_mut().find(|p| p.as_raw_fd() == fd) {
            while matches!(pipe.read(&mut buf), Ok(n) if n > 0) {}
        }
        match self.signal_fds.get(&fd) {
            Some(&signal_hook::consts::SIGTERM) | Some(&signal_hook::consts::SIGINT) => {
                tracing::info!("shutdown signal received");
                self.shutting_down = true;
            }
            Some(&signal_hook::consts::SIGHUP) => {
                tracing::info!("reload requested");
                self.reload_requested = true;
            }
            Some(&signal_hook::consts::SIGCHLD) => {
                self.spooler.fabric.reap_exited_notifiers();
            }
            _ => {}
        }
    }

    /// SIGHUP: persist, then re-read the persisted configs. Deferred while
    /// chains are active so the filter graph stays quiescent.
    fn reload(&mut self) {
        if self.spooler.active_pipelines() > 0 {
            tracing::warn!("reload deferred: jobs are processing");
            self.reload_requested = true;
            return;
        }
        self.save_state();
        load_state(&mut self.spooler);
        self.spooler
            .emit(EventKind::ServerRestarted, None, None, "configuration reloaded".to_string());
    }

    fn write_printcap(&mut self) {
        let Some(path) = self.spooler.config.printcap.clone() else {
            return;
        };
        let format = self.spooler.config.printcap_format();
        let server_name = self.spooler.config.server_name.clone();
        let default = self.spooler.registry.default_name().map(|n| n.to_string());
        let printers: Vec<&press_core::Printer> = self.spooler.registry.printers().collect();
        let result = File::create(&path).and_then(|mut file| {
            write_printcap(
                &mut file,
                format,
                &server_name,
                printers.iter().copied(),
                default.as_deref(),
            )
        });
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "printcap rewrite failed");
        }
    }

    /// Persist printers, classes, and subscriptions.
    pub fn save_state(&mut self) {
        let root = self.spooler.config.server_root();
        let now = chrono::Utc::now();
        let default = self.spooler.registry.default_name().map(|n| n.to_string());

        let write = |path: PathBuf, classes: bool| -> std::io::Result<()> {
            let mut file = File::create(path)?;
            save_destinations(
                &mut file,
                self.spooler.registry.iter(),
                default.as_deref(),
                classes,
                now,
            )
        };
        if let Err(e) = write(root.join("printers.conf"), false) {
            tracing::warn!(error = %e, "printers.conf save failed");
        }
        if let Err(e) = write(root.join("classes.conf"), true) {
            tracing::warn!(error = %e, "classes.conf save failed");
        }

        let subs = File::create(root.join("subscriptions.conf")).and_then(|mut file| {
            save_subscriptions(
                &mut file,
                self.spooler.fabric.table.next_id(),
                self.spooler.fabric.table.iter(),
                now,
            )
        });
        if let Err(e) = subs {
            tracing::warn!(error = %e, "subscriptions.conf save failed");
        }
    }

    fn shutdown(&mut self) {
        tracing::info!("shutting down");
        self.spooler.emit(EventKind::ServerStopped, None, None, "server stopping".to_string());
        self.spooler.stop_all_jobs();
        self.save_state();
        self.certs.clear();
    }
}

/// Load printers.conf, classes.conf, subscriptions.conf, and the spool
/// directory into the spooler.
pub fn load_state(spooler: &mut Spooler<SystemClock, OsGroups>) {
    let root = spooler.config.server_root();

    for (file, classes) in [("printers.conf", false), ("classes.conf", true)] {
        let path = root.join(file);
        match File::open(&path) {
            Ok(handle) => {
                for block in load_destinations(handle, file) {
                    let is_class = block.printer.is_class();
                    if is_class != classes {
                        continue;
                    }
                    if block.is_default {
                        spooler.registry.set_default(Some(&block.printer.name));
                    }
                    spooler.registry.insert(block.printer);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(file, error = %e, "config unreadable"),
        }
    }
    spooler.registry.materialize_members();
    spooler.registry.rebuild_implicit_classes();

    match File::open(root.join("subscriptions.conf")) {
        Ok(handle) => {
            let parsed = load_subscriptions(handle, "subscriptions.conf");
            spooler.fabric.table =
                crate::events::SubscriptionTable::restore(parsed.subscriptions, parsed.next_id);
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(error = %e, "subscriptions.conf unreadable"),
    }

    match spooler.spool.load_jobs() {
        Ok(jobs) => {
            let now = spooler.clock.epoch_secs();
            for mut job in jobs {
                // A job caught mid-processing by a crash goes back to the
                // queue; its chain is gone.
                if job.state == JobState::Processing {
                    let _ = job.transition(JobState::Stopped, now);
                    let _ = job.transition(JobState::Pending, now);
                    job.printer = None;
                }
                spooler.jobs.insert(job.id, job);
            }
        }
        Err(e) => tracing::warn!(error = %e, "spool scan failed"),
    }
    if let Err(e) = spooler.reseed_job_ids() {
        tracing::warn!(error = %e, "job id reseed failed");
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;

/// Initialize tracing to stderr plus a rolling daemon log.
pub fn init_logging(state_dir: &std::path::Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match std::fs::create_dir_all(state_dir.join("log")) {
        Ok(()) => {
            let appender =
                tracing_appender::rolling::daily(state_dir.join("log"), "pressd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
            None
        }
    }
}
