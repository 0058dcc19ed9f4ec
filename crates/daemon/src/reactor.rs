// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The I/O reactor: one poll loop multiplexing every file descriptor and
//! timer the daemon owns.
//!
//! Registrations are tagged with the subsystem that owns them; `run_once`
//! collects readiness into tagged wakeups which the daemon's dispatch loop
//! matches on. Each registration carries a generation counter so a wakeup
//! harvested before its fd was removed (and possibly reused) can be told
//! apart from the new registration — the deferred-free rule of the contract.

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use press_core::{JobId, SubscriptionId};
use std::collections::{BTreeMap, HashMap};
use std::os::fd::RawFd;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Who owns an fd registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoTag {
    /// Client listener socket
    Listener,
    /// An accepted client session
    Client(u64),
    /// A pipeline's status pipe (read end)
    PipelineStatus(JobId),
    /// A notifier child's stdin pipe (write readiness / error surface)
    NotifierPipe(SubscriptionId),
    /// The signal arm's self-pipe
    Signals,
}

/// Who owns a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTag {
    /// Tick the scheduler's selection pass
    SelectJobs,
    /// Re-dispatch a job after a back-end retry interval
    RetryJob(JobId),
    /// Escalate a cancel from SIGTERM to SIGKILL
    KillPipeline(JobId),
    /// Subscription lease sweep
    SubscriptionExpiry,
    /// Network interface list TTL
    NetifRefresh,
}

/// Readiness directions for a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    Read,
    Write,
    ReadWrite,
}

impl IoMode {
    fn interest(self) -> Interest {
        match self {
            IoMode::Read => Interest::READABLE,
            IoMode::Write => Interest::WRITABLE,
            IoMode::ReadWrite => Interest::READABLE | Interest::WRITABLE,
        }
    }
}

/// One readiness notification handed to the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wakeup {
    pub fd: RawFd,
    pub tag: IoTag,
    pub readable: bool,
    pub writable: bool,
    /// Hard error or hangup; the owner must remove the fd
    pub error: bool,
    /// Registration generation; see [`Reactor::is_current`]
    generation: u64,
}

/// An expired timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired {
    pub tag: TimerTag,
}

#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("fd {0} is not registered")]
    NotRegistered(RawFd),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

struct Entry {
    tag: IoTag,
    mode: IoMode,
    generation: u64,
}

/// Single-threaded fd/timer multiplexer.
pub struct Reactor {
    poll: Poll,
    events: Events,
    entries: HashMap<RawFd, Entry>,
    /// Timers keyed by deadline; the u64 breaks ties between equal instants
    timers: BTreeMap<(Instant, u64), TimerTag>,
    next_generation: u64,
    next_timer_seq: u64,
}

impl Reactor {
    pub fn new() -> Result<Self, ReactorError> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(256),
            entries: HashMap::new(),
            timers: BTreeMap::new(),
            next_generation: 1,
            next_timer_seq: 1,
        })
    }

    /// Watch `fd` for readiness under `tag`. Re-adding an already-registered
    /// fd behaves like [`Reactor::modify`].
    pub fn add(&mut self, fd: RawFd, mode: IoMode, tag: IoTag) -> Result<(), ReactorError> {
        if self.entries.contains_key(&fd) {
            return self.modify(fd, mode, tag);
        }
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Token(fd as usize), mode.interest())?;
        let generation = self.next_generation;
        self.next_generation += 1;
        self.entries.insert(fd, Entry { tag, mode, generation });
        Ok(())
    }

    /// Change the interest or tag of an existing registration.
    pub fn modify(&mut self, fd: RawFd, mode: IoMode, tag: IoTag) -> Result<(), ReactorError> {
        let entry = self.entries.get_mut(&fd).ok_or(ReactorError::NotRegistered(fd))?;
        self.poll
            .registry()
            .reregister(&mut SourceFd(&fd), Token(fd as usize), mode.interest())?;
        entry.mode = mode;
        entry.tag = tag;
        Ok(())
    }

    /// Stop watching `fd`. Readiness already harvested for the old
    /// registration is dropped by the generation check in `run_once`.
    pub fn remove(&mut self, fd: RawFd) -> Result<(), ReactorError> {
        self.entries.remove(&fd).ok_or(ReactorError::NotRegistered(fd))?;
        self.poll.registry().deregister(&mut SourceFd(&fd))?;
        Ok(())
    }

    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.entries.contains_key(&fd)
    }

    pub fn tag(&self, fd: RawFd) -> Option<IoTag> {
        self.entries.get(&fd).map(|e| e.tag)
    }

    /// Whether a harvested wakeup still refers to a live registration.
    ///
    /// The dispatch loop checks this before acting on each wakeup: an fd
    /// removed (even if re-registered) by an earlier dispatch in the same
    /// batch must not see the stale notification.
    pub fn is_current(&self, wakeup: &Wakeup) -> bool {
        self.entries
            .get(&wakeup.fd)
            .is_some_and(|e| e.generation == wakeup.generation)
    }

    /// Arm a timer for `at`. Multiple timers may share a deadline.
    pub fn add_timer(&mut self, at: Instant, tag: TimerTag) {
        let seq = self.next_timer_seq;
        self.next_timer_seq += 1;
        self.timers.insert((at, seq), tag);
    }

    /// Re-arm the first timer with `tag` to a new deadline, or create it.
    pub fn update_timer(&mut self, at: Instant, tag: TimerTag) {
        self.remove_timer(tag);
        self.add_timer(at, tag);
    }

    /// Remove every timer carrying `tag`.
    pub fn remove_timer(&mut self, tag: TimerTag) {
        self.timers.retain(|_, t| *t != tag);
    }

    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Wait up to `timeout` for readiness, returning tagged wakeups (each
    /// ready fd at most once) and expired timers (each at most once).
    pub fn run_once(
        &mut self,
        timeout: Duration,
    ) -> Result<(Vec<Wakeup>, Vec<Expired>), ReactorError> {
        let now = Instant::now();
        let poll_timeout = match self.timers.keys().next() {
            Some((deadline, _)) if *deadline <= now => Duration::ZERO,
            Some((deadline, _)) => timeout.min(*deadline - now),
            None => timeout,
        };

        match self.poll.poll(&mut self.events, Some(poll_timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }

        let mut wakeups = Vec::new();
        for event in self.events.iter() {
            let fd = event.token().0 as RawFd;
            let Some(entry) = self.entries.get(&fd) else {
                continue;
            };
            wakeups.push(Wakeup {
                fd,
                tag: entry.tag,
                readable: event.is_readable() || event.is_read_closed(),
                writable: event.is_writable(),
                error: event.is_error()
                    || (event.is_read_closed() && entry.mode == IoMode::Write),
                generation: entry.generation,
            });
        }

        let now = Instant::now();
        let mut expired = Vec::new();
        while let Some((key, tag)) = self.timers.first_key_value() {
            if key.0 > now {
                break;
            }
            expired.push(Expired { tag: *tag });
            let key = *key;
            self.timers.remove(&key);
        }

        Ok((wakeups, expired))
    }
}

#[cfg(test)]
#[path = "reactor_tests.rs"]
mod tests;
