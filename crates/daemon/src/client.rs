// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client sessions over the listener socket.
//!
//! Each accepted connection runs a small state machine: Waiting/Headers
//! consume the JSON header line, Body streams document bytes into a
//! temporary upload file, Dispatch executes against the spooler, Response
//! drains the reply. Closing a connection mid-upload unlinks the partial
//! file and enqueues nothing.

use crate::protocol::{JobInfo, PrinterInfo, Request, Response};
use crate::reactor::{IoMode, IoTag, Reactor, Wakeup};
use crate::scheduler::{Spooler, SubmitFile, SubmitRequest};
use mio::net::{TcpListener, TcpStream};
use press_core::{
    Clock, EventMask, GroupLookup, JobId, Operation, SpoolError, Subscription, SubscriptionId,
};
use smol_str::SmolStr;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::IpAddr;
use std::os::fd::AsRawFd;
use std::path::PathBuf;

/// Per-connection state machine phase.
enum Phase {
    /// Idle between requests
    Waiting,
    /// A partial header line is buffered
    Headers,
    /// Streaming `remaining` document bytes into the upload file
    Body { request: Request, upload: Upload, remaining: usize },
    /// Draining the serialized response
    Response,
}

struct Upload {
    path: PathBuf,
    file: std::fs::File,
}

struct Session {
    stream: TcpStream,
    peer: IpAddr,
    phase: Phase,
    inbuf: Vec<u8>,
    outbuf: Vec<u8>,
}

/// Listeners plus session table, with the global and per-host caps.
pub struct ClientManager {
    listeners: Vec<TcpListener>,
    sessions: HashMap<u64, Session>,
    next_session: u64,
    max_clients: usize,
    max_per_host: usize,
    upload_dir: PathBuf,
}

impl ClientManager {
    /// Bind the listeners and register them with the reactor. The first
    /// address is required; failures on the rest are logged and skipped.
    pub fn bind(
        addrs: &[std::net::SocketAddr],
        max_clients: usize,
        max_per_host: usize,
        upload_dir: PathBuf,
        reactor: &mut Reactor,
    ) -> std::io::Result<ClientManager> {
        let mut listeners = Vec::new();
        for (index, addr) in addrs.iter().enumerate() {
            match TcpListener::bind(*addr) {
                Ok(listener) => {
                    let fd = listener.as_raw_fd();
                    reactor
                        .add(fd, IoMode::Read, IoTag::Listener)
                        .map_err(|e| std::io::Error::other(e.to_string()))?;
                    listeners.push(listener);
                }
                Err(e) if index == 0 => return Err(e),
                Err(e) => {
                    tracing::warn!(%addr, error = %e, "extra listener skipped");
                }
            }
        }
        std::fs::create_dir_all(&upload_dir)?;
        Ok(ClientManager {
            listeners,
            sessions: HashMap::new(),
            next_session: 1,
            max_clients,
            max_per_host,
            upload_dir,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        match self.listeners.first() {
            Some(listener) => listener.local_addr(),
            None => Err(std::io::Error::other("no listener bound")),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Accept every pending connection, enforcing the session caps.
    pub fn accept_ready(&mut self, reactor: &mut Reactor) {
        let mut accepted: Vec<(TcpStream, IpAddr)> = Vec::new();
        for listener in &self.listeners {
            loop {
                match listener.accept() {
                    Ok((stream, peer)) => accepted.push((stream, peer.ip())),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        break;
                    }
                }
            }
        }
        for (stream, peer) in accepted {
            self.admit(stream, peer, reactor);
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: IpAddr, reactor: &mut Reactor) {
        if self.sessions.len() >= self.max_clients {
            tracing::warn!(%peer, "MaxClients reached; refusing connection");
            return;
        }
        let from_host = self.sessions.values().filter(|s| s.peer == peer).count();
        if from_host >= self.max_per_host {
            tracing::warn!(%peer, "MaxClientsPerHost reached; refusing connection");
            return;
        }

        let id = self.next_session;
        self.next_session += 1;
        let fd = stream.as_raw_fd();
        if let Err(e) = reactor.add(fd, IoMode::Read, IoTag::Client(id)) {
            tracing::warn!(error = %e, "session registration failed");
            return;
        }
        tracing::debug!(session = id, %peer, "client connected");
        self.sessions.insert(
            id,
            Session {
                stream,
                peer,
                phase: Phase::Waiting,
                inbuf: Vec::new(),
                outbuf: Vec::new(),
            },
        );
    }

    /// Reactor wakeup for one session.
    pub fn handle<C: Clock, G: GroupLookup>(
        &mut self,
        id: u64,
        wakeup: Wakeup,
        spooler: &mut Spooler<C, G>,
        reactor: &mut Reactor,
    ) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };

        if wakeup.error {
            self.close(id, reactor);
            return;
        }

        if wakeup.readable {
            let mut closed = false;
            let mut chunk = [0u8; 8192];
            loop {
                match session.stream.read(&mut chunk) {
                    Ok(0) => {
                        closed = true;
                        break;
                    }
                    Ok(n) => session.inbuf.extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => {
                        closed = true;
                        break;
                    }
                }
            }
            if closed {
                self.close(id, reactor);
                return;
            }
            self.advance(id, spooler, reactor);
        }

        if wakeup.writable {
            self.flush(id, reactor);
        }
    }

    /// Drive the state machine over whatever is buffered.
    fn advance<C: Clock, G: GroupLookup>(
        &mut self,
        id: u64,
        spooler: &mut Spooler<C, G>,
        reactor: &mut Reactor,
    ) {
        enum Step {
            NeedMore,
            StartBody(Request, usize),
            Dispatch(Request, Vec<u8>),
            FinishBody,
            Reply(Response),
            Close,
        }

        loop {
            let step = {
                let Some(session) = self.sessions.get_mut(&id) else { return };
                match &mut session.phase {
                    Phase::Waiting | Phase::Headers => {
                        match session.inbuf.iter().position(|b| *b == b'\n') {
                            None => {
                                session.phase = if session.inbuf.is_empty() {
                                    Phase::Waiting
                                } else {
                                    Phase::Headers
                                };
                                Step::NeedMore
                            }
                            Some(pos) => {
                                let line: Vec<u8> = session.inbuf.drain(..=pos).collect();
                                match serde_json::from_slice::<Request>(&line) {
                                    Err(e) => {
                                        tracing::debug!(session = id, error = %e, "bad request line");
                                        Step::Reply(Response::Error {
                                            kind: "bad-request".to_string(),
                                            message: e.to_string(),
                                        })
                                    }
                                    Ok(request) => {
                                        let body = request.body_length();
                                        if body > 0 {
                                            Step::StartBody(request, body)
                                        } else {
                                            Step::Dispatch(request, Vec::new())
                                        }
                                    }
                                }
                            }
                        }
                    }
                    Phase::Body { upload, remaining, .. } => {
                        let take = (*remaining).min(session.inbuf.len());
                        if take > 0 {
                            let bytes: Vec<u8> = session.inbuf.drain(..take).collect();
                            if upload.file.write_all(&bytes).is_err() {
                                tracing::warn!(session = id, "upload write failed");
                                Step::Close
                            } else {
                                *remaining -= take;
                                if *remaining > 0 {
                                    Step::NeedMore
                                } else {
                                    Step::FinishBody
                                }
                            }
                        } else if *remaining > 0 {
                            Step::NeedMore
                        } else {
                            Step::FinishBody
                        }
                    }
                    Phase::Response => Step::NeedMore,
                }
            };

            match step {
                Step::NeedMore => return,
                Step::Close => {
                    self.close(id, reactor);
                    return;
                }
                Step::StartBody(request, body) => match self.open_upload(id) {
                    Ok(upload) => {
                        if let Some(session) = self.sessions.get_mut(&id) {
                            session.phase = Phase::Body { request, upload, remaining: body };
                        }
                        // Loop again: body bytes may already be buffered.
                    }
                    Err(e) => {
                        let response = Response::error(&SpoolError::Io(e));
                        self.respond(id, &response, reactor);
                        return;
                    }
                },
                Step::FinishBody => {
                    let Some(session) = self.sessions.get_mut(&id) else { return };
                    let phase = std::mem::replace(&mut session.phase, Phase::Waiting);
                    let Phase::Body { request, upload, .. } = phase else { return };
                    let data = std::fs::read(&upload.path).unwrap_or_default();
                    let _ = std::fs::remove_file(&upload.path);
                    let response = execute(spooler, request, data, reactor);
                    self.respond(id, &response, reactor);
                    return;
                }
                Step::Dispatch(request, data) => {
                    let response = execute(spooler, request, data, reactor);
                    self.respond(id, &response, reactor);
                    return;
                }
                Step::Reply(response) => {
                    self.respond(id, &response, reactor);
                    return;
                }
            }
        }
    }

    fn open_upload(&mut self, id: u64) -> std::io::Result<Upload> {
        let path = self.upload_dir.join(format!("u{id:05}"));
        let file = std::fs::File::create(&path)?;
        Ok(Upload { path, file })
    }

    fn respond(&mut self, id: u64, response: &Response, reactor: &mut Reactor) {
        let Some(session) = self.sessions.get_mut(&id) else { return };
        match serde_json::to_vec(response) {
            Ok(mut line) => {
                line.push(b'\n');
                session.outbuf.extend_from_slice(&line);
                session.phase = Phase::Response;
                let fd = session.stream.as_raw_fd();
                let _ = reactor.modify(fd, IoMode::ReadWrite, IoTag::Client(id));
                self.flush(id, reactor);
            }
            Err(e) => {
                tracing::warn!(session = id, error = %e, "response serialization failed");
                self.close(id, reactor);
            }
        }
    }

    fn flush(&mut self, id: u64, reactor: &mut Reactor) {
        let Some(session) = self.sessions.get_mut(&id) else { return };
        while !session.outbuf.is_empty() {
            match session.stream.write(&session.outbuf) {
                Ok(0) => {
                    self.close(id, reactor);
                    return;
                }
                Ok(n) => {
                    session.outbuf.drain(..n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.close(id, reactor);
                    return;
                }
            }
        }
        if matches!(session.phase, Phase::Response) {
            session.phase = Phase::Waiting;
            let fd = session.stream.as_raw_fd();
            let _ = reactor.modify(fd, IoMode::Read, IoTag::Client(id));
        }
    }

    /// Tear down a session; a half-written upload is unlinked and nothing
    /// is enqueued.
    pub fn close(&mut self, id: u64, reactor: &mut Reactor) {
        let Some(session) = self.sessions.remove(&id) else { return };
        let fd = session.stream.as_raw_fd();
        let _ = reactor.remove(fd);
        if let Phase::Body { upload, .. } = session.phase {
            tracing::debug!(session = id, "discarding partial upload");
            let _ = std::fs::remove_file(&upload.path);
        }
        tracing::debug!(session = id, "client disconnected");
    }
}

/// Execute one parsed request against the spooler.
pub fn execute<C: Clock, G: GroupLookup>(
    spooler: &mut Spooler<C, G>,
    request: Request,
    body: Vec<u8>,
    reactor: &mut Reactor,
) -> Response {
    match run(spooler, request, body, reactor) {
        Ok(response) => response,
        Err(err) => Response::error(&err),
    }
}

fn job_owner<C: Clock, G: GroupLookup>(
    spooler: &Spooler<C, G>,
    id: u32,
) -> Result<(JobId, String, SmolStr), SpoolError> {
    let job_id = JobId(id);
    let job = spooler.jobs.get(&job_id).ok_or(SpoolError::NoSuchJob(id))?;
    Ok((job_id, job.user.clone(), job.dest.clone()))
}

fn run<C: Clock, G: GroupLookup>(
    spooler: &mut Spooler<C, G>,
    request: Request,
    body: Vec<u8>,
    reactor: &mut Reactor,
) -> Result<Response, SpoolError> {
    match request {
        Request::PrintJob { dest, user, title, priority, mime_type, options, data_length } => {
            debug_assert_eq!(body.len(), data_length);
            let submit = SubmitRequest {
                dest,
                user,
                title,
                priority,
                options: options
                    .into_iter()
                    .map(|(k, v)| (SmolStr::new(k), v))
                    .collect(),
                files: vec![SubmitFile { mime_type, data: body }],
            };
            let id = spooler.submit_job(submit, reactor)?;
            Ok(Response::job(id))
        }
        Request::CancelJob { id, user } => {
            let (job_id, owner, dest) = job_owner(spooler, id)?;
            spooler.check_access(&dest, Operation::CancelJob, &user, Some(&owner))?;
            spooler.cancel_job(job_id, reactor)?;
            Ok(Response::ok())
        }
        Request::HoldJob { id, user } => {
            let (job_id, owner, dest) = job_owner(spooler, id)?;
            spooler.check_access(&dest, Operation::HoldJob, &user, Some(&owner))?;
            spooler.hold_job(job_id, None)?;
            Ok(Response::ok())
        }
        Request::ReleaseJob { id, user } => {
            let (job_id, owner, dest) = job_owner(spooler, id)?;
            spooler.check_access(&dest, Operation::ReleaseJob, &user, Some(&owner))?;
            spooler.release_job(job_id, reactor)?;
            Ok(Response::ok())
        }
        Request::RestartJob { id, user } => {
            let (job_id, owner, dest) = job_owner(spooler, id)?;
            spooler.check_access(&dest, Operation::RestartJob, &user, Some(&owner))?;
            spooler.restart_job(job_id, reactor)?;
            Ok(Response::ok())
        }
        Request::MoveJob { id, dest, user } => {
            let (job_id, owner, _) = job_owner(spooler, id)?;
            spooler.check_access(&dest, Operation::MoveJob, &user, Some(&owner))?;
            spooler.move_job(job_id, &dest)?;
            Ok(Response::ok())
        }
        Request::PausePrinter { printer, user, message } => {
            spooler.check_access(&printer, Operation::PausePrinter, &user, None)?;
            spooler.pause_printer(&printer, &message, reactor)?;
            Ok(Response::ok())
        }
        Request::ResumePrinter { printer, user } => {
            spooler.check_access(&printer, Operation::ResumePrinter, &user, None)?;
            spooler.resume_printer(&printer, reactor)?;
            Ok(Response::ok())
        }
        Request::AcceptJobs { printer, user } => {
            spooler.check_access(&printer, Operation::AcceptJobs, &user, None)?;
            spooler.set_accepting(&printer, true)?;
            Ok(Response::ok())
        }
        Request::RejectJobs { printer, user } => {
            spooler.check_access(&printer, Operation::RejectJobs, &user, None)?;
            spooler.set_accepting(&printer, false)?;
            Ok(Response::ok())
        }
        Request::DeletePrinter { printer, user } => {
            spooler.check_access(&printer, Operation::DeletePrinter, &user, None)?;
            spooler.delete_printer(&printer, reactor)?;
            Ok(Response::ok())
        }
        Request::GetPrinters => {
            let printers = spooler
                .registry
                .iter()
                .map(|p| PrinterInfo {
                    name: p.name.clone(),
                    state: p.state,
                    accepting: p.accepting,
                    info: p.info.clone(),
                    location: p.location.clone(),
                    reasons: p.reasons.clone(),
                    is_class: p.is_class(),
                })
                .collect();
            Ok(Response::Printers { printers })
        }
        Request::GetJobs { dest } => {
            let jobs = spooler
                .jobs
                .values()
                .filter(|j| {
                    dest.as_deref()
                        .is_none_or(|d| j.dest.eq_ignore_ascii_case(d))
                })
                .map(|j| JobInfo {
                    id: j.id.0,
                    dest: j.dest.clone(),
                    user: j.user.clone(),
                    title: j.title.clone(),
                    state: j.state,
                    priority: j.priority,
                    sheets: j.sheets,
                })
                .collect();
            Ok(Response::Jobs { jobs })
        }
        Request::CreateSubscription {
            user,
            events,
            printer,
            job,
            recipient,
            lease,
            interval,
            user_data,
        } => {
            // Job-scoped and global subscriptions answer to the server
            // default policy; printer-scoped ones to the printer's.
            match &printer {
                Some(printer) => {
                    spooler.check_access(printer, Operation::CreateSubscription, &user, None)?
                }
                None => {
                    spooler.check_server_access(Operation::CreateSubscription, &user, None)?
                }
            }
            let mask = EventMask::parse_list(&events);
            let now = spooler.clock.epoch_secs();
            let mut sub = Subscription::new(SubscriptionId(0), mask, user)
                .recipient(recipient)
                .user_data(user_data)
                .interval(interval)
                .with_lease(lease, now);
            sub.printer = printer.map(SmolStr::new);
            sub.job = job.map(JobId);
            let caps = spooler.fabric.caps();
            let id = spooler.fabric.table.add(sub, caps)?;
            Ok(Response::subscription(id))
        }
        Request::CancelSubscription { id, user } => {
            let sub_id = SubscriptionId(id);
            let owner = spooler
                .fabric
                .table
                .get(sub_id)
                .map(|s| s.owner.clone())
                .ok_or(SpoolError::ResourceExhausted(format!("subscription {id}")))?;
            spooler.check_server_access(Operation::CancelSubscription, &user, Some(&owner))?;
            spooler.fabric.table.remove(sub_id);
            spooler.fabric.reap_notifier(sub_id);
            Ok(Response::ok())
        }
        Request::GetEvents { subscription, since } => {
            let sub = spooler
                .fabric
                .table
                .get(SubscriptionId(subscription))
                .ok_or(SpoolError::ResourceExhausted(format!(
                    "subscription {subscription}"
                )))?;
            let events = sub
                .events
                .iter()
                .filter(|e| e.sequence >= since)
                .cloned()
                .collect();
            Ok(Response::Events { events })
        }
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
