//! Async Connect Engine (§4.7) and Accept (§4.8). Ported from
//! `internal_tcp_connect_async`/`check_connect_finished` and
//! `crm_remote_accept` in `lib/common/remote.c`.

use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::{FromRawFd, IntoRawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mio::net::TcpStream as MioTcpStream;
use mio::{Events, Interest, Poll, Token};

use crate::error::{Error, Result};
use crate::scheduler::{Scheduler, TimerId};

/// Fires the first progress check almost immediately when `connect`
/// succeeded synchronously (the common case on loopback).
const IMMEDIATE_RECHECK: Duration = Duration::from_millis(1);
/// Otherwise polls for connect completion at this interval (§4.7.1).
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The Rust analogue of the Async Connect Context (§3): dropping it before
/// resolution cancels the scheduled progress check. Production code is
/// expected to hold onto it only until the callback fires.
pub struct ConnectHandle {
    scheduler: Arc<dyn Scheduler>,
    inner: Arc<Mutex<Option<TimerId>>>,
    resolved: Arc<AtomicBool>,
}

impl Drop for ConnectHandle {
    fn drop(&mut self) {
        if self.resolved.load(Ordering::SeqCst) {
            return;
        }
        if let Some(timer) = self.inner.lock().unwrap().take() {
            self.scheduler.cancel(timer);
        }
    }
}

/// §4.7 `connect_async`: resolve `host`, attempt a non-blocking connect
/// against every resolved address in order, and deliver the outcome to
/// `callback` once — either the connected stream or a terminal error. The
/// source delivers a raw fd through a C callback; this delivers an owned
/// `TcpStream` (or the negative-errno-shaped `Error`) instead, since Rust
/// has no equivalent of "hand over a bare descriptor" without also handing
/// over ownership.
pub fn connect_async(
    scheduler: Arc<dyn Scheduler>,
    host: &str,
    port: u16,
    timeout_ms: u64,
    callback: impl FnOnce(Result<TcpStream>) + Send + 'static,
) -> ConnectHandle {
    let resolved = Arc::new(AtomicBool::new(false));
    let inner = Arc::new(Mutex::new(None));

    let addrs: Vec<SocketAddr> = match (host, port).to_socket_addrs() {
        Ok(iter) => iter.collect(),
        Err(e) => {
            resolved.store(true, Ordering::SeqCst);
            callback(Err(Error::NameResolution(e.to_string())));
            return ConnectHandle { scheduler, inner, resolved };
        }
    };

    if addrs.is_empty() {
        resolved.store(true, Ordering::SeqCst);
        callback(Err(Error::NameResolution(host.to_string())));
        return ConnectHandle { scheduler, inner, resolved };
    }

    try_next_address(
        scheduler.clone(),
        addrs,
        0,
        timeout_ms,
        Instant::now(),
        Box::new(callback),
        inner.clone(),
        resolved.clone(),
    );

    ConnectHandle { scheduler, inner, resolved }
}

type Callback = Box<dyn FnOnce(Result<TcpStream>) + Send>;

fn try_next_address(
    scheduler: Arc<dyn Scheduler>,
    addrs: Vec<SocketAddr>,
    index: usize,
    timeout_ms: u64,
    start: Instant,
    callback: Callback,
    inner: Arc<Mutex<Option<TimerId>>>,
    resolved: Arc<AtomicBool>,
) {
    if index >= addrs.len() {
        resolved.store(true, Ordering::SeqCst);
        callback(Err(Error::Timeout("connect: address list exhausted")));
        return;
    }

    let addr = addrs[index];
    log::debug!("Attempting connection to {addr}");

    let stream = match MioTcpStream::connect(addr) {
        Ok(s) => s,
        Err(_) => {
            try_next_address(scheduler, addrs, index + 1, timeout_ms, start, callback, inner, resolved);
            return;
        }
    };

    let first_interval = match stream.take_error() {
        Ok(None) => IMMEDIATE_RECHECK,
        _ => POLL_INTERVAL,
    };

    schedule_progress_check(
        scheduler,
        stream,
        addrs,
        index,
        timeout_ms,
        start,
        callback,
        inner,
        resolved,
        first_interval,
    );
}

#[allow(clippy::too_many_arguments)]
fn schedule_progress_check(
    scheduler: Arc<dyn Scheduler>,
    stream: MioTcpStream,
    addrs: Vec<SocketAddr>,
    index: usize,
    timeout_ms: u64,
    start: Instant,
    callback: Callback,
    inner: Arc<Mutex<Option<TimerId>>>,
    resolved: Arc<AtomicBool>,
    interval: Duration,
) {
    let scheduler_for_cb = scheduler.clone();
    let inner_for_cb = inner.clone();
    let resolved_for_cb = resolved.clone();

    let timer = scheduler.schedule_after(
        interval,
        Box::new(move || {
            progress_check(
                scheduler_for_cb,
                stream,
                addrs,
                index,
                timeout_ms,
                start,
                callback,
                inner_for_cb,
                resolved_for_cb,
            );
        }),
    );
    *inner.lock().unwrap() = Some(timer);
}

#[allow(clippy::too_many_arguments)]
fn progress_check(
    scheduler: Arc<dyn Scheduler>,
    mut stream: MioTcpStream,
    addrs: Vec<SocketAddr>,
    index: usize,
    timeout_ms: u64,
    start: Instant,
    callback: Callback,
    inner: Arc<Mutex<Option<TimerId>>>,
    resolved: Arc<AtomicBool>,
) {
    let elapsed = start.elapsed().as_millis() as u64;

    if is_writable(&mut stream) {
        match stream.take_error() {
            Ok(None) => {
                resolved.store(true, Ordering::SeqCst);
                let std_stream = mio_to_std(stream);
                callback(Ok(std_stream));
            }
            Ok(Some(e)) => {
                resolved.store(true, Ordering::SeqCst);
                callback(Err(Error::Io(e)));
            }
            Err(e) => {
                resolved.store(true, Ordering::SeqCst);
                callback(Err(Error::Io(e)));
            }
        }
        return;
    }

    if elapsed >= timeout_ms {
        resolved.store(true, Ordering::SeqCst);
        callback(Err(Error::Timeout("connect")));
        return;
    }

    schedule_progress_check(
        scheduler,
        stream,
        addrs,
        index,
        timeout_ms,
        start,
        callback,
        inner,
        resolved,
        POLL_INTERVAL,
    );
}

/// Zero-timeout writable-readiness test, the Rust equivalent of a 0-timeout
/// `poll()`/`select()` call on the connecting socket (§4.7.1).
fn is_writable(stream: &mut MioTcpStream) -> bool {
    let Ok(mut poll) = Poll::new() else { return false };
    let mut events = Events::with_capacity(1);
    if poll.registry().register(stream, Token(0), Interest::WRITABLE).is_err() {
        return false;
    }
    let ready = poll.poll(&mut events, Some(Duration::ZERO)).is_ok() && !events.is_empty();
    let _ = poll.registry().deregister(stream);
    ready
}

fn mio_to_std(stream: MioTcpStream) -> TcpStream {
    #[cfg(unix)]
    {
        let fd = stream.into_raw_fd();
        unsafe { TcpStream::from_raw_fd(fd) }
    }
    #[cfg(not(unix))]
    {
        compile_error!("remote-transport targets Unix cluster nodes only");
    }
}

/// §4.8 `accept_connection`: accept, log the peer, set non-blocking, and
/// apply `TCP_USER_TIMEOUT` when a watchdog budget is configured.
pub fn accept_connection(listener: &TcpListener, sbd_timeout_secs: Option<u32>) -> Result<TcpStream> {
    let (stream, peer) = listener.accept().map_err(Error::Io)?;
    log::info!("Accepted remote connection from {peer}");
    stream.set_nonblocking(true).map_err(Error::Io)?;

    if let Some(sbd_timeout) = sbd_timeout_secs {
        apply_tcp_user_timeout(&stream, sbd_timeout / 2);
    }

    Ok(stream)
}

#[cfg(target_os = "linux")]
fn apply_tcp_user_timeout(stream: &TcpStream, timeout_secs: u32) {
    use std::os::fd::AsRawFd;

    let timeout_ms: libc::c_uint = timeout_secs.saturating_mul(1000);
    let fd = stream.as_raw_fd();
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_USER_TIMEOUT,
            &timeout_ms as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_uint>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        log::warn!("Could not set TCP_USER_TIMEOUT on accepted connection");
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_tcp_user_timeout(_stream: &TcpStream, _timeout_secs: u32) {}
