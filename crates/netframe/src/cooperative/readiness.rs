use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use mio::{
    Events, Interest, Poll, Token,
    net::{TcpListener, TcpStream},
};
use tracing::{debug, info, warn};

use crate::{error::Result, handler::MessageHandler, settings::Settings};

use super::task::{IoDirection, ResumableWorker, StepOutcome};

const LISTENER: Token = Token(0);

struct Task {
    peer: SocketAddr,
    worker: ResumableWorker<TcpStream>,
}

/// Which of the two interest sets (spec.md §4.7) a connection socket is
/// currently registered under.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Registered {
    Read,
    Write,
}

/// Readiness-driven cooperative scheduler built on `mio`'s multi-socket
/// readiness primitive (`epoll`/`kqueue`/IOCP depending on platform).
///
/// Unlike [`super::BusyLoopServer`], a task is only ever stepped when the
/// readiness primitive reports its socket ready for the operation it is
/// currently suspended on — there is no polling. The listening socket is
/// permanently registered for read interest; every connection socket is
/// registered for exactly one of read or write interest at a time,
/// migrating between the two as its task suspends on one or the other.
pub struct ReadinessServer {
    poll: Poll,
    listener: TcpListener,
    settings: Settings,
    handler: Arc<dyn MessageHandler>,
    tasks: HashMap<Token, Task>,
    registered: HashMap<Token, Registered>,
    next_token: usize,
}

impl ReadinessServer {
    pub fn bind(settings: Settings, handler: Arc<dyn MessageHandler>) -> Result<Self> {
        let addr = (settings.server_address(), settings.port());
        let std_listener = std::net::TcpListener::bind(addr)?;
        std_listener.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(std_listener);
        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;
        info!(?addr, "listening (readiness cooperative)");
        Ok(Self {
            poll,
            listener,
            settings,
            handler,
            tasks: HashMap::new(),
            registered: HashMap::new(),
            next_token: 1,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn active_connections(&self) -> usize {
        self.tasks.len()
    }

    /// Runs readiness ticks until `shutdown` is set. The wait is bounded
    /// (unlike the unbounded wait spec.md §4.7 describes as the base
    /// design) purely so shutdown is observed without an extra wakeup
    /// mechanism; it has no bearing on which sockets get resumed.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        let mut events = Events::with_capacity(256);
        while !shutdown.load(Ordering::Relaxed) {
            self.tick(&mut events, Some(Duration::from_millis(200)))?;
        }
        Ok(())
    }

    /// Waits for readiness once and dispatches every reported event.
    /// Exposed separately from [`Self::run`] so tests can drive the
    /// scheduler deterministically without a background thread.
    pub fn tick(&mut self, events: &mut Events, timeout: Option<Duration>) -> Result<()> {
        match self.poll.poll(events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => {
                warn!(error = %e, "readiness wait failed");
                return Err(e.into());
            }
        }

        let tokens: Vec<Token> = events.iter().map(|e| e.token()).collect();
        for token in tokens {
            if token == LISTENER {
                self.accept_all()?;
            } else if self.tasks.contains_key(&token) {
                self.drive(token);
            } else {
                netframe_utils::safe_panic!("readiness event for unknown token {token:?}");
            }
        }
        Ok(())
    }

    fn accept_all(&mut self) -> Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.register_new(stream, peer)?,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    warn!(error = %e, "listener accept failed");
                    return Err(e.into());
                }
            }
        }
    }

    fn register_new(&mut self, mut stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll.registry().register(&mut stream, token, Interest::READABLE)?;
        info!(%peer, "accepted connection");
        let worker = ResumableWorker::new(stream, self.settings.clone());
        self.tasks.insert(token, Task { peer, worker });
        self.registered.insert(token, Registered::Read);
        self.drive(token);
        Ok(())
    }

    /// Steps the task at `token` until it suspends, finishes, or fails. One
    /// readiness notification can unblock several already-buffered
    /// messages, so a single `step()` call is not enough.
    fn drive(&mut self, token: Token) {
        loop {
            let Some(task) = self.tasks.get_mut(&token) else { return };
            match task.worker.step(self.handler.as_ref()) {
                StepOutcome::Progressed => continue,
                StepOutcome::Suspended(dir) => {
                    self.reinterest(token, dir);
                    return;
                }
                StepOutcome::Done => {
                    debug!(peer = %task.peer, "connection closed");
                    self.remove(token);
                    return;
                }
                StepOutcome::Failed(e) => {
                    warn!(peer = %task.peer, error = %e, "connection ended with an error");
                    self.remove(token);
                    return;
                }
            }
        }
    }

    /// Moves `token` into the interest set matching the direction it just
    /// suspended on, re-registering with `mio` only when that set actually
    /// changed.
    fn reinterest(&mut self, token: Token, dir: IoDirection) {
        let want = match dir {
            IoDirection::Read => Registered::Read,
            IoDirection::Write => Registered::Write,
        };
        if self.registered.get(&token) == Some(&want) {
            return;
        }
        let interest = match want {
            Registered::Read => Interest::READABLE,
            Registered::Write => Interest::WRITABLE,
        };
        let Some(task) = self.tasks.get_mut(&token) else { return };
        match self.poll.registry().reregister(task.worker.stream_mut(), token, interest) {
            Ok(()) => {
                self.registered.insert(token, want);
            }
            Err(e) => warn!(?token, error = %e, "failed to reregister socket interest"),
        }
    }

    fn remove(&mut self, token: Token) {
        if let Some(mut task) = self.tasks.remove(&token) {
            let _ = self.poll.registry().deregister(task.worker.stream_mut());
        }
        self.registered.remove(&token);
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpStream as StdTcpStream;

    use serde_json::json;

    use super::*;
    use crate::handler::EchoHandler;

    fn poll_client(stream: StdTcpStream, settings: Settings) -> crate::blocking::BlockingWorker<StdTcpStream> {
        stream.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
        crate::blocking::BlockingWorker::new(stream, settings)
    }

    #[test]
    fn echoes_a_single_message() {
        let settings = Settings::default().with_port(0);
        let mut server = ReadinessServer::bind(settings.clone(), Arc::new(EchoHandler)).unwrap();
        let port = server.local_addr().unwrap().port();

        let client = StdTcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut client_worker = poll_client(client, settings);
        client_worker.send(&json!("whatever")).unwrap();

        let mut events = Events::with_capacity(16);
        let mut reply = None;
        for _ in 0..200 {
            server.tick(&mut events, Some(Duration::from_millis(10))).unwrap();
            if let Ok(v) = client_worker.receive_one() {
                reply = Some(v);
                break;
            }
        }
        assert_eq!(reply, Some(json!("whatever")));
    }

    #[test]
    fn tracks_connections_until_orderly_close() {
        let settings = Settings::default().with_port(0);
        let mut server = ReadinessServer::bind(settings.clone(), Arc::new(EchoHandler)).unwrap();
        let port = server.local_addr().unwrap().port();

        {
            let client = StdTcpStream::connect(("127.0.0.1", port)).unwrap();
            let mut worker = poll_client(client, settings);
            worker.send(&json!("bye")).unwrap();
        }

        let mut events = Events::with_capacity(16);
        for _ in 0..200 {
            server.tick(&mut events, Some(Duration::from_millis(10))).unwrap();
            if server.active_connections() == 0 {
                break;
            }
        }
        assert_eq!(server.active_connections(), 0);
    }

    #[test]
    fn serves_several_clients_concurrently() {
        let settings = Settings::default().with_port(0);
        let mut server = ReadinessServer::bind(settings.clone(), Arc::new(EchoHandler)).unwrap();
        let port = server.local_addr().unwrap().port();

        let mut clients: Vec<_> = (0..3)
            .map(|i| {
                let client = StdTcpStream::connect(("127.0.0.1", port)).unwrap();
                let mut worker = poll_client(client, settings.clone());
                worker.send(&json!(i)).unwrap();
                worker
            })
            .collect();

        let mut events = Events::with_capacity(16);
        let mut replies = vec![None; 3];
        for _ in 0..500 {
            server.tick(&mut events, Some(Duration::from_millis(10))).unwrap();
            for (i, worker) in clients.iter_mut().enumerate() {
                if replies[i].is_none() {
                    if let Ok(v) = worker.receive_one() {
                        replies[i] = Some(v);
                    }
                }
            }
            if replies.iter().all(Option::is_some) {
                break;
            }
        }
        for (i, r) in replies.into_iter().enumerate() {
            assert_eq!(r, Some(json!(i)), "client {i} never got a reply");
        }
    }
}
