//! Listener thread and worker pool.
//!
//! `start` binds the socket, prepares the pool root, spawns one thread per
//! worker slot and then the listener. The listener accepts, hands each
//! connection to an idle worker through the [`Coordinator`], greets the
//! client with the claiming worker's id and goes back to `accept`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};

use crate::archiver::Archiver;
use crate::config::ServerConfig;
use crate::frame::Channel;
use crate::logger::SessionLogger;
use crate::pool::{Coordinator, ShutdownOutcome};
use crate::session::{Session, TerminationCause};
use crate::workspace::{PoolRoot, Workspace};

const WAKE_TIMEOUT: Duration = Duration::from_millis(500);

/// A connection in transit from the listener to a worker.
pub struct Handoff {
    pub peer: SocketAddr,
    pub stream: TcpStream,
}

/// Unblocks a listener parked in `accept`.
struct ListenerCloser {
    listener: TcpListener,
    wake_addr: SocketAddr,
}

impl ListenerCloser {
    fn new(listener: &TcpListener) -> Result<Self> {
        let local = listener.local_addr().context("listener address")?;
        let ip = match local.ip() {
            IpAddr::V4(v4) if v4.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(v6) if v6.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        Ok(Self {
            listener: listener.try_clone().context("clone listener")?,
            wake_addr: SocketAddr::new(ip, local.port()),
        })
    }

    fn close(&self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: the fd is owned by `self.listener` and stays open for this call.
            let rc = unsafe { libc::shutdown(self.listener.as_raw_fd(), libc::SHUT_RDWR) };
            if rc != 0 {
                debug!("listener shutdown: {}", std::io::Error::last_os_error());
            }
        }
        if let Ok(s) = TcpStream::connect_timeout(&self.wake_addr, WAKE_TIMEOUT) {
            if let Err(e) = s.shutdown(Shutdown::Both) {
                debug!("wake connection shutdown: {}", e);
            }
        }
    }
}

/// Cloneable handle that can ask the server to stop, e.g. from a signal handler.
#[derive(Clone)]
pub struct ShutdownTrigger {
    coordinator: Arc<Coordinator<Handoff>>,
    closer: Arc<ListenerCloser>,
}

impl ShutdownTrigger {
    /// Refused while any client is being served; see [`Coordinator::request_shutdown`].
    pub fn request(&self) -> ShutdownOutcome {
        let outcome = self.coordinator.request_shutdown();
        match outcome {
            ShutdownOutcome::Accepted => {
                info!("shutdown accepted; stopping listener");
                self.closer.close();
            }
            ShutdownOutcome::Refused { serving, pending } => {
                warn!(
                    "cannot stop while clients are connected ({} serving{})",
                    serving,
                    if pending { ", 1 being assigned" } else { "" }
                );
            }
            ShutdownOutcome::AlreadyClosing => debug!("shutdown already in progress"),
        }
        outcome
    }
}

pub struct ServerHandle {
    local_addr: SocketAddr,
    trigger: ShutdownTrigger,
    listener: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn coordinator(&self) -> &Arc<Coordinator<Handoff>> {
        &self.trigger.coordinator
    }

    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    pub fn request_shutdown(&self) -> ShutdownOutcome {
        self.trigger.request()
    }

    /// Wait for the listener (and therefore every worker) to finish.
    pub fn join(self) -> Result<()> {
        self.listener
            .join()
            .map_err(|_| anyhow!("listener thread panicked"))
    }
}

/// Bind, build the pool and start serving.
pub fn start(
    config: &ServerConfig,
    archiver: Arc<dyn Archiver>,
    logger: Arc<dyn SessionLogger>,
) -> Result<ServerHandle> {
    config.validate()?;
    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr).with_context(|| format!("bind {}", addr))?;
    let local_addr = listener.local_addr().context("listener address")?;
    let closer = ListenerCloser::new(&listener)?;
    let root = PoolRoot::prepare(&config.root)
        .with_context(|| format!("prepare pool root {}", config.root.display()))?;

    let coordinator = Arc::new(Coordinator::new(config.workers));
    let mut workers = Vec::with_capacity(config.workers);
    for id in 0..config.workers {
        let coord = Arc::clone(&coordinator);
        let workspace = root.workspace(id);
        let archiver = Arc::clone(&archiver);
        let logger = Arc::clone(&logger);
        let spawned = thread::Builder::new()
            .name(format!("remcomp-worker-{}", id))
            .spawn(move || worker_loop(id, &coord, workspace, archiver.as_ref(), logger.as_ref()));
        match spawned {
            Ok(h) => {
                debug!("created worker {}", id);
                workers.push(h);
            }
            Err(e) => {
                error!("creating worker {}: {}", id, e);
                abort_startup(&coordinator, workers, &root);
                return Err(e).with_context(|| format!("spawn worker {}", id));
            }
        }
    }

    let coord = Arc::clone(&coordinator);
    let spawned = thread::Builder::new()
        .name("remcomp-listener".to_string())
        .spawn(move || listen(listener, &coord, workers, root));
    let listener = match spawned {
        Ok(h) => h,
        Err(e) => {
            error!("creating listener: {}", e);
            // Workers were moved into the failed closure; flagging shutdown
            // still lets them exit on their own.
            coordinator.request_shutdown();
            return Err(e).context("spawn listener");
        }
    };

    info!(
        "listening on {} with {} workers (archiver: {})",
        local_addr,
        config.workers,
        archiver.name()
    );
    Ok(ServerHandle {
        local_addr,
        trigger: ShutdownTrigger {
            coordinator,
            closer: Arc::new(closer),
        },
        listener,
    })
}

fn abort_startup(coord: &Coordinator<Handoff>, workers: Vec<JoinHandle<()>>, root: &PoolRoot) {
    coord.request_shutdown();
    for h in workers {
        if h.join().is_err() {
            error!("a worker thread panicked during startup");
        }
    }
    if let Err(e) = root.remove() {
        warn!("removing pool root: {}", e);
    }
}

fn listen(
    listener: TcpListener,
    coord: &Coordinator<Handoff>,
    workers: Vec<JoinHandle<()>>,
    root: PoolRoot,
) {
    coord.wait_until_ready();
    loop {
        if coord.is_closing() {
            break;
        }
        let (stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) => {
                if coord.is_closing() {
                    break;
                }
                warn!("accept error: {}", e);
                continue;
            }
        };
        if coord.is_closing() {
            debug!("dropping {} accepted during shutdown", peer);
            break;
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay for {}: {}", peer, e);
        }
        let greeter = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                warn!("cannot use connection from {}: {}", peer, e);
                continue;
            }
        };
        match coord.dispatch(Handoff { peer, stream }) {
            Ok(worker) => {
                let busy = coord.serving();
                if busy == coord.size() {
                    info!("client {} connected (worker {}; all {} workers busy)", peer, worker, busy);
                } else {
                    info!(
                        "client {} connected (worker {}; {}/{} free)",
                        peer,
                        worker,
                        coord.size() - busy,
                        coord.size()
                    );
                }
                let mut ch = Channel::new(greeter);
                if let Err(e) = ch.send_u32(worker as u32) {
                    warn!("greeting {}: {}", peer, e);
                }
            }
            Err(_) => {
                debug!("shutdown began before {} was assigned", peer);
                break;
            }
        }
    }
    drop(listener);

    for h in workers {
        if h.join().is_err() {
            error!("a worker thread panicked");
        }
    }
    if let Err(e) = root.remove() {
        warn!("removing pool root: {}", e);
    }
    info!("listener stopped");
}

fn worker_loop(
    id: usize,
    coord: &Coordinator<Handoff>,
    workspace: Workspace,
    archiver: &dyn Archiver,
    logger: &dyn SessionLogger,
) {
    if let Err(e) = workspace.reset() {
        warn!("worker {}: preparing workspace: {}", id, e);
    }
    coord.worker_ready(id);

    while let Some(Handoff { peer, stream }) = coord.claim(id) {
        if let Err(e) = workspace.reset() {
            warn!("worker {}: resetting workspace: {}", id, e);
        }
        coord.begin_session(id);
        logger.connected(id, &peer);

        let cause = Session::new(&stream, peer, id, &workspace, archiver, logger).run();
        if let Err(e) = stream.shutdown(Shutdown::Both) {
            debug!("worker {}: closing connection to {}: {}", id, peer, e);
        }
        drop(stream);

        if let Err(e) = workspace.clear() {
            warn!("worker {}: clearing workspace: {}", id, e);
        }
        coord.release(id);
        match cause {
            TerminationCause::ClientQuit => info!("client {} closed the connection (worker {})", peer, id),
            _ => warn!("client {} disconnected unexpectedly (worker {})", peer, id),
        }
        logger.disconnected(id, &peer, cause.as_str());
    }

    if let Err(e) = workspace.destroy() {
        warn!("worker {}: removing workspace: {}", id, e);
    }
    coord.mark_terminated(id);
    debug!("worker {} exiting ({})", id, TerminationCause::ServerShutdown);
}
