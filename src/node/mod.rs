//! The Node actor: owns a `NodeState` behind a mutex (held only across state
//! transitions, never across an `.await`), and drives the
//! networking — acceptor loop, periodic requester, per-round Orchestrator
//! session, and watchdog — around it.
//!
//! The flow follows `TP_01/distributed_node.py` closely: its
//! `run_server`/`handle_connection`/`request_loop`/`enter_cs`/`_execute_cs`/
//! `exit_cs` map directly onto the functions below.

pub mod state;

use crate::{
    config::{ClusterConfig, NodeAddr},
    logging::colorize,
    message::{OrchestratorRequest, OrchestratorResponse, PeerMessage},
};
use anyhow::Context;
use rand::Rng;
use state::{NodeState, Phase, ReplyOutcome, RequestDecision};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::Mutex,
    time::timeout,
};

/// The node-side "CS body": in this system, that's waiting for the
/// Printer's round to complete, then a fixed dwell. The
/// original `distributed_node.py::CS_DURATION`.
pub const CS_DURATION_SECS: u64 = 5;
/// Watchdog margin added on top of `CS_DURATION_SECS`
/// (`distributed_node.py`'s `CS_DURATION + 2`).
pub const WATCHDOG_MARGIN_SECS: u64 = 2;
/// Peer-to-peer timeout; 1-3s was the named range, we use the midpoint.
pub const PEER_TIMEOUT_SECS: u64 = 2;
/// Orchestrator RPC timeout.
pub const ORCHESTRATOR_TIMEOUT_SECS: u64 = 3;
/// Periodic requester sleep range.
const REQUEST_INTERVAL_MIN_SECS: f64 = 1.0;
const REQUEST_INTERVAL_MAX_SECS: f64 = 3.0;
/// Probability of deciding to request the CS on any given tick (a Bernoulli
/// coin flip), matching `distributed_node.py::request_loop`'s
/// `random.random() > 0.5`.
const REQUEST_PROBABILITY: f64 = 0.5;

pub struct Node {
    pub id: u8,
    listen_port: u16,
    peers: Vec<NodeAddr>,
    orchestrator_addr: SocketAddr,
    state: Mutex<NodeState>,
}

impl Node {
    pub fn new(id: u8, listen_port: u16, config: &ClusterConfig, orchestrator_addr: SocketAddr) -> Self {
        Self {
            id,
            listen_port,
            peers: config.peers_of(id),
            orchestrator_addr,
            state: Mutex::new(NodeState::new(id)),
        }
    }

    fn log(&self, message: impl std::fmt::Display) -> String {
        colorize(self.id, message)
    }

    /// Binds the listening endpoint and runs the acceptor and periodic
    /// requester concurrently until a shutdown signal (SIGINT) arrives.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.listen_port))
            .await
            .with_context(|| format!("binding node listener on port {}", self.listen_port))?;
        tracing::info!("{}", self.log(format!("Node {} started on port {}", self.id, self.listen_port)));

        let accept_node = self.clone();
        let accept_task = tokio::spawn(async move { accept_node.accept_loop(listener).await });

        let requester_node = self.clone();
        let requester_task = tokio::spawn(async move { requester_node.periodic_requester().await });

        tokio::select! {
            result = accept_task => result??,
            result = requester_task => result??,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("{}", self.log("shutdown signal received"));
            }
        }
        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let (socket, _addr) = listener.accept().await?;
            let node = self.clone();
            tokio::spawn(async move {
                if let Err(err) = node.handle_connection(socket).await {
                    tracing::warn!("{}", node.log(format!("connection error: {err:#}")));
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, socket: TcpStream) -> anyhow::Result<()> {
        let mut reader = BufReader::new(socket);
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        let message = match PeerMessage::parse(line) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!("{}", self.log(format!("dropping malformed message {line:?}: {err:#}")));
                return Ok(());
            }
        };
        match message {
            PeerMessage::Request { timestamp, node_id } => self.on_request(timestamp, node_id).await,
            PeerMessage::Reply { timestamp, node_id } => self.on_reply(timestamp, node_id).await,
        }
        Ok(())
    }

    async fn on_request(&self, ts: u64, from: u8) {
        tracing::info!("{}", self.log(format!("recv REQUEST from {from} (ts={ts})")));
        let decision = {
            let mut state = self.state.lock().await;
            state.handle_request(ts, from)
        };
        match decision {
            RequestDecision::ReplyNow => {
                let clock = self.current_clock().await;
                self.send_reply(from, clock).await;
            }
            RequestDecision::Defer => {
                tracing::info!("{}", self.log(format!("deferring reply to {from}")));
            }
        }
    }

    async fn on_reply(&self, ts: u64, from: u8) {
        tracing::info!("{}", self.log(format!("recv REPLY from {from} (ts={ts})")));
        let ready = {
            let mut state = self.state.lock().await;
            state.handle_reply(ts, from)
        };
        if ready {
            self.try_enter().await;
        }
    }

    async fn current_clock(&self) -> u64 {
        self.state.lock().await.clock.value()
    }

    fn peer_addr(&self, id: u8) -> Option<&NodeAddr> {
        self.peers.iter().find(|p| p.id == id)
    }

    async fn send_reply(&self, to: u8, clock: u64) {
        let Some(peer) = self.peer_addr(to) else {
            tracing::warn!("{}", self.log(format!("no address on file for peer {to}")));
            return;
        };
        let message = PeerMessage::Reply {
            timestamp: clock,
            node_id: self.id,
        };
        if let Err(err) = send_line(peer, &message.to_string(), PEER_TIMEOUT_SECS).await {
            tracing::warn!("{}", self.log(format!("failed to send REPLY to {to}: {err:#}")));
        }
    }

    /// Wakes up on an interval and flips a biased coin to decide whether
    /// to request the critical section.
    async fn periodic_requester(self: Arc<Self>) -> anyhow::Result<()> {
        loop {
            let sleep_secs = rand::thread_rng().gen_range(REQUEST_INTERVAL_MIN_SECS..=REQUEST_INTERVAL_MAX_SECS);
            tokio::time::sleep(Duration::from_secs_f64(sleep_secs)).await;

            let already_requesting = self.state.lock().await.requesting;
            if already_requesting {
                continue;
            }
            if rand::thread_rng().gen_bool(REQUEST_PROBABILITY) {
                tracing::info!("{}", self.log("decided to request the critical section"));
                self.clone().request_cs().await;
            }
        }
    }

    async fn request_cs(self: Arc<Self>) {
        let peer_ids: Vec<u8> = self.peers.iter().map(|p| p.id).collect();
        let ts = {
            let mut state = self.state.lock().await;
            match state.begin_request(peer_ids.clone()) {
                Ok(ts) => ts,
                Err(err) => {
                    tracing::warn!("{}", self.log(format!("request_cs rejected: {err:#}")));
                    return;
                }
            }
        };
        tracing::info!("{}", self.log(format!("requesting CS with timestamp {ts}")));

        if peer_ids.is_empty() {
            // N = 1 degenerate cluster: nothing to await.
            self.try_enter().await;
            return;
        }

        for peer_id in peer_ids {
            let node = self.clone();
            tokio::spawn(async move {
                node.send_request_to(peer_id, ts).await;
            });
        }
    }

    async fn send_request_to(self: Arc<Self>, peer_id: u8, ts: u64) {
        let Some(peer) = self.peer_addr(peer_id).cloned() else {
            return;
        };
        let message = PeerMessage::Request {
            timestamp: ts,
            node_id: self.id,
        };
        let outcome = match send_line(&peer, &message.to_string(), PEER_TIMEOUT_SECS).await {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(
                    "{}",
                    self.log(format!("REQUEST to {peer_id} failed, treating as implicit reply: {err:#}"))
                );
                Some(ReplyOutcome::Unreachable)
            }
        };
        if let Some(outcome) = outcome {
            let ready = {
                let mut state = self.state.lock().await;
                state.apply_reply_outcome(peer_id, outcome)
            };
            if ready {
                self.try_enter().await;
            }
        }
        // On success we wait for the peer's REPLY to arrive as a separate
        // inbound connection (handled by `on_reply`); nothing more to do here.
    }

    /// Awaiting -> Entering -> (contact Orchestrator) -> InCs | Releasing.
    async fn try_enter(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            if state.begin_entering().is_err() {
                return;
            }
        }

        let clock = self.current_clock().await;
        tracing::info!("{}", self.log("all replies collected, contacting orchestrator"));

        let stream = match TcpStream::connect(self.orchestrator_addr).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!("{}", self.log(format!("could not reach orchestrator: {err:#}")));
                self.abandon_round().await;
                return;
            }
        };

        let node = self.clone();
        tokio::spawn(async move { node.run_cs_session(stream, clock).await });
    }

    async fn run_cs_session(self: Arc<Self>, conn: TcpStream, clock: u64) {
        // A single buffered, newline-framed connection carries both the
        // ENTER and, later, the EXIT leg.
        let mut conn = BufReader::new(conn);
        let enter_msg = OrchestratorRequest::Enter {
            node_id: self.id,
            clock,
        };
        let result = timeout(Duration::from_secs(ORCHESTRATOR_TIMEOUT_SECS), async {
            write_line(&mut conn, &enter_msg.to_string()).await?;
            read_line(&mut conn).await
        })
        .await;

        let response = match result {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                tracing::error!("{}", self.log(format!("ENTER failed: {err:#}")));
                self.abandon_round().await;
                return;
            }
            Err(_) => {
                tracing::error!("{}", self.log("ENTER timed out"));
                self.abandon_round().await;
                return;
            }
        };

        match OrchestratorResponse::parse(&response) {
            Ok(OrchestratorResponse::EnterOk) => {}
            Ok(OrchestratorResponse::SomeoneIsInCs) => {
                tracing::error!("{}", self.log("orchestrator rejected entry: someone else is in the CS"));
                self.abandon_round().await;
                return;
            }
            Ok(other) => {
                tracing::error!("{}", self.log(format!("unexpected orchestrator reply {other}")));
                self.abandon_round().await;
                return;
            }
            Err(err) => {
                tracing::error!("{}", self.log(format!("malformed orchestrator reply: {err:#}")));
                self.abandon_round().await;
                return;
            }
        }

        {
            let mut state = self.state.lock().await;
            if let Err(err) = state.enter_cs() {
                tracing::error!("{}", self.log(format!("enter_cs invariant violated: {err:#}")));
                return;
            }
        }
        tracing::info!("{}", self.log("=== ENTERING CRITICAL SECTION ==="));

        let watchdog_node = self.clone();
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(CS_DURATION_SECS + WATCHDOG_MARGIN_SECS)).await;
            let still_in_cs = watchdog_node.state.lock().await.in_cs;
            if still_in_cs {
                tracing::warn!("{}", watchdog_node.log("CS watchdog fired, forcing exit"));
                watchdog_node.finish_round().await;
            }
        });

        tokio::time::sleep(Duration::from_secs(CS_DURATION_SECS)).await;

        let exit_result = timeout(Duration::from_secs(ORCHESTRATOR_TIMEOUT_SECS), async {
            write_line(&mut conn, &OrchestratorRequest::Exit.to_string()).await?;
            read_line(&mut conn).await
        })
        .await;

        match exit_result {
            Ok(Ok(response)) if matches!(OrchestratorResponse::parse(&response), Ok(OrchestratorResponse::ExitOk)) => {
                tracing::info!("{}", self.log("=== EXITING CRITICAL SECTION ==="));
            }
            Ok(Ok(response)) => {
                tracing::warn!("{}", self.log(format!("unexpected EXIT reply {response:?}")));
            }
            Ok(Err(err)) => tracing::warn!("{}", self.log(format!("EXIT failed: {err:#}"))),
            Err(_) => tracing::warn!("{}", self.log("EXIT timed out")),
        }

        watchdog.abort();
        self.finish_round().await;
    }

    /// Rejection or timeout while `Entering`: release as if the CS had been
    /// used and exited, so deferred peers still get their REPLY.
    async fn abandon_round(&self) {
        self.finish_round().await;
    }

    async fn finish_round(&self) {
        let drained = {
            let mut state = self.state.lock().await;
            state.exit_cs()
        };
        if drained.is_empty() {
            return;
        }
        let clock = self.current_clock().await;
        tracing::info!("{}", self.log(format!("processing {} deferred replies", drained.len())));
        for peer_id in drained {
            self.send_reply(peer_id, clock).await;
        }
    }

    #[cfg(test)]
    pub(crate) async fn phase(&self) -> Phase {
        self.state.lock().await.phase
    }

    #[cfg(test)]
    pub(crate) async fn clock_value(&self) -> u64 {
        self.state.lock().await.clock.value()
    }
}

/// Resolves `addr`, connects, writes `line` and closes — the one-shot
/// outbound sends REQUEST/REPLY use: one message per connection.
async fn send_line(addr: &NodeAddr, line: &str, timeout_secs: u64) -> anyhow::Result<()> {
    let socket_addr = addr.socket_addr()?;
    timeout(Duration::from_secs(timeout_secs), async {
        let mut stream = TcpStream::connect(socket_addr).await?;
        stream.write_all(format!("{line}\n").as_bytes()).await?;
        stream.shutdown().await?;
        anyhow::Ok(())
    })
    .await
    .context("timed out")??;
    Ok(())
}

/// Writes one newline-terminated line to a buffered connection, used for the
/// multi-message Orchestrator session (ENTER then EXIT on the same socket).
async fn write_line(conn: &mut BufReader<TcpStream>, line: &str) -> anyhow::Result<()> {
    conn.write_all(format!("{line}\n").as_bytes()).await?;
    conn.flush().await?;
    Ok(())
}

async fn read_line(conn: &mut BufReader<TcpStream>) -> anyhow::Result<String> {
    let mut line = String::new();
    let read = conn.read_line(&mut line).await?;
    anyhow::ensure!(read > 0, "connection closed before a response arrived");
    Ok(line.trim().to_string())
}
