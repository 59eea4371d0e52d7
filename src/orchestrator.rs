//! The Orchestrator: the referee that serializes admission to the critical
//! section across the whole cluster and drives the Printer.
//!
//! Follows `TP_01/orquestrador.py`'s `Orquestrador` class closely: a single
//! mutex around `current_user`, a separate lock around the Printer client,
//! and a receive timeout that forces release if a node never sends `EXIT`.

use crate::{
    config::PrinterAddr,
    message::{OrchestratorRequest, OrchestratorResponse, PrinterRequest, PrinterResponse},
};
use anyhow::Context;
use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::Mutex,
    time::{timeout, Duration},
};

/// How long the Orchestrator waits for `EXIT` after granting `ENTER_OK`
/// before forcing release (the original `conn.settimeout(10)`).
pub const EXIT_TIMEOUT_SECS: u64 = 10;

struct Admission {
    current_user: Option<u8>,
    last_printed_number: u64,
}

pub struct Orchestrator {
    listen_port: u16,
    printer_addr: PrinterAddr,
    admission: Mutex<Admission>,
    printer_client: Mutex<()>,
}

impl Orchestrator {
    pub fn new(listen_port: u16, printer_addr: PrinterAddr) -> Self {
        Self {
            listen_port,
            printer_addr,
            admission: Mutex::new(Admission {
                current_user: None,
                last_printed_number: 0,
            }),
            printer_client: Mutex::new(()),
        }
    }

    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.listen_port))
            .await
            .with_context(|| format!("binding orchestrator listener on port {}", self.listen_port))?;
        tracing::info!("Orchestrator started on port {}", self.listen_port);

        loop {
            let (socket, _addr) = listener.accept().await?;
            let orchestrator = self.clone();
            tokio::spawn(async move {
                if let Err(err) = orchestrator.handle_session(socket).await {
                    tracing::warn!("session error: {err:#}");
                }
            });
        }
    }

    /// One `ENTER` (admitted or rejected) followed, if admitted, by `EXIT`
    /// (or a timeout forcing the same release), all on one TCP connection.
    async fn handle_session(self: Arc<Self>, socket: TcpStream) -> anyhow::Result<()> {
        let mut conn = BufReader::new(socket);
        let line = read_line(&mut conn).await?;
        let request = OrchestratorRequest::parse(&line)?;
        let OrchestratorRequest::Enter { node_id, clock } = request else {
            anyhow::bail!("expected ENTER as the first message on a session, got {line:?}");
        };

        let last_printed_number = {
            let mut admission = self.admission.lock().await;
            if admission.current_user.is_some() {
                tracing::warn!(
                    "CS conflict: node {node_id} tried to enter but current user is {:?}",
                    admission.current_user
                );
                write_line(&mut conn, &OrchestratorResponse::SomeoneIsInCs.to_string()).await?;
                return Ok(());
            }
            admission.current_user = Some(node_id);
            admission.last_printed_number
        };

        write_line(&mut conn, &OrchestratorResponse::EnterOk.to_string()).await?;
        tracing::info!("ENTER - Node {node_id}");

        self.clone().notify_printer_start(node_id, last_printed_number, clock).await;

        let exit_seen = match timeout(Duration::from_secs(EXIT_TIMEOUT_SECS), read_line(&mut conn)).await {
            Ok(Ok(line)) => matches!(OrchestratorRequest::parse(&line), Ok(OrchestratorRequest::Exit)),
            Ok(Err(err)) => {
                tracing::error!("error reading EXIT from node {node_id}: {err:#}");
                false
            }
            Err(_) => {
                tracing::error!("timeout waiting for EXIT from node {node_id}");
                false
            }
        };

        self.release(node_id).await;
        if exit_seen {
            write_line(&mut conn, &OrchestratorResponse::ExitOk.to_string()).await.ok();
        }
        Ok(())
    }

    async fn release(&self, node_id: u8) {
        let mut admission = self.admission.lock().await;
        if admission.current_user == Some(node_id) {
            admission.current_user = None;
            tracing::info!("EXIT - Node {node_id}");
        }
        drop(admission);
        self.notify_printer_stop().await;
    }

    async fn notify_printer_start(self: Arc<Self>, node_id: u8, base: u64, clock: u64) {
        let message = PrinterRequest::Start {
            node_id,
            base,
            node_clock: clock,
        };
        match self.send_to_printer(&message.to_string(), true).await {
            Ok(Some(response)) => {
                if let Ok(PrinterResponse::Done { last }) = PrinterResponse::parse(&response) {
                    self.admission.lock().await.last_printed_number = last;
                }
            }
            Ok(None) => {}
            Err(err) => tracing::error!("failed to notify printer service: {err:#}"),
        }
    }

    async fn notify_printer_stop(&self) {
        if let Err(err) = self.send_to_printer(&PrinterRequest::Stop.to_string(), false).await {
            tracing::error!("failed to notify printer service: {err:#}");
        }
    }

    /// Owns the single TCP client to the Printer, serialized by its own
    /// lock. When `await_response` is set,
    /// reads back one line (the `DONE:<last>` frame); `STOP` gets no reply.
    async fn send_to_printer(&self, line: &str, await_response: bool) -> anyhow::Result<Option<String>> {
        let _guard = self.printer_client.lock().await;
        let addr = self.printer_addr.socket_addr()?;
        let result = timeout(Duration::from_secs(3), async {
            let mut conn = BufReader::new(TcpStream::connect(addr).await?);
            conn.write_all(format!("{line}\n").as_bytes()).await?;
            conn.flush().await?;
            if await_response {
                let response = read_line(&mut conn).await?;
                anyhow::Ok(Some(response))
            } else {
                anyhow::Ok(None)
            }
        })
        .await
        .context("timed out talking to printer service")??;
        Ok(result)
    }
}

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
