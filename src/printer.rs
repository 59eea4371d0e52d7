//! The Printer: the monotone sequence emitter the Orchestrator hands each
//! critical-section round to.
//!
//! Follows `TP_01/print_server.py`'s `NumberPrinter` directly: an `active`
//! flag rejecting a concurrent `START`, a random `k ∈ [1,10]` chosen per
//! round, and one tick every half second.

use crate::message::{PrinterRequest, PrinterResponse};
use anyhow::Context;
use rand::Rng;
use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::Mutex,
    time::Duration,
};

const TICK_INTERVAL_SECS: f64 = 0.5;

struct Round {
    active: bool,
    node_id: Option<u8>,
}

pub struct Printer {
    listen_port: u16,
    round: Mutex<Round>,
}

impl Printer {
    pub fn new(listen_port: u16) -> Self {
        Self {
            listen_port,
            round: Mutex::new(Round {
                active: false,
                node_id: None,
            }),
        }
    }

    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.listen_port))
            .await
            .with_context(|| format!("binding printer listener on port {}", self.listen_port))?;
        tracing::info!("Printer service started on port {}", self.listen_port);

        loop {
            let (socket, _addr) = listener.accept().await?;
            let printer = self.clone();
            tokio::spawn(async move {
                if let Err(err) = printer.handle_connection(socket).await {
                    tracing::warn!("connection error: {err:#}");
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, socket: TcpStream) -> anyhow::Result<()> {
        let mut conn = BufReader::new(socket);
        let mut line = String::new();
        let read = conn.read_line(&mut line).await?;
        if read == 0 {
            return Ok(());
        }
        let line = line.trim();
        let message = match PrinterRequest::parse(line) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!("dropping malformed message {line:?}: {err:#}");
                return Ok(());
            }
        };

        match message {
            PrinterRequest::Start {
                node_id,
                base,
                node_clock,
            } => self.clone().start_sequence(conn, node_id, base, node_clock).await,
            PrinterRequest::Stop => {
                self.stop().await;
                let response = PrinterResponse::Stopped.to_string();
                conn.write_all(format!("{response}\n").as_bytes()).await?;
                conn.flush().await?;
                Ok(())
            }
        }
    }

    /// `base` is the Orchestrator's current `last_printed_number`; the
    /// sequence runs `base+1 ..= base+k` for a random `k ∈ [1,10]`, emitting
    /// one value per tick and holding the connection open until the round
    /// finishes, then sending `DONE:<last>` and closing.
    async fn start_sequence(
        self: Arc<Self>,
        mut conn: BufReader<TcpStream>,
        node_id: u8,
        base: u64,
        node_clock: u64,
    ) -> anyhow::Result<()> {
        {
            let mut round = self.round.lock().await;
            if round.active {
                tracing::warn!("number printer already active, ignoring START from node {node_id}");
                return Ok(());
            }
            round.active = true;
            round.node_id = Some(node_id);
        }

        let k = rand::thread_rng().gen_range(1..=10u64);
        tracing::info!("Node {node_id} started printing numbers. | time: {node_clock} | k = {k}");

        let mut last = base;
        for offset in 1..=k {
            let still_active = self.round.lock().await.active;
            if !still_active {
                break;
            }
            let num = base + offset;
            tracing::info!("Node {node_id} >> {num} | {}", num.saturating_sub(node_clock));
            last = num;
            tokio::time::sleep(Duration::from_secs_f64(TICK_INTERVAL_SECS)).await;
        }

        {
            let mut round = self.round.lock().await;
            round.active = false;
            round.node_id = None;
        }
        tracing::info!("Finished printing for Node {node_id}");

        let response = PrinterResponse::Done { last }.to_string();
        conn.write_all(format!("{response}\n").as_bytes()).await?;
        conn.flush().await?;
        Ok(())
    }

    async fn stop(&self) {
        let mut round = self.round.lock().await;
        if let Some(node_id) = round.node_id {
            tracing::info!("Stopped printing for Node {node_id}");
        }
        round.active = false;
        round.node_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_without_an_active_round_is_a_no_op() {
        let printer = Printer::new(0);
        printer.stop().await;
        assert!(!printer.round.lock().await.active);
    }

    #[tokio::test]
    async fn concurrent_start_is_rejected_while_active() {
        use tokio::io::AsyncReadExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let printer = Arc::new(Printer::new(addr.port()));

        // First node starts a round and holds the printer active.
        let mut first_client = TcpStream::connect(addr).await.unwrap();
        let (first_socket, _) = listener.accept().await.unwrap();
        let first_handler = tokio::spawn(printer.clone().handle_connection(first_socket));
        first_client.write_all(b"START:1:0:0\n").await.unwrap();

        for _ in 0..100 {
            if printer.round.lock().await.active {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(printer.round.lock().await.active);
        assert_eq!(printer.round.lock().await.node_id, Some(1));

        // Second node's START is ignored while the first round is active: no
        // response is sent and the connection is simply closed.
        let mut second_client = TcpStream::connect(addr).await.unwrap();
        let (second_socket, _) = listener.accept().await.unwrap();
        printer.clone().handle_connection(second_socket).await.unwrap();

        let mut buf = Vec::new();
        second_client.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty(), "rejected START must not get a reply");

        // The first round is untouched by the rejected second START.
        assert!(printer.round.lock().await.active);
        assert_eq!(printer.round.lock().await.node_id, Some(1));

        drop(first_handler);
    }

    #[tokio::test]
    async fn start_sequence_emits_a_monotone_run_and_replies_done() {
        use tokio::io::AsyncReadExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let printer = Arc::new(Printer::new(addr.port()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (socket, _) = listener.accept().await.unwrap();
        let handler = tokio::spawn(printer.clone().handle_connection(socket));

        client.write_all(b"START:1:10:7\n").await.unwrap();

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        handler.await.unwrap().unwrap();

        let response = String::from_utf8(buf).unwrap();
        let response = PrinterResponse::parse(response.trim()).unwrap();
        match response {
            PrinterResponse::Done { last } => {
                // base=10, k in 1..=10: last must land in (10, 20]
                assert!(last > 10 && last <= 20);
            }
            PrinterResponse::Stopped => panic!("expected DONE, got STOPPED"),
        }
        assert!(!printer.round.lock().await.active);
    }
}
