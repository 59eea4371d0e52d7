//! Wire grammar: short ASCII lines over TCP, one message per connection
//! except the orchestrator session (which carries ENTER then EXIT on the
//! same connection).

use anyhow::{anyhow, Context};
use std::fmt;

/// A peer-to-peer Ricart–Agrawala message: `REQUEST,<ts>,<node_id>` or
/// `REPLY,<ts>,<node_id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerMessage {
    Request { timestamp: u64, node_id: u8 },
    Reply { timestamp: u64, node_id: u8 },
}

impl fmt::Display for PeerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerMessage::Request { timestamp, node_id } => {
                write!(f, "REQUEST,{timestamp},{node_id}")
            }
            PeerMessage::Reply { timestamp, node_id } => write!(f, "REPLY,{timestamp},{node_id}"),
        }
    }
}

impl PeerMessage {
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        let mut parts = line.trim().split(',');
        let tag = parts.next().ok_or_else(|| anyhow!("empty message"))?;
        let timestamp: u64 = parts
            .next()
            .ok_or_else(|| anyhow!("missing timestamp field in {line:?}"))?
            .parse()
            .context("timestamp is not a decimal integer")?;
        let node_id: u8 = parts
            .next()
            .ok_or_else(|| anyhow!("missing node id field in {line:?}"))?
            .parse()
            .context("node id is not a decimal integer")?;
        match tag {
            "REQUEST" => Ok(PeerMessage::Request { timestamp, node_id }),
            "REPLY" => Ok(PeerMessage::Reply { timestamp, node_id }),
            other => Err(anyhow!("unknown message prefix {other:?}")),
        }
    }
}

/// Orchestrator session messages, carried on one connection:
/// `ENTER:<node_id>:<clock>` then `EXIT`, answered by `ENTER_OK` /
/// `SOMEONE_IS_IN_CS` and `EXIT_OK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorRequest {
    Enter { node_id: u8, clock: u64 },
    Exit,
}

impl fmt::Display for OrchestratorRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorRequest::Enter { node_id, clock } => {
                write!(f, "ENTER:{node_id}:{clock}")
            }
            OrchestratorRequest::Exit => write!(f, "EXIT"),
        }
    }
}

impl OrchestratorRequest {
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        let line = line.trim();
        if line == "EXIT" {
            return Ok(OrchestratorRequest::Exit);
        }
        let mut parts = line.split(':');
        match parts.next() {
            Some("ENTER") => {
                let node_id: u8 = parts
                    .next()
                    .ok_or_else(|| anyhow!("missing node id in {line:?}"))?
                    .parse()
                    .context("node id is not a decimal integer")?;
                let clock: u64 = parts
                    .next()
                    .ok_or_else(|| anyhow!("missing clock in {line:?}"))?
                    .parse()
                    .context("clock is not a decimal integer")?;
                Ok(OrchestratorRequest::Enter { node_id, clock })
            }
            _ => Err(anyhow!("unknown orchestrator message {line:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorResponse {
    EnterOk,
    SomeoneIsInCs,
    ExitOk,
}

impl fmt::Display for OrchestratorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorResponse::EnterOk => write!(f, "ENTER_OK"),
            OrchestratorResponse::SomeoneIsInCs => write!(f, "SOMEONE_IS_IN_CS"),
            OrchestratorResponse::ExitOk => write!(f, "EXIT_OK"),
        }
    }
}

impl OrchestratorResponse {
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        match line.trim() {
            "ENTER_OK" => Ok(OrchestratorResponse::EnterOk),
            "SOMEONE_IS_IN_CS" => Ok(OrchestratorResponse::SomeoneIsInCs),
            "EXIT_OK" => Ok(OrchestratorResponse::ExitOk),
            other => Err(anyhow!("unknown orchestrator response {other:?}")),
        }
    }
}

/// Messages exchanged between the Orchestrator and the Printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrinterRequest {
    Start {
        node_id: u8,
        base: u64,
        node_clock: u64,
    },
    Stop,
}

impl fmt::Display for PrinterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrinterRequest::Start {
                node_id,
                base,
                node_clock,
            } => write!(f, "START:{node_id}:{base}:{node_clock}"),
            PrinterRequest::Stop => write!(f, "STOP"),
        }
    }
}

impl PrinterRequest {
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        let line = line.trim();
        if line == "STOP" {
            return Ok(PrinterRequest::Stop);
        }
        let mut parts = line.split(':');
        match parts.next() {
            Some("START") => {
                let node_id: u8 = parts
                    .next()
                    .ok_or_else(|| anyhow!("missing node id in {line:?}"))?
                    .parse()
                    .context("node id is not a decimal integer")?;
                let base: u64 = parts
                    .next()
                    .ok_or_else(|| anyhow!("missing base in {line:?}"))?
                    .parse()
                    .context("base is not a decimal integer")?;
                let node_clock: u64 = parts
                    .next()
                    .ok_or_else(|| anyhow!("missing node clock in {line:?}"))?
                    .parse()
                    .context("node clock is not a decimal integer")?;
                Ok(PrinterRequest::Start {
                    node_id,
                    base,
                    node_clock,
                })
            }
            _ => Err(anyhow!("unknown printer message {line:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrinterResponse {
    Done { last: u64 },
    Stopped,
}

impl fmt::Display for PrinterResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrinterResponse::Done { last } => write!(f, "DONE:{last}"),
            PrinterResponse::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl PrinterResponse {
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        let line = line.trim();
        if line == "STOPPED" {
            return Ok(PrinterResponse::Stopped);
        }
        let mut parts = line.split(':');
        match parts.next() {
            Some("DONE") => {
                let last: u64 = parts
                    .next()
                    .ok_or_else(|| anyhow!("missing last value in {line:?}"))?
                    .parse()
                    .context("last value is not a decimal integer")?;
                Ok(PrinterResponse::Done { last })
            }
            _ => Err(anyhow!("unknown printer response {line:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_message_round_trips() {
        let msg = PeerMessage::Request {
            timestamp: 5,
            node_id: 1,
        };
        assert_eq!(PeerMessage::parse(&msg.to_string()).unwrap(), msg);
    }

    #[test]
    fn orchestrator_enter_parses() {
        let req = OrchestratorRequest::parse("ENTER:2:7").unwrap();
        assert_eq!(
            req,
            OrchestratorRequest::Enter {
                node_id: 2,
                clock: 7
            }
        );
    }

    #[test]
    fn orchestrator_exit_parses() {
        assert_eq!(
            OrchestratorRequest::parse("EXIT").unwrap(),
            OrchestratorRequest::Exit
        );
    }

    #[test]
    fn printer_start_parses() {
        let req = PrinterRequest::parse("START:1:0:5").unwrap();
        assert_eq!(
            req,
            PrinterRequest::Start {
                node_id: 1,
                base: 0,
                node_clock: 5
            }
        );
    }

    #[test]
    fn unknown_prefix_is_an_error_not_a_panic() {
        assert!(PeerMessage::parse("GARBAGE,1,2").is_err());
        assert!(OrchestratorRequest::parse("WAT").is_err());
        assert!(PrinterRequest::parse("NOPE").is_err());
    }
}
