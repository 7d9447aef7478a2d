//! Scripted in-memory target for driving the network programmer.
#![allow(dead_code)]

use std::cell::RefCell;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use netisp::constants::{operations, status, PORT};
use netisp::protocol::{DiscoverReply, Payload, RequestHeader};
use netisp::transport::Transport;
use netisp::{Result, SessionConfig};

pub const TARGET_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
pub const PIC18F97J60_REV1: u16 = 0x18c1;

pub fn target() -> SocketAddrV4 {
    SocketAddrV4::new(TARGET_IP, PORT)
}

/// Short timeouts keep the silent cases quick.
pub fn config() -> SessionConfig {
    SessionConfig {
        timeout: Duration::from_millis(30),
        ..SessionConfig::default()
    }
}

/// A request as the target decoded it.
#[derive(Debug, Clone)]
pub struct Request {
    pub header: RequestHeader,
    pub payload: Vec<u8>,
    pub dest: SocketAddrV4,
}

impl Request {
    /// A reply to this request, `delay` after it was sent.
    pub fn reply(&self, status: u8, payload: &[u8]) -> Reply {
        let mut bytes = vec![
            1,
            self.header.sequence,
            self.header.operation as u8,
            status,
        ];
        bytes.extend_from_slice(payload);
        Reply {
            delay: Duration::ZERO,
            from: target(),
            bytes,
        }
    }

    pub fn ok(&self) -> Reply {
        self.reply(status::OK, &[])
    }
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub delay: Duration,
    pub from: SocketAddrV4,
    pub bytes: Vec<u8>,
}

impl Reply {
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_sequence(mut self, seq: u8) -> Self {
        self.bytes[1] = seq;
        self
    }
}

type Responder = Box<dyn FnMut(&Request) -> Vec<Reply>>;

/// Which socket call fails once the target goes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Send,
    Receive,
}

pub struct State {
    pub sent: Vec<Request>,
    pub broadcast: Vec<bool>,
    failure: Option<Failure>,
    inbox: Vec<(Instant, SocketAddrV4, Vec<u8>)>,
    responder: Responder,
}

/// Transport handle; clones share the same target.
#[derive(Clone)]
pub struct MockTransport(Rc<RefCell<State>>);

impl MockTransport {
    pub fn new(responder: impl FnMut(&Request) -> Vec<Reply> + 'static) -> Self {
        MockTransport(Rc::new(RefCell::new(State {
            sent: Vec::new(),
            broadcast: Vec::new(),
            failure: None,
            inbox: Vec::new(),
            responder: Box::new(responder),
        })))
    }

    /// Make every following `send` or `receive` fail with an I/O error.
    pub fn fail(&self, failure: Failure) {
        self.0.borrow_mut().failure = Some(failure);
    }

    pub fn sent(&self) -> Vec<Request> {
        self.0.borrow().sent.clone()
    }

    pub fn sequences(&self) -> Vec<u8> {
        self.0.borrow().sent.iter().map(|r| r.header.sequence).collect()
    }

    pub fn broadcast(&self) -> Vec<bool> {
        self.0.borrow().broadcast.clone()
    }
}

impl Transport for MockTransport {
    fn send(&mut self, datagram: &[u8], dest: SocketAddrV4) -> Result<()> {
        let request = Request {
            header: RequestHeader::read_from(datagram)?,
            payload: datagram[RequestHeader::SIZE..].to_vec(),
            dest,
        };
        let now = Instant::now();
        let mut state = self.0.borrow_mut();
        let failure = state.failure;
        state.sent.push(request.clone());
        if failure == Some(Failure::Send) {
            return Err(io::Error::new(io::ErrorKind::NetworkUnreachable, "network is down").into());
        }
        let replies = (state.responder)(&request);
        for reply in replies {
            state.inbox.push((now + reply.delay, reply.from, reply.bytes));
        }
        state.inbox.sort_by_key(|(at, _, _)| *at);
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<(Vec<u8>, SocketAddrV4)>> {
        let now = Instant::now();
        let next = {
            let mut state = self.0.borrow_mut();
            if state.failure == Some(Failure::Receive) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "port unreachable").into());
            }
            match state.inbox.first() {
                Some((at, _, _)) if *at <= now + timeout => Some(state.inbox.remove(0)),
                _ => None,
            }
        };
        match next {
            Some((at, from, bytes)) => {
                sleep(at.saturating_duration_since(now));
                Ok(Some((bytes, from)))
            }
            None => {
                sleep(timeout);
                Ok(None)
            }
        }
    }

    fn set_broadcast(&mut self, enabled: bool) -> Result<()> {
        self.0.borrow_mut().broadcast.push(enabled);
        Ok(())
    }
}

pub fn discover_reply(device_id: u16) -> Vec<u8> {
    let mut buf = vec![0u8; DiscoverReply::SIZE];
    DiscoverReply {
        version: 0x0102,
        bootloader_address: 0x01f000,
        device_id,
    }
    .write_to(&mut buf)
    .unwrap();
    buf
}

/// Answers discovery and configuration like a PIC18F97J60, nothing else.
pub fn handshake_only(request: &Request) -> Vec<Reply> {
    match request.header.operation as u8 {
        operations::DISCOVER | operations::NET_CONFIG => {
            vec![request.reply(status::OK, &discover_reply(PIC18F97J60_REV1))]
        }
        _ => vec![],
    }
}
