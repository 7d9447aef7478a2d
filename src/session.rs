//! Request/reply correlation over a lossy datagram transport.
use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

use crate::buffer::{ReceiveBuffer, TransmitBuffer};
use crate::constants::{ATTEMPTS, PROTOCOL_VERSION, REPLY_TIMEOUT};
use crate::error::{Error, ProtocolFault, Rejection, Result, Violation};
use crate::protocol::Status;
use crate::transport::Transport;

/// What to do with the deadline when the target reports `InProgress`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InProgressPolicy {
    /// Keep waiting for the final reply within the current deadline.
    #[default]
    KeepDeadline,
    /// Restart the reply timeout on every `InProgress`.
    ExtendDeadline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Time to wait for a reply after each transmission
    pub timeout: Duration,
    /// Transmissions of a request before giving up
    pub attempts: u32,
    pub in_progress: InProgressPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            timeout: REPLY_TIMEOUT,
            attempts: ATTEMPTS,
            in_progress: InProgressPolicy::default(),
        }
    }
}

/// Result of looking at one received datagram.
#[derive(Debug)]
pub enum Outcome {
    /// Not a reply to the last transmission
    Ignore,
    /// The target is still working on it
    InProgress,
    Done(ReceiveBuffer),
}

/// One conversation with a target: at most one request in flight.
pub struct Session<T> {
    transport: T,
    config: SessionConfig,
    peer: Option<SocketAddrV4>,
    tx: TransmitBuffer,
    rx: Option<ReceiveBuffer>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Session {
            transport,
            config,
            peer: None,
            tx: TransmitBuffer::new(),
            rx: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn peer(&self) -> Option<SocketAddrV4> {
        self.peer
    }

    pub fn set_peer(&mut self, peer: SocketAddrV4) {
        self.peer = Some(peer);
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The request to be sent by the next [`Self::communicate`].
    pub fn tx_mut(&mut self) -> &mut TransmitBuffer {
        &mut self.tx
    }

    /// Send the prepared frame to the peer and wait for the matching reply,
    /// retransmitting on silence.
    pub fn communicate(&mut self) -> Result<&ReceiveBuffer> {
        let peer = self.peer.ok_or(Violation::NotConnected)?;
        self.rx = None;

        for attempt in 1..=self.config.attempts {
            let frame = self.tx.frame()?;
            log::debug!("=> {} {}", peer, hex::encode(frame));
            self.transport.send(frame, peer)?;

            let mut deadline = Instant::now() + self.config.timeout;
            loop {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let Some((datagram, source)) = self.transport.receive(deadline - now)? else {
                    continue;
                };
                match self.process(datagram, source)? {
                    Outcome::Ignore => (),
                    Outcome::InProgress => {
                        if self.config.in_progress == InProgressPolicy::ExtendDeadline {
                            deadline = Instant::now() + self.config.timeout;
                        }
                    }
                    Outcome::Done(rx) => {
                        let rx: &ReceiveBuffer = self.rx.insert(rx);
                        return Ok(rx);
                    }
                }
            }
            log::debug!(
                "no reply to {:?} #{} (attempt {}/{})",
                self.tx.operation(),
                self.tx.sequence(),
                attempt,
                self.config.attempts
            );
        }

        Err(Error::timeout())
    }

    /// Judge a received datagram against the last transmitted frame.
    pub fn process(&mut self, datagram: Vec<u8>, source: SocketAddrV4) -> Result<Outcome> {
        log::debug!("<= {} {}", source, hex::encode(&datagram));
        let rx = ReceiveBuffer::new(datagram, source)?;

        if rx.version() != PROTOCOL_VERSION {
            return Err(ProtocolFault::UnsupportedVersion(rx.version()).into());
        }

        if rx.sequence() != self.tx.sequence() {
            log::warn!(
                "ignoring reply #{} from {}, expecting #{}",
                rx.sequence(),
                source,
                self.tx.sequence()
            );
            return Ok(Outcome::Ignore);
        }

        let operation = self.tx.operation();
        if rx.operation() != operation as u8 {
            return Err(ProtocolFault::OperationMismatch {
                expected: operation,
                received: rx.operation(),
            }
            .into());
        }

        match Status::try_from(rx.status()) {
            Ok(Status::Ok) => Ok(Outcome::Done(rx)),
            Ok(Status::InProgress) => {
                if !operation.may_be_in_progress() {
                    return Err(ProtocolFault::UnexpectedStatus {
                        operation,
                        status: rx.status(),
                    }
                    .into());
                }
                log::trace!("{:?} in progress", operation);
                Ok(Outcome::InProgress)
            }
            _ => Err(Rejection::from_status(rx.status()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::constants::{operations, status};
    use crate::error::ErrorKind;
    use crate::protocol::Operation;

    struct Silent;

    impl Transport for Silent {
        fn send(&mut self, _datagram: &[u8], _dest: SocketAddrV4) -> Result<()> {
            Ok(())
        }

        fn receive(&mut self, _timeout: Duration) -> Result<Option<(Vec<u8>, SocketAddrV4)>> {
            Ok(None)
        }
    }

    fn target() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 5), 666)
    }

    /// A session whose last transmitted frame was a read with sequence 1.
    fn after_read() -> Session<Silent> {
        let mut session = Session::new(Silent, SessionConfig::default());
        session.tx_mut().select_operation(Operation::Read, 0x400, 16);
        session.tx_mut().frame().unwrap();
        session
    }

    fn reply(seq: u8, op: u8, status: u8) -> Vec<u8> {
        vec![1, seq, op, status]
    }

    #[test]
    fn matching_ok_is_done() {
        let mut session = after_read();
        let outcome = session
            .process(reply(1, operations::READ, status::OK), target())
            .unwrap();
        assert!(matches!(outcome, Outcome::Done(rx) if rx.source() == target()));
    }

    #[test]
    fn other_sequence_is_ignored() {
        let mut session = after_read();
        for seq in [0, 2, 0xff] {
            let outcome = session
                .process(reply(seq, operations::READ, status::OK), target())
                .unwrap();
            assert!(matches!(outcome, Outcome::Ignore));
        }
        // even a rejection for another frame is not ours to report
        let outcome = session
            .process(reply(7, operations::READ, status::INV_ADDR), target())
            .unwrap();
        assert!(matches!(outcome, Outcome::Ignore));
    }

    #[test]
    fn operation_mismatch_is_protocol_error() {
        let mut session = after_read();
        let err = session
            .process(reply(1, operations::WRITE, status::OK), target())
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Protocol(ProtocolFault::OperationMismatch {
                expected: Operation::Read,
                received: operations::WRITE,
            })
        ));
    }

    #[test]
    fn truncated_and_foreign_versions_fail() {
        let mut session = after_read();
        let err = session.process(vec![1, 1, 2], target()).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Protocol(ProtocolFault::Truncated { len: 3 })
        ));

        let err = session
            .process(vec![2, 1, operations::READ, status::OK], target())
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Protocol(ProtocolFault::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn in_progress_only_for_long_operations() {
        let mut session = after_read();
        let outcome = session
            .process(reply(1, operations::READ, status::IN_PROGRESS), target())
            .unwrap();
        assert!(matches!(outcome, Outcome::InProgress));

        session.tx_mut().select_operation(Operation::Reset, 0, 0);
        session.tx_mut().frame().unwrap();
        let err = session
            .process(reply(2, operations::RESET, status::IN_PROGRESS), target())
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Protocol(ProtocolFault::UnexpectedStatus { .. })
        ));
    }

    #[test]
    fn rejection_carries_code() {
        let mut session = after_read();
        let err = session
            .process(reply(1, operations::READ, status::PROTECTED_ADDR), target())
            .unwrap_err();
        assert_eq!(err.rejection(), Some(Rejection::ProtectedAddress));

        let err = session
            .process(reply(1, operations::READ, status::REQUEST), target())
            .unwrap_err();
        assert_eq!(err.rejection(), Some(Rejection::InvalidStatus(status::REQUEST)));
    }

    #[test]
    fn communicate_needs_peer() {
        let mut session = Session::new(Silent, SessionConfig::default());
        let err = session.communicate().unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Validation(Violation::NotConnected)
        ));
    }

    #[test]
    fn silence_times_out() {
        let config = SessionConfig {
            timeout: Duration::from_millis(5),
            ..SessionConfig::default()
        };
        let mut session = Session::new(Silent, config);
        session.set_peer(target());
        session.tx_mut().select_operation(Operation::Reset, 0, 0);
        assert!(session.communicate().unwrap_err().is_retryable());
        assert_eq!(session.tx_mut().sequence(), 3);
    }
}
