use std::sync::{Arc, Mutex, PoisonError};

use crate::openflow0x01::message::Message;
use crate::openflow0x01::PacketIn;

/// Control channel to a single switch.
///
/// Sends are fire-and-forget: the controller never waits for the switch to acknowledge a
/// command, and delivery failures are the transport's concern.
pub trait SwitchConnection: Send + Sync {
    /// Datapath id of the switch on the other end.
    fn dpid(&self) -> u64;
    /// Send a message to the switch under transaction id `xid`.
    fn send_message(&self, xid: u32, msg: Message);
}

/// OpenFlow Controller
///
/// Event sink driven by the runtime that owns the switch connections.
pub trait OfpController {
    /// A switch completed its handshake.
    fn switch_connected(&mut self, conn: Arc<dyn SwitchConnection>);
    /// The control channel to switch `sw` closed.
    fn switch_disconnected(&mut self, sw: u64);
    /// Switch `sw` forwarded a packet to the controller.
    fn packet_in(&mut self, sw: u64, xid: u32, pkt: PacketIn);
}

/// A connection that keeps every message sent on it and logs it.
///
/// Stands in for a live switch in the console binary and in tests.
pub struct LoggingConnection {
    dpid: u64,
    sent: Mutex<Vec<(u32, Message)>>,
}

impl LoggingConnection {
    pub fn new(dpid: u64) -> LoggingConnection {
        LoggingConnection {
            dpid,
            sent: Mutex::new(vec![]),
        }
    }

    /// Messages sent so far, oldest first.
    pub fn sent(&self) -> Vec<Message> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|&(_, ref msg)| msg.clone())
            .collect()
    }

    /// Remove and return the messages sent so far.
    pub fn take(&self) -> Vec<Message> {
        let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        sent.drain(..).map(|(_, msg)| msg).collect()
    }
}

impl SwitchConnection for LoggingConnection {
    fn dpid(&self) -> u64 {
        self.dpid
    }

    fn send_message(&self, xid: u32, msg: Message) {
        debug!("[{:016x}] xid {} <- {:?}", self.dpid, xid, msg);
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push((xid, msg));
    }
}

/// Format a datapath id the way switches report it: the low 48 bits as dash-separated hex
/// bytes, followed by `|` and the high 16 bits when they are set.
pub fn dpid_to_str(dpid: u64) -> String {
    let bytes: Vec<String> = (0..6).rev().map(|i| format!("{:02x}", (dpid >> (8 * i)) & 0xff)).collect();
    match dpid >> 48 {
        0 => bytes.join("-"),
        hi => format!("{}|{}", bytes.join("-"), hi),
    }
}
