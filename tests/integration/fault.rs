use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;

use skiff_core::{MsgType, Transport};

// ── FaultyTransport: outbound fault injection ──────────────────────────────

/// What to do with one outbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Deliver,
    Drop,
    /// Flip every bit of the last byte, then deliver.
    Corrupt,
}

type Rule = Box<dyn FnMut(&[u8]) -> Fault + Send>;

/// Wraps a transport and applies a rule to every datagram it sends.
pub struct FaultyTransport<T> {
    inner: T,
    rule: Mutex<Rule>,
}

impl<T: Transport> FaultyTransport<T> {
    pub fn new(inner: T, rule: impl FnMut(&[u8]) -> Fault + Send + 'static) -> Self {
        Self {
            inner,
            rule: Mutex::new(Box::new(rule)),
        }
    }
}

impl<T: Transport> Transport for FaultyTransport<T> {
    async fn send_to(&self, buf: &[u8], peer: SocketAddr) -> io::Result<()> {
        let fault = {
            let mut rule = self.rule.lock().unwrap();
            (*rule)(buf)
        };
        match fault {
            Fault::Deliver => self.inner.send_to(buf, peer).await,
            Fault::Drop => Ok(()),
            Fault::Corrupt => {
                let mut bad = buf.to_vec();
                if let Some(last) = bad.last_mut() {
                    *last ^= 0xff;
                }
                self.inner.send_to(&bad, peer).await
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

// ── Rules ───────────────────────────────────────────────────────────────────

fn is(frame: &[u8], msg_type: MsgType) -> bool {
    frame.get(1) == Some(&u8::from(msg_type))
}

/// Apply `fault` to the first `n` frames of `msg_type`; deliver the rest.
pub fn first_n(msg_type: MsgType, n: usize, fault: Fault) -> impl FnMut(&[u8]) -> Fault + Send {
    let mut hit = 0;
    move |frame| {
        if is(frame, msg_type) && hit < n {
            hit += 1;
            fault
        } else {
            Fault::Deliver
        }
    }
}

/// Apply `fault` to every frame of `msg_type`.
pub fn always(msg_type: MsgType, fault: Fault) -> impl FnMut(&[u8]) -> Fault + Send {
    move |frame| {
        if is(frame, msg_type) {
            fault
        } else {
            Fault::Deliver
        }
    }
}

/// Drop every `n`th frame regardless of type.
pub fn every_nth(n: usize) -> impl FnMut(&[u8]) -> Fault + Send {
    let mut count = 0;
    move |_| {
        count += 1;
        if count % n == 0 {
            Fault::Drop
        } else {
            Fault::Deliver
        }
    }
}
