#![allow(dead_code)]

use std::collections::VecDeque;

use async_trait::async_trait;
pub use niimbot::protocol::{decode, Packet, RequestCode, PRINT_BITMAP_ROW};
pub use niimbot::{PrinterError, Result, Transport};

type Responder = Box<dyn FnMut(&Packet) -> Vec<Packet> + Send>;

/// In-memory printer. Every write must be one whole frame; the responder
/// decides which frames the printer sends back, and reads hand them out
/// `read_chunk` bytes at a time.
pub struct ScriptedPrinter {
    pub writes: Vec<Vec<u8>>,
    pub reads: usize,
    pub connects: usize,
    pub handshakes: usize,
    pub connected: bool,
    /// Bytes returned per read; 0 returns everything pending.
    pub read_chunk: usize,
    /// Fail every write after this many succeeded.
    pub fail_writes_after: Option<usize>,
    /// Line noise appended after every reply frame.
    pub noise: Vec<u8>,
    inbound: VecDeque<u8>,
    responder: Responder,
}

impl ScriptedPrinter {
    pub fn new(responder: impl FnMut(&Packet) -> Vec<Packet> + Send + 'static) -> Self {
        Self {
            writes: Vec::new(),
            reads: 0,
            connects: 0,
            handshakes: 0,
            connected: false,
            read_chunk: 0,
            fail_writes_after: None,
            noise: Vec::new(),
            inbound: VecDeque::new(),
            responder: Box::new(responder),
        }
    }

    /// Never answers.
    pub fn silent() -> Self {
        Self::new(|_| Vec::new())
    }

    /// Acknowledges every command with a truthy reply; raster rows get none.
    pub fn acking() -> Self {
        Self::new(ack)
    }

    /// Queue bytes as if the printer had sent them unprompted.
    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    pub fn written_packets(&self) -> Vec<Packet> {
        self.writes
            .iter()
            .map(|frame| decode(frame).expect("engine wrote a malformed frame"))
            .collect()
    }

    pub fn written_types(&self) -> Vec<u8> {
        self.written_packets()
            .iter()
            .map(|p| p.packet_type())
            .collect()
    }
}

/// Truthy reply to any known request.
pub fn ack(request: &Packet) -> Vec<Packet> {
    reply_with(request, &[1])
}

pub fn reply_with(request: &Packet, data: &[u8]) -> Vec<Packet> {
    match RequestCode::try_from(request.packet_type()) {
        Ok(code) => {
            let reply_type = code.code().wrapping_add(code.response_offset());
            vec![Packet::new(reply_type, data).unwrap()]
        }
        Err(_) => Vec::new(),
    }
}

#[async_trait]
impl Transport for ScriptedPrinter {
    async fn connect(&mut self) -> Result<()> {
        if !self.connected {
            self.connected = true;
            self.connects += 1;
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self
            .fail_writes_after
            .is_some_and(|limit| self.writes.len() >= limit)
        {
            self.connected = false;
            return Err(PrinterError::Connection("link dropped".into()));
        }
        self.connect().await?;
        self.writes.push(data.to_vec());
        let request = decode(data).expect("engine wrote a malformed frame");
        for reply in (self.responder)(&request) {
            self.inbound.extend(reply.to_bytes());
            self.inbound.extend(&self.noise);
        }
        Ok(())
    }

    async fn read(&mut self) -> Result<Vec<u8>> {
        self.connect().await?;
        self.reads += 1;
        let take = match self.read_chunk {
            0 => self.inbound.len(),
            n => n.min(self.inbound.len()),
        };
        Ok(self.inbound.drain(..take).collect())
    }

    async fn handshake(&mut self) -> Result<()> {
        self.handshakes += 1;
        Ok(())
    }
}
