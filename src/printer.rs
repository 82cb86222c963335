use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{PrinterError, Result};
use crate::protocol::{
    InfoKey, Packet, PacketBuffer, RequestCode, ERROR_REPLY, UNIMPLEMENTED_REPLY,
};
use crate::raster::{encode_bitmap, Bitmap};
use crate::status::{Heartbeat, InfoValue, PrintStatus, RfidInfo};
use crate::trace::{Direction, FrameEvent, FrameSink, TracingSink};
use crate::transport::Transport;

/// How a yes/no command treats a printer that never answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NoResponsePolicy {
    /// Silence counts as success. Some models (B21S among them) do not
    /// acknowledge setup commands at all.
    #[default]
    AssumeSuccess,
    /// Silence fails the command with [`PrinterError::NoResponse`].
    Strict,
}

/// Timing and behaviour of the request engine.
#[derive(Debug, Clone)]
pub struct PrinterConfig {
    /// Reads per request before giving up on a reply.
    pub attempts: usize,
    /// Pause between two reads of the same request.
    pub retry_interval: Duration,
    /// Pause after each raster row.
    pub packet_pacing: Duration,
    /// Pause after the last raster row so the printer can flush.
    pub flush_delay: Duration,
    /// Pause between the status query and the first END_PRINT.
    pub status_delay: Duration,
    /// Pause between END_PRINT polls.
    pub end_print_interval: Duration,
    /// Give up after this many END_PRINT polls; `None` polls until done.
    pub end_print_attempts: Option<usize>,
    pub label_type: u8,
    pub no_response: NoResponsePolicy,
    /// Drop replies with a bad checksum and keep waiting, instead of
    /// trusting the printer.
    pub verify_checksum: bool,
    /// Run the transport handshake before each job.
    pub handshake: bool,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            attempts: 6,
            retry_interval: Duration::from_millis(100),
            packet_pacing: Duration::from_millis(10),
            flush_delay: Duration::from_secs(1),
            status_delay: Duration::from_secs(1),
            end_print_interval: Duration::from_millis(100),
            end_print_attempts: None,
            label_type: 1,
            no_response: NoResponsePolicy::AssumeSuccess,
            verify_checksum: false,
            handshake: false,
        }
    }
}

/// Step name used for raster rows in job errors.
pub const PRINT_BITMAP_ROW_STEP: &str = "PRINT_BITMAP_ROW";

/// Request/response engine for one printer.
///
/// Owns the transport and the buffer of bytes read but not yet framed.
/// Requests are strictly sequential; use one `Printer` per job.
pub struct Printer<T: Transport> {
    transport: T,
    buffer: PacketBuffer,
    config: PrinterConfig,
    sink: Box<dyn FrameSink>,
}

impl<T: Transport> Printer<T> {
    /// Engine with [`PrinterConfig::default`] timings.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, PrinterConfig::default())
    }

    pub fn with_config(transport: T, config: PrinterConfig) -> Self {
        Self {
            transport,
            buffer: PacketBuffer::new().with_checksum_verification(config.verify_checksum),
            config,
            sink: Box::new(TracingSink),
        }
    }

    /// Send frame traces to `sink` instead of `tracing`.
    pub fn with_sink(mut self, sink: impl FrameSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn config(&self) -> &PrinterConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Drop buffered bytes and release the link.
    ///
    /// To abort a running job, drop its future (e.g. lose a `select!` or a
    /// `timeout`) and then close; no further frames are written once the
    /// future is gone.
    pub async fn close(&mut self) -> Result<()> {
        self.buffer.clear();
        self.transport.disconnect().await
    }

    async fn send(&mut self, packet: &Packet) -> Result<()> {
        let frame = packet.to_bytes();
        self.sink.frame(&FrameEvent {
            direction: Direction::Send,
            packet_type: packet.packet_type(),
            frame: &frame,
        });
        self.transport.write(&frame).await
    }

    /// One transport read, then every frame it completed. Noise around the
    /// frames is dropped by the buffer.
    async fn recv(&mut self) -> Result<Vec<Packet>> {
        let data = self.transport.read().await?;
        self.buffer.push(&data);
        let mut packets = Vec::new();
        while let Some(packet) = self.buffer.next_packet() {
            self.sink.frame(&FrameEvent {
                direction: Direction::Receive,
                packet_type: packet.packet_type(),
                frame: &packet.to_bytes(),
            });
            packets.push(packet);
        }
        Ok(packets)
    }

    /// Send `request` and wait for its reply.
    ///
    /// `Ok(None)` means the printer stayed silent for every attempt.
    pub async fn transceive(&mut self, request: RequestCode, data: &[u8]) -> Result<Option<Packet>> {
        self.transceive_raw(request.code(), data, request.response_offset())
            .await
    }

    /// Like [`transceive`](Self::transceive) for an arbitrary code, replying
    /// with `request + response_offset`.
    pub async fn transceive_raw(
        &mut self,
        request: u8,
        data: &[u8],
        response_offset: u8,
    ) -> Result<Option<Packet>> {
        let response_code = request.wrapping_add(response_offset);
        let packet = Packet::new(request, data)?;
        self.send(&packet).await?;

        let attempts = self.config.attempts.max(1);
        for attempt in 1..=attempts {
            let mut matched = None;
            for reply in self.recv().await? {
                match reply.packet_type() {
                    ERROR_REPLY => {
                        return Err(PrinterError::PrinterReported {
                            data: reply.into_data(),
                        });
                    }
                    UNIMPLEMENTED_REPLY => return Err(PrinterError::Unimplemented { request }),
                    code if code == response_code => {
                        if matched.is_none() {
                            matched = Some(reply);
                        }
                    }
                    code => debug!("ignoring reply {code:#04x} while waiting for {response_code:#04x}"),
                }
            }
            if matched.is_some() {
                return Ok(matched);
            }
            if attempt < attempts {
                sleep(self.config.retry_interval).await;
            }
        }
        debug!("no reply to {request:#04x} after {attempts} reads");
        Ok(None)
    }

    /// Yes/no command: the first reply byte, or the no-response policy.
    async fn request_flag(&mut self, request: RequestCode, data: &[u8]) -> Result<bool> {
        match self.transceive(request, data).await? {
            Some(reply) => reply.data().first().map(|&b| b != 0).ok_or_else(|| {
                PrinterError::MalformedFrame(format!("empty reply to {request}"))
            }),
            None => match self.config.no_response {
                NoResponsePolicy::AssumeSuccess => {
                    debug!("{request}: no reply, assuming success");
                    Ok(true)
                }
                NoResponsePolicy::Strict => Err(PrinterError::NoResponse(request)),
            },
        }
    }

    /// Print darkness, 1 (light) to 5 (dark).
    pub async fn set_label_density(&mut self, density: u8) -> Result<bool> {
        check_density(density)?;
        self.request_flag(RequestCode::SetLabelDensity, &[density])
            .await
    }

    /// Media type of the loaded roll.
    ///
    /// - `label_type`: 1 for gap labels, 2 for black-mark, 3 for continuous
    ///
    /// Returns the printer's acknowledgement.
    pub async fn set_label_type(&mut self, label_type: u8) -> Result<bool> {
        self.request_flag(RequestCode::SetLabelType, &[label_type])
            .await
    }

    /// Opens a print job. Returns the printer's acknowledgement.
    pub async fn start_print(&mut self) -> Result<bool> {
        self.request_flag(RequestCode::StartPrint, &[1]).await
    }

    /// Closes the job. `false` means the printer is still busy and the
    /// command should be repeated.
    pub async fn end_print(&mut self) -> Result<bool> {
        self.request_flag(RequestCode::EndPrint, &[1]).await
    }

    /// Opens one page within the job.
    pub async fn start_page_print(&mut self) -> Result<bool> {
        self.request_flag(RequestCode::StartPagePrint, &[1]).await
    }

    /// Closes the current page once all its rows are sent.
    pub async fn end_page_print(&mut self) -> Result<bool> {
        self.request_flag(RequestCode::EndPagePrint, &[1]).await
    }

    /// Lets the printer clear its page buffer.
    pub async fn allow_print_clear(&mut self) -> Result<bool> {
        self.request_flag(RequestCode::AllowPrintClear, &[1]).await
    }

    /// Label size in dots. Height goes first on the wire.
    pub async fn set_dimension(&mut self, height: u16, width: u16) -> Result<bool> {
        let mut data = [0u8; 4];
        data[..2].copy_from_slice(&height.to_be_bytes());
        data[2..].copy_from_slice(&width.to_be_bytes());
        self.request_flag(RequestCode::SetDimension, &data).await
    }

    /// Copies of the next page.
    pub async fn set_quantity(&mut self, quantity: u16) -> Result<bool> {
        self.request_flag(RequestCode::SetQuantity, &quantity.to_be_bytes())
            .await
    }

    /// Never fails on silence: a missing reply reads as all zero.
    pub async fn get_print_status(&mut self) -> Result<PrintStatus> {
        let reply = self.transceive(RequestCode::GetPrintStatus, &[1]).await?;
        Ok(reply
            .map(|p| PrintStatus::from_reply(p.data()))
            .unwrap_or_default())
    }

    /// Polls device state.
    ///
    /// Returns `None` when the printer does not answer.
    pub async fn heartbeat(&mut self) -> Result<Option<Heartbeat>> {
        let reply = self.transceive(RequestCode::Heartbeat, &[1]).await?;
        Ok(reply.map(|p| Heartbeat::from_reply(p.data())))
    }

    /// Reads one device property.
    ///
    /// - `key`: which property; the reply code is `GET_INFO + key`
    ///
    /// Returns `None` when the printer does not answer.
    pub async fn get_info(&mut self, key: InfoKey) -> Result<Option<InfoValue>> {
        let key_code = key as u8;
        let reply = self
            .transceive_raw(RequestCode::GetInfo.code(), &[key_code], key_code)
            .await?;
        Ok(reply.map(|p| InfoValue::from_reply(key, p.data())))
    }

    /// Reads the RFID tag of the loaded roll.
    ///
    /// Returns `None` when the printer does not answer or has no tag.
    pub async fn get_rfid(&mut self) -> Result<Option<RfidInfo>> {
        match self.transceive(RequestCode::GetRfid, &[1]).await? {
            Some(reply) => RfidInfo::from_reply(reply.data()),
            None => Ok(None),
        }
    }

    /// Print `bitmap` as one label.
    ///
    /// Runs the full job: density, label type, start print, start page,
    /// dimensions, every raster row, end page, a status query, and END_PRINT
    /// until the printer reports it is done. Any failure aborts the job and
    /// names the step in [`PrinterError::JobFailed`].
    pub async fn print_image<B: Bitmap + ?Sized>(&mut self, bitmap: &B, density: u8) -> Result<()> {
        check_density(density)?;
        let rows = encode_bitmap(bitmap)?;
        let (width, height) = (bitmap.width() as u16, bitmap.height() as u16);
        info!("printing {width}x{height} label at density {density}");

        if self.config.handshake {
            self.transport
                .handshake()
                .await
                .map_err(|e| e.at_step("HANDSHAKE"))?;
        }

        required(
            RequestCode::SetLabelDensity,
            self.set_label_density(density).await,
        )?;
        let label_type = self.config.label_type;
        required(
            RequestCode::SetLabelType,
            self.set_label_type(label_type).await,
        )?;
        required(RequestCode::StartPrint, self.start_print().await)?;
        required(RequestCode::StartPagePrint, self.start_page_print().await)?;
        required(
            RequestCode::SetDimension,
            self.set_dimension(height, width).await,
        )?;

        for row in rows {
            self.send(&row)
                .await
                .map_err(|e| e.at_step(PRINT_BITMAP_ROW_STEP))?;
            sleep(self.config.packet_pacing).await;
        }
        debug!("sent {height} rows");

        sleep(self.config.flush_delay).await;
        required(RequestCode::EndPagePrint, self.end_page_print().await)?;

        let status = self
            .get_print_status()
            .await
            .map_err(|e| e.at_step(RequestCode::GetPrintStatus.name()))?;
        info!(
            page = status.page,
            progress1 = status.progress1,
            progress2 = status.progress2,
            "print status"
        );
        sleep(self.config.status_delay).await;

        let mut polls = 0;
        loop {
            polls += 1;
            let done = self
                .end_print()
                .await
                .map_err(|e| e.at_step(RequestCode::EndPrint.name()))?;
            if done {
                break;
            }
            if self.config.end_print_attempts.is_some_and(|max| polls >= max) {
                warn!("printer still busy after {polls} END_PRINT polls");
                return Err(
                    PrinterError::Rejected(RequestCode::EndPrint).at_step(RequestCode::EndPrint.name())
                );
            }
            sleep(self.config.end_print_interval).await;
        }
        info!("print job finished after {polls} END_PRINT polls");
        Ok(())
    }
}

fn check_density(density: u8) -> Result<()> {
    if !(1..=5).contains(&density) {
        return Err(PrinterError::InvalidArgument(format!(
            "density must be between 1 and 5, got {density}"
        )));
    }
    Ok(())
}

/// A job step must succeed: a falsy reply becomes `Rejected`, and every
/// failure is tagged with the step.
fn required(step: RequestCode, outcome: Result<bool>) -> Result<()> {
    match outcome {
        Ok(true) => Ok(()),
        Ok(false) => Err(PrinterError::Rejected(step).at_step(step.name())),
        Err(e) => Err(e.at_step(step.name())),
    }
}
