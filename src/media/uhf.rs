//! UHF packet-modem driver.
//!
//! The modem speaks an AT-style line protocol: commands `@XX…\r\n`, solicited
//! responses `*XX=…\r\n`, and one unsolicited message, the data report
//! `*DR=<LL><P><payload>/R<HH>\r\n`. `<LL>` is the ASCII-hex total length
//! including the protocol byte, `<P>` a single binary protocol byte and
//! `<HH>` the ASCII-hex modem id of the sender.
//!
//! The driver runs one task at a time over the shared line: an
//! initialisation command, a frame transmission (carrier sense, then `@DT`),
//! or the parsing of an incoming data report. A stuck task is abandoned
//! after [`AT_TASK_TIMEOUT`]; its observers see a dropped promise.

use core::task::Poll;
use core::time::Duration;

use heapless::Vec;
use rand_chacha::rand_core::RngCore;
use smallvec::SmallVec;

use super::line::{format_hex_byte, parse_hex_byte};
use super::{LinkStream, MediaInfo};
use crate::buffer::{FrameBufferPool, FrameBufferReader, FrameBufferWriter};
use crate::config::{
	AT_TASK_TIMEOUT, UHF_CS_BACKOFF_MAX, UHF_CS_BACKOFF_MIN, UHF_INFORMATION_RESPONSE_WINDOW,
};
use crate::link::{
	Address, AddressType, FrameBroker, LinkAddress, LinkFrame, ProtocolNumber, UhfModemId,
};
use crate::synch::{promise_pair, Delay, FutureValue, Promise};
use crate::time::Instant;

/// Fixed response-body lengths by kind. `DR` is absent on purpose: its body
/// is variable and parsed by the receive task.
fn fixed_body_length(kind: [u8; 2]) -> Option<usize> {
	match &kind {
		b"RI" | b"EI" | b"CS" | b"DT" | b"IR" => Some(2),
		b"SN" => Some(9),
		_ => None,
	}
}

/// A complete solicited response line, header stripped.
struct UhfResponse {
	kind: [u8; 2],
	body: Vec<u8, 9>,
}

enum ScannerEvent {
	Response(UhfResponse),
	DataReportHeader,
}

/// Scans the line for `*XX=` headers and collects fixed-size bodies.
enum LineScanner {
	HuntStar,
	Kind { bytes: Vec<u8, 3> },
	Body { kind: [u8; 2], body: Vec<u8, 9>, need: usize },
	Crlf { kind: [u8; 2], body: Vec<u8, 9>, seen: usize },
	/// Unknown or malformed response; drop everything up to the line feed.
	DiscardLine,
}

impl LineScanner {
	fn poll(&mut self, stream: &mut impl LinkStream) -> Poll<ScannerEvent> {
		loop {
			match self {
				LineScanner::HuntStar => {
					core::task::ready!(stream.poll_readable(1));
					if stream.read_unchecked() == b'*' {
						*self = LineScanner::Kind { bytes: Vec::new() };
					}
				}
				LineScanner::Kind { bytes } => {
					while !bytes.is_full() {
						core::task::ready!(stream.poll_readable(1));
						let _ = bytes.push(stream.read_unchecked());
					}
					if bytes[2] != b'=' {
						debug!("uhf: malformed response header, resyncing");
						*self = LineScanner::DiscardLine;
						continue;
					}
					let kind = [bytes[0], bytes[1]];
					if &kind == b"DR" {
						*self = LineScanner::HuntStar;
						return Poll::Ready(ScannerEvent::DataReportHeader);
					}
					match fixed_body_length(kind) {
						Some(need) => {
							*self = LineScanner::Body {
								kind,
								body: Vec::new(),
								need,
							};
						}
						None => {
							debug!("uhf: unknown response kind, resyncing");
							*self = LineScanner::DiscardLine;
						}
					}
				}
				LineScanner::Body { kind, body, need } => {
					while body.len() < *need {
						core::task::ready!(stream.poll_readable(1));
						let _ = body.push(stream.read_unchecked());
					}
					*self = LineScanner::Crlf {
						kind: *kind,
						body: core::mem::take(body),
						seen: 0,
					};
				}
				LineScanner::Crlf { kind, body, seen } => {
					while *seen < 2 {
						core::task::ready!(stream.poll_readable(1));
						stream.read_unchecked();
						*seen += 1;
					}
					let response = UhfResponse {
						kind: *kind,
						body: core::mem::take(body),
					};
					*self = LineScanner::HuntStar;
					return Poll::Ready(ScannerEvent::Response(response));
				}
				LineScanner::DiscardLine => {
					loop {
						core::task::ready!(stream.poll_readable(1));
						if stream.read_unchecked() == b'\n' {
							break;
						}
					}
					*self = LineScanner::HuntStar;
				}
			}
		}
	}
}

/// Sends one `@…` command and completes with the body of the matching
/// response.
struct CommandTask {
	command: SmallVec<[u8; 8]>,
	sent: usize,
	expect: [u8; 2],
	promise: Option<Promise<Vec<u8, 9>>>,
	deadline: Delay,
}

impl CommandTask {
	fn new(
		now: Instant,
		command: SmallVec<[u8; 8]>,
		expect: [u8; 2],
	) -> (Self, FutureValue<Vec<u8, 9>>) {
		let (future, promise) = promise_pair();
		let task = CommandTask {
			command,
			sent: 0,
			expect,
			promise: Some(promise),
			deadline: Delay::new(now, AT_TASK_TIMEOUT),
		};
		(task, future)
	}

	fn poll_send(&mut self, stream: &mut impl LinkStream) -> Poll<()> {
		while self.sent < self.command.len() {
			core::task::ready!(stream.poll_writable(1));
			stream.write_unchecked(self.command[self.sent]);
			self.sent += 1;
		}
		Poll::Ready(())
	}

	/// `true` when the response completed this task.
	fn handle_response(&mut self, response: &UhfResponse) -> bool {
		if response.kind != self.expect {
			debug!("uhf: dropping unexpected response while waiting");
			return false;
		}
		if let Some(promise) = self.promise.take() {
			promise.set(response.body.clone());
		}
		true
	}
}

enum TxState {
	SendCs { sent: usize },
	AwaitCs,
	Backoff(Delay),
	SendDt,
	AwaitDtAck,
	InformationWindow(Delay),
}

const CS_COMMAND: &[u8] = b"@CS\r\n";

/// Carrier-sense-then-transmit for one outbound frame.
struct TransmitTask {
	state: TxState,
	prefix: SmallVec<[u8; 8]>,
	prefix_sent: usize,
	reader: FrameBufferReader,
	suffix: SmallVec<[u8; 8]>,
	suffix_sent: usize,
	deadline: Delay,
}

impl TransmitTask {
	fn new(now: Instant, frame: &LinkFrame, destination: UhfModemId) -> TransmitTask {
		// @DT<LL><P>…payload…/R<HH>\r\n with <LL> counting protocol + payload
		let total_length = (frame.reader.buffer_length() + 1) as u8;
		let mut prefix = SmallVec::new();
		prefix.extend_from_slice(b"@DT");
		prefix.extend_from_slice(&format_hex_byte(total_length));
		prefix.push(frame.protocol_number as u8);
		let mut suffix = SmallVec::new();
		suffix.extend_from_slice(b"/R");
		suffix.extend_from_slice(&format_hex_byte(destination.0));
		suffix.extend_from_slice(b"\r\n");
		TransmitTask {
			state: TxState::SendCs { sent: 0 },
			prefix,
			prefix_sent: 0,
			reader: frame.reader.origin(),
			suffix,
			suffix_sent: 0,
			deadline: Delay::new(now, AT_TASK_TIMEOUT),
		}
	}

	/// Pushes whatever the current state wants onto the wire. `Ready` once
	/// the whole exchange, including the information window, is over.
	fn poll_write(&mut self, stream: &mut impl LinkStream, now: Instant) -> Poll<()> {
		loop {
			match &mut self.state {
				TxState::SendCs { sent } => {
					while *sent < CS_COMMAND.len() {
						core::task::ready!(stream.poll_writable(1));
						stream.write_unchecked(CS_COMMAND[*sent]);
						*sent += 1;
					}
					self.state = TxState::AwaitCs;
					return Poll::Pending;
				}
				TxState::Backoff(delay) => {
					core::task::ready!(delay.poll(now));
					// the deadline restarts with every carrier retry
					self.deadline = Delay::new(now, AT_TASK_TIMEOUT);
					self.state = TxState::SendCs { sent: 0 };
				}
				TxState::SendDt => {
					while self.prefix_sent < self.prefix.len() {
						core::task::ready!(stream.poll_writable(1));
						stream.write_unchecked(self.prefix[self.prefix_sent]);
						self.prefix_sent += 1;
					}
					while !self.reader.is_all_read() {
						core::task::ready!(stream.poll_writable(1));
						stream.write_unchecked(self.reader.read_byte());
					}
					while self.suffix_sent < self.suffix.len() {
						core::task::ready!(stream.poll_writable(1));
						stream.write_unchecked(self.suffix[self.suffix_sent]);
						self.suffix_sent += 1;
					}
					self.state = TxState::AwaitDtAck;
					return Poll::Pending;
				}
				TxState::InformationWindow(delay) => {
					core::task::ready!(delay.poll(now));
					return Poll::Ready(());
				}
				TxState::AwaitCs | TxState::AwaitDtAck => return Poll::Pending,
			}
		}
	}

	fn handle_response(&mut self, response: &UhfResponse, now: Instant, rng: &mut impl RngCore) {
		match (&self.state, &response.kind) {
			(TxState::AwaitCs, b"CS") => {
				if &response.body[..] == b"EN" {
					// medium busy; retry after a random backoff
					let min = UHF_CS_BACKOFF_MIN.as_millis() as u64;
					let max = UHF_CS_BACKOFF_MAX.as_millis() as u64;
					let backoff_millis = min + rng.next_u64() % (max - min + 1);
					debug!("uhf: carrier busy, backing off {backoff_millis}ms");
					self.state =
						TxState::Backoff(Delay::new(now, Duration::from_millis(backoff_millis)));
				} else {
					self.state = TxState::SendDt;
				}
			}
			(TxState::AwaitDtAck, b"DT") => {
				// the modem follows up with an information report; give it
				// room before the next command hits the line
				self.state =
					TxState::InformationWindow(Delay::new(now, UHF_INFORMATION_RESPONSE_WINDOW));
			}
			(TxState::InformationWindow(_), b"IR") => {}
			_ => {
				debug!("uhf: dropping unexpected response during transmit");
			}
		}
	}
}

enum RxTaskState {
	/// `<LL>` hex length.
	Param { digits: Vec<u8, 2> },
	Protocol { total_length: u8 },
	Payload { protocol: ProtocolNumber, writer: FrameBufferWriter },
	DiscardPayload { remaining: usize },
	/// `/R<HH>` then CRLF.
	Trailer {
		protocol: Option<ProtocolNumber>,
		reader: Option<FrameBufferReader>,
		bytes: Vec<u8, 6>,
	},
	Resync,
}

/// Parses one `*DR=` data report, the header having been consumed already.
struct ReceiveTask {
	state: RxTaskState,
	/// Parse but throw away: a previous frame is still waiting for the
	/// broker, or the line must simply be kept in sync.
	discard: bool,
	deadline: Delay,
}

impl ReceiveTask {
	fn new(now: Instant, discard: bool) -> ReceiveTask {
		ReceiveTask {
			state: RxTaskState::Param { digits: Vec::new() },
			discard,
			deadline: Delay::new(now, AT_TASK_TIMEOUT),
		}
	}

	/// Completes with the received frame, or `None` when it was discarded.
	fn poll(
		&mut self,
		stream: &mut impl LinkStream,
		pool: &FrameBufferPool,
	) -> Poll<Option<LinkFrame>> {
		loop {
			let state = core::mem::replace(&mut self.state, RxTaskState::Resync);
			match state {
				RxTaskState::Param { mut digits } => {
					while !digits.is_full() {
						if stream.poll_readable(1).is_pending() {
							self.state = RxTaskState::Param { digits };
							return Poll::Pending;
						}
						let _ = digits.push(stream.read_unchecked());
					}
					let Some(total_length) = parse_hex_byte(&digits) else {
						debug!("uhf: bad data report length, resyncing");
						return Poll::Ready(None);
					};
					self.state = RxTaskState::Protocol { total_length };
				}
				RxTaskState::Protocol { total_length } => {
					if stream.poll_readable(1).is_pending() {
						self.state = RxTaskState::Protocol { total_length };
						return Poll::Pending;
					}
					let payload_length = total_length.saturating_sub(1) as usize;
					let protocol_byte = stream.read_unchecked();

					let Some(protocol) = ProtocolNumber::from_byte(protocol_byte) else {
						debug!("uhf: unknown protocol number, discarding report");
						self.state = RxTaskState::DiscardPayload {
							remaining: payload_length,
						};
						continue;
					};
					if self.discard {
						self.state = RxTaskState::DiscardPayload {
							remaining: payload_length,
						};
						continue;
					}
					match pool.request_frame_writer(payload_length) {
						Poll::Ready(writer) => {
							self.state = RxTaskState::Payload { protocol, writer };
						}
						Poll::Pending => {
							info!("uhf: no frame buffer, discarding report");
							self.state = RxTaskState::DiscardPayload {
								remaining: payload_length,
							};
						}
					}
				}
				RxTaskState::Payload {
					protocol,
					mut writer,
				} => {
					while !writer.is_all_written() {
						if stream.poll_readable(1).is_pending() {
							self.state = RxTaskState::Payload { protocol, writer };
							return Poll::Pending;
						}
						writer.write(stream.read_unchecked());
					}
					self.state = RxTaskState::Trailer {
						protocol: Some(protocol),
						reader: Some(writer.create_reader()),
						bytes: Vec::new(),
					};
				}
				RxTaskState::DiscardPayload { mut remaining } => {
					while remaining > 0 {
						if stream.poll_readable(1).is_pending() {
							self.state = RxTaskState::DiscardPayload { remaining };
							return Poll::Pending;
						}
						stream.read_unchecked();
						remaining -= 1;
					}
					self.state = RxTaskState::Trailer {
						protocol: None,
						reader: None,
						bytes: Vec::new(),
					};
				}
				RxTaskState::Trailer {
					protocol,
					reader,
					mut bytes,
				} => {
					// "/R" + two hex digits + CRLF
					while !bytes.is_full() {
						if stream.poll_readable(1).is_pending() {
							self.state = RxTaskState::Trailer {
								protocol,
								reader,
								bytes,
							};
							return Poll::Pending;
						}
						let _ = bytes.push(stream.read_unchecked());
					}
					if !bytes.starts_with(b"/R") || !bytes.ends_with(b"\r\n") {
						debug!("uhf: malformed data report trailer");
						return Poll::Ready(None);
					}
					let Some(source) = parse_hex_byte(&bytes[2..4]).map(UhfModemId) else {
						debug!("uhf: bad source id in data report");
						return Poll::Ready(None);
					};
					let frame = match (protocol, reader) {
						(Some(protocol_number), Some(reader)) => Some(LinkFrame {
							protocol_number,
							remote: LinkAddress::from(Address::from(source)),
							reader,
						}),
						_ => None,
					};
					return Poll::Ready(frame);
				}
				RxTaskState::Resync => return Poll::Ready(None),
			}
		}
	}
}

enum UhfTask {
	Command(CommandTask),
	Transmit(TransmitTask),
	Receive(ReceiveTask),
}

impl UhfTask {
	fn deadline(&self) -> &Delay {
		match self {
			UhfTask::Command(task) => &task.deadline,
			UhfTask::Transmit(task) => &task.deadline,
			UhfTask::Receive(task) => &task.deadline,
		}
	}
}

enum InitState {
	IncludeRouteInformation,
	AwaitRouteInformation(FutureValue<Vec<u8, 9>>),
	GetSerialNumber,
	AwaitSerialNumber(FutureValue<Vec<u8, 9>>),
	SetEquipmentId(UhfModemId),
	AwaitEquipmentId(UhfModemId, FutureValue<Vec<u8, 9>>),
	Done,
}

/// Driver for one UHF modem attachment.
pub struct UhfPort<RW: LinkStream> {
	stream: RW,
	broker: FrameBroker,
	scanner: LineScanner,
	task: Option<UhfTask>,
	/// Data report that must be consumed while a command exchange owns the
	/// task slot; always in discard mode.
	discard_rx: Option<ReceiveTask>,
	init: InitState,
	self_id: Option<UhfModemId>,
	/// Parsed frame the broker had no room for; retried every tick.
	pending_dispatch: Option<LinkFrame>,
}

impl<RW: LinkStream> UhfPort<RW> {
	pub fn new(stream: RW, broker: FrameBroker) -> Self {
		UhfPort {
			stream,
			broker,
			scanner: LineScanner::HuntStar,
			task: None,
			discard_rx: None,
			init: InitState::IncludeRouteInformation,
			self_id: None,
			pending_dispatch: None,
		}
	}

	pub fn media_info(&self) -> MediaInfo {
		MediaInfo {
			address_type: Some(AddressType::Uhf),
			local_address: self.self_id.map(Address::from),
		}
	}

	pub fn local_id(&self) -> Option<UhfModemId> {
		self.self_id
	}

	fn task_addable(&self) -> bool {
		self.task.is_none() && self.stream.readable_count() == 0
	}

	pub fn execute(&mut self, pool: &FrameBufferPool, now: Instant, rng: &mut impl RngCore) {
		if let Some(frame) = self.pending_dispatch.take() {
			if let Err(frame) = self.broker.poll_dispatch_received_frame(frame) {
				self.pending_dispatch = Some(frame);
			}
		}

		self.reap_timed_out_task(now);
		self.drive_task_output(now);
		self.drive_line(pool, now, rng);
		self.drive_init(now);
		self.start_transmit(now);
		self.drive_task_output(now);
	}

	fn reap_timed_out_task(&mut self, now: Instant) {
		if let Some(task) = &self.task {
			if task.deadline().poll(now).is_ready() {
				warn!("uhf: task timed out, resetting slot");
				self.task = None;
				self.scanner = LineScanner::HuntStar;
			}
		}
		if let Some(task) = &self.discard_rx {
			if task.deadline.poll(now).is_ready() {
				warn!("uhf: stalled data report, resetting line scanner");
				self.discard_rx = None;
				self.scanner = LineScanner::HuntStar;
			}
		}
	}

	fn drive_task_output(&mut self, now: Instant) {
		let done = match &mut self.task {
			Some(UhfTask::Command(task)) => {
				let _ = task.poll_send(&mut self.stream);
				false
			}
			Some(UhfTask::Transmit(task)) => task.poll_write(&mut self.stream, now).is_ready(),
			_ => false,
		};
		if done {
			self.task = None;
		}
	}

	fn drive_line(&mut self, pool: &FrameBufferPool, now: Instant, rng: &mut impl RngCore) {
		loop {
			// an in-flight data report owns the raw stream until it ends
			if let Some(task) = &mut self.discard_rx {
				match task.poll(&mut self.stream, pool) {
					Poll::Pending => return,
					Poll::Ready(_) => {
						self.discard_rx = None;
						continue;
					}
				}
			}
			if let Some(UhfTask::Receive(task)) = &mut self.task {
				match task.poll(&mut self.stream, pool) {
					Poll::Pending => return,
					Poll::Ready(frame) => {
						self.task = None;
						if let Some(frame) = frame {
							if let Err(frame) = self.broker.poll_dispatch_received_frame(frame) {
								self.pending_dispatch = Some(frame);
							}
						}
						continue;
					}
				}
			}

			match self.scanner.poll(&mut self.stream) {
				Poll::Pending => return,
				Poll::Ready(ScannerEvent::DataReportHeader) => {
					let discard = self.pending_dispatch.is_some();
					if discard {
						info!("uhf: data report while a frame is pending, discarding");
					}
					if self.task.is_none() {
						self.task = Some(UhfTask::Receive(ReceiveTask::new(now, discard)));
					} else {
						// a command exchange is mid-flight; keep the line in
						// sync but do not keep the frame
						debug!("uhf: data report during command exchange, discarding");
						self.discard_rx = Some(ReceiveTask::new(now, true));
					}
				}
				Poll::Ready(ScannerEvent::Response(response)) => {
					let completed = match &mut self.task {
						Some(UhfTask::Command(task)) => task.handle_response(&response),
						Some(UhfTask::Transmit(task)) => {
							task.handle_response(&response, now, rng);
							false
						}
						_ => {
							debug!("uhf: unsolicited response, dropped");
							false
						}
					};
					if completed {
						self.task = None;
					}
				}
			}
		}
	}

	fn drive_init(&mut self, now: Instant) {
		loop {
			match &mut self.init {
				InitState::IncludeRouteInformation => {
					if !self.task_addable() {
						return;
					}
					let mut command = SmallVec::new();
					command.extend_from_slice(b"@RION\r\n");
					let (task, future) = CommandTask::new(now, command, *b"RI");
					self.task = Some(UhfTask::Command(task));
					self.init = InitState::AwaitRouteInformation(future);
					return;
				}
				InitState::AwaitRouteInformation(future) => match future.poll() {
					Poll::Pending => return,
					Poll::Ready(Ok(_)) => self.init = InitState::GetSerialNumber,
					Poll::Ready(Err(_)) => {
						warn!("uhf: initialization failed, retrying");
						self.init = InitState::IncludeRouteInformation;
						return;
					}
				},
				InitState::GetSerialNumber => {
					if !self.task_addable() {
						return;
					}
					let mut command = SmallVec::new();
					command.extend_from_slice(b"@SN\r\n");
					let (task, future) = CommandTask::new(now, command, *b"SN");
					self.task = Some(UhfTask::Command(task));
					self.init = InitState::AwaitSerialNumber(future);
					return;
				}
				InitState::AwaitSerialNumber(future) => match future.poll() {
					Poll::Pending => return,
					Poll::Ready(Ok(serial_number)) => {
						// the last two hex characters of the serial number
						// become this modem's equipment id
						match serial_number.get(7..9).and_then(parse_hex_byte) {
							Some(id) => {
								self.init = InitState::SetEquipmentId(UhfModemId(id));
							}
							None => {
								warn!("uhf: unusable serial number, retrying init");
								self.init = InitState::IncludeRouteInformation;
								return;
							}
						}
					}
					Poll::Ready(Err(_)) => {
						warn!("uhf: initialization failed, retrying");
						self.init = InitState::IncludeRouteInformation;
						return;
					}
				},
				InitState::SetEquipmentId(id) => {
					let id = *id;
					if !self.task_addable() {
						return;
					}
					let mut command = SmallVec::new();
					command.extend_from_slice(b"@EI");
					command.extend_from_slice(&format_hex_byte(id.0));
					command.extend_from_slice(b"\r\n");
					let (task, future) = CommandTask::new(now, command, *b"EI");
					self.task = Some(UhfTask::Command(task));
					self.init = InitState::AwaitEquipmentId(id, future);
					return;
				}
				InitState::AwaitEquipmentId(id, future) => match future.poll() {
					Poll::Pending => return,
					Poll::Ready(Ok(_)) => {
						info!("uhf: initialized with equipment id {:02x}", id.0);
						self.self_id = Some(*id);
						self.init = InitState::Done;
					}
					Poll::Ready(Err(_)) => {
						warn!("uhf: initialization failed, retrying");
						self.init = InitState::IncludeRouteInformation;
						return;
					}
				},
				InitState::Done => return,
			}
		}
	}

	fn start_transmit(&mut self, now: Instant) {
		if !matches!(self.init, InitState::Done) || !self.task_addable() {
			return;
		}
		let Poll::Ready(frame) = self
			.broker
			.poll_get_send_requested_frame(AddressType::Uhf, None)
		else {
			return;
		};
		let Some(destination) = UhfModemId::try_from_link_address(&frame.remote) else {
			debug!("uhf: dropping frame without UHF destination");
			return;
		};
		self.task = Some(UhfTask::Transmit(TransmitTask::new(now, &frame, destination)));
	}
}
