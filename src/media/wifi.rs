//! ESP-family Wi-Fi modem driver.
//!
//! The modem is an AT command processor with one UDP "connection" slot.
//! Solicited traffic (command, `OK`/`ERROR`, the `> ` prompt of `CIPSEND`)
//! and unsolicited traffic (`+IPD,…` data, `WIFI …` connectivity events)
//! share one serial line. The read half is guarded by a [`SharedLock`]: the
//! message handler holds the guard while it parses an unsolicited message,
//! an active control or send task holds it while it collects its responses,
//! and the guard moving between the two is what keeps them from tearing
//! each other's lines apart.

use core::task::Poll;
use core::time::Duration;

use heapless::Vec;

use super::line::{parse_decimal, parse_ipv4, push_decimal, LineBuffer};
use super::{LinkStream, MediaInfo};
use crate::buffer::{FrameBufferPool, FrameBufferReader, FrameBufferWriter};
use crate::config::{AT_TASK_TIMEOUT, WIFI_JOIN_AP_TIMEOUT};
use crate::link::{
	Address, AddressType, FrameBroker, LinkAddress, LinkFrame, ProtocolNumber, UdpEndpoint,
};
use crate::synch::{promise_pair, Delay, FutureValue, Promise, SharedLock, SharedLockGuard};
use crate::time::Instant;

const INIT_COMMANDS: [&[u8]; 3] = [
	b"AT+CIPMUX=0\r\n",   // single connection slot
	b"AT+CWMODE=1\r\n",   // station mode
	b"AT+CIPDINFO=1\r\n", // report remote endpoint on receive
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LineVerdict {
	Success,
	Failure,
	Other,
}

fn classify_line(line: &[u8]) -> LineVerdict {
	match line {
		b"OK\r\n" => LineVerdict::Success,
		b"ERROR\r\n" | b"FAIL\r\n" => LineVerdict::Failure,
		_ => LineVerdict::Other,
	}
}

type CommandBytes = Vec<u8, 128>;

fn command_bytes(parts: &[&[u8]]) -> CommandBytes {
	let mut command = CommandBytes::new();
	for part in parts {
		let _ = command.extend_from_slice(part);
	}
	command
}

/// Sends one command, then matches response lines until a verdict arrives.
/// Unrelated lines in between are skipped.
struct ControlExchange {
	command: CommandBytes,
	sent: usize,
	line: LineBuffer<24>,
}

impl ControlExchange {
	fn new(command: CommandBytes) -> Self {
		ControlExchange {
			command,
			sent: 0,
			line: LineBuffer::new(),
		}
	}

	fn poll_send(&mut self, stream: &mut impl LinkStream) -> Poll<()> {
		while self.sent < self.command.len() {
			core::task::ready!(stream.poll_writable(1));
			stream.write_unchecked(self.command[self.sent]);
			self.sent += 1;
		}
		Poll::Ready(())
	}

	fn poll_verdict(&mut self, stream: &mut impl LinkStream) -> Poll<bool> {
		loop {
			if core::task::ready!(self.line.poll_fill(stream)) {
				match classify_line(self.line.line()) {
					LineVerdict::Success => return Poll::Ready(true),
					LineVerdict::Failure => return Poll::Ready(false),
					LineVerdict::Other => {}
				}
			}
			self.line.reset();
		}
	}
}

enum TaskBody {
	/// Plain command/verdict exchange (join, start server, close server).
	Control { exchange: ControlExchange, command_sent: bool },
	/// The three-command initialisation sequence.
	Init { index: usize, exchange: ControlExchange, command_sent: bool },
	/// `AT+CIPSTA?` capturing the `+CIPSTA:ip:"…"` line.
	GetIp { exchange: ControlExchange, command_sent: bool, captured: Option<[u8; 4]> },
	/// Two-phase `CIPSEND`.
	Send(SendFrameTask),
}

enum TaskOutcome {
	Bool(bool),
	Ip(Option<[u8; 4]>),
}

struct WifiTask {
	body: TaskBody,
	/// Completion future for callers that asked for one.
	bool_promise: Option<Promise<bool>>,
	guard: Option<SharedLockGuard<()>>,
	deadline: Delay,
}

impl WifiTask {
	fn new(now: Instant, body: TaskBody, timeout: Duration) -> Self {
		WifiTask {
			body,
			bool_promise: None,
			guard: None,
			deadline: Delay::new(now, timeout),
		}
	}

	fn poll(
		&mut self,
		stream: &mut impl LinkStream,
		read_half: &SharedLock<()>,
	) -> Poll<TaskOutcome> {
		match &mut self.body {
			TaskBody::Control {
				exchange,
				command_sent,
			} => {
				if !*command_sent {
					core::task::ready!(exchange.poll_send(stream));
					*command_sent = true;
				}
				if self.guard.is_none() {
					self.guard = Some(core::task::ready!(read_half.poll_lock()));
				}
				let ok = core::task::ready!(exchange.poll_verdict(stream));
				self.guard = None;
				Poll::Ready(TaskOutcome::Bool(ok))
			}
			TaskBody::Init {
				index,
				exchange,
				command_sent,
			} => {
				loop {
					if !*command_sent {
						core::task::ready!(exchange.poll_send(stream));
						*command_sent = true;
					}
					if self.guard.is_none() {
						self.guard = Some(core::task::ready!(read_half.poll_lock()));
					}
					let ok = core::task::ready!(exchange.poll_verdict(stream));
					if !ok {
						self.guard = None;
						return Poll::Ready(TaskOutcome::Bool(false));
					}
					*index += 1;
					if *index == INIT_COMMANDS.len() {
						self.guard = None;
						return Poll::Ready(TaskOutcome::Bool(true));
					}
					*exchange = ControlExchange::new(command_bytes(&[INIT_COMMANDS[*index]]));
					*command_sent = false;
				}
			}
			TaskBody::GetIp {
				exchange,
				command_sent,
				captured,
			} => {
				if !*command_sent {
					core::task::ready!(exchange.poll_send(stream));
					*command_sent = true;
				}
				if self.guard.is_none() {
					self.guard = Some(core::task::ready!(read_half.poll_lock()));
				}
				loop {
					if core::task::ready!(exchange.line.poll_fill(stream)) {
						let line = exchange.line.line();
						if let Some(rest) = line.strip_prefix(b"+CIPSTA:ip:\"") {
							if let Some((octets, _)) = parse_ipv4(rest) {
								*captured = Some(octets);
							}
						} else {
							match classify_line(line) {
								LineVerdict::Success => {
									self.guard = None;
									return Poll::Ready(TaskOutcome::Ip(*captured));
								}
								LineVerdict::Failure => {
									self.guard = None;
									return Poll::Ready(TaskOutcome::Ip(None));
								}
								LineVerdict::Other => {}
							}
						}
					}
					exchange.line.reset();
				}
			}
			TaskBody::Send(task) => {
				let ok = core::task::ready!(task.poll(stream, read_half, &mut self.guard));
				Poll::Ready(TaskOutcome::Bool(ok))
			}
		}
	}
}

enum SendPhase {
	Request,
	AwaitOk,
	AwaitPrompt { got_angle: bool },
	Body,
	AwaitResult,
}

/// Two-phase `CIPSEND`: request a slot, wait for the `> ` prompt, stream
/// the body, wait for `SEND OK` / `SEND FAIL`.
struct SendFrameTask {
	phase: SendPhase,
	request: ControlExchange,
	protocol_sent: bool,
	reader: FrameBufferReader,
	protocol_number: ProtocolNumber,
	line: LineBuffer<24>,
}

impl SendFrameTask {
	fn new(frame: &LinkFrame, destination: UdpEndpoint) -> Self {
		// AT+CIPSEND=<len>,"<ip>",<port> with <len> counting the protocol byte
		let mut command = CommandBytes::new();
		let _ = command.extend_from_slice(b"AT+CIPSEND=");
		push_decimal(&mut command, (frame.reader.buffer_length() + 1) as u32);
		let _ = command.extend_from_slice(b",\"");
		for (i, octet) in destination.ip.iter().enumerate() {
			if i > 0 {
				let _ = command.push(b'.');
			}
			push_decimal(&mut command, *octet as u32);
		}
		let _ = command.extend_from_slice(b"\",");
		push_decimal(&mut command, destination.port as u32);
		let _ = command.extend_from_slice(b"\r\n");

		SendFrameTask {
			phase: SendPhase::Request,
			request: ControlExchange::new(command),
			protocol_sent: false,
			reader: frame.reader.origin(),
			protocol_number: frame.protocol_number,
			line: LineBuffer::new(),
		}
	}

	fn poll(
		&mut self,
		stream: &mut impl LinkStream,
		read_half: &SharedLock<()>,
		guard: &mut Option<SharedLockGuard<()>>,
	) -> Poll<bool> {
		loop {
			match &mut self.phase {
				SendPhase::Request => {
					core::task::ready!(self.request.poll_send(stream));
					self.phase = SendPhase::AwaitOk;
				}
				SendPhase::AwaitOk => {
					if guard.is_none() {
						*guard = Some(core::task::ready!(read_half.poll_lock()));
					}
					if core::task::ready!(self.request.poll_verdict(stream)) {
						self.phase = SendPhase::AwaitPrompt { got_angle: false };
					} else {
						*guard = None;
						return Poll::Ready(false);
					}
				}
				SendPhase::AwaitPrompt { got_angle } => {
					loop {
						core::task::ready!(stream.poll_readable(1));
						let byte = stream.read_unchecked();
						if *got_angle && byte == b' ' {
							break;
						}
						*got_angle = byte == b'>';
					}
					self.phase = SendPhase::Body;
				}
				SendPhase::Body => {
					if !self.protocol_sent {
						core::task::ready!(stream.poll_writable(1));
						stream.write_unchecked(self.protocol_number as u8);
						self.protocol_sent = true;
					}
					while !self.reader.is_all_read() {
						core::task::ready!(stream.poll_writable(1));
						stream.write_unchecked(self.reader.read_byte());
					}
					self.phase = SendPhase::AwaitResult;
				}
				SendPhase::AwaitResult => {
					loop {
						if core::task::ready!(self.line.poll_fill(stream)) {
							match self.line.line() {
								b"SEND OK\r\n" => {
									*guard = None;
									return Poll::Ready(true);
								}
								b"SEND FAIL\r\n" | b"ERROR\r\n" => {
									*guard = None;
									return Poll::Ready(false);
								}
								_ => {}
							}
						}
						self.line.reset();
					}
				}
			}
		}
	}
}

enum MsgState {
	Idle,
	Detect { bytes: Vec<u8, 5> },
	WifiLine { line: LineBuffer<32> },
	IpdHeader { header: Vec<u8, 40> },
	IpdProtocol { length: usize, remote: UdpEndpoint },
	IpdPayload { remote: UdpEndpoint, protocol: ProtocolNumber, writer: FrameBufferWriter },
	IpdDiscard { remaining: usize },
	DiscardLine,
}

enum WifiEvent {
	GotIp,
	Disconnect,
	Frame(LinkFrame),
}

/// Parses `+IPD,…` data and `WIFI …` events whenever it holds the read
/// guard; everything else on the line is some task's response and is left
/// alone (or, when no task reads it, discarded here).
struct MessageHandler {
	state: MsgState,
	guard: Option<SharedLockGuard<()>>,
	deadline: Option<Delay>,
}

impl MessageHandler {
	fn new() -> Self {
		MessageHandler {
			state: MsgState::Idle,
			guard: None,
			deadline: None,
		}
	}

	fn reset(&mut self) {
		self.state = MsgState::Idle;
		self.guard = None;
		self.deadline = None;
	}

	fn poll(
		&mut self,
		stream: &mut impl LinkStream,
		pool: &FrameBufferPool,
		read_half: &SharedLock<()>,
		discard_frames: bool,
		now: Instant,
	) -> Poll<WifiEvent> {
		loop {
			let state = core::mem::replace(&mut self.state, MsgState::Idle);
			match state {
				MsgState::Idle => {
					if stream.poll_readable(1).is_pending() {
						return Poll::Pending;
					}
					let Poll::Ready(guard) = read_half.poll_lock() else {
						return Poll::Pending;
					};
					self.guard = Some(guard);
					self.deadline = Some(Delay::new(now, AT_TASK_TIMEOUT));
					self.state = MsgState::Detect { bytes: Vec::new() };
				}
				MsgState::Detect { mut bytes } => {
					while !bytes.is_full() {
						if stream.poll_readable(1).is_pending() {
							self.state = MsgState::Detect { bytes };
							return Poll::Pending;
						}
						let _ = bytes.push(stream.read_unchecked());
						// a line shorter than any header carries nothing we
						// track; drop it as soon as it terminates
						if bytes.ends_with(b"\r\n") {
							self.reset();
							break;
						}
					}
					if self.guard.is_none() {
						continue;
					}
					match &bytes[..] {
						b"+IPD," => self.state = MsgState::IpdHeader { header: Vec::new() },
						b"WIFI " => {
							self.state = MsgState::WifiLine {
								line: LineBuffer::new(),
							}
						}
						_ => {
							debug!("wifi: unrecognized line, discarding");
							self.state = MsgState::DiscardLine;
						}
					}
				}
				MsgState::WifiLine { mut line } => {
					match line.poll_fill(stream) {
						Poll::Pending => {
							self.state = MsgState::WifiLine { line };
							return Poll::Pending;
						}
						Poll::Ready(false) => {
							self.reset();
							continue;
						}
						Poll::Ready(true) => {}
					}
					let event = match line.line() {
						b"GOT IP\r\n" => Some(WifiEvent::GotIp),
						b"DISCONNECT\r\n" => Some(WifiEvent::Disconnect),
						// "CONNECTED" and friends carry no state we track
						_ => None,
					};
					self.reset();
					if let Some(event) = event {
						return Poll::Ready(event);
					}
				}
				MsgState::IpdHeader { mut header } => {
					// <len>,<ip>,<port>: -- binary payload follows the colon
					let mut complete = header.last() == Some(&b':');
					while !complete {
						if stream.poll_readable(1).is_pending() {
							self.state = MsgState::IpdHeader { header };
							return Poll::Pending;
						}
						let byte = stream.read_unchecked();
						if header.push(byte).is_err() {
							debug!("wifi: oversized +IPD header, resyncing");
							self.state = MsgState::DiscardLine;
							break;
						}
						complete = byte == b':';
					}
					if !complete {
						continue;
					}
					match parse_ipd_header(&header) {
						Some((length, remote))
							if length > 0 && length <= crate::buffer::MAX_FRAME_BUFFER_LENGTH =>
						{
							self.state = MsgState::IpdProtocol { length, remote };
						}
						Some((length, _)) if length > 0 => {
							debug!("wifi: oversized +IPD datagram, discarding");
							self.state = MsgState::IpdDiscard { remaining: length };
						}
						_ => {
							debug!("wifi: malformed +IPD header, resyncing");
							self.reset();
						}
					}
				}
				MsgState::IpdProtocol { length, remote } => {
					if stream.poll_readable(1).is_pending() {
						self.state = MsgState::IpdProtocol { length, remote };
						return Poll::Pending;
					}
					let payload_length = length - 1;
					let protocol_byte = stream.read_unchecked();
					let Some(protocol) = ProtocolNumber::from_byte(protocol_byte) else {
						debug!("wifi: unknown protocol number, discarding datagram");
						self.state = MsgState::IpdDiscard {
							remaining: payload_length,
						};
						continue;
					};
					if discard_frames {
						self.state = MsgState::IpdDiscard {
							remaining: payload_length,
						};
						continue;
					}
					match pool.request_frame_writer(payload_length) {
						Poll::Ready(writer) => {
							self.state = MsgState::IpdPayload {
								remote,
								protocol,
								writer,
							};
						}
						Poll::Pending => {
							info!("wifi: no frame buffer, discarding datagram");
							self.state = MsgState::IpdDiscard {
								remaining: payload_length,
							};
						}
					}
				}
				MsgState::IpdPayload {
					remote,
					protocol,
					mut writer,
				} => {
					while !writer.is_all_written() {
						if stream.poll_readable(1).is_pending() {
							self.state = MsgState::IpdPayload {
								remote,
								protocol,
								writer,
							};
							return Poll::Pending;
						}
						writer.write(stream.read_unchecked());
					}
					let frame = LinkFrame {
						protocol_number: protocol,
						remote: LinkAddress::Unicast(Address::from(remote)),
						reader: writer.create_reader(),
					};
					self.reset();
					return Poll::Ready(WifiEvent::Frame(frame));
				}
				MsgState::IpdDiscard { mut remaining } => {
					while remaining > 0 {
						if stream.poll_readable(1).is_pending() {
							self.state = MsgState::IpdDiscard { remaining };
							return Poll::Pending;
						}
						stream.read_unchecked();
						remaining -= 1;
					}
					self.reset();
				}
				MsgState::DiscardLine => {
					loop {
						if stream.poll_readable(1).is_pending() {
							self.state = MsgState::DiscardLine;
							return Poll::Pending;
						}
						if stream.read_unchecked() == b'\n' {
							break;
						}
					}
					self.reset();
				}
			}
		}
	}
}

fn parse_ipd_header(header: &[u8]) -> Option<(usize, UdpEndpoint)> {
	let (length, consumed) = parse_decimal(header)?;
	let rest = header.get(consumed..)?.strip_prefix(b",")?;
	let (ip, consumed) = parse_ipv4(rest)?;
	let rest = rest.get(consumed..)?.strip_prefix(b",")?;
	let (port, consumed) = parse_decimal(rest)?;
	if rest.get(consumed..) != Some(b":".as_slice()) {
		return None;
	}
	Some((
		length as usize,
		UdpEndpoint {
			ip,
			port: u16::try_from(port).ok()?,
		},
	))
}

/// Driver for one ESP-family Wi-Fi modem attachment.
pub struct WifiPort<RW: LinkStream> {
	stream: RW,
	broker: FrameBroker,
	read_half: SharedLock<()>,
	handler: MessageHandler,
	task: Option<WifiTask>,
	initialized: bool,
	/// A `WIFI GOT IP` event was seen; learn the new address when the task
	/// slot frees up.
	get_ip_queued: bool,
	local_ip: Option<[u8; 4]>,
	server_port: Option<u16>,
	pending_dispatch: Option<LinkFrame>,
}

impl<RW: LinkStream> WifiPort<RW> {
	pub fn new(stream: RW, broker: FrameBroker, now: Instant) -> Self {
		let mut port = WifiPort {
			stream,
			broker,
			read_half: SharedLock::new(()),
			handler: MessageHandler::new(),
			task: None,
			initialized: false,
			get_ip_queued: false,
			local_ip: None,
			server_port: None,
			pending_dispatch: None,
		};
		port.start_init(now);
		port
	}

	fn start_init(&mut self, now: Instant) {
		self.task = Some(WifiTask::new(
			now,
			TaskBody::Init {
				index: 0,
				exchange: ControlExchange::new(command_bytes(&[INIT_COMMANDS[0]])),
				command_sent: false,
			},
			AT_TASK_TIMEOUT,
		));
	}

	pub fn media_info(&self) -> MediaInfo {
		MediaInfo {
			address_type: Some(AddressType::Udp),
			local_address: self.local_address().map(Address::from),
		}
	}

	pub fn local_address(&self) -> Option<UdpEndpoint> {
		match (self.local_ip, self.server_port) {
			(Some(ip), Some(port)) => Some(UdpEndpoint { ip, port }),
			_ => None,
		}
	}

	fn poll_task_slot(&self) -> Poll<()> {
		if self.task.is_none() {
			Poll::Ready(())
		} else {
			Poll::Pending
		}
	}

	/// Joins an access point. Completes with `false` when the modem
	/// rejected the credentials.
	pub fn poll_join_ap(
		&mut self,
		now: Instant,
		ssid: &[u8],
		password: &[u8],
	) -> Poll<FutureValue<bool>> {
		core::task::ready!(self.poll_task_slot());
		let command = command_bytes(&[b"AT+CWJAP=\"", ssid, b"\",\"", password, b"\"\r\n"]);
		let (task, future) = self.control_task(now, command, WIFI_JOIN_AP_TIMEOUT);
		self.task = Some(task);
		Poll::Ready(future)
	}

	pub fn poll_start_udp_server(&mut self, now: Instant, port: u16) -> Poll<FutureValue<bool>> {
		core::task::ready!(self.poll_task_slot());
		let mut command = command_bytes(&[b"AT+CIPSTART=\"UDP\",\"0.0.0.0\","]);
		push_decimal(&mut command, port as u32);
		let _ = command.extend_from_slice(b",2\r\n");
		// mode 2 re-pins the remote endpoint on every received datagram
		self.server_port = Some(port);
		let (task, future) = self.control_task(now, command, AT_TASK_TIMEOUT);
		self.task = Some(task);
		Poll::Ready(future)
	}

	pub fn poll_close_udp_server(&mut self, now: Instant) -> Poll<FutureValue<bool>> {
		core::task::ready!(self.poll_task_slot());
		self.server_port = None;
		let command = command_bytes(&[b"AT+CIPCLOSE\r\n"]);
		let (task, future) = self.control_task(now, command, AT_TASK_TIMEOUT);
		self.task = Some(task);
		Poll::Ready(future)
	}

	fn control_task(
		&mut self,
		now: Instant,
		command: CommandBytes,
		timeout: Duration,
	) -> (WifiTask, FutureValue<bool>) {
		let (future, promise) = promise_pair();
		let mut task = WifiTask::new(
			now,
			TaskBody::Control {
				exchange: ControlExchange::new(command),
				command_sent: false,
			},
			timeout,
		);
		task.bool_promise = Some(promise);
		(task, future)
	}

	pub fn execute(&mut self, pool: &FrameBufferPool, now: Instant) {
		if let Some(frame) = self.pending_dispatch.take() {
			if let Err(frame) = self.broker.poll_dispatch_received_frame(frame) {
				self.pending_dispatch = Some(frame);
			}
		}

		self.reap_timeouts(now);
		self.drive_task(now);
		self.drive_handler(pool, now);
		self.maybe_start_get_ip(now);
		self.maybe_start_send(now);
		self.drive_task(now);
	}

	fn reap_timeouts(&mut self, now: Instant) {
		if let Some(task) = &self.task {
			if task.deadline.poll(now).is_ready() {
				warn!("wifi: task timed out, resetting slot");
				let was_init = matches!(task.body, TaskBody::Init { .. });
				self.task = None;
				if was_init {
					self.start_init(now);
				}
			}
		}
		if let Some(deadline) = &self.handler.deadline {
			if deadline.poll(now).is_ready() {
				warn!("wifi: stalled unsolicited message, resyncing");
				self.handler.reset();
			}
		}
	}

	fn drive_task(&mut self, now: Instant) {
		let Some(task) = &mut self.task else {
			return;
		};
		let Poll::Ready(outcome) = task.poll(&mut self.stream, &self.read_half) else {
			return;
		};
		let was_init = matches!(task.body, TaskBody::Init { .. });
		let bool_promise = task.bool_promise.take();
		self.task = None;

		match outcome {
			TaskOutcome::Bool(ok) => {
				if was_init {
					if ok {
						info!("wifi: modem initialized");
						self.initialized = true;
					} else {
						warn!("wifi: initialization failed, restarting");
						self.start_init(now);
					}
				}
				if let Some(promise) = bool_promise {
					promise.set(ok);
				}
			}
			TaskOutcome::Ip(ip) => {
				if let Some(octets) = ip {
					debug!(
						"wifi: local address {}.{}.{}.{}",
						octets[0], octets[1], octets[2], octets[3]
					);
					self.local_ip = Some(octets);
				}
			}
		}
	}

	fn drive_handler(&mut self, pool: &FrameBufferPool, now: Instant) {
		loop {
			let discard = self.pending_dispatch.is_some();
			match self
				.handler
				.poll(&mut self.stream, pool, &self.read_half, discard, now)
			{
				Poll::Pending => return,
				Poll::Ready(WifiEvent::GotIp) => {
					debug!("wifi: got ip event");
					self.get_ip_queued = true;
				}
				Poll::Ready(WifiEvent::Disconnect) => {
					info!("wifi: disconnected from access point");
					self.local_ip = None;
				}
				Poll::Ready(WifiEvent::Frame(frame)) => {
					if let Err(frame) = self.broker.poll_dispatch_received_frame(frame) {
						self.pending_dispatch = Some(frame);
					}
				}
			}
		}
	}

	fn maybe_start_get_ip(&mut self, now: Instant) {
		if self.get_ip_queued && self.task.is_none() {
			self.get_ip_queued = false;
			self.task = Some(WifiTask::new(
				now,
				TaskBody::GetIp {
					exchange: ControlExchange::new(command_bytes(&[b"AT+CIPSTA?\r\n"])),
					command_sent: false,
					captured: None,
				},
				AT_TASK_TIMEOUT,
			));
		}
	}

	fn maybe_start_send(&mut self, now: Instant) {
		if !self.initialized || self.task.is_some() {
			return;
		}
		let Poll::Ready(frame) = self
			.broker
			.poll_get_send_requested_frame(AddressType::Udp, None)
		else {
			return;
		};
		let destination = frame
			.remote
			.unicast_address()
			.and_then(UdpEndpoint::try_from_address);
		let Some(destination) = destination else {
			debug!("wifi: dropping frame without UDP destination");
			return;
		};
		self.task = Some(WifiTask::new(
			now,
			TaskBody::Send(SendFrameTask::new(&frame, destination)),
			AT_TASK_TIMEOUT,
		));
	}
}
