//! Compile-time tunables. The port set and every capacity below are fixed at
//! startup; there is no runtime reconfiguration.

use core::time::Duration;

/// Maximum frame payload carried by any medium, in bytes. One protocol byte
/// travels in front of the payload on every wire.
pub const MTU: usize = 254;

/// Serialized length of a protocol number.
pub const PROTOCOL_SIZE: usize = 1;

/// Media ports a single node can register.
pub const MAX_MEDIA_PER_NODE: usize = 4;

/// Capacity of the broker's received-frame and send-requested-frame queues.
pub const LINK_FRAME_QUEUE_CAPACITY: usize = 2;

/// Interval of the broker sweep; an untouched queue entry survives at most
/// two of these.
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Frame buffers the pool hands out before reporting exhaustion.
pub const SHORT_FRAME_BUFFER_COUNT: usize = 8;
pub const MAX_LENGTH_FRAME_BUFFER_COUNT: usize = 4;

/// Payload length up to which a request is served from the short class.
pub const SHORT_FRAME_BUFFER_LENGTH: usize = 64;

/// The UHF modem ignores commands for 100 ms after power-up; 50 ms slack.
pub const DETECTOR_POWER_UP_LOCKOUT: Duration = Duration::from_millis(150);

/// How long the detector waits for a probe response before deciding Serial.
pub const DETECTOR_RESPONSE_WINDOW: Duration = Duration::from_millis(100);

/// Default timeout for an AT-modem task; the slot is reset when it fires.
pub const AT_TASK_TIMEOUT: Duration = Duration::from_secs(3);

/// Joining an access point can take far longer than a plain AT exchange.
pub const WIFI_JOIN_AP_TIMEOUT: Duration = Duration::from_secs(20);

/// Post-acknowledgement settle window of the UHF modem's information report.
pub const UHF_INFORMATION_RESPONSE_WINDOW: Duration = Duration::from_millis(20);

/// Carrier-sense backoff window when the UHF medium is busy.
pub const UHF_CS_BACKOFF_MIN: Duration = Duration::from_millis(50);
pub const UHF_CS_BACKOFF_MAX: Duration = Duration::from_millis(150);

/// UDP port the Ethernet listener binds.
pub const ETHERNET_UDP_PORT: u16 = 8888;

/// Debounce interval of the Ethernet link-state check.
pub const ETHERNET_LINK_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Bytes moved per tick between the Ethernet socket and a frame buffer.
pub const ETHERNET_CHUNK_SIZE: usize = 64;

/// Depth of the routing duplicate-suppression ring.
pub const FRAME_ID_CACHE_SIZE: usize = 16;

/// Received routing frames waiting out their repeat delay.
pub const ROUTING_DELAY_POOL_CAPACITY: usize = 8;
