//! Ping strategies: native ICMP (high-precision) and the system `ping` command.
//!
//! Native probes use blocking sockets in spawn_blocking for sub-millisecond
//! timing precision.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::{resolve_address, AddressFamily, ProbeError, ProbeStrategy, Reply};

static ICMP_CAPABILITY: OnceLock<bool> = OnceLock::new();

/// Ping sequence counter for unique identification
static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Generate a unique identifier for each ping request.
/// This ensures concurrent pings can be distinguished even to the same destination.
fn generate_ping_id() -> (u16, u16) {
    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

/// Whether this process can open ICMP sockets. Detected once.
pub fn icmp_available() -> bool {
    *ICMP_CAPABILITY.get_or_init(|| {
        // Try RAW socket first (requires CAP_NET_RAW or root)
        if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
            tracing::info!("Ping probe: using native ICMP (RAW socket, privileged)");
            return true;
        }

        // Try DGRAM (unprivileged on Linux with ping_group_range set, or macOS)
        if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
            tracing::info!("Ping probe: using native ICMP (DGRAM socket, unprivileged)");
            return true;
        }

        tracing::info!("Ping probe: native ICMP unavailable, using command fallback");
        false
    })
}

/// Native ICMP echo over a socket of the given family.
#[derive(Debug, Clone)]
pub struct IcmpProbe {
    family: AddressFamily,
}

impl IcmpProbe {
    pub fn new(family: AddressFamily) -> Self {
        Self { family }
    }
}

#[async_trait]
impl ProbeStrategy for IcmpProbe {
    fn name(&self) -> String {
        match self.family {
            AddressFamily::Any => "icmp".to_string(),
            family => format!("icmp/{}", family),
        }
    }

    async fn attempt(&self, target: &str, timeout: Duration) -> Result<Reply, ProbeError> {
        // Resolve address before spawn_blocking (DNS is async)
        let ip = resolve_address(target, self.family).await?;

        let latency = tokio::task::spawn_blocking(move || run_blocking_ping(ip, timeout))
            .await
            .map_err(|e| ProbeError::Network(format!("spawn_blocking failed: {}", e)))??;

        let ms = latency.as_secs_f64() * 1000.0;
        Ok(Reply {
            latency_ms: Some(ms),
            output: format!("reply from {}: time={:.3} ms", ip, ms),
        })
    }
}

/// Run blocking ICMP echo with precise timing.
/// This runs in a dedicated thread via spawn_blocking.
fn run_blocking_ping(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    let (domain, protocol) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };

    // Try RAW first (privileged), then DGRAM (unprivileged)
    let (socket, raw) = match Socket::new(domain, Type::RAW, Some(protocol)) {
        Ok(s) => (s, true),
        Err(_) => (
            Socket::new(domain, Type::DGRAM, Some(protocol))
                .map_err(|e| ProbeError::Network(format!("Failed to create ICMP socket: {}", e)))?,
            false,
        ),
    };

    socket
        .set_write_timeout(Some(timeout))
        .map_err(|e| ProbeError::Network(format!("Failed to set timeout: {}", e)))?;

    let dest = SocketAddr::new(ip, 0);
    socket
        .connect(&dest.into())
        .map_err(|e| ProbeError::Network(format!("Failed to connect: {}", e)))?;

    let (identifier, sequence) = generate_ping_id();
    let packet = match ip {
        IpAddr::V4(_) => build_icmp_echo_request(identifier, sequence),
        IpAddr::V6(_) => build_icmpv6_echo_request(identifier, sequence),
    };

    // Start timing just before send
    let start = Instant::now();

    socket.send(&packet).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ProbeError::Network(format!("Permission denied: {}", e))
        } else {
            ProbeError::Network(format!("Failed to send: {}", e))
        }
    })?;

    // Receive replies until we get OUR reply or run out of time
    loop {
        let remaining = timeout
            .checked_sub(start.elapsed())
            .filter(|d| !d.is_zero())
            .ok_or(ProbeError::Timeout(timeout))?;
        socket
            .set_read_timeout(Some(remaining))
            .map_err(|e| ProbeError::Network(format!("Failed to set timeout: {}", e)))?;

        let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
        let len = socket.recv(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut {
                ProbeError::Timeout(timeout)
            } else {
                ProbeError::Network(format!("Failed to receive: {}", e))
            }
        })?;
        // SAFETY: recv initialized `len` bytes
        let buf: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        // Stop timing immediately after receive
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ProbeError::Timeout(timeout));
        }

        // Unprivileged sockets on Linux rewrite the identifier to the local
        // port and only deliver replies for this socket
        if is_echo_reply(buf, ip.is_ipv4(), raw.then_some(identifier), sequence) {
            return Ok(elapsed);
        }
    }
}

/// Check whether a received datagram is the echo reply we are waiting for.
///
/// RAW IPv4 sockets deliver the IP header in front of the ICMP message;
/// ICMPv6 and DGRAM sockets deliver the ICMP message alone.
fn is_echo_reply(buf: &[u8], ipv4: bool, identifier: Option<u16>, sequence: u16) -> bool {
    let offset = if ipv4 && !buf.is_empty() && buf[0] >> 4 == 4 {
        usize::from(buf[0] & 0x0f) * 4
    } else {
        0
    };
    if buf.len() < offset + 8 {
        return false;
    }

    let icmp = &buf[offset..];
    let echo_reply = if ipv4 { 0 } else { 129 };
    let reply_id = u16::from_be_bytes([icmp[4], icmp[5]]);
    let reply_seq = u16::from_be_bytes([icmp[6], icmp[7]]);

    icmp[0] == echo_reply && reply_seq == sequence && identifier.map_or(true, |id| id == reply_id)
}

/// Build an ICMP Echo Request packet (type 8, code 0).
fn build_icmp_echo_request(identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = echo_request(8, identifier, sequence);
    let checksum = icmp_checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    packet
}

/// Build an ICMPv6 Echo Request packet (type 128, code 0).
///
/// The checksum is left at zero: the kernel computes it for ICMPv6.
fn build_icmpv6_echo_request(identifier: u16, sequence: u16) -> Vec<u8> {
    echo_request(128, identifier, sequence)
}

fn echo_request(kind: u8, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64]; // 8 byte header + 56 byte payload

    packet[0] = kind;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
    packet[8..16].copy_from_slice(&timestamp.to_be_bytes());

    packet
}

/// Compute ICMP checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]) as u32,
            [hi] => (*hi as u32) << 8,
            _ => 0,
        })
        .sum();

    // Fold 32-bit sum to 16 bits
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// The system `ping` utility, one echo request per attempt.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    family: AddressFamily,
}

impl CommandProbe {
    pub fn new(family: AddressFamily) -> Self {
        Self { family }
    }

    fn args(&self, target: &str, timeout: Duration) -> Vec<String> {
        let mut args = Vec::new();
        match self.family {
            AddressFamily::Any => {}
            AddressFamily::V4 => args.push("-4".to_string()),
            AddressFamily::V6 => args.push("-6".to_string()),
        }

        if cfg!(windows) {
            let ms = timeout.as_millis().max(1);
            args.extend(["-n".to_string(), "1".to_string(), "-w".to_string(), ms.to_string()]);
        } else if cfg!(target_os = "macos") {
            let ms = timeout.as_millis().max(1);
            args.extend(["-n", "-c", "1", "-W"].map(String::from));
            args.push(ms.to_string());
        } else {
            let secs = timeout.as_secs().max(1);
            args.extend(["-n", "-c", "1", "-W"].map(String::from));
            args.push(secs.to_string());
        }

        args.push(target.to_string());
        args
    }
}

#[async_trait]
impl ProbeStrategy for CommandProbe {
    fn name(&self) -> String {
        match self.family {
            AddressFamily::Any => "ping".to_string(),
            AddressFamily::V4 => "ping -4".to_string(),
            AddressFamily::V6 => "ping -6".to_string(),
        }
    }

    async fn attempt(&self, target: &str, timeout: Duration) -> Result<Reply, ProbeError> {
        let mut cmd = Command::new("ping");
        cmd.args(self.args(target, timeout))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        {
            // CREATE_NO_WINDOW: no console flash per probe
            cmd.creation_flags(0x0800_0000);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = if stderr.trim().is_empty() {
            stdout.into_owned()
        } else {
            format!("{}\n{}", stdout, stderr)
        };

        if !output.status.success() {
            return Err(ProbeError::Command(combined));
        }

        Ok(Reply {
            latency_ms: parse_ping_output(&combined),
            output: combined,
        })
    }
}

/// Parse `ping` output for a latency in milliseconds.
pub fn parse_ping_output(output: &str) -> Option<f64> {
    // Per-packet response: "time=12.3 ms", "time<1ms" (Windows), "time=12.3ms"
    static PER_PACKET: OnceLock<Regex> = OnceLock::new();
    let per_packet =
        PER_PACKET.get_or_init(|| Regex::new(r"(?i)time[=<]\s*(?P<val>[0-9]+\.?[0-9]*)\s*ms").unwrap());

    if let Some(ms) = per_packet
        .captures(output)
        .and_then(|caps| caps.name("val"))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    {
        return Some(ms);
    }

    // Summary line "round-trip min/avg/max/stddev = X/X/X/X ms" (macOS)
    // or "rtt min/avg/max/mdev = X/X/X/X ms" (Linux): use the average
    static SUMMARY: OnceLock<Regex> = OnceLock::new();
    let summary = SUMMARY.get_or_init(|| {
        Regex::new(r"(?:round-trip|rtt)\s+min/avg/max/(?:stddev|mdev)\s*=\s*([0-9.]+)/([0-9.]+)/([0-9.]+)")
            .unwrap()
    });

    if let Some(ms) = summary
        .captures(output)
        .and_then(|caps| caps.get(2))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    {
        return Some(ms);
    }

    // Loose fallback: "Average = 12ms"
    static LOOSE: OnceLock<Regex> = OnceLock::new();
    let loose = LOOSE.get_or_init(|| Regex::new(r"(?i)=\s*([0-9]+\.?[0-9]*)ms").unwrap());

    loose
        .captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}
