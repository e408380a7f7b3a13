//! The weighted resolver pool.

use super::answers::{answers_by_type, extract_answers, ExtractedAnswer};
use crate::runtime::RateLimiter;
use dashmap::DashMap;
use hickory_proto::error::ProtoError;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RecordType};
use rand::seq::SliceRandom;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::debug;

/// Per-query network timeout.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Attempts before a query is abandoned as "no answer".
pub const QUERY_ATTEMPTS: usize = 50;

/// Resolver used for wildcard probes, kept out of the weighted pool.
pub const DETECTION_RESOLVER: (&str, u32) = ("8.8.8.8", 50);

/// Trusted public resolvers with their QPS weights.
const BASELINE_RESOLVERS: &[(&str, u32)] = &[
    ("8.8.8.8", 20),         // Google Primary
    ("8.8.4.4", 20),         // Google Secondary
    ("95.85.95.85", 10),     // Gcore DNS Primary
    ("2.56.220.2", 10),      // Gcore DNS Secondary
    ("76.76.2.0", 10),       // ControlD Primary
    ("76.76.10.0", 10),      // ControlD Secondary
    ("9.9.9.9", 10),         // Quad9 Primary
    ("149.112.112.112", 10), // Quad9 Secondary
    ("208.67.222.222", 10),  // Cisco OpenDNS Home Primary
    ("208.67.220.220", 10),  // Cisco OpenDNS Home Secondary
    ("1.1.1.1", 15),         // Cloudflare Primary
    ("1.0.0.1", 15),         // Cloudflare Secondary
    ("185.228.168.9", 5),    // CleanBrowsing Primary
    ("185.228.169.9", 5),    // CleanBrowsing Secondary
    ("76.76.19.19", 5),      // Alternate DNS Primary
    ("76.223.122.150", 5),   // Alternate DNS Secondary
    ("94.140.14.14", 5),     // AdGuard DNS Primary
    ("94.140.15.15", 5),     // AdGuard DNS Secondary
    ("176.103.130.130", 5),  // AdGuard
    ("176.103.130.131", 5),  // AdGuard
    ("8.26.56.26", 5),       // Comodo Secure DNS Primary
    ("8.20.247.20", 5),      // Comodo Secure DNS Secondary
    ("205.171.3.65", 5),     // CenturyLink Level3 Primary
    ("205.171.2.65", 5),     // CenturyLink Level3 Secondary
    ("64.6.64.6", 5),        // Verisign DNS Primary
    ("64.6.65.6", 5),        // Verisign DNS Secondary
    ("209.244.0.3", 5),      // CenturyLink Level3
    ("209.244.0.4", 5),      // CenturyLink Level3
    ("149.112.121.10", 5),   // CIRA Canadian Shield Primary
    ("149.112.122.10", 5),   // CIRA Canadian Shield Secondary
    ("138.197.140.189", 5),  // OpenNIC Primary
    ("162.243.19.47", 5),    // OpenNIC Secondary
    ("216.87.84.211", 5),    // OpenNIC
    ("23.90.4.6", 5),        // OpenNIC
    ("216.146.35.35", 5),    // Oracle Dyn Primary
    ("216.146.36.36", 5),    // Oracle Dyn Secondary
    ("91.239.100.100", 5),   // UncensoredDNS Primary
    ("89.233.43.71", 5),     // UncensoredDNS Secondary
    ("77.88.8.8", 5),        // Yandex.DNS Primary
    ("77.88.8.1", 5),        // Yandex.DNS Secondary
    ("74.82.42.42", 5),      // Hurricane Electric Primary
    ("94.130.180.225", 5),   // DNS for Family Primary
    ("78.47.64.161", 5),     // DNS for Family Secondary
    ("80.80.80.80", 5),      // Freenom World Primary
    ("80.80.81.81", 5),      // Freenom World Secondary
    ("84.200.69.80", 5),     // DNS.WATCH Primary
    ("84.200.70.40", 5),     // DNS.WATCH Secondary
    ("156.154.70.5", 5),     // Neustar Primary
    ("156.157.71.5", 5),     // Neustar Secondary
    ("81.218.119.11", 5),    // GreenTeamDNS Primary
    ("209.88.198.133", 5),   // GreenTeamDNS Secondary
    ("37.235.1.177", 5),     // FreeDNS
    ("38.132.106.139", 5),   // CyberGhost
];

/// Errors surfaced by the resolver pool.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// Authoritative NXDOMAIN.
    #[error("name does not exist")]
    NameDoesNotExist,

    /// NOERROR with an empty answer section.
    #[error("no record of this type")]
    NoRecords,

    /// The queried name could not be encoded.
    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("dns protocol error: {0}")]
    Proto(#[from] ProtoError),

    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("query timed out")]
    Timeout,

    /// The response id did not match the query; discarded.
    #[error("response id mismatch")]
    IdMismatch,
}

pub(super) struct WeightedResolver {
    pub(super) address: SocketAddr,
    pub(super) limiter: RateLimiter,
}

impl WeightedResolver {
    fn new(address: &str, qps: u32) -> Self {
        let ip: IpAddr = address.parse().expect("baseline resolver address");
        Self {
            address: SocketAddr::new(ip, 53),
            limiter: RateLimiter::new(qps as f64),
        }
    }
}

/// Weighted-QPS pool of public DNS resolvers with wildcard detection.
pub struct ResolverPool {
    resolvers: Vec<Arc<WeightedResolver>>,
    cursor: AtomicUsize,
    pub(super) detector: Arc<WeightedResolver>,
    pub(super) wildcards: DashMap<String, bool>,
    timeout: Duration,
}

impl ResolverPool {
    /// Seeds the pool with the baseline resolver list, shuffled to spread
    /// load across processes.
    pub fn new() -> Self {
        let mut baseline = BASELINE_RESOLVERS.to_vec();
        baseline.shuffle(&mut rand::thread_rng());

        let resolvers = baseline
            .into_iter()
            .map(|(address, qps)| Arc::new(WeightedResolver::new(address, qps)))
            .collect();

        let (det_addr, det_qps) = DETECTION_RESOLVER;
        Self {
            resolvers,
            cursor: AtomicUsize::new(0),
            detector: Arc::new(WeightedResolver::new(det_addr, det_qps)),
            wildcards: DashMap::new(),
            timeout: QUERY_TIMEOUT,
        }
    }

    /// Number of resolvers in the weighted pool.
    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Resolves `name` for `qtype`, filtering wildcard zones.
    ///
    /// PTR queries accept an IP address and build the reverse name. Up to
    /// [`QUERY_ATTEMPTS`] tries; NXDOMAIN and NOERROR-empty short-circuit
    /// as errors, network failures silently skip the attempt, and an
    /// exhausted budget or a wildcard-positive response yields an empty
    /// answer set.
    pub async fn perform_query(
        &self,
        name: &str,
        qtype: RecordType,
    ) -> Result<Vec<ExtractedAnswer>, ResolverError> {
        let msg = if qtype == RecordType::PTR {
            reverse_msg(name)?
        } else {
            query_msg(name, qtype)?
        };

        let Some(resp) = self.dns_query(&msg, QUERY_ATTEMPTS).await? else {
            return Ok(Vec::new());
        };
        if self.wildcard_detected(&resp).await {
            debug!(name, "Answer discarded as wildcard");
            return Ok(Vec::new());
        }
        Ok(answers_by_type(extract_answers(&resp), qtype))
    }

    /// Runs the attempt loop against the weighted pool.
    async fn dns_query(
        &self,
        msg: &Message,
        attempts: usize,
    ) -> Result<Option<Message>, ResolverError> {
        for _ in 0..attempts {
            let resp = match self.query_blocking(msg).await {
                Ok(resp) => resp,
                Err(err) => {
                    debug!(error = %err, "Query attempt skipped");
                    continue;
                }
            };
            match resp.response_code() {
                ResponseCode::NXDomain => return Err(ResolverError::NameDoesNotExist),
                ResponseCode::NoError => {
                    if resp.answers().is_empty() {
                        return Err(ResolverError::NoRecords);
                    }
                    return Ok(Some(resp));
                }
                _ => continue,
            }
        }
        Ok(None)
    }

    /// Sends one query to the next resolver in the rotation, waiting for
    /// its rate-limit token, and blocks the calling task for the response.
    pub async fn query_blocking(&self, msg: &Message) -> Result<Message, ResolverError> {
        let resolver = self.next_resolver();
        resolver.limiter.acquire().await;
        self.exchange(&resolver, msg).await
    }

    /// Picks the next resolver with a token ready, falling back to the
    /// rotation head when every bucket is empty.
    ///
    /// Selection only peeks at the buckets; the caller's `acquire` is the
    /// single charge per query.
    fn next_resolver(&self) -> Arc<WeightedResolver> {
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        for offset in 0..self.resolvers.len() {
            let candidate = &self.resolvers[(start + offset) % self.resolvers.len()];
            if candidate.limiter.is_ready() {
                return Arc::clone(candidate);
            }
        }
        Arc::clone(&self.resolvers[start % self.resolvers.len()])
    }

    /// One UDP round-trip with the pool's per-query timeout.
    pub(super) async fn exchange(
        &self,
        resolver: &WeightedResolver,
        msg: &Message,
    ) -> Result<Message, ResolverError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.send_to(&msg.to_vec()?, resolver.address).await?;

        let mut buf = [0u8; 4096];
        let (len, _) = tokio::time::timeout(self.timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| ResolverError::Timeout)??;

        let resp = Message::from_vec(&buf[..len])?;
        if resp.id() != msg.id() {
            return Err(ResolverError::IdMismatch);
        }
        Ok(resp)
    }
}

impl Default for ResolverPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a recursive query message for `name`.
pub(super) fn query_msg(name: &str, qtype: RecordType) -> Result<Message, ResolverError> {
    let name = Name::from_str(&name.trim().trim_end_matches('.').to_lowercase())
        .map_err(|_| ResolverError::InvalidName(name.to_string()))?;

    let mut msg = Message::new();
    msg.set_id(rand::random::<u16>())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(name, qtype));
    Ok(msg)
}

/// Builds a PTR query for the reverse name of `address`.
fn reverse_msg(address: &str) -> Result<Message, ResolverError> {
    let ip: IpAddr = address
        .trim()
        .parse()
        .map_err(|_| ResolverError::InvalidName(address.to_string()))?;
    query_msg(&reverse_name(ip), RecordType::PTR)
}

/// The `in-addr.arpa` / `ip6.arpa` name for an address.
fn reverse_name(address: IpAddr) -> String {
    match address {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{d}.{c}.{b}.{a}.in-addr.arpa")
        }
        IpAddr::V6(v6) => {
            let mut nibbles = Vec::with_capacity(32);
            for byte in v6.octets().iter().rev() {
                nibbles.push(format!("{:x}", byte & 0x0f));
                nibbles.push(format!("{:x}", byte >> 4));
            }
            format!("{}.ip6.arpa", nibbles.join("."))
        }
    }
}
