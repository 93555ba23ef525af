/// RADIUS client (RFC 2865 Access-Request over UDP)
///
/// ## Wire format
///
/// ```text
/// code(1) identifier(1) length(2) authenticator(16) attributes...
/// ```
///
/// The User-Password attribute is hidden with the shared secret and the
/// request authenticator. Replies are accepted only when the identifier
/// matches and the response authenticator verifies; anything else is
/// silently discarded while the attempt's timeout runs.
use crate::config::{RadiusSettings, Secret};
use crate::error::{BrokerError, Result, UpstreamError};
use crate::strategy::{RadiusClient, RadiusDecision};
use async_trait::async_trait;
use rand::{rngs::OsRng, RngCore};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, warn};

const ACCESS_REQUEST: u8 = 1;
const ACCESS_ACCEPT: u8 = 2;
const ACCESS_REJECT: u8 = 3;
const ACCESS_CHALLENGE: u8 = 11;

const ATTR_USER_NAME: u8 = 1;
const ATTR_USER_PASSWORD: u8 = 2;
const ATTR_FRAMED_IP_ADDRESS: u8 = 8;
const ATTR_FILTER_ID: u8 = 11;
const ATTR_REPLY_MESSAGE: u8 = 18;
const ATTR_CLASS: u8 = 25;
const ATTR_SESSION_TIMEOUT: u8 = 27;
const ATTR_NAS_IDENTIFIER: u8 = 32;

const HEADER_LEN: usize = 20;
const AUTHENTICATOR_LEN: usize = 16;
const MAX_PACKET_LEN: usize = 4096;
const MAX_ATTR_VALUE_LEN: usize = 253;
const MAX_PASSWORD_LEN: usize = 128;

type Authenticator = [u8; AUTHENTICATOR_LEN];
type WireResult<T> = std::result::Result<T, UpstreamError>;

pub struct UdpRadiusClient {
    server: String,
    secret: Secret,
    nas_identifier: String,
    timeout: Duration,
    retries: u32,
    next_id: AtomicU8,
}

impl UdpRadiusClient {
    pub fn new(settings: &RadiusSettings) -> Result<Self> {
        let server = settings
            .server
            .clone()
            .ok_or_else(|| BrokerError::Config("RADIUS server not configured".to_string()))?;
        let secret = settings
            .secret
            .clone()
            .ok_or_else(|| BrokerError::Config("RADIUS secret not configured".to_string()))?;

        Ok(Self {
            server,
            secret,
            nas_identifier: settings.nas_identifier.clone(),
            timeout: Duration::from_millis(settings.timeout_ms),
            retries: settings.retries,
            next_id: AtomicU8::new((OsRng.next_u32() & 0xff) as u8),
        })
    }

    async fn resolve(&self) -> WireResult<SocketAddr> {
        lookup_host(self.server.as_str())
            .await?
            .next()
            .ok_or_else(|| UpstreamError::Transport(format!("cannot resolve {}", self.server)))
    }

    async fn await_reply(
        &self,
        socket: &UdpSocket,
        id: u8,
        authenticator: &Authenticator,
    ) -> WireResult<RadiusDecision> {
        let mut buf = [0u8; MAX_PACKET_LEN];
        loop {
            let len = socket.recv(&mut buf).await?;
            match decode_response(
                &buf[..len],
                id,
                authenticator,
                self.secret.expose().as_bytes(),
            ) {
                Ok(decision) => return Ok(decision),
                Err(e) => debug!(error = %e, "Discarding RADIUS datagram"),
            }
        }
    }
}

impl std::fmt::Debug for UdpRadiusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpRadiusClient")
            .field("server", &self.server)
            .field("nas_identifier", &self.nas_identifier)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .finish()
    }
}

#[async_trait]
impl RadiusClient for UdpRadiusClient {
    async fn access_request(&self, username: &str, password: &str) -> WireResult<RadiusDecision> {
        let server = self.resolve().await?;
        let bind: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(server).await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut authenticator = [0u8; AUTHENTICATOR_LEN];
        OsRng.fill_bytes(&mut authenticator);

        let packet = encode_access_request(
            id,
            &authenticator,
            username,
            password,
            &self.nas_identifier,
            self.secret.expose().as_bytes(),
        )?;

        let attempts = self.retries.saturating_add(1);
        for attempt in 1..=attempts {
            socket.send(&packet).await?;
            match tokio::time::timeout(self.timeout, self.await_reply(&socket, id, &authenticator))
                .await
            {
                Ok(result) => return result,
                Err(_) => warn!(
                    server = %server,
                    attempt,
                    attempts,
                    "RADIUS request timed out"
                ),
            }
        }

        Err(UpstreamError::Timeout(attempts))
    }
}

fn push_attribute(out: &mut Vec<u8>, kind: u8, value: &[u8]) -> WireResult<()> {
    if value.is_empty() || value.len() > MAX_ATTR_VALUE_LEN {
        return Err(UpstreamError::Protocol(format!(
            "attribute {} has invalid length {}",
            kind,
            value.len()
        )));
    }
    out.push(kind);
    out.push((value.len() + 2) as u8);
    out.extend_from_slice(value);
    Ok(())
}

/// RFC 2865 section 5.2 password hiding
fn hide_password(
    password: &[u8],
    secret: &[u8],
    authenticator: &Authenticator,
) -> WireResult<Vec<u8>> {
    if password.len() > MAX_PASSWORD_LEN {
        return Err(UpstreamError::Protocol("password too long".to_string()));
    }

    let padded_len = password.len().div_ceil(AUTHENTICATOR_LEN).max(1) * AUTHENTICATOR_LEN;
    let mut padded = password.to_vec();
    padded.resize(padded_len, 0);

    let mut hidden = Vec::with_capacity(padded_len);
    let mut previous: Authenticator = *authenticator;
    for chunk in padded.chunks(AUTHENTICATOR_LEN) {
        let mut ctx = md5::Context::new();
        ctx.consume(secret);
        ctx.consume(previous);
        let digest = ctx.compute();

        for (i, byte) in chunk.iter().enumerate() {
            previous[i] = byte ^ digest.0[i];
        }
        hidden.extend_from_slice(&previous);
    }
    Ok(hidden)
}

fn encode_access_request(
    id: u8,
    authenticator: &Authenticator,
    username: &str,
    password: &str,
    nas_identifier: &str,
    secret: &[u8],
) -> WireResult<Vec<u8>> {
    let mut packet = vec![ACCESS_REQUEST, id, 0, 0];
    packet.extend_from_slice(authenticator);

    push_attribute(&mut packet, ATTR_USER_NAME, username.as_bytes())?;
    push_attribute(
        &mut packet,
        ATTR_USER_PASSWORD,
        &hide_password(password.as_bytes(), secret, authenticator)?,
    )?;
    push_attribute(&mut packet, ATTR_NAS_IDENTIFIER, nas_identifier.as_bytes())?;

    let len = u16::try_from(packet.len())
        .map_err(|_| UpstreamError::Protocol("request too large".to_string()))?;
    packet[2..4].copy_from_slice(&len.to_be_bytes());
    Ok(packet)
}

/// MD5(code | id | length | request authenticator | attributes | secret)
fn response_authenticator(
    packet: &[u8],
    request_authenticator: &Authenticator,
    secret: &[u8],
) -> Authenticator {
    let mut ctx = md5::Context::new();
    ctx.consume(&packet[..4]);
    ctx.consume(request_authenticator);
    ctx.consume(&packet[HEADER_LEN..]);
    ctx.consume(secret);
    ctx.compute().0
}

fn decode_response(
    datagram: &[u8],
    id: u8,
    request_authenticator: &Authenticator,
    secret: &[u8],
) -> WireResult<RadiusDecision> {
    if datagram.len() < HEADER_LEN {
        return Err(UpstreamError::Protocol("short packet".to_string()));
    }

    let declared = u16::from_be_bytes([datagram[2], datagram[3]]) as usize;
    if declared < HEADER_LEN || declared > datagram.len() {
        return Err(UpstreamError::Protocol(format!(
            "bad length field {}",
            declared
        )));
    }
    let packet = &datagram[..declared];

    if packet[1] != id {
        return Err(UpstreamError::Protocol(format!(
            "identifier {} does not match request {}",
            packet[1], id
        )));
    }

    let expected = response_authenticator(packet, request_authenticator, secret);
    if packet[4..HEADER_LEN] != expected {
        return Err(UpstreamError::Protocol(
            "response authenticator mismatch".to_string(),
        ));
    }

    match packet[0] {
        ACCESS_ACCEPT => Ok(RadiusDecision::Accept(parse_attributes(
            &packet[HEADER_LEN..],
        )?)),
        ACCESS_REJECT | ACCESS_CHALLENGE => Ok(RadiusDecision::Reject),
        other => Err(UpstreamError::Protocol(format!(
            "unexpected reply code {}",
            other
        ))),
    }
}

fn parse_attributes(mut raw: &[u8]) -> WireResult<BTreeMap<String, String>> {
    let mut attributes: BTreeMap<String, String> = BTreeMap::new();

    while !raw.is_empty() {
        if raw.len() < 2 {
            return Err(UpstreamError::Protocol("truncated attribute".to_string()));
        }
        let (kind, len) = (raw[0], raw[1] as usize);
        if len < 2 || len > raw.len() {
            return Err(UpstreamError::Protocol(format!(
                "attribute {} has bad length {}",
                kind, len
            )));
        }
        let value = &raw[2..len];
        raw = &raw[len..];

        let (name, rendered) = render_attribute(kind, value);
        attributes
            .entry(name)
            .and_modify(|existing| {
                existing.push('\n');
                existing.push_str(&rendered);
            })
            .or_insert(rendered);
    }

    Ok(attributes)
}

fn render_attribute(kind: u8, value: &[u8]) -> (String, String) {
    let text = || String::from_utf8_lossy(value).into_owned();
    match kind {
        ATTR_USER_NAME => ("User-Name".to_string(), text()),
        ATTR_FILTER_ID => ("Filter-Id".to_string(), text()),
        ATTR_REPLY_MESSAGE => ("Reply-Message".to_string(), text()),
        ATTR_CLASS => ("Class".to_string(), hex(value)),
        ATTR_FRAMED_IP_ADDRESS if value.len() == 4 => (
            "Framed-IP-Address".to_string(),
            Ipv4Addr::new(value[0], value[1], value[2], value[3]).to_string(),
        ),
        ATTR_SESSION_TIMEOUT if value.len() == 4 => (
            "Session-Timeout".to_string(),
            u32::from_be_bytes([value[0], value[1], value[2], value[3]]).to_string(),
        ),
        other => (format!("Attr-{}", other), hex(value)),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"testing123";

    fn reveal_password(hidden: &[u8], secret: &[u8], authenticator: &Authenticator) -> Vec<u8> {
        let mut plain = Vec::new();
        let mut previous: Vec<u8> = authenticator.to_vec();
        for chunk in hidden.chunks(AUTHENTICATOR_LEN) {
            let mut ctx = md5::Context::new();
            ctx.consume(secret);
            ctx.consume(&previous);
            let digest = ctx.compute();
            plain.extend(chunk.iter().zip(digest.0.iter()).map(|(c, d)| c ^ d));
            previous = chunk.to_vec();
        }
        while plain.last() == Some(&0) {
            plain.pop();
        }
        plain
    }

    fn find_attribute(packet: &[u8], kind: u8) -> Option<Vec<u8>> {
        let mut raw = &packet[HEADER_LEN..];
        while raw.len() >= 2 {
            let len = raw[1] as usize;
            if raw[0] == kind {
                return Some(raw[2..len].to_vec());
            }
            raw = &raw[len..];
        }
        None
    }

    fn build_reply(code: u8, id: u8, request_auth: &Authenticator, attrs: &[u8]) -> Vec<u8> {
        let mut packet = vec![code, id, 0, 0];
        packet.extend_from_slice(&[0u8; AUTHENTICATOR_LEN]);
        packet.extend_from_slice(attrs);
        let len = packet.len() as u16;
        packet[2..4].copy_from_slice(&len.to_be_bytes());
        let auth = response_authenticator(&packet, request_auth, SECRET);
        packet[4..HEADER_LEN].copy_from_slice(&auth);
        packet
    }

    fn settings(server: SocketAddr, timeout_ms: u64, retries: u32) -> RadiusSettings {
        RadiusSettings {
            server: Some(server.to_string()),
            secret: Some(Secret::new("testing123")),
            realm: None,
            timeout_ms,
            retries,
            nas_identifier: "auth-broker".to_string(),
        }
    }

    #[test]
    fn test_password_hiding_pads_and_reverses() {
        let authenticator = [7u8; AUTHENTICATOR_LEN];

        let short = hide_password(b"s3cret", SECRET, &authenticator).unwrap();
        assert_eq!(short.len(), 16);
        assert_eq!(reveal_password(&short, SECRET, &authenticator), b"s3cret");

        let long = "x".repeat(40);
        let hidden = hide_password(long.as_bytes(), SECRET, &authenticator).unwrap();
        assert_eq!(hidden.len(), 48);
        assert_eq!(reveal_password(&hidden, SECRET, &authenticator), long.as_bytes());

        assert!(hide_password(&[b'x'; 129], SECRET, &authenticator).is_err());
    }

    #[test]
    fn test_access_request_layout() {
        let authenticator = [1u8; AUTHENTICATOR_LEN];
        let packet =
            encode_access_request(42, &authenticator, "alice@upc.edu", "s3cret", "nas", SECRET)
                .unwrap();

        assert_eq!(packet[0], ACCESS_REQUEST);
        assert_eq!(packet[1], 42);
        assert_eq!(u16::from_be_bytes([packet[2], packet[3]]) as usize, packet.len());
        assert_eq!(&packet[4..HEADER_LEN], &authenticator);
        assert_eq!(
            find_attribute(&packet, ATTR_USER_NAME).unwrap(),
            b"alice@upc.edu"
        );
        assert_eq!(find_attribute(&packet, ATTR_NAS_IDENTIFIER).unwrap(), b"nas");

        let hidden = find_attribute(&packet, ATTR_USER_PASSWORD).unwrap();
        assert_ne!(hidden.as_slice(), b"s3cret");
        assert_eq!(reveal_password(&hidden, SECRET, &authenticator), b"s3cret");
    }

    #[test]
    fn test_decode_accept_with_attributes() {
        let request_auth = [3u8; AUTHENTICATOR_LEN];
        let mut attrs = vec![ATTR_REPLY_MESSAGE, 9];
        attrs.extend_from_slice(b"welcome");
        attrs.extend_from_slice(&[ATTR_SESSION_TIMEOUT, 6, 0, 0, 0x0e, 0x10]);
        attrs.extend_from_slice(&[ATTR_FRAMED_IP_ADDRESS, 6, 10, 0, 2, 8]);

        let reply = build_reply(ACCESS_ACCEPT, 5, &request_auth, &attrs);
        match decode_response(&reply, 5, &request_auth, SECRET).unwrap() {
            RadiusDecision::Accept(attributes) => {
                assert_eq!(attributes["Reply-Message"], "welcome");
                assert_eq!(attributes["Session-Timeout"], "3600");
                assert_eq!(attributes["Framed-IP-Address"], "10.0.2.8");
            }
            RadiusDecision::Reject => panic!("expected accept"),
        }
    }

    #[test]
    fn test_reject_and_challenge() {
        let request_auth = [3u8; AUTHENTICATOR_LEN];
        for code in [ACCESS_REJECT, ACCESS_CHALLENGE] {
            let reply = build_reply(code, 9, &request_auth, &[]);
            assert_eq!(
                decode_response(&reply, 9, &request_auth, SECRET).unwrap(),
                RadiusDecision::Reject
            );
        }
    }

    #[test]
    fn test_forged_or_mismatched_replies_are_rejected() {
        let request_auth = [3u8; AUTHENTICATOR_LEN];
        let reply = build_reply(ACCESS_ACCEPT, 5, &request_auth, &[]);

        // Wrong identifier
        assert!(decode_response(&reply, 6, &request_auth, SECRET).is_err());
        // Wrong secret
        assert!(decode_response(&reply, 5, &request_auth, b"other").is_err());
        // Tampered code
        let mut forged = reply.clone();
        forged[0] = ACCESS_REJECT;
        assert!(decode_response(&forged, 5, &request_auth, SECRET).is_err());
        // Truncated
        assert!(decode_response(&reply[..10], 5, &request_auth, SECRET).is_err());
    }

    #[tokio::test]
    async fn test_round_trip_against_loopback_server() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; MAX_PACKET_LEN];
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            let request = &buf[..len];

            let mut request_auth = [0u8; AUTHENTICATOR_LEN];
            request_auth.copy_from_slice(&request[4..HEADER_LEN]);
            let user = find_attribute(request, ATTR_USER_NAME).unwrap();
            let hidden = find_attribute(request, ATTR_USER_PASSWORD).unwrap();
            let password = reveal_password(&hidden, SECRET, &request_auth);

            let code = if user == b"alice@upc.edu" && password == b"s3cret" {
                ACCESS_ACCEPT
            } else {
                ACCESS_REJECT
            };
            let mut attrs = vec![ATTR_REPLY_MESSAGE, 4];
            attrs.extend_from_slice(b"hi");
            let reply = build_reply(code, request[1], &request_auth, &attrs);
            server.send_to(&reply, peer).await.unwrap();
        });

        let client = UdpRadiusClient::new(&settings(addr, 2000, 0)).unwrap();
        let decision = client
            .access_request("alice@upc.edu", "s3cret")
            .await
            .unwrap();
        responder.await.unwrap();

        match decision {
            RadiusDecision::Accept(attributes) => assert_eq!(attributes["Reply-Message"], "hi"),
            RadiusDecision::Reject => panic!("expected accept"),
        }
    }

    #[tokio::test]
    async fn test_silent_server_times_out_after_retries() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let client = UdpRadiusClient::new(&settings(addr, 50, 1)).unwrap();
        let result = client.access_request("alice", "s3cret").await;
        assert!(matches!(result, Err(UpstreamError::Timeout(2))));
        drop(server);
    }

    #[test]
    fn test_requires_server_and_secret() {
        let mut incomplete = settings("127.0.0.1:1812".parse().unwrap(), 100, 0);
        incomplete.secret = None;
        assert!(matches!(
            UdpRadiusClient::new(&incomplete),
            Err(BrokerError::Config(_))
        ));
    }
}
