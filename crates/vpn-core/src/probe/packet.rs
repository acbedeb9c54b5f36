//! Synthetic probe packets
//!
//! None of these start a real handshake. They only have to look enough
//! like the first packet of each protocol that a real listener answers.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha512;
use std::time::{SystemTime, UNIX_EPOCH};
use x25519_dalek::{PublicKey, StaticSecret};

/// IKEv2 probe length
pub const IKE_PROBE_LEN: usize = 28;

/// OpenVPN probe length (UDP, no length prefix)
pub const OPENVPN_PROBE_LEN: usize = 86;

/// WireGuard handshake initiation length
pub const WIREGUARD_PROBE_LEN: usize = 148;

/// Next payload, version, exchange type, flags
const IKE_HEADER_FLAGS: [u8; 4] = [0x21, 0x20, 0x22, 0x08];

/// P_CONTROL_HARD_RESET_CLIENT_V2 (opcode 7) with key id 0
const OPENVPN_HARD_RESET_CLIENT_V2: u8 = 7 << 3;

/// Packet id of the first control packet
const OPENVPN_PACKET_ID: [u8; 4] = [0, 0, 0, 1];

/// tls-auth uses the last 64 bytes of the static key for HMAC
const OPENVPN_HMAC_KEY_LEN: usize = 64;

/// Build the 28-byte IKEv2 probe.
///
/// Layout: initiator SPI (8 random), responder SPI (8 zero),
/// `21 20 22 08`, message id + length (8 zero).
pub fn ike_probe() -> Vec<u8> {
    let mut packet = Vec::with_capacity(IKE_PROBE_LEN);

    let mut spi = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut spi);
    packet.extend_from_slice(&spi);
    packet.extend_from_slice(&[0u8; 8]);
    packet.extend_from_slice(&IKE_HEADER_FLAGS);
    packet.extend_from_slice(&[0u8; 8]);

    packet
}

/// Build an OpenVPN hard-reset probe authenticated with tls-auth.
///
/// Layout (86 bytes):
/// - opcode (1 byte): `0x38`
/// - session id (8 bytes, random)
/// - HMAC-SHA512 (64 bytes)
/// - packet id (4 bytes): `00 00 00 01`
/// - timestamp (4 bytes, big endian seconds)
/// - message packet-id array length + packet id (5 zero bytes)
///
/// With `include_length` (TCP), the packet is prefixed by its length as a
/// 2-byte big endian integer.
pub fn openvpn_probe(static_key: &[u8], include_length: bool) -> Vec<u8> {
    let mut session_id = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut session_id);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
        .to_be_bytes();

    // HMAC pre-image: packet id and timestamp come first
    let mut preimage = Vec::with_capacity(22);
    preimage.extend_from_slice(&OPENVPN_PACKET_ID);
    preimage.extend_from_slice(&timestamp);
    preimage.push(OPENVPN_HARD_RESET_CLIENT_V2);
    preimage.extend_from_slice(&session_id);
    preimage.extend_from_slice(&[0u8; 5]);

    let hmac_key = &static_key[static_key.len().saturating_sub(OPENVPN_HMAC_KEY_LEN)..];
    let digest = tls_auth_digest(hmac_key, &preimage);

    let mut packet = Vec::with_capacity(OPENVPN_PROBE_LEN + 2);
    if include_length {
        packet.extend_from_slice(&(OPENVPN_PROBE_LEN as u16).to_be_bytes());
    }
    packet.push(OPENVPN_HARD_RESET_CLIENT_V2);
    packet.extend_from_slice(&session_id);
    packet.extend_from_slice(&digest);
    packet.extend_from_slice(&OPENVPN_PACKET_ID);
    packet.extend_from_slice(&timestamp);
    packet.extend_from_slice(&[0u8; 5]);

    packet
}

/// HMAC-SHA512 over the pre-image
fn tls_auth_digest(key: &[u8], preimage: &[u8]) -> [u8; 64] {
    let mut digest = [0u8; 64];
    if let Ok(mut mac) = <Hmac<Sha512> as Mac>::new_from_slice(key) {
        mac.update(preimage);
        digest.copy_from_slice(&mac.finalize().into_bytes());
    }
    digest
}

/// Build a WireGuard handshake initiation probe.
///
/// Format (148 bytes):
/// - Type (1 byte): 0x01 = handshake initiation
/// - Reserved (3 bytes): 0x000000
/// - Sender index (4 bytes, random)
/// - Ephemeral public key (32 bytes)
/// - Encrypted static, timestamp, MAC1, MAC2 (108 bytes, zeroed)
pub fn wireguard_probe() -> Vec<u8> {
    let mut packet = Vec::with_capacity(WIREGUARD_PROBE_LEN);

    packet.push(0x01);
    packet.extend_from_slice(&[0x00, 0x00, 0x00]);

    let sender_index: u32 = rand::random();
    packet.extend_from_slice(&sender_index.to_le_bytes());

    let ephemeral = StaticSecret::random_from_rng(rand::rngs::OsRng);
    packet.extend_from_slice(PublicKey::from(&ephemeral).as_bytes());

    packet.extend_from_slice(&[0u8; 108]);

    packet
}

/// Decode an OpenVPN static key.
///
/// Accepts either bare hex or the `-----BEGIN OpenVPN Static key V1-----`
/// block. Returns an empty key when the text is not valid hex.
pub fn parse_static_key(text: &str) -> Vec<u8> {
    let hex: String = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && !line.starts_with("-----"))
        .collect();

    if hex.len() % 2 != 0 {
        return Vec::new();
    }

    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for i in (0..hex.len()).step_by(2) {
        match hex.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()) {
            Some(b) => bytes.push(b),
            None => return Vec::new(),
        }
    }
    bytes
}
