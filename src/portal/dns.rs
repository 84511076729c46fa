//! Redirect-all DNS responder for the captive portal.
//!
//! Answers every well-formed query with a single A record pointing at the
//! portal's own address. This is deliberately not a DNS implementation: the
//! query is echoed back verbatim with the response flags set and one answer
//! appended, which is all a captive-portal client needs to land on the form.

use std::net::Ipv4Addr;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Fixed DNS header length; anything shorter is dropped without a response.
pub const HEADER_LEN: usize = 12;

/// QR=1, AA=1, RCODE=0.
const RESPONSE_FLAGS: u16 = 0x8400;

/// Compression pointer to the question name at offset 12, TYPE=A, CLASS=IN,
/// TTL=60, RDLENGTH=4. RDATA follows.
const ANSWER_PREFIX: [u8; 12] = [
    0xC0, 0x0C, // name pointer
    0x00, 0x01, // TYPE A
    0x00, 0x01, // CLASS IN
    0x00, 0x00, 0x00, 0x3C, // TTL 60s
    0x00, 0x04, // RDLENGTH
];

/// Synthesizes the redirect answer for one query, or `None` for queries too
/// short to carry a header.
///
/// The response is the query copied verbatim (same transaction id, question
/// section and counts) with the flags and ANCOUNT rewritten and a 16-byte
/// answer record appended.
pub fn answer_query(query: &[u8], portal_addr: Ipv4Addr) -> Option<Vec<u8>> {
    if query.len() < HEADER_LEN {
        return None;
    }

    let mut response = Vec::with_capacity(query.len() + ANSWER_PREFIX.len() + 4);
    response.extend_from_slice(query);
    response[2..4].copy_from_slice(&RESPONSE_FLAGS.to_be_bytes());
    // ANCOUNT = 1
    response[6..8].copy_from_slice(&1u16.to_be_bytes());

    response.extend_from_slice(&ANSWER_PREFIX);
    response.extend_from_slice(&portal_addr.octets());

    Some(response)
}

/// Receive loop: answers every query on the socket until cancelled.
///
/// Receive errors are logged and the loop continues; only cancellation (or the
/// socket being closed underneath us, which surfaces as repeated errors until
/// the token fires) ends it.
pub async fn serve(socket: UdpSocket, portal_addr: Ipv4Addr, cancel: CancellationToken) {
    let mut buf = [0u8; 512];

    loop {
        let (len, peer) = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("DNS responder stopping");
                return;
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    warn!("DNS recv failed: {}", e);
                    continue;
                }
            },
        };

        let Some(response) = answer_query(&buf[..len], portal_addr) else {
            trace!("Dropping runt DNS packet ({} bytes) from {}", len, peer);
            continue;
        };

        if let Err(e) = socket.send_to(&response, peer).await {
            warn!("DNS send to {} failed: {}", peer, e);
        }
    }
}
