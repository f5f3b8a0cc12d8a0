//! Slack request signing.
//!
//! Slack signs `v0:{timestamp}:{body}` with HMAC-SHA256 using the app's
//! signing secret and sends it as `X-Slack-Signature: v0=<hex>`.

use {
    hmac::{Hmac, Mac},
    http::HeaderMap,
    sha2::Sha256,
    tracing::warn,
};

use switchboard_channels::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-slack-signature";
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";

/// Requests older (or newer) than this are rejected as replays.
pub const MAX_CLOCK_SKEW_SECS: i64 = 300;

/// Verify a Slack request at `now_secs`.
pub fn verify(secret: &str, headers: &HeaderMap, body: &[u8], now_secs: i64) -> Result<()> {
    let timestamp = header(headers, TIMESTAMP_HEADER)?;
    let signature = header(headers, SIGNATURE_HEADER)?;

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| Error::unauthorized("invalid slack request timestamp"))?;
    if (now_secs - ts).abs() > MAX_CLOCK_SKEW_SECS {
        warn!(ts, now_secs, "slack request outside replay window");
        return Err(Error::unauthorized("slack request timestamp expired"));
    }

    let expected = sign(secret, timestamp, body)?;
    if !constant_time_eq(&expected, signature) {
        return Err(Error::unauthorized("slack signature mismatch"));
    }
    Ok(())
}

/// Compute the `v0=<hex>` signature for a request.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| Error::unauthorized("invalid slack signing secret"))?;
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    Ok(format!("v0={}", hex::encode(mac.finalize().into_bytes())))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::unauthorized(format!("missing {name} header")))
}

/// Constant-time string comparison.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}
