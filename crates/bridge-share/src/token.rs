//! Signed path tokens (spec.md §4.C): `<truncated-hmac-hex>-<expires-unix>`,
//! grounded on `share_server.py`'s `generate_token`/`verify_token`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

use crate::error::{Result, ShareError};

/// Default link lifetime when no TTL is given.
pub const DEFAULT_TTL: Duration = Duration::from_secs(1800);
/// 128-bit truncated HMAC, hex-encoded.
pub const SIG_BYTES: usize = 16;
pub const MAX_UPLOAD_FILES: usize = 20;
pub const MAX_UPLOAD_FILE_BYTES: u64 = 50 * 1024 * 1024;

type HmacSha256 = Hmac<Sha256>;

/// Load `SHARE_SECRET` from the environment, or synthesize a random one for
/// this process. A generated secret means every signed link breaks across a
/// restart — callers should log the returned `generated` flag once.
pub fn load_secret() -> (String, bool) {
    match std::env::var("SHARE_SECRET") {
        Ok(s) if !s.is_empty() => (s, false),
        _ => {
            let secret = hex::encode(uuid::Uuid::new_v4().as_bytes())
                + &hex::encode(uuid::Uuid::new_v4().as_bytes());
            warn!("SHARE_SECRET not set — generated ephemeral secret, links won't survive restart");
            (secret, true)
        }
    }
}

fn sign(secret: &str, message: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ShareError::Hmac(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(mac.finalize().into_bytes()[..SIG_BYTES].to_vec())
}

/// Sign `payload` (the path-grammar string, e.g. `f:<workspace>:<rel>`) with
/// an expiry `ttl` from now.
pub fn generate_token(payload: &str, ttl: Duration, secret: &str) -> Result<String> {
    let expires = (SystemTime::now() + ttl)
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let message = format!("{payload}:{expires}");
    let sig = sign(secret, &message)?;
    Ok(format!("{}-{expires}", hex::encode(sig)))
}

/// Verify `token` against `payload`, constant-time, and not expired.
pub fn verify_token(token: &str, payload: &str, secret: &str) -> bool {
    let Some((sig_hex, expires_str)) = token.rsplit_once('-') else {
        return false;
    };
    let Ok(expires) = expires_str.parse::<u64>() else {
        return false;
    };
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    if now > expires {
        return false;
    }
    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let message = format!("{payload}:{expires}");
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message.as_bytes());
    mac.verify_truncated_left(&sig_bytes).is_ok()
}

/// Parse a TTL string like `"30m"`, `"2h"`, `"1d"`, `"45s"`, or a bare
/// second count. Falls back to [`DEFAULT_TTL`] on any parse error.
pub fn parse_ttl(s: &str) -> Duration {
    let s = s.trim().to_lowercase();
    let (digits, unit_secs) = if let Some(n) = s.strip_suffix('s') {
        (n, 1u64)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600)
    } else if let Some(n) = s.strip_suffix('d') {
        (n, 86400)
    } else {
        (s.as_str(), 1)
    };
    match digits.parse::<u64>() {
        Ok(n) => Duration::from_secs(n * unit_secs),
        Err(_) => DEFAULT_TTL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_valid_token() {
        let secret = "test-secret";
        let token = generate_token("f:/ws:report.pdf", Duration::from_secs(60), secret).unwrap();
        assert!(verify_token(&token, "f:/ws:report.pdf", secret));
    }

    #[test]
    fn rejects_wrong_payload() {
        let secret = "test-secret";
        let token = generate_token("f:/ws:report.pdf", Duration::from_secs(60), secret).unwrap();
        assert!(!verify_token(&token, "f:/ws:other.pdf", secret));
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = generate_token("f:/ws:report.pdf", Duration::from_secs(60), "secret-a").unwrap();
        assert!(!verify_token(&token, "f:/ws:report.pdf", "secret-b"));
    }

    #[test]
    fn rejects_expired_token() {
        let secret = "test-secret";
        let token = generate_token("f:/ws:report.pdf", Duration::from_secs(0), secret).unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        assert!(!verify_token(&token, "f:/ws:report.pdf", secret));
    }

    #[test]
    fn rejects_malformed_token() {
        assert!(!verify_token("not-a-token", "f:/ws:report.pdf", "secret"));
        assert!(!verify_token("deadbeef-notanumber", "f:/ws:report.pdf", "secret"));
    }

    #[test]
    fn parses_ttl_suffixes() {
        assert_eq!(parse_ttl("30m"), Duration::from_secs(1800));
        assert_eq!(parse_ttl("2h"), Duration::from_secs(7200));
        assert_eq!(parse_ttl("1d"), Duration::from_secs(86400));
        assert_eq!(parse_ttl("45s"), Duration::from_secs(45));
        assert_eq!(parse_ttl("garbage"), DEFAULT_TTL);
    }
}
