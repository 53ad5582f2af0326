//! One-shot messages carried to the next page render in a signed cookie.

use axum::http::{header, HeaderMap, HeaderValue};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, warn};

pub const FLASH_COOKIE: &str = "flash";

/// Longest single message, in characters. Longer ones are cut and end in `...`.
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Largest sealed value put in a cookie. Browsers drop cookies past roughly 4 KiB.
pub const MAX_SEALED_LEN: usize = 3800;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct FlashKey(Arc<[u8]>);

impl FlashKey {
    pub fn new(secret: &[u8]) -> Self {
        Self(Arc::from(secret))
    }

    fn mac(&self) -> Option<HmacSha256> {
        // HMAC accepts keys of any length.
        HmacSha256::new_from_slice(&self.0).ok()
    }

    /// `base64(json).base64(hmac)`; `None` only when the messages cannot be serialised.
    pub fn seal(&self, messages: &[String]) -> Option<String> {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(messages).ok()?);
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Some(format!("{payload}.{sig}"))
    }

    /// Messages from a sealed value. Tampered or malformed values yield `None`.
    pub fn open(&self, sealed: &str) -> Option<Vec<String>> {
        let (payload, sig) = sealed.split_once('.')?;
        let sig = URL_SAFE_NO_PAD.decode(sig).ok()?;
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&sig).ok()?;
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).ok()?).ok()
    }
}

/// Raw value of the flash cookie, if the request carries one.
fn flash_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == FLASH_COOKIE)
        .map(|(_, value)| value)
}

/// Pending messages plus whether a cookie was present (and so needs clearing).
pub fn take(headers: &HeaderMap, key: &FlashKey) -> (Vec<String>, bool) {
    match flash_cookie(headers) {
        None => (Vec::new(), false),
        Some(raw) => match key.open(raw) {
            Some(messages) => (messages, true),
            None => {
                debug!("ignoring flash cookie with a bad signature");
                (Vec::new(), true)
            }
        },
    }
}

fn shorten(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_CHARS {
        return message.to_string();
    }
    let mut cut: String = message.chars().take(MAX_MESSAGE_CHARS - 3).collect();
    cut.push_str("...");
    cut
}

/// Seals `messages` within [`MAX_SEALED_LEN`]. Long messages are shortened, then the oldest
/// are dropped until the rest fit.
fn seal_within_limit(key: &FlashKey, messages: &[String]) -> Option<String> {
    let mut kept: Vec<String> = messages.iter().map(|m| shorten(m)).collect();
    loop {
        let sealed = key.seal(&kept)?;
        if sealed.len() <= MAX_SEALED_LEN || kept.is_empty() {
            return Some(sealed);
        }
        debug!(dropped = %kept[0], "flash cookie full, dropping oldest message");
        kept.remove(0);
    }
}

pub fn set_cookie(key: &FlashKey, messages: &[String]) -> Option<HeaderValue> {
    let sealed = seal_within_limit(key, messages)?;
    match HeaderValue::from_str(&format!(
        "{FLASH_COOKIE}={sealed}; Path=/; HttpOnly; SameSite=Lax"
    )) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, "could not encode flash cookie");
            None
        }
    }
}

pub fn clear_cookie() -> HeaderValue {
    HeaderValue::from_static("flash=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax")
}
