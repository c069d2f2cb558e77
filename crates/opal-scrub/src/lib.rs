//! Streaming secret scrubber.
//!
//! A [`Scrubber`] wraps a writer and replaces every registered secret --
//! and a set of common obfuscations of it -- with its placeholder token
//! before any byte reaches the wrapped writer. It is installed on stdout
//! and stderr at process entry, so even the parser's and planner's own
//! diagnostics cannot leak a resolved value.
//!
//! # Chunk boundaries
//!
//! Secrets may arrive split across arbitrarily many writes. The scrubber
//! holds back the last `max_secret_len - 1` bytes of each processed buffer
//! as a carry and prepends it to the next write, so a secret can never
//! straddle a boundary unseen. `flush` redacts and releases the carry.
//!
//! # Concurrency
//!
//! A write mutex serializes writes (executor tasks all funnel through one
//! scrubber); the secret list sits behind a reader/writer lock since
//! registration is rare compared to writes. `Scrubber` is a cheaply
//! cloneable handle -- clones share the same wrapped writer and carry.

use std::io::{self, Write};
use std::sync::Arc;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use parking_lot::{Mutex, RwLock};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

/// Separators tried for the separator-injected obfuscation variants.
const SEPARATORS: [char; 4] = ['-', '_', '.', ':'];

#[derive(Default)]
struct StoreInner {
    /// `(pattern, placeholder)` pairs, sorted by descending pattern length
    /// so longer secrets win over their own substrings.
    patterns: Vec<(Vec<u8>, Vec<u8>)>,
    max_len: usize,
}

/// The registered secrets and their obfuscation variants.
///
/// Shared between the scrubbed stdout/stderr handles and whoever registers
/// secrets (the planner's caller, before execution starts).
#[derive(Default)]
pub struct SecretStore {
    inner: RwLock<StoreInner>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a secret with its display placeholder.
    ///
    /// Alongside the raw bytes, obfuscation-resistant variants are
    /// registered too: lowercase hex, standard and URL-safe base64 (padded
    /// and unpadded), percent-encoding, byte reversal, and forms with one
    /// separator character inserted between each character. All variants
    /// map to the same placeholder.
    pub fn register_secret(&self, raw: &str, placeholder: &str) {
        if raw.is_empty() {
            return;
        }

        let mut variants: Vec<Vec<u8>> = vec![raw.as_bytes().to_vec()];
        let mut push = |candidate: Vec<u8>| {
            if !candidate.is_empty() && !variants.contains(&candidate) {
                variants.push(candidate);
            }
        };

        push(hex::encode(raw.as_bytes()).into_bytes());
        push(STANDARD.encode(raw.as_bytes()).into_bytes());
        push(STANDARD_NO_PAD.encode(raw.as_bytes()).into_bytes());
        push(URL_SAFE.encode(raw.as_bytes()).into_bytes());
        push(URL_SAFE_NO_PAD.encode(raw.as_bytes()).into_bytes());
        push(utf8_percent_encode(raw, NON_ALPHANUMERIC).to_string().into_bytes());
        push(raw.as_bytes().iter().rev().copied().collect());
        for sep in SEPARATORS {
            let mut separated = String::with_capacity(raw.len() * 2);
            for (i, c) in raw.chars().enumerate() {
                if i > 0 {
                    separated.push(sep);
                }
                separated.push(c);
            }
            push(separated.into_bytes());
        }

        let mut inner = self.inner.write();
        for variant in variants {
            if inner.patterns.iter().any(|(p, _)| p == &variant) {
                continue;
            }
            inner.max_len = inner.max_len.max(variant.len());
            inner
                .patterns
                .push((variant, placeholder.as_bytes().to_vec()));
        }
        inner.patterns.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    /// Longest registered pattern, in bytes. Zero when nothing is
    /// registered.
    pub fn max_secret_len(&self) -> usize {
        self.inner.read().max_len
    }

    /// Replace every registered pattern in `data`, longest first.
    fn redact(&self, data: &[u8]) -> Vec<u8> {
        let inner = self.inner.read();
        let mut out = data.to_vec();
        for (pattern, placeholder) in &inner.patterns {
            out = replace_all(&out, pattern, placeholder);
        }
        out
    }
}

fn replace_all(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack.len() - i >= needle.len() && &haystack[i..i + needle.len()] == needle {
            out.extend_from_slice(replacement);
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

struct ScrubState<W> {
    inner: W,
    carry: Vec<u8>,
}

/// A scrubbing writer handle. Clones share the wrapped writer, the carry
/// buffer, and the secret store.
pub struct Scrubber<W> {
    store: Arc<SecretStore>,
    state: Arc<Mutex<ScrubState<W>>>,
}

impl<W> Clone for Scrubber<W> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            state: Arc::clone(&self.state),
        }
    }
}

impl<W: Write> Scrubber<W> {
    pub fn new(inner: W, store: Arc<SecretStore>) -> Self {
        Self {
            store,
            state: Arc::new(Mutex::new(ScrubState {
                inner,
                carry: Vec::new(),
            })),
        }
    }

    pub fn store(&self) -> &Arc<SecretStore> {
        &self.store
    }

    fn write_locked(&self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.lock();

        let mut data = std::mem::take(&mut state.carry);
        data.extend_from_slice(buf);
        let data = self.store.redact(&data);

        // Hold back a tail that could be the start of a secret split
        // across writes.
        let keep = self
            .store
            .max_secret_len()
            .saturating_sub(1)
            .min(data.len());
        let forward = data.len() - keep;

        state.inner.write_all(&data[..forward])?;
        state.carry = data[forward..].to_vec();

        // The caller's bytes are all accounted for: forwarded or carried.
        Ok(buf.len())
    }

    fn flush_locked(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        if !state.carry.is_empty() {
            let carry = std::mem::take(&mut state.carry);
            let redacted = self.store.redact(&carry);
            state.inner.write_all(&redacted)?;
        }
        state.inner.flush()
    }
}

impl<W: Write> Write for Scrubber<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_locked(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_locked()
    }
}

impl<W: Write> Write for &Scrubber<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_locked(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_locked()
    }
}

/// Scrubbed stdout/stderr sharing one secret store, for installation at
/// process entry.
pub struct ScrubbedStdio {
    pub stdout: Scrubber<io::Stdout>,
    pub stderr: Scrubber<io::Stderr>,
    pub store: Arc<SecretStore>,
}

impl ScrubbedStdio {
    pub fn install() -> Self {
        let store = Arc::new(SecretStore::new());
        Self {
            stdout: Scrubber::new(io::stdout(), Arc::clone(&store)),
            stderr: Scrubber::new(io::stderr(), Arc::clone(&store)),
            store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_all_basic() {
        assert_eq!(replace_all(b"aXbXc", b"X", b"_"), b"a_b_c".to_vec());
        assert_eq!(replace_all(b"abc", b"zz", b"_"), b"abc".to_vec());
        assert_eq!(replace_all(b"XX", b"X", b"yy"), b"yyyy".to_vec());
    }

    #[test]
    fn longest_pattern_wins() {
        let store = SecretStore::new();
        store.register_secret("abc", "<short>");
        store.register_secret("abcdef", "<long>");
        let out = store.redact(b"say abcdef now");
        assert_eq!(out, b"say <long> now".to_vec());
    }
}
