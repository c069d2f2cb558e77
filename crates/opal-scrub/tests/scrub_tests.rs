//! Scrubber integration tests: boundary-splitting, obfuscation variants,
//! the writer contract, and concurrent writes.

use std::io::Write;
use std::sync::{Arc, Mutex};

use opal_scrub::{Scrubber, SecretStore};

/// A wrapped writer whose accumulated bytes tests can inspect.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    fn text(&self) -> String {
        String::from_utf8(self.contents()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn scrubber_with(raw: &str, placeholder: &str) -> (Scrubber<SharedBuf>, SharedBuf) {
    let store = Arc::new(SecretStore::new());
    store.register_secret(raw, placeholder);
    let buf = SharedBuf::default();
    (Scrubber::new(buf.clone(), store), buf)
}

#[test]
fn whole_secret_in_one_write() {
    let (mut scrub, buf) = scrubber_with("hunter2", "<7:sha-256:abc123>");
    scrub.write_all(b"password is hunter2!\n").unwrap();
    scrub.flush().unwrap();
    let out = buf.text();
    assert!(!out.contains("hunter2"), "output: {out}");
    assert!(out.contains("<7:sha-256:abc123>"), "output: {out}");
}

#[test]
fn secret_split_across_chunk_boundary() {
    let (mut scrub, buf) = scrubber_with("super-secret-password-12345", "opal:v:PASSWORD");
    scrub.write_all(b"prefix super-").unwrap();
    scrub.write_all(b"secret-password-12345 suffix").unwrap();
    scrub.flush().unwrap();

    let out = buf.text();
    assert_eq!(out, "prefix opal:v:PASSWORD suffix");
    assert!(!out.contains("super-secret-password-12345"));
}

#[test]
fn secret_split_byte_by_byte() {
    let (mut scrub, buf) = scrubber_with("tok-abc", "<redacted>");
    for byte in b"see tok-abc end" {
        scrub.write_all(&[*byte]).unwrap();
    }
    scrub.flush().unwrap();
    assert_eq!(buf.text(), "see <redacted> end");
}

#[test]
fn write_reports_full_input_length() {
    let (mut scrub, _buf) = scrubber_with("super-secret-password-12345", "X");
    let n = scrub.write(b"short").unwrap();
    assert_eq!(n, 5);
    let n = scrub.write(b"").unwrap();
    assert_eq!(n, 0);
}

#[test]
fn no_registered_secrets_passes_through() {
    let store = Arc::new(SecretStore::new());
    let buf = SharedBuf::default();
    let mut scrub = Scrubber::new(buf.clone(), store);
    scrub.write_all(b"anything at all").unwrap();
    scrub.flush().unwrap();
    assert_eq!(buf.text(), "anything at all");
}

// ── Obfuscation variants ───────────────────────────────────────────────

#[test]
fn lowercase_hex_variant_is_redacted() {
    let (mut scrub, buf) = scrubber_with("secret", "<hidden>");
    // "secret" = 736563726574
    scrub.write_all(b"hex dump: 736563726574\n").unwrap();
    scrub.flush().unwrap();
    let out = buf.text();
    assert!(!out.contains("736563726574"), "output: {out}");
    assert!(out.contains("<hidden>"));
}

#[test]
fn base64_variants_are_redacted() {
    let (mut scrub, buf) = scrubber_with("secret", "<hidden>");
    // STANDARD("secret") = c2VjcmV0
    scrub.write_all(b"b64: c2VjcmV0 done\n").unwrap();
    scrub.flush().unwrap();
    let out = buf.text();
    assert!(!out.contains("c2VjcmV0"), "output: {out}");
    assert!(out.contains("<hidden>"));
}

#[test]
fn url_safe_base64_variant_is_redacted() {
    // Raw bytes chosen so URL-safe and standard alphabets differ.
    let raw = "\u{00fb}\u{00ff}~";
    let store = Arc::new(SecretStore::new());
    store.register_secret(raw, "<hidden>");
    let buf = SharedBuf::default();
    let mut scrub = Scrubber::new(buf.clone(), store);

    use base64::engine::general_purpose::URL_SAFE;
    use base64::Engine;
    let encoded = URL_SAFE.encode(raw.as_bytes());
    scrub.write_all(encoded.as_bytes()).unwrap();
    scrub.flush().unwrap();
    let out = buf.text();
    assert!(!out.contains(&encoded), "output: {out}");
    assert!(out.contains("<hidden>"));
}

#[test]
fn percent_encoded_variant_is_redacted() {
    let (mut scrub, buf) = scrubber_with("pa$$word", "<hidden>");
    scrub.write_all(b"url: pa%24%24word\n").unwrap();
    scrub.flush().unwrap();
    let out = buf.text();
    assert!(!out.contains("pa%24%24word"), "output: {out}");
    assert!(out.contains("<hidden>"));
}

#[test]
fn reversed_variant_is_redacted() {
    let (mut scrub, buf) = scrubber_with("secret", "<hidden>");
    scrub.write_all(b"backwards: terces\n").unwrap();
    scrub.flush().unwrap();
    let out = buf.text();
    assert!(!out.contains("terces"), "output: {out}");
    assert!(out.contains("<hidden>"));
}

#[test]
fn separator_injected_variants_are_redacted() {
    for (sep, spelled) in [
        ('-', "s-e-c-r-e-t"),
        ('_', "s_e_c_r_e_t"),
        ('.', "s.e.c.r.e.t"),
        (':', "s:e:c:r:e:t"),
    ] {
        let (mut scrub, buf) = scrubber_with("secret", "<hidden>");
        scrub.write_all(spelled.as_bytes()).unwrap();
        scrub.flush().unwrap();
        let out = buf.text();
        assert!(!out.contains(spelled), "separator {sep}: output {out}");
        assert!(out.contains("<hidden>"), "separator {sep}: output {out}");
    }
}

#[test]
fn variant_split_across_chunks_is_still_redacted() {
    let (mut scrub, buf) = scrubber_with("secret", "<hidden>");
    scrub.write_all(b"b64 c2Vj").unwrap();
    scrub.write_all(b"cmV0 end").unwrap();
    scrub.flush().unwrap();
    let out = buf.text();
    assert!(!out.contains("c2VjcmV0"), "output: {out}");
    assert!(out.contains("<hidden>"));
}

// ── Multiple secrets ───────────────────────────────────────────────────

#[test]
fn multiple_secrets_each_get_their_placeholder() {
    let store = Arc::new(SecretStore::new());
    store.register_secret("alpha-key-001", "<A>");
    store.register_secret("beta-key-002", "<B>");
    let buf = SharedBuf::default();
    let mut scrub = Scrubber::new(buf.clone(), store);
    scrub.write_all(b"alpha-key-001 and beta-key-002\n").unwrap();
    scrub.flush().unwrap();
    assert_eq!(buf.text(), "<A> and <B>\n");
}

#[test]
fn registration_between_writes_applies_to_later_writes() {
    let store = Arc::new(SecretStore::new());
    let buf = SharedBuf::default();
    let mut scrub = Scrubber::new(buf.clone(), Arc::clone(&store));

    scrub.write_all(b"before ").unwrap();
    scrub.flush().unwrap();
    store.register_secret("late-secret", "<late>");
    scrub.write_all(b"late-secret").unwrap();
    scrub.flush().unwrap();

    let out = buf.text();
    assert_eq!(out, "before <late>");
}

// ── Concurrency ────────────────────────────────────────────────────────

#[test]
fn concurrent_writers_never_leak_mid_secret() {
    let store = Arc::new(SecretStore::new());
    store.register_secret("shared-secret-token", "<T>");
    let buf = SharedBuf::default();
    let scrub = Arc::new(Scrubber::new(buf.clone(), store));

    let mut handles = Vec::new();
    for i in 0..4 {
        let scrub = Arc::clone(&scrub);
        handles.push(std::thread::spawn(move || {
            for _ in 0..50 {
                let line = format!("worker {i}: shared-secret-token\n");
                (&*scrub).write_all(line.as_bytes()).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    (&*scrub).flush().unwrap();

    let out = buf.text();
    assert!(!out.contains("shared-secret-token"), "raw secret leaked");
    assert_eq!(out.matches("<T>").count(), 200);
}

// ── Failure propagation ────────────────────────────────────────────────

struct FailingWriter;

impl Write for FailingWriter {
    fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
        Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "down"))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "down"))
    }
}

#[test]
fn underlying_writer_errors_propagate() {
    let store = Arc::new(SecretStore::new());
    let mut scrub = Scrubber::new(FailingWriter, store);
    // With no secrets registered nothing is carried, so the write reaches
    // the failing writer immediately.
    let err = scrub.write(b"boom").unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    assert!(scrub.flush().is_err());
}
