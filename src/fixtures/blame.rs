//! Unique names for resources created by tests.
//!
//! Workers share one cluster, so every name a test creates carries the test
//! context and a random tail: `<name>-<context><5 random [a-z0-9]>`.

use rand::Rng;

/// Kubernetes object name limit (DNS-1123 label)
pub const MAX_NAME_LENGTH: usize = 63;
pub const SUFFIX_LENGTH: usize = 5;

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const CONTEXT_LENGTH: usize = 12;

#[derive(Debug, Clone)]
pub struct Blame {
    context: String,
}

impl Blame {
    /// `context` is usually the test name; only its first characters are kept
    pub fn new(context: impl AsRef<str>) -> Self {
        let context: String = dns_label(context.as_ref())
            .chars()
            .take(CONTEXT_LENGTH)
            .collect();
        Self {
            context: context.trim_end_matches('-').to_string(),
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn blame(&self, name: &str) -> String {
        self.blame_with(name, &mut rand::thread_rng())
    }

    pub fn blame_with<R: Rng>(&self, name: &str, rng: &mut R) -> String {
        blamed(name, &self.context, &random_suffix(rng))
    }
}

fn random_suffix<R: Rng>(rng: &mut R) -> String {
    (0..SUFFIX_LENGTH)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

fn blamed(name: &str, context: &str, suffix: &str) -> String {
    let base = dns_label(&format!("{}-{}", name, context));
    let mut base: String = base
        .chars()
        .take(MAX_NAME_LENGTH - suffix.len())
        .collect();
    // The suffix is alphanumeric, so only the head needs fixing
    while base.starts_with('-') {
        base.remove(0);
    }
    base.push_str(suffix);
    base
}

/// Lower-case, `[a-z0-9-]` only, no repeated or leading dashes
fn dns_label(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '-'
        };
        if c == '-' && (out.is_empty() || out.ends_with('-')) {
            continue;
        }
        out.push(c);
    }
    out
}
