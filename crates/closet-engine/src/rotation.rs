use std::sync::atomic::{AtomicUsize, Ordering};

/// Ordered credential pool with a round-robin cursor.
///
/// The keys never change after construction; only the cursor moves. The
/// cursor is atomic so a single pool can be shared by concurrent callers
/// while still handing out slots in strict rotation.
#[derive(Debug)]
pub struct CredentialPool {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl CredentialPool {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Returns the slot under the cursor and moves the cursor one step,
    /// wrapping at the end of the pool.
    pub fn advance(&self) -> usize {
        let len = self.keys.len();
        if len == 0 {
            return 0;
        }
        match self
            .cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some((current + 1) % len)
            }) {
            Ok(previous) | Err(previous) => previous,
        }
    }

    pub fn credential(&self, slot: usize) -> Option<&str> {
        self.keys.get(slot).map(String::as_str)
    }

    pub fn masked(&self) -> Vec<String> {
        self.keys.iter().map(|key| mask_credential(key)).collect()
    }
}

/// Shows the first eight and last four characters of a key.
pub fn mask_credential(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 12 {
        return "*".repeat(chars.len().max(4));
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
