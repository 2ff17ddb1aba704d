//! Reference-counted identifier remapping.

use std::collections::{HashMap, HashSet};

/// Characters code words are built from: printable ASCII without `"` and `\`,
/// so every code word is a valid JSON string body as-is.
pub const ALPHABET: &[u8] =
    b"!#$%&'()*+,-./0123456789:;<=>?@ABCDEFGHIJKLMNOPQRSTUVWXYZ[]^_`abcdefghijklmnopqrstuvwxyz{|}~";

/// The `index`-th code word, shortest first: `!`, `#`, ..., `~`, `!!`, `!#`, ...
pub fn code_word(mut index: usize) -> String {
    let base = ALPHABET.len();
    let mut word = Vec::new();
    loop {
        word.push(ALPHABET[index % base]);
        if index < base {
            break;
        }
        index = index / base - 1;
    }
    word.reverse();
    String::from_utf8_lossy(&word).into_owned()
}

/// Assigns short code words to identifiers by descending reference count.
///
/// Reserved identifiers are never counted, never renamed and never handed
/// out as code words.
#[derive(Debug, Default)]
pub struct IdentifierPool {
    counts: HashMap<String, usize>,
    first_seen: Vec<String>,
    reserved: HashSet<String>,
    assigned: HashMap<String, String>,
}

impl IdentifierPool {
    /// Creates a pool that leaves `reserved` untouched.
    pub fn new(reserved: HashSet<String>) -> Self {
        Self {
            reserved,
            ..Self::default()
        }
    }

    /// Records one reference to `id`.
    pub fn reference(&mut self, id: &str) {
        if self.reserved.contains(id) {
            return;
        }
        match self.counts.get_mut(id) {
            Some(count) => *count += 1,
            None => {
                self.counts.insert(id.to_string(), 1);
                self.first_seen.push(id.to_string());
            }
        }
    }

    /// References recorded for `id`.
    pub fn count(&self, id: &str) -> usize {
        self.counts.get(id).copied().unwrap_or(0)
    }

    /// Number of distinct identifiers seen.
    pub fn len(&self) -> usize {
        self.first_seen.len()
    }

    /// Whether no identifier was seen.
    pub fn is_empty(&self) -> bool {
        self.first_seen.is_empty()
    }

    /// Assigns code words. Ties keep first-seen order.
    pub fn assign(&mut self) {
        let mut ranked: Vec<&String> = self.first_seen.iter().collect();
        // Stable sort keeps first-seen order among equal counts.
        ranked.sort_by_key(|id| std::cmp::Reverse(self.counts.get(*id).copied().unwrap_or(0)));

        let mut assigned = HashMap::with_capacity(ranked.len());
        let mut next = 0;
        for id in ranked {
            let word = loop {
                let candidate = code_word(next);
                next += 1;
                if !self.reserved.contains(&candidate) {
                    break candidate;
                }
            };
            assigned.insert(id.clone(), word);
        }
        self.assigned = assigned;
    }

    /// Code word assigned to `id`.
    pub fn get(&self, id: &str) -> Option<&str> {
        self.assigned.get(id).map(String::as_str)
    }

    /// New name of `id`; identifiers without an assignment keep their name.
    pub fn rename(&self, id: &str) -> String {
        self.get(id).unwrap_or(id).to_string()
    }
}
