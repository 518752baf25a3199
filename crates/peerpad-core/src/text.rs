//! Mirrored text buffer
//!
//! Each peer holds a [`SharedText`]. Local edits are turned into messages by
//! [`diff_outgoing`] (or sent whole in replace mode) and the remote side
//! applies them, keeping both buffers equal as long as no frame is lost or
//! reordered.
//!
//! ```text
//! local edit "a" -> "ab"   ──ADD:b──▶   remote mirror "a" -> "ab"
//! local edit "ab" -> "a"   ──DEL────▶   remote mirror "ab" -> "a"
//! local paste "a" -> "xyz" ──MSG:xyz─▶   remote mirror "a" -> "xyz"
//! ```
//!
//! "Character" always means a Unicode scalar value.

use serde::{Deserialize, Serialize};

use crate::protocol::Message;

/// How local edits are sent to the peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSync {
    /// Append/delete-last for single-character edits, replace otherwise
    #[default]
    Diff,
    /// Every edit sends the whole buffer
    Replace,
}

/// The mirrored text buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedText {
    content: String,
}

impl SharedText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current buffer contents
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Replace the whole buffer
    pub fn apply_replace(&mut self, content: &str) {
        content.clone_into(&mut self.content);
    }

    /// Append one character
    pub fn apply_append(&mut self, ch: char) {
        self.content.push(ch);
    }

    /// Remove the last character, if any
    pub fn apply_delete_last(&mut self) {
        self.content.pop();
    }

    /// Apply a text message
    ///
    /// Returns `false` (and leaves the buffer alone) for non-text messages.
    pub fn apply(&mut self, message: &Message) -> bool {
        match message {
            Message::TextReplace(content) => self.apply_replace(content),
            Message::TextAppend(ch) => self.apply_append(*ch),
            Message::TextDeleteLast => self.apply_delete_last(),
            Message::Location(_) | Message::Raw(_) => return false,
        }
        true
    }

    /// Messages that would mirror an edit to `new_value`, without applying it
    pub fn changes_to(&self, new_value: &str, mode: TextSync) -> Vec<Message> {
        match mode {
            TextSync::Diff => diff_outgoing(&self.content, new_value),
            TextSync::Replace if self.content == new_value => Vec::new(),
            TextSync::Replace => vec![Message::TextReplace(new_value.to_string())],
        }
    }

    /// Record a local edit and return the messages that mirror it
    pub fn edit(&mut self, new_value: &str, mode: TextSync) -> Vec<Message> {
        let messages = self.changes_to(new_value, mode);
        self.apply_replace(new_value);
        messages
    }

    pub fn clear(&mut self) {
        self.content.clear();
    }
}

/// Messages that take a peer holding `old_value` to `new_value`
///
/// A single trailing character added becomes `TextAppend`, a single trailing
/// character removed becomes `TextDeleteLast`, any other change becomes one
/// `TextReplace`. An unchanged value produces nothing.
pub fn diff_outgoing(old_value: &str, new_value: &str) -> Vec<Message> {
    if old_value == new_value {
        return Vec::new();
    }

    if let Some(ch) = single_char_suffix(old_value, new_value) {
        return vec![Message::TextAppend(ch)];
    }

    if single_char_suffix(new_value, old_value).is_some() {
        return vec![Message::TextDeleteLast];
    }

    vec![Message::TextReplace(new_value.to_string())]
}

/// The one character `longer` has beyond `shorter`, if that is the only difference
fn single_char_suffix(shorter: &str, longer: &str) -> Option<char> {
    let rest = longer.strip_prefix(shorter)?;
    let mut chars = rest.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => Some(ch),
        _ => None,
    }
}
