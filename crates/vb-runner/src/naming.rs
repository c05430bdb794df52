//! Local interface names derived from discovery instance names.
//!
//! `MIO04-1-can` becomes `vcan-MIO04-1`. Names that would not fit the
//! kernel's interface-name limit keep their head and tail around `..`:
//! `S101-IOU04-USB-EXT-1-can` becomes `vcan-S10..EXT-1`.
//!
//! The kernel counts the limit in bytes and rejects `/`, `:` and
//! whitespace, so every other character is replaced by `_` first.

use serde::Deserialize;

/// Longest interface name the kernel accepts (`IFNAMSIZ` minus the NUL).
pub const IFNAME_MAX_LEN: usize = 15;

const ELLIPSIS: &str = "..";

/// Replacement for characters the kernel does not accept in a name.
const REPLACEMENT: char = '_';

fn is_ifname_char(c: char) -> bool {
    c.is_ascii_graphic() && c != '/' && c != ':'
}

/// Interface naming scheme.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InterfaceNaming {
    /// Prepended to every derived name.
    pub prefix: String,
    /// Stripped from the end of instance names.
    pub suffix_marker: String,
    /// Maximum length of the final name in bytes, prefix included.
    pub max_len: usize,
    /// Characters kept from the end of a compressed name.
    pub tail_len: usize,
}

impl Default for InterfaceNaming {
    fn default() -> Self {
        Self {
            prefix: "vcan-".to_string(),
            suffix_marker: "-can".to_string(),
            max_len: IFNAME_MAX_LEN,
            tail_len: 5,
        }
    }
}

impl InterfaceNaming {
    /// Bytes available after the prefix.
    fn budget(&self) -> usize {
        self.max_len.saturating_sub(self.prefix.len())
    }

    /// Check that compressed names can keep at least one head character.
    pub fn validate(&self) -> Result<(), String> {
        if !self.prefix.chars().all(is_ifname_char) {
            return Err(format!(
                "prefix {:?} contains characters not allowed in interface names",
                self.prefix
            ));
        }
        if self.max_len > IFNAME_MAX_LEN {
            return Err(format!(
                "max_len {} exceeds interface name limit {IFNAME_MAX_LEN}",
                self.max_len
            ));
        }
        if self.budget() < self.tail_len + ELLIPSIS.len() + 1 {
            return Err(format!(
                "prefix {:?} leaves no room for tail of {} characters",
                self.prefix, self.tail_len
            ));
        }
        Ok(())
    }

    /// Derive the interface name for `instance`.
    pub fn derive(&self, instance: &str) -> String {
        let base = instance
            .strip_suffix(self.suffix_marker.as_str())
            .filter(|_| !self.suffix_marker.is_empty())
            .unwrap_or(instance);

        let budget = self.budget();
        let chars: Vec<char> = base
            .chars()
            .map(|c| if is_ifname_char(c) { c } else { REPLACEMENT })
            .collect();
        if chars.len() <= budget {
            let mut name = self.prefix.clone();
            name.extend(&chars);
            return name;
        }

        let tail = self.tail_len.min(budget.saturating_sub(ELLIPSIS.len()));
        let head = budget.saturating_sub(ELLIPSIS.len() + tail);

        let mut name = self.prefix.clone();
        name.extend(&chars[..head]);
        name.push_str(ELLIPSIS);
        name.extend(&chars[chars.len() - tail..]);
        name
    }
}
