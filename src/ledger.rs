//! Binary layout of the candy machine account
//!
//! The account is a header of `CONFIG_ARRAY_START` bytes, a little-endian
//! `u32` count of written lines, then fixed-size config lines:
//!
//! | Bytes in line | Content |
//! |---------------|---------|
//! | `2..34` | name, UTF-8, zero padded |
//! | `40..240` | uri, UTF-8, zero padded |
//!
//! These offsets are shared with the on-chain program and must not change.

use crate::error::{DeployError, DeployResult};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Offset of the line count within the account data
pub const CONFIG_ARRAY_START: usize = 8 // discriminator
    + 32 // authority
    + 32 // wallet
    + 33 // token mint option
    + 4 + 6 // uuid
    + 8 // price
    + 8 // items available
    + 9 // go live date option
    + 10 // end settings option
    + 4 + MAX_SYMBOL_LENGTH
    + 2 // seller fee basis points
    + 4 + MAX_CREATOR_LIMIT * MAX_CREATOR_LEN
    + 8 // max supply
    + 1 // is mutable
    + 1 // retain authority
    + 1 // hidden settings option
    + 4 + MAX_NAME_LENGTH
    + 4 + MAX_URI_LENGTH
    + 32 // hidden settings hash
    + 4 // max number of lines
    + 8 // items redeemed
    + 1 // whitelist option
    + 1 // whitelist mode
    + 1 // presale
    + 9 // discount price option
    + 32 // whitelist mint
    + 1 + 32 + 1; // gatekeeper option

/// Size of one config line
pub const CONFIG_LINE_SIZE: usize = 4 + MAX_NAME_LENGTH + 4 + MAX_URI_LENGTH;

pub const MAX_NAME_LENGTH: usize = 32;
pub const MAX_URI_LENGTH: usize = 200;
pub const MAX_SYMBOL_LENGTH: usize = 10;
pub const MAX_CREATOR_LIMIT: usize = 5;
pub const MAX_CREATOR_LEN: usize = 32 + 1 + 1;

const NAME_RANGE: Range<usize> = 2..2 + MAX_NAME_LENGTH;
const URI_RANGE: Range<usize> = 40..40 + MAX_URI_LENGTH;
const COUNT_LEN: usize = 4;

/// One decoded config line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigLine {
    pub name: String,
    pub uri: String,
}

impl ConfigLine {
    /// Build a line, truncating both fields to their on-chain width
    pub fn new(name: &str, uri: &str) -> Self {
        Self {
            name: truncate_utf8(name, MAX_NAME_LENGTH).to_string(),
            uri: truncate_utf8(uri, MAX_URI_LENGTH).to_string(),
        }
    }
}

/// Longest prefix of `s` within `max` bytes that ends on a char boundary
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Decoded view of a fetched candy machine account
#[derive(Debug, Clone)]
pub struct LedgerAccount {
    data: Vec<u8>,
    line_count: u32,
}

impl LedgerAccount {
    /// Wrap raw account bytes, decoding the line count
    pub fn from_bytes(data: Vec<u8>) -> DeployResult<Self> {
        let line_count = line_count(&data)?;
        Ok(Self { data, line_count })
    }

    /// Config lines written so far
    pub fn line_count(&self) -> u32 {
        self.line_count
    }

    /// Number of lines the allocation can hold
    pub fn capacity(&self) -> u32 {
        let body = self.data.len().saturating_sub(CONFIG_ARRAY_START + COUNT_LEN);
        (body / CONFIG_LINE_SIZE) as u32
    }

    /// Decode the line at `index`
    pub fn line(&self, index: u32) -> DeployResult<ConfigLine> {
        decode_line(&self.data, index)
    }
}

/// Byte range of line `index` within the account data
pub fn line_range(index: u32) -> Range<usize> {
    let start = CONFIG_ARRAY_START + COUNT_LEN + CONFIG_LINE_SIZE * index as usize;
    start..start + CONFIG_LINE_SIZE
}

/// Decode the little-endian line count at the array start
pub fn line_count(data: &[u8]) -> DeployResult<u32> {
    let bytes = slice(data, CONFIG_ARRAY_START..CONFIG_ARRAY_START + COUNT_LEN)?;
    let mut count = [0u8; COUNT_LEN];
    count.copy_from_slice(bytes);
    Ok(u32::from_le_bytes(count))
}

/// Decode the name and uri of line `index`
pub fn decode_line(data: &[u8], index: u32) -> DeployResult<ConfigLine> {
    let line = slice(data, line_range(index))?;
    Ok(ConfigLine {
        name: decode_field(&line[NAME_RANGE]),
        uri: decode_field(&line[URI_RANGE]),
    })
}

/// Encode a line into its fixed-size on-chain form
pub fn encode_line(line: &ConfigLine) -> [u8; CONFIG_LINE_SIZE] {
    let mut out = [0u8; CONFIG_LINE_SIZE];
    let name = truncate_utf8(&line.name, MAX_NAME_LENGTH).as_bytes();
    let uri = truncate_utf8(&line.uri, MAX_URI_LENGTH).as_bytes();
    out[NAME_RANGE.start..NAME_RANGE.start + name.len()].copy_from_slice(name);
    out[URI_RANGE.start..URI_RANGE.start + uri.len()].copy_from_slice(uri);
    out
}

/// Write line `index` in place
pub fn write_line(data: &mut [u8], index: u32, line: &ConfigLine) -> DeployResult<()> {
    let range = line_range(index);
    let actual = data.len();
    let target = data.get_mut(range.clone()).ok_or(DeployError::MalformedRecord {
        needed: range.end,
        actual,
    })?;
    target.copy_from_slice(&encode_line(line));
    Ok(())
}

/// Overwrite the line count
pub fn set_line_count(data: &mut [u8], count: u32) -> DeployResult<()> {
    let actual = data.len();
    let end = CONFIG_ARRAY_START + COUNT_LEN;
    let target = data
        .get_mut(CONFIG_ARRAY_START..end)
        .ok_or(DeployError::MalformedRecord { needed: end, actual })?;
    target.copy_from_slice(&count.to_le_bytes());
    Ok(())
}

/// Bytes to allocate for a candy machine holding `items` lines
pub fn account_size(items: u32, hidden: bool) -> usize {
    if hidden {
        return CONFIG_ARRAY_START;
    }
    let items = items as usize;
    // line storage, mint counter, and the two mint-order bitmasks
    CONFIG_ARRAY_START + COUNT_LEN + items * CONFIG_LINE_SIZE + 8 + 2 * (items / 8 + 1)
}

fn slice(data: &[u8], range: Range<usize>) -> DeployResult<&[u8]> {
    data.get(range.clone()).ok_or(DeployError::MalformedRecord {
        needed: range.end,
        actual: data.len(),
    })
}

/// Zero padding (and the high bytes of a length prefix) are not content
fn decode_field(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_matches('\0').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn account_with(lines: &[ConfigLine]) -> Vec<u8> {
        let mut data = vec![0u8; account_size(lines.len() as u32, false)];
        for (i, line) in lines.iter().enumerate() {
            write_line(&mut data, i as u32, line).unwrap();
        }
        set_line_count(&mut data, lines.len() as u32).unwrap();
        data
    }

    #[test]
    fn layout_constants() {
        assert_eq!(CONFIG_ARRAY_START, 713);
        assert_eq!(CONFIG_LINE_SIZE, 240);
        assert_eq!(line_range(0), 717..957);
        assert_eq!(line_range(2), 1197..1437);
    }

    #[test]
    fn decodes_count_and_lines() {
        let lines = vec![
            ConfigLine::new("Item #0", "https://arweave.net/a"),
            ConfigLine::new("Item #1", "https://arweave.net/b"),
        ];
        let account = LedgerAccount::from_bytes(account_with(&lines)).unwrap();

        assert_eq!(account.line_count(), 2);
        assert_eq!(account.capacity(), 2);
        assert_eq!(account.line(1).unwrap(), lines[1]);
    }

    #[test]
    fn name_sits_at_fixed_offsets() {
        let encoded = encode_line(&ConfigLine::new("ab", "u"));
        assert_eq!(&encoded[2..4], b"ab");
        assert_eq!(encoded[40], b'u');
        assert!(encoded[4..40].iter().all(|b| *b == 0));
    }

    #[test]
    fn short_blob_is_malformed() {
        let err = LedgerAccount::from_bytes(vec![0u8; 100]).unwrap_err();
        assert!(matches!(err, DeployError::MalformedRecord { needed: 717, actual: 100 }));

        let data = account_with(&[ConfigLine::new("only", "one")]);
        let err = decode_line(&data, 5).unwrap_err();
        assert!(matches!(err, DeployError::MalformedRecord { .. }));
    }

    #[test]
    fn truncates_on_char_boundary() {
        let name = "é".repeat(20); // 40 bytes
        let line = ConfigLine::new(&name, "u");
        assert_eq!(line.name.len(), 32);
        assert_eq!(line.name, "é".repeat(16));
    }

    #[test]
    fn hidden_settings_allocate_header_only() {
        assert_eq!(account_size(1000, true), CONFIG_ARRAY_START);
        assert_eq!(account_size(3, false), 717 + 3 * 240 + 8 + 2);
    }

    #[test]
    fn full_width_fields_round_trip() {
        let line = ConfigLine::new(&"n".repeat(MAX_NAME_LENGTH), &"u".repeat(MAX_URI_LENGTH));
        assert_eq!(line.name.len(), 32);
        assert_eq!(line.uri.len(), 200);

        let mut data = vec![0u8; account_size(2, false)];
        write_line(&mut data, 1, &line).unwrap();
        assert_eq!(decode_line(&data, 1).unwrap(), line);
        assert_eq!(decode_line(&data, 0).unwrap(), ConfigLine::new("", ""));
    }

    proptest! {
        /// Any name and uri that fit their fields survive encode then decode.
        #[test]
        fn line_round_trip(name in "[ -~]{0,32}", uri in "[a-zA-Z0-9:/._-]{0,200}") {
            prop_assert!(name.len() <= MAX_NAME_LENGTH);
            let line = ConfigLine { name, uri };
            let mut data = vec![0u8; account_size(1, false)];
            write_line(&mut data, 0, &line).unwrap();
            prop_assert_eq!(decode_line(&data, 0).unwrap(), line);
        }

        #[test]
        fn multibyte_names_round_trip(name in "[^\u{0}]{0,10}") {
            prop_assume!(name.len() <= MAX_NAME_LENGTH);
            let line = ConfigLine { name, uri: "u".to_string() };
            let mut data = vec![0u8; account_size(1, false)];
            write_line(&mut data, 0, &line).unwrap();
            prop_assert_eq!(decode_line(&data, 0).unwrap(), line);
        }
    }
}
