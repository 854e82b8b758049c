//! HPACK header compression (§4.2), the reference-set variant this
//! draft uses rather than RFC 7541's final stateless design: an indexed
//! header field toggles membership in a working "reference set" instead
//! of emitting the header outright, and a peer's decoder must replay
//! that same toggle bookkeeping to reconstruct the header list. Grounded
//! on `original_source/satori/hpack.py`'s `HTTP2Codec` (`compute_diff`,
//! `encode_header`, `decode_headers`), adapted into separate `Encoder`
//! and `Decoder` types the way `Atte-http2`'s `hpack.rs` splits them,
//! each owning one dynamic table instead of one codec owning both sides.

mod huffman;

use std::collections::VecDeque;

use crate::types::HeaderList;

#[derive(thiserror::Error, Debug, Clone)]
pub enum HpackError {
    #[error("huffman decode error: {0}")]
    Huffman(String),
    #[error("truncated HPACK block")]
    Truncated,
    #[error("header index {0} is out of bounds")]
    InvalidIndex(usize),
    #[error("header value is not valid UTF-8")]
    InvalidUtf8,
}

/// RFC 7541 Appendix A's 61-entry static table. This draft places the
/// dynamic table *before* the static table in the combined index space
/// (`original_source/satori/hpack.py::get_decoder_index_space_entry`),
/// unlike the final RFC where static entries occupy indices 1..=61 and
/// the dynamic table starts at 62.
#[rustfmt::skip]
const STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""), (":method", "GET"), (":method", "POST"),
    (":path", "/"), (":path", "/index.html"), (":scheme", "http"),
    (":scheme", "https"), (":status", "200"), (":status", "204"),
    (":status", "206"), (":status", "304"), (":status", "400"),
    (":status", "404"), (":status", "500"), ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"), ("accept-language", ""), ("accept-ranges", ""),
    ("accept", ""), ("access-control-allow-origin", ""), ("age", ""),
    ("allow", ""), ("authorization", ""), ("cache-control", ""),
    ("content-disposition", ""), ("content-encoding", ""), ("content-language", ""),
    ("content-length", ""), ("content-location", ""), ("content-range", ""),
    ("content-type", ""), ("cookie", ""), ("date", ""),
    ("etag", ""), ("expect", ""), ("expires", ""),
    ("from", ""), ("host", ""), ("if-match", ""),
    ("if-modified-since", ""), ("if-none-match", ""), ("if-range", ""),
    ("if-unmodified-since", ""), ("last-modified", ""), ("link", ""),
    ("location", ""), ("max-forwards", ""), ("proxy-authenticate", ""),
    ("proxy-authorization", ""), ("range", ""), ("referer", ""),
    ("refresh", ""), ("retry-after", ""), ("server", ""),
    ("set-cookie", ""), ("strict-transport-security", ""), ("transfer-encoding", ""),
    ("user-agent", ""), ("vary", ""), ("via", ""),
    ("www-authenticate", ""),
];

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    value: String,
    referenced: bool,
    emitted: bool,
}

impl Entry {
    fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }
}

/// The dynamic table plus reference-set bookkeeping shared by `Encoder`
/// and `Decoder`. Entries are inserted at the front and evicted from the
/// back once `current_size` would exceed `max_size` (§4.2 "entry size is
/// name length + value length + 32").
#[derive(Debug, Clone)]
struct Table {
    max_size: usize,
    current_size: usize,
    entries: VecDeque<Entry>,
}

impl Table {
    fn new(max_size: usize) -> Self {
        Self {
            max_size,
            current_size: 0,
            entries: VecDeque::new(),
        }
    }

    fn resize(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to_fit(0);
    }

    fn evict_to_fit(&mut self, incoming: usize) {
        while self.current_size + incoming > self.max_size {
            match self.entries.pop_back() {
                Some(removed) => self.current_size -= removed.size(),
                None => break,
            }
        }
    }

    /// Insert at the front, evicting from the back as needed. Returns
    /// `false` if the entry alone exceeds `max_size` and so was dropped
    /// without being stored (§4.2 "an entry larger than the table never
    /// enters it").
    fn prepend(&mut self, entry: Entry) -> bool {
        let size = entry.size();
        self.evict_to_fit(size);
        if self.current_size + size > self.max_size {
            return false;
        }
        self.current_size += size;
        self.entries.push_front(entry);
        true
    }

    fn combined_len(&self) -> usize {
        self.entries.len() + STATIC_TABLE.len()
    }

    /// 1-based lookup across the combined dynamic-then-static index space.
    fn header_at(&self, index: usize) -> Option<(&str, &str)> {
        if index == 0 {
            return None;
        }
        if index <= self.entries.len() {
            let e = &self.entries[index - 1];
            Some((e.name.as_str(), e.value.as_str()))
        } else {
            STATIC_TABLE
                .get(index - self.entries.len() - 1)
                .copied()
        }
    }

    fn find(&self, name: &str, value: &str) -> Option<usize> {
        for (i, e) in self.entries.iter().enumerate() {
            if e.name == name && e.value == value {
                return Some(i + 1);
            }
        }
        STATIC_TABLE
            .iter()
            .position(|&(n, v)| n == name && v == value)
            .map(|i| i + self.entries.len() + 1)
    }

    fn find_name(&self, name: &str) -> Option<usize> {
        for (i, e) in self.entries.iter().enumerate() {
            if e.name == name {
                return Some(i + 1);
            }
        }
        STATIC_TABLE
            .iter()
            .position(|&(n, _)| n == name)
            .map(|i| i + self.entries.len() + 1)
    }

    fn is_dynamic_index(&self, index: usize) -> bool {
        index >= 1 && index <= self.entries.len()
    }
}

fn write_integer(out: &mut Vec<u8>, prefix_flag: u8, prefix_bits: u8, mut value: usize) {
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        out.push(prefix_flag | value as u8);
        return;
    }
    out.push(prefix_flag | max_prefix as u8);
    value -= max_prefix;
    while value >= 0x80 {
        out.push(((value & 0x7f) | 0x80) as u8);
        value >>= 7;
    }
    out.push(value as u8);
}

fn read_integer(input: &[u8], pos: &mut usize, first_byte: u8, prefix_bits: u8) -> Result<usize, HpackError> {
    let max_prefix = (1usize << prefix_bits) - 1;
    let mut value = (first_byte as usize) & max_prefix;
    if value < max_prefix {
        return Ok(value);
    }
    let mut shift = 0u32;
    loop {
        let b = *input.get(*pos).ok_or(HpackError::Truncated)?;
        *pos += 1;
        value += ((b & 0x7f) as usize) << shift;
        shift += 7;
        if b & 0x80 == 0 {
            break;
        }
    }
    Ok(value)
}

fn write_literal_string(out: &mut Vec<u8>, value: &str) {
    let huffman_len = huffman::encoded_len(value.as_bytes());
    if huffman_len < value.len() {
        write_integer(out, 0x80, 7, huffman_len);
        out.extend_from_slice(&huffman::encode(value.as_bytes()));
    } else {
        write_integer(out, 0x00, 7, value.len());
        out.extend_from_slice(value.as_bytes());
    }
}

fn read_literal_string(input: &[u8], pos: &mut usize) -> Result<String, HpackError> {
    let first = *input.get(*pos).ok_or(HpackError::Truncated)?;
    *pos += 1;
    let huffman_flag = first & 0x80 != 0;
    let len = read_integer(input, pos, first, 7)?;
    let raw = input.get(*pos..*pos + len).ok_or(HpackError::Truncated)?;
    *pos += len;
    let bytes = if huffman_flag {
        huffman::decode(raw)?.to_vec()
    } else {
        raw.to_vec()
    };
    String::from_utf8(bytes).map_err(|_| HpackError::InvalidUtf8)
}

/// Encodes header lists against a private dynamic table and reference
/// set. One `Encoder` belongs to exactly one direction of one
/// connection's header stream — it is not safe to share across streams.
#[derive(Debug, Clone)]
pub struct Encoder {
    table: Table,
}

impl Encoder {
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            table: Table::new(max_size),
        }
    }

    pub fn set_max_size(&mut self, max_size: usize) {
        self.table.resize(max_size);
    }

    /// Encode `headers`, updating the reference set and dynamic table in
    /// place (§4.2). Mirrors `compute_diff` / `encode_headers` from the
    /// original codec: headers already in the reference set are left
    /// alone, headers that fell out get toggled off, and new headers are
    /// emitted as indexed/literal fields and folded into the table.
    pub fn encode(&mut self, headers: &HeaderList) -> Vec<u8> {
        for e in &mut self.table.entries {
            e.emitted = false;
        }

        let mut referenced_headers: Vec<(String, String)> = Vec::new();
        let mut remaining_headers: Vec<(String, String)> = Vec::new();

        for (name, value) in headers {
            match self.table.find(name, value) {
                Some(index) if self.table.is_dynamic_index(index) => {
                    let entry = &mut self.table.entries[index - 1];
                    if entry.referenced {
                        entry.emitted = true;
                        referenced_headers.push((name.clone(), value.clone()));
                    } else {
                        remaining_headers.push((name.clone(), value.clone()));
                    }
                }
                _ => remaining_headers.push((name.clone(), value.clone())),
            }
        }

        let mut removed_indices = Vec::new();
        for (i, e) in self.table.entries.iter_mut().enumerate() {
            if e.referenced {
                if e.emitted {
                    e.emitted = false;
                } else {
                    removed_indices.push(i + 1);
                }
            }
        }

        let mut out = Vec::new();
        for index in removed_indices {
            write_integer(&mut out, 0x80, 7, index);
            self.table.entries[index - 1].referenced = false;
            self.table.entries[index - 1].emitted = false;
        }

        for (name, value) in &remaining_headers {
            self.encode_header(&mut out, name, value);
        }

        loop {
            let mut progressed = false;
            let mut still_referenced = Vec::new();
            for (name, value) in referenced_headers.drain(..) {
                if self.table.find(&name, &value).is_none() {
                    self.encode_header(&mut out, &name, &value);
                    progressed = true;
                } else {
                    still_referenced.push((name, value));
                }
            }
            referenced_headers = still_referenced;
            if !progressed || referenced_headers.is_empty() {
                break;
            }
        }

        out
    }

    fn encode_header(&mut self, out: &mut Vec<u8>, name: &str, value: &str) {
        if let Some(index) = self.table.find(name, value) {
            write_integer(out, 0x80, 7, index);
            if self.table.is_dynamic_index(index) {
                let entry = &mut self.table.entries[index - 1];
                entry.referenced = true;
                entry.emitted = true;
            }
            return;
        }

        let name_index = self.table.find_name(name);

        // `:path` is high-cardinality and must never enter the dynamic
        // table (§4.2 Supplemented Features, following the original
        // codec's `determine_representation`).
        if name == ":path" {
            match name_index {
                Some(ni) => write_integer(out, 0x40, 6, ni),
                None => {
                    write_integer(out, 0x40, 6, 0);
                    write_literal_string(out, name);
                }
            }
            write_literal_string(out, value);
            return;
        }

        match name_index {
            Some(ni) => write_integer(out, 0x00, 6, ni),
            None => {
                write_integer(out, 0x00, 6, 0);
                write_literal_string(out, name);
            }
        }
        write_literal_string(out, value);

        self.table.prepend(Entry {
            name: name.to_string(),
            value: value.to_string(),
            referenced: true,
            emitted: true,
        });
    }
}

/// Decodes header blocks against a private dynamic table and reference
/// set, the mirror image of `Encoder`.
#[derive(Debug, Clone)]
pub struct Decoder {
    table: Table,
}

impl Decoder {
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            table: Table::new(max_size),
        }
    }

    pub fn set_max_size(&mut self, max_size: usize) {
        self.table.resize(max_size);
    }

    /// Decode one header block fragment's worth of bytes into the header
    /// list it contributes, applying reference-set toggles along the way
    /// and emitting headers still referenced but not re-touched at the
    /// end (`original_source/satori/hpack.py::decode_headers`).
    pub fn decode(&mut self, input: &[u8]) -> Result<HeaderList, HpackError> {
        for e in &mut self.table.entries {
            e.emitted = false;
        }

        let mut headers = HeaderList::new();
        let mut pos = 0;

        while pos < input.len() {
            let byte = input[pos];
            pos += 1;

            if byte & 0x80 != 0 {
                let index = read_integer(input, &mut pos, byte, 7)?;
                if index == 0 {
                    for e in &mut self.table.entries {
                        e.referenced = false;
                    }
                    continue;
                }
                let (name, value) = self
                    .table
                    .header_at(index)
                    .map(|(n, v)| (n.to_string(), v.to_string()))
                    .ok_or(HpackError::InvalidIndex(index))?;
                if self.table.is_dynamic_index(index) {
                    let entry = &mut self.table.entries[index - 1];
                    if entry.referenced {
                        entry.referenced = false;
                        entry.emitted = false;
                        continue;
                    }
                    entry.referenced = true;
                    entry.emitted = true;
                }
                headers.push((name, value));
            } else {
                let incremental = byte & 0xc0 == 0x00;
                let name_index = read_integer(input, &mut pos, byte, 6)?;
                let name = if name_index == 0 {
                    read_literal_string(input, &mut pos)?
                } else {
                    self.table
                        .header_at(name_index)
                        .map(|(n, _)| n.to_string())
                        .ok_or(HpackError::InvalidIndex(name_index))?
                };
                let value = read_literal_string(input, &mut pos)?;

                if incremental {
                    self.table.prepend(Entry {
                        name: name.clone(),
                        value: value.clone(),
                        referenced: true,
                        emitted: true,
                    });
                }
                headers.push((name, value));
            }
        }

        for e in &self.table.entries {
            if e.referenced && !e.emitted {
                headers.push((e.name.clone(), e.value.clone()));
            }
        }

        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hl(pairs: &[(&str, &str)]) -> HeaderList {
        pairs.iter().map(|&(n, v)| (n.to_string(), v.to_string())).collect()
    }

    #[test]
    fn roundtrip_single_request() {
        let mut enc = Encoder::with_max_size(4096);
        let mut dec = Decoder::with_max_size(4096);
        let headers = hl(&[(":method", "GET"), (":path", "/"), (":scheme", "https")]);
        let wire = enc.encode(&headers);
        let decoded = dec.decode(&wire).unwrap();
        assert_eq!(decoded, headers);
    }

    #[test]
    fn reference_set_elides_unchanged_headers_on_second_request() {
        let mut enc = Encoder::with_max_size(4096);
        let mut dec = Decoder::with_max_size(4096);
        let first = hl(&[(":method", "GET"), (":path", "/a"), ("user-agent", "curl/8")]);
        let second = hl(&[(":method", "GET"), (":path", "/a"), ("user-agent", "curl/8")]);

        let wire1 = enc.encode(&first);
        let decoded1 = dec.decode(&wire1).unwrap();
        assert_eq!(decoded1, first);

        let wire2 = enc.encode(&second);
        let decoded2 = dec.decode(&wire2).unwrap();
        assert_eq!(decoded2, second);
        // Nothing changed between requests: the wire form should shrink
        // to (at most) toggling, never re-emitting unchanged literals.
        assert!(wire2.len() <= wire1.len());
    }

    #[test]
    fn changing_one_header_keeps_others_referenced() {
        let mut enc = Encoder::with_max_size(4096);
        let mut dec = Decoder::with_max_size(4096);
        let first = hl(&[(":method", "GET"), (":path", "/a"), ("user-agent", "curl/8")]);
        let second = hl(&[(":method", "GET"), (":path", "/b"), ("user-agent", "curl/8")]);

        dec.decode(&enc.encode(&first)).unwrap();
        let decoded2 = dec.decode(&enc.encode(&second)).unwrap();
        assert_eq!(decoded2, second);
    }

    #[test]
    fn path_is_never_added_to_the_dynamic_table() {
        let mut enc = Encoder::with_max_size(4096);
        enc.encode(&hl(&[(":path", "/unique-one")]));
        enc.encode(&hl(&[(":path", "/unique-two")]));
        assert!(enc.table.find(":path", "/unique-one").is_none() || {
            let idx = enc.table.find(":path", "/unique-one").unwrap();
            !enc.table.is_dynamic_index(idx)
        });
    }

    #[test]
    fn dynamic_table_evicts_oldest_entries_under_pressure() {
        let mut enc = Encoder::with_max_size(64);
        for i in 0..20 {
            enc.encode(&hl(&[("x-seq", &i.to_string())]));
        }
        assert!(enc.table.current_size <= enc.table.max_size);
    }

    #[test]
    fn integer_prefix_roundtrip_small_and_large() {
        for &(prefix_bits, value) in &[(7u8, 5usize), (7, 127), (7, 128), (7, 1337), (6, 61), (6, 62)] {
            let mut out = Vec::new();
            write_integer(&mut out, 0, prefix_bits, value);
            let mut pos = 1;
            let decoded = read_integer(&out, &mut pos, out[0], prefix_bits).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(pos, out.len());
        }
    }

    #[test]
    fn static_table_lookup_matches_known_entries() {
        let table = Table::new(4096);
        assert_eq!(table.header_at(1 + table.entries.len()), Some((":authority", "")));
        assert_eq!(table.find(":method", "GET"), Some(2));
    }
}
