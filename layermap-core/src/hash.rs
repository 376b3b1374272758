//! Deterministic identity hashing.
//!
//! Ids must be stable across processes and releases, so they use a fixed
//! FNV-1a rather than `std`'s randomly seeded hasher.

use layermap_extract::{EdgeKind, NodeKind};

use crate::types::{EdgeId, FileKey, NodeId};

const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const PRIME: u64 = 0x0100_0000_01b3;

/// 64-bit FNV-1a accumulator.
#[derive(Debug, Clone, Copy)]
pub struct Fnv64(u64);

impl Default for Fnv64 {
    fn default() -> Self {
        Self(OFFSET_BASIS)
    }
}

impl Fnv64 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= u64::from(b);
            self.0 = self.0.wrapping_mul(PRIME);
        }
    }

    /// Write a field followed by a separator byte that cannot occur in
    /// UTF-8 text, so `("ab", "c")` and `("a", "bc")` hash differently.
    pub fn field(&mut self, text: &str) -> &mut Self {
        self.write(text.as_bytes());
        self.write(&[0xff]);
        self
    }

    pub fn finish(&self) -> u64 {
        self.0
    }
}

/// Identity of a node: its kind's namespace plus its canonical signature.
pub fn node_id(kind: NodeKind, signature: &str) -> NodeId {
    let mut h = Fnv64::new();
    h.field(kind.identity_namespace()).field(signature);
    NodeId(h.finish())
}

/// Signature of the marker node recording a parse problem.
pub fn marker_signature(path: &str, line: u32) -> String {
    format!("{path}:{line}")
}

/// Identity of the marker node for a parse problem at `path:line`.
pub fn marker_id(path: &str, line: u32) -> NodeId {
    node_id(NodeKind::StubUnresolved, &marker_signature(path, line))
}

/// Identity of an edge: its endpoints and kind.
pub fn edge_id(source: NodeId, target: NodeId, kind: EdgeKind) -> EdgeId {
    let mut h = Fnv64::new();
    h.write(&source.0.to_be_bytes());
    h.write(&target.0.to_be_bytes());
    h.field(kind.as_str());
    EdgeId(h.finish())
}

/// Identity of one version of one source file.
pub fn file_key(path: &str, content: &str) -> FileKey {
    let mut h = Fnv64::new();
    h.field(&layermap_extract::normalize_path(path)).field(content);
    FileKey(format!("{:016x}", h.finish()))
}
