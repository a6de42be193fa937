//! Introspection of an arena's current block partition.

use serde::Serialize;

/// One entry of the address-ordered arena partition.
///
/// `size` is the block's full footprint: header plus payload for occupied
/// blocks, the whole span for free regions. Footprints of a snapshot
/// always sum to the arena capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    pub size: usize,
    pub occupied: bool,
}

impl BlockInfo {
    pub fn occupied(size: usize) -> Self {
        Self {
            size,
            occupied: true,
        }
    }

    pub fn free(size: usize) -> Self {
        Self {
            size,
            occupied: false,
        }
    }
}

/// Allocators that can report their block partition.
pub trait Introspect {
    /// Address-ordered partition of the arena; never mutates state.
    fn blocks_info(&self) -> Vec<BlockInfo>;
}

/// Renders a partition the way log snapshots print it:
/// `<occup><100> | <avail><32> | `.
pub fn blocks_to_string(blocks: &[BlockInfo]) -> String {
    let mut out = String::new();
    for block in blocks {
        let tag = if block.occupied { "<occup>" } else { "<avail>" };
        out.push_str(tag);
        out.push_str(&format!("<{}> | ", block.size));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_to_string_format() {
        let blocks = [BlockInfo::occupied(100), BlockInfo::free(32)];
        assert_eq!(blocks_to_string(&blocks), "<occup><100> | <avail><32> | ");
    }

    #[test]
    fn test_block_info_serializes() {
        let json = serde_json::to_string(&BlockInfo::free(16)).unwrap();
        assert_eq!(json, r#"{"size":16,"occupied":false}"#);
    }
}
