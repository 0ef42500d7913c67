//! Device composition (page 0) as reported by a node.

use crate::ModelId;
use serde::{Deserialize, Serialize};

/// Optional features a node supports, from the composition data header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Features {
    /// Relay feature supported.
    pub relay: bool,
    /// GATT proxy feature supported.
    pub proxy: bool,
    /// Friend feature supported.
    pub friend: bool,
    /// Low power feature supported.
    pub low_power: bool,
}

impl Features {
    /// Decode the 16-bit feature bitmap.
    pub fn from_bits(bits: u16) -> Self {
        Self {
            relay: bits & 0x0001 != 0,
            proxy: bits & 0x0002 != 0,
            friend: bits & 0x0004 != 0,
            low_power: bits & 0x0008 != 0,
        }
    }

    /// Encode into the 16-bit feature bitmap.
    pub fn to_bits(self) -> u16 {
        (self.relay as u16)
            | (self.proxy as u16) << 1
            | (self.friend as u16) << 2
            | (self.low_power as u16) << 3
    }
}

/// One element of a composition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementComposition {
    /// GATT namespace location descriptor.
    pub location: u16,
    /// Models on this element, SIG models first.
    pub models: Vec<ModelId>,
}

impl ElementComposition {
    /// Whether the element carries a model.
    pub fn has_model(&self, model: ModelId) -> bool {
        self.models.contains(&model)
    }
}

/// Composition data page 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionData {
    /// Company identifier.
    pub company_id: u16,
    /// Vendor-assigned product identifier.
    pub product_id: u16,
    /// Vendor-assigned version identifier.
    pub version_id: u16,
    /// Minimum number of replay protection list entries.
    pub replay_cache: u16,
    /// Supported features.
    pub features: Features,
    /// Elements, primary first.
    pub elements: Vec<ElementComposition>,
}

impl CompositionData {
    /// Number of elements.
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Iterate over every (element index, model) pair.
    pub fn models(&self) -> impl Iterator<Item = (usize, ModelId)> + '_ {
        self.elements
            .iter()
            .enumerate()
            .flat_map(|(idx, e)| e.models.iter().map(move |m| (idx, *m)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_bits() {
        let f = Features::from_bits(0x0007);
        assert!(f.relay && f.proxy && f.friend);
        assert!(!f.low_power);
        assert_eq!(f.to_bits(), 0x0007);
    }
}
