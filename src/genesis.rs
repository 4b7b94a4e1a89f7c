//! Genesis catalogs: node types, families and the board table.
//!
//! `Genesis::degenopoly()` is the deployed game. Node and family ids are
//! derived from labels so the same catalog always gets the same addresses.

use alloy_primitives::{Address, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

use crate::board::RawCase;
use crate::labeled_address;
use crate::nodes::{FamilyType, NodeType};
use crate::SECONDS_PER_DAY;

/// 1 token (18 decimals).
pub const ONE_TOKEN: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);
/// 0.001 token.
const MILLI_TOKEN: U256 = U256::from_limbs([1_000_000_000_000_000, 0, 0, 0]);

pub const CASE_START: u8 = 0;
pub const CASE_NEUTRAL: u8 = 1;
pub const CASE_SPECIAL: u8 = 2;
pub const CASE_NODE: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    pub nodes: Vec<NodeType>,
    pub families: Vec<FamilyType>,
    pub cases: Vec<RawCase>,
}

// (name, colour, daily reward in milli-tokens, price in tokens)
const NODES: [(&str, &str, u64, u64); 17] = [
    ("Indian Jeet City", "Brown", 5_250, 150),
    ("Honeypot Land", "Brown", 7_000, 200),
    ("St Exitscam", "Gray", 8_750, 250),
    ("Rug2Riches", "Gray", 10_500, 300),
    ("Softrug Boulevard", "Gray", 12_250, 350),
    ("Shitcoin Paradise", "Purple", 14_875, 425),
    ("Pleb VCC", "Purple", 16_625, 475),
    ("Ponzi Farm", "Orange", 21_000, 600),
    ("$er’s Castle", "Orange", 22_750, 650),
    ("Ape Territory", "Orange", 24_500, 700),
    ("ICO Graveyard", "Red", 30_625, 875),
    ("Dinocoins City", "Red", 32_375, 925),
    ("Moonshot Street", "Red", 34_125, 975),
    ("Liquidation Park", "Yello", 42_000, 1200),
    ("Gems Kingdom", "Yello", 43_750, 1250),
    ("Goblin Town", "Blue", 54_250, 1550),
    ("The Citadel", "Blue", 56_000, 1600),
];

// Colour strings are kept as deployed: "Grey"/"Yellow" families do not match
// the "Gray"/"Yello" nodes, so those two families cannot be bought.
const FAMILIES: [(&str, &str, u32); 7] = [
    ("Brown Family", "Brown", 12_500),
    ("Grey Family", "Grey", 15_000),
    ("Purple Family", "Purple", 17_500),
    ("Orange Family", "Orange", 20_000),
    ("Red Family", "Red", 22_500),
    ("Yellow Family", "Yellow", 25_000),
    ("Blue Family", "Blue", 30_000),
];

/// Board layout: `None` = plain case of the given type, `Some(i)` = offer of node `i`.
const BOARD: [(u8, Option<usize>); 24] = [
    (CASE_START, None),
    (CASE_NODE, Some(0)),
    (CASE_NEUTRAL, None),
    (CASE_NODE, Some(1)),
    (CASE_NODE, Some(2)),
    (CASE_NODE, Some(3)),
    (CASE_NODE, Some(4)),
    (CASE_NEUTRAL, None),
    (CASE_NODE, Some(5)),
    (CASE_NODE, Some(6)),
    (CASE_NODE, Some(7)),
    (CASE_NODE, Some(8)),
    (CASE_NODE, Some(9)),
    (CASE_NEUTRAL, None),
    (CASE_NODE, Some(10)),
    (CASE_NODE, Some(11)),
    (CASE_NODE, Some(12)),
    (CASE_NEUTRAL, None),
    (CASE_NODE, Some(13)),
    (CASE_SPECIAL, None),
    (CASE_NODE, Some(14)),
    (CASE_NEUTRAL, None),
    (CASE_NODE, Some(15)),
    (CASE_NODE, Some(16)),
];

pub fn node_id(index: usize) -> Address {
    labeled_address(&format!("degenopoly:node:{index}"))
}

pub fn family_id(index: usize) -> Address {
    labeled_address(&format!("degenopoly:family:{index}"))
}

impl Genesis {
    pub fn degenopoly() -> Self {
        let nodes = NODES
            .iter()
            .enumerate()
            .map(|(i, (name, color, daily_milli, price))| NodeType {
                id: node_id(i),
                name: (*name).to_string(),
                color: (*color).to_string(),
                reward_per_sec: U256::from(*daily_milli) * MILLI_TOKEN
                    / U256::from(SECONDS_PER_DAY),
                purchase_price: U256::from(*price) * ONE_TOKEN,
            })
            .collect();

        let families = FAMILIES
            .iter()
            .enumerate()
            .map(|(i, (name, color, boost))| FamilyType {
                id: family_id(i),
                name: (*name).to_string(),
                color: (*color).to_string(),
                reward_boost: *boost,
                purchase_price: U256::ZERO,
            })
            .collect();

        let cases = BOARD
            .iter()
            .map(|(case_type, node)| match node {
                Some(i) => RawCase::new(*case_type, node_id(*i).abi_encode()),
                None => RawCase::new(*case_type, vec![0u8]),
            })
            .collect();

        Self {
            nodes,
            families,
            cases,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{BoardCase, FlatEffect};
    use crate::nodes::NodeRegistry;
    use alloy_primitives::utils::parse_ether;

    #[test]
    fn test_fixture_shape() {
        let g = Genesis::degenopoly();
        assert_eq!(g.nodes.len(), 17);
        assert_eq!(g.families.len(), 7);
        assert_eq!(g.cases.len(), 24);
        assert_eq!(g.nodes[0].name, "Indian Jeet City");
        assert_eq!(g.nodes[0].purchase_price, parse_ether("150").unwrap());
        assert_eq!(
            g.nodes[5].reward_per_sec,
            parse_ether("14.875").unwrap() / U256::from(86_400u64)
        );
    }

    #[test]
    fn test_board_decodes_against_catalog() {
        let g = Genesis::degenopoly();
        let owner = Address::repeat_byte(0x01);
        let mut registry = NodeRegistry::new(Address::repeat_byte(0x11), owner, owner);
        for n in &g.nodes {
            registry.register_node_type(owner, n.clone()).unwrap();
        }
        let decoded: Vec<_> = g
            .cases
            .iter()
            .enumerate()
            .map(|(i, c)| BoardCase::decode(i, c, &registry).unwrap())
            .collect();
        assert_eq!(decoded[0], BoardCase::Start);
        assert_eq!(decoded[2], BoardCase::Neutral(FlatEffect::None));
        assert_eq!(
            decoded[23],
            BoardCase::NodeOffer {
                node: node_id(16),
                discount_bps: 0
            }
        );
    }

    #[test]
    fn test_genesis_json_round_trip() {
        let g = Genesis::degenopoly();
        let json = serde_json::to_string(&g).unwrap();
        let back: Genesis = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g);
    }
}
