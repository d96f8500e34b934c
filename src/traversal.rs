//! Deterministic synthetic link-graph traversal.
//!
//! Child nodes are derived purely from the parent state, so the whole
//! graph is a function of the token and needs no server-side bookkeeping.
//! Depth is bounded: states at the maximum depth yield no children and
//! the caller renders a terminal page.

use crate::token::{TokenCodec, TraversalState};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Hex chars kept from a derived child seed.
const CHILD_SEED_LEN: usize = 12;
/// Hex chars kept from a fresh root seed.
const ROOT_SEED_LEN: usize = 10;

/// Derives child tokens and fresh roots for the synthetic graph.
pub struct TraversalGenerator {
    codec: Arc<TokenCodec>,
    max_depth: u32,
    links_per_page: u32,
}

impl TraversalGenerator {
    pub fn new(codec: Arc<TokenCodec>, max_depth: u32, links_per_page: u32) -> Self {
        Self {
            codec,
            max_depth,
            links_per_page,
        }
    }

    /// Whether a state has reached the depth bound.
    pub fn is_terminal(&self, state: &TraversalState) -> bool {
        state.depth >= self.max_depth
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Mint a fresh root state with a random seed.
    ///
    /// The chain starts as the seed itself; children extend it with
    /// slash-joined segments.
    pub fn root(&self) -> TraversalState {
        let entropy: [u8; 16] = rand::random();
        let seed = hex::encode(Sha256::digest(entropy))[..ROOT_SEED_LEN].to_string();
        TraversalState {
            chain: seed.clone(),
            seed,
            depth: 0,
            index: 0,
        }
    }

    /// Encode any state into a signed token.
    pub fn token_for(&self, state: &TraversalState) -> String {
        self.codec.encode(state)
    }

    /// Signed tokens for a state's children, in sibling order.
    ///
    /// Empty at the depth bound; exactly `links_per_page` otherwise.
    /// Identical input states always yield byte-identical sequences.
    pub fn children(&self, state: &TraversalState) -> Vec<String> {
        if self.is_terminal(state) {
            return Vec::new();
        }

        (0..self.links_per_page)
            .map(|index| {
                let seed = derive_child_seed(&state.seed, state.depth, index);
                let chain = format!("{}/{}", state.chain, seed);
                self.codec.encode(&TraversalState {
                    seed,
                    depth: state.depth + 1,
                    index,
                    chain,
                })
            })
            .collect()
    }
}

/// `SHA256("{seed}:{depth}:{index}")` truncated to a fixed hex prefix.
fn derive_child_seed(seed: &str, depth: u32, index: u32) -> String {
    let digest = Sha256::digest(format!("{seed}:{depth}:{index}").as_bytes());
    hex::encode(digest)[..CHILD_SEED_LEN].to_string()
}
