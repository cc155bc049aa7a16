//! The work-unit currency of a generation.
//!
//! Tokens are keyed by (kind, payload), so duplicate units collapse; the
//! only mutable attribute is the `farmed` flag the assignment policy uses
//! to bias against redundant work.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use rand::seq::{IteratorRandom, SliceRandom};

use common::group;

/// Identity of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TokenKey {
    /// Map one input shard.
    Map { shard: String },

    /// Collect, sort and reduce every line carrying one of these prefixes.
    /// The prefix list is kept sorted so equal buckets collapse.
    Shuffle { prefixes: Vec<String> },
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKey::Map { shard } => write!(f, "map {shard}"),
            TokenKey::Shuffle { prefixes } => write!(f, "shuffle {}", prefixes.join("+")),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Token {
    pub farmed: bool,
}

pub type TokenSet = HashMap<TokenKey, Token>;

/// One map token per input shard.
pub fn map_tokens(shards: &[String]) -> TokenSet {
    shards
        .iter()
        .map(|shard| {
            (
                TokenKey::Map {
                    shard: shard.clone(),
                },
                Token::default(),
            )
        })
        .collect()
}

/// Bucket the observed partition prefixes into fixed-size shuffle units.
pub fn shuffle_tokens(keys: &BTreeSet<String>, keys_per_unit: usize) -> TokenSet {
    let sorted: Vec<String> = keys.iter().cloned().collect();
    group(&sorted, keys_per_unit)
        .into_iter()
        .map(|prefixes| (TokenKey::Shuffle { prefixes }, Token::default()))
        .collect()
}

/// Choose the next token for an idle worker and mark it farmed.
///
/// Unfarmed tokens are preferred, chosen arbitrarily; once everything has
/// been farmed at least once any remaining token is fair game again — this
/// is how a unit whose original worker died gets retried.
pub fn pick_token(tokens: &mut TokenSet) -> Option<TokenKey> {
    let mut rng = rand::thread_rng();

    let unfarmed: Vec<&TokenKey> = tokens
        .iter()
        .filter(|(_, token)| !token.farmed)
        .map(|(key, _)| key)
        .collect();

    let key = match unfarmed.choose(&mut rng) {
        Some(key) => (*key).clone(),
        None => tokens.keys().choose(&mut rng)?.clone(),
    };

    if let Some(token) = tokens.get_mut(&key) {
        token.farmed = true;
    }
    Some(key)
}
