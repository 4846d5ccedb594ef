//! Which catalog results contribute to a composite.

use crate::io::stac::StacItem;
use serde::{Deserialize, Serialize};

/// Picks the items to composite from catalog results (in catalog order).
pub trait SceneSelector: Send + Sync {
    fn select(&self, items: Vec<StacItem>) -> Vec<StacItem>;
}

/// First result in catalog order wins; no ranking.
pub struct FirstMatch;

impl SceneSelector for FirstMatch {
    fn select(&self, items: Vec<StacItem>) -> Vec<StacItem> {
        items.into_iter().take(1).collect()
    }
}

/// Every result contributes to the temporal mean.
pub struct AllMatches;

impl SceneSelector for AllMatches {
    fn select(&self, items: Vec<StacItem>) -> Vec<StacItem> {
        items
    }
}

/// Configurable selection policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    #[default]
    First,
    All,
}

impl SelectionPolicy {
    pub fn selector(self) -> Box<dyn SceneSelector> {
        match self {
            SelectionPolicy::First => Box::new(FirstMatch),
            SelectionPolicy::All => Box::new(AllMatches),
        }
    }
}
