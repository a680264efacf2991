use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::common::crypto::{digest, Digest, Hashable};

/// A piece of news. Two items with the same title are the same item,
/// whatever sequence number they carry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub sequence: Option<u64>,
}

impl NewsItem {
    pub fn new(title: impl Into<String>) -> Self {
        NewsItem {
            title: title.into(),
            sequence: None,
        }
    }

    pub fn sequenced(title: impl Into<String>, sequence: u64) -> Self {
        NewsItem {
            title: title.into(),
            sequence: Some(sequence),
        }
    }

    pub fn with_sequence(&self, sequence: u64) -> Self {
        NewsItem {
            title: self.title.clone(),
            sequence: Some(sequence),
        }
    }
}

impl PartialEq for NewsItem {
    fn eq(&self, other: &Self) -> bool {
        self.title == other.title
    }
}

impl Eq for NewsItem {}

impl Hash for NewsItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.title.hash(state);
    }
}

impl Hashable for NewsItem {
    fn digest(&self) -> Digest {
        digest(self.title.as_bytes())
    }
}

impl fmt::Display for NewsItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sequence {
            Some(sequence) => write!(f, "{}#{}", self.title, sequence),
            None => write!(f, "{}#-", self.title),
        }
    }
}
