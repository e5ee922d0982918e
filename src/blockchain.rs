use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CrawlerError;

/// Chains the crawler can label. Each one has its own RPC endpoint and its own
/// set of tables in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Blockchain {
    Ethereum,
    Polygon,
    Mumbai,
    Xdai,
}

impl Blockchain {
    pub const ALL: [Blockchain; 4] = [
        Blockchain::Ethereum,
        Blockchain::Polygon,
        Blockchain::Mumbai,
        Blockchain::Xdai,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Blockchain::Ethereum => "ethereum",
            Blockchain::Polygon => "polygon",
            Blockchain::Mumbai => "mumbai",
            Blockchain::Xdai => "xdai",
        }
    }

    pub fn labels_table(&self) -> String {
        format!("{}_labels", self.as_str())
    }

    pub fn blocks_table(&self) -> String {
        format!("{}_blocks", self.as_str())
    }

    pub fn transactions_table(&self) -> String {
        format!("{}_transactions", self.as_str())
    }
}

impl fmt::Display for Blockchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Blockchain {
    type Err = CrawlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ethereum" => Ok(Blockchain::Ethereum),
            "polygon" => Ok(Blockchain::Polygon),
            "mumbai" => Ok(Blockchain::Mumbai),
            "xdai" => Ok(Blockchain::Xdai),
            other => Err(CrawlerError::Config(format!("Unknown blockchain: {}", other))),
        }
    }
}
