use serde::{Deserialize, Serialize};

/// A forum whose topic listings are ingested. Seeded from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub url: String,
    pub name: String,
    pub tier: u8,
}

impl Source {
    /// Listing endpoint for one page of the source's latest topics.
    pub fn listing_url(&self, page: u32) -> String {
        format!("{}/latest.json?page={}", self.url.trim_end_matches('/'), page)
    }
}

/// Seed entry as written in `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub url: String,
    pub name: String,
    #[serde(default = "default_tier")]
    pub tier: u8,
}

fn default_tier() -> u8 {
    3
}

impl From<SourceConfig> for Source {
    fn from(c: SourceConfig) -> Self {
        Self {
            id: c.id,
            url: c.url,
            name: c.name,
            tier: c.tier,
        }
    }
}
