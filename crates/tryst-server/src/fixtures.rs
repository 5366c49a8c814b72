//! Development fixtures for the in-memory store.
//!
//! ```toml
//! [[matches]]
//! user1 = "6f1c2f9e-3c1a-4a53-9d1e-0b7c2f0a9a11"
//! user2 = "0d3e9b7a-58f4-4f0e-8a55-5b9c1d2e3f44"
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use tryst_core::{MatchRelation, MemoryStore};
use tryst_protocol::{MatchId, UserId};

/// Matches to seed.
#[derive(Debug, Default, Deserialize)]
pub struct Fixtures {
    #[serde(default)]
    pub matches: Vec<MatchFixture>,
}

/// One seeded match. Missing ids and timestamps are generated.
#[derive(Debug, Deserialize)]
pub struct MatchFixture {
    #[serde(default)]
    pub id: Option<MatchId>,
    pub user1: UserId,
    pub user2: UserId,
    #[serde(default)]
    pub matched_at: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl Fixtures {
    /// Read fixtures from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixtures: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse fixtures: {}", path.display()))
    }

    /// Insert every match into `store`. Returns the number inserted.
    pub fn seed(self, store: &MemoryStore) -> usize {
        let count = self.matches.len();
        for fixture in self.matches {
            store.add_match(MatchRelation {
                id: fixture.id.unwrap_or_else(MatchId::new_v4),
                user1: fixture.user1,
                user2: fixture.user2,
                matched_at: fixture.matched_at.unwrap_or_else(Utc::now),
                is_active: fixture.is_active,
            });
        }
        info!(matches = count, "Seeded store from fixtures");
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tryst_core::MessageStore;

    #[tokio::test]
    async fn test_seed_from_toml() {
        let (a, b, c) = (UserId::new_v4(), UserId::new_v4(), UserId::new_v4());
        let fixed = MatchId::new_v4();
        let toml_str = format!(
            r#"
            [[matches]]
            id = "{fixed}"
            user1 = "{a}"
            user2 = "{b}"
            matched_at = "2024-05-01T12:00:00Z"

            [[matches]]
            user1 = "{a}"
            user2 = "{c}"
            is_active = false
            "#
        );

        let fixtures: Fixtures = toml::from_str(&toml_str).unwrap();
        let store = MemoryStore::new();
        assert_eq!(fixtures.seed(&store), 2);
        assert_eq!(store.match_count(), 2);

        let active = store.matches_of(a).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, fixed);
        assert_eq!(active[0].peer_of(a), Some(b));
    }

    #[test]
    fn test_missing_file() {
        assert!(Fixtures::load("/nonexistent/tryst-fixtures.toml").is_err());
    }
}
