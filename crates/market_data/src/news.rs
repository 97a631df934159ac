use async_trait::async_trait;

use crate::traits::{ConnectorError, NewsSource};

/// Headline source with a fixed list. With an empty list the sentiment term
/// of every cycle is neutral.
#[derive(Debug, Clone, Default)]
pub struct StaticNewsSource {
    headlines: Vec<String>,
}

impl StaticNewsSource {
    pub fn new(headlines: Vec<String>) -> Self {
        Self { headlines }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NewsSource for StaticNewsSource {
    async fn fetch_headlines(&self) -> Result<Vec<String>, ConnectorError> {
        Ok(self.headlines.clone())
    }
}
