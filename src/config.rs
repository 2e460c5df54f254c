use chrono::format::{Item, StrftimeItems};

use crate::core::{MapperError, Result};

/// Mapper registry configuration
#[derive(Debug, Clone)]
pub struct MapperConfig {
    /// Keep hydrated entities in the identity map
    pub identity_map: bool,

    /// Prepended to every record cache key
    pub cache_prefix: String,

    /// Entries kept by caches the registry creates
    pub cache_capacity: usize,

    /// Storage format of timestamp properties without their own format
    pub timestamp_format: Option<String>,
}

impl MapperConfig {
    pub fn new() -> Self {
        Self {
            identity_map: true,
            cache_prefix: String::new(),
            cache_capacity: 1024,
            timestamp_format: None,
        }
    }

    /// Enable or disable the identity map
    pub fn identity_map(mut self, enabled: bool) -> Self {
        self.identity_map = enabled;
        self
    }

    /// Set the cache key prefix
    pub fn cache_prefix(mut self, prefix: &str) -> Self {
        self.cache_prefix = prefix.to_string();
        self
    }

    /// Set the cache capacity
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Set the default timestamp format (strftime syntax)
    pub fn timestamp_format(mut self, format: &str) -> Self {
        self.timestamp_format = Some(format.to_string());
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(MapperError::InvalidSchema(
                "cache_capacity must be > 0".to_string(),
            ));
        }

        if let Some(format) = &self.timestamp_format
            && StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
        {
            return Err(MapperError::InvalidSchema(format!(
                "Invalid timestamp format '{}'",
                format
            )));
        }

        Ok(())
    }
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self::new()
    }
}
