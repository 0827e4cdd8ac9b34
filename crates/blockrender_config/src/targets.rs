use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use url::Url;

/// Suffix appended to a target's base address to open MakeCode in render mode
pub const RENDER_MODE_SUFFIX: &str = "--docs?render=1";

/// A named render service deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderTarget {
    pub key: String,
    pub address: Url,
}

impl RenderTarget {
    pub fn new(key: impl Into<String>, address: Url) -> Self {
        Self {
            key: key.into(),
            address,
        }
    }

    /// Scheme, host and port of the target. Contexts and envelopes are scoped by it.
    pub fn origin(&self) -> String {
        self.address.origin().ascii_serialization()
    }

    /// Address of the render-mode page for this target
    ///
    /// # Errors
    ///
    /// Returns an error if the base address cannot be extended into a valid url
    pub fn render_url(&self) -> Result<Url, url::ParseError> {
        render_url(&self.address)
    }
}

/// Appends [`RENDER_MODE_SUFFIX`] to a base address.
///
/// # Errors
///
/// Returns an error if the resulting string is not a valid url
pub fn render_url(address: &Url) -> Result<Url, url::ParseError> {
    Url::parse(&format!("{}{RENDER_MODE_SUFFIX}", address.as_str()))
}

#[derive(Debug, thiserror::Error)]
pub enum TargetTableError {
    #[error("Target table must contain at least one target")]
    Empty,
}

/// Ordered set of known render targets. The first entry is the default.
#[derive(Debug, Clone)]
pub struct TargetTable {
    targets: Vec<RenderTarget>,
}

impl TargetTable {
    /// # Errors
    ///
    /// Returns [`TargetTableError::Empty`] when no targets are given
    pub fn new(targets: Vec<RenderTarget>) -> Result<Self, TargetTableError> {
        if targets.is_empty() {
            return Err(TargetTableError::Empty);
        }
        Ok(Self { targets })
    }

    /// # Errors
    ///
    /// Returns [`TargetTableError::Empty`] when the map is empty
    pub fn from_map(map: &IndexMap<String, Url>) -> Result<Self, TargetTableError> {
        Self::new(
            map.iter()
                .map(|(key, address)| RenderTarget::new(key.clone(), address.clone()))
                .collect(),
        )
    }

    pub fn default_target(&self) -> &RenderTarget {
        &self.targets[0]
    }

    pub fn get(&self, key: &str) -> Option<&RenderTarget> {
        self.targets.iter().find(|t| t.key == key)
    }

    /// Resolves a target key, falling back on the default target for unknown keys
    pub fn resolve(&self, key: &str) -> &RenderTarget {
        self.get(key).unwrap_or_else(|| self.default_target())
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenderTarget> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl Default for TargetTable {
    fn default() -> Self {
        let targets = crate::defaults::default_targets()
            .into_iter()
            .map(|(key, address)| RenderTarget::new(key, address))
            .collect();
        Self { targets }
    }
}
