//! Nested test content and its resolution.
//!
//! Composition actions name an asset through an [`AssetReference`]; an
//! [`AssetResolver`] turns the reference into an [`Asset`] (a list of parsed
//! actions) plus the module context the asset lives in. Where assets are
//! stored is the resolver's business: the engine ships an in-memory resolver
//! and the CLI adds a directory-backed one.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::action::{Action, ActionParseError};
use crate::config::ModuleContext;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("{kind} `{name}` was not found")]
    NotFound { kind: AssetKind, name: String },

    #[error("{kind} `{name}` is malformed: {reason}")]
    Parse {
        kind: AssetKind,
        name: String,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Test,
    Action,
    Screen,
    Menu,
    Popup,
    Widget,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Test => "test",
            AssetKind::Action => "action",
            AssetKind::Screen => "screen",
            AssetKind::Menu => "menu",
            AssetKind::Popup => "popup",
            AssetKind::Widget => "widget",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test" => Ok(AssetKind::Test),
            "action" => Ok(AssetKind::Action),
            "screen" => Ok(AssetKind::Screen),
            "menu" => Ok(AssetKind::Menu),
            "popup" => Ok(AssetKind::Popup),
            "widget" => Ok(AssetKind::Widget),
            other => Err(format!("unknown asset type `{other}`")),
        }
    }
}

/// Names an asset to run from a composition action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetReference {
    #[serde(rename = "type")]
    pub kind: AssetKind,
    pub name: String,
    pub suite: Option<String>,
    pub module: Option<String>,
    pub platform: Option<String>,
    /// When false the composition passes iff the asset fails.
    pub accept: bool,
    /// When false the asset is resolved but not evaluated.
    pub run: bool,
}

impl AssetReference {
    pub fn new(kind: AssetKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            suite: None,
            module: None,
            platform: None,
            accept: true,
            run: true,
        }
    }

    /// The context fields this reference overrides.
    pub fn context(&self) -> ModuleContext {
        ModuleContext {
            suite: self.suite.clone(),
            module: self.module.clone(),
            platform: self.platform.clone(),
        }
    }
}

impl fmt::Display for AssetReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.module {
            Some(ref module) => write!(f, "{} {}/{}", self.kind, module, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// A resolved unit of test content.
#[derive(Debug, Clone)]
pub struct Asset {
    pub name: String,
    pub kind: AssetKind,
    pub actions: Vec<Action>,
}

impl Asset {
    pub fn new(kind: AssetKind, name: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            name: name.into(),
            kind,
            actions,
        }
    }

    /// Parses either a bare array of action records or `{"actions": [...]}`.
    pub fn from_json(kind: AssetKind, name: &str, json: &str) -> Result<Self, AssetError> {
        let malformed = |reason: String| AssetError::Parse {
            kind,
            name: name.to_string(),
            reason,
        };
        let value: Value = serde_json::from_str(json).map_err(|e| malformed(e.to_string()))?;
        let records = match value {
            Value::Array(records) => records,
            Value::Object(mut map) => match map.remove("actions") {
                Some(Value::Array(records)) => records,
                _ => return Err(malformed("expected an `actions` array".to_string())),
            },
            _ => return Err(malformed("expected an array of actions".to_string())),
        };

        let actions = records
            .into_iter()
            .enumerate()
            .map(|(i, record)| {
                Action::from_value(record)
                    .map_err(|e: ActionParseError| malformed(format!("action {}: {}", i + 1, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(kind, name, actions))
    }
}

/// An asset together with the module context it belongs to.
#[derive(Debug, Clone)]
pub struct ResolvedAsset {
    pub asset: Arc<Asset>,
    pub meta: ModuleContext,
}

#[async_trait]
pub trait AssetResolver: Send + Sync {
    async fn resolve(&self, reference: &AssetReference) -> Result<ResolvedAsset, AssetError>;
}

/// Resolver over assets registered in memory, keyed by type and name.
#[derive(Debug, Default)]
pub struct MemoryResolver {
    assets: RwLock<HashMap<(AssetKind, String), Arc<Asset>>>,
    resolutions: AtomicUsize,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, asset: Asset) {
        if let Ok(mut assets) = self.assets.write() {
            assets.insert((asset.kind, asset.name.clone()), Arc::new(asset));
        }
    }

    pub fn with(self, asset: Asset) -> Self {
        self.insert(asset);
        self
    }

    /// How many resolve calls succeeded.
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetResolver for MemoryResolver {
    async fn resolve(&self, reference: &AssetReference) -> Result<ResolvedAsset, AssetError> {
        let found = self
            .assets
            .read()
            .ok()
            .and_then(|assets| assets.get(&(reference.kind, reference.name.clone())).cloned());
        let asset = found.ok_or_else(|| AssetError::NotFound {
            kind: reference.kind,
            name: reference.name.clone(),
        })?;
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        Ok(ResolvedAsset {
            asset,
            meta: reference.context(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_accepts_both_shapes() {
        let bare = Asset::from_json(AssetKind::Action, "login", r##"[{"tap":"#button:0"},{"wait":10}]"##).unwrap();
        assert_eq!(bare.actions.len(), 2);

        let wrapped =
            Asset::from_json(AssetKind::Test, "smoke", r#"{"actions":[{"home":true}]}"#).unwrap();
        assert_eq!(wrapped.actions.len(), 1);
        assert_eq!(wrapped.kind, AssetKind::Test);
    }

    #[test]
    fn test_from_json_reports_bad_action_position() {
        let err = Asset::from_json(AssetKind::Action, "x", r#"[{"wait":1},{"fly":"away"}]"#).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("action `x` is malformed"), "{msg}");
        assert!(msg.contains("action 2"), "{msg}");
    }

    #[test]
    fn test_from_json_rejects_other_shapes() {
        assert!(Asset::from_json(AssetKind::Action, "x", "42").is_err());
        assert!(Asset::from_json(AssetKind::Action, "x", r#"{"steps":[]}"#).is_err());
        assert!(Asset::from_json(AssetKind::Action, "x", "not json").is_err());
    }

    #[test]
    fn test_reference_display_and_context() {
        let mut reference = AssetReference::new(AssetKind::Screen, "home");
        assert_eq!(reference.to_string(), "screen home");
        reference.module = Some("shop".into());
        assert_eq!(reference.to_string(), "screen shop/home");
        assert_eq!(reference.context().module.as_deref(), Some("shop"));
        assert!(reference.accept && reference.run);
    }

    #[tokio::test]
    async fn test_memory_resolver() {
        let resolver = MemoryResolver::new().with(Asset::new(AssetKind::Widget, "header", vec![]));

        let hit = resolver
            .resolve(&AssetReference::new(AssetKind::Widget, "header"))
            .await
            .unwrap();
        assert_eq!(hit.asset.name, "header");
        assert_eq!(resolver.resolutions(), 1);

        let miss = resolver
            .resolve(&AssetReference::new(AssetKind::Action, "header"))
            .await;
        assert!(matches!(miss, Err(AssetError::NotFound { kind: AssetKind::Action, .. })));
        assert_eq!(resolver.resolutions(), 1);
    }
}
