//! Resolves assets from a directory of JSON files.
//!
//! Layout: `<root>/[<module>/]<type>/<name>.json`. A reference carrying a
//! module looks in that module first and falls back to the shared
//! `<root>/<type>/` directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use stagehand_core::asset::{Asset, AssetError, AssetReference, AssetResolver, ResolvedAsset};
use tracing::debug;

pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn candidates(&self, reference: &AssetReference) -> Vec<PathBuf> {
        let file = format!("{}.json", reference.name);
        let kind = reference.kind.as_str();
        let mut paths = Vec::with_capacity(2);
        if let Some(ref module) = reference.module {
            paths.push(self.root.join(module).join(kind).join(&file));
        }
        paths.push(self.root.join(kind).join(&file));
        paths
    }
}

async fn read_if_exists(path: &Path) -> Result<Option<String>, AssetError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AssetError::Io(e)),
    }
}

#[async_trait]
impl AssetResolver for DirectoryResolver {
    async fn resolve(&self, reference: &AssetReference) -> Result<ResolvedAsset, AssetError> {
        for path in self.candidates(reference) {
            let Some(text) = read_if_exists(&path).await? else {
                continue;
            };
            debug!(path = %path.display(), "resolved asset");
            let asset = Asset::from_json(reference.kind, &reference.name, &text)?;
            return Ok(ResolvedAsset {
                asset: Arc::new(asset),
                meta: reference.context(),
            });
        }
        Err(AssetError::NotFound {
            kind: reference.kind,
            name: reference.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_core::asset::AssetKind;

    #[test]
    fn test_module_is_searched_before_shared() {
        let resolver = DirectoryResolver::new("/assets");
        let mut reference = AssetReference::new(AssetKind::Screen, "cart");
        assert_eq!(resolver.candidates(&reference), vec![PathBuf::from("/assets/screen/cart.json")]);

        reference.module = Some("shop".into());
        assert_eq!(
            resolver.candidates(&reference),
            vec![
                PathBuf::from("/assets/shop/screen/cart.json"),
                PathBuf::from("/assets/screen/cart.json"),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_asset_is_not_found() {
        let resolver = DirectoryResolver::new(std::env::temp_dir().join("stagehand-no-such-root"));
        let err = resolver
            .resolve(&AssetReference::new(AssetKind::Test, "ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, AssetError::NotFound { .. }));
    }
}
