use serde::{Deserialize, Serialize};
use std::{fs, path::Path, sync::Arc};

use crate::{
    booster::Booster,
    error::{ModelError, Result},
    service::ModelService,
    vectorizer::DictVectorizer,
};

/// Everything the serving side needs: the fitted encoder, the trees and the
/// tracking run that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub vectorizer: DictVectorizer,
    pub booster: Booster,
    #[serde(default)]
    pub run_id: Option<String>,
}

impl ModelBundle {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| ModelError::Io { path: path.to_path_buf(), source })?;
        let bundle: ModelBundle = serde_json::from_slice(&bytes)?;
        bundle.booster.validate()?;
        Ok(bundle)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = serde_json::to_vec(self)?;
        fs::write(path, bytes).map_err(|source| ModelError::Io { path: path.to_path_buf(), source })
    }

    /// Wrap the bundle in a service. An explicit `version` wins over the run id.
    pub fn into_service(self, version: Option<String>) -> ModelService<Booster> {
        let version = version.or(self.run_id);
        ModelService::new(self.booster, Arc::new(self.vectorizer), version)
    }
}
