use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::core::error::Result;

/// Directory of JSON records keyed by document id. Writes go through a
/// temporary file and a rename, so a reader never sees half a record.
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the record for `id`. Ids such as old-style arXiv
    /// `hep-th/9901001` are flattened into a single file name.
    pub fn path_for(&self, id: &str) -> PathBuf {
        let safe_id: String = id
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.dir.join(format!("{}.json", safe_id))
    }

    pub async fn load<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        let path = self.path_for(id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                log::info!("Cache hit: {}", path.display());
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save<T: Serialize>(&self, id: &str, record: &T) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(id);
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        let data = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        log::info!("Cached {}", path.display());
        Ok(path)
    }
}

/// Fetched documents and finished transcripts are cached independently, so
/// a new dialogue can be generated without re-fetching the paper.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    pub documents: JsonStore,
    pub transcripts: JsonStore,
}

impl ArtifactCache {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            documents: JsonStore::new(root.join("documents")),
            transcripts: JsonStore::new(root.join("transcripts")),
        }
    }
}
