use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::{
    error::{ForecastError, ForecastResult},
    training::ModelArtifact,
};

/// Versioned JSON files holding trained model artifacts.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    dir: Option<PathBuf>,
}

impl ArtifactStore {
    /// Store that keeps nothing on disk.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { dir: None }
    }

    /// Opens (creating) the artifact directory.
    pub fn open(dir: impl Into<PathBuf>) -> ForecastResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|err| ForecastError::storage(format!("creating {}", dir.display()), err))?;
        Ok(Self { dir: Some(dir) })
    }

    /// Artifact directory, if persistent.
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Writes `artifact` as `model-v<version>.json`. Returns the path written.
    pub fn save(&self, artifact: &ModelArtifact) -> ForecastResult<Option<PathBuf>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        let path = artifact_path(dir, artifact.version());
        let tmp = path.with_extension("tmp");
        let file = File::create(&tmp)
            .map_err(|err| ForecastError::storage(format!("creating {}", tmp.display()), err))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, artifact)?;
        writer
            .flush()
            .map_err(|err| ForecastError::storage(format!("writing {}", tmp.display()), err))?;
        fs::rename(&tmp, &path)
            .map_err(|err| ForecastError::storage(format!("replacing {}", path.display()), err))?;
        Ok(Some(path))
    }

    /// Highest artifact version present on disk, readable or not; 0 when none.
    pub fn latest_version(&self) -> ForecastResult<u64> {
        Ok(self.versions()?.last().copied().unwrap_or(0))
    }

    /// Loads the newest artifact.
    ///
    /// An unreadable or undecodable newest file is a `ModelLoad` error; older
    /// files are not consulted.
    pub fn load_latest(&self) -> ForecastResult<Option<ModelArtifact>> {
        let (Some(dir), Some(version)) = (&self.dir, self.versions()?.last().copied()) else {
            return Ok(None);
        };
        let path = artifact_path(dir, version);
        let file = File::open(&path)
            .map_err(|err| ForecastError::ModelLoad(format!("{}: {err}", path.display())))?;
        let artifact: ModelArtifact = serde_json::from_reader(BufReader::new(file))
            .map_err(|err| ForecastError::ModelLoad(format!("{}: {err}", path.display())))?;
        if artifact.version() != version {
            return Err(ForecastError::ModelLoad(format!(
                "{} holds version {}",
                path.display(),
                artifact.version()
            )));
        }
        Ok(Some(artifact))
    }

    fn versions(&self) -> ForecastResult<Vec<u64>> {
        let Some(dir) = &self.dir else {
            return Ok(Vec::new());
        };
        let entries = fs::read_dir(dir)
            .map_err(|err| ForecastError::storage(format!("listing {}", dir.display()), err))?;
        let mut versions: Vec<u64> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.strip_prefix("model-v"))
                    .and_then(|rest| rest.strip_suffix(".json"))
                    .and_then(|digits| digits.parse().ok())
            })
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }
}

fn artifact_path(dir: &Path, version: u64) -> PathBuf {
    dir.join(format!("model-v{version:06}.json"))
}
