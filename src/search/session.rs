use super::experiment::{Experiment, ExperimentSettings};
use super::ExperimentResult;
use crate::data::Dataset;
use crate::ml::ForecastStrategy;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// A named results directory, usually one per dataset.
#[derive(Debug, Clone)]
pub struct Session {
    name: String,
    path: PathBuf,
}

impl Session {
    /// Opens `<root>/<name>`, creating it if needed.
    pub fn open(root: impl AsRef<Path>, name: &str) -> ExperimentResult<Self> {
        let path = root.as_ref().join(name);
        fs::create_dir_all(&path)?;
        info!("Opened session '{}' at {}", name, path.display());
        Ok(Self {
            name: name.to_string(),
            path,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Experiment for strategy `S`, stored under `<session>/<S::NAME>`.
    pub fn start_experiment<'d, S: ForecastStrategy>(
        &self,
        dataset: &'d Dataset,
    ) -> ExperimentResult<Experiment<'d, S>> {
        let path = self.path.join(S::NAME);
        fs::create_dir_all(&path)?;
        Ok(Experiment::new(dataset, path, ExperimentSettings::default()))
    }
}
