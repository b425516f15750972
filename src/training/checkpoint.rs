use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Serialize, de::DeserializeOwned};
use strum::Display;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Tag {
    /// written periodically and at the end of a run; resumed from
    Latest,
    /// written whenever the rolling episode score improves
    Best,
}

/// Location of the files making up a saved training run, keyed by
/// environment name: `<dir>/<name>-<tag>-<part>`.
#[derive(Clone, Debug)]
pub struct Checkpoint {
    dir: PathBuf,
    name: String,
}

impl Checkpoint {
    pub fn new(dir: impl Into<PathBuf>, name: &str) -> Self {
        Self {
            dir: dir.into(),
            name: name.replace(['/', '\\'], "_"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create checkpoint directory {:?}", self.dir))
    }

    /// Path without extension, for burn recorders which add their own.
    pub fn path(&self, tag: Tag, part: &str) -> PathBuf {
        self.dir.join(format!("{}-{tag}-{part}", self.name))
    }

    pub fn write<T: Serialize>(&self, tag: Tag, part: &str, value: &T) -> Result<()> {
        let path = self.file(tag, part);
        let data = rmp_serde::encode::to_vec(value)?;

        fs::write(&path, data).with_context(|| format!("failed to write {path:?}"))
    }

    pub fn read<T: DeserializeOwned>(&self, tag: Tag, part: &str) -> Result<T> {
        let path = self.file(tag, part);
        let data = fs::read(&path).with_context(|| format!("failed to read {path:?}"))?;

        rmp_serde::from_slice(&data).with_context(|| format!("corrupt checkpoint file {path:?}"))
    }

    fn file(&self, tag: Tag, part: &str) -> PathBuf {
        let mut path = self.path(tag, part).into_os_string();
        path.push(".mpk");
        path.into()
    }
}
