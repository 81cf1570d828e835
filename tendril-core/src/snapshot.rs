//! Flat `root,friend` snapshot of one crawl.
//!
//! The file is written next to its destination and renamed into place, so a
//! reader sees either the previous snapshot or the complete new one.

use crate::model::FriendshipPair;
use std::fs;
use std::path::Path;
use tempfile::NamedTempFile;
use tendril_api::Identity;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to move snapshot into place: {0}")]
    Persist(#[from] tempfile::PersistError),
}

pub fn write_pairs(path: &Path, pairs: &[FriendshipPair]) -> Result<usize, SnapshotError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(tmp.as_file_mut());
        for pair in pairs {
            writer.serialize((pair.root, pair.friend))?;
        }
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;

    info!("Wrote {} friendship pairs to {}", pairs.len(), path.display());
    Ok(pairs.len())
}

pub fn read_pairs(path: &Path) -> Result<Vec<FriendshipPair>, SnapshotError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let pairs = reader
        .deserialize::<(Identity, Identity)>()
        .map(|record| {
            record
                .map(|(root, friend)| FriendshipPair::new(root, friend))
                .map_err(SnapshotError::from)
        })
        .collect::<Result<Vec<_>, _>>()?;

    info!("Read {} friendship pairs from {}", pairs.len(), path.display());
    Ok(pairs)
}
