//! Flat-file output: `<id>.json` and `<id>.jpg` per record, plus the
//! per-run failure report and annotation sheet.

use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
};

use serde::Serialize;
use tokio::fs;
use tracing::debug;

use crate::{
    detail::ArtworkRecord,
    error::{OutputHalf, RecordError},
    identifier::RecordId,
};

/// Name of the per-run failure report.
pub const FAILED_FILE: &str = "failed.txt";

/// Name of the per-run annotation sheet.
pub const ANNOTATION_FILE: &str = "hermitage_museum_annotation.csv";

#[derive(Serialize)]
struct AnnotationRow {
    object_id: String,
    tag: &'static str,
    image_name: String,
}

#[derive(Serialize)]
struct MetadataDocument<'a> {
    object_id: String,
    url: &'a str,
    image_url: &'a str,
    image_name: String,
    tag: &'a str,
    #[serde(flatten)]
    fields: &'a BTreeMap<String, String>,
}

/// Writes records into one output directory, replacing files of the same id.
#[derive(Debug, Clone)]
pub struct StorageWriter {
    dir: PathBuf,
}

impl StorageWriter {
    /// Creates the output directory if needed.
    pub async fn create(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Removes `dir` and everything in it, if it exists.
    pub async fn clean(dir: &Path) -> io::Result<()> {
        match fs::remove_dir_all(dir).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            result => result,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes both files of `record`. Both writes are always attempted.
    pub async fn write(&self, record: &ArtworkRecord) -> Result<(), RecordError> {
        let id = record.id();
        let failed = |half, reason: String| RecordError::WriteFailed {
            id: id.to_string(),
            half,
            reason,
        };

        let document = MetadataDocument {
            object_id: id.to_string(),
            url: record.url().as_str(),
            image_url: record.image_url().as_str(),
            image_name: id.image_file(),
            tag: "",
            fields: record.fields(),
        };

        let metadata = match serde_json::to_vec_pretty(&document) {
            Ok(json) => fs::write(self.dir.join(id.metadata_file()), json)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        let image = fs::write(self.dir.join(id.image_file()), record.image())
            .await
            .map_err(|e| e.to_string());

        match (metadata, image) {
            (Ok(()), Ok(())) => {
                debug!("wrote {id}");
                Ok(())
            }
            (Err(e), Ok(())) => Err(failed(OutputHalf::Metadata, e)),
            (Ok(()), Err(e)) => Err(failed(OutputHalf::Image, e)),
            (Err(m), Err(i)) => Err(failed(OutputHalf::Both, format!("{m}; {i}"))),
        }
    }

    /// Writes one `<url>\t<reason>` line per failure, or removes a stale
    /// report when there are none.
    pub async fn write_failures<'a, I>(&self, failures: I) -> io::Result<()>
    where
        I: IntoIterator<Item = (&'a str, String)>,
    {
        let path = self.dir.join(FAILED_FILE);
        let report: String = failures
            .into_iter()
            .map(|(url, reason)| format!("{url}\t{reason}\n"))
            .collect();

        if report.is_empty() {
            return match fs::remove_file(&path).await {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                result => result,
            };
        }
        fs::write(&path, report).await
    }

    /// Writes the annotation sheet with one untagged row per stored record.
    /// Nothing is written when `ids` is empty.
    pub async fn write_annotations<'a, I>(&self, ids: I) -> io::Result<()>
    where
        I: IntoIterator<Item = &'a RecordId>,
    {
        let mut sheet = csv::Writer::from_writer(Vec::new());
        let mut rows = 0;
        for id in ids {
            sheet.serialize(AnnotationRow {
                object_id: id.to_string(),
                tag: "",
                image_name: id.image_file(),
            })?;
            rows += 1;
        }
        if rows == 0 {
            return Ok(());
        }

        let sheet = sheet.into_inner().map_err(|e| e.into_error())?;
        fs::write(self.dir.join(ANNOTATION_FILE), sheet).await?;
        debug!("wrote {rows} annotation rows");
        Ok(())
    }
}
