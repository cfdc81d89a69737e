//! Common, IO-related code.

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use flate2::{bufread::MultiGzDecoder, write::GzEncoder, Compression};

use crate::common::SourceName;

/// Transparently open a file with gzip decoder.
pub fn open_read_maybe_gz<P>(path: P) -> Result<Box<dyn BufRead>, anyhow::Error>
where
    P: AsRef<Path>,
{
    if path.as_ref().extension().map(|s| s.to_str()) == Some(Some("gz")) {
        tracing::trace!("Opening {:?} as gzip for reading", path.as_ref());
        let file = File::open(path)?;
        let bufreader = BufReader::new(file);
        let decoder = MultiGzDecoder::new(bufreader);
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        tracing::trace!("Opening {:?} as plain text for reading", path.as_ref());
        let file = File::open(path).map(BufReader::new)?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Transparently open a file with gzip encoder.
pub fn open_write_maybe_gz<P>(path: P) -> Result<Box<dyn Write>, anyhow::Error>
where
    P: AsRef<Path>,
{
    if path.as_ref().extension().map(|s| s.to_str()) == Some(Some("gz")) {
        tracing::trace!("Opening {:?} as gzip for writing", path.as_ref());
        let file = File::create(path)?;
        let bufwriter = BufWriter::new(file);
        let encoder = GzEncoder::new(bufwriter, Compression::default());
        Ok(Box::new(encoder))
    } else {
        tracing::trace!("Opening {:?} as plain text for writing", path.as_ref());
        let file = File::create(path)?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Read a JSON document from `path` (transparently gzip-decoded).
pub fn read_json<T, P>(path: P) -> Result<T, anyhow::Error>
where
    T: serde::de::DeserializeOwned,
    P: AsRef<Path>,
{
    let reader = open_read_maybe_gz(&path)?;
    serde_json::from_reader(reader)
        .map_err(|e| anyhow::anyhow!("problem reading JSON from {:?}: {}", path.as_ref(), e))
}

/// Write a JSON document to `path`, creating parent directories as needed.
pub fn write_json<T, P>(value: &T, path: P) -> Result<(), anyhow::Error>
where
    T: serde::Serialize,
    P: AsRef<Path>,
{
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            anyhow::anyhow!("could not create output directory {:?}: {}", parent, e)
        })?;
    }
    let mut writer = open_write_maybe_gz(&path)?;
    serde_json::to_writer(&mut writer, value)
        .map_err(|e| anyhow::anyhow!("problem writing JSON to {:?}: {}", path.as_ref(), e))?;
    writer.flush()?;
    Ok(())
}

/// Path of a date-stamped transform artifact:
/// `<data_dir>/<source>/transform/<source>_cdm_<YYYYMMDD>.json`.
pub fn cdm_path(data_dir: &Path, source: SourceName, date_stamp: &str) -> PathBuf {
    data_dir
        .join(source.to_string())
        .join("transform")
        .join(format!("{}_cdm_{}.json", source, date_stamp))
}

/// Today's `YYYYMMDD` date stamp.
pub fn today_stamp() -> String {
    chrono::Local::now().format("%Y%m%d").to_string()
}

/// Find the lexicographically latest file matching `<prefix>_<infix>_*.json`
/// in `dir`.  Date-stamped names sort chronologically, so the maximum is the
/// most recent artifact.
pub fn latest_artifact(
    dir: &Path,
    prefix: &str,
    infix: &str,
) -> Result<PathBuf, anyhow::Error> {
    let wanted = format!("{}_{}_", prefix, infix);
    let mut candidates = std::fs::read_dir(dir)
        .map_err(|e| anyhow::anyhow!("could not read directory {:?}: {}", dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(&wanted) && n.ends_with(".json"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();
    candidates.sort();
    candidates
        .pop()
        .ok_or_else(|| anyhow::anyhow!("no {}*.json artifact found in {:?}", wanted, dir))
}
