//! Shallow structure report over candidate directories: counts, sizes and a
//! sample of the files directly inside each one.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Error;

#[derive(Debug, Clone, Serialize)]
pub struct StructureReport {
    pub generated_at: DateTime<Utc>,
    pub directories: Vec<DirectoryStructure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryStructure {
    pub path: PathBuf,
    pub file_count: usize,
    pub total_size: u64,
    pub sample_files: Vec<SampleFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Only the first level of each directory is read; unreadable directories
/// are reported with their error instead of failing the whole report.
pub fn build_structure_report(directories: &[PathBuf], sample_limit: usize) -> StructureReport {
    StructureReport {
        generated_at: Utc::now(),
        directories: directories
            .iter()
            .map(|dir| describe(dir, sample_limit))
            .collect(),
    }
}

fn describe(dir: &Path, sample_limit: usize) -> DirectoryStructure {
    let mut entry = DirectoryStructure {
        path: dir.to_path_buf(),
        file_count: 0,
        total_size: 0,
        sample_files: Vec::new(),
        error: None,
    };
    let children = match fs::read_dir(dir) {
        Ok(children) => children,
        Err(e) => {
            debug!("Cannot read {}: {}", dir.display(), e);
            entry.error = Some(e.to_string());
            return entry;
        }
    };

    let mut files: Vec<(PathBuf, fs::Metadata)> = children
        .flatten()
        .filter_map(|child| {
            let meta = child.metadata().ok()?;
            meta.is_file().then(|| (child.path(), meta))
        })
        .collect();
    files.sort_by(|a, b| a.0.cmp(&b.0));

    for (path, meta) in files {
        entry.file_count += 1;
        entry.total_size += meta.len();
        if entry.sample_files.len() < sample_limit {
            entry.sample_files.push(SampleFile {
                path,
                size: meta.len(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            });
        }
    }
    entry
}

pub fn write_structure_report(report: &StructureReport, out_path: &Path) -> Result<(), Error> {
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(out_path)?);
    serde_json::to_writer_pretty(&mut writer, report).map_err(io::Error::from)?;
    writer.flush()?;
    info!(
        "Wrote structure report for {} directories to {}",
        report.directories.len(),
        out_path.display()
    );
    Ok(())
}
