//! Filesystem primitives used by the action manager. None of them overwrite.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[cfg(unix)]
const CROSS_DEVICE: i32 = 18; // EXDEV
#[cfg(windows)]
const CROSS_DEVICE: i32 = 17; // ERROR_NOT_SAME_DEVICE

fn is_cross_device(e: &io::Error) -> bool {
    #[cfg(any(unix, windows))]
    {
        e.raw_os_error() == Some(CROSS_DEVICE)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = e;
        false
    }
}

fn occupied(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn already_exists(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("destination already exists: {}", path.display()),
    )
}

/// `name.ext`, then `name_1.ext`, `name_2.ext`, ... until a free name is found.
pub fn unique_destination(destination: &Path) -> PathBuf {
    if !occupied(destination) {
        return destination.to_path_buf();
    }
    let stem = destination
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = destination
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut counter = 1u32;
    loop {
        let candidate = destination.with_file_name(format!("{}_{}{}", stem, counter, extension));
        if !occupied(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Move `source` to `destination` without ever replacing an existing file.
///
/// The destination is linked into place first and the source removed after,
/// so a failure part-way leaves the source where it was. Across devices the
/// data is copied to a hidden sibling, synced, then linked into place.
pub fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    if occupied(destination) {
        return Err(already_exists(destination));
    }

    match fs::hard_link(source, destination) {
        Ok(()) => finish_move(source, destination),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
        Err(e) if is_cross_device(&e) => {
            debug!("{} crosses devices, copying", destination.display());
            copy_across(source, destination)
        }
        Err(e) => {
            debug!("hard link unavailable ({}), renaming instead", e);
            if occupied(destination) {
                return Err(already_exists(destination));
            }
            fs::rename(source, destination).or_else(|e| {
                if is_cross_device(&e) {
                    copy_across(source, destination)
                } else {
                    Err(e)
                }
            })
        }
    }
}

/// Both names point at the data; drop the old one or undo the new one.
fn finish_move(source: &Path, destination: &Path) -> io::Result<()> {
    if let Err(e) = fs::remove_file(source) {
        if let Err(cleanup) = fs::remove_file(destination) {
            warn!(
                "Could not remove {} after failed move: {}",
                destination.display(),
                cleanup
            );
        }
        return Err(e);
    }
    Ok(())
}

fn partial_path_for(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{}.tidyguard-partial", name))
}

fn copy_across(source: &Path, destination: &Path) -> io::Result<()> {
    let partial = partial_path_for(destination);
    let placed = fs::copy(source, &partial)
        .and_then(|_| File::open(&partial)?.sync_all())
        .and_then(|_| match fs::hard_link(&partial, destination) {
            Ok(()) => fs::remove_file(&partial),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
            Err(_) if !occupied(destination) => fs::rename(&partial, destination),
            Err(_) => Err(already_exists(destination)),
        });
    if let Err(e) = placed {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    finish_move(source, destination)
}

/// Remove a regular file. Directories are refused.
pub fn remove_file(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is a directory", path.display()),
        ));
    }
    fs::remove_file(path)
}
