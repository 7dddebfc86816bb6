use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zip::ZipArchive;

/// Extract every file entry of a ZIP archive into `dest`, keeping relative
/// paths. Directory entries are skipped; parents are created as needed.
/// Returns the relative paths written.
pub fn extract_zip<R: Read + Seek>(data: R, dest: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut archive = ZipArchive::new(data)?;
    let mut written = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;

        if file.is_dir() {
            continue;
        }

        // ZIP Slip protection: entries escaping `dest` are dropped
        let file_path = match file.enclosed_name() {
            Some(path) => path.to_owned(),
            None => {
                warn!("Skipping unsafe archive entry: {}", file.name());
                continue;
            }
        };

        let outpath = dest.join(&file_path);
        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut outfile = std::fs::File::create(&outpath)?;
        std::io::copy(&mut file, &mut outfile)?;
        written.push(file_path);
    }

    Ok(written)
}

/// Recursively collect files under `root` whose extension matches `ext`
/// (case-insensitive). A missing root yields an empty list.
pub fn find_files_with_extension(root: &Path, ext: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if !root.is_dir() {
        return Ok(found);
    }

    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if has_extension(&path, ext) {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// Log every file under `dir` with its size
pub fn log_artifacts(dir: &Path) {
    let files = match list_files_with_size(dir) {
        Ok(files) => files,
        Err(e) => {
            warn!("Failed to list artifacts in {:?}: {}", dir, e);
            return;
        }
    };
    for (path, size) in files {
        info!("[artifact] {} ({} bytes)", path.display(), size);
    }
}

fn list_files_with_size(dir: &Path) -> std::io::Result<Vec<(PathBuf, u64)>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if metadata.is_dir() {
                pending.push(entry.path());
            } else {
                found.push((entry.path(), metadata.len()));
            }
        }
    }
    found.sort();
    Ok(found)
}
