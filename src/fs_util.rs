// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use anyhow::Error as AnyError;
use walkdir::WalkDir;

pub fn atomic_write_file<T: AsRef<[u8]>>(
  filename: &Path,
  data: T,
  mode: u32,
) -> std::io::Result<()> {
  let rand: String = (0..4)
    .map(|_| format!("{:02x}", rand::random::<u8>()))
    .collect();
  let extension = format!("{}.tmp", rand);
  let tmp_file = filename.with_extension(extension);
  write_file(&tmp_file, data, mode)?;
  std::fs::rename(tmp_file, filename)?;
  Ok(())
}

pub fn write_file<T: AsRef<[u8]>>(
  filename: &Path,
  data: T,
  mode: u32,
) -> std::io::Result<()> {
  let mut file = OpenOptions::new()
    .read(false)
    .write(true)
    .truncate(true)
    .create(true)
    .open(filename)?;

  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    let mode = mode & 0o777;
    let permissions = PermissionsExt::from_mode(mode);
    file.set_permissions(permissions)?;
  }
  #[cfg(not(unix))]
  let _ = mode;

  file.write_all(data.as_ref())
}

pub fn copy_dir_recursive(from: &Path, to: &Path) -> Result<(), AnyError> {
  for entry in WalkDir::new(from) {
    let entry = entry?;
    let relative = entry
      .path()
      .strip_prefix(from)
      .with_context(|| format!("invalid entry in {}", from.display()))?;
    let dest = to.join(relative);
    if entry.file_type().is_dir() {
      std::fs::create_dir_all(&dest)
        .with_context(|| format!("creating {}", dest.display()))?;
    } else if entry.file_type().is_file() {
      if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
          .with_context(|| format!("creating {}", parent.display()))?;
      }
      std::fs::copy(entry.path(), &dest).with_context(|| {
        format!(
          "copying {} to {}",
          entry.path().display(),
          dest.display()
        )
      })?;
    }
  }
  Ok(())
}

/// Appends `ext` unless the filename already carries it.
pub fn ensure_ext(filename: &str, ext: &str) -> String {
  if filename.ends_with(ext) {
    filename.to_string()
  } else {
    format!("{}{}", filename, ext)
  }
}

/// Collapses `.`, `..` and empty segments of a slash-separated relative path.
pub fn normalize_rel_path(path: &str) -> String {
  let mut parts: Vec<&str> = Vec::new();
  for segment in path.split('/') {
    match segment {
      "" | "." => {}
      ".." => {
        parts.pop();
      }
      segment => parts.push(segment),
    }
  }
  parts.join("/")
}
