// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::process::Output;
use std::time::Instant;

use anyhow::Context;
use anyhow::Error as AnyError;
use async_trait::async_trait;

use crate::errors::BuildError;
use crate::fs_util;
use crate::registry::NpmPackage;
use crate::specifier::identify;
use crate::specifier::PkgSpecifier;

/// A unique scratch directory for one build. The install tool, the module
/// runtime and the bundler all run with this directory as their working
/// directory. Removed on drop, which covers every exit path.
pub struct Workspace {
  dir: tempfile::TempDir,
}

impl Workspace {
  pub fn new() -> Result<Self, AnyError> {
    let parent = std::env::temp_dir().join("esmd-build");
    std::fs::create_dir_all(&parent)
      .with_context(|| format!("creating {}", parent.display()))?;
    let dir = tempfile::Builder::new()
      .tempdir_in(&parent)
      .context("creating scratch directory")?;
    Ok(Self { dir })
  }

  pub fn root(&self) -> &Path {
    self.dir.path()
  }

  pub fn node_modules(&self) -> PathBuf {
    self.dir.path().join("node_modules")
  }

  pub fn write_entry(&self, filename: &str, code: &str) -> Result<(), AnyError> {
    fs_util::write_file(&self.dir.path().join(filename), code, 0o644)
      .with_context(|| format!("writing {}", filename))
  }

  /// The installed descriptor of a package, `None` when it is not present
  /// in the install tree.
  pub fn read_installed_package(
    &self,
    name: &str,
  ) -> Result<Option<NpmPackage>, AnyError> {
    read_package_json(&self.node_modules().join(name).join("package.json"))
  }

  /// Copies `node_modules/{name}/{submodule}` to a sibling package named by
  /// the identifier form of the import path, so the bundler can address the
  /// submodule even when the parent package is externalized. Returns the
  /// submodule's own descriptor, or `None` when it has none.
  pub fn stage_submodule(
    &self,
    pkg: &PkgSpecifier,
  ) -> Result<Option<NpmPackage>, AnyError> {
    let submodule_dir =
      self.node_modules().join(&pkg.name).join(&pkg.submodule);
    let descriptor =
      match read_package_json(&submodule_dir.join("package.json")) {
        Ok(Some(descriptor)) => descriptor,
        _ => return Ok(None),
      };
    fs_util::copy_dir_recursive(
      &submodule_dir,
      &self.node_modules().join(identify(&pkg.import_path())),
    )?;
    Ok(Some(descriptor))
  }
}

/// Parses a `package.json`; `None` only when the file does not exist.
pub fn read_package_json(
  path: &Path,
) -> Result<Option<NpmPackage>, AnyError> {
  let text = match std::fs::read_to_string(path) {
    Ok(text) => text,
    Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(err) => {
      return Err(err).with_context(|| format!("reading {}", path.display()))
    }
  };
  serde_json::from_str(&text)
    .map(Some)
    .with_context(|| format!("parsing {}", path.display()))
}

pub(crate) fn combined_output(output: &Output) -> String {
  let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
  text.push_str(&String::from_utf8_lossy(&output.stderr));
  text
}

#[async_trait]
pub trait InstallTool: Send + Sync {
  /// Runs `add spec…` in `cwd`. Non-zero exit surfaces the tool's combined
  /// output as the error.
  async fn add(&self, cwd: &Path, specs: &[String]) -> Result<(), BuildError>;
}

pub struct YarnCli;

#[async_trait]
impl InstallTool for YarnCli {
  async fn add(&self, cwd: &Path, specs: &[String]) -> Result<(), BuildError> {
    if specs.is_empty() {
      return Ok(());
    }
    let start = Instant::now();
    let output = tokio::process::Command::new("yarn")
      .arg("add")
      .args(specs)
      .current_dir(cwd)
      .output()
      .await
      .map_err(|err| BuildError::Install(format!("yarn: {}", err)))?;
    if !output.status.success() {
      return Err(BuildError::Install(combined_output(&output)));
    }
    log::debug!("yarn add {} in {:?}", specs.join(" "), start.elapsed());
    Ok(())
  }
}
