// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use anyhow::Error as AnyError;

/// A single module unit requested by the client: an exact package version
/// plus an optional submodule path inside the package.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PkgSpecifier {
  pub name: String,
  pub version: String,
  /// Relative path inside the package, empty for the package root.
  pub submodule: String,
}

impl PkgSpecifier {
  pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      version: version.into(),
      submodule: String::new(),
    }
  }

  pub fn with_submodule(mut self, submodule: impl Into<String>) -> Self {
    self.submodule = submodule.into();
    self
  }

  /// The string used inside generated entry code.
  pub fn import_path(&self) -> String {
    if self.submodule.is_empty() {
      self.name.clone()
    } else {
      format!("{}/{}", self.name, self.submodule)
    }
  }

  /// `name@version` form handed to the install tool.
  pub fn install_spec(&self) -> String {
    format!("{}@{}", self.name, self.version)
  }

  /// Last path segment of the package name.
  pub fn base_name(&self) -> &str {
    self.name.rsplit('/').next().unwrap_or(&self.name)
  }
}

impl fmt::Display for PkgSpecifier {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}@{}", self.name, self.version)?;
    if !self.submodule.is_empty() {
      write!(f, "/{}", self.submodule)?;
    }
    Ok(())
  }
}

impl FromStr for PkgSpecifier {
  type Err = AnyError;

  fn from_str(s: &str) -> Result<Self, AnyError> {
    // the version separator is the first `@` that is not the scope marker
    let at = if let Some(rest) = s.strip_prefix('@') {
      rest.find('@').map(|i| i + 1)
    } else {
      s.find('@')
    };
    let Some(at) = at else {
      bail!("package specifier '{}' is missing a version", s);
    };
    let name = &s[..at];
    let rest = &s[at + 1..];
    let (version, submodule) = match rest.split_once('/') {
      Some((version, submodule)) => (version, submodule),
      None => (rest, ""),
    };
    if name.is_empty() || version.is_empty() {
      bail!("invalid package specifier '{}'", s);
    }
    Ok(PkgSpecifier {
      name: name.to_string(),
      version: version.to_string(),
      submodule: submodule.to_string(),
    })
  }
}

impl Ord for PkgSpecifier {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .import_path()
      .cmp(&other.import_path())
      .then_with(|| self.name.cmp(&other.name))
      .then_with(|| self.version.cmp(&other.version))
  }
}

impl PartialOrd for PkgSpecifier {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

/// Maps an import path to a string that is safe both as a program-level
/// symbol and as a directory name.
pub fn identify(import_path: &str) -> String {
  import_path
    .chars()
    .map(|c| match c {
      '/' | '-' | '@' | '.' => '_',
      c => c,
    })
    .collect()
}

/// The canonical comma-joined specifier form of a request.
pub fn packages_string(packages: &[PkgSpecifier]) -> String {
  packages
    .iter()
    .map(|p| p.to_string())
    .collect::<Vec<_>>()
    .join(",")
}

/// Removes duplicate specifiers, keeping the first occurrence of each.
pub fn dedup_packages(packages: Vec<PkgSpecifier>) -> Vec<PkgSpecifier> {
  let mut seen = HashSet::new();
  packages
    .into_iter()
    .filter(|p| seen.insert(p.clone()))
    .collect()
}
