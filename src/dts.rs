// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

//! Type-declaration staging: deriving the `.d.ts` entry of a package and
//! copying the transitive declaration graph from the install tree into the
//! persistent types area.

use std::collections::HashSet;
use std::io;
use std::path::Path;

use anyhow::bail;
use anyhow::Context;
use anyhow::Error as AnyError;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::fs_util;
use crate::registry::NpmPackage;
use crate::specifier::PkgSpecifier;
use crate::workspace::read_package_json;

/// Derives the declaration entry for a package descriptor: `types`, then
/// `typings`, then `main` with its `.js` suffix stripped; normalized to a
/// `.d.ts` suffix and anchored at `{name}@{version}`. Empty when the
/// descriptor names no entry at all.
pub fn get_types_path(p: &NpmPackage) -> String {
  let path = if !p.types.is_empty() {
    p.types.clone()
  } else if !p.typings.is_empty() {
    p.typings.clone()
  } else if !p.main.is_empty() {
    p.main.strip_suffix(".js").unwrap_or(&p.main).to_string()
  } else {
    return String::new();
  };
  format!(
    "{}@{}/{}",
    p.name,
    p.version,
    fs_util::ensure_ext(&fs_util::normalize_rel_path(&path), ".d.ts")
  )
}

/// Rewrites a staged submodule's declaration entry so it is anchored at the
/// parent package: `{name}@{version}/{submodule}/{relative-types}`.
pub fn submodule_types_path(
  parent: &NpmPackage,
  submodule: &str,
  submodule_pkg: &NpmPackage,
) -> String {
  let types = get_types_path(submodule_pkg);
  if types.is_empty() {
    return String::new();
  }
  let anchor = format!("{}@{}/", submodule_pkg.name, submodule_pkg.version);
  let relative = types.strip_prefix(&anchor).unwrap_or(&types);
  format!(
    "{}@{}/{}",
    parent.name,
    parent.version,
    fs_util::normalize_rel_path(&format!("{}/{}", submodule, relative))
  )
}

/// Computes the declaration entry for one requested specifier:
/// 1. staged submodule descriptor, re-anchored at the parent package;
/// 2. for plain packages without inline types, the installed
///    `@types/{name}` package;
/// 3. the package's own descriptor.
pub fn resolve_types_entry(
  pkg: &PkgSpecifier,
  descriptor: &NpmPackage,
  staged_submodule: Option<&NpmPackage>,
  node_modules: &Path,
) -> Result<String, AnyError> {
  let mut types = String::new();
  if let Some(submodule_pkg) = staged_submodule {
    types = submodule_types_path(descriptor, &pkg.submodule, submodule_pkg);
  } else if !descriptor.has_inline_types() && !pkg.name.starts_with('@') {
    let types_pkg_json = node_modules
      .join(format!("@types/{}", pkg.name))
      .join("package.json");
    if let Some(info) = read_package_json(&types_pkg_json)? {
      types = get_types_path(&info);
    }
  }
  if types.is_empty() {
    types = get_types_path(descriptor);
  }
  Ok(types)
}

// `{name}@{version}/{rel}` where the name may be scoped
fn split_types_entry(entry: &str) -> Option<(String, String, String)> {
  let at = if let Some(rest) = entry.strip_prefix('@') {
    rest.find('@').map(|i| i + 1)
  } else {
    entry.find('@')
  };
  let at = at?;
  let name = &entry[..at];
  let rest = &entry[at + 1..];
  let (version, relative) = rest.split_once('/')?;
  if name.is_empty() || version.is_empty() || relative.is_empty() {
    return None;
  }
  Some((
    name.to_string(),
    format!("{}@{}", name, version),
    relative.to_string(),
  ))
}

static REFERENCE_PATH_RE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r#"///\s*<reference\s+path\s*=\s*"([^"]+)""#).unwrap()
});
static IMPORT_FROM_RE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r#"(?:import|export)\s[^;"']*?from\s*"(\.[^"]+)""#).unwrap()
});
static BARE_IMPORT_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r#"import\s*"(\.[^"]+)""#).unwrap());

fn scan_dts_references(text: &str) -> Vec<String> {
  let mut references = Vec::new();
  for caps in REFERENCE_PATH_RE.captures_iter(text) {
    references.push(caps[1].to_string());
  }
  for caps in IMPORT_FROM_RE.captures_iter(text) {
    references.push(caps[1].to_string());
  }
  for caps in BARE_IMPORT_RE.captures_iter(text) {
    references.push(caps[1].to_string());
  }
  references
}

/// Copies the declaration entry plus every `.d.ts` file it references
/// (triple-slash reference paths and relative import/export specifiers)
/// from the install tree into the types area. Missing source files are
/// tolerated; any other I/O failure is fatal. Returns whether the entry
/// file itself was copied.
pub fn copy_dts(
  node_modules: &Path,
  types_dir: &Path,
  entry: &str,
) -> Result<bool, AnyError> {
  let Some((name, anchor, first)) = split_types_entry(entry) else {
    bail!("invalid declaration entry '{}'", entry);
  };
  let src_root = node_modules.join(&name);
  let dst_root = types_dir.join(&anchor);

  let mut entry_copied = false;
  let mut pending = vec![fs_util::normalize_rel_path(&first)];
  let mut seen: HashSet<String> = HashSet::new();
  while let Some(relative) = pending.pop() {
    if !seen.insert(relative.clone()) {
      continue;
    }
    let src = src_root.join(&relative);
    let text = match std::fs::read_to_string(&src) {
      Ok(text) => text,
      Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
      Err(err) => {
        return Err(err)
          .with_context(|| format!("reading {}", src.display()));
      }
    };

    let dir = match relative.rsplit_once('/') {
      Some((dir, _)) => dir,
      None => "",
    };
    for reference in scan_dts_references(&text) {
      let resolved = fs_util::ensure_ext(
        &fs_util::normalize_rel_path(&format!("{}/{}", dir, reference)),
        ".d.ts",
      );
      pending.push(resolved);
    }

    let dst = dst_root.join(&relative);
    if let Some(parent) = dst.parent() {
      std::fs::create_dir_all(parent)
        .with_context(|| format!("creating {}", parent.display()))?;
    }
    fs_util::write_file(&dst, &text, 0o644)
      .with_context(|| format!("writing {}", dst.display()))?;
    if relative == fs_util::normalize_rel_path(&first) {
      entry_copied = true;
    }
  }
  Ok(entry_copied)
}
