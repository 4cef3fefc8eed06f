// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

//! The bundler seam. The engine itself is an external collaborator; the
//! pipeline only consumes the narrow build API modeled here. [`EsbuildCli`]
//! drives an esbuild binary, but tests supply fakes through the [`Bundler`]
//! trait.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::bail;
use anyhow::Context;
use anyhow::Error as AnyError;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EsTarget {
  Es2015,
  Es2016,
  Es2017,
  Es2018,
  Es2019,
  Es2020,
}

impl EsTarget {
  pub fn as_str(self) -> &'static str {
    match self {
      EsTarget::Es2015 => "es2015",
      EsTarget::Es2016 => "es2016",
      EsTarget::Es2017 => "es2017",
      EsTarget::Es2018 => "es2018",
      EsTarget::Es2019 => "es2019",
      EsTarget::Es2020 => "es2020",
    }
  }
}

impl fmt::Display for EsTarget {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for EsTarget {
  type Err = AnyError;

  fn from_str(s: &str) -> Result<Self, AnyError> {
    match s.to_lowercase().as_str() {
      "es2015" => Ok(EsTarget::Es2015),
      "es2016" => Ok(EsTarget::Es2016),
      "es2017" => Ok(EsTarget::Es2017),
      "es2018" => Ok(EsTarget::Es2018),
      "es2019" => Ok(EsTarget::Es2019),
      "es2020" => Ok(EsTarget::Es2020),
      _ => bail!("unsupported target '{}'", s),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleFormat {
  Esm,
}

impl ModuleFormat {
  pub fn as_str(self) -> &'static str {
    match self {
      ModuleFormat::Esm => "esm",
    }
  }
}

#[derive(Debug, Clone)]
pub struct BundleOptions {
  pub entry_points: Vec<String>,
  pub bundle: bool,
  /// When false the bundle is returned in `output_files` instead of being
  /// written to disk by the engine.
  pub write: bool,
  pub target: EsTarget,
  pub format: ModuleFormat,
  pub externals: Vec<String>,
  pub minify_whitespace: bool,
  pub minify_identifiers: bool,
  pub minify_syntax: bool,
  pub defines: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Location {
  pub file: String,
  pub line: u32,
  pub column: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
  pub text: String,
  pub location: Option<Location>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildOutputFile {
  pub path: String,
  pub contents: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildResponse {
  pub errors: Vec<Message>,
  pub warnings: Vec<Message>,
  pub output_files: Vec<BuildOutputFile>,
}

#[async_trait]
pub trait Bundler: Send + Sync {
  async fn build(
    &self,
    cwd: &Path,
    options: &BundleOptions,
  ) -> Result<BuildResponse, AnyError>;
}

pub struct EsbuildCli {
  binary: PathBuf,
}

impl EsbuildCli {
  pub fn new(binary: impl Into<PathBuf>) -> Self {
    Self {
      binary: binary.into(),
    }
  }
}

#[async_trait]
impl Bundler for EsbuildCli {
  async fn build(
    &self,
    cwd: &Path,
    options: &BundleOptions,
  ) -> Result<BuildResponse, AnyError> {
    let mut cmd = tokio::process::Command::new(&self.binary);
    cmd.current_dir(cwd);
    cmd.args(&options.entry_points);
    if options.bundle {
      cmd.arg("--bundle");
    }
    cmd.arg(format!("--format={}", options.format.as_str()));
    cmd.arg(format!("--target={}", options.target));
    for name in &options.externals {
      cmd.arg(format!("--external:{}", name));
    }
    for (key, value) in &options.defines {
      cmd.arg(format!("--define:{}={}", key, value));
    }
    if options.minify_whitespace {
      cmd.arg("--minify-whitespace");
    }
    if options.minify_identifiers {
      cmd.arg("--minify-identifiers");
    }
    if options.minify_syntax {
      cmd.arg("--minify-syntax");
    }
    // write=false: the bundle is captured from stdout
    let output = cmd
      .output()
      .await
      .with_context(|| format!("running {}", self.binary.display()))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    let errors = parse_esbuild_messages(&stderr, "ERROR");
    let warnings = parse_esbuild_messages(&stderr, "WARNING");
    if !output.status.success() && errors.is_empty() {
      bail!("esbuild exited with {}: {}", output.status, stderr);
    }

    let mut output_files = Vec::new();
    if output.status.success() {
      output_files.push(BuildOutputFile {
        path: options.entry_points.first().cloned().unwrap_or_default(),
        contents: output.stdout,
      });
    }
    Ok(BuildResponse {
      errors,
      warnings,
      output_files,
    })
  }
}

// esbuild prints diagnostics like `✘ [ERROR] Could not resolve "react"`
// followed by indented location lines; only the message lines matter here.
fn parse_esbuild_messages(stderr: &str, level: &str) -> Vec<Message> {
  let marker = format!("[{}] ", level);
  let mut messages = Vec::new();
  for line in stderr.lines() {
    if let Some(idx) = line.find(&marker) {
      messages.push(Message {
        text: line[idx + marker.len()..].trim().to_string(),
        location: None,
      });
    }
  }
  messages
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn target_parse_and_display() {
    assert_eq!("es2019".parse::<EsTarget>().unwrap(), EsTarget::Es2019);
    assert_eq!("ES2015".parse::<EsTarget>().unwrap(), EsTarget::Es2015);
    assert!("es5".parse::<EsTarget>().is_err());
    assert_eq!(EsTarget::Es2020.to_string(), "es2020");
  }

  #[test]
  fn parse_error_messages() {
    let stderr = concat!(
      "✘ [ERROR] Could not resolve \"react\"\n",
      "\n",
      "    bundle.js:1:21:\n",
      "      1 │ export * as default from \"react-dom\";\n",
      "\n",
      "▲ [WARNING] Ignoring this import\n",
      "\n",
      "1 error\n",
    );
    let errors = parse_esbuild_messages(stderr, "ERROR");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].text, "Could not resolve \"react\"");
    let warnings = parse_esbuild_messages(stderr, "WARNING");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].text, "Ignoring this import");
  }
}
