// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

//! Runtime-exports introspection: a generated driver script `require`s each
//! requested module under the chosen NODE_ENV and reports the enumerable
//! export names as a single JSON object on stdout.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::BuildError;
use crate::specifier::identify;
use crate::specifier::PkgSpecifier;
use crate::workspace::combined_output;
use crate::workspace::Workspace;

#[async_trait]
pub trait ModuleRuntime: Send + Sync {
  /// Runs `node {script}` in `cwd` with the given extra environment.
  /// Returns the process stdout; non-zero exit surfaces combined output.
  async fn run(
    &self,
    cwd: &Path,
    script: &str,
    env: &[(&str, String)],
  ) -> Result<Vec<u8>, BuildError>;
}

pub struct NodeRuntime;

#[async_trait]
impl ModuleRuntime for NodeRuntime {
  async fn run(
    &self,
    cwd: &Path,
    script: &str,
    env: &[(&str, String)],
  ) -> Result<Vec<u8>, BuildError> {
    let output = tokio::process::Command::new("node")
      .arg(script)
      .current_dir(cwd)
      .envs(env.iter().map(|(key, value)| (*key, value.as_str())))
      .output()
      .await
      .map_err(|err| BuildError::Introspection(format!("node: {}", err)))?;
    if !output.status.success() {
      return Err(BuildError::Introspection(combined_output(&output)));
    }
    Ok(output.stdout)
  }
}

pub fn introspection_script(packages: &[PkgSpecifier]) -> String {
  let mut code = String::new();
  code.push_str("const meta = {};");
  code.push_str(
    "const isObject = v => typeof v === 'object' && v !== null;",
  );
  for pkg in packages {
    let import_path = pkg.import_path();
    let identifier = identify(&import_path);
    let _ = write!(
      code,
      r#"const {identifier} = require("{import_path}");"#
    );
    let _ = write!(
      code,
      r#"meta["{import_path}"] = {{exports: isObject({identifier}) ? Object.keys({identifier}) : []}};"#
    );
  }
  code.push_str("process.stdout.write(JSON.stringify(meta));");
  code
}

#[derive(Debug, Default, Deserialize)]
struct IntrospectedModule {
  #[serde(default)]
  exports: Vec<String>,
}

/// Writes and runs the driver script, returning each requested import
/// path's discovered export names.
pub async fn introspect_exports(
  runtime: &dyn ModuleRuntime,
  workspace: &Workspace,
  packages: &[PkgSpecifier],
  env: &str,
) -> Result<HashMap<String, Vec<String>>, BuildError> {
  workspace
    .write_entry("peer.js", &introspection_script(packages))
    .map_err(BuildError::Workspace)?;
  let output = runtime
    .run(
      workspace.root(),
      "peer.js",
      &[("NODE_ENV", env.to_string())],
    )
    .await?;
  let modules: HashMap<String, IntrospectedModule> =
    serde_json::from_slice(&output).map_err(|err| {
      BuildError::Introspection(format!(
        "invalid introspection output: {}",
        err
      ))
    })?;
  Ok(
    modules
      .into_iter()
      .map(|(import_path, module)| (import_path, module.exports))
      .collect(),
  )
}
