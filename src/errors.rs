// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

//! The error taxonomy of the build pipeline. Subprocess failures carry the
//! tool's combined stdout+stderr verbatim; filesystem and store failures
//! keep their context chain.

use anyhow::Error as AnyError;

use crate::registry::RegistryError;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
  /// Zero packages in the request.
  #[error("no packages")]
  EmptyRequest,

  /// The registry returned a non-sentinel error.
  #[error(transparent)]
  Registry(#[from] RegistryError),

  /// The metadata store failed on lookup or invalidation.
  #[error("store: {0:#}")]
  Store(AnyError),

  /// The install tool exited non-zero; the message is its combined output.
  #[error("{0}")]
  Install(String),

  /// Scratch directory creation, staging or entry writes failed.
  #[error("workspace: {0:#}")]
  Workspace(AnyError),

  /// The module runtime exited non-zero or produced non-JSON output.
  #[error("{0}")]
  Introspection(String),

  /// The bundler reported errors that the retry loop could not resolve.
  #[error("esbuild: {0}")]
  Bundle(String),

  /// Copying declaration files into the types area failed.
  #[error("types: {0:#}")]
  TypeStaging(AnyError),

  /// The artifact write or the metadata record write failed.
  #[error("persist: {0:#}")]
  Persistence(AnyError),
}
