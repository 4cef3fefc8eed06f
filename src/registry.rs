// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;

use crate::http_util::HttpClient;

/// Registry-shaped package descriptor. Missing fields deserialize to their
/// defaults because version manifests omit most of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NpmPackage {
  pub name: String,
  pub version: String,
  pub main: String,
  pub types: String,
  pub typings: String,
  pub dependencies: HashMap<String, String>,
  pub peer_dependencies: HashMap<String, String>,
}

impl NpmPackage {
  pub fn has_inline_types(&self) -> bool {
    !self.types.is_empty() || !self.typings.is_empty()
  }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
  /// The exact sentinel surfaced for unknown packages; callers match on it
  /// to distinguish a missing package from a transport failure.
  #[error("npm: package '{0}' not found")]
  PackageNotFound(String),

  #[error("npm: {0}")]
  Transport(String),
}

#[async_trait]
pub trait NpmRegistryApi: Send + Sync {
  async fn package_info(
    &self,
    name: &str,
    version: &str,
  ) -> Result<NpmPackage, RegistryError>;
}

/// Gets the corresponding @types package for the provided package name.
pub fn types_package_name(package_name: &str) -> String {
  debug_assert!(!package_name.starts_with('@'));
  format!("@types/{}", package_name)
}

/// Probes the registry for a `@types/{name}` companion package. Returns the
/// concrete install spec when one exists and actually ships an entry file.
/// Scoped packages must not be probed.
pub async fn probe_types_package(
  api: &dyn NpmRegistryApi,
  name: &str,
) -> Result<Option<String>, RegistryError> {
  let types_name = types_package_name(name);
  match api.package_info(&types_name, "latest").await {
    Ok(info) => {
      if !info.types.is_empty()
        || !info.typings.is_empty()
        || !info.main.is_empty()
      {
        Ok(Some(format!("{}@{}", info.name, info.version)))
      } else {
        Ok(None)
      }
    }
    Err(RegistryError::PackageNotFound(name)) if name == types_name => {
      Ok(None)
    }
    Err(err) => Err(err),
  }
}

/// Registry client backed by the npm HTTP API. Resolved descriptors are
/// memoized for the lifetime of the process; the build lock serializes the
/// only caller, so a resolved-value map suffices.
pub struct HttpRegistry {
  client: HttpClient,
  registry_url: String,
  mem_cache: Mutex<HashMap<String, NpmPackage>>,
}

impl HttpRegistry {
  pub fn new(registry_url: &str) -> Result<Self, anyhow::Error> {
    Ok(Self {
      client: HttpClient::new()?,
      registry_url: registry_url.trim_end_matches('/').to_string(),
      mem_cache: Default::default(),
    })
  }
}

#[async_trait]
impl NpmRegistryApi for HttpRegistry {
  async fn package_info(
    &self,
    name: &str,
    version: &str,
  ) -> Result<NpmPackage, RegistryError> {
    let key = format!("{}@{}", name, version);
    if let Some(info) = self.mem_cache.lock().get(&key) {
      return Ok(info.clone());
    }
    let url = format!("{}/{}/{}", self.registry_url, name, version);
    let response = self
      .client
      .get(&url)
      .await
      .map_err(|err| RegistryError::Transport(format!("{:#}", err)))?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
      return Err(RegistryError::PackageNotFound(name.to_string()));
    }
    if !response.status().is_success() {
      return Err(RegistryError::Transport(format!(
        "bad response for '{}': {}",
        name,
        response.status()
      )));
    }
    let info: NpmPackage = response
      .json()
      .await
      .map_err(|err| RegistryError::Transport(format!("{:#}", err)))?;
    self.mem_cache.lock().insert(key, info.clone());
    Ok(info)
  }
}
