// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

//! The build pipeline: derive the build id, consult the metadata store,
//! and on a miss resolve package descriptors, classify peer dependencies,
//! install into a scratch workspace, introspect runtime exports, stage type
//! declarations, bundle, and persist the artifact plus its metadata record.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;
use sha1::Digest;
use sha1::Sha1;

use crate::bundler::BundleOptions;
use crate::bundler::Bundler;
use crate::bundler::EsTarget;
use crate::bundler::ModuleFormat;
use crate::cache::MetaStore;
use crate::dts;
use crate::emit;
use crate::emit::env_name;
use crate::errors::BuildError;
use crate::fs_util;
use crate::introspect;
use crate::introspect::ModuleRuntime;
use crate::registry::probe_types_package;
use crate::registry::NpmPackage;
use crate::registry::NpmRegistryApi;
use crate::resolution::classify_peer_dependencies;
use crate::resolution::merge_submodule_peers;
use crate::specifier::dedup_packages;
use crate::specifier::identify;
use crate::specifier::packages_string;
use crate::specifier::PkgSpecifier;
use crate::workspace::InstallTool;
use crate::workspace::Workspace;

/// A package descriptor enriched with what the pipeline discovered about
/// the module: its runtime export names and the staged declaration entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportMeta {
  #[serde(flatten)]
  pub package: NpmPackage,
  pub exports: Vec<String>,
  #[serde(rename = "typespath")]
  pub types_path: String,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
  pub packages: Vec<PkgSpecifier>,
  pub target: EsTarget,
  pub dev: bool,
}

#[derive(Debug, Clone)]
pub struct BuildResult {
  pub build_id: String,
  /// Keyed by the import path of each requested specifier.
  pub import_meta: HashMap<String, ImportMeta>,
  pub single: bool,
}

/// Computes the content-addressed build identifier. Single-package requests
/// use a literal, deep-linkable form; bundles hash the canonical request
/// string with SHA-1 (content addressing, not security) and base32-encode
/// it so the id is a safe path segment.
pub fn build_id(options: &BuildOptions) -> String {
  if options.packages.len() == 1 {
    let pkg = &options.packages[0];
    let mut filename = if pkg.submodule.is_empty() {
      pkg.base_name().to_string()
    } else {
      pkg.submodule.clone()
    };
    if options.dev {
      filename.push_str(".development");
    }
    format!(
      "{}@{}/{}/{}",
      pkg.name, pkg.version, options.target, filename
    )
  } else {
    let mut sorted = options.packages.clone();
    sorted.sort();
    let mut hasher = Sha1::new();
    hasher.update(format!(
      "{} {} {}",
      packages_string(&sorted),
      options.target,
      options.dev
    ));
    format!(
      "bundle-{}",
      base32::encode(
        base32::Alphabet::RFC4648 { padding: false },
        hasher.finalize().as_slice(),
      )
      .to_lowercase()
    )
  }
}

pub struct Builder {
  storage_dir: PathBuf,
  store: Arc<dyn MetaStore>,
  registry: Arc<dyn NpmRegistryApi>,
  installer: Arc<dyn InstallTool>,
  runtime: Arc<dyn ModuleRuntime>,
  bundler: Arc<dyn Bundler>,
  lock: tokio::sync::Mutex<()>,
}

impl Builder {
  pub fn new(
    storage_dir: PathBuf,
    store: Arc<dyn MetaStore>,
    registry: Arc<dyn NpmRegistryApi>,
    installer: Arc<dyn InstallTool>,
    runtime: Arc<dyn ModuleRuntime>,
    bundler: Arc<dyn Bundler>,
  ) -> Self {
    Self {
      storage_dir,
      store,
      registry,
      installer,
      runtime,
      bundler,
      lock: tokio::sync::Mutex::new(()),
    }
  }

  /// Builds are serialized process-wide: the scratch-directory convention
  /// and the subprocess fan-out make the hot path non-reentrant.
  pub async fn build(
    &self,
    options: BuildOptions,
  ) -> Result<BuildResult, BuildError> {
    let _guard = self.lock.lock().await;
    self.build_inner(options).await
  }

  async fn build_inner(
    &self,
    mut options: BuildOptions,
  ) -> Result<BuildResult, BuildError> {
    options.packages = dedup_packages(options.packages);
    if options.packages.is_empty() {
      return Err(BuildError::EmptyRequest);
    }
    let single = options.packages.len() == 1;
    if !single {
      options.packages.sort();
    }
    let build_id = build_id(&options);

    if let Some(import_meta) = self.lookup_cached(&build_id)? {
      return Ok(BuildResult {
        build_id,
        import_meta,
        single,
      });
    }

    let mut install_list: Vec<String> =
      options.packages.iter().map(|p| p.install_spec()).collect();

    let start = Instant::now();
    let mut import_meta: HashMap<String, ImportMeta> = HashMap::new();
    for pkg in &options.packages {
      let info = self.registry.package_info(&pkg.name, &pkg.version).await?;
      if !info.has_inline_types() && !pkg.name.starts_with('@') {
        if let Some(spec) =
          probe_types_package(self.registry.as_ref(), &pkg.name).await?
        {
          install_list.push(spec);
        }
      }
      import_meta.insert(
        pkg.import_path(),
        ImportMeta {
          package: info,
          exports: Vec::new(),
          types_path: String::new(),
        },
      );
    }

    let descriptors: Vec<NpmPackage> = options
      .packages
      .iter()
      .filter_map(|p| import_meta.get(&p.import_path()))
      .map(|meta| meta.package.clone())
      .collect();
    let classification =
      classify_peer_dependencies(&options.packages, &descriptors, single);
    install_list.extend(classification.install);
    let mut externals = classification.externals;
    log::debug!("parse importMeta in {:?}", start.elapsed());

    let workspace = Workspace::new().map_err(BuildError::Workspace)?;
    self.installer.add(workspace.root(), &install_list).await?;

    // a submodule with its own descriptor becomes a bundler-addressable
    // sibling package, and contributes its peer dependencies
    let mut staged_submodule: Option<NpmPackage> = None;
    if single {
      let pkg = &options.packages[0];
      if !pkg.submodule.is_empty() {
        if let Some(submodule_pkg) = workspace
          .stage_submodule(pkg)
          .map_err(BuildError::Workspace)?
        {
          merge_submodule_peers(&mut externals, &submodule_pkg);
          staged_submodule = Some(submodule_pkg);
        }
      }
    }

    let env = env_name(options.dev);
    let start = Instant::now();
    let exports = introspect::introspect_exports(
      self.runtime.as_ref(),
      &workspace,
      &options.packages,
      env,
    )
    .await?;
    for (import_path, names) in exports {
      if let Some(meta) = import_meta.get_mut(&import_path) {
        meta.exports = names;
      }
    }
    log::debug!("node peer.js in {:?}", start.elapsed());

    let start = Instant::now();
    for pkg in &options.packages {
      if !pkg.submodule.is_empty() && staged_submodule.is_none() {
        continue;
      }
      let import_path = pkg.import_path();
      let Some(meta) = import_meta.get(&import_path) else {
        continue;
      };
      let entry = dts::resolve_types_entry(
        pkg,
        &meta.package,
        staged_submodule.as_ref(),
        &workspace.node_modules(),
      )
      .map_err(BuildError::TypeStaging)?;
      if entry.is_empty() {
        continue;
      }
      let staged = dts::copy_dts(
        &workspace.node_modules(),
        &self.storage_dir.join("types"),
        &entry,
      )
      .map_err(BuildError::TypeStaging)?;
      if staged {
        if let Some(meta) = import_meta.get_mut(&import_path) {
          meta.types_path = format!("/{}", entry);
        }
      }
    }
    log::debug!("copy dts in {:?}", start.elapsed());

    let mut code = String::new();
    for pkg in &options.packages {
      let import_path = pkg.import_path();
      if single {
        let target_path = if staged_submodule.is_some() {
          identify(&import_path)
        } else {
          import_path
        };
        let _ =
          write!(code, r#"export * as default from "{}";"#, target_path);
      } else {
        let _ = write!(
          code,
          r#"export * as {} from "{}";"#,
          identify(&import_path),
          import_path
        );
      }
    }
    workspace
      .write_entry("bundle.js", &code)
      .map_err(BuildError::Workspace)?;

    self.resolve_external_versions(&workspace, &mut externals)?;

    let minify = !options.dev;
    let mut defines = BTreeMap::new();
    defines.insert(
      "process.env.NODE_ENV".to_string(),
      format!("\"{}\"", env),
    );
    let bundle_options = BundleOptions {
      entry_points: vec!["bundle.js".to_string()],
      bundle: true,
      write: false,
      target: options.target,
      format: ModuleFormat::Esm,
      externals: externals.keys().cloned().collect(),
      minify_whitespace: minify,
      minify_identifiers: minify,
      minify_syntax: minify,
      defines,
    };
    let response = self
      .bundle_with_retry(&workspace, &bundle_options, &options, env)
      .await?;
    let Some(output) = response.output_files.first() else {
      return Err(BuildError::Bundle("no output produced".to_string()));
    };

    let artifact = emit::render_artifact(
      &packages_string(&options.packages),
      options.target,
      options.dev,
      &externals,
      &output.contents,
    );
    let artifact_path = self.artifact_path(&build_id);
    if let Some(parent) = artifact_path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|err| BuildError::Persistence(err.into()))?;
    }
    fs_util::atomic_write_file(&artifact_path, &artifact, 0o644)
      .map_err(|err| BuildError::Persistence(err.into()))?;

    let encoded = serde_json::to_string(&import_meta)
      .map_err(|err| BuildError::Persistence(err.into()))?;
    self
      .store
      .put(&build_id, &["bundle"], &[("importMeta", &encoded)])
      .map_err(BuildError::Persistence)?;

    Ok(BuildResult {
      build_id,
      import_meta,
      single,
    })
  }

  /// Cache lookup with self-healing: a record whose metadata fails to
  /// decode, or whose artifact file has gone missing, is deleted and
  /// treated as a miss.
  fn lookup_cached(
    &self,
    build_id: &str,
  ) -> Result<Option<HashMap<String, ImportMeta>>, BuildError> {
    let Some(fields) = self
      .store
      .get(build_id, &["importMeta"])
      .map_err(BuildError::Store)?
    else {
      return Ok(None);
    };
    let decoded = fields
      .get("importMeta")
      .and_then(|raw| serde_json::from_str(raw).ok());
    let Some(import_meta) = decoded else {
      log::debug!("invalidating corrupt record for {}", build_id);
      self.store.delete(build_id).map_err(BuildError::Store)?;
      return Ok(None);
    };
    if !self.artifact_path(build_id).exists() {
      log::debug!("artifact for {} is missing, invalidating", build_id);
      self.store.delete(build_id).map_err(BuildError::Store)?;
      return Ok(None);
    }
    Ok(Some(import_meta))
  }

  /// Every externalized package resolves to the concrete version that the
  /// install tool actually materialized.
  fn resolve_external_versions(
    &self,
    workspace: &Workspace,
    externals: &mut BTreeMap<String, String>,
  ) -> Result<(), BuildError> {
    for (name, version) in externals.iter_mut() {
      let info = workspace
        .read_installed_package(name)
        .map_err(BuildError::Workspace)?
        .ok_or_else(|| {
          BuildError::Workspace(anyhow::anyhow!(
            "external package '{}' is not installed",
            name
          ))
        })?;
      *version = info.version;
    }
    Ok(())
  }

  async fn bundle_with_retry(
    &self,
    workspace: &Workspace,
    bundle_options: &BundleOptions,
    options: &BuildOptions,
    env: &str,
  ) -> Result<crate::bundler::BuildResponse, BuildError> {
    let mut missing_resolved: HashSet<String> = HashSet::new();
    loop {
      let start = Instant::now();
      let response = self
        .bundler
        .build(workspace.root(), bundle_options)
        .await
        .map_err(|err| BuildError::Bundle(format!("{:#}", err)))?;
      if let Some(first) = response.errors.first() {
        if let Some(missing) = missing_module_name(&first.text) {
          if missing_resolved.insert(missing.clone()) {
            self.installer.add(workspace.root(), &[missing]).await?;
            continue;
          }
        }
        return Err(BuildError::Bundle(first.text.clone()));
      }
      log::debug!(
        "esbuild bundle {} {} {} in {:?}",
        packages_string(&options.packages),
        options.target,
        env,
        start.elapsed()
      );
      return Ok(response);
    }
  }

  fn artifact_path(&self, build_id: &str) -> PathBuf {
    self
      .storage_dir
      .join("builds")
      .join(format!("{}.js", build_id))
  }
}

fn missing_module_name(text: &str) -> Option<String> {
  let rest = text.strip_prefix("Could not resolve \"")?;
  let name = &rest[..rest.find('"')?];
  if name.is_empty() {
    None
  } else {
    Some(name.to_string())
  }
}

#[cfg(test)]
mod tests {
  use std::path::Path;
  use std::sync::Mutex;

  use async_trait::async_trait;
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::bundler::BuildOutputFile;
  use crate::bundler::BuildResponse;
  use crate::bundler::Message;
  use crate::cache::SqliteMetaStore;
  use crate::registry::RegistryError;

  fn pkg(name: &str, version: &str) -> PkgSpecifier {
    PkgSpecifier::new(name, version)
  }

  fn options(packages: Vec<PkgSpecifier>) -> BuildOptions {
    BuildOptions {
      packages,
      target: EsTarget::Es2019,
      dev: false,
    }
  }

  #[test]
  fn single_mode_id_is_literal() {
    let id = build_id(&options(vec![pkg("left-pad", "1.3.0")]));
    assert_eq!(id, "left-pad@1.3.0/es2019/left-pad");

    let id = build_id(&BuildOptions {
      packages: vec![pkg("preact", "10.5.0").with_submodule("hooks")],
      target: EsTarget::Es2019,
      dev: false,
    });
    assert_eq!(id, "preact@10.5.0/es2019/hooks");

    let id = build_id(&BuildOptions {
      packages: vec![pkg("@scope/foo", "1.0.0")],
      target: EsTarget::Es2017,
      dev: true,
    });
    assert_eq!(id, "@scope/foo@1.0.0/es2017/foo.development");
  }

  #[test]
  fn bundle_id_is_permutation_stable() {
    let forward = build_id(&options(vec![
      pkg("react", "17.0.2"),
      pkg("react-dom", "17.0.2"),
    ]));
    let reverse = build_id(&options(vec![
      pkg("react-dom", "17.0.2"),
      pkg("react", "17.0.2"),
    ]));
    assert_eq!(forward, reverse);
    assert!(forward.starts_with("bundle-"));
    // 20 sha1 bytes encode to 32 base32 chars, all lowercase
    let digest = forward.strip_prefix("bundle-").unwrap();
    assert_eq!(digest.len(), 32);
    assert!(digest
      .chars()
      .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
  }

  #[test]
  fn bundle_id_distinguishes_requests() {
    let base = options(vec![
      pkg("react", "17.0.2"),
      pkg("react-dom", "17.0.2"),
    ]);
    let id = build_id(&base);
    let mut other = base.clone();
    other.dev = true;
    assert_ne!(id, build_id(&other));
    let mut other = base.clone();
    other.target = EsTarget::Es2015;
    assert_ne!(id, build_id(&other));
    let mut other = base.clone();
    other.packages[1] = pkg("react-dom", "17.0.1");
    assert_ne!(id, build_id(&other));
  }

  #[test]
  fn one_package_is_never_a_degenerate_bundle() {
    let id = build_id(&options(vec![pkg("react", "17.0.2")]));
    assert!(!id.starts_with("bundle-"));
  }

  #[test]
  fn missing_module_name_extraction() {
    assert_eq!(
      missing_module_name("Could not resolve \"object-assign\""),
      Some("object-assign".to_string())
    );
    assert_eq!(
      missing_module_name(
        "Could not resolve \"react\" (mark it as external to exclude)"
      ),
      Some("react".to_string())
    );
    assert_eq!(missing_module_name("Could not resolve \"\""), None);
    assert_eq!(missing_module_name("Transform failed"), None);
  }

  // ---------------------------------------------------------------------
  // end-to-end pipeline tests over fake collaborators

  #[derive(Default)]
  struct FakeRegistry {
    packages: HashMap<String, NpmPackage>,
    requests: Mutex<Vec<String>>,
  }

  impl FakeRegistry {
    fn add(&mut self, version_key: &str, info: NpmPackage) {
      self.packages.insert(version_key.to_string(), info);
    }

    fn requested(&self) -> Vec<String> {
      self.requests.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl NpmRegistryApi for FakeRegistry {
    async fn package_info(
      &self,
      name: &str,
      version: &str,
    ) -> Result<NpmPackage, RegistryError> {
      let key = format!("{}@{}", name, version);
      self.requests.lock().unwrap().push(key.clone());
      self
        .packages
        .get(&key)
        .cloned()
        .ok_or_else(|| RegistryError::PackageNotFound(name.to_string()))
    }
  }

  /// Materializes package.json files (and any extra fixture files) under
  /// node_modules for every spec it is asked to install.
  #[derive(Default)]
  struct FakeInstaller {
    packages: HashMap<String, NpmPackage>,
    extra_files: Vec<(String, String)>,
    calls: Mutex<Vec<Vec<String>>>,
  }

  impl FakeInstaller {
    fn with_packages(packages: Vec<NpmPackage>) -> Self {
      Self {
        packages: packages
          .into_iter()
          .map(|p| (p.name.clone(), p))
          .collect(),
        ..Default::default()
      }
    }

    fn extra_file(mut self, relative: &str, contents: &str) -> Self {
      self
        .extra_files
        .push((relative.to_string(), contents.to_string()));
      self
    }

    fn calls(&self) -> Vec<Vec<String>> {
      self.calls.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl InstallTool for FakeInstaller {
    async fn add(
      &self,
      cwd: &Path,
      specs: &[String],
    ) -> Result<(), BuildError> {
      self.calls.lock().unwrap().push(specs.to_vec());
      let node_modules = cwd.join("node_modules");
      for spec in specs {
        let name = match spec.strip_prefix('@') {
          Some(rest) => match rest.find('@') {
            Some(i) => &spec[..i + 1],
            None => spec.as_str(),
          },
          None => spec.split('@').next().unwrap_or(spec),
        };
        if let Some(info) = self.packages.get(name) {
          let dir = node_modules.join(name);
          std::fs::create_dir_all(&dir).unwrap();
          std::fs::write(
            dir.join("package.json"),
            serde_json::to_string(info).unwrap(),
          )
          .unwrap();
        }
      }
      for (relative, contents) in &self.extra_files {
        let path = node_modules.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
      }
      Ok(())
    }
  }

  struct FakeRuntime {
    output: String,
  }

  #[async_trait]
  impl ModuleRuntime for FakeRuntime {
    async fn run(
      &self,
      _cwd: &Path,
      _script: &str,
      _env: &[(&str, String)],
    ) -> Result<Vec<u8>, BuildError> {
      Ok(self.output.clone().into_bytes())
    }
  }

  /// Echoes the generated entry file back as the bundle output after
  /// draining a scripted list of error responses.
  #[derive(Default)]
  struct FakeBundler {
    scripted_errors: Mutex<Vec<Message>>,
    seen_options: Mutex<Vec<BundleOptions>>,
  }

  impl FakeBundler {
    fn with_errors(errors: Vec<&str>) -> Self {
      Self {
        scripted_errors: Mutex::new(
          errors
            .into_iter()
            .map(|text| Message {
              text: text.to_string(),
              location: None,
            })
            .collect(),
        ),
        ..Default::default()
      }
    }

    fn seen_options(&self) -> Vec<BundleOptions> {
      self.seen_options.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl Bundler for FakeBundler {
    async fn build(
      &self,
      cwd: &Path,
      options: &BundleOptions,
    ) -> Result<BuildResponse, anyhow::Error> {
      self.seen_options.lock().unwrap().push(options.clone());
      let mut scripted = self.scripted_errors.lock().unwrap();
      if !scripted.is_empty() {
        let error = scripted.remove(0);
        return Ok(BuildResponse {
          errors: vec![error],
          ..Default::default()
        });
      }
      let entry = cwd.join(&options.entry_points[0]);
      Ok(BuildResponse {
        output_files: vec![BuildOutputFile {
          path: options.entry_points[0].clone(),
          contents: std::fs::read(entry).unwrap_or_default(),
        }],
        ..Default::default()
      })
    }
  }

  struct TestHarness {
    storage_dir: tempfile::TempDir,
    registry: Arc<FakeRegistry>,
    installer: Arc<FakeInstaller>,
    bundler: Arc<FakeBundler>,
    builder: Builder,
  }

  fn harness(
    registry: FakeRegistry,
    installer: FakeInstaller,
    bundler: FakeBundler,
    introspection: &str,
  ) -> TestHarness {
    let storage_dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(registry);
    let installer = Arc::new(installer);
    let bundler = Arc::new(bundler);
    let builder = Builder::new(
      storage_dir.path().to_path_buf(),
      Arc::new(SqliteMetaStore::in_memory().unwrap()),
      registry.clone(),
      installer.clone(),
      Arc::new(FakeRuntime {
        output: introspection.to_string(),
      }),
      bundler.clone(),
    );
    TestHarness {
      storage_dir,
      registry,
      installer,
      bundler,
      builder,
    }
  }

  fn descriptor(name: &str, version: &str) -> NpmPackage {
    NpmPackage {
      name: name.to_string(),
      version: version.to_string(),
      main: "index.js".to_string(),
      ..Default::default()
    }
  }

  #[tokio::test]
  async fn empty_request_is_rejected() {
    let t = harness(
      FakeRegistry::default(),
      FakeInstaller::default(),
      FakeBundler::default(),
      "{}",
    );
    let err = t.builder.build(options(vec![])).await.unwrap_err();
    assert!(matches!(err, BuildError::EmptyRequest));
    assert_eq!(err.to_string(), "no packages");
  }

  #[tokio::test]
  async fn single_package_cold_build() {
    let mut registry = FakeRegistry::default();
    registry.add("left-pad@1.3.0", descriptor("left-pad", "1.3.0"));
    let installer = FakeInstaller::with_packages(vec![descriptor(
      "left-pad", "1.3.0",
    )]);
    let t = harness(
      registry,
      installer,
      FakeBundler::default(),
      r#"{"left-pad":{"exports":["default","leftPad"]}}"#,
    );

    let result = t
      .builder
      .build(options(vec![pkg("left-pad", "1.3.0")]))
      .await
      .unwrap();
    assert_eq!(result.build_id, "left-pad@1.3.0/es2019/left-pad");
    assert!(result.single);
    let meta = &result.import_meta["left-pad"];
    assert_eq!(meta.exports, vec!["default", "leftPad"]);
    // no declaration files were installed, so nothing may be staged
    assert_eq!(meta.types_path, "");

    let artifact = t
      .storage_dir
      .path()
      .join("builds")
      .join("left-pad@1.3.0")
      .join("es2019")
      .join("left-pad.js");
    let text = std::fs::read_to_string(&artifact).unwrap();
    assert!(text.starts_with(
      "/* esm.sh - esbuild bundle(left-pad@1.3.0) es2019 production */"
    ));
    assert!(text.contains(r#"export * as default from "left-pad";"#));

    // the @types probe was issued for the plain package
    assert!(t
      .registry
      .requested()
      .contains(&"@types/left-pad@latest".to_string()));

    // production settings minify and pin NODE_ENV
    let seen = t.bundler.seen_options();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].minify_whitespace);
    assert!(seen[0].minify_identifiers);
    assert!(seen[0].minify_syntax);
    assert_eq!(
      seen[0].defines["process.env.NODE_ENV"],
      "\"production\""
    );
  }

  #[tokio::test]
  async fn single_package_stages_types_from_types_package() {
    let mut registry = FakeRegistry::default();
    registry.add("left-pad@1.3.0", descriptor("left-pad", "1.3.0"));
    registry.add("@types/left-pad@latest", {
      let mut info = descriptor("@types/left-pad", "1.2.0");
      info.types = "index.d.ts".to_string();
      info
    });
    let installer = FakeInstaller::with_packages(vec![
      descriptor("left-pad", "1.3.0"),
      {
        let mut info = descriptor("@types/left-pad", "1.2.0");
        info.types = "index.d.ts".to_string();
        info
      },
    ])
    .extra_file("@types/left-pad/index.d.ts", "declare function leftPad(): string;");
    let t = harness(
      registry,
      installer,
      FakeBundler::default(),
      r#"{"left-pad":{"exports":["default"]}}"#,
    );

    let result = t
      .builder
      .build(options(vec![pkg("left-pad", "1.3.0")]))
      .await
      .unwrap();
    assert_eq!(
      result.import_meta["left-pad"].types_path,
      "/@types/left-pad@1.2.0/index.d.ts"
    );
    assert!(t
      .storage_dir
      .path()
      .join("types")
      .join("@types/left-pad@1.2.0")
      .join("index.d.ts")
      .exists());
    // the concrete @types version made it onto the install list
    assert!(t.installer.calls()[0]
      .contains(&"@types/left-pad@1.2.0".to_string()));
  }

  #[tokio::test]
  async fn scoped_package_is_never_probed_for_types() {
    let mut registry = FakeRegistry::default();
    registry.add("@scope/foo@1.0.0", descriptor("@scope/foo", "1.0.0"));
    let installer = FakeInstaller::with_packages(vec![descriptor(
      "@scope/foo",
      "1.0.0",
    )]);
    let t = harness(
      registry,
      installer,
      FakeBundler::default(),
      r#"{"@scope/foo":{"exports":[]}}"#,
    );

    t.builder
      .build(options(vec![pkg("@scope/foo", "1.0.0")]))
      .await
      .unwrap();
    let requested = t.registry.requested();
    assert!(requested
      .iter()
      .all(|key| !key.starts_with("@types/")));
  }

  #[tokio::test]
  async fn bundle_mode_exports_each_package() {
    let mut registry = FakeRegistry::default();
    registry.add("react@17.0.2", descriptor("react", "17.0.2"));
    registry.add("react-dom@17.0.2", descriptor("react-dom", "17.0.2"));
    let installer = FakeInstaller::with_packages(vec![
      descriptor("react", "17.0.2"),
      descriptor("react-dom", "17.0.2"),
    ]);
    let t = harness(
      registry,
      installer,
      FakeBundler::default(),
      r#"{"react":{"exports":["createElement"]},"react-dom":{"exports":["render"]}}"#,
    );

    let result = t
      .builder
      .build(options(vec![
        pkg("react-dom", "17.0.2"),
        pkg("react", "17.0.2"),
      ]))
      .await
      .unwrap();
    assert!(result.build_id.starts_with("bundle-"));
    assert!(!result.single);

    let artifact = std::fs::read_to_string(
      t.storage_dir
        .path()
        .join("builds")
        .join(format!("{}.js", result.build_id)),
    )
    .unwrap();
    assert!(artifact.contains(r#"export * as react from "react";"#));
    assert!(
      artifact.contains(r#"export * as react_dom from "react-dom";"#)
    );
  }

  #[tokio::test]
  async fn dev_build_keeps_output_readable() {
    let mut registry = FakeRegistry::default();
    registry.add("react@17.0.2", descriptor("react", "17.0.2"));
    registry.add("react-dom@17.0.2", descriptor("react-dom", "17.0.2"));
    let installer = FakeInstaller::with_packages(vec![
      descriptor("react", "17.0.2"),
      descriptor("react-dom", "17.0.2"),
    ]);
    let t = harness(
      registry,
      installer,
      FakeBundler::default(),
      r#"{"react":{"exports":[]},"react-dom":{"exports":[]}}"#,
    );

    let result = t
      .builder
      .build(BuildOptions {
        packages: vec![pkg("react", "17.0.2"), pkg("react-dom", "17.0.2")],
        target: EsTarget::Es2019,
        dev: true,
      })
      .await
      .unwrap();

    let artifact = std::fs::read_to_string(
      t.storage_dir
        .path()
        .join("builds")
        .join(format!("{}.js", result.build_id)),
    )
    .unwrap();
    let header_end = artifact.find(emit::EOL).unwrap();
    assert!(artifact[..header_end].ends_with(" development */"));

    let seen = t.bundler.seen_options();
    assert!(!seen[0].minify_whitespace);
    assert!(!seen[0].minify_identifiers);
    assert!(!seen[0].minify_syntax);
    assert_eq!(
      seen[0].defines["process.env.NODE_ENV"],
      "\"development\""
    );
  }

  #[tokio::test]
  async fn independent_peer_is_externalized_with_concrete_version() {
    let mut registry = FakeRegistry::default();
    registry.add("react-dom@17.0.2", {
      let mut info = descriptor("react-dom", "17.0.2");
      info
        .peer_dependencies
        .insert("react".to_string(), "^17.0.0".to_string());
      info
    });
    let installer = FakeInstaller::with_packages(vec![
      descriptor("react-dom", "17.0.2"),
      descriptor("react", "17.0.2"),
    ]);
    let t = harness(
      registry,
      installer,
      FakeBundler::default(),
      r#"{"react-dom":{"exports":["render"]}}"#,
    );

    let result = t
      .builder
      .build(options(vec![pkg("react-dom", "17.0.2")]))
      .await
      .unwrap();

    // the peer was added to the install list
    assert!(t.installer.calls()[0].contains(&"react".to_string()));
    // and handed to the bundler as an external
    let seen = t.bundler.seen_options();
    assert_eq!(seen[0].externals, vec!["react".to_string()]);

    let artifact = std::fs::read_to_string(
      t.storage_dir
        .path()
        .join("builds")
        .join(format!("{}.js", result.build_id)),
    )
    .unwrap();
    assert!(artifact.contains(
      r#"import react from "/react@17.0.2/es2019/react.js";"#
    ));
    assert!(artifact
      .contains(r#"var require = name => __esModules[name];"#));
  }

  #[tokio::test]
  async fn submodule_build_stages_and_externalizes_peers() {
    let mut registry = FakeRegistry::default();
    registry.add("preact@10.5.0", descriptor("preact", "10.5.0"));
    let installer = FakeInstaller::with_packages(vec![descriptor(
      "preact", "10.5.0",
    )])
    .extra_file(
      "preact/hooks/package.json",
      r#"{"name":"hooks","version":"10.5.0","main":"dist.js","peerDependencies":{"preact":"10.x"}}"#,
    )
    .extra_file("preact/hooks/dist.js", "export {};");
    let t = harness(
      registry,
      installer,
      FakeBundler::default(),
      r#"{"preact/hooks":{"exports":["useState"]}}"#,
    );

    let result = t
      .builder
      .build(options(vec![
        pkg("preact", "10.5.0").with_submodule("hooks"),
      ]))
      .await
      .unwrap();
    assert_eq!(result.build_id, "preact@10.5.0/es2019/hooks");
    assert_eq!(
      result.import_meta["preact/hooks"].exports,
      vec!["useState"]
    );

    let artifact = std::fs::read_to_string(
      t.storage_dir
        .path()
        .join("builds")
        .join("preact@10.5.0")
        .join("es2019")
        .join("hooks.js"),
    )
    .unwrap();
    // the entry targets the staged sibling, not the externalized parent
    assert!(
      artifact.contains(r#"export * as default from "preact_hooks";"#)
    );
    // the submodule's peer resolved to the installed concrete version
    assert!(artifact.contains(
      r#"import preact from "/preact@10.5.0/es2019/preact.js";"#
    ));
    let seen = t.bundler.seen_options();
    assert_eq!(seen[0].externals, vec!["preact".to_string()]);
  }

  #[tokio::test]
  async fn unresolved_module_is_installed_and_retried() {
    let mut registry = FakeRegistry::default();
    registry.add("react@17.0.2", descriptor("react", "17.0.2"));
    let installer = FakeInstaller::with_packages(vec![
      descriptor("react", "17.0.2"),
      descriptor("object-assign", "4.1.1"),
    ]);
    let bundler = FakeBundler::with_errors(vec![
      "Could not resolve \"object-assign\"",
    ]);
    let t = harness(
      registry,
      installer,
      bundler,
      r#"{"react":{"exports":[]}}"#,
    );

    t.builder
      .build(options(vec![pkg("react", "17.0.2")]))
      .await
      .unwrap();
    // one initial install, one retry install of the missing module
    let calls = t.installer.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1], vec!["object-assign".to_string()]);
    assert_eq!(t.bundler.seen_options().len(), 2);
  }

  #[tokio::test]
  async fn repeated_unresolved_module_is_fatal() {
    let mut registry = FakeRegistry::default();
    registry.add("react@17.0.2", descriptor("react", "17.0.2"));
    let installer = FakeInstaller::with_packages(vec![descriptor(
      "react", "17.0.2",
    )]);
    let bundler = FakeBundler::with_errors(vec![
      "Could not resolve \"object-assign\"",
      "Could not resolve \"object-assign\"",
    ]);
    let t = harness(
      registry,
      installer,
      bundler,
      r#"{"react":{"exports":[]}}"#,
    );

    let err = t
      .builder
      .build(options(vec![pkg("react", "17.0.2")]))
      .await
      .unwrap_err();
    assert_eq!(
      err.to_string(),
      "esbuild: Could not resolve \"object-assign\""
    );
  }

  #[tokio::test]
  async fn other_bundler_errors_are_fatal() {
    let mut registry = FakeRegistry::default();
    registry.add("react@17.0.2", descriptor("react", "17.0.2"));
    let installer = FakeInstaller::with_packages(vec![descriptor(
      "react", "17.0.2",
    )]);
    let bundler =
      FakeBundler::with_errors(vec!["Transform failed with 1 error"]);
    let t = harness(
      registry,
      installer,
      bundler,
      r#"{"react":{"exports":[]}}"#,
    );

    let err = t
      .builder
      .build(options(vec![pkg("react", "17.0.2")]))
      .await
      .unwrap_err();
    assert_eq!(err.to_string(), "esbuild: Transform failed with 1 error");
  }

  #[tokio::test]
  async fn hot_build_is_served_from_cache() {
    let mut registry = FakeRegistry::default();
    registry.add("left-pad@1.3.0", descriptor("left-pad", "1.3.0"));
    let installer = FakeInstaller::with_packages(vec![descriptor(
      "left-pad", "1.3.0",
    )]);
    let t = harness(
      registry,
      installer,
      FakeBundler::default(),
      r#"{"left-pad":{"exports":["default"]}}"#,
    );

    let request = options(vec![pkg("left-pad", "1.3.0")]);
    let cold = t.builder.build(request.clone()).await.unwrap();
    let hot = t.builder.build(request).await.unwrap();
    assert_eq!(cold.import_meta, hot.import_meta);
    // the pipeline ran exactly once
    assert_eq!(t.bundler.seen_options().len(), 1);
  }

  #[tokio::test]
  async fn missing_artifact_invalidates_record_and_rebuilds() {
    let mut registry = FakeRegistry::default();
    registry.add("left-pad@1.3.0", descriptor("left-pad", "1.3.0"));
    let installer = FakeInstaller::with_packages(vec![descriptor(
      "left-pad", "1.3.0",
    )]);
    let t = harness(
      registry,
      installer,
      FakeBundler::default(),
      r#"{"left-pad":{"exports":["default"]}}"#,
    );

    let request = options(vec![pkg("left-pad", "1.3.0")]);
    let cold = t.builder.build(request.clone()).await.unwrap();
    let artifact = t
      .builder
      .artifact_path(&cold.build_id);
    std::fs::remove_file(&artifact).unwrap();

    let rebuilt = t.builder.build(request).await.unwrap();
    assert_eq!(cold.import_meta, rebuilt.import_meta);
    assert!(artifact.exists());
    assert!(t
      .builder
      .store
      .get(&cold.build_id, &[])
      .unwrap()
      .is_some());
    assert_eq!(t.bundler.seen_options().len(), 2);
  }

  #[tokio::test]
  async fn corrupt_record_is_invalidated_and_rebuilt() {
    let mut registry = FakeRegistry::default();
    registry.add("left-pad@1.3.0", descriptor("left-pad", "1.3.0"));
    let installer = FakeInstaller::with_packages(vec![descriptor(
      "left-pad", "1.3.0",
    )]);
    let t = harness(
      registry,
      installer,
      FakeBundler::default(),
      r#"{"left-pad":{"exports":["default"]}}"#,
    );

    t.builder
      .store
      .put(
        "left-pad@1.3.0/es2019/left-pad",
        &["bundle"],
        &[("importMeta", "{corrupt")],
      )
      .unwrap();

    let result = t
      .builder
      .build(options(vec![pkg("left-pad", "1.3.0")]))
      .await
      .unwrap();
    assert_eq!(
      result.import_meta["left-pad"].exports,
      vec!["default"]
    );
  }

  #[tokio::test]
  async fn import_meta_roundtrips_through_the_store() {
    let mut registry = FakeRegistry::default();
    registry.add("left-pad@1.3.0", descriptor("left-pad", "1.3.0"));
    let installer = FakeInstaller::with_packages(vec![descriptor(
      "left-pad", "1.3.0",
    )]);
    let t = harness(
      registry,
      installer,
      FakeBundler::default(),
      r#"{"left-pad":{"exports":["default"]}}"#,
    );

    let request = options(vec![pkg("left-pad", "1.3.0")]);
    let cold = t.builder.build(request.clone()).await.unwrap();
    let raw = t
      .builder
      .store
      .get(&cold.build_id, &["importMeta"])
      .unwrap()
      .unwrap();
    let decoded: HashMap<String, ImportMeta> =
      serde_json::from_str(&raw["importMeta"]).unwrap();
    assert_eq!(decoded, cold.import_meta);
  }

  #[tokio::test]
  async fn duplicate_specifiers_are_collapsed() {
    let mut registry = FakeRegistry::default();
    registry.add("left-pad@1.3.0", descriptor("left-pad", "1.3.0"));
    let installer = FakeInstaller::with_packages(vec![descriptor(
      "left-pad", "1.3.0",
    )]);
    let t = harness(
      registry,
      installer,
      FakeBundler::default(),
      r#"{"left-pad":{"exports":["default"]}}"#,
    );

    let result = t
      .builder
      .build(options(vec![
        pkg("left-pad", "1.3.0"),
        pkg("left-pad", "1.3.0"),
      ]))
      .await
      .unwrap();
    // single mode applies after deduplication
    assert!(result.single);
    assert_eq!(result.build_id, "left-pad@1.3.0/es2019/left-pad");
  }
}
