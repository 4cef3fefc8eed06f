// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

use std::env;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Error as AnyError;
use serde_json::json;

use esmd::build::BuildOptions;
use esmd::build::Builder;
use esmd::bundler::EsbuildCli;
use esmd::cache::SqliteMetaStore;
use esmd::flags;
use esmd::flags::Flags;
use esmd::introspect::NodeRuntime;
use esmd::registry::HttpRegistry;
use esmd::tokio_util;
use esmd::workspace::YarnCli;

fn init_logger(maybe_level: Option<log::Level>) {
  let log_level = maybe_level.unwrap_or(log::Level::Info);
  env_logger::Builder::from_env(
    env_logger::Env::new()
      .filter_or("ESMD_LOG", log_level.to_level_filter().to_string())
      .write_style("ESMD_LOG_STYLE"),
  )
  .init();
}

async fn run_build(flags: Flags) -> Result<(), AnyError> {
  std::fs::create_dir_all(&flags.storage_dir).with_context(|| {
    format!("creating storage dir {}", flags.storage_dir.display())
  })?;
  let store =
    Arc::new(SqliteMetaStore::new(&flags.storage_dir.join("esmd.db"))?);
  let registry = Arc::new(HttpRegistry::new(&flags.registry_url)?);
  let builder = Builder::new(
    flags.storage_dir.clone(),
    store,
    registry,
    Arc::new(YarnCli),
    Arc::new(NodeRuntime),
    Arc::new(EsbuildCli::new(&flags.esbuild_bin)),
  );
  let result = builder
    .build(BuildOptions {
      packages: flags.packages,
      target: flags.target,
      dev: flags.dev,
    })
    .await?;
  println!(
    "{}",
    serde_json::to_string_pretty(&json!({
      "buildID": result.build_id,
      "importMeta": result.import_meta,
    }))?
  );
  Ok(())
}

fn main() {
  let flags = match flags::flags_from_vec(env::args_os().collect()) {
    Ok(flags) => flags,
    Err(err) => {
      eprintln!("{}", err);
      std::process::exit(1);
    }
  };
  init_logger(flags.log_level);
  if let Err(err) = tokio_util::run(run_build(flags)) {
    log::error!("{:#}", err);
    std::process::exit(1);
  }
}
