// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::Error as AnyError;
use clap::Arg;
use clap::ArgAction;
use clap::Command;

use crate::bundler::EsTarget;
use crate::specifier::PkgSpecifier;

#[derive(Debug, Clone, PartialEq)]
pub struct Flags {
  pub packages: Vec<PkgSpecifier>,
  pub target: EsTarget,
  pub dev: bool,
  pub storage_dir: PathBuf,
  pub registry_url: String,
  pub esbuild_bin: String,
  pub log_level: Option<log::Level>,
}

fn clap_root() -> Command {
  Command::new("esmd")
    .bin_name("esmd")
    .version(env!("CARGO_PKG_VERSION"))
    .about("An on-demand npm module bundler")
    .subcommand_required(true)
    .arg_required_else_help(true)
    .arg(
      Arg::new("log-level")
        .short('L')
        .long("log-level")
        .help("Set log level [possible values: debug, info]")
        .value_parser(["debug", "info"])
        .global(true),
    )
    .subcommand(build_subcommand())
}

fn build_subcommand() -> Command {
  Command::new("build")
    .about("Build one or more packages into a single ESM artifact")
    .arg(
      Arg::new("packages")
        .help("Package specifiers (name@version[/submodule])")
        .num_args(1..)
        .required(true)
        .action(ArgAction::Append),
    )
    .arg(
      Arg::new("target")
        .long("target")
        .help("ECMAScript year target")
        .value_parser(["es2015", "es2016", "es2017", "es2018", "es2019", "es2020"])
        .default_value("es2019"),
    )
    .arg(
      Arg::new("dev")
        .long("dev")
        .help("Build for the development environment")
        .action(ArgAction::SetTrue),
    )
    .arg(
      Arg::new("storage-dir")
        .long("storage-dir")
        .help("Directory holding builds, types and the metadata store")
        .default_value(".esmd"),
    )
    .arg(
      Arg::new("registry")
        .long("registry")
        .help("npm registry base URL")
        .default_value("https://registry.npmjs.org"),
    )
    .arg(
      Arg::new("esbuild")
        .long("esbuild")
        .help("Path to the esbuild binary")
        .default_value("esbuild"),
    )
}

pub fn flags_from_vec(args: Vec<OsString>) -> Result<Flags, AnyError> {
  let matches = clap_root().try_get_matches_from(args)?;
  let log_level = match matches.get_one::<String>("log-level").map(|s| s.as_str())
  {
    Some("debug") => Some(log::Level::Debug),
    Some("info") => Some(log::Level::Info),
    _ => None,
  };
  let Some(("build", m)) = matches.subcommand() else {
    unreachable!("a subcommand is required");
  };
  let packages = match m.get_many::<String>("packages") {
    Some(values) => values
      .map(|s| s.parse())
      .collect::<Result<Vec<PkgSpecifier>, AnyError>>()?,
    None => Vec::new(),
  };
  Ok(Flags {
    packages,
    target: m
      .get_one::<String>("target")
      .map(|s| s.as_str())
      .unwrap_or("es2019")
      .parse()?,
    dev: m.get_flag("dev"),
    storage_dir: PathBuf::from(
      m.get_one::<String>("storage-dir")
        .map(|s| s.as_str())
        .unwrap_or(".esmd"),
    ),
    registry_url: m
      .get_one::<String>("registry")
      .map(|s| s.to_string())
      .unwrap_or_default(),
    esbuild_bin: m
      .get_one::<String>("esbuild")
      .map(|s| s.to_string())
      .unwrap_or_default(),
    log_level,
  })
}
