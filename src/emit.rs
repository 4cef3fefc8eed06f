// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

//! Artifact assembly: the identifying header, the ESM import preamble for
//! externalized packages, the synthetic `require` shim and the rewrite of
//! the bundler output against it.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Captures;
use regex::Regex;

use crate::bundler::EsTarget;
use crate::fs_util::ensure_ext;
use crate::specifier::identify;

#[cfg(windows)]
pub const EOL: &str = "\r\n";
#[cfg(not(windows))]
pub const EOL: &str = "\n";

pub fn env_name(dev: bool) -> &'static str {
  if dev {
    "development"
  } else {
    "production"
  }
}

/// Assembles the final artifact: header, then (when externals exist) the
/// import preamble plus `require` shim with the rewritten bundle, else the
/// bundle verbatim.
pub fn render_artifact(
  packages_string: &str,
  target: EsTarget,
  dev: bool,
  externals: &BTreeMap<String, String>,
  bundle_output: &[u8],
) -> Vec<u8> {
  let env = env_name(dev);
  let mut out = String::new();
  let _ = write!(
    out,
    "/* esm.sh - esbuild bundle({}) {} {} */{}",
    packages_string,
    target.as_str(),
    env,
    EOL
  );

  if externals.is_empty() {
    out.push_str(&String::from_utf8_lossy(bundle_output));
    return out.into_bytes();
  }

  let (eol, indent) = if dev { (EOL, "  ") } else { ("", "") };
  let mut es_modules = Vec::new();
  for (name, version) in externals {
    let identifier = identify(name);
    let mut filename =
      name.rsplit('/').next().unwrap_or(name.as_str()).to_string();
    if dev {
      filename.push_str(".development");
    }
    es_modules.push(format!(r#""{}": {}"#, name, identifier));
    let _ = write!(
      out,
      r#"import {} from "/{}@{}/{}/{}";{}"#,
      identifier,
      name,
      version,
      target,
      ensure_ext(&filename, ".js"),
      eol
    );
  }
  let _ = write!(out, "var __esModules = {{{}", eol);
  let _ = write!(
    out,
    "{}{}{}",
    indent,
    es_modules.join(&format!(",{}{}", eol, indent)),
    eol
  );
  let _ = write!(out, "}};{}", eol);
  let _ = write!(out, "var require = name => __esModules[name];{}", eol);
  out.push_str(&to_require(&String::from_utf8_lossy(bundle_output)));
  out.into_bytes()
}

static IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(concat!(
    r"import\s*",
    r"(?:\*\s*as\s+(?P<ns>[A-Za-z_$][\w$]*)",
    r"|(?P<named>\{[^}]*\})",
    r"|(?P<default>[A-Za-z_$][\w$]*))",
    r#"\s*from\s*"(?P<spec>[^"]+)"\s*;?"#,
  ))
  .unwrap()
});
static SIDE_EFFECT_IMPORT_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r#"import\s*"(?P<spec>[^"]+)"\s*;?"#).unwrap());
static INTEROP_REQUIRE_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r#"__require\(\s*("[^"]+")\s*\)"#).unwrap());

/// Rewrites the bundler output so every residual reference to an external
/// module goes through the synthetic `require` shim. Recognized forms,
/// double-quoted literal specifiers only:
/// - `import X from "x"` / `import * as X from "x"` -> `var X = require("x");`
/// - `import {a, b as c} from "x"` -> `var {a, b: c} = require("x");`
/// - `import "x"` -> `require("x");`
/// - `__require("x")` -> `require("x")`
pub fn to_require(code: &str) -> String {
  let code = IMPORT_RE.replace_all(code, |caps: &Captures| {
    let spec = &caps["spec"];
    if let Some(ns) = caps.name("ns") {
      format!(r#"var {} = require("{}");"#, ns.as_str(), spec)
    } else if let Some(named) = caps.name("named") {
      format!(
        r#"var {} = require("{}");"#,
        named.as_str().replace(" as ", ": "),
        spec
      )
    } else {
      format!(r#"var {} = require("{}");"#, &caps["default"], spec)
    }
  });
  let code = SIDE_EFFECT_IMPORT_RE
    .replace_all(&code, |caps: &Captures| {
      format!(r#"require("{}");"#, &caps["spec"])
    });
  INTEROP_REQUIRE_RE
    .replace_all(&code, "require($1)")
    .into_owned()
}
