// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

//! Peer-dependency classification. A peer dependency is *independent* when
//! it is neither requested itself nor a regular dependency of any requested
//! package; independent packages are installed so the bundler can resolve
//! them and, in single mode, externalized as sub-references to other builds.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashSet;

use crate::registry::NpmPackage;
use crate::specifier::PkgSpecifier;

#[derive(Debug, Default, PartialEq)]
pub struct PeerClassification {
  /// Names to append to the install list.
  pub install: Vec<String>,
  /// Externalized name -> version; seeded `"latest"`, resolved to concrete
  /// versions from the install tree before bundling.
  pub externals: BTreeMap<String, String>,
}

pub fn classify_peer_dependencies(
  packages: &[PkgSpecifier],
  descriptors: &[NpmPackage],
  single: bool,
) -> PeerClassification {
  let mut peer_names = BTreeSet::new();
  for descriptor in descriptors {
    peer_names.extend(descriptor.peer_dependencies.keys().cloned());
  }

  let requested: HashSet<&str> =
    packages.iter().map(|p| p.name.as_str()).collect();

  let mut classification = PeerClassification::default();
  for name in peer_names {
    let mut independent = !requested.contains(name.as_str());
    if independent {
      independent = !descriptors
        .iter()
        .any(|d| d.dependencies.contains_key(&name));
    }
    if independent {
      classification.install.push(name.clone());
      if single {
        classification.externals.insert(name, "latest".to_string());
      }
    }
  }
  classification
}

/// Peer dependencies declared by a staged submodule are always
/// externalized, on top of whatever the request-level pass produced.
pub fn merge_submodule_peers(
  externals: &mut BTreeMap<String, String>,
  submodule_pkg: &NpmPackage,
) {
  for name in submodule_pkg.peer_dependencies.keys() {
    externals.insert(name.clone(), "latest".to_string());
  }
}
