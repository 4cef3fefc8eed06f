// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

pub mod build;
pub mod bundler;
pub mod cache;
pub mod dts;
pub mod emit;
pub mod errors;
pub mod flags;
pub mod fs_util;
pub mod http_util;
pub mod introspect;
pub mod registry;
pub mod resolution;
pub mod specifier;
pub mod tokio_util;
pub mod workspace;

pub use build::build_id;
pub use build::BuildOptions;
pub use build::BuildResult;
pub use build::Builder;
pub use build::ImportMeta;
pub use errors::BuildError;
pub use specifier::PkgSpecifier;
