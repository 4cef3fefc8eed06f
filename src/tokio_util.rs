// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

use std::future::Future;

pub fn create_basic_runtime() -> tokio::runtime::Runtime {
  tokio::runtime::Builder::new_current_thread()
    .enable_io()
    .enable_time()
    .build()
    .expect("Unable to create Tokio runtime")
}

pub fn run<F, R>(future: F) -> R
where
  F: Future<Output = R>,
{
  create_basic_runtime().block_on(future)
}
