// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

use anyhow::Error as AnyError;

fn get_user_agent() -> String {
  format!("esmd/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone)]
pub struct HttpClient(reqwest::Client);

impl HttpClient {
  pub fn new() -> Result<Self, AnyError> {
    Ok(HttpClient::from_client(
      reqwest::Client::builder()
        .user_agent(get_user_agent())
        .build()?,
    ))
  }

  pub fn from_client(client: reqwest::Client) -> Self {
    Self(client)
  }

  pub async fn get<U: reqwest::IntoUrl>(
    &self,
    url: U,
  ) -> Result<reqwest::Response, AnyError> {
    Ok(self.0.get(url).send().await?)
  }
}
