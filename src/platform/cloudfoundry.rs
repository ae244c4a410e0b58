//! Cloud Foundry v3 client
//!
//! Blocking ureq calls run on the blocking pool. Tokens come from the
//! region's UAA with the resource-owner password grant.

use super::{AccessToken, AppAction, Platform, ProcessSummary};
use crate::chart::Region;
use crate::error::{Error, Result, truncate_body};
use crate::manifest::Credentials;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const AUTH_TIMEOUT: Duration = Duration::from_secs(8);
const API_TIMEOUT: Duration = Duration::from_secs(15);

/// Basic auth for the public `cf` client with an empty secret
const CF_CLIENT_AUTH: &str = "Basic Y2Y6";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct Resources<T> {
    #[serde(default = "Vec::new")]
    resources: Vec<T>,
}

#[derive(Deserialize)]
struct AppResource {
    guid: String,
}

#[derive(Deserialize)]
struct AppDetail {
    state: String,
}

#[derive(Deserialize)]
struct ProcessResource {
    guid: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct InstanceStat {
    state: String,
}

fn agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into()
}

fn transport(url: &str) -> impl FnOnce(ureq::Error) -> Error + '_ {
    move |e| match e {
        ureq::Error::Timeout(_) => Error::Timeout(url.to_string()),
        other => Error::Transport(format!("{}: {}", url, other)),
    }
}

fn decode<T: DeserializeOwned>(url: &str, text: &str) -> Result<T> {
    let text = if text.trim().is_empty() { "{}" } else { text };
    serde_json::from_str(text).map_err(|e| Error::Decode(format!("{}: {}", url, e)))
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Transport(format!("platform task failed: {}", e)))?
}

/// Cloud Foundry control plane
#[derive(Clone)]
pub struct CloudFoundry {
    credentials: Credentials,
    auth: ureq::Agent,
    api: ureq::Agent,
}

impl CloudFoundry {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            auth: agent(AUTH_TIMEOUT),
            api: agent(API_TIMEOUT),
        }
    }

    fn token_blocking(&self, uaa: &str) -> Result<AccessToken> {
        let url = format!("{}/oauth/token", uaa);
        debug!(email = %self.credentials.email, %uaa, "authenticating");

        let mut response = self
            .auth
            .post(&url)
            .header("Authorization", CF_CLIENT_AUTH)
            .send_form([
                ("grant_type", "password"),
                ("username", self.credentials.email.as_str()),
                ("password", self.credentials.password.as_str()),
                ("response_type", "token"),
            ])
            .map_err(transport(&url))?;

        let status = response.status().as_u16();
        let text = response.body_mut().read_to_string().unwrap_or_default();
        if !(200..300).contains(&status) {
            return Err(Error::Auth {
                status,
                body: truncate_body(&text),
            });
        }

        let parsed: TokenResponse = decode(&url, &text)?;
        parsed
            .access_token
            .filter(|t| !t.is_empty())
            .map(AccessToken::new)
            .ok_or_else(|| Error::Auth {
                status,
                body: "response carried no access_token".into(),
            })
    }

    fn get_blocking<T: DeserializeOwned>(
        &self,
        url: &str,
        token: &AccessToken,
        query: Option<(&str, &str)>,
    ) -> Result<T> {
        let mut request = self
            .api
            .get(url)
            .header("Authorization", &format!("Bearer {}", token.secret()));
        if let Some((key, value)) = query {
            request = request.query(key, value);
        }
        let mut response = request.call().map_err(transport(url))?;
        let status = response.status().as_u16();
        let text = response.body_mut().read_to_string().unwrap_or_default();
        check_status(status, url, &text)?;
        decode(url, &text)
    }

    fn post_blocking(&self, url: &str, token: &AccessToken) -> Result<()> {
        let mut response = self
            .api
            .post(url)
            .header("Authorization", &format!("Bearer {}", token.secret()))
            .header("Content-Type", "application/json")
            .send_empty()
            .map_err(transport(url))?;
        let status = response.status().as_u16();
        let text = response.body_mut().read_to_string().unwrap_or_default();
        check_status(status, url, &text)
    }
}

fn check_status(status: u16, url: &str, text: &str) -> Result<()> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(Error::PlatformApi {
            status,
            url: url.to_string(),
            body: truncate_body(text),
        })
    }
}

#[async_trait]
impl Platform for CloudFoundry {
    async fn authenticate(&self, region: &Region) -> Result<AccessToken> {
        let this = self.clone();
        let uaa = region.uaa.clone();
        blocking(move || this.token_blocking(&uaa)).await
    }

    async fn find_app(&self, region: &Region, token: &AccessToken, name: &str) -> Result<String> {
        let this = self.clone();
        let token = token.clone();
        let url = format!("{}/v3/apps", region.api);
        let name = name.to_string();
        blocking(move || {
            let list: Resources<AppResource> =
                this.get_blocking(&url, &token, Some(("names", name.as_str())))?;
            list.resources
                .into_iter()
                .next()
                .map(|app| app.guid)
                .ok_or(Error::AppNotFound(name))
        })
        .await
    }

    async fn app_action(
        &self,
        region: &Region,
        token: &AccessToken,
        guid: &str,
        action: AppAction,
    ) -> Result<()> {
        let this = self.clone();
        let token = token.clone();
        let url = format!("{}/v3/apps/{}/actions/{}", region.api, guid, action.as_str());
        debug!(%url, "issuing app action");
        blocking(move || this.post_blocking(&url, &token)).await
    }

    async fn app_state(&self, region: &Region, token: &AccessToken, guid: &str) -> Result<String> {
        let this = self.clone();
        let token = token.clone();
        let url = format!("{}/v3/apps/{}", region.api, guid);
        blocking(move || {
            let detail: AppDetail = this.get_blocking(&url, &token, None)?;
            Ok(detail.state)
        })
        .await
    }

    async fn processes(
        &self,
        region: &Region,
        token: &AccessToken,
        guid: &str,
    ) -> Result<Vec<ProcessSummary>> {
        let this = self.clone();
        let token = token.clone();
        let url = format!("{}/v3/apps/{}/processes", region.api, guid);
        blocking(move || {
            let list: Resources<ProcessResource> = this.get_blocking(&url, &token, None)?;
            Ok(list
                .resources
                .into_iter()
                .map(|p| ProcessSummary {
                    guid: p.guid,
                    kind: p.kind,
                })
                .collect())
        })
        .await
    }

    async fn instance_states(
        &self,
        region: &Region,
        token: &AccessToken,
        process_guid: &str,
    ) -> Result<Vec<String>> {
        let this = self.clone();
        let token = token.clone();
        let url = format!("{}/v3/processes/{}/stats", region.api, process_guid);
        blocking(move || {
            let stats: Resources<InstanceStat> = this.get_blocking(&url, &token, None)?;
            Ok(stats.resources.into_iter().map(|s| s.state).collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_status_truncates_body() {
        let body = "e".repeat(1000);
        match check_status(502, "https://api/v3/apps/x", &body) {
            Err(Error::PlatformApi { status, body, .. }) => {
                assert_eq!(status, 502);
                assert_eq!(body.len(), 200);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(check_status(204, "u", "").is_ok());
    }

    #[test]
    fn test_decode_empty_body() {
        let list: Resources<AppResource> = decode("u", "").unwrap();
        assert!(list.resources.is_empty());
    }

    #[test]
    fn test_decode_process_list() {
        let json = r#"{"resources":[{"guid":"p1","type":"worker"},{"guid":"p2","type":"web"}]}"#;
        let list: Resources<ProcessResource> = decode("u", json).unwrap();
        assert_eq!(list.resources[1].kind, "web");
    }

    #[test]
    fn test_client_auth_is_cf_with_empty_secret() {
        assert_eq!(CF_CLIENT_AUTH, "Basic Y2Y6");
    }
}
