use crate::config::Profile;
use crate::models::{Resource, STATUS_ENDPOINT, Status};
use anyhow::{Context, Result};
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

const USER_AGENT: &str = concat!("nbcli/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
const CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no {kind} named `{name}` exists")]
    NotFound { kind: &'static str, name: String },
    #[error("{count} objects of kind {kind} are named `{name}`")]
    Ambiguous {
        kind: &'static str,
        name: String,
        count: usize,
    },
    #[error("NetBox responded with {status}: {body}")]
    Http { status: StatusCode, body: String },
}

impl ApiError {
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Ambiguous { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            accept_invalid_certs: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default)]
    next: Option<String>,
    results: Vec<T>,
}

/// Builds `{scheme}://{server}:{port}{base_path}` for a profile.
///
/// The scheme is taken from the server when it carries one, otherwise it is
/// `https` for port 443 and `http` for anything else. The returned URL always
/// ends with a slash so endpoint paths can be joined onto it.
pub fn base_url(profile: &Profile) -> Result<Url> {
    let server = profile.server.trim().trim_end_matches('/');
    let (scheme, host) = if let Some(host) = server.strip_prefix("https://") {
        ("https", host)
    } else if let Some(host) = server.strip_prefix("http://") {
        ("http", host)
    } else if profile.port == 443 {
        ("https", server)
    } else {
        ("http", server)
    };

    let path = profile.base_path.trim().trim_matches('/');
    let path = if path.is_empty() {
        "/".to_string()
    } else {
        format!("/{path}/")
    };

    let raw = format!("{scheme}://{host}:{}{path}", profile.port);
    Url::parse(&raw).with_context(|| format!("building API URL from `{raw}`"))
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    http: Client,
    token: Option<String>,
}

impl ApiClient {
    pub fn from_profile(profile: &Profile, options: &ClientOptions) -> Result<Self> {
        Self::new(base_url(profile)?, &profile.api_key, options)
    }

    pub fn new(base_url: Url, api_key: &str, options: &ClientOptions) -> Result<Self> {
        let http = Client::builder()
            .user_agent(HeaderValue::from_static(USER_AGENT))
            .timeout(options.timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .build()
            .context("building HTTP client")?;

        let api_key = api_key.trim();
        Ok(Self {
            base_url,
            http,
            token: (!api_key.is_empty()).then(|| api_key.to_string()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Every object of `T` matching `filters`, following NetBox pagination.
    pub fn list<T: Resource>(&self, filters: &[(&str, String)]) -> Result<Vec<T>> {
        let mut url = self.endpoint(T::ENDPOINT)?;
        if !filters.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(filters.iter().map(|(key, value)| (*key, value.as_str())));
        }

        let mut items = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next.take() {
            let page: Page<T> = decode(self.send(Method::GET, url, Option::<&()>::None)?)?;
            items.extend(page.results);
            next = page
                .next
                .map(|link| Url::parse(&link))
                .transpose()
                .context("parsing pagination link")?;
            if let Some(link) = &next {
                trace!(%link, fetched = items.len(), "following next page");
            }
        }
        Ok(items)
    }

    /// The single object of `T` whose name is exactly `name`.
    pub fn get_by_name<T: Resource>(&self, name: &str) -> Result<T> {
        let mut found: Vec<T> = self.list(&[("name", name.to_string())])?;
        match found.len() {
            0 => Err(ApiError::NotFound {
                kind: T::KIND,
                name: name.to_string(),
            }
            .into()),
            1 => Ok(found.remove(0)),
            count => Err(ApiError::Ambiguous {
                kind: T::KIND,
                name: name.to_string(),
                count,
            }
            .into()),
        }
    }

    pub fn create<T: Resource, B: Serialize + ?Sized>(&self, payload: &B) -> Result<T> {
        let url = self.endpoint(T::ENDPOINT)?;
        decode(self.send(Method::POST, url, Some(payload))?)
    }

    pub fn update<T: Resource, B: Serialize + ?Sized>(&self, id: u64, patch: &B) -> Result<T> {
        let url = self.object(T::ENDPOINT, id)?;
        decode(self.send(Method::PATCH, url, Some(patch))?)
    }

    pub fn delete<T: Resource>(&self, id: u64) -> Result<()> {
        let url = self.object(T::ENDPOINT, id)?;
        self.send(Method::DELETE, url, Option::<&()>::None)?;
        Ok(())
    }

    pub fn status(&self) -> Result<Status> {
        let url = self.endpoint(STATUS_ENDPOINT)?;
        decode(self.send(Method::GET, url, Option::<&()>::None)?)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("joining path `{path}` to base URL"))
    }

    fn object(&self, endpoint: &str, id: u64) -> Result<Url> {
        self.endpoint(&format!("{endpoint}{id}/"))
    }

    fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<Response> {
        debug!(%method, %url, "sending request");
        let context = format!("sending {method} {url}");

        let mut request = self
            .http
            .request(method, url)
            .header(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Token {token}"));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().context(context)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ApiError::Http {
                status,
                body: body.trim().to_string(),
            }
            .into());
        }
        Ok(response)
    }
}

fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let url = response.url().clone();
    let text = response.text().context("reading response body")?;
    serde_json::from_str(&text).with_context(|| format!("decoding response from {url}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Region, Site, SitePatch};
    use httpmock::prelude::*;
    use serde_json::json;

    fn profile_for(server: &MockServer, api_key: &str) -> Profile {
        Profile {
            server: "127.0.0.1".into(),
            port: server.port(),
            base_path: "/".into(),
            api_key: api_key.into(),
        }
    }

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::from_profile(&profile_for(server, "test-token"), &ClientOptions::default())
            .unwrap()
    }

    fn site(id: u64, name: &str) -> serde_json::Value {
        json!({
            "id": id,
            "name": name,
            "slug": name.to_lowercase(),
            "status": {"value": "active", "label": "Active"},
            "region": null
        })
    }

    #[test]
    fn builds_base_urls_from_profiles() {
        let mut profile = Profile::default();
        assert_eq!(base_url(&profile).unwrap().as_str(), "http://localhost:8000/");

        profile.base_path = "netbox".into();
        assert_eq!(
            base_url(&profile).unwrap().as_str(),
            "http://localhost:8000/netbox/"
        );

        let tls = Profile::new("netbox.example.com", "", 443);
        assert_eq!(
            base_url(&tls).unwrap().as_str(),
            "https://netbox.example.com/"
        );

        let explicit = Profile::new("https://nb.internal/", "", 8443);
        assert_eq!(
            base_url(&explicit).unwrap().as_str(),
            "https://nb.internal:8443/"
        );
    }

    #[test]
    fn sends_token_and_follows_pagination() {
        let server = MockServer::start();
        let first = server.mock(|when, then| {
            when.method(GET)
                .path("/api/dcim/sites/")
                .query_param("status", "active")
                .header("Authorization", "Token test-token");
            then.status(200).json_body(json!({
                "count": 3,
                "next": server.url("/api/dcim/sites/?offset=2&limit=2"),
                "previous": null,
                "results": [site(1, "AMS1"), site(2, "FRA1")]
            }));
        });
        let second = server.mock(|when, then| {
            when.method(GET)
                .path("/api/dcim/sites/")
                .query_param("offset", "2");
            then.status(200).json_body(json!({
                "count": 3,
                "next": null,
                "previous": null,
                "results": [site(3, "LON1")]
            }));
        });

        let sites: Vec<Site> = client_for(&server)
            .list(&[("status", "active".to_string())])
            .unwrap();

        first.assert();
        second.assert();
        let names: Vec<_> = sites.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["AMS1", "FRA1", "LON1"]);
    }

    #[test]
    fn get_by_name_reports_missing_and_ambiguous() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/api/dcim/regions/")
                .query_param("name", "Nowhere");
            then.status(200)
                .json_body(json!({"count": 0, "next": null, "results": []}));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/api/dcim/regions/")
                .query_param("name", "Twice");
            then.status(200).json_body(json!({
                "count": 2,
                "next": null,
                "results": [
                    {"id": 1, "name": "Twice", "slug": "twice-a"},
                    {"id": 2, "name": "Twice", "slug": "twice-b"}
                ]
            }));
        });

        let client = client_for(&server);
        let err = client.get_by_name::<Region>("Nowhere").unwrap_err();
        let api = err.downcast_ref::<ApiError>().unwrap();
        assert!(matches!(api, ApiError::NotFound { kind: "region", .. }));
        assert!(api.is_user_error());

        let err = client.get_by_name::<Region>("Twice").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ApiError>(),
            Some(ApiError::Ambiguous { count: 2, .. })
        ));
    }

    #[test]
    fn creates_updates_and_deletes_objects() {
        let server = MockServer::start();
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/api/dcim/sites/")
                .json_body(json!({"name": "AMS1", "slug": "ams1"}));
            then.status(201).json_body(site(10, "AMS1"));
        });
        let update = server.mock(|when, then| {
            when.method(PATCH)
                .path("/api/dcim/sites/10/")
                .json_body(json!({"slug": "ams-1"}));
            then.status(200).json_body(site(10, "AMS1"));
        });
        let delete = server.mock(|when, then| {
            when.method(DELETE).path("/api/dcim/sites/10/");
            then.status(204);
        });

        let client = client_for(&server);
        let created: Site = client
            .create(&json!({"name": "AMS1", "slug": "ams1"}))
            .unwrap();
        assert_eq!(created.id, 10);

        let patch = SitePatch {
            slug: Some("ams-1".into()),
            ..SitePatch::default()
        };
        let updated: Site = client.update(created.id, &patch).unwrap();
        assert_eq!(updated.name, "AMS1");

        client.delete::<Site>(created.id).unwrap();

        create.assert();
        update.assert();
        delete.assert();
    }

    #[test]
    fn surfaces_netbox_error_bodies() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/dcim/regions/");
            then.status(400)
                .body(r#"{"slug": ["region with this slug already exists."]}"#);
        });

        let err = client_for(&server)
            .create::<Region, _>(&json!({"name": "EU", "slug": "eu"}))
            .unwrap_err();
        match err.downcast_ref::<ApiError>() {
            Some(ApiError::Http { status, body }) => {
                assert_eq!(*status, StatusCode::BAD_REQUEST);
                assert!(body.contains("already exists"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn fetches_status_under_base_path() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/netbox/api/status/");
            then.status(200).json_body(json!({
                "django-version": "5.0.9",
                "installed-apps": {"mptt": "0.16.0"},
                "netbox-version": "4.1.3",
                "plugins": {"netbox_bgp": "0.14.0"},
                "python-version": "3.12.3"
            }));
        });

        let mut profile = profile_for(&server, "");
        profile.base_path = "/netbox".into();
        let client = ApiClient::from_profile(&profile, &ClientOptions::default()).unwrap();
        let status = client.status().unwrap();

        mock.assert();
        assert_eq!(status.netbox_version, "4.1.3");
        assert_eq!(status.plugins["netbox_bgp"], "0.14.0");
    }
}
