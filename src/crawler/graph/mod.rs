
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

use super::{DocumentLibrary, LibraryItem, Page};
use crate::config::LibraryConfig;
use crate::{KbError, Result};

const CHILD_FIELDS: &str = "name,id,file,folder,webUrl";
const DRIVE_ROOT: &str = "root";

#[derive(Debug, Deserialize)]
struct Collection<T> {
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Site {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Drive {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DriveItem {
    id: String,
    name: String,
    file: Option<FileFacet>,
    folder: Option<serde_json::Value>,
    #[serde(rename = "webUrl")]
    web_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileFacet {
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
}

impl From<DriveItem> for LibraryItem {
    #[inline]
    fn from(item: DriveItem) -> Self {
        Self {
            id: item.id,
            name: item.name,
            is_folder: item.folder.is_some(),
            mime_type: item.file.and_then(|file| file.mime_type),
            web_url: item.web_url,
        }
    }
}

/// Site and drive a crawl runs against, resolved once per client
#[derive(Debug, Clone, PartialEq, Eq)]
struct DriveLocation {
    site_id: String,
    drive_id: String,
    root_folder_id: String,
}

/// [`DocumentLibrary`] backed by a SharePoint document library through Microsoft Graph
#[derive(Clone)]
pub struct GraphDriveClient {
    api_base: Url,
    site_name: String,
    drive_name: String,
    folder_path: String,
    access_token: String,
    agent: ureq::Agent,
    download_agent: ureq::Agent,
    max_download_bytes: u64,
    location: OnceCell<DriveLocation>,
}

impl fmt::Debug for GraphDriveClient {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphDriveClient")
            .field("api_base", &self.api_base.as_str())
            .field("site_name", &self.site_name)
            .field("drive_name", &self.drive_name)
            .field("folder_path", &self.folder_path)
            .finish_non_exhaustive()
    }
}

impl GraphDriveClient {
    /// Creates a client using `access_token` as an opaque bearer credential
    #[inline]
    pub fn new(config: &LibraryConfig, access_token: impl Into<String>) -> Result<Self> {
        config
            .validate_for_crawl()
            .map_err(|e| KbError::Config(e.to_string()))?;

        let mut api_base = Url::parse(&config.api_base).map_err(|e| {
            KbError::Config(format!("invalid api_base {}: {}", config.api_base, e))
        })?;
        if api_base.cannot_be_a_base() {
            return Err(KbError::Config(format!(
                "api_base cannot be a base URL: {}",
                config.api_base
            )));
        }
        if let Ok(mut segments) = api_base.path_segments_mut() {
            segments.pop_if_empty();
        }

        Ok(Self {
            api_base,
            site_name: config.site_name.clone(),
            drive_name: config.drive_name.clone(),
            folder_path: config.folder_path.trim_matches('/').to_string(),
            access_token: access_token.into(),
            agent: Self::agent(config.timeout_seconds),
            download_agent: Self::agent(config.download_timeout_seconds),
            max_download_bytes: config.max_download_bytes,
            location: OnceCell::new(),
        })
    }

    /// Creates a client with the credential from the environment
    #[inline]
    pub fn from_env(config: &LibraryConfig) -> Result<Self> {
        let token =
            LibraryConfig::access_token().map_err(|e| KbError::AuthFailure(e.to_string()))?;
        Self::new(config, token)
    }

    fn agent(timeout_seconds: u64) -> ureq::Agent {
        ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(timeout_seconds)))
            .build()
            .into()
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|()| KbError::Config("api_base cannot be a base URL".to_string()))?
            .extend(segments);
        Ok(url)
    }

    fn drive_endpoint<'a>(
        &self,
        location: &'a DriveLocation,
        tail: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url> {
        self.endpoint(
            ["sites", location.site_id.as_str(), "drives", location.drive_id.as_str()]
                .into_iter()
                .chain(tail),
        )
    }

    /// Finds the site, the drive and the starting folder
    async fn resolve_location(&self) -> Result<DriveLocation> {
        let mut search = self.endpoint(["sites"])?;
        search
            .query_pairs_mut()
            .append_pair("search", &self.site_name);
        let sites: Collection<Site> = self.get_json(search).await?;
        let site_id = sites
            .value
            .into_iter()
            .next()
            .map(|site| site.id)
            .ok_or_else(|| KbError::Config(format!("site '{}' not found", self.site_name)))?;
        debug!("Resolved site {} to {}", self.site_name, site_id);

        let drives: Collection<Drive> = self
            .get_json(self.endpoint(["sites", site_id.as_str(), "drives"])?)
            .await?;
        let drive_id = drives
            .value
            .into_iter()
            .find(|drive| drive.name == self.drive_name)
            .map(|drive| drive.id)
            .ok_or_else(|| {
                KbError::Config(format!(
                    "drive '{}' not found in site '{}'",
                    self.drive_name, self.site_name
                ))
            })?;
        debug!("Resolved drive {} to {}", self.drive_name, drive_id);

        let mut location = DriveLocation {
            site_id,
            drive_id,
            root_folder_id: DRIVE_ROOT.to_string(),
        };

        if !self.folder_path.is_empty() {
            let root_segment = "root:";
            let url = self.drive_endpoint(
                &location,
                std::iter::once(root_segment).chain(self.folder_path.split('/')),
            )?;
            match self.get_json::<DriveItem>(url).await {
                Ok(folder) if folder.folder.is_some() => {
                    location.root_folder_id = folder.id;
                }
                Ok(_) => {
                    warn!(
                        "{} is not a folder, crawling the drive root instead",
                        self.folder_path
                    );
                }
                Err(e @ KbError::AuthFailure(_)) => return Err(e),
                Err(e) => {
                    warn!(
                        "Could not resolve folder {} ({}), crawling the drive root instead",
                        self.folder_path, e
                    );
                }
            }
        }

        info!(
            "Crawling drive {} of site {} from folder {}",
            self.drive_name, self.site_name, location.root_folder_id
        );
        Ok(location)
    }

    async fn location(&self) -> Result<&DriveLocation> {
        self.location
            .get_or_try_init(|| self.resolve_location())
            .await
    }

    async fn get_json<T: DeserializeOwned + Send + 'static>(&self, url: Url) -> Result<T> {
        let agent = self.agent.clone();
        let authorization = format!("Bearer {}", self.access_token);

        tokio::task::spawn_blocking(move || {
            debug!("GET {}", url);
            let text = agent
                .get(url.as_str())
                .header("Authorization", &authorization)
                .header("Accept", "application/json")
                .call()
                .and_then(|mut response| response.body_mut().read_to_string())
                .map_err(|e| map_request_error(&url, e))?;
            serde_json::from_str(&text).map_err(|e| {
                KbError::Network(format!("unexpected response from {}: {}", url, e))
            })
        })
        .await
        .map_err(|e| KbError::Other(anyhow::anyhow!("request task failed: {}", e)))?
    }
}

#[async_trait]
impl DocumentLibrary for GraphDriveClient {
    #[inline]
    async fn root_folder(&self) -> Result<String> {
        Ok(self.location().await?.root_folder_id.clone())
    }

    #[inline]
    async fn enumerate_children(&self, folder_id: &str, page_link: Option<&str>) -> Result<Page> {
        let url = match page_link {
            Some(link) => Url::parse(link)
                .map_err(|e| KbError::Network(format!("invalid next page link {}: {}", link, e)))?,
            None => {
                let location = self.location().await?;
                let mut url = self.drive_endpoint(location, ["items", folder_id, "children"])?;
                url.query_pairs_mut().append_pair("$select", CHILD_FIELDS);
                url
            }
        };

        let listing: Collection<DriveItem> = self.get_json(url).await?;
        debug!(
            "Folder {} page has {} entries",
            folder_id,
            listing.value.len()
        );

        Ok(Page {
            items: listing.value.into_iter().map(LibraryItem::from).collect(),
            next_link: listing.next_link,
        })
    }

    #[inline]
    async fn download(&self, item_id: &str) -> Result<Vec<u8>> {
        let location = self.location().await?;
        let url = self.drive_endpoint(location, ["items", item_id, "content"])?;
        let agent = self.download_agent.clone();
        let authorization = format!("Bearer {}", self.access_token);
        let limit = self.max_download_bytes;

        tokio::task::spawn_blocking(move || {
            debug!("Downloading {}", url);
            let bytes = agent
                .get(url.as_str())
                .header("Authorization", &authorization)
                .call()
                .and_then(|mut response| {
                    response
                        .body_mut()
                        .with_config()
                        .limit(limit)
                        .read_to_vec()
                })
                .map_err(|e| map_request_error(&url, e))?;
            debug!("Downloaded {} bytes from {}", bytes.len(), url);
            Ok(bytes)
        })
        .await
        .map_err(|e| KbError::Other(anyhow::anyhow!("download task failed: {}", e)))?
    }
}

fn map_request_error(url: &Url, error: ureq::Error) -> KbError {
    match error {
        ureq::Error::StatusCode(status @ (401 | 403)) => {
            KbError::AuthFailure(format!("HTTP {} from {}", status, url))
        }
        ureq::Error::StatusCode(status) => KbError::Network(format!("HTTP {} from {}", status, url)),
        ureq::Error::Timeout(timeout) => {
            KbError::Network(format!("timed out ({:?}) waiting for {}", timeout, url))
        }
        ureq::Error::BodyExceedsLimit(limit) => {
            KbError::Network(format!("{} is larger than {} bytes", url, limit))
        }
        other => KbError::Network(format!("request to {} failed: {}", url, other)),
    }
}
