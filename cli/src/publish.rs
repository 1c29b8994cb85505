//! Upload a directory of script assets to the `media` resource.
//!
//! Each file is looked up by its stem. A 200 means the asset exists and its
//! content is replaced through the second id listed on the lookup body; a 404
//! means it is new and gets created with the stem as its id. Anything else
//! stops the run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use resapi_core::{ApiError, Client, Response, Transport};
use serde_json::{json, Value};
use tracing::info;

const RESOURCE: &str = "media";
const MIME_TYPE: &str = "application/javascript";

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("request for {} failed: {source}", path.display())]
    Api {
        path: PathBuf,
        #[source]
        source: ApiError,
    },
    #[error("unable to {action} {}: HTTP {http_code} {body}", path.display())]
    Unexpected {
        path: PathBuf,
        action: Action,
        http_code: u16,
        body: Value,
    },
    #[error("media lookup for {} lists no second id", path.display())]
    MissingMediaId { path: PathBuf },
}

/// What the run was doing when a response came back wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Fetch,
    Update,
    Create,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Action::Fetch => "fetch",
            Action::Update => "update",
            Action::Create => "create",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Published {
    Updated { path: PathBuf, id: String },
    Created { path: PathBuf, id: String },
}

pub struct Publisher<'a, T: Transport> {
    client: &'a Client<T>,
    project: String,
    extension: String,
}

impl<'a, T: Transport> Publisher<'a, T> {
    pub fn new(client: &'a Client<T>, project: impl Into<String>) -> Self {
        Self {
            client,
            project: project.into(),
            extension: "js".to_string(),
        }
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Publish every matching file directly under `dir`, in name order.
    pub fn publish_dir(&self, dir: &Path) -> Result<Vec<Published>, PublishError> {
        let mut published = Vec::new();
        for path in self.assets(dir)? {
            published.push(self.publish_file(&path)?);
        }
        Ok(published)
    }

    pub fn publish_file(&self, path: &Path) -> Result<Published, PublishError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let content = fs::read(path).map_err(|source| PublishError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let media = BASE64.encode(content);

        let lookup = self.call(path, || self.client.get(RESOURCE, &stem))?;
        match lookup.http_code() {
            200 => {
                let id = lookup.body()["ids"][1]
                    .as_str()
                    .ok_or_else(|| PublishError::MissingMediaId {
                        path: path.to_path_buf(),
                    })?
                    .to_string();
                info!(path = %path.display(), %id, "updating asset");
                let response = self.call(path, || self.client.put(RESOURCE, &id, &json!({ "media": media })))?;
                expect(path, Action::Update, 204, response)?;
                Ok(Published::Updated {
                    path: path.to_path_buf(),
                    id,
                })
            }
            404 => {
                info!(path = %path.display(), id = %stem, "creating asset");
                let document = json!({
                    "media": media,
                    "metadata": { "project": self.project },
                    "mimeType": MIME_TYPE,
                    "ids": [stem],
                });
                let response = self.call(path, || self.client.post(RESOURCE, &document))?;
                expect(path, Action::Create, 201, response)?;
                Ok(Published::Created {
                    path: path.to_path_buf(),
                    id: stem,
                })
            }
            _ => Err(unexpected(path, Action::Fetch, lookup)),
        }
    }

    fn assets(&self, dir: &Path) -> Result<Vec<PathBuf>, PublishError> {
        let io_err = |source: io::Error| PublishError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let matches = path.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str());
            if matches && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn call(&self, path: &Path, op: impl FnOnce() -> Result<Response, ApiError>) -> Result<Response, PublishError> {
        op().map_err(|source| PublishError::Api {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn expect(path: &Path, action: Action, http_code: u16, response: Response) -> Result<(), PublishError> {
    if response.http_code() == http_code {
        Ok(())
    } else {
        Err(unexpected(path, action, response))
    }
}

fn unexpected(path: &Path, action: Action, response: Response) -> PublishError {
    PublishError::Unexpected {
        path: path.to_path_buf(),
        action,
        http_code: response.http_code(),
        body: response.into_body(),
    }
}
