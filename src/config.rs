// nbcli - CLI for the NetBox API
// Copyright (C) 2024 nbcli contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Named NetBox connection profiles ("instances") and the active selection,
//! persisted as a single JSON file.

use dirs::home_dir;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

pub const CONFIG_FILE_NAME: &str = ".nbcli.json";
pub const DEFAULT_INSTANCE: &str = "default";
pub const DEFAULT_SERVER: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BASE_PATH: &str = "/";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Profile {
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default)]
    pub api_key: String,
}

impl Profile {
    /// A profile with the default base path.
    pub fn new(server: impl Into<String>, api_key: impl Into<String>, port: u16) -> Self {
        Self {
            server: server.into(),
            port,
            base_path: DEFAULT_BASE_PATH.to_string(),
            api_key: api_key.into(),
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER, "", DEFAULT_PORT)
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_base_path() -> String {
    DEFAULT_BASE_PATH.to_string()
}

/// Partial update for a [`Profile`]. `None` leaves the field untouched.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProfilePatch {
    pub server: Option<String>,
    pub port: Option<u16>,
    pub base_path: Option<String>,
    pub api_key: Option<String>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn apply(self, profile: &mut Profile) {
        if let Some(server) = self.server {
            profile.server = server;
        }
        if let Some(port) = self.port {
            profile.port = port;
        }
        if let Some(base_path) = self.base_path {
            profile.base_path = base_path;
        }
        if let Some(api_key) = self.api_key {
            profile.api_key = api_key;
        }
    }
}

/// On-disk layout of the profile store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    #[serde(alias = "selected_instance")]
    pub active_instance: String,
    #[serde(default)]
    pub instances: IndexMap<String, Profile>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        let mut instances = IndexMap::new();
        instances.insert(DEFAULT_INSTANCE.to_string(), Profile::default());
        Self {
            active_instance: DEFAULT_INSTANCE.to_string(),
            instances,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not locate the home directory; pass --config or set NBCLI_CONFIG")]
    MissingHomeDir,
    #[error("could not read {}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} is not a valid nbcli configuration", .path.display())]
    Unparseable {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not write {}", .path.display())]
    Unwritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("instance `{0}` already exists")]
    DuplicateName(String),
    #[error("instance `{0}` is not configured; nothing was changed")]
    NotFound(String),
    #[error("instance `{0}` is the last configured instance and cannot be deleted")]
    LastProfile(String),
    #[error(
        "active instance `{0}` is not configured; select one with `nbcli config activate <name>`"
    )]
    DanglingActive(String),
}

impl StoreError {
    /// Errors caused by the request rather than by the environment or a bug.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateName(_) | Self::NotFound(_) | Self::LastProfile(_)
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One row of [`ProfileStore::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileEntry<'a> {
    pub name: &'a str,
    pub profile: &'a Profile,
    pub active: bool,
}

pub fn config_path(override_path: Option<&Path>) -> StoreResult<PathBuf> {
    if let Some(path) = override_path {
        return Ok(path.to_path_buf());
    }
    let home = home_dir().ok_or(StoreError::MissingHomeDir)?;
    Ok(home.join(CONFIG_FILE_NAME))
}

#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    state: ConfigFile,
}

impl ProfileStore {
    /// Reads the store at `path`, writing a default store first when the file
    /// does not exist yet.
    pub fn load(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let state = serde_json::from_str(&contents).map_err(|source| {
                    StoreError::Unparseable {
                        path: path.clone(),
                        source,
                    }
                })?;
                debug!(path = %path.display(), "loaded profile store");
                Ok(Self { path, state })
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let state = ConfigFile::default();
                write_atomic(&path, &state)?;
                info!(path = %path.display(), "created default profile store");
                Ok(Self { path, state })
            }
            Err(source) => Err(StoreError::Unreadable { path, source }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn active_name(&self) -> &str {
        &self.state.active_instance
    }

    pub fn active(&self) -> StoreResult<&Profile> {
        self.state
            .instances
            .get(&self.state.active_instance)
            .ok_or_else(|| StoreError::DanglingActive(self.state.active_instance.clone()))
    }

    /// Profile used for remote calls: `name` when given, the active one otherwise.
    pub fn resolve(&self, name: Option<&str>) -> StoreResult<&Profile> {
        match name {
            Some(name) => self.inspect(name),
            None => self.active(),
        }
    }

    pub fn list(&self) -> Vec<ProfileEntry<'_>> {
        self.state
            .instances
            .iter()
            .map(|(name, profile)| ProfileEntry {
                name,
                profile,
                active: *name == self.state.active_instance,
            })
            .collect()
    }

    pub fn inspect(&self, name: &str) -> StoreResult<&Profile> {
        self.state
            .instances
            .get(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    /// Inserts a new profile. It becomes active only when the active name
    /// does not point at an existing profile.
    pub fn add(&mut self, name: &str, profile: Profile) -> StoreResult<()> {
        if self.state.instances.contains_key(name) {
            return Err(StoreError::DuplicateName(name.to_string()));
        }
        let mut next = self.state.clone();
        if !next.instances.contains_key(&next.active_instance) {
            next.active_instance = name.to_string();
        }
        next.instances.insert(name.to_string(), profile);
        self.commit(next)
    }

    /// Applies only the fields present in `patch`. The store is written even
    /// when the patch is empty.
    pub fn update(&mut self, name: &str, patch: ProfilePatch) -> StoreResult<()> {
        let mut next = self.state.clone();
        let profile = next
            .instances
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        patch.apply(profile);
        self.commit(next)
    }

    /// Removes `name`. Deleting the active instance hands the active pointer
    /// to the first remaining instance in insertion order.
    pub fn delete(&mut self, name: &str) -> StoreResult<Profile> {
        if !self.state.instances.contains_key(name) {
            return Err(StoreError::NotFound(name.to_string()));
        }
        if self.state.instances.len() == 1 {
            return Err(StoreError::LastProfile(name.to_string()));
        }

        let mut next = self.state.clone();
        let removed = next
            .instances
            .shift_remove(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        if next.active_instance == name {
            if let Some(first) = next.instances.keys().next() {
                info!(from = name, to = %first, "reassigning active instance");
                next.active_instance = first.clone();
            }
        }
        self.commit(next)?;
        Ok(removed)
    }

    pub fn activate(&mut self, name: &str) -> StoreResult<()> {
        if !self.state.instances.contains_key(name) {
            return Err(StoreError::NotFound(name.to_string()));
        }
        let mut next = self.state.clone();
        next.active_instance = name.to_string();
        self.commit(next)
    }

    fn commit(&mut self, next: ConfigFile) -> StoreResult<()> {
        write_atomic(&self.path, &next)?;
        self.state = next;
        Ok(())
    }
}

/// Writes through a temporary file in the target directory and renames it
/// over `path`.
fn write_atomic(path: &Path, state: &ConfigFile) -> StoreResult<()> {
    let unwritable = |source: io::Error| StoreError::Unwritable {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(unwritable)?;

    let mut file = NamedTempFile::new_in(parent).map_err(unwritable)?;
    serde_json::to_writer_pretty(&mut file, state).map_err(|err| unwritable(err.into()))?;
    file.write_all(b"\n").map_err(unwritable)?;
    file.as_file().sync_all().map_err(unwritable)?;
    file.persist(path).map_err(|err| unwritable(err.error))?;

    debug!(path = %path.display(), instances = state.instances.len(), "saved profile store");
    Ok(())
}
