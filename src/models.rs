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

//! Typed NetBox objects and request payloads.
//!
//! Only the fields nbcli renders or sends are modelled; everything else in a
//! response is ignored.

use clap::ValueEnum;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A NetBox object collection reachable under `/api/`.
pub trait Resource: DeserializeOwned {
    /// Collection path relative to the instance base URL, with trailing slash.
    const ENDPOINT: &'static str;
    /// Singular, human-readable kind used in messages.
    const KIND: &'static str;

    fn id(&self) -> u64;
    fn display_name(&self) -> String;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChoiceField {
    pub value: String,
    #[serde(default)]
    pub label: String,
}

impl fmt::Display for ChoiceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.label.is_empty() {
            f.write_str(&self.value)
        } else {
            f.write_str(&self.label)
        }
    }
}

/// Brief representation NetBox uses for related objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NestedRef {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl NestedRef {
    pub fn label(&self) -> String {
        self.display
            .as_ref()
            .or(self.name.as_ref())
            .or(self.model.as_ref())
            .or(self.address.as_ref())
            .cloned()
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Label of an optional related object, empty when unset.
pub fn ref_label(value: &Option<NestedRef>) -> String {
    value.as_ref().map(NestedRef::label).unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Site {
    pub id: u64,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub status: Option<ChoiceField>,
    #[serde(default)]
    pub region: Option<NestedRef>,
    #[serde(default)]
    pub tenant: Option<NestedRef>,
    #[serde(default)]
    pub facility: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub physical_address: String,
    #[serde(default)]
    pub shipping_address: String,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub asns: Vec<NestedRef>,
    #[serde(default)]
    pub rack_count: Option<u64>,
    #[serde(default)]
    pub device_count: Option<u64>,
    #[serde(default)]
    pub virtualmachine_count: Option<u64>,
    #[serde(default)]
    pub prefix_count: Option<u64>,
    #[serde(default)]
    pub vlan_count: Option<u64>,
    #[serde(default)]
    pub circuit_count: Option<u64>,
}

impl Resource for Site {
    const ENDPOINT: &'static str = "api/dcim/sites/";
    const KIND: &'static str = "site";

    fn id(&self) -> u64 {
        self.id
    }

    fn display_name(&self) -> String {
        self.name.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Region {
    pub id: u64,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub parent: Option<NestedRef>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub site_count: Option<u64>,
}

impl Resource for Region {
    const ENDPOINT: &'static str = "api/dcim/regions/";
    const KIND: &'static str = "region";

    fn id(&self) -> u64 {
        self.id
    }

    fn display_name(&self) -> String {
        self.name.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<ChoiceField>,
    #[serde(default)]
    pub site: Option<NestedRef>,
    #[serde(default)]
    pub location: Option<NestedRef>,
    // NetBox < 3.6 calls this `device_role`.
    #[serde(default, alias = "device_role")]
    pub role: Option<NestedRef>,
    #[serde(default)]
    pub platform: Option<NestedRef>,
    #[serde(default)]
    pub device_type: Option<NestedRef>,
    #[serde(default)]
    pub primary_ip4: Option<NestedRef>,
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub description: String,
}

impl Resource for Device {
    const ENDPOINT: &'static str = "api/dcim/devices/";
    const KIND: &'static str = "device";

    fn id(&self) -> u64 {
        self.id
    }

    fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("#{}", self.id))
    }
}

/// Response of `/api/status/`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Status {
    #[serde(rename = "python-version", default)]
    pub python_version: String,
    #[serde(rename = "django-version", default)]
    pub django_version: String,
    #[serde(rename = "netbox-version", default)]
    pub netbox_version: String,
    #[serde(rename = "installed-apps", default)]
    pub installed_apps: IndexMap<String, Value>,
    #[serde(default)]
    pub plugins: IndexMap<String, Value>,
}

pub const STATUS_ENDPOINT: &str = "api/status/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Planned,
    Staging,
    Active,
    Decommissioning,
    Retired,
}

impl SiteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Staging => "staging",
            Self::Active => "active",
            Self::Decommissioning => "decommissioning",
            Self::Retired => "retired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Offline,
    Active,
    Planned,
    Staged,
    Failed,
    Inventory,
    Decommissioning,
}

impl DeviceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Active => "active",
            Self::Planned => "planned",
            Self::Staged => "staged",
            Self::Failed => "failed",
            Self::Inventory => "inventory",
            Self::Decommissioning => "decommissioning",
        }
    }
}

/// Optional site attributes shared by create and update payloads.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SiteDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SiteStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SiteCreate {
    pub name: String,
    pub slug: String,
    #[serde(flatten)]
    pub details: SiteDetails,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SitePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(flatten)]
    pub details: SiteDetails,
}

impl SitePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RegionCreate {
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RegionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RegionPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeviceCreate {
    pub name: String,
    pub device_type: u64,
    // Always sent as `role`, so creating devices needs NetBox 3.6 or later.
    pub role: u64,
    pub site: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DeviceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DevicePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DeviceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl DevicePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Derives a NetBox slug (`[a-z0-9_-]`) from a display name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            slug.push(ch);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slugify_normalizes_names() {
        assert_eq!(slugify("Amsterdam DC 1"), "amsterdam-dc-1");
        assert_eq!(slugify("  R&D -- Lab_2 "), "r-d-lab_2");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn nested_ref_label_falls_back() {
        let full = NestedRef {
            id: 3,
            display: Some("Core Switch".into()),
            name: Some("core".into()),
            ..NestedRef::default()
        };
        assert_eq!(full.label(), "Core Switch");

        let model = NestedRef {
            id: 4,
            model: Some("EX4300".into()),
            ..NestedRef::default()
        };
        assert_eq!(model.label(), "EX4300");
        assert_eq!(NestedRef { id: 9, ..NestedRef::default() }.label(), "9");
        assert_eq!(ref_label(&None), "");
    }

    #[test]
    fn device_accepts_legacy_role_field() {
        let device: Device = serde_json::from_value(json!({
            "id": 12,
            "name": "edge01",
            "device_role": {"id": 1, "display": "Router"},
            "primary_ip4": null,
            "unknown_field": [1, 2, 3]
        }))
        .unwrap();
        assert_eq!(ref_label(&device.role), "Router");
        assert!(device.primary_ip4.is_none());
        assert_eq!(device.display_name(), "edge01");
    }

    #[test]
    fn unnamed_device_uses_id() {
        let device: Device = serde_json::from_value(json!({"id": 7, "name": null})).unwrap();
        assert_eq!(device.display_name(), "#7");
    }

    #[test]
    fn site_patch_omits_absent_fields() {
        let patch = SitePatch {
            slug: Some("ams1".into()),
            details: SiteDetails {
                status: Some(SiteStatus::Retired),
                description: Some(String::new()),
                ..SiteDetails::default()
            },
            ..SitePatch::default()
        };
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!({"slug": "ams1", "status": "retired", "description": ""})
        );
        assert!(!patch.is_empty());
        assert!(SitePatch::default().is_empty());
    }

    #[test]
    fn device_create_serializes_ids() {
        let payload = DeviceCreate {
            name: "edge01".into(),
            device_type: 2,
            role: 3,
            site: 4,
            status: Some(DeviceStatus::Staged),
            serial: None,
            description: None,
        };
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({"name": "edge01", "device_type": 2, "role": 3, "site": 4, "status": "staged"})
        );
    }

    #[test]
    fn status_parses_dashed_keys() {
        let status: Status = serde_json::from_value(json!({
            "django-version": "5.0.9",
            "installed-apps": {"django_filters": "24.3", "mptt": "0.16.0"},
            "netbox-version": "4.1.3",
            "plugins": {},
            "python-version": "3.12.3",
            "rq-workers-running": 1
        }))
        .unwrap();
        assert_eq!(status.netbox_version, "4.1.3");
        assert_eq!(
            status.installed_apps.keys().collect::<Vec<_>>(),
            vec!["django_filters", "mptt"]
        );
        assert!(status.plugins.is_empty());
    }
}
