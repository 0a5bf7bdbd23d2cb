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

//! Plain-text tables and JSON rendering for command output.

use crate::config::{Profile, ProfileEntry};
use crate::models::{ChoiceField, Device, Region, Site, Status, ref_label};
use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;
use serde_json::{Value, json};

pub const NO_RESOURCES: &str = "No resources found.";
const MASK: &str = "*****";

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Debug, Clone)]
enum Row {
    Cells(Vec<String>),
    Section(String),
}

/// Column-aligned table. Tables without headers render as key/value lists.
#[derive(Debug, Clone, Default)]
pub struct Table {
    headers: Option<Vec<String>>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: Some(headers.into_iter().map(Into::into).collect()),
            rows: Vec::new(),
        }
    }

    pub fn key_value() -> Self {
        Self::default()
    }

    pub fn row<I, S>(&mut self, cells: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows
            .push(Row::Cells(cells.into_iter().map(Into::into).collect()));
        self
    }

    pub fn pair(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.row([key.to_string(), value.into()])
    }

    /// A blank line followed by an unaligned title, e.g. "Installed apps".
    pub fn section(&mut self, title: impl Into<String>) -> &mut Self {
        self.rows.push(Row::Section(title.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        !self.rows.iter().any(|row| matches!(row, Row::Cells(_)))
    }

    pub fn render(&self) -> String {
        let mut widths: Vec<usize> = self
            .headers
            .as_ref()
            .map(|h| h.iter().map(|c| c.chars().count()).collect())
            .unwrap_or_default();
        for row in &self.rows {
            if let Row::Cells(cells) = row {
                for (idx, cell) in cells.iter().enumerate() {
                    let len = cell.chars().count();
                    match widths.get_mut(idx) {
                        Some(width) => *width = (*width).max(len),
                        None => widths.push(len),
                    }
                }
            }
        }

        let mut out = String::new();
        if let Some(headers) = &self.headers {
            push_line(&mut out, headers, &widths);
            let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
            push_line(&mut out, &separator, &widths);
        }
        for row in &self.rows {
            match row {
                Row::Cells(cells) => push_line(&mut out, cells, &widths),
                Row::Section(title) => {
                    out.push('\n');
                    out.push_str(title);
                    out.push('\n');
                }
            }
        }
        out
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }

    /// Prints the table, or the empty-result notice when it has no rows.
    pub fn print_list(&self) {
        if self.is_empty() {
            println!("{NO_RESOURCES}");
        } else {
            self.print();
        }
    }
}

fn push_line(out: &mut String, cells: &[String], widths: &[usize]) {
    let mut line = String::new();
    for (idx, cell) in cells.iter().enumerate() {
        if idx > 0 {
            line.push_str("  ");
        }
        let pad = widths[idx].saturating_sub(cell.chars().count());
        line.push_str(cell);
        line.extend(std::iter::repeat_n(' ', pad));
    }
    out.push_str(line.trim_end());
    out.push('\n');
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn value_to_str(value: &Value) -> String {
    match value {
        Value::Null => "".into(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn mask(secret: &str, reveal: bool) -> String {
    if reveal || secret.is_empty() {
        secret.to_string()
    } else {
        MASK.to_string()
    }
}

fn count(value: Option<u64>) -> String {
    value.map(|n| n.to_string()).unwrap_or_default()
}

fn choice(value: &Option<ChoiceField>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

pub fn profiles_table(entries: &[ProfileEntry<'_>]) -> Table {
    let mut table = Table::new(["Name", "Server", "Port", "Base path", "State"]);
    for entry in entries {
        table.row([
            entry.name.to_string(),
            entry.profile.server.clone(),
            entry.profile.port.to_string(),
            entry.profile.base_path.clone(),
            (if entry.active { "Activated" } else { "Configured" }).to_string(),
        ]);
    }
    table
}

pub fn profiles_json(active: &str, entries: &[ProfileEntry<'_>]) -> Value {
    let instances: serde_json::Map<String, Value> = entries
        .iter()
        .map(|entry| (entry.name.to_string(), profile_json(entry.profile, false)))
        .collect();
    json!({ "active_instance": active, "instances": instances })
}

pub fn profile_json(profile: &Profile, reveal_key: bool) -> Value {
    json!({
        "server": profile.server,
        "port": profile.port,
        "base_path": profile.base_path,
        "api_key": mask(&profile.api_key, reveal_key),
    })
}

pub fn profile_detail_table(name: &str, profile: &Profile, active: bool, reveal_key: bool) -> Table {
    let mut table = Table::key_value();
    table
        .pair("Name", name)
        .pair("Server", profile.server.clone())
        .pair("Port", profile.port.to_string())
        .pair("Base path", profile.base_path.clone())
        .pair("API key", mask(&profile.api_key, reveal_key))
        .pair("State", if active { "Activated" } else { "Configured" });
    table
}

pub fn sites_table(sites: &[Site]) -> Table {
    let mut table = Table::new(["ID", "Name", "Status", "Region", "Facility", "Description"]);
    for site in sites {
        table.row([
            site.id.to_string(),
            site.name.clone(),
            choice(&site.status),
            ref_label(&site.region),
            site.facility.clone(),
            site.description.clone(),
        ]);
    }
    table
}

/// Site attributes followed by counts of related objects.
pub fn site_detail_tables(site: &Site) -> (Table, Table) {
    let mut details = Table::key_value();
    details
        .pair("Name", site.name.clone())
        .pair("Slug", site.slug.clone())
        .pair("Region", ref_label(&site.region))
        .pair("Status", choice(&site.status))
        .pair("Tenant", ref_label(&site.tenant))
        .pair("Facility", site.facility.clone())
        .pair("Description", site.description.clone())
        .pair("Time zone", site.time_zone.clone().unwrap_or_default())
        .pair("Physical address", site.physical_address.clone())
        .pair("Shipping address", site.shipping_address.clone());

    let mut related = Table::key_value();
    related
        .pair("Racks", count(site.rack_count))
        .pair("Devices", count(site.device_count))
        .pair("Virtual Machines", count(site.virtualmachine_count))
        .pair("Prefixes", count(site.prefix_count))
        .pair("VLANs", count(site.vlan_count))
        .pair("ASNs", site.asns.len().to_string())
        .pair("Circuits", count(site.circuit_count));

    (details, related)
}

pub fn regions_table(regions: &[Region]) -> Table {
    let mut table = Table::new(["ID", "Name", "Sites", "Description"]);
    for region in regions {
        table.row([
            region.id.to_string(),
            region.name.clone(),
            count(region.site_count),
            region.description.clone(),
        ]);
    }
    table
}

pub fn region_detail_table(region: &Region) -> Table {
    let mut table = Table::key_value();
    table
        .pair("Name", region.name.clone())
        .pair("Slug", region.slug.clone())
        .pair("Parent", ref_label(&region.parent))
        .pair("Sites", count(region.site_count))
        .pair("Description", region.description.clone());
    table
}

pub fn devices_table(devices: &[Device]) -> Table {
    let mut table = Table::new([
        "ID",
        "Name",
        "Status",
        "Site",
        "Location",
        "Role",
        "Platform",
        "Type",
        "IP address",
    ]);
    for device in devices {
        table.row([
            device.id.to_string(),
            device.name.clone().unwrap_or_default(),
            choice(&device.status),
            ref_label(&device.site),
            ref_label(&device.location),
            ref_label(&device.role),
            ref_label(&device.platform),
            ref_label(&device.device_type),
            ref_label(&device.primary_ip4),
        ]);
    }
    table
}

pub fn device_detail_table(device: &Device) -> Table {
    let mut table = Table::key_value();
    table
        .pair("Name", device.name.clone().unwrap_or_default())
        .pair("Status", choice(&device.status))
        .pair("Site", ref_label(&device.site))
        .pair("Location", ref_label(&device.location))
        .pair("Role", ref_label(&device.role))
        .pair("Platform", ref_label(&device.platform))
        .pair("Type", ref_label(&device.device_type))
        .pair("IP address", ref_label(&device.primary_ip4))
        .pair("Serial", device.serial.clone())
        .pair("Description", device.description.clone());
    table
}

pub fn status_table(status: &Status) -> Table {
    let mut table = Table::key_value();
    table
        .pair("Python version", status.python_version.clone())
        .pair("Django version", status.django_version.clone())
        .pair("NetBox version", status.netbox_version.clone());

    if !status.installed_apps.is_empty() {
        table.section("Installed apps");
        for (app, version) in &status.installed_apps {
            table.pair(&format!("  {app}"), value_to_str(version));
        }
    }
    if !status.plugins.is_empty() {
        table.section("Installed plugins");
        for (plugin, version) in &status.plugins {
            table.pair(&format!("  {plugin}"), value_to_str(version));
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NestedRef;
    use indexmap::IndexMap;

    #[test]
    fn aligns_columns_and_trims_trailing_space() {
        let mut table = Table::new(["ID", "Name", "Description"]);
        table.row(["1", "Amsterdam", ""]).row(["12", "Lon", "Docklands"]);

        assert_eq!(
            table.render(),
            "ID  Name       Description\n\
             --  ---------  -----------\n\
             1   Amsterdam\n\
             12  Lon        Docklands\n"
        );
    }

    #[test]
    fn key_value_tables_have_no_header() {
        let mut table = Table::key_value();
        table.pair("Name", "AMS1").pair("Time zone", "Europe/Amsterdam");
        assert_eq!(
            table.render(),
            "Name       AMS1\nTime zone  Europe/Amsterdam\n"
        );
    }

    #[test]
    fn header_only_table_counts_as_empty() {
        let table = sites_table(&[]);
        assert!(table.is_empty());
        let mut with_section = Table::key_value();
        with_section.section("Installed apps");
        assert!(with_section.is_empty());
    }

    #[test]
    fn profiles_mark_the_active_instance() {
        let default = Profile::default();
        let work = Profile::new("netbox.example.com", "secret123", 443);
        let entries = [
            ProfileEntry { name: "default", profile: &default, active: false },
            ProfileEntry { name: "work", profile: &work, active: true },
        ];

        let rendered = profiles_table(&entries).render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "Name     Server              Port  Base path  State");
        assert_eq!(lines[2], "default  localhost           8000  /          Configured");
        assert_eq!(lines[3], "work     netbox.example.com  443   /          Activated");
        assert!(!rendered.contains("secret123"));

        let json = profiles_json("work", &entries);
        assert_eq!(json["active_instance"], "work");
        assert_eq!(json["instances"]["work"]["api_key"], "*****");
        assert_eq!(json["instances"]["default"]["api_key"], "");
    }

    #[test]
    fn profile_detail_masks_key_unless_revealed() {
        let work = Profile::new("netbox.example.com", "secret123", 443);
        let masked = profile_detail_table("work", &work, true, false).render();
        assert!(masked.contains("API key    *****"));
        let revealed = profile_detail_table("work", &work, true, true).render();
        assert!(revealed.contains("API key    secret123"));
    }

    #[test]
    fn devices_render_nested_labels() {
        let device = Device {
            id: 5,
            name: Some("edge01".into()),
            status: Some(ChoiceField { value: "active".into(), label: "Active".into() }),
            site: Some(NestedRef { id: 1, display: Some("AMS1".into()), ..NestedRef::default() }),
            location: None,
            role: Some(NestedRef { id: 2, name: Some("Router".into()), ..NestedRef::default() }),
            platform: None,
            device_type: Some(NestedRef { id: 3, model: Some("MX204".into()), ..NestedRef::default() }),
            primary_ip4: Some(NestedRef {
                id: 4,
                address: Some("192.0.2.1/32".into()),
                ..NestedRef::default()
            }),
            serial: String::new(),
            description: String::new(),
        };

        let rendered = devices_table(&[device]).render();
        let row = rendered.lines().nth(2).unwrap();
        for expected in ["edge01", "Active", "AMS1", "Router", "MX204", "192.0.2.1/32"] {
            assert!(row.contains(expected), "{expected} missing from {row}");
        }
    }

    #[test]
    fn status_lists_apps_and_plugins_in_order() {
        let mut installed_apps = IndexMap::new();
        installed_apps.insert("mptt".to_string(), Value::from("0.16.0"));
        installed_apps.insert("taggit".to_string(), Value::from("5.0.1"));
        let status = Status {
            python_version: "3.12.3".into(),
            django_version: "5.0.9".into(),
            netbox_version: "4.1.3".into(),
            installed_apps,
            plugins: IndexMap::new(),
        };

        let rendered = status_table(&status).render();
        assert!(rendered.starts_with("Python version  3.12.3\n"));
        assert!(rendered.contains("\nInstalled apps\n"));
        assert!(rendered.find("mptt").unwrap() < rendered.find("taggit").unwrap());
        assert!(!rendered.contains("Installed plugins"));
    }

    #[test]
    fn site_counts_default_to_blank() {
        let site: Site = serde_json::from_value(json!({
            "id": 1, "name": "AMS1", "slug": "ams1",
            "device_count": 14, "asns": [{"id": 1, "display": "AS65000"}]
        }))
        .unwrap();
        let (details, related) = site_detail_tables(&site);
        assert!(details.render().contains("Slug              ams1"));
        let related = related.render();
        assert!(related.contains("Devices           14"));
        assert!(related.contains("ASNs              1"));
        assert!(related.lines().any(|l| l == "Racks"));
    }
}
