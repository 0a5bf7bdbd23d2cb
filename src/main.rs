mod client;
mod config;
mod models;
mod output;

use crate::client::{ApiClient, ApiError, ClientOptions, DEFAULT_TIMEOUT_SECS};
use crate::config::{
    DEFAULT_BASE_PATH, DEFAULT_PORT, Profile, ProfilePatch, ProfileStore, StoreError, config_path,
};
use crate::models::{
    Device, DeviceCreate, DevicePatch, DeviceStatus, Region, RegionCreate, RegionPatch, Resource,
    Site, SiteCreate, SiteDetails, SitePatch, SiteStatus, slugify,
};
use crate::output::{OutputFormat, Table, print_json};
use anyhow::{Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "NBCLI_LOG";

#[derive(Parser)]
#[command(name = "nbcli", version, about = "CLI for the NetBox API")]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "NBCLI_CONFIG",
        value_name = "PATH",
        help = "Instance configuration file (defaults to ~/.nbcli.json)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "NBCLI_INSTANCE",
        value_name = "NAME",
        help = "Use this instance for this invocation instead of the active one"
    )]
    instance: Option<String>,

    #[arg(
        long,
        short = 'o',
        value_enum,
        default_value_t = OutputFormat::Table,
        global = true,
        env = "NBCLI_OUTPUT",
        help = "Output format"
    )]
    output: OutputFormat,

    #[arg(
        long,
        global = true,
        env = "NBCLI_TIMEOUT",
        value_name = "SECONDS",
        default_value_t = DEFAULT_TIMEOUT_SECS,
        help = "Timeout for each request to NetBox"
    )]
    timeout: u64,

    #[arg(long, global = true, help = "Accept invalid TLS certificates")]
    insecure: bool,

    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase log verbosity (-v, -vv, -vvv); NBCLI_LOG takes precedence"
    )]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// NetBox CLI configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Organization: sites and regions
    #[command(subcommand)]
    Organization(OrganizationCommand),
    /// Devices
    #[command(subcommand)]
    Devices(DevicesGroup),
    /// NetBox status: versions, installed apps and plugins
    Status,
    /// Generate shell completion scripts
    Completion {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Add a NetBox instance
    Add {
        #[arg(value_name = "NAME")]
        name: String,
        #[arg(long, value_name = "HOST")]
        server: String,
        #[arg(long, default_value = "")]
        api_key: String,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        #[arg(long, default_value = DEFAULT_BASE_PATH)]
        base_path: String,
    },
    /// List configured NetBox instances
    List,
    /// Show the settings of one instance
    Inspect {
        #[arg(value_name = "NAME")]
        name: String,
        #[arg(long, help = "Print the API key instead of masking it")]
        show_key: bool,
    },
    /// Change settings of an instance (omitted settings are kept)
    Update {
        #[arg(value_name = "NAME")]
        name: String,
        #[arg(long, value_name = "HOST")]
        server: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        base_path: Option<String>,
        #[arg(long, help = "New API key (pass an empty string to clear it)")]
        api_key: Option<String>,
    },
    /// Delete an instance
    Delete {
        #[arg(value_name = "NAME")]
        name: String,
    },
    /// Make an instance the active one
    Activate {
        #[arg(value_name = "NAME")]
        name: String,
    },
}

#[derive(Subcommand)]
enum OrganizationCommand {
    /// Site management
    #[command(subcommand)]
    Sites(SitesCommand),
    /// Region management
    #[command(subcommand)]
    Regions(RegionsCommand),
}

#[derive(Subcommand)]
enum DevicesGroup {
    /// Device management
    #[command(subcommand)]
    Devices(DevicesCommand),
}

#[derive(Subcommand)]
enum SitesCommand {
    /// List the sites in NetBox
    List(SiteFilterArgs),
    /// Create a new site
    Create {
        #[arg(long)]
        name: String,
        #[arg(long, help = "Defaults to a slug derived from the name")]
        slug: Option<String>,
        #[command(flatten)]
        details: SiteDetailArgs,
    },
    /// Inspect a specific site
    Inspect {
        #[arg(value_name = "NAME")]
        name: String,
    },
    /// Update a site
    Update {
        #[arg(value_name = "NAME")]
        name: String,
        #[arg(long = "name", value_name = "NEW_NAME")]
        new_name: Option<String>,
        #[arg(long)]
        slug: Option<String>,
        #[command(flatten)]
        details: SiteDetailArgs,
    },
    /// Delete a site
    Delete {
        #[arg(value_name = "NAME")]
        name: String,
    },
}

#[derive(Args, Debug, Default)]
struct SiteFilterArgs {
    #[arg(long)]
    name: Option<String>,
    #[arg(long, help = "Name contains (case-insensitive)")]
    name_ic: Option<String>,
    #[arg(long, value_enum)]
    status: Option<SiteStatus>,
    #[arg(long, value_name = "SLUG")]
    region: Option<String>,
}

#[derive(Args, Debug, Default)]
struct SiteDetailArgs {
    #[arg(long, value_enum)]
    status: Option<SiteStatus>,
    #[arg(long)]
    facility: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    physical_address: Option<String>,
    #[arg(long)]
    shipping_address: Option<String>,
    #[arg(long)]
    comments: Option<String>,
}

#[derive(Subcommand)]
enum RegionsCommand {
    /// List the regions in NetBox
    List(RegionFilterArgs),
    /// Create a new region
    Create {
        #[arg(long)]
        name: String,
        #[arg(long, help = "Defaults to a slug derived from the name")]
        slug: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Inspect a specific region
    Inspect {
        #[arg(value_name = "NAME")]
        name: String,
    },
    /// Update a region
    Update {
        #[arg(value_name = "NAME")]
        name: String,
        #[arg(long = "name", value_name = "NEW_NAME")]
        new_name: Option<String>,
        #[arg(long)]
        slug: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Delete a region
    Delete {
        #[arg(value_name = "NAME")]
        name: String,
    },
}

#[derive(Args, Debug, Default)]
struct RegionFilterArgs {
    #[arg(long)]
    name: Option<String>,
    #[arg(long, help = "Name contains (case-insensitive)")]
    name_ic: Option<String>,
    #[arg(long, help = "Description contains (case-insensitive)")]
    description_ic: Option<String>,
}

#[derive(Subcommand)]
enum DevicesCommand {
    /// List the devices in NetBox
    List(DeviceFilterArgs),
    /// Create a new device
    Create {
        #[arg(long)]
        name: String,
        #[arg(long, value_name = "ID")]
        device_type: u64,
        #[arg(long, value_name = "ID")]
        role: u64,
        #[arg(long, value_name = "ID")]
        site: u64,
        #[arg(long, value_enum)]
        status: Option<DeviceStatus>,
        #[arg(long)]
        serial: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Inspect a specific device
    Inspect {
        #[arg(value_name = "NAME")]
        name: String,
    },
    /// Update a device
    Update {
        #[arg(value_name = "NAME")]
        name: String,
        #[arg(long = "name", value_name = "NEW_NAME")]
        new_name: Option<String>,
        #[arg(long, value_enum)]
        status: Option<DeviceStatus>,
        #[arg(long)]
        serial: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Delete a device
    Delete {
        #[arg(value_name = "NAME")]
        name: String,
    },
}

#[derive(Args, Debug, Default)]
struct DeviceFilterArgs {
    #[arg(long)]
    name: Option<String>,
    #[arg(long, help = "Name contains (case-insensitive)")]
    name_ic: Option<String>,
    #[arg(long, value_name = "SLUG")]
    site: Option<String>,
    #[arg(long, value_enum)]
    status: Option<DeviceStatus>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

impl SiteFilterArgs {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(name) = &self.name {
            query.push(("name", name.clone()));
        }
        if let Some(name) = &self.name_ic {
            query.push(("name__ic", name.clone()));
        }
        if let Some(status) = self.status {
            query.push(("status", status.as_str().to_string()));
        }
        if let Some(region) = &self.region {
            query.push(("region", region.clone()));
        }
        query
    }
}

impl RegionFilterArgs {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(name) = &self.name {
            query.push(("name", name.clone()));
        }
        if let Some(name) = &self.name_ic {
            query.push(("name__ic", name.clone()));
        }
        if let Some(description) = &self.description_ic {
            query.push(("description__ic", description.clone()));
        }
        query
    }
}

impl DeviceFilterArgs {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(name) = &self.name {
            query.push(("name", name.clone()));
        }
        if let Some(name) = &self.name_ic {
            query.push(("name__ic", name.clone()));
        }
        if let Some(site) = &self.site {
            query.push(("site", site.clone()));
        }
        if let Some(status) = self.status {
            query.push(("status", status.as_str().to_string()));
        }
        query
    }
}

impl From<SiteDetailArgs> for SiteDetails {
    fn from(args: SiteDetailArgs) -> Self {
        Self {
            status: args.status,
            facility: args.facility,
            description: args.description,
            physical_address: args.physical_address,
            shipping_address: args.shipping_address,
            comments: args.comments,
        }
    }
}

/// Settings shared by every command that talks to NetBox.
struct Connection {
    config: Option<PathBuf>,
    instance: Option<String>,
    options: ClientOptions,
}

impl Connection {
    fn open_store(&self) -> Result<ProfileStore> {
        let path = config_path(self.config.as_deref())?;
        Ok(ProfileStore::load(path)?)
    }

    fn client(&self) -> Result<ApiClient> {
        let store = self.open_store()?;
        let profile = store.resolve(self.instance.as_deref())?;
        let client = ApiClient::from_profile(profile, &self.options)?;
        debug!(
            instance = self.instance.as_deref().unwrap_or(store.active_name()),
            url = %client.base_url(),
            "using NetBox instance"
        );
        Ok(client)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(format!("nbcli={level}")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// 2 for rejected requests (unknown names, duplicates, last instance), 1 otherwise.
fn exit_code(err: &anyhow::Error) -> u8 {
    let rejected = err
        .downcast_ref::<StoreError>()
        .is_some_and(StoreError::is_user_error)
        || err
            .downcast_ref::<ApiError>()
            .is_some_and(ApiError::is_user_error);
    if rejected { 2 } else { 1 }
}

fn run(cli: Cli) -> Result<()> {
    let Cli {
        config,
        instance,
        output: format,
        timeout,
        insecure,
        verbose: _,
        command,
    } = cli;

    let connection = Connection {
        config,
        instance,
        options: ClientOptions {
            timeout: Duration::from_secs(timeout),
            accept_invalid_certs: insecure,
        },
    };

    match command {
        Commands::Config(cmd) => {
            let mut store = connection.open_store()?;
            handle_config(cmd, &mut store, format)
        }
        Commands::Organization(OrganizationCommand::Sites(cmd)) => {
            handle_sites(cmd, &connection.client()?, format)
        }
        Commands::Organization(OrganizationCommand::Regions(cmd)) => {
            handle_regions(cmd, &connection.client()?, format)
        }
        Commands::Devices(DevicesGroup::Devices(cmd)) => {
            handle_devices(cmd, &connection.client()?, format)
        }
        Commands::Status => {
            let status = connection.client()?.status()?;
            match format {
                OutputFormat::Json => print_json(&status),
                OutputFormat::Table => {
                    output::status_table(&status).print();
                    Ok(())
                }
            }
        }
        Commands::Completion { shell } => {
            print_completion(shell);
            Ok(())
        }
    }
}

fn handle_config(cmd: ConfigCommand, store: &mut ProfileStore, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommand::Add {
            name,
            server,
            api_key,
            port,
            base_path,
        } => {
            let profile = Profile {
                server,
                port,
                base_path,
                api_key,
            };
            store.add(&name, profile)?;
            println!("Added instance `{name}` to {}", store.path().display());
        }
        ConfigCommand::List => {
            let entries = store.list();
            match format {
                OutputFormat::Json => {
                    print_json(&output::profiles_json(store.active_name(), &entries))?
                }
                OutputFormat::Table => output::profiles_table(&entries).print(),
            }
        }
        ConfigCommand::Inspect { name, show_key } => {
            let profile = store.inspect(&name)?;
            let active = store.active_name() == name;
            match format {
                OutputFormat::Json => print_json(&output::profile_json(profile, show_key))?,
                OutputFormat::Table => {
                    output::profile_detail_table(&name, profile, active, show_key).print()
                }
            }
        }
        ConfigCommand::Update {
            name,
            server,
            port,
            base_path,
            api_key,
        } => {
            let patch = ProfilePatch {
                server,
                port,
                base_path,
                api_key,
            };
            if patch.is_empty() {
                debug!(instance = %name, "no settings supplied");
            }
            store.update(&name, patch)?;
            println!("Updated instance `{name}`");
        }
        ConfigCommand::Delete { name } => {
            let was_active = store.active_name() == name;
            store.delete(&name)?;
            println!("Deleted instance `{name}`");
            if was_active {
                println!("Active instance is now `{}`", store.active_name());
            }
        }
        ConfigCommand::Activate { name } => {
            store.activate(&name)?;
            println!("Activated instance `{name}`");
        }
    }
    Ok(())
}

fn handle_sites(cmd: SitesCommand, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        SitesCommand::List(filters) => {
            list_resources::<Site>(client, &filters.query(), format, output::sites_table)
        }
        SitesCommand::Create {
            name,
            slug,
            details,
        } => {
            let payload = SiteCreate {
                slug: slug_or_derived(slug, &name)?,
                name,
                details: details.into(),
            };
            create_resource::<Site, _>(client, &payload, format)
        }
        SitesCommand::Inspect { name } => {
            let site: Site = client.get_by_name(&name)?;
            match format {
                OutputFormat::Json => print_json(&site),
                OutputFormat::Table => {
                    let (details, related) = output::site_detail_tables(&site);
                    details.print();
                    println!();
                    related.print();
                    Ok(())
                }
            }
        }
        SitesCommand::Update {
            name,
            new_name,
            slug,
            details,
        } => {
            let patch = SitePatch {
                name: new_name,
                slug,
                details: details.into(),
            };
            update_resource::<Site, _>(client, &name, &patch, patch.is_empty(), format)
        }
        SitesCommand::Delete { name } => delete_resource::<Site>(client, &name),
    }
}

fn handle_regions(cmd: RegionsCommand, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        RegionsCommand::List(filters) => {
            list_resources::<Region>(client, &filters.query(), format, output::regions_table)
        }
        RegionsCommand::Create {
            name,
            slug,
            description,
        } => {
            let payload = RegionCreate {
                slug: slug_or_derived(slug, &name)?,
                name,
                description,
            };
            create_resource::<Region, _>(client, &payload, format)
        }
        RegionsCommand::Inspect { name } => {
            let region: Region = client.get_by_name(&name)?;
            match format {
                OutputFormat::Json => print_json(&region),
                OutputFormat::Table => {
                    output::region_detail_table(&region).print();
                    Ok(())
                }
            }
        }
        RegionsCommand::Update {
            name,
            new_name,
            slug,
            description,
        } => {
            let patch = RegionPatch {
                name: new_name,
                slug,
                description,
            };
            update_resource::<Region, _>(client, &name, &patch, patch.is_empty(), format)
        }
        RegionsCommand::Delete { name } => delete_resource::<Region>(client, &name),
    }
}

fn handle_devices(cmd: DevicesCommand, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        DevicesCommand::List(filters) => {
            list_resources::<Device>(client, &filters.query(), format, output::devices_table)
        }
        DevicesCommand::Create {
            name,
            device_type,
            role,
            site,
            status,
            serial,
            description,
        } => {
            let payload = DeviceCreate {
                name,
                device_type,
                role,
                site,
                status,
                serial,
                description,
            };
            create_resource::<Device, _>(client, &payload, format)
        }
        DevicesCommand::Inspect { name } => {
            let device: Device = client.get_by_name(&name)?;
            match format {
                OutputFormat::Json => print_json(&device),
                OutputFormat::Table => {
                    output::device_detail_table(&device).print();
                    Ok(())
                }
            }
        }
        DevicesCommand::Update {
            name,
            new_name,
            status,
            serial,
            description,
        } => {
            let patch = DevicePatch {
                name: new_name,
                status,
                serial,
                description,
            };
            update_resource::<Device, _>(client, &name, &patch, patch.is_empty(), format)
        }
        DevicesCommand::Delete { name } => delete_resource::<Device>(client, &name),
    }
}

fn slug_or_derived(slug: Option<String>, name: &str) -> Result<String> {
    let slug = slug.unwrap_or_else(|| slugify(name));
    if slug.is_empty() {
        return Err(anyhow!("cannot derive a slug from `{name}`; pass --slug"));
    }
    Ok(slug)
}

fn list_resources<T: Resource + Serialize>(
    client: &ApiClient,
    filters: &[(&str, String)],
    format: OutputFormat,
    table: fn(&[T]) -> Table,
) -> Result<()> {
    let items: Vec<T> = client.list(filters)?;
    match format {
        OutputFormat::Json => print_json(&items),
        OutputFormat::Table => {
            table(&items).print_list();
            Ok(())
        }
    }
}

fn create_resource<T: Resource + Serialize, B: Serialize>(
    client: &ApiClient,
    payload: &B,
    format: OutputFormat,
) -> Result<()> {
    let created: T = client.create(payload)?;
    match format {
        OutputFormat::Json => print_json(&created),
        OutputFormat::Table => {
            println!(
                "Created {} `{}` (id {})",
                T::KIND,
                created.display_name(),
                created.id()
            );
            Ok(())
        }
    }
}

fn update_resource<T: Resource + Serialize, B: Serialize>(
    client: &ApiClient,
    name: &str,
    patch: &B,
    is_empty: bool,
    format: OutputFormat,
) -> Result<()> {
    if is_empty {
        println!("Nothing to update.");
        return Ok(());
    }
    let current: T = client.get_by_name(name)?;
    let updated: T = client.update(current.id(), patch)?;
    match format {
        OutputFormat::Json => print_json(&updated),
        OutputFormat::Table => {
            println!("Updated {} `{}`", T::KIND, updated.display_name());
            Ok(())
        }
    }
}

fn delete_resource<T: Resource>(client: &ApiClient, name: &str) -> Result<()> {
    let current: T = client.get_by_name(name)?;
    client.delete::<T>(current.id())?;
    println!("Deleted {} `{}`", T::KIND, current.display_name());
    Ok(())
}

fn print_completion(shell: CompletionShell) {
    use clap_complete::{generate, shells};
    let mut cmd = Cli::command();
    let bin = cmd.get_name().to_string();
    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, bin, &mut std::io::stdout()),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, bin, &mut std::io::stdout()),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, bin, &mut std::io::stdout()),
        CompletionShell::PowerShell => {
            generate(shells::PowerShell, &mut cmd, bin, &mut std::io::stdout())
        }
    }
}
