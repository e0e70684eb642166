/// 卷命令

use anyhow::{bail, Result};
use clap::Subcommand;
use common::models::{VolumeInfo, VolumeRef};
use common::utils::format_bytes;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::template::Template;
use super::{parse_key_value, Context, PartialFailure};
use crate::volume::CreateOptions;

#[derive(Subcommand)]
pub enum VolumeCommands {
    /// Create a volume
    Create {
        /// Volume name (generated when omitted)
        name: Option<String>,

        /// Volume driver name
        #[arg(short, long)]
        driver: Option<String>,

        /// Driver specific options
        #[arg(short, long = "opt", value_parser = parse_key_value)]
        opt: Vec<(String, String)>,

        /// Volume labels
        #[arg(long, value_parser = parse_key_value)]
        label: Vec<(String, String)>,
    },

    /// Display detailed information on one or more volumes
    Inspect {
        #[arg(required = true)]
        names: Vec<String>,

        /// Format output using a template
        #[arg(short, long)]
        format: Option<String>,
    },

    /// List volumes
    #[command(alias = "list")]
    Ls {
        /// Only display volume names
        #[arg(short, long)]
        quiet: bool,

        /// Format output using a template
        #[arg(long)]
        format: Option<String>,

        /// Filter output (dangling=, driver=, name=, label=, label!=)
        #[arg(short, long)]
        filter: Vec<String>,
    },

    /// Remove one or more volumes
    #[command(alias = "remove")]
    Rm {
        #[arg(required = true)]
        names: Vec<String>,

        /// Force the removal of one or more volumes
        #[arg(short, long)]
        force: bool,
    },

    /// Remove all unused volumes
    Prune {
        /// Do not prompt for confirmation
        #[arg(short, long)]
        force: bool,

        /// Provide filter values (e.g. 'label=<label>')
        #[arg(long)]
        filter: Vec<String>,
    },

    /// Register volumes a driver already knows about
    Import {
        /// Driver name
        driver: String,
    },
}

#[derive(Tabled)]
struct VolumeRow {
    #[tabled(rename = "DRIVER")]
    driver: String,
    #[tabled(rename = "VOLUME NAME")]
    name: String,
}

#[derive(Tabled)]
struct DriverRow {
    #[tabled(rename = "DRIVER")]
    name: String,
    #[tabled(rename = "ACTIVATE")]
    activations: u64,
    #[tabled(rename = "CREATE")]
    creations: u64,
    #[tabled(rename = "REMOVE")]
    removals: u64,
    #[tabled(rename = "MOUNT")]
    mounts: u64,
    #[tabled(rename = "UNMOUNT")]
    unmounts: u64,
    #[tabled(rename = "PATH")]
    paths: u64,
    #[tabled(rename = "GET")]
    gets: u64,
    #[tabled(rename = "LIST")]
    lists: u64,
}

pub async fn execute(cmd: VolumeCommands, ctx: &Context) -> Result<()> {
    match cmd {
        VolumeCommands::Create {
            name,
            driver,
            opt,
            label,
        } => create(ctx, name, driver, opt, label).await,
        VolumeCommands::Inspect { names, format } => inspect(ctx, names, format).await,
        VolumeCommands::Ls {
            quiet,
            format,
            filter,
        } => list(ctx, quiet, format, filter).await,
        VolumeCommands::Rm { names, force } => remove(ctx, names, force).await,
        VolumeCommands::Prune { force, filter } => prune(ctx, force, filter).await,
        VolumeCommands::Import { driver } => import(ctx, driver).await,
    }
}

async fn create(
    ctx: &Context,
    name: Option<String>,
    driver: Option<String>,
    opt: Vec<(String, String)>,
    label: Vec<(String, String)>,
) -> Result<()> {
    let info = ctx
        .manager
        .create(CreateOptions {
            name,
            driver,
            options: opt.into_iter().collect::<BTreeMap<_, _>>(),
            labels: label.into_iter().collect::<BTreeMap<_, _>>(),
            reference: None,
        })
        .await?;

    println!("{}", info.volume.name);
    Ok(())
}

async fn inspect(ctx: &Context, names: Vec<String>, format: Option<String>) -> Result<()> {
    let template = format.as_deref().map(Template::parse).transpose()?;

    let results = join_all(names.iter().map(|name| async move {
        ctx.manager.inspect(&VolumeRef::named(name.as_str())).await
    }))
    .await;

    let mut found: Vec<VolumeInfo> = Vec::new();
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(info) => found.push(info),
            Err(e) => errors.push(e),
        }
    }

    match &template {
        Some(template) => {
            for info in &found {
                println!("{}", template.render(info)?);
            }
        }
        None => println!("{}", serde_json::to_string_pretty(&found)?),
    }

    PartialFailure::check(errors, names.len())
}

async fn list(
    ctx: &Context,
    quiet: bool,
    format: Option<String>,
    filter: Vec<String>,
) -> Result<()> {
    let listing = ctx.manager.list(&filter).await?;
    for warning in &listing.warnings {
        eprintln!("WARNING: {}", warning);
    }

    if quiet {
        for info in &listing.volumes {
            println!("{}", info.volume.name);
        }
        return Ok(());
    }

    if let Some(format) = format {
        let template = Template::parse(&format)?;
        for info in &listing.volumes {
            println!("{}", template.render(info)?);
        }
        return Ok(());
    }

    let rows: Vec<VolumeRow> = listing
        .volumes
        .into_iter()
        .map(|info| VolumeRow {
            driver: info.volume.driver,
            name: info.volume.name,
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::blank());
    println!("{}", table);
    Ok(())
}

async fn remove(ctx: &Context, names: Vec<String>, force: bool) -> Result<()> {
    let results = join_all(names.iter().map(|name| async move {
        ctx.manager
            .remove(&VolumeRef::named(name.as_str()), force)
            .await
            .map(|_| name)
    }))
    .await;

    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(name) => println!("{}", name),
            Err(e) => errors.push(e),
        }
    }

    PartialFailure::check(errors, names.len())
}

async fn prune(ctx: &Context, force: bool, filter: Vec<String>) -> Result<()> {
    if !force && !confirm("This will remove all local volumes not used by at least one container.")? {
        return Ok(());
    }

    let report = ctx.manager.prune(&filter).await?;
    if !report.volumes_deleted.is_empty() {
        println!("Deleted Volumes:");
        for name in &report.volumes_deleted {
            println!("{}", name);
        }
        println!();
    }
    println!("Total reclaimed space: {}", format_bytes(report.space_reclaimed));
    Ok(())
}

async fn import(ctx: &Context, driver: String) -> Result<()> {
    let imported = ctx.manager.import(&driver).await?;
    for name in &imported {
        println!("{}", name);
    }
    Ok(())
}

pub async fn drivers(ctx: &Context, metrics: bool) -> Result<()> {
    if metrics {
        print!("{}", ctx.manager.metrics_text()?);
        return Ok(());
    }

    let rows: Vec<DriverRow> = ctx
        .manager
        .loaded_drivers()
        .await
        .into_iter()
        .map(|name| {
            let c = ctx.manager.counters(&name);
            DriverRow {
                name,
                activations: c.activations,
                creations: c.creations,
                removals: c.removals,
                mounts: c.mounts,
                unmounts: c.unmounts,
                paths: c.paths,
                gets: c.gets,
                lists: c.lists,
            }
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::blank());
    println!("{}", table);
    Ok(())
}

fn confirm(warning: &str) -> Result<bool> {
    print!("WARNING! {}\nAre you sure you want to continue? [y/N] ", warning);
    io::stdout().flush()?;

    let mut answer = String::new();
    let read = io::stdin().lock().read_line(&mut answer)?;
    if read == 0 {
        bail!("no confirmation received, use --force to skip the prompt");
    }
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
