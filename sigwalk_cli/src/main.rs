use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use itertools::Itertools;
use prettytable::{format, row, Cell, Row, Table};
use rayon::prelude::*;
use sigwalk::{
    builtin::PATCH_SITES, image::Image, locate_version_function, parse_version_string,
    scanner::{cipher, Pattern},
    Pipeline, ProfileConfig, Resolution, Role, VersionRegistry,
};
use strum::IntoEnumIterator;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
enum Commands {
    Scan(CommandScan),
    Find(CommandFind),
    Version(CommandVersion),
    Decode(CommandDecode),
    Encode(CommandEncode),
    Profiles(CommandProfiles),
}

/// Resolve every role of a version profile against one or more module images
#[derive(Parser)]
struct CommandScan {
    /// PE image to scan (can be specified multiple times)
    #[arg(required = true)]
    image: Vec<PathBuf>,

    /// Engine version number, or a full version string such as `4.21.0-4204761+++Release`
    #[arg(short, long, value_parser(|s: &str| parse_version_arg(s)))]
    version: i32,

    /// A path to a JSON profile file replacing the built-in profiles
    #[arg(long)]
    profiles: Option<PathBuf>,

    /// Also locate the patch sites applicable to the version
    #[arg(long)]
    patch_sites: bool,

    /// Only show these roles (can be specified multiple times)
    #[arg(short, long)]
    role: Vec<Role>,
}

/// Scan images for ad-hoc patterns
#[derive(Parser)]
struct CommandFind {
    /// PE image to scan (can be specified multiple times)
    #[arg(required = true)]
    image: Vec<PathBuf>,

    /// A pattern to scan for (can be specified multiple times)
    #[arg(short, long, required = true, value_parser(|s: &str| Ok::<_, String>(Pattern::new(s))))]
    pattern: Vec<Pattern>,
}

/// Locate the engine version function in an image
#[derive(Parser)]
struct CommandVersion {
    image: PathBuf,

    /// Version string to parse and look up in the profiles
    #[arg(short, long)]
    string: Option<String>,
}

/// Decode encrypted signature blobs given as hex bytes
#[derive(Parser)]
struct CommandDecode {
    /// Blob bytes, e.g. `00 0D 16 0F` or `0x00, 0x0D, 0x16, 0x0F`
    #[arg(required = true)]
    blob: Vec<String>,
}

/// Encrypt pattern text into a blob
#[derive(Parser)]
struct CommandEncode {
    text: String,

    /// Bytes per output line
    #[arg(long, default_value_t = 12)]
    width: usize,
}

/// Print the version profiles as JSON
#[derive(Parser)]
struct CommandProfiles {
    /// Validate and print this profile file instead of the built-in profiles
    #[arg(long)]
    profiles: Option<PathBuf>,
}

fn parse_version_arg(s: &str) -> Result<i32> {
    match s.parse() {
        Ok(version) => Ok(version),
        Err(_) => Ok(parse_version_string(s)?),
    }
}

fn parse_blob(s: &str) -> Result<Vec<u8>> {
    s.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(|t| {
            let t = t.strip_prefix("0x").or(t.strip_prefix("0X")).unwrap_or(t);
            u8::from_str_radix(t, 16).with_context(|| format!("invalid byte {t:?}"))
        })
        .collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sigwalk=info".parse()?))
        .compact()
        .init();

    match Commands::parse() {
        Commands::Scan(command) => scan(command),
        Commands::Find(command) => find(command),
        Commands::Version(command) => version(command),
        Commands::Decode(command) => decode(command),
        Commands::Encode(command) => encode(command),
        Commands::Profiles(command) => profiles(command),
    }
}

fn load_registry(path: Option<&Path>) -> Result<VersionRegistry> {
    Ok(match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let registry = ProfileConfig::from_json(&json)?.into_registry()?;
            info!(
                "loaded {} profiles from {}",
                registry.profiles().len(),
                path.display()
            );
            registry
        }
        None => VersionRegistry::builtin(),
    })
}

fn read_image(path: &Path) -> Result<Image<'static>> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Image::read_pe(&data).with_context(|| format!("loading {}", path.display()))
}

fn image_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn scan(command: CommandScan) -> Result<()> {
    let registry = load_registry(command.profiles.as_deref())?;
    let pipeline = Pipeline::new(&registry);
    let version = command.version;

    // fail before touching any image
    registry.lookup(version)?;

    let roles = if command.role.is_empty() {
        Role::iter().collect_vec()
    } else {
        command.role.iter().copied().unique().collect_vec()
    };
    let sites = PATCH_SITES
        .iter()
        .filter(|site| command.patch_sites && site.versions.contains(&version))
        .collect_vec();

    let results = command
        .image
        .par_iter()
        .map(|path| -> Result<(Resolution, Vec<Option<usize>>)> {
            let image = read_image(path)?;
            let resolution = pipeline.run(&image, version)?;
            let sites = sites.iter().map(|site| site.resolve(&image)).collect();
            Ok((resolution, sites))
        })
        .collect::<Vec<_>>();

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    table.set_titles(Row::new(
        std::iter::once("image".to_string())
            .chain(roles.iter().map(|r| r.to_string()))
            .chain(std::iter::once("object table".to_string()))
            .chain(sites.iter().map(|s| s.name.to_string()))
            .map(|title| Cell::new(&title))
            .collect(),
    ));

    let mut failures = vec![];
    for (path, result) in command.image.iter().zip(results) {
        let mut cells = vec![Cell::new(&image_name(path))];
        match result {
            Ok((resolution, site_addresses)) => {
                for role in &roles {
                    cells.push(Cell::new(&match resolution.addresses.get(*role) {
                        Some(address) => format!("{address:#x}").green().to_string(),
                        None => "not found".red().to_string(),
                    }));
                }
                cells.push(Cell::new(&match &resolution.object_table {
                    Some(descriptor) => format!("{} {:#x}", descriptor.layout, descriptor.address),
                    None => "-".normal().to_string(),
                }));
                for address in site_addresses {
                    cells.push(Cell::new(&match address {
                        Some(address) => format!("{address:#x}").green().to_string(),
                        None => "not found".red().to_string(),
                    }));
                }
                failures.extend(
                    resolution
                        .errors
                        .iter()
                        .map(|err| (image_name(path), err.to_string())),
                );
            }
            Err(err) => {
                cells.push(Cell::new(&format!("{err:#}").red().to_string()));
                failures.push((image_name(path), format!("{err:#}")));
            }
        }
        table.add_row(Row::new(cells));
    }
    table.printstd();

    if !failures.is_empty() {
        println!();
        let mut errors = Table::new();
        errors.set_titles(row!["image", "error"]);
        for (image, err) in failures {
            errors.add_row(row![image, err.red()]);
        }
        errors.printstd();
    }

    Ok(())
}

fn find(command: CommandFind) -> Result<()> {
    let results = command
        .image
        .par_iter()
        .map(|path| -> Result<Vec<Option<usize>>> {
            let image = read_image(path)?;
            Ok(command.pattern.iter().map(|p| image.find(p)).collect())
        })
        .collect::<Vec<_>>();

    let mut table = Table::new();
    table.set_titles(Row::new(
        std::iter::once(Cell::new("image"))
            .chain(command.pattern.iter().map(|p| Cell::new(&p.to_string())))
            .collect(),
    ));
    for (path, result) in command.image.iter().zip(results) {
        let mut cells = vec![Cell::new(&image_name(path))];
        match result {
            Ok(addresses) => cells.extend(addresses.into_iter().map(|address| {
                Cell::new(&match address {
                    Some(address) => format!("{address:#x}").green().to_string(),
                    None => "not found".red().to_string(),
                })
            })),
            Err(err) => cells.push(Cell::new(&format!("{err:#}").red().to_string())),
        }
        table.add_row(Row::new(cells));
    }
    table.printstd();
    Ok(())
}

fn version(command: CommandVersion) -> Result<()> {
    let image = read_image(&command.image)?;
    let function = locate_version_function(&image)?;
    println!("version function: {function:#x}");

    if let Some(string) = command.string {
        let version = parse_version_string(&string)?;
        println!("version: {version}");
        match VersionRegistry::builtin().lookup(version) {
            Ok(profile) => println!("profile: {}..={}", profile.min, profile.max),
            Err(err) => warn!("{err}"),
        }
    }
    Ok(())
}

fn decode(command: CommandDecode) -> Result<()> {
    let blob = parse_blob(&command.blob.join(" "))?;
    if blob.is_empty() {
        bail!("empty blob");
    }
    let text = cipher::decode_to_string(&blob);
    println!("{text}");
    println!("{}", Pattern::new(&text));
    Ok(())
}

fn encode(command: CommandEncode) -> Result<()> {
    let blob = cipher::encode(&command.text);
    println!("[u8; {}] = [", blob.len());
    for line in blob.chunks(command.width.max(1)) {
        println!(
            "    {},",
            line.iter().map(|b| format!("0x{b:02X}")).join(", ")
        );
    }
    println!("]");
    Ok(())
}

fn profiles(command: CommandProfiles) -> Result<()> {
    let registry = load_registry(command.profiles.as_deref())?;
    println!("{}", ProfileConfig::from_registry(&registry).to_json()?);
    Ok(())
}
