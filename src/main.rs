//! kcdump - Recover kext and sandbox metadata from Apple prelinked kernelcaches.
//!
//! List the kexts of a decompressed kernelcache, dump their `kmod_info_t`
//! records, or recover the sandbox operation table.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use kcdump::kernelcache::{find_profile_boundaries, read_kmod_infos, sandbox_operations};
use kcdump::macho::filetype_name;
use kcdump::{list_kexts, MachOContext, SandboxScanOptions};

/// Recover kext and sandbox metadata from Apple prelinked kernelcaches.
#[derive(Parser, Debug)]
#[command(name = "kcdump")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
    #[arg(short, long, global = true, default_value = "1")]
    verbosity: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List prelinked kexts with their load addresses
    Kexts {
        /// Filter kexts by bundle identifier substring
        #[arg(short, long)]
        filter: Option<String>,

        /// Path to the decompressed kernelcache
        kernelcache: PathBuf,
    },

    /// Dump every kmod_info_t record
    Kmod {
        /// Path to the decompressed kernelcache
        kernelcache: PathBuf,
    },

    /// Recover the sandbox operation names
    Sandbox {
        /// Operation name that starts the table
        #[arg(long, default_value = "default")]
        anchor: String,

        /// Pointer tag that chains to the next operation (hex or decimal)
        #[arg(long, default_value = "0x17", value_parser = parse_tag)]
        chain_tag: u16,

        /// Also list candidate sandbox profile offsets in __TEXT,__const
        #[arg(short, long)]
        profiles: bool,

        /// Path to the decompressed kernelcache (or sandbox kext)
        kernelcache: PathBuf,
    },

    /// Show Mach-O header information
    Info {
        /// Path to the decompressed kernelcache
        kernelcache: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbosity);

    match cli.command {
        Commands::Kexts {
            kernelcache,
            filter,
        } => cmd_kexts(kernelcache, filter),
        Commands::Kmod { kernelcache } => cmd_kmod(kernelcache),
        Commands::Sandbox {
            kernelcache,
            anchor,
            chain_tag,
            profiles,
        } => cmd_sandbox(
            kernelcache,
            SandboxScanOptions { anchor, chain_tag },
            profiles,
        ),
        Commands::Info { kernelcache } => cmd_info(kernelcache),
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Parses a tag given as `0x`-prefixed hex or decimal.
fn parse_tag(s: &str) -> std::result::Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid tag '{}': {}", s, e))
}

fn open(path: &Path) -> Result<MachOContext<memmap2::Mmap>> {
    MachOContext::open(path)
        .with_context(|| format!("Failed to open kernelcache: {}", path.display()))
}

fn cmd_kexts(kernelcache: PathBuf, filter: Option<String>) -> Result<()> {
    let start = Instant::now();

    let kexts = list_kexts(&kernelcache)
        .with_context(|| format!("Failed to list kexts: {}", kernelcache.display()))?;

    let mut shown = 0usize;
    for kext in &kexts {
        if let Some(ref f) = filter {
            if !kext.bundle_id.contains(f.as_str()) {
                continue;
            }
        }
        println!("{}", kext);
        shown += 1;
    }

    if shown == 0 && filter.is_some() {
        warn!("No kexts match the filter");
    }

    info!(
        "Listed {}/{} kexts in {:.2}s",
        shown,
        kexts.len(),
        start.elapsed().as_secs_f64()
    );

    Ok(())
}

fn cmd_kmod(kernelcache: PathBuf) -> Result<()> {
    let image = open(&kernelcache)?;

    let infos = read_kmod_infos(&image)
        .with_context(|| format!("Failed to read kmod_info: {}", kernelcache.display()))?;

    for info in &infos {
        println!("{}", info);
    }

    Ok(())
}

fn cmd_sandbox(kernelcache: PathBuf, opts: SandboxScanOptions, profiles: bool) -> Result<()> {
    let image = open(&kernelcache)?;

    let ops = sandbox_operations(&image, &opts).with_context(|| {
        format!(
            "Failed to scan sandbox operations: {}",
            kernelcache.display()
        )
    })?;

    if ops.is_empty() {
        warn!("No sandbox operation table found (anchor {:?})", opts.anchor);
    }
    for (i, op) in ops.iter().enumerate() {
        println!("{:4}  {}", i, op);
    }

    if profiles {
        let offsets = find_profile_boundaries(&image)
            .context("Failed to scan __TEXT,__const for sandbox profiles")?;
        println!("\nProfile candidates ({}):", offsets.len());
        for offset in offsets {
            println!("  {:#x}", offset);
        }
    }

    Ok(())
}

fn cmd_info(kernelcache: PathBuf) -> Result<()> {
    let image = open(&kernelcache)?;
    let header = &image.header;

    println!("Kernelcache Information");
    println!("=======================");
    println!("Path:         {}", kernelcache.display());
    println!("Architecture: {}", header.arch_name());
    println!("File type:    {}", filetype_name(header.filetype));
    println!("Flags:        {:?}", header.flags());
    if let Some(uuid) = image.uuid() {
        println!("UUID:         {}", format_uuid(&uuid));
    }
    println!("Base address: {:#018x}", image.base_address());
    println!(
        "Size:         {:.2} MB",
        image.as_bytes().len() as f64 / 1024.0 / 1024.0
    );

    println!("\nSegments:");
    for (i, seg) in image.segments().enumerate() {
        let cmd = &seg.command;
        println!(
            "  [{:2}] {:<16} {:#018x} - {:#018x} ({:>8}) {} sects  cmd @ {:#x}",
            i,
            seg.name(),
            cmd.vmaddr,
            cmd.vmaddr.saturating_add(cmd.vmsize),
            format_size(cmd.vmsize),
            cmd.nsects,
            seg.command_offset
        );
    }

    let entries: Vec<_> = image.fileset_entries().collect();
    if !entries.is_empty() {
        println!("\nFileset entries ({}):", entries.len());
        for (entry_id, vmaddr, fileoff) in entries {
            println!("  {:#018x} {:#010x}  {}", vmaddr, fileoff, entry_id);
        }
    }

    Ok(())
}

fn format_uuid(uuid: &[u8; 16]) -> String {
    let hex: Vec<String> = uuid.iter().map(|b| format!("{:02X}", b)).collect();
    format!(
        "{}-{}-{}-{}-{}",
        hex[0..4].concat(),
        hex[4..6].concat(),
        hex[6..8].concat(),
        hex[8..10].concat(),
        hex[10..16].concat()
    )
}

fn format_size(size: u64) -> String {
    if size >= 1024 * 1024 * 1024 {
        format!("{:.1}G", size as f64 / 1024.0 / 1024.0 / 1024.0)
    } else if size >= 1024 * 1024 {
        format!("{:.1}M", size as f64 / 1024.0 / 1024.0)
    } else if size >= 1024 {
        format!("{:.1}K", size as f64 / 1024.0)
    } else {
        format!("{}B", size)
    }
}
