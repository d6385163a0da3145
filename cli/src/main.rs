use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser};
use fatimage_core::{FatImageError, FatWidth, FloppyPreset, ImageOptions};
use fatimage_imager::{create_image, FileTree};

mod walk;

#[derive(Parser)]
#[command(name = "fatimage")]
#[command(about = "Generate a FAT12/16/32 disk image from host files", long_about = None)]
struct Cli {
    /// Output image path
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Print a layout summary on completion
    #[arg(short, long)]
    verbose: bool,

    /// Floppy preset in KiB: 360, 720, 1200, 1440 or 2880
    #[arg(short, long, value_name = "KIB", action = ArgAction::Append)]
    preset: Vec<u32>,

    /// Total volume size in bytes (default: derived from the contents)
    #[arg(long, value_name = "BYTES")]
    size: Option<u64>,

    /// Minimum free space to keep available, in bytes
    #[arg(long, value_name = "BYTES")]
    free_space: Option<u64>,

    /// Bytes per cluster, a power-of-two multiple of the sector size
    #[arg(long, value_name = "BYTES")]
    cluster_size: Option<u32>,

    /// Root directory entry count (FAT12/16 only)
    #[arg(long, value_name = "COUNT")]
    root_entries: Option<u32>,

    /// Force a FAT width: 12, 16 or 32
    #[arg(long, value_name = "WIDTH", action = ArgAction::Append)]
    fat: Vec<u32>,

    /// Write an MBR with a single partition in front of the volume
    #[arg(short = 'P', long)]
    partition: bool,

    /// Volume label, up to 11 ASCII characters
    #[arg(short, long, value_name = "LABEL")]
    label: Option<String>,

    /// Boot sector image to overlay the BPB onto
    #[arg(long, value_name = "FILE")]
    boot_record: Option<PathBuf>,

    /// OEM name, up to 8 ASCII characters
    #[arg(long, value_name = "NAME")]
    oem: Option<String>,

    /// Volume serial number as HHHH-HHHH (default: derived from the clock)
    #[arg(long, value_name = "SERIAL")]
    serial: Option<String>,

    /// CHS geometry: sectors per track
    #[arg(long, value_name = "COUNT")]
    sectors_per_track: Option<u16>,

    /// CHS geometry: head count
    #[arg(long, value_name = "COUNT")]
    heads: Option<u16>,

    /// Media descriptor as one or two hex digits
    #[arg(long, value_name = "HEX")]
    media: Option<String>,

    /// Bytes per sector, a power of two in 128..=32768
    #[arg(long, value_name = "BYTES")]
    sector_size: Option<u32>,

    /// Reserved sector count
    #[arg(long, value_name = "COUNT")]
    reserved: Option<u32>,

    /// Number of FAT copies
    #[arg(long, value_name = "COUNT")]
    num_fats: Option<u32>,

    /// Input paths as HOST[=IMAGE]; directories are added recursively
    #[arg(value_name = "PATH")]
    inputs: Vec<String>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("fatimage: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        if cli.verbose { "info" } else { "warn" },
    ))
    .init();

    let config = build_options(&cli)?.resolve()?;
    config.require_content(cli.inputs.len())?;

    let mut tree = FileTree::new();
    for input in &cli.inputs {
        let (host, image) = match input.split_once('=') {
            Some((host, image)) => (host, image),
            None => (input.as_str(), ""),
        };
        walk::add_path(&mut tree, Path::new(host), image)?;
    }

    let summary = create_image(&config, &mut tree)?;
    if cli.verbose {
        println!(
            "{}: {} ({} sectors of {}), {} bytes per cluster, {} of {} clusters used",
            config.output.display(),
            summary.fat_width.name(),
            summary.total_sectors,
            summary.sector_size,
            summary.cluster_size,
            summary.used_clusters,
            summary.cluster_count,
        );
    }
    Ok(())
}

fn build_options(cli: &Cli) -> anyhow::Result<ImageOptions> {
    if cli.preset.len() > 1 {
        return Err(FatImageError::bad_option("more than one preset given").into());
    }
    let preset = match cli.preset.first() {
        Some(&kib) => Some(FloppyPreset::from_kib(kib).ok_or_else(|| {
            FatImageError::bad_option(format!(
                "no {} KiB preset; choose 360, 720, 1200, 1440 or 2880",
                kib
            ))
        })?),
        None => None,
    };

    if cli.fat.len() > 1 {
        return Err(FatImageError::bad_option("more than one FAT width given").into());
    }
    let fat_width = match cli.fat.first().copied() {
        Some(12) => Some(FatWidth::Fat12),
        Some(16) => Some(FatWidth::Fat16),
        Some(32) => Some(FatWidth::Fat32),
        Some(other) => {
            return Err(
                FatImageError::bad_option(format!("no FAT{} variant; use 12, 16 or 32", other))
                    .into(),
            )
        }
        None => None,
    };

    Ok(ImageOptions {
        output: cli.output.clone(),
        verbose: cli.verbose,
        preset,
        volume_size: cli.size,
        free_space: cli.free_space,
        cluster_size: cli.cluster_size,
        root_dir_entries: cli.root_entries,
        fat_width,
        partitioned: cli.partition,
        label: cli.label.clone(),
        boot_record: cli.boot_record.clone(),
        oem_name: cli.oem.clone(),
        serial: cli.serial.clone(),
        sectors_per_track: cli.sectors_per_track,
        num_heads: cli.heads,
        media_descriptor: cli.media.clone(),
        sector_size: cli.sector_size,
        reserved_sectors: cli.reserved,
        num_fats: cli.num_fats,
    })
}
