// Options contract between the CLI and the image engine.
// The raw `ImageOptions` carry exactly what the user said; `resolve()`
// applies presets and defaults and rejects every invalid combination.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{FatImageError, Result};

pub const DEFAULT_OUTPUT: &str = "dos-volume.img";
pub const DEFAULT_OEM_NAME: &str = "MSWIN4.1";
pub const DEFAULT_SECTOR_SIZE: u32 = 512;
pub const DEFAULT_SECTORS_PER_TRACK: u16 = 63;
pub const DEFAULT_NUM_HEADS: u16 = 255;
pub const DEFAULT_NUM_FATS: u32 = 2;

pub const MIN_SECTOR_SIZE: u32 = 128;
pub const MAX_SECTOR_SIZE: u32 = 32768;
pub const MAX_CLUSTER_SECTORS: u32 = 128;
pub const MAX_LABEL_LEN: usize = 11;
pub const MAX_OEM_NAME_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FatWidth {
    Fat12,
    Fat16,
    Fat32,
}

impl FatWidth {
    pub fn bits(self) -> u32 {
        match self {
            FatWidth::Fat12 => 12,
            FatWidth::Fat16 => 16,
            FatWidth::Fat32 => 32,
        }
    }

    /// The 8-byte file-system-type string stored in the extended BPB.
    pub fn name(self) -> &'static str {
        match self {
            FatWidth::Fat12 => "FAT12",
            FatWidth::Fat16 => "FAT16",
            FatWidth::Fat32 => "FAT32",
        }
    }
}

/// Standard floppy geometries selectable as one-shot presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FloppyPreset {
    F360,
    F720,
    F1200,
    F1440,
    F2880,
}

struct PresetParams {
    volume_size: u64,
    cluster_size: u32,
    root_dir_entries: u16,
    sectors_per_track: u16,
    num_heads: u16,
    media_descriptor: u8,
}

impl FloppyPreset {
    pub fn from_kib(kib: u32) -> Option<Self> {
        match kib {
            360 => Some(FloppyPreset::F360),
            720 => Some(FloppyPreset::F720),
            1200 => Some(FloppyPreset::F1200),
            1440 => Some(FloppyPreset::F1440),
            2880 => Some(FloppyPreset::F2880),
            _ => None,
        }
    }

    // Every preset additionally fixes FAT12, 512-byte sectors, one reserved
    // sector and two FAT copies.
    fn params(self) -> PresetParams {
        let (kib, cluster_size, root_dir_entries, sectors_per_track, num_heads, media) = match self
        {
            FloppyPreset::F360 => (360, 1024, 112, 9, 2, 0xFD),
            FloppyPreset::F720 => (720, 1024, 112, 9, 2, 0xF9),
            FloppyPreset::F1200 => (1200, 512, 112, 15, 2, 0xF9),
            FloppyPreset::F1440 => (1440, 512, 224, 18, 2, 0xF0),
            FloppyPreset::F2880 => (2880, 1024, 224, 36, 2, 0xF0),
        };
        PresetParams {
            volume_size: kib * 1024,
            cluster_size,
            root_dir_entries,
            sectors_per_track,
            num_heads,
            media_descriptor: media,
        }
    }
}

/// The raw option set handed over by the CLI. Every field a preset can fix
/// stays `None` unless the user supplied it, so conflicts are detectable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageOptions {
    pub output: Option<PathBuf>,
    pub verbose: bool,
    pub preset: Option<FloppyPreset>,
    pub volume_size: Option<u64>,
    pub free_space: Option<u64>,
    pub cluster_size: Option<u32>,
    pub root_dir_entries: Option<u32>,
    pub fat_width: Option<FatWidth>,
    pub partitioned: bool,
    pub label: Option<String>,
    pub boot_record: Option<PathBuf>,
    pub oem_name: Option<String>,
    pub serial: Option<String>,
    pub sectors_per_track: Option<u16>,
    pub num_heads: Option<u16>,
    pub media_descriptor: Option<String>,
    pub sector_size: Option<u32>,
    pub reserved_sectors: Option<u32>,
    pub num_fats: Option<u32>,
}

/// Fully-resolved configuration consumed by the layout and writer passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    pub output: PathBuf,
    pub verbose: bool,
    /// Total image bytes; 0 derives the size from the contents.
    pub volume_size: u64,
    /// Minimum free bytes to keep available.
    pub free_space: u64,
    /// Bytes per cluster; 0 lets the solver choose.
    pub cluster_size: u32,
    /// Root directory entry count on FAT12/16; 0 derives it.
    pub root_dir_entries: u16,
    pub fat_width: Option<FatWidth>,
    pub partitioned: bool,
    /// `None` leaves the root directory without a label record and the BPB
    /// label field reading `NO NAME`.
    pub label: Option<String>,
    pub boot_record: Option<PathBuf>,
    pub oem_name: String,
    /// `None` falls back to the Unix time at write time.
    pub serial: Option<u32>,
    pub sectors_per_track: u16,
    pub num_heads: u16,
    pub media_descriptor: u8,
    pub sector_size: u32,
    /// Reserved sector count; 0 picks the FAT-width default.
    pub reserved_sectors: u32,
    pub num_fats: u32,
}

impl ImageOptions {
    pub fn resolve(self) -> Result<ImageConfig> {
        let preset = self.preset.map(FloppyPreset::params);

        if let Some(p) = self.preset {
            self.check_preset_conflicts(p)?;
        }

        let sector_size = self.sector_size.unwrap_or(DEFAULT_SECTOR_SIZE);
        if !(MIN_SECTOR_SIZE..=MAX_SECTOR_SIZE).contains(&sector_size)
            || !sector_size.is_power_of_two()
        {
            return Err(FatImageError::bad_option(format!(
                "sector size {} is not a power of two in {}..={}",
                sector_size, MIN_SECTOR_SIZE, MAX_SECTOR_SIZE
            )));
        }
        if self.fat_width == Some(FatWidth::Fat32) && sector_size < 512 {
            return Err(FatImageError::bad_option(
                "FAT32 requires a sector size of at least 512 bytes",
            ));
        }

        let cluster_size = match (self.cluster_size, &preset) {
            (Some(size), _) => {
                if size < sector_size
                    || size % sector_size != 0
                    || !(size / sector_size).is_power_of_two()
                    || size / sector_size > MAX_CLUSTER_SECTORS
                {
                    return Err(FatImageError::bad_option(format!(
                        "cluster size {} is not a power-of-two multiple of the {}-byte sector (at most {}x)",
                        size, sector_size, MAX_CLUSTER_SECTORS
                    )));
                }
                size
            }
            (None, Some(p)) => p.cluster_size,
            (None, None) => 0,
        };

        let label = match self.label {
            Some(label) => {
                if label.is_empty()
                    || label.len() > MAX_LABEL_LEN
                    || !label.bytes().all(|b| b.is_ascii() && b >= 0x20)
                {
                    return Err(FatImageError::bad_option(format!(
                        "label '{}' is not 1..={} printable ASCII characters",
                        label, MAX_LABEL_LEN
                    )));
                }
                Some(label)
            }
            None => None,
        };

        let oem_name = self.oem_name.unwrap_or_else(|| DEFAULT_OEM_NAME.to_string());
        if oem_name.len() > MAX_OEM_NAME_LEN || !oem_name.bytes().all(|b| b.is_ascii() && b >= 0x20)
        {
            return Err(FatImageError::bad_option(format!(
                "OEM name '{}' is not at most {} printable ASCII characters",
                oem_name, MAX_OEM_NAME_LEN
            )));
        }

        let serial = self.serial.as_deref().map(parse_serial).transpose()?;

        let media_descriptor = match (self.media_descriptor.as_deref(), &preset) {
            (Some(text), _) => parse_media_descriptor(text)?,
            (None, Some(p)) => p.media_descriptor,
            (None, None) => {
                if self.partitioned {
                    0xF8
                } else {
                    0xF0
                }
            }
        };

        let root_dir_entries = match (self.root_dir_entries, &preset) {
            (Some(count), _) => u16::try_from(count).map_err(|_| {
                FatImageError::bad_option(format!(
                    "root directory size {} does not fit in 16 bits",
                    count
                ))
            })?,
            (None, Some(p)) => p.root_dir_entries,
            (None, None) => 0,
        };

        let num_fats = self.num_fats.unwrap_or(DEFAULT_NUM_FATS);
        if num_fats == 0 {
            return Err(FatImageError::bad_option("at least one FAT copy is required"));
        }

        Ok(ImageConfig {
            output: self
                .output
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
            verbose: self.verbose,
            volume_size: self
                .volume_size
                .or(preset.as_ref().map(|p| p.volume_size))
                .unwrap_or(0),
            free_space: self.free_space.unwrap_or(0),
            cluster_size,
            root_dir_entries,
            fat_width: if preset.is_some() {
                Some(FatWidth::Fat12)
            } else {
                self.fat_width
            },
            partitioned: self.partitioned,
            label,
            boot_record: self.boot_record,
            oem_name,
            serial,
            sectors_per_track: self
                .sectors_per_track
                .or(preset.as_ref().map(|p| p.sectors_per_track))
                .unwrap_or(DEFAULT_SECTORS_PER_TRACK),
            num_heads: self
                .num_heads
                .or(preset.as_ref().map(|p| p.num_heads))
                .unwrap_or(DEFAULT_NUM_HEADS),
            media_descriptor,
            sector_size,
            reserved_sectors: self
                .reserved_sectors
                .or(preset.as_ref().map(|_| 1))
                .unwrap_or(0),
            num_fats,
        })
    }

    fn check_preset_conflicts(&self, preset: FloppyPreset) -> Result<()> {
        let fixed: [(&str, bool); 10] = [
            ("volume size", self.volume_size.is_some()),
            ("cluster size", self.cluster_size.is_some()),
            ("root directory size", self.root_dir_entries.is_some()),
            ("FAT width", self.fat_width.is_some()),
            ("sectors per track", self.sectors_per_track.is_some()),
            ("head count", self.num_heads.is_some()),
            ("media descriptor", self.media_descriptor.is_some()),
            ("sector size", self.sector_size.is_some()),
            ("reserved sectors", self.reserved_sectors.is_some()),
            ("FAT count", self.num_fats.is_some()),
        ];
        for (name, set) in fixed {
            if set {
                return Err(FatImageError::bad_option(format!(
                    "the {:?} preset already fixes the {}",
                    preset, name
                )));
            }
        }
        Ok(())
    }
}

impl ImageConfig {
    /// A volume with no files needs an explicit size or free-space request,
    /// otherwise there is nothing to derive the geometry from.
    pub fn require_content(&self, file_count: usize) -> Result<()> {
        if file_count == 0 && self.volume_size == 0 && self.free_space == 0 {
            return Err(FatImageError::bad_option(
                "no input files and neither a volume size nor free space requested",
            ));
        }
        Ok(())
    }
}

/// Parse a volume serial of the form `HHHH-HHHH` (1-4 hex digits each side).
pub fn parse_serial(text: &str) -> Result<u32> {
    let bad = || {
        FatImageError::bad_option(format!(
            "serial '{}' does not match HHHH-HHHH (hex digits)",
            text
        ))
    };
    let (left, right) = text.split_once('-').ok_or_else(bad)?;
    if left.is_empty() || left.len() > 4 || right.is_empty() || right.len() > 4 {
        return Err(bad());
    }
    let left = u32::from_str_radix(left, 16).map_err(|_| bad())?;
    let right = u32::from_str_radix(right, 16).map_err(|_| bad())?;
    Ok((left << 16) | right)
}

/// Parse a media descriptor given as one or two hex digits.
pub fn parse_media_descriptor(text: &str) -> Result<u8> {
    if text.is_empty() || text.len() > 2 {
        return Err(FatImageError::bad_option(format!(
            "media descriptor '{}' is not 1-2 hex digits",
            text
        )));
    }
    u8::from_str_radix(text, 16).map_err(|_| {
        FatImageError::bad_option(format!("media descriptor '{}' is not 1-2 hex digits", text))
    })
}
