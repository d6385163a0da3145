// Volume geometry solver: finds a self-consistent {FAT width, cluster size,
// sector map} for the tree and the user's constraints.

use log::{debug, info};

use fatimage_core::{FatImageError, FatWidth, ImageConfig, Result};

use crate::constants::*;
use crate::tree::FileTree;

/// Fully-resolved sector map for one volume. All sector numbers are
/// absolute within the image file, so a partitioned volume simply starts
/// at a non-zero boot sector.
#[derive(Debug, Clone)]
pub struct VolumeLayout {
    pub fat_width: FatWidth,
    pub sector_size: u32,
    pub cluster_size: u32,
    pub sectors_per_cluster: u32,
    /// Data clusters available in the volume, free ones included.
    pub cluster_count: u64,
    pub reserved_sectors: u32,
    pub num_fats: u32,
    /// LBA of the boot sector: 0, or one track into a partitioned image.
    pub boot_sector: u64,
    pub first_fat_sector: u64,
    pub fat_sectors: u64,
    pub root_dir_sector: u64,
    pub first_data_sector: u64,
    /// Total image size in sectors.
    pub end_of_volume: u64,
    /// Root directory entry count as stored in the BPB; 0 on FAT32.
    pub root_entries: u64,
    /// First cluster of the root directory (FAT32), 0 otherwise.
    pub root_cluster: u32,
}

impl VolumeLayout {
    /// Sectors belonging to the FAT volume itself, excluding any MBR track.
    pub fn volume_sectors(&self) -> u64 {
        self.end_of_volume - self.boot_sector
    }

    /// Byte offset of a data cluster.
    pub fn cluster_offset(&self, cluster: u32) -> u64 {
        self.first_data_sector * self.sector_size as u64
            + (cluster as u64 - 2) * self.cluster_size as u64
    }

    #[cfg(test)]
    pub(crate) fn for_tests(sector_size: u32, cluster_size: u32) -> Self {
        VolumeLayout {
            fat_width: FatWidth::Fat12,
            sector_size,
            cluster_size,
            sectors_per_cluster: cluster_size / sector_size,
            cluster_count: 0,
            reserved_sectors: 1,
            num_fats: 2,
            boot_sector: 0,
            first_fat_sector: 1,
            fat_sectors: 1,
            root_dir_sector: 3,
            first_data_sector: 3,
            end_of_volume: 3,
            root_entries: 0,
            root_cluster: 0,
        }
    }
}

fn max_clusters(width: FatWidth) -> u64 {
    match width {
        FatWidth::Fat12 => MAX_FAT12_CLUSTERS,
        FatWidth::Fat16 => MAX_FAT16_CLUSTERS,
        FatWidth::Fat32 => MAX_FAT32_CLUSTERS,
    }
}

/// Iterate to a stable (FAT width, cluster size) pair and derive the sector
/// map. The tree is laid out once per iteration so directory sizes always
/// match the geometry under consideration.
pub fn solve_layout(config: &ImageConfig, tree: &mut FileTree) -> Result<VolumeLayout> {
    let sector_size = config.sector_size as u64;
    let cluster_pinned = config.cluster_size != 0;
    let mut cluster_size = config.cluster_size.max(config.sector_size) as u64;
    let mut fat_width = config.fat_width.unwrap_or(FatWidth::Fat12);
    let forced = config.fat_width;
    let user_sectors = config.volume_size / sector_size;

    loop {
        let data_clusters = tree.build_directories(
            config.label.as_deref(),
            cluster_size as u32,
            fat_width,
        )?;
        let sectors_per_cluster = cluster_size / sector_size;

        let root_entries = if fat_width == FatWidth::Fat32 {
            0
        } else {
            tree.root_entry_count().max(config.root_dir_entries as u64)
        };
        let root_dir_sectors = (root_entries * DIR_ENTRY_SIZE as u64).div_ceil(sector_size);
        let reserved_sectors = config.reserved_sectors.max(match fat_width {
            FatWidth::Fat32 => 32,
            _ => 1,
        }) as u64;
        let boot_sector = if config.partitioned {
            config.sectors_per_track.max(1) as u64
        } else {
            0
        };
        let first_fat = boot_sector + reserved_sectors;

        let fat_sectors_for = |count: u64| -> u64 {
            ((count + 2) * fat_width.bits() as u64).div_ceil(sector_size * 8)
        };
        let derive = |count: u64| -> (u64, u64, u64, u64) {
            let fat_sectors = fat_sectors_for(count);
            let root_dir_sector = first_fat + fat_sectors * config.num_fats as u64;
            let first_data = root_dir_sector
                + if fat_width == FatWidth::Fat32 {
                    0
                } else {
                    root_dir_sectors
                };
            let end = first_data + count * sectors_per_cluster;
            (fat_sectors, root_dir_sector, first_data, end)
        };

        let mut cluster_count = data_clusters + config.free_space.div_ceil(cluster_size);

        if config.volume_size != 0 {
            let (_, _, _, end) = derive(cluster_count);
            if end > user_sectors {
                return Err(FatImageError::layout(format!(
                    "contents need {} sectors but the volume holds only {}",
                    end, user_sectors
                )));
            }
            // hand every leftover sector to the data area, then back off
            // one cluster at a time while the grown FAT overflows the volume
            cluster_count += (user_sectors - end) / sectors_per_cluster;
            while derive(cluster_count).3 > user_sectors {
                cluster_count -= 1;
            }
        }

        let mut next_width = fat_width;
        let mut grow_cluster = false;
        if cluster_count > MAX_FAT32_CLUSTERS {
            grow_cluster = true;
        } else if cluster_count > MAX_FAT16_CLUSTERS {
            if matches!(forced, Some(FatWidth::Fat12) | Some(FatWidth::Fat16))
                || sector_size < 512
            {
                grow_cluster = true;
            } else {
                next_width = FatWidth::Fat32;
            }
        } else if cluster_count > MAX_FAT12_CLUSTERS {
            match forced {
                Some(FatWidth::Fat32) => cluster_count = MAX_FAT16_CLUSTERS + 1,
                Some(FatWidth::Fat12) => grow_cluster = true,
                _ => next_width = FatWidth::Fat16,
            }
        } else {
            match forced {
                Some(FatWidth::Fat32) => cluster_count = MAX_FAT16_CLUSTERS + 1,
                Some(FatWidth::Fat16) => cluster_count = MAX_FAT12_CLUSTERS + 1,
                _ => next_width = FatWidth::Fat12,
            }
        }

        if !grow_cluster && next_width == fat_width {
            // converged; re-derive in case a forced width bumped the count
            let (fat_sectors, root_dir_sector, first_data, end) = derive(cluster_count);
            if config.volume_size != 0 && end > user_sectors {
                return Err(FatImageError::layout(format!(
                    "{} needs {} sectors but the volume holds only {}",
                    fat_width.name(),
                    end,
                    user_sectors
                )));
            }
            if fat_width != FatWidth::Fat32
                && config.root_dir_entries != 0
                && tree.root_entry_count() > config.root_dir_entries as u64
            {
                return Err(FatImageError::layout(format!(
                    "root directory holds {} entries but is limited to {}",
                    tree.root_entry_count(),
                    config.root_dir_entries
                )));
            }
            debug_assert!(cluster_count <= max_clusters(fat_width));

            let layout = VolumeLayout {
                fat_width,
                sector_size: config.sector_size,
                cluster_size: cluster_size as u32,
                sectors_per_cluster: sectors_per_cluster as u32,
                cluster_count,
                reserved_sectors: reserved_sectors as u32,
                num_fats: config.num_fats,
                boot_sector,
                first_fat_sector: first_fat,
                fat_sectors,
                root_dir_sector,
                first_data_sector: first_data,
                end_of_volume: end,
                root_entries: if fat_width == FatWidth::Fat32 {
                    0
                } else {
                    root_dir_sectors * sector_size / DIR_ENTRY_SIZE as u64
                },
                root_cluster: tree.root_first_cluster(),
            };
            info!(
                "{}: {} sectors of {}, {} bytes per cluster, {} clusters, FAT of {} sectors",
                fat_width.name(),
                layout.end_of_volume,
                layout.sector_size,
                layout.cluster_size,
                layout.cluster_count,
                layout.fat_sectors
            );
            return Ok(layout);
        }

        if grow_cluster {
            if cluster_pinned || cluster_size >= (MAX_SECTORS_PER_CLUSTER as u64) * sector_size {
                return Err(FatImageError::layout(
                    "volume too large for the requested parameters",
                ));
            }
            cluster_size *= 2;
            debug!("growing clusters to {} bytes", cluster_size);
        }
        fat_width = next_width;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fatimage_core::ImageOptions;

    fn config_with(options: ImageOptions) -> ImageConfig {
        options.resolve().unwrap()
    }

    #[test]
    fn empty_sized_volume_stays_fat12() {
        let config = config_with(ImageOptions {
            volume_size: Some(1 << 20),
            ..Default::default()
        });
        let mut tree = FileTree::new();
        let layout = solve_layout(&config, &mut tree).unwrap();
        assert_eq!(layout.fat_width, FatWidth::Fat12);
        assert_eq!(layout.end_of_volume * 512, 1 << 20);
        assert!(layout.cluster_count <= MAX_FAT12_CLUSTERS);
    }

    #[test]
    fn large_volume_promotes_to_fat16() {
        let config = config_with(ImageOptions {
            volume_size: Some(16 << 20),
            cluster_size: Some(512),
            ..Default::default()
        });
        let mut tree = FileTree::new();
        let layout = solve_layout(&config, &mut tree).unwrap();
        assert_eq!(layout.fat_width, FatWidth::Fat16);
        assert_eq!(layout.cluster_size, 512);
    }

    #[test]
    fn huge_volume_promotes_to_fat32() {
        let config = config_with(ImageOptions {
            volume_size: Some(64 << 20),
            cluster_size: Some(512),
            ..Default::default()
        });
        let mut tree = FileTree::new();
        let layout = solve_layout(&config, &mut tree).unwrap();
        assert_eq!(layout.fat_width, FatWidth::Fat32);
        assert!(layout.cluster_count > MAX_FAT16_CLUSTERS);
        assert_eq!(layout.reserved_sectors, 32);
        assert_eq!(layout.root_entries, 0);
    }

    #[test]
    fn forced_fat12_grows_clusters_instead() {
        let config = config_with(ImageOptions {
            volume_size: Some(16 << 20),
            fat_width: Some(FatWidth::Fat12),
            ..Default::default()
        });
        let mut tree = FileTree::new();
        let layout = solve_layout(&config, &mut tree).unwrap();
        assert_eq!(layout.fat_width, FatWidth::Fat12);
        assert!(layout.cluster_size > 512);
        assert!(layout.cluster_count <= MAX_FAT12_CLUSTERS);
    }

    #[test]
    fn forced_fat32_bumps_the_cluster_count() {
        // a handful of free clusters would fit FAT12; forcing FAT32 inflates
        // the volume to the FAT32 minimum instead
        let config = config_with(ImageOptions {
            free_space: Some(1 << 20),
            fat_width: Some(FatWidth::Fat32),
            ..Default::default()
        });
        let mut tree = FileTree::new();
        let layout = solve_layout(&config, &mut tree).unwrap();
        assert_eq!(layout.fat_width, FatWidth::Fat32);
        assert_eq!(layout.cluster_count, MAX_FAT16_CLUSTERS + 1);
    }

    #[test]
    fn forced_fat16_bumps_the_cluster_count() {
        let config = config_with(ImageOptions {
            free_space: Some(64 * 1024),
            fat_width: Some(FatWidth::Fat16),
            ..Default::default()
        });
        let mut tree = FileTree::new();
        let layout = solve_layout(&config, &mut tree).unwrap();
        assert_eq!(layout.fat_width, FatWidth::Fat16);
        assert_eq!(layout.cluster_count, MAX_FAT12_CLUSTERS + 1);
    }

    #[test]
    fn pinned_cluster_size_fails_when_growth_is_needed() {
        // 16 MiB of 512-byte clusters overflows FAT12 and the pin forbids
        // doubling
        let config = config_with(ImageOptions {
            volume_size: Some(16 << 20),
            cluster_size: Some(512),
            fat_width: Some(FatWidth::Fat12),
            ..Default::default()
        });
        let mut tree = FileTree::new();
        assert!(matches!(
            solve_layout(&config, &mut tree),
            Err(FatImageError::LayoutImpossible(_))
        ));
    }

    #[test]
    fn volume_too_small_for_contents_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("BIG.BIN");
        std::fs::write(&path, vec![0u8; 64 * 1024]).unwrap();
        let config = config_with(ImageOptions {
            volume_size: Some(16 * 1024),
            ..Default::default()
        });
        let mut tree = FileTree::new();
        tree.add_file(&path, "", 0).unwrap();
        assert!(matches!(
            solve_layout(&config, &mut tree),
            Err(FatImageError::LayoutImpossible(_))
        ));
    }

    #[test]
    fn free_space_request_adds_clusters() {
        let config = config_with(ImageOptions {
            free_space: Some(1 << 20),
            ..Default::default()
        });
        let mut tree = FileTree::new();
        let layout = solve_layout(&config, &mut tree).unwrap();
        assert!(
            layout.cluster_count * layout.cluster_size as u64 >= 1 << 20,
            "free-space request not honored"
        );
    }

    #[test]
    fn pinned_root_directory_overflow_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut tree = FileTree::new();
        for i in 0..3 {
            let path = dir.path().join(format!("F{}.TXT", i));
            std::fs::write(&path, b"x").unwrap();
            tree.add_file(&path, "", 0).unwrap();
        }
        let config = config_with(ImageOptions {
            volume_size: Some(1 << 20),
            root_dir_entries: Some(2),
            ..Default::default()
        });
        assert!(matches!(
            solve_layout(&config, &mut tree),
            Err(FatImageError::LayoutImpossible(_))
        ));
    }
}
