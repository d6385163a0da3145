// Volume writer: emits every region of the image in order. Failures leave
// the partial image in place for inspection.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::time::UNIX_EPOCH;

use log::info;

use fatimage_core::{FatWidth, ImageConfig, Result};

use crate::boot_sector::{build_boot_sector, build_fsinfo};
use crate::constants::*;
use crate::layout::{solve_layout, VolumeLayout};
use crate::mbr::build_mbr;
use crate::tree::FileTree;

/// What ended up on disk, for the verbose report.
#[derive(Debug, Clone)]
pub struct ImageSummary {
    pub fat_width: FatWidth,
    pub total_sectors: u64,
    pub sector_size: u32,
    pub cluster_size: u32,
    pub cluster_count: u64,
    pub used_clusters: u64,
    pub fat_sectors: u64,
}

/// Solve the layout for `tree` and write the image in one go.
pub fn create_image(config: &ImageConfig, tree: &mut FileTree) -> Result<ImageSummary> {
    let layout = solve_layout(config, tree)?;
    write_image(config, &layout, tree)
}

pub fn write_image(
    config: &ImageConfig,
    layout: &VolumeLayout,
    tree: &FileTree,
) -> Result<ImageSummary> {
    let sector_size = layout.sector_size as u64;
    let mut file = File::create(&config.output)?;

    // extend to the exact image size up front; unwritten regions read zero
    let image_bytes = layout.end_of_volume * sector_size;
    file.seek(SeekFrom::Start(image_bytes - 1))?;
    file.write_all(&[0])?;

    if config.partitioned {
        let mbr = build_mbr(config, layout);
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&mbr)?;
        info!(
            "MBR: partition type {:#04x}, {} sectors from LBA {}",
            mbr[MBR_PARTITION_1 + 4],
            layout.volume_sectors(),
            layout.boot_sector
        );
    }

    // entries 0 and 1 are reserved; the media descriptor is patched into
    // entry 0 once the tree walk has grown the table
    let mut fat: Vec<u32> = vec![FAT_END_OF_CHAIN, FAT_END_OF_CHAIN];
    tree.write(&mut file, layout, &mut fat)?;
    fat[0] = 0x0FFF_FF00 | config.media_descriptor as u32;

    let packed = pack_fat(&fat, layout.fat_width);
    debug_assert!(
        packed.len() as u64 <= layout.fat_sectors * sector_size,
        "FAT entries overflow the FAT region"
    );
    for copy in 0..layout.num_fats as u64 {
        let offset = (layout.first_fat_sector + copy * layout.fat_sectors) * sector_size;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&packed)?;
    }
    info!(
        "{} FAT copies of {} sectors, {} chained clusters",
        layout.num_fats,
        layout.fat_sectors,
        fat.len() - 2
    );

    let serial = match config.serial {
        Some(serial) => serial,
        None => UNIX_EPOCH
            .elapsed()
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0),
    };
    let boot = build_boot_sector(config, layout, serial)?;
    file.seek(SeekFrom::Start(layout.boot_sector * sector_size))?;
    file.write_all(&boot)?;

    if layout.fat_width == FatWidth::Fat32 {
        let fsinfo = build_fsinfo(layout.cluster_count, fat.len() as u32);
        file.seek(SeekFrom::Start(
            (layout.boot_sector + FAT32_FSINFO_SECTOR) * sector_size,
        ))?;
        file.write_all(&fsinfo)?;
        file.seek(SeekFrom::Start(
            (layout.boot_sector + FAT32_BACKUP_BOOT_SECTOR) * sector_size,
        ))?;
        file.write_all(&boot)?;
        file.seek(SeekFrom::Start(
            (layout.boot_sector + FAT32_BACKUP_FSINFO_SECTOR) * sector_size,
        ))?;
        file.write_all(&fsinfo)?;
    }

    file.sync_all()?;
    info!("wrote {} ({} bytes)", config.output.display(), image_bytes);

    Ok(ImageSummary {
        fat_width: layout.fat_width,
        total_sectors: layout.end_of_volume,
        sector_size: layout.sector_size,
        cluster_size: layout.cluster_size,
        cluster_count: layout.cluster_count,
        used_clusters: fat.len() as u64 - 2,
        fat_sectors: layout.fat_sectors,
    })
}

/// Serialize the in-memory FAT into its on-disk width.
fn pack_fat(fat: &[u32], width: FatWidth) -> Vec<u8> {
    match width {
        FatWidth::Fat12 => {
            let mut out = Vec::with_capacity(fat.len() * 3 / 2 + 2);
            let mut pairs = fat.chunks_exact(2);
            for pair in &mut pairs {
                let (e0, e1) = (pair[0] & 0xFFF, pair[1] & 0xFFF);
                out.push((e0 & 0xFF) as u8);
                out.push((((e0 >> 8) & 0x0F) | ((e1 & 0x0F) << 4)) as u8);
                out.push(((e1 >> 4) & 0xFF) as u8);
            }
            if let [entry] = pairs.remainder() {
                // odd tail: two bytes of the low 12 bits, upper nibble clear
                let e = entry & 0xFFF;
                out.push((e & 0xFF) as u8);
                out.push(((e >> 8) & 0x0F) as u8);
            }
            out
        }
        FatWidth::Fat16 => fat
            .iter()
            .flat_map(|&e| ((e & 0xFFFF) as u16).to_le_bytes())
            .collect(),
        FatWidth::Fat32 => fat
            .iter()
            .flat_map(|&e| (e & 0x0FFF_FFFF).to_le_bytes())
            .collect(),
    }
}
