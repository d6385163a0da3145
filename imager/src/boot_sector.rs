// Boot sector and FSInfo construction. The BPB is overlaid onto either a
// synthesized stub or a user-supplied boot record, so custom boot code
// keeps its instructions while the geometry fields are always ours.

use fatimage_core::{FatWidth, ImageConfig, Result};

use crate::bytes::{write_str, write_uint};
use crate::constants::*;
use crate::layout::VolumeLayout;

pub fn build_boot_sector(
    config: &ImageConfig,
    layout: &VolumeLayout,
    serial: u32,
) -> Result<Vec<u8>> {
    let sector_size = layout.sector_size as usize;
    let mut sector = vec![0u8; sector_size];

    match &config.boot_record {
        Some(path) => {
            let data = std::fs::read(path)?;
            let n = data.len().min(sector_size);
            sector[..n].copy_from_slice(&data[..n]);
        }
        None => {
            // JMP 0x5A / NOP, then an idle loop for machines that boot it
            sector[BS_JMP_BOOT] = 0xEB;
            sector[BS_JMP_BOOT + 1] = 0x58;
            sector[BS_JMP_BOOT + 2] = 0x90;
            sector[BOOT_STUB_LOOP] = 0xEB;
            sector[BOOT_STUB_LOOP + 1] = 0xFE;
            if sector_size >= 512 {
                sector[BOOT_SIGNATURE_OFFSET..BOOT_SIGNATURE_OFFSET + 2]
                    .copy_from_slice(&BOOT_SIGNATURE);
            }
        }
    }

    overlay_bpb(&mut sector, config, layout, serial);
    Ok(sector)
}

fn overlay_bpb(sector: &mut [u8], config: &ImageConfig, layout: &VolumeLayout, serial: u32) {
    let fat32 = layout.fat_width == FatWidth::Fat32;

    write_str(&mut sector[BS_OEM_NAME..BS_OEM_NAME + 8], &config.oem_name);
    write_uint(
        &mut sector[BPB_BYTES_PER_SEC..BPB_BYTES_PER_SEC + 2],
        layout.sector_size as u64,
    );
    sector[BPB_SEC_PER_CLUS] = layout.sectors_per_cluster as u8;
    write_uint(
        &mut sector[BPB_RSVD_SEC_CNT..BPB_RSVD_SEC_CNT + 2],
        layout.reserved_sectors as u64,
    );
    sector[BPB_NUM_FATS] = layout.num_fats as u8;
    write_uint(
        &mut sector[BPB_ROOT_ENT_CNT..BPB_ROOT_ENT_CNT + 2],
        layout.root_entries,
    );

    let volume_sectors = layout.volume_sectors();
    let (small, large) = if volume_sectors < 0xFFFF {
        (volume_sectors, 0)
    } else {
        (0, volume_sectors)
    };
    write_uint(&mut sector[BPB_TOT_SEC16..BPB_TOT_SEC16 + 2], small);
    write_uint(&mut sector[BPB_TOT_SEC32..BPB_TOT_SEC32 + 4], large);

    sector[BPB_MEDIA] = config.media_descriptor;
    write_uint(
        &mut sector[BPB_FAT_SZ16..BPB_FAT_SZ16 + 2],
        if fat32 { 0 } else { layout.fat_sectors },
    );
    write_uint(
        &mut sector[BPB_SEC_PER_TRK..BPB_SEC_PER_TRK + 2],
        config.sectors_per_track as u64,
    );
    write_uint(
        &mut sector[BPB_NUM_HEADS..BPB_NUM_HEADS + 2],
        config.num_heads as u64,
    );
    write_uint(
        &mut sector[BPB_HIDD_SEC..BPB_HIDD_SEC + 4],
        layout.boot_sector,
    );

    let ext = if fat32 {
        write_uint(
            &mut sector[BPB_FAT_SZ32..BPB_FAT_SZ32 + 4],
            layout.fat_sectors,
        );
        write_uint(&mut sector[BPB_EXT_FLAGS..BPB_EXT_FLAGS + 3], 0);
        write_uint(
            &mut sector[BPB_ROOT_CLUS..BPB_ROOT_CLUS + 4],
            layout.root_cluster as u64,
        );
        write_uint(
            &mut sector[BPB_FS_INFO..BPB_FS_INFO + 2],
            FAT32_FSINFO_SECTOR,
        );
        write_uint(
            &mut sector[BPB_BK_BOOT_SEC..BPB_BK_BOOT_SEC + 2],
            FAT32_BACKUP_BOOT_SECTOR,
        );
        sector[BPB_RESERVED..BPB_RESERVED + 11].fill(0);
        EXT_BPB_FAT32
    } else {
        EXT_BPB_FAT16
    };

    sector[ext] = if config.partitioned { 0x80 } else { 0x00 };
    sector[ext + 1] = 0;
    sector[ext + 2] = EXT_BOOT_SIGNATURE;
    write_uint(&mut sector[ext + 3..ext + 7], serial as u64);
    write_str(
        &mut sector[ext + 7..ext + 18],
        config.label.as_deref().unwrap_or("NO NAME"),
    );
    write_str(&mut sector[ext + 18..ext + 26], layout.fat_width.name());
}

/// The FAT32 FSInfo sector: free-cluster count and next-free hint.
pub fn build_fsinfo(cluster_count: u64, fat_len: u32) -> [u8; 512] {
    let mut sector = [0u8; 512];
    write_uint(&mut sector[0..4], FSINFO_LEAD_SIGNATURE as u64);
    write_uint(
        &mut sector[FSINFO_STRUC_OFFSET..FSINFO_STRUC_OFFSET + 4],
        FSINFO_STRUC_SIGNATURE as u64,
    );
    write_uint(
        &mut sector[FSINFO_FREE_COUNT_OFFSET..FSINFO_FREE_COUNT_OFFSET + 4],
        cluster_count + 2 - fat_len as u64,
    );
    write_uint(
        &mut sector[FSINFO_NEXT_FREE_OFFSET..FSINFO_NEXT_FREE_OFFSET + 4],
        fat_len as u64 + 2,
    );
    sector[510..512].copy_from_slice(&BOOT_SIGNATURE);
    sector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fsinfo_signatures_and_counters() {
        let sector = build_fsinfo(1000, 10);
        assert_eq!(&sector[0..4], b"RRaA");
        assert_eq!(&sector[484..488], b"rrAa");
        assert_eq!(
            u32::from_le_bytes(sector[488..492].try_into().unwrap()),
            992
        );
        assert_eq!(
            u32::from_le_bytes(sector[492..496].try_into().unwrap()),
            12
        );
        assert_eq!(&sector[510..512], &[0x55, 0xAA]);
    }
}
