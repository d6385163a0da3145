// Master boot record for partitioned images: one partition record covering
// the whole FAT volume, CHS fields derived from the configured geometry.

use fatimage_core::{FatWidth, ImageConfig};

use crate::bytes::write_uint;
use crate::constants::*;
use crate::layout::VolumeLayout;

pub fn build_mbr(config: &ImageConfig, layout: &VolumeLayout) -> [u8; MBR_SIZE] {
    let mut mbr = [0u8; MBR_SIZE];
    let sectors_per_track = config.sectors_per_track.max(1) as u64;
    let num_heads = config.num_heads.max(1) as u64;
    let first_lba = layout.boot_sector;
    let volume_sectors = layout.volume_sectors();

    let entry = &mut mbr[MBR_PARTITION_1..MBR_PARTITION_1 + 16];
    // status stays 0x00; the partition flag lives in the BPB drive number
    entry[0] = 0x00;
    let (head, sector, cylinder) = lba_to_chs(first_lba, sectors_per_track, num_heads);
    entry[1] = head;
    entry[2] = sector;
    entry[3] = cylinder;
    entry[4] = partition_type(layout.fat_width, volume_sectors);
    let (head, sector, cylinder) =
        lba_to_chs(layout.end_of_volume - 1, sectors_per_track, num_heads);
    entry[5] = head;
    entry[6] = sector;
    entry[7] = cylinder;
    write_uint(&mut entry[8..12], first_lba);
    write_uint(&mut entry[12..16], volume_sectors);

    mbr[MBR_SIGNATURE_OFFSET..MBR_SIGNATURE_OFFSET + 2].copy_from_slice(&BOOT_SIGNATURE);
    mbr
}

/// CHS triple for an LBA: 1-based sector with the cylinder's bits 8..9
/// folded into the top of the sector byte.
fn lba_to_chs(lba: u64, sectors_per_track: u64, num_heads: u64) -> (u8, u8, u8) {
    let sector = lba % sectors_per_track + 1;
    let head = (lba / sectors_per_track) % num_heads;
    let cylinder = (lba / sectors_per_track) / num_heads;
    (
        head as u8,
        ((sector & 0x3F) | ((cylinder >> 8) & 0x3) << 6) as u8,
        cylinder as u8,
    )
}

fn partition_type(fat_width: FatWidth, volume_sectors: u64) -> u8 {
    match fat_width {
        FatWidth::Fat12 => PARTITION_TYPE_FAT12,
        FatWidth::Fat16 => {
            if volume_sectors >= 65536 {
                PARTITION_TYPE_FAT16
            } else {
                PARTITION_TYPE_FAT16_SMALL
            }
        }
        FatWidth::Fat32 => PARTITION_TYPE_FAT32_LBA,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chs_encoding() {
        // LBA 63 with 63 sectors/track and 255 heads: head 1, sector 1, cyl 0
        assert_eq!(lba_to_chs(63, 63, 255), (1, 1, 0));
        // the first sector of a track is CHS sector 1
        assert_eq!(lba_to_chs(0, 63, 255), (0, 1, 0));
        // cylinder bits 8..9 land in the top bits of the sector byte
        let (head, sector, cylinder) = lba_to_chs(300 * 63 * 255, 63, 255);
        assert_eq!(head, 0);
        assert_eq!(cylinder, 300u64 as u8);
        assert_eq!(sector, 1 | (((300 >> 8) & 0x3) << 6) as u8);
    }

    #[test]
    fn partition_types_follow_width_and_size() {
        assert_eq!(partition_type(FatWidth::Fat12, 720), 0x01);
        assert_eq!(partition_type(FatWidth::Fat16, 16321), 0x04);
        assert_eq!(partition_type(FatWidth::Fat16, 70000), 0x06);
        assert_eq!(partition_type(FatWidth::Fat32, 1 << 20), 0x0C);
    }
}
