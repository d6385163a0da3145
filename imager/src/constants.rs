// FAT on-disk constants shared by the layout and writer passes

// Directory entry attributes
pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;
pub const ATTR_LONG_NAME: u8 = 0x0F; // marks LFN records, never a real entry

/// Attributes a regular file may carry; everything else is stripped.
pub const ATTR_FILE_MASK: u8 = ATTR_READ_ONLY | ATTR_HIDDEN | ATTR_SYSTEM | ATTR_ARCHIVE;

pub const DIR_ENTRY_SIZE: usize = 32;
pub const LFN_CHARS_PER_ENTRY: usize = 13;
pub const LFN_LAST_ENTRY: u8 = 0x40;
pub const MAX_LFN_UTF16_UNITS: usize = 255;

// Cluster-count ceilings per FAT width
pub const MAX_FAT12_CLUSTERS: u64 = 0xFF4;
pub const MAX_FAT16_CLUSTERS: u64 = 0xFFF4;
pub const MAX_FAT32_CLUSTERS: u64 = 0xFFFFFF4;

// FAT entries are kept in 28-bit form and narrowed when packed
pub const FAT_END_OF_CHAIN: u32 = 0x0FFF_FFFF;

pub const MAX_SECTORS_PER_CLUSTER: u32 = 128;

// Boot sector offsets
pub const BS_JMP_BOOT: usize = 0x00;
pub const BS_OEM_NAME: usize = 0x03;
pub const BPB_BYTES_PER_SEC: usize = 0x0B;
pub const BPB_SEC_PER_CLUS: usize = 0x0D;
pub const BPB_RSVD_SEC_CNT: usize = 0x0E;
pub const BPB_NUM_FATS: usize = 0x10;
pub const BPB_ROOT_ENT_CNT: usize = 0x11;
pub const BPB_TOT_SEC16: usize = 0x13;
pub const BPB_MEDIA: usize = 0x15;
pub const BPB_FAT_SZ16: usize = 0x16;
pub const BPB_SEC_PER_TRK: usize = 0x18;
pub const BPB_NUM_HEADS: usize = 0x1A;
pub const BPB_HIDD_SEC: usize = 0x1C;
pub const BPB_TOT_SEC32: usize = 0x20;

// FAT32-specific BPB offsets
pub const BPB_FAT_SZ32: usize = 0x24;
pub const BPB_EXT_FLAGS: usize = 0x28;
pub const BPB_ROOT_CLUS: usize = 0x2C;
pub const BPB_FS_INFO: usize = 0x30;
pub const BPB_BK_BOOT_SEC: usize = 0x32;
pub const BPB_RESERVED: usize = 0x34;

// Extended BPB (drive number, boot signature, serial, label, fs type)
pub const EXT_BPB_FAT16: usize = 0x24;
pub const EXT_BPB_FAT32: usize = 0x40;
pub const EXT_BOOT_SIGNATURE: u8 = 0x29;

pub const BOOT_STUB_LOOP: usize = 0x5A;
pub const BOOT_SIGNATURE_OFFSET: usize = 0x1FE;
pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

// FSInfo sector (FAT32)
pub const FSINFO_LEAD_SIGNATURE: u32 = 0x4161_5252; // "RRaA"
pub const FSINFO_STRUC_SIGNATURE: u32 = 0x6141_7272; // "rrAa"
pub const FSINFO_STRUC_OFFSET: usize = 484;
pub const FSINFO_FREE_COUNT_OFFSET: usize = 488;
pub const FSINFO_NEXT_FREE_OFFSET: usize = 492;
pub const FAT32_FSINFO_SECTOR: u64 = 1;
pub const FAT32_BACKUP_BOOT_SECTOR: u64 = 6;
pub const FAT32_BACKUP_FSINFO_SECTOR: u64 = 7;

// Master boot record
pub const MBR_SIZE: usize = 512;
pub const MBR_PARTITION_1: usize = 0x1BE;
pub const MBR_SIGNATURE_OFFSET: usize = 510;
pub const PARTITION_TYPE_FAT12: u8 = 0x01;
pub const PARTITION_TYPE_FAT16_SMALL: u8 = 0x04; // under 65536 sectors
pub const PARTITION_TYPE_FAT16: u8 = 0x06;
pub const PARTITION_TYPE_FAT32_LBA: u8 = 0x0C;
