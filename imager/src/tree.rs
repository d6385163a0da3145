// In-memory image tree: host ingestion, on-disk directory record layout and
// the data-region write that allocates cluster chains.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::debug;

use fatimage_core::{FatImageError, FatWidth, Result};

use crate::bytes::write_uint;
use crate::constants::*;
use crate::layout::VolumeLayout;
use crate::names::{is_short_name, lfn_checksum, make_short_alias, normalize_83};
use crate::timestamps::DosDateTime;

const COPY_BUFFER_SIZE: usize = 4096;

/// One file or directory inside the image.
#[derive(Debug)]
pub struct FileEntry {
    pub name: String,
    /// Source path on the host; empty for synthesized directories.
    pub host_path: PathBuf,
    pub attrs: u8,
    /// Assigned by the layout pass; 0 means no cluster (empty file, or the
    /// root directory outside the FAT32 data region).
    pub first_cluster: u32,
    pub file_size: u32,
    pub created: SystemTime,
    pub modified: SystemTime,
    pub accessed: SystemTime,
    pub children: Vec<FileEntry>,
    /// Serialized 32-byte records of this directory, rebuilt by every
    /// layout pass.
    dir_bytes: Vec<u8>,
    /// Offset of this entry's short-name record within the parent's
    /// `dir_bytes`, so the parent can patch the first cluster in afterwards.
    dir_entry_offset: usize,
}

impl FileEntry {
    fn new(name: &str, attrs: u8, now: SystemTime) -> Self {
        FileEntry {
            name: name.to_string(),
            host_path: PathBuf::new(),
            attrs,
            first_cluster: 0,
            file_size: 0,
            created: now,
            modified: now,
            accessed: now,
            children: Vec::new(),
            dir_bytes: Vec::new(),
            dir_entry_offset: 0,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.attrs & ATTR_DIRECTORY != 0
    }
}

/// The whole tree, rooted at the image's root directory.
#[derive(Debug)]
pub struct FileTree {
    root: FileEntry,
}

impl Default for FileTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTree {
    pub fn new() -> Self {
        FileTree {
            root: FileEntry::new("", ATTR_DIRECTORY, SystemTime::now()),
        }
    }

    /// Number of 32-byte records currently laid out in the root directory.
    pub fn root_entry_count(&self) -> u64 {
        (self.root.dir_bytes.len() / DIR_ENTRY_SIZE) as u64
    }

    pub fn root_first_cluster(&self) -> u32 {
        self.root.first_cluster
    }

    /// Add one host path under `image_path` (empty = the host basename).
    /// Intermediate directories are created on demand; directories merge
    /// with directories of the same name, any other duplicate is an error.
    pub fn add_file(&mut self, host_path: &Path, image_path: &str, attrs: u8) -> Result<()> {
        let display = host_path.display().to_string();
        let metadata = std::fs::symlink_metadata(host_path)
            .map_err(|e| FatImageError::bad_input(&display, e.to_string()))?;

        let image_path = if image_path.is_empty() {
            host_path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| FatImageError::bad_input(&display, "no usable file name"))?
                .to_string()
        } else {
            image_path.to_string()
        };
        let segments: Vec<&str> = image_path.split('/').filter(|s| !s.is_empty()).collect();
        let (&last, parents) = segments
            .split_last()
            .ok_or_else(|| FatImageError::bad_input(&display, "empty path in image"))?;

        let parent = descend_create(&mut self.root, parents)?;

        let file_type = metadata.file_type();
        if file_type.is_dir() {
            if let Some(existing) = find_child(parent, last) {
                // two directories of the same name merge into one
                if existing.is_directory() {
                    return Ok(());
                }
                return Err(FatImageError::bad_input(
                    &display,
                    format!("'{}' already exists in the image", last),
                ));
            }
            let mut entry = FileEntry::new(last, ATTR_DIRECTORY, SystemTime::now());
            entry.host_path = host_path.to_path_buf();
            apply_host_times(&mut entry, &metadata);
            parent.children.push(entry);
        } else if file_type.is_file() {
            if find_child(parent, last).is_some() {
                return Err(FatImageError::bad_input(
                    &display,
                    format!("'{}' already exists in the image", last),
                ));
            }
            let size = metadata.len();
            if size > u32::MAX as u64 {
                return Err(FatImageError::bad_input(
                    &display,
                    "file is too large for a FAT volume",
                ));
            }
            let mut entry = FileEntry::new(last, attrs & ATTR_FILE_MASK, SystemTime::now());
            entry.host_path = host_path.to_path_buf();
            entry.file_size = size as u32;
            apply_host_times(&mut entry, &metadata);
            parent.children.push(entry);
        } else {
            return Err(FatImageError::bad_input(&display, "cannot add special file"));
        }
        Ok(())
    }

    /// Lay out every directory's on-disk records for the given geometry and
    /// return the number of data clusters the tree occupies. Safe to call
    /// repeatedly; each call rebuilds the records from scratch.
    pub fn build_directories(
        &mut self,
        label: Option<&str>,
        cluster_size: u32,
        fat_width: FatWidth,
    ) -> Result<u64> {
        let mut next_cluster = 2u64;
        layout_directory(
            &mut self.root,
            true,
            0,
            label,
            cluster_size,
            fat_width,
            &mut next_cluster,
        )?;
        Ok(next_cluster - 2)
    }

    /// Emit the data of every directory and file: the resident root region
    /// on FAT12/16, cluster chains for everything else.
    pub fn write(&self, file: &mut File, layout: &VolumeLayout, fat: &mut Vec<u32>) -> Result<()> {
        write_directory(&self.root, true, file, layout, fat)
    }
}

fn find_child<'a>(parent: &'a FileEntry, name: &str) -> Option<&'a FileEntry> {
    parent
        .children
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
}

fn descend_create<'a>(root: &'a mut FileEntry, parents: &[&str]) -> Result<&'a mut FileEntry> {
    let mut node = root;
    for &segment in parents {
        let index = match node
            .children
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(segment))
        {
            Some(i) => {
                if !node.children[i].is_directory() {
                    return Err(FatImageError::bad_input(
                        segment,
                        "path component already exists as a file",
                    ));
                }
                i
            }
            None => {
                node.children
                    .push(FileEntry::new(segment, ATTR_DIRECTORY, SystemTime::now()));
                node.children.len() - 1
            }
        };
        node = &mut node.children[index];
    }
    Ok(node)
}

fn apply_host_times(entry: &mut FileEntry, metadata: &std::fs::Metadata) {
    let modified = metadata.modified().unwrap_or(entry.modified);
    entry.modified = modified;
    entry.accessed = metadata.accessed().unwrap_or(modified);
    // not every filesystem records a birth time
    entry.created = metadata.created().unwrap_or(modified);
}

/// Offsets of the 13 UTF-16 code units inside a 32-byte LFN record.
const LFN_CHAR_OFFSETS: [usize; 13] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];

fn layout_directory(
    dir: &mut FileEntry,
    is_root: bool,
    parent_cluster: u32,
    label: Option<&str>,
    cluster_size: u32,
    fat_width: FatWidth,
    next_cluster: &mut u64,
) -> Result<()> {
    let has_label = is_root && label.is_some_and(|l| !l.is_empty());
    let root_is_resident = is_root && fat_width != FatWidth::Fat32;
    let root_is_empty = is_root && dir.children.is_empty() && !has_label;
    dir.first_cluster = if root_is_resident || root_is_empty {
        0
    } else {
        *next_cluster as u32
    };

    let mut bytes = Vec::new();
    let own_times = DirTimes::of(dir);

    if is_root {
        if let Some(label) = label.filter(|l| !l.is_empty()) {
            let mut name = [b' '; 11];
            let n = label.len().min(11);
            name[..n].copy_from_slice(&label.as_bytes()[..n]);
            emit_record(&mut bytes, &name, 0, ATTR_VOLUME_ID, &own_times, 0, 0);
        }
    } else {
        let mut dot = [b' '; 11];
        dot[0] = b'.';
        emit_record(
            &mut bytes,
            &dot,
            0,
            ATTR_DIRECTORY,
            &own_times,
            dir.first_cluster,
            0,
        );
        dot[1] = b'.';
        emit_record(
            &mut bytes,
            &dot,
            0,
            ATTR_DIRECTORY,
            &own_times,
            parent_cluster,
            0,
        );
    }

    // short names already claimed by children that need no alias
    let mut taken: HashSet<String> = dir
        .children
        .iter()
        .filter(|c| is_short_name(&c.name))
        .map(|c| c.name.to_ascii_uppercase())
        .collect();

    for child in &mut dir.children {
        let short_name = if is_short_name(&child.name) {
            child.name.clone()
        } else {
            let alias = make_short_alias(&child.name, &mut taken)?;
            emit_lfn_records(&mut bytes, &child.name, lfn_checksum(&normalize_83(&alias)))?;
            alias
        };
        let times = DirTimes::of(child);
        let size = if child.is_directory() { 0 } else { child.file_size };
        // the first cluster is patched in after the recursion below
        child.dir_entry_offset = emit_record(
            &mut bytes,
            &normalize_83(&short_name),
            case_flags(&short_name),
            child.attrs,
            &times,
            0,
            size,
        );
    }
    dir.dir_bytes = bytes;

    if dir.first_cluster != 0 {
        *next_cluster += (dir.dir_bytes.len() as u64).div_ceil(cluster_size as u64);
    }

    let parent_for_children = if is_root { 0 } else { dir.first_cluster };
    for child in &mut dir.children {
        if child.is_directory() {
            layout_directory(
                child,
                false,
                parent_for_children,
                None,
                cluster_size,
                fat_width,
                next_cluster,
            )?;
        } else if child.file_size > 0 {
            child.first_cluster = *next_cluster as u32;
            *next_cluster += (child.file_size as u64).div_ceil(cluster_size as u64);
        } else {
            child.first_cluster = 0;
        }
    }

    for child in &dir.children {
        let at = child.dir_entry_offset;
        write_uint(
            &mut dir.dir_bytes[at + 20..at + 22],
            (child.first_cluster >> 16) as u64,
        );
        write_uint(
            &mut dir.dir_bytes[at + 26..at + 28],
            (child.first_cluster & 0xFFFF) as u64,
        );
    }
    Ok(())
}

struct DirTimes {
    created: DosDateTime,
    modified: DosDateTime,
    accessed: DosDateTime,
}

impl DirTimes {
    fn of(entry: &FileEntry) -> Self {
        DirTimes {
            created: DosDateTime::from_system_time(entry.created),
            modified: DosDateTime::from_system_time(entry.modified),
            accessed: DosDateTime::from_system_time(entry.accessed),
        }
    }
}

/// Append one 32-byte short-name record and return its offset.
fn emit_record(
    bytes: &mut Vec<u8>,
    name: &[u8; 11],
    case_flags: u8,
    attrs: u8,
    times: &DirTimes,
    first_cluster: u32,
    file_size: u32,
) -> usize {
    let offset = bytes.len();
    let mut record = [0u8; DIR_ENTRY_SIZE];
    record[..11].copy_from_slice(name);
    record[11] = attrs;
    record[12] = case_flags;
    record[13] = times.created.centiseconds;
    write_uint(&mut record[14..16], times.created.time as u64);
    write_uint(&mut record[16..18], times.created.date as u64);
    write_uint(&mut record[18..20], times.accessed.date as u64);
    write_uint(&mut record[20..22], (first_cluster >> 16) as u64);
    write_uint(&mut record[22..24], times.modified.time as u64);
    write_uint(&mut record[24..26], times.modified.date as u64);
    write_uint(&mut record[26..28], (first_cluster & 0xFFFF) as u64);
    write_uint(&mut record[28..32], file_size as u64);
    bytes.extend_from_slice(&record);
    offset
}

/// Case flags for byte 12 of a short-name record: bit 3 marks a lowercase
/// stem, bit 4 a lowercase extension.
fn case_flags(name: &str) -> u8 {
    let bytes = name.as_bytes();
    let (stem, ext) = match bytes.iter().position(|&b| b == b'.') {
        Some(dot) => (&bytes[..dot], &bytes[dot + 1..]),
        None => (bytes, &bytes[..0]),
    };
    let mut flags = 0;
    if stem.iter().any(u8::is_ascii_lowercase) {
        flags |= 0x08;
    }
    if ext.iter().any(u8::is_ascii_lowercase) {
        flags |= 0x10;
    }
    flags
}

/// Emit the LFN chain for `long_name`, last segment first so a reader
/// scanning backwards from the short-name record sees them in order.
fn emit_lfn_records(bytes: &mut Vec<u8>, long_name: &str, checksum: u8) -> Result<()> {
    let utf16: Vec<u16> = long_name.encode_utf16().collect();
    if utf16.len() > MAX_LFN_UTF16_UNITS {
        return Err(FatImageError::bad_input(
            long_name,
            "name is longer than 255 UTF-16 units",
        ));
    }
    let segments = utf16.len().div_ceil(LFN_CHARS_PER_ENTRY);
    for segment in (0..segments).rev() {
        let mut record = [0u8; DIR_ENTRY_SIZE];
        record[0] = (segment + 1) as u8;
        if segment == segments - 1 {
            record[0] |= LFN_LAST_ENTRY;
        }
        record[11] = ATTR_LONG_NAME;
        record[12] = 0;
        record[13] = checksum;
        // bytes 26..28 stay zero; LFN records carry no cluster
        for (slot, &at) in LFN_CHAR_OFFSETS.iter().enumerate() {
            let index = segment * LFN_CHARS_PER_ENTRY + slot;
            let unit = if index < utf16.len() { utf16[index] } else { 0 };
            write_uint(&mut record[at..at + 2], unit as u64);
        }
        bytes.extend_from_slice(&record);
    }
    Ok(())
}

fn write_directory(
    dir: &FileEntry,
    is_root: bool,
    file: &mut File,
    layout: &VolumeLayout,
    fat: &mut Vec<u32>,
) -> Result<()> {
    if dir.first_cluster == 0 {
        if is_root && !dir.dir_bytes.is_empty() {
            let offset = layout.root_dir_sector * layout.sector_size as u64;
            let capacity =
                (layout.first_data_sector - layout.root_dir_sector) * layout.sector_size as u64;
            assert!(
                dir.dir_bytes.len() as u64 <= capacity,
                "root directory spills into the data region"
            );
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&dir.dir_bytes)?;
        }
    } else {
        debug!(
            "directory '{}' at cluster {} ({} bytes)",
            dir.name,
            dir.first_cluster,
            dir.dir_bytes.len()
        );
        allocate_chain(fat, dir.first_cluster, dir.dir_bytes.len() as u64, layout);
        file.seek(SeekFrom::Start(layout.cluster_offset(dir.first_cluster)))?;
        file.write_all(&dir.dir_bytes)?;
    }

    for child in &dir.children {
        if child.is_directory() {
            write_directory(child, false, file, layout, fat)?;
        } else if child.first_cluster != 0 {
            write_file_data(child, file, layout, fat)?;
        }
    }
    Ok(())
}

fn write_file_data(
    entry: &FileEntry,
    file: &mut File,
    layout: &VolumeLayout,
    fat: &mut Vec<u32>,
) -> Result<()> {
    debug!(
        "file '{}' at cluster {} ({} bytes)",
        entry.name, entry.first_cluster, entry.file_size
    );
    allocate_chain(fat, entry.first_cluster, entry.file_size as u64, layout);
    file.seek(SeekFrom::Start(layout.cluster_offset(entry.first_cluster)))?;

    // One sequential pass over the source; the size recorded at add time is
    // authoritative, so a file that grew is cut short and one that shrank
    // leaves the tail of its last cluster unwritten.
    let mut source = File::open(&entry.host_path)?;
    let mut buffer = [0u8; COPY_BUFFER_SIZE];
    let mut remaining = entry.file_size as u64;
    while remaining > 0 {
        let want = remaining.min(buffer.len() as u64) as usize;
        let got = source.read(&mut buffer[..want])?;
        if got == 0 {
            break;
        }
        file.write_all(&buffer[..got])?;
        remaining -= got as u64;
    }
    Ok(())
}

/// Link `size` bytes worth of clusters starting at `first` into the FAT.
fn allocate_chain(fat: &mut Vec<u32>, first: u32, size: u64, layout: &VolumeLayout) {
    let clusters = size.div_ceil(layout.cluster_size as u64) as u32;
    debug_assert!(clusters > 0, "chains own at least one cluster");
    let end = (first + clusters) as usize;
    if fat.len() < end {
        fat.resize(end, 0);
    }
    for k in 0..clusters - 1 {
        fat[(first + k) as usize] = first + k + 1;
    }
    fat[end - 1] = FAT_END_OF_CHAIN;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree_with(files: &[(&str, &[u8])]) -> (TempDir, FileTree) {
        let dir = TempDir::new().unwrap();
        let mut tree = FileTree::new();
        for &(name, content) in files {
            let path = dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            tree.add_file(&path, name, ATTR_ARCHIVE).unwrap();
        }
        (dir, tree)
    }

    #[test]
    fn duplicate_file_names_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("A.TXT");
        std::fs::write(&path, b"x").unwrap();
        let mut tree = FileTree::new();
        tree.add_file(&path, "", 0).unwrap();
        assert!(tree.add_file(&path, "", 0).is_err());
        // case-insensitive equality
        assert!(tree.add_file(&path, "a.txt", 0).is_err());
    }

    #[test]
    fn directories_merge() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let mut tree = FileTree::new();
        tree.add_file(&sub, "", ATTR_DIRECTORY).unwrap();
        tree.add_file(&sub, "", ATTR_DIRECTORY).unwrap();
        tree.build_directories(None, 512, FatWidth::Fat12).unwrap();
        assert_eq!(tree.root_entry_count(), 1);
    }

    #[test]
    fn intermediate_directories_are_synthesized() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("F.TXT");
        std::fs::write(&path, b"x").unwrap();
        let mut tree = FileTree::new();
        tree.add_file(&path, "a/b/F.TXT", 0).unwrap();
        let used = tree
            .build_directories(None, 512, FatWidth::Fat12)
            .unwrap();
        // a/, a/b/ and one file cluster
        assert_eq!(used, 3);
        let a = &tree.root.children[0];
        assert!(a.is_directory());
        assert_eq!(a.first_cluster, 2);
        let b = &a.children[0];
        assert_eq!(b.first_cluster, 3);
        assert_eq!(b.children[0].first_cluster, 4);
    }

    #[test]
    fn file_attrs_are_masked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("X");
        std::fs::write(&path, b"x").unwrap();
        let mut tree = FileTree::new();
        tree.add_file(&path, "", 0xFF).unwrap();
        assert_eq!(tree.root.children[0].attrs, ATTR_FILE_MASK);
    }

    #[test]
    fn root_label_record_comes_first() {
        let (_dir, mut tree) = tree_with(&[("HELLO.TXT", b"hi")]);
        tree.build_directories(Some("TEST"), 512, FatWidth::Fat12)
            .unwrap();
        let bytes = &tree.root.dir_bytes;
        assert_eq!(&bytes[..11], b"TEST       ");
        assert_eq!(bytes[11], ATTR_VOLUME_ID);
        assert_eq!(&bytes[32..43], b"HELLO   TXT");
    }

    #[test]
    fn dot_entries_point_at_self_and_parent() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("SUB");
        std::fs::create_dir(&sub).unwrap();
        let mut tree = FileTree::new();
        tree.add_file(&sub, "", ATTR_DIRECTORY).unwrap();
        tree.build_directories(None, 512, FatWidth::Fat12).unwrap();

        let entry = &tree.root.children[0];
        assert_eq!(entry.first_cluster, 2);
        let bytes = &entry.dir_bytes;
        assert_eq!(&bytes[..11], b".          ");
        assert_eq!(bytes[11], ATTR_DIRECTORY);
        assert_eq!(u16::from_le_bytes([bytes[26], bytes[27]]), 2);
        assert_eq!(&bytes[32..43], b"..         ");
        assert_eq!(u16::from_le_bytes([bytes[58], bytes[59]]), 0);
    }

    #[test]
    fn lowercase_short_names_use_case_flags() {
        let (_dir, mut tree) = tree_with(&[("hello.TXT", b"hi")]);
        tree.build_directories(None, 512, FatWidth::Fat12).unwrap();
        let bytes = &tree.root.dir_bytes;
        // stored uppercase, one record only, stem flagged lowercase
        assert_eq!(tree.root_entry_count(), 1);
        assert_eq!(&bytes[..11], b"HELLO   TXT");
        assert_eq!(bytes[12], 0x08);
    }

    #[test]
    fn long_names_get_reversed_lfn_chain() {
        let (_dir, mut tree) = tree_with(&[("my long report.txt", b"hi")]);
        tree.build_directories(None, 512, FatWidth::Fat12).unwrap();
        let bytes = &tree.root.dir_bytes;
        assert_eq!(tree.root_entry_count(), 3);
        assert_eq!(bytes[0], 0x42);
        assert_eq!(bytes[11], ATTR_LONG_NAME);
        assert_eq!(bytes[32], 0x01);
        assert_eq!(bytes[32 + 11], ATTR_LONG_NAME);
        assert_eq!(&bytes[64..75], b"MYLONG~1TXT");

        let checksum = crate::names::short_name_checksum("MYLONG~1.TXT");
        assert_eq!(bytes[13], checksum);
        assert_eq!(bytes[32 + 13], checksum);

        // concatenating the segments in sequence order restores the name
        let mut units = Vec::new();
        for record in [&bytes[32..64], &bytes[..32]] {
            for &at in &LFN_CHAR_OFFSETS {
                units.push(u16::from_le_bytes([record[at], record[at + 1]]));
            }
        }
        while units.last() == Some(&0) {
            units.pop();
        }
        assert_eq!(String::from_utf16(&units).unwrap(), "my long report.txt");
    }

    #[test]
    fn empty_files_get_no_cluster() {
        let (_dir, mut tree) = tree_with(&[("EMPTY.TXT", b""), ("FULL.TXT", b"data")]);
        let used = tree
            .build_directories(None, 512, FatWidth::Fat12)
            .unwrap();
        assert_eq!(used, 1);
        assert_eq!(tree.root.children[0].first_cluster, 0);
        assert_eq!(tree.root.children[1].first_cluster, 2);
    }

    #[test]
    fn fat32_root_lives_in_a_cluster() {
        let (_dir, mut tree) = tree_with(&[("A.TXT", b"x")]);
        let used = tree
            .build_directories(None, 512, FatWidth::Fat32)
            .unwrap();
        assert_eq!(tree.root_first_cluster(), 2);
        assert_eq!(used, 2);
        assert_eq!(tree.root.children[0].first_cluster, 3);
    }

    #[test]
    fn chain_allocation_links_clusters() {
        let layout = VolumeLayout::for_tests(512, 512);
        let mut fat = vec![FAT_END_OF_CHAIN, FAT_END_OF_CHAIN];
        allocate_chain(&mut fat, 2, 1100, &layout);
        assert_eq!(fat.len(), 5);
        assert_eq!(fat[2], 3);
        assert_eq!(fat[3], 4);
        assert_eq!(fat[4], FAT_END_OF_CHAIN);
    }
}
