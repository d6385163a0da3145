// Host filesystem enumeration feeding the image tree.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use fatimage_imager::constants::{ATTR_ARCHIVE, ATTR_DIRECTORY};
use fatimage_imager::FileTree;

/// Add one host path under `image_path`; an empty `image_path` names the
/// entry after the host basename. Directories are walked recursively in
/// name order so repeated runs produce identical images.
pub fn add_path(tree: &mut FileTree, host: &Path, image_path: &str) -> Result<()> {
    let metadata = std::fs::symlink_metadata(host)
        .with_context(|| format!("cannot read {}", host.display()))?;

    if !metadata.file_type().is_dir() {
        // regular files get the archive bit, as DOS would set on creation;
        // special files are rejected by the tree itself
        tree.add_file(host, image_path, ATTR_ARCHIVE)?;
        return Ok(());
    }

    tree.add_file(host, image_path, ATTR_DIRECTORY)?;
    let image_name = if image_path.is_empty() {
        host.file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("{}: no usable directory name", host.display()))?
            .to_string()
    } else {
        image_path.to_string()
    };

    let mut entries: Vec<_> = std::fs::read_dir(host)
        .with_context(|| format!("cannot list {}", host.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("cannot list {}", host.display()))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry
            .file_name()
            .into_string()
            .map_err(|_| anyhow!("non-Unicode file name under {}", host.display()))?;
        add_path(tree, &entry.path(), &format!("{}/{}", image_name, name))?;
    }
    Ok(())
}
