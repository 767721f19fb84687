//! Dataset root scanning.

use crate::types::{DatasetError, DatasetResult, PreparedLists, RootKind};
use std::fs;
use std::path::{Path, PathBuf};

pub const BLENDED_DIR: &str = "blended";
pub const TRANSMISSION_DIR: &str = "transmission_layer";
pub const REFLECTION_DIR: &str = "reflection_layer";

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "ppm", "bmp"];

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Scan dataset roots into aligned (input, transmission, reflection) path lists.
///
/// Files are discovered under `transmission_layer/`; the matching `blended/`
/// and `reflection_layer/` paths are derived from the same relative name.
/// Each root must carry the partner directory its kind needs (`reflection_layer/`
/// for synthetic, `blended/` for real); a missing partner file surfaces as a
/// per-sample load failure. Real roots have no reflection ground truth, so
/// their reflection list repeats the transmission paths.
pub fn prepare_data(roots: &[PathBuf], kind: RootKind) -> DatasetResult<PreparedLists> {
    if roots.is_empty() {
        return Err(DatasetError::NoRoots);
    }
    let mut lists = PreparedLists::default();
    for root in roots {
        let t_dir = root.join(TRANSMISSION_DIR);
        if !t_dir.is_dir() {
            return Err(DatasetError::MissingLayout {
                root: root.clone(),
                subdir: TRANSMISSION_DIR,
            });
        }
        let partner = match kind {
            RootKind::Synthetic => REFLECTION_DIR,
            RootKind::Real => BLENDED_DIR,
        };
        if !root.join(partner).is_dir() {
            return Err(DatasetError::MissingLayout {
                root: root.clone(),
                subdir: partner,
            });
        }
        let mut rel_names = Vec::new();
        collect_images(&t_dir, &t_dir, &mut rel_names)?;
        if rel_names.is_empty() {
            return Err(DatasetError::EmptyRoot { root: root.clone() });
        }
        rel_names.sort();

        for rel in rel_names {
            let t_path = t_dir.join(&rel);
            lists.inputs.push(root.join(BLENDED_DIR).join(&rel));
            let r_path = match kind {
                RootKind::Synthetic => root.join(REFLECTION_DIR).join(&rel),
                RootKind::Real => t_path.clone(),
            };
            lists.outputs_t.push(t_path);
            lists.outputs_r.push(r_path);
        }
    }
    Ok(lists)
}

fn collect_images(base: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> DatasetResult<()> {
    let entries = fs::read_dir(dir).map_err(|source| DatasetError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| DatasetError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_images(base, &path, out)?;
        } else if is_image_file(&path) {
            if let Ok(rel) = path.strip_prefix(base) {
                out.push(rel.to_path_buf());
            }
        }
    }
    Ok(())
}
