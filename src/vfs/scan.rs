//! Source discovery: walks the install and mod trees and indexes every
//! file, including the members of content zips.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use super::{Backing, FileEntry, FileIndex, SourceTier};

/// Content zips in the install tree sit a few directories deep at most;
/// user mod folders are searched without a limit.
const GAME_ZIP_MAX_DEPTH: usize = 6;

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub game_root: Option<PathBuf>,
    pub user_dir: Option<PathBuf>,
    pub cache_root: PathBuf,
}

/// Builds the global file index in priority order: unpacked user mods,
/// user mod zips, the install dir, then install zips.
pub fn scan(options: &ScanOptions) -> FileIndex {
    let mut index = FileIndex::new(options.cache_root.clone());

    if let Some(user) = &options.user_dir {
        let mods = user.join("current").join("mods");
        let unpacked = mods.join("unpacked");
        for mod_dir in subdirs(&unpacked) {
            let source = mod_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            walk_dir(&mut index, &mod_dir, SourceTier::UserUnpacked, &source);
        }
        for zip_path in collect_zips(&mods, None) {
            index_zip(&mut index, &zip_path, SourceTier::UserZip);
        }
    }

    if let Some(game) = &options.game_root {
        walk_dir(&mut index, game, SourceTier::GameDir, &game.to_string_lossy());
        for zip_path in collect_zips(game, Some(GAME_ZIP_MAX_DEPTH)) {
            index_zip(&mut index, &zip_path, SourceTier::GameZip);
        }
    }

    log::info!(
        "indexed {} files ({} from zips, {} on disk)",
        index.total_files(),
        index.zip_count(),
        index.dir_count()
    );
    index
}

fn subdirs(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect()
}

fn walk_dir(index: &mut FileIndex, base: &Path, tier: SourceTier, source_name: &str) {
    let mut stack = vec![base.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            log::warn!("cannot read directory {}", dir.display());
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(rel) = path.strip_prefix(base) {
                index.add(FileEntry {
                    virtual_path: super::virt_norm(&rel.to_string_lossy()),
                    tier,
                    source_name: source_name.to_string(),
                    backing: Backing::Dir {
                        abs_path: path.clone(),
                    },
                });
            }
        }
    }
}

fn collect_zips(root: &Path, max_depth: Option<usize>) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![(root.to_path_buf(), 0usize)];
    while let Some((dir, depth)) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if max_depth.is_none_or(|max| depth < max) {
                    stack.push((path, depth + 1));
                }
            } else if path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
            {
                out.push(path);
            }
        }
    }
    out.sort();
    out
}

/// Indexes every member of a zip under its stored path.  Unreadable
/// archives are skipped rather than failing the whole scan.
fn index_zip(index: &mut FileIndex, zip_path: &Path, tier: SourceTier) {
    let file = match File::open(zip_path) {
        Ok(f) => f,
        Err(err) => {
            log::warn!("cannot open {}: {err}", zip_path.display());
            return;
        }
    };
    let mut archive = match zip::ZipArchive::new(file) {
        Ok(a) => a,
        Err(err) => {
            log::warn!("cannot read zip {}: {err}", zip_path.display());
            return;
        }
    };
    let source = zip_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    for i in 0..archive.len() {
        let Ok(member) = archive.by_index(i) else {
            continue;
        };
        if member.is_dir() || member.name().ends_with('/') {
            continue;
        }
        let name = member.name().to_string();
        index.add(FileEntry {
            virtual_path: super::virt_norm(&name),
            tier,
            source_name: source.clone(),
            backing: Backing::Zip {
                zip_path: zip_path.to_path_buf(),
                member: name,
            },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn write_zip(path: &Path, members: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, body) in members {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn user_mods_shadow_game_files() {
        let root = tempfile::tempdir().unwrap();
        let game = root.path().join("game");
        let user = root.path().join("user");

        let game_file = game.join("levels/gridmap/info.json");
        fs::create_dir_all(game_file.parent().unwrap()).unwrap();
        fs::write(&game_file, r#"{"title": "Stock"}"#).unwrap();

        let mod_file = user.join("current/mods/unpacked/mymod/levels/gridmap/info.json");
        fs::create_dir_all(mod_file.parent().unwrap()).unwrap();
        fs::write(&mod_file, r#"{"title": "Modded"}"#).unwrap();

        let index = scan(&ScanOptions {
            game_root: Some(game),
            user_dir: Some(user),
            cache_root: root.path().join("cache"),
        });
        let best = index.find("levels/gridmap/info.json").unwrap();
        assert_eq!(best.tier, SourceTier::UserUnpacked);
        assert_eq!(index.candidates("levels/gridmap/info.json").len(), 2);
    }

    #[test]
    fn zip_members_are_indexed_and_readable() {
        let root = tempfile::tempdir().unwrap();
        let game = root.path().join("game");
        fs::create_dir_all(&game).unwrap();
        write_zip(
            &game.join("content.zip"),
            &[("levels/small/items.json", "{\"a\": 1}")],
        );

        let index = scan(&ScanOptions {
            game_root: Some(game),
            user_dir: None,
            cache_root: root.path().join("cache"),
        });
        let entry = index.find("levels/small/items.json").unwrap();
        assert_eq!(entry.tier, SourceTier::GameZip);
        assert_eq!(index.read(entry).unwrap(), b"{\"a\": 1}");

        let local = index.materialize(entry).unwrap();
        assert!(local.exists());
        // Second call reuses the cached copy.
        assert_eq!(index.materialize(entry).unwrap(), local);
    }

    #[test]
    fn zip_collection_respects_depth_limit() {
        let root = tempfile::tempdir().unwrap();
        let deep = root.path().join("a/b/c");
        fs::create_dir_all(&deep).unwrap();
        write_zip(&deep.join("deep.zip"), &[("x.txt", "x")]);
        write_zip(&root.path().join("top.zip"), &[("y.txt", "y")]);

        let all = collect_zips(root.path(), None);
        assert_eq!(all.len(), 2);
        let shallow = collect_zips(root.path(), Some(1));
        assert_eq!(shallow.len(), 1);
        assert!(shallow[0].ends_with("top.zip"));
    }
}
