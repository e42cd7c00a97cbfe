//! Virtual file system over the game install and user mod folders.
//!
//! The game resolves asset paths against an overlay of sources: unpacked
//! user mods, user mod zips, the unpacked install tree, and the install's
//! content zips, in that priority order.  [`FileIndex`] flattens all of
//! them into one case-insensitive map from virtual path to candidates,
//! and follows `.link` indirection files the way the engine does.

mod scan;

pub use scan::{scan, ScanOptions};

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::sjson::{self, Value};

const LINK_MAX_HOPS: usize = 8;

/// Well-known virtual roots.  A relative path that already starts with
/// one of these is taken as-is instead of being anchored to a base dir.
const VIRTUAL_ROOTS: [&str; 5] = ["levels/", "art/", "assets/", "core/", "vehicles/"];

/// Source priority, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SourceTier {
    UserUnpacked,
    UserZip,
    GameDir,
    GameZip,
}

/// Where an indexed file physically lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backing {
    Dir { abs_path: PathBuf },
    Zip { zip_path: PathBuf, member: String },
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Posix-style virtual path in the case it was found.
    pub virtual_path: String,
    pub tier: SourceTier,
    /// Mod folder name, zip file name or install dir.
    pub source_name: String,
    pub backing: Backing,
}

impl FileEntry {
    pub fn is_zip(&self) -> bool {
        matches!(self.backing, Backing::Zip { .. })
    }
}

/// Normalizes a path to a forward-slash virtual path without leading
/// slashes or `./` segments.
pub fn virt_norm(path: &str) -> String {
    let mut s = path.replace('\\', "/");
    while let Some(rest) = s.strip_prefix('/') {
        s = rest.to_string();
    }
    while let Some(rest) = s.strip_prefix("./") {
        s = rest.to_string();
    }
    s
}

fn virt_join(base: &str, rel: &str) -> String {
    let base = base.trim_matches('/');
    let rel = virt_norm(rel);
    if base.is_empty() {
        rel
    } else if rel.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{rel}")
    }
}

fn has_virtual_root(virt: &str) -> bool {
    let lower = virt.to_lowercase();
    VIRTUAL_ROOTS.iter().any(|root| lower.starts_with(root))
}

/// Best-effort text decoding: BOM-aware UTF-8 first, then a Latin-1
/// fallback so legacy Windows exports still parse.
pub fn decode_text(data: &[u8]) -> String {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
    match std::str::from_utf8(data) {
        Ok(text) => text.to_string(),
        Err(_) => data.iter().map(|&b| b as char).collect(),
    }
}

fn hash16(s: &str) -> String {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Case-insensitive index of every file visible to the game, with a
/// per-index extraction cache for zip members.
pub struct FileIndex {
    files: HashMap<String, Vec<FileEntry>>,
    cache_root: PathBuf,
    total_files: usize,
    zip_count: usize,
    dir_count: usize,
}

impl FileIndex {
    pub fn new(cache_root: PathBuf) -> Self {
        Self {
            files: HashMap::new(),
            cache_root,
            total_files: 0,
            zip_count: 0,
            dir_count: 0,
        }
    }

    pub fn total_files(&self) -> usize {
        self.total_files
    }

    pub fn zip_count(&self) -> usize {
        self.zip_count
    }

    pub fn dir_count(&self) -> usize {
        self.dir_count
    }

    /// Inserts an entry unless the same backing is already listed for the
    /// key.  Scan order doubles as priority order within a key.
    pub(crate) fn add(&mut self, entry: FileEntry) {
        let key = entry.virtual_path.to_lowercase();
        let candidates = self.files.entry(key).or_default();
        let duplicate = candidates.iter().any(|e| match (&e.backing, &entry.backing) {
            (
                Backing::Zip {
                    zip_path: za,
                    member: ma,
                },
                Backing::Zip {
                    zip_path: zb,
                    member: mb,
                },
            ) => za == zb && ma.eq_ignore_ascii_case(mb),
            (Backing::Dir { abs_path: a }, Backing::Dir { abs_path: b }) => a == b,
            _ => false,
        });
        if duplicate {
            return;
        }
        if entry.is_zip() {
            self.zip_count += 1;
        } else {
            self.dir_count += 1;
        }
        self.total_files += 1;
        candidates.push(entry);
    }

    /// All candidates for a virtual path, highest priority first.
    pub fn candidates(&self, virtual_path: &str) -> &[FileEntry] {
        let key = virt_norm(virtual_path).to_lowercase();
        self.files.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Best candidate for a virtual path, ignoring `.link` files.
    pub fn find(&self, virtual_path: &str) -> Option<&FileEntry> {
        self.candidates(virtual_path).first()
    }

    /// Virtual paths matching a predicate on the lowercased key.
    pub fn keys_where(&self, mut pred: impl FnMut(&str) -> bool) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .files
            .keys()
            .filter(|k| pred(k))
            .map(String::as_str)
            .collect();
        out.sort_unstable();
        out
    }

    /// Resolves a virtual path, following `.link` JSON indirections.
    ///
    /// A link file is a JSON object with a `path` field.  A target that
    /// starts with `/` restarts from the virtual root; otherwise it is
    /// relative to the link's own directory.  Relative inputs without a
    /// well-known root are anchored at `base_dir` when one is given.
    pub fn resolve(&self, virtual_path: &str, base_dir: Option<&str>) -> Option<&FileEntry> {
        let mut virt = virt_norm(virtual_path);
        if virt.is_empty() {
            return None;
        }
        if let Some(base) = base_dir {
            if !has_virtual_root(&virt) {
                virt = virt_join(base, &virt);
            }
        }

        let mut visited = Vec::new();
        for _ in 0..LINK_MAX_HOPS {
            let key = virt.to_lowercase();
            if visited.contains(&key) {
                break;
            }
            visited.push(key);

            if let Some(entry) = self.find(&virt) {
                return Some(entry);
            }
            let link = self.find(&format!("{virt}.link"))?;
            let target = self.read_link_target(link)?;
            if let Some(rooted) = target.strip_prefix('/') {
                virt = virt_norm(rooted);
            } else {
                let base = match link.virtual_path.rsplit_once('/') {
                    Some((dir, _)) => dir,
                    None => "",
                };
                virt = virt_join(base, &target);
            }
        }
        None
    }

    fn read_link_target(&self, link: &FileEntry) -> Option<String> {
        let data = self.read(link).ok()?;
        let doc = sjson::decode(&decode_text(&data)).ok()?;
        let target = doc.get("path").and_then(Value::as_str)?.trim();
        if target.is_empty() {
            None
        } else {
            Some(target.to_string())
        }
    }

    /// Reads an entry's full contents, from disk or straight out of its
    /// zip.
    pub fn read(&self, entry: &FileEntry) -> Result<Vec<u8>> {
        match &entry.backing {
            Backing::Dir { abs_path } => {
                fs::read(abs_path).with_context(|| format!("reading {}", abs_path.display()))
            }
            Backing::Zip { zip_path, member } => {
                let file = File::open(zip_path)
                    .with_context(|| format!("opening {}", zip_path.display()))?;
                let mut archive = zip::ZipArchive::new(file)
                    .with_context(|| format!("reading zip {}", zip_path.display()))?;
                let mut member_file = archive
                    .by_name(member)
                    .with_context(|| format!("member {member} in {}", zip_path.display()))?;
                let mut data = Vec::with_capacity(member_file.size() as usize);
                member_file.read_to_end(&mut data)?;
                Ok(data)
            }
        }
    }

    /// Reads and resolves in one step, with the same link semantics.
    pub fn read_virtual(&self, virtual_path: &str, base_dir: Option<&str>) -> Result<Vec<u8>> {
        let entry = self
            .resolve(virtual_path, base_dir)
            .ok_or_else(|| anyhow!("file not found: {virtual_path}"))?;
        self.read(entry)
    }

    /// Returns a real filesystem path for an entry, extracting zip
    /// members into the cache on first use.
    pub fn materialize(&self, entry: &FileEntry) -> Result<PathBuf> {
        match &entry.backing {
            Backing::Dir { abs_path } => Ok(abs_path.clone()),
            Backing::Zip { zip_path, member } => {
                let dest = self
                    .cache_root
                    .join("zip")
                    .join(hash16(&zip_path.to_string_lossy()))
                    .join(virt_norm(member));
                if let Ok(meta) = dest.metadata() {
                    if meta.len() > 0 {
                        return Ok(dest);
                    }
                }
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                let data = self.read(entry)?;
                let mut out = File::create(&dest)
                    .with_context(|| format!("creating {}", dest.display()))?;
                out.write_all(&data)?;
                log::debug!("extracted {member} to {}", dest.display());
                Ok(dest)
            }
        }
    }
}
