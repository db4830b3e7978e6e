//! tar+gzip packaging of a project directory.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Component, Path, PathBuf},
};

use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use glob::{MatchOptions, Pattern};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::META_DIR;
use crate::error::{CliError, Result};

pub const DIST_DIR: &str = "dist";
pub const DIST_FILE: &str = "bot.tgz";
pub const IGNORE_FILE: &str = ".bothubignore";
const BYTECODE_SUFFIX: &str = ".pyc";
const BYTECODE_CACHE_DIR: &str = "__pycache__";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSummary {
    pub path: PathBuf,
    pub files: usize,
}

/// Patterns read from a project-local ignore file, one glob per line.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    patterns: Vec<Pattern>,
}

impl IgnoreList {
    pub fn parse(source: &str) -> Self {
        let patterns = source
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let line = line.trim_end_matches('/');
                match Pattern::new(line) {
                    Ok(pattern) => Some(pattern),
                    Err(err) => {
                        warn!(pattern = line, %err, "skipping invalid ignore pattern");
                        None
                    }
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| CliError::io(path, err))?;
        Ok(Self::parse(&raw))
    }

    /// A pattern matches the relative path itself or its final component.
    pub fn matches(&self, relative: &Path) -> bool {
        let options = MatchOptions {
            require_literal_separator: true,
            ..MatchOptions::new()
        };
        let name = relative.file_name().map(Path::new);
        self.patterns.iter().any(|pattern| {
            pattern.matches_path_with(relative, options)
                || name.is_some_and(|name| pattern.matches_path_with(name, options))
        })
    }
}

/// Entries that never ship: the metadata and dist directories at the root,
/// compiled bytecode, and anything under a bytecode cache directory.
pub fn is_always_ignored(relative: &Path) -> bool {
    let components: Vec<&str> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    let Some(first) = components.first() else {
        return false;
    };
    if *first == META_DIR || *first == DIST_DIR {
        return true;
    }
    if components.contains(&BYTECODE_CACHE_DIR) {
        return true;
    }
    components
        .last()
        .is_some_and(|name| name.ends_with(BYTECODE_SUFFIX))
}

/// Archive `source_dir` into `destination`, replacing any existing file.
/// `ignore_file` patterns apply on top of the fixed exclusions.
pub fn make_dist_package(
    destination: &Path,
    source_dir: &Path,
    ignore_file: Option<&Path>,
) -> Result<PackageSummary> {
    if destination.is_file() {
        fs::remove_file(destination).map_err(|err| CliError::io(destination, err))?;
    }
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|err| CliError::io(parent, err))?;
    }

    let ignores = match ignore_file {
        Some(path) if path.is_file() => IgnoreList::load(path)?,
        _ => IgnoreList::default(),
    };

    let file = File::create(destination).map_err(|err| CliError::io(destination, err))?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let canonical_destination = destination.canonicalize().ok();
    let mut files = 0usize;
    let walker = WalkDir::new(source_dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let Some(relative) = pathdiff::diff_paths(entry.path(), source_dir) else {
                return false;
            };
            !is_always_ignored(&relative) && !ignores.matches(&relative)
        });

    for entry in walker {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(source_dir).to_path_buf();
            CliError::io(path, err.into())
        })?;
        let path = entry.path();
        if canonical_destination.is_some() && path.canonicalize().ok() == canonical_destination {
            continue;
        }
        let Some(relative) = pathdiff::diff_paths(path, source_dir) else {
            continue;
        };
        if entry.file_type().is_dir() {
            builder
                .append_dir(&relative, path)
                .map_err(|err| CliError::io(path, err))?;
        } else {
            builder
                .append_path_with_name(path, &relative)
                .map_err(|err| CliError::io(path, err))?;
            files += 1;
        }
    }

    let encoder = builder
        .into_inner()
        .map_err(|err| CliError::io(destination, err))?;
    let mut writer = encoder
        .finish()
        .map_err(|err| CliError::io(destination, err))?;
    writer.flush().map_err(|err| CliError::io(destination, err))?;

    info!(
        archive = %destination.display(),
        source = %source_dir.display(),
        files,
        "built dist package"
    );
    Ok(PackageSummary {
        path: destination.to_path_buf(),
        files,
    })
}

/// Unpack every member of `archive_path` into `target_dir`.
pub fn extract_dist_package(archive_path: &Path, target_dir: &Path) -> Result<()> {
    let file = File::open(archive_path).map_err(|err| CliError::io(archive_path, err))?;
    extract_archive(GzDecoder::new(file), archive_path, target_dir)
}

pub fn extract_dist_bytes(bytes: &[u8], target_dir: &Path) -> Result<()> {
    extract_archive(GzDecoder::new(bytes), target_dir, target_dir)
}

fn extract_archive<R: std::io::Read>(reader: R, source: &Path, target_dir: &Path) -> Result<()> {
    fs::create_dir_all(target_dir).map_err(|err| CliError::io(target_dir, err))?;
    let mut archive = tar::Archive::new(reader);
    archive
        .unpack(target_dir)
        .map_err(|err| CliError::io(source, err))?;
    debug!(target = %target_dir.display(), "extracted dist package");
    Ok(())
}

/// Build an archive in memory from `(path, contents)` pairs.
pub fn pack_files(files: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, *contents)
            .map_err(|err| CliError::io(path, err))?;
    }
    let encoder = builder
        .into_inner()
        .map_err(|err| CliError::io("<memory>", err))?;
    encoder
        .finish()
        .map_err(|err| CliError::io("<memory>", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn collect_files(root: &Path) -> BTreeMap<String, Vec<u8>> {
        WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| {
                let relative = pathdiff::diff_paths(entry.path(), root).unwrap();
                (
                    relative.to_string_lossy().replace('\\', "/"),
                    fs::read(entry.path()).unwrap(),
                )
            })
            .collect()
    }

    fn project_fixture(root: &Path) {
        write(root, "bothub/bot.py", "print('hi')\n");
        write(root, "bothub/__init__.py", "");
        write(root, "bothub/__pycache__/bot.cpython-311.pyc", "bytecode");
        write(root, "bothub/stale.pyc", "bytecode");
        write(root, "requirements.txt", "requests\n");
        write(root, "tests/test_bot.py", "def test(): pass\n");
        write(root, ".bothub-meta/project.yml", "id: 3\n");
        write(root, "dist/old.tgz", "old");
        write(root, "notes/draft.md", "draft");
        write(root, "distance.py", "far = 1\n");
        fs::create_dir_all(root.join("assets")).unwrap();
        fs::write(
            root.join("assets/logo.png"),
            [0x89, b'P', b'N', b'G', 0x00, 0xff, 0xfe, 0x80, 0x0d, 0x0a],
        )
        .unwrap();
    }

    #[test]
    fn always_ignored_patterns() {
        assert!(is_always_ignored(Path::new(".bothub-meta/project.yml")));
        assert!(is_always_ignored(Path::new("dist")));
        assert!(is_always_ignored(Path::new("bothub/bot.pyc")));
        assert!(is_always_ignored(Path::new("a/__pycache__/x.py")));
        assert!(!is_always_ignored(Path::new("distance.py")));
        assert!(!is_always_ignored(Path::new("bothub/dist/keep.txt")));
    }

    #[test]
    fn package_then_extract_reproduces_kept_files() {
        let source = tempdir().unwrap();
        project_fixture(source.path());
        let out = tempdir().unwrap();
        let archive = out.path().join("bot.tgz");

        let summary = make_dist_package(&archive, source.path(), None).unwrap();
        assert_eq!(summary.files, 7);

        let target = out.path().join("extracted");
        extract_dist_package(&archive, &target).unwrap();

        let expected: BTreeMap<String, Vec<u8>> = collect_files(source.path())
            .into_iter()
            .filter(|(path, _)| !is_always_ignored(Path::new(path)))
            .collect();
        assert_eq!(collect_files(&target), expected);
        assert!(expected.contains_key("distance.py"));
        assert_eq!(
            expected["assets/logo.png"],
            [0x89, b'P', b'N', b'G', 0x00, 0xff, 0xfe, 0x80, 0x0d, 0x0a]
        );
    }

    #[test]
    fn ignore_file_patterns_are_applied() {
        let source = tempdir().unwrap();
        project_fixture(source.path());
        write(source.path(), IGNORE_FILE, "# local junk\nnotes/\n*.txt\n");
        let archive = source.path().join(DIST_DIR).join(DIST_FILE);

        make_dist_package(
            &archive,
            source.path(),
            Some(&source.path().join(IGNORE_FILE)),
        )
        .unwrap();

        let target = tempdir().unwrap();
        extract_dist_package(&archive, target.path()).unwrap();
        let files = collect_files(target.path());
        assert!(files.contains_key("bothub/bot.py"));
        assert!(files.contains_key(IGNORE_FILE));
        assert!(!files.contains_key("notes/draft.md"));
        assert!(!files.contains_key("requirements.txt"));
        assert!(
            !files
                .keys()
                .any(|path| path == "dist" || path.starts_with("dist/"))
        );
        assert!(files.contains_key("distance.py"));
    }

    #[test]
    fn existing_destination_is_replaced() {
        let source = tempdir().unwrap();
        write(source.path(), "bot.py", "x = 1\n");
        let out = tempdir().unwrap();
        let archive = out.path().join("bot.tgz");
        fs::write(&archive, "not an archive").unwrap();

        make_dist_package(&archive, source.path(), None).unwrap();
        let target = tempdir().unwrap();
        extract_dist_package(&archive, target.path()).unwrap();
        assert_eq!(
            fs::read_to_string(target.path().join("bot.py")).unwrap(),
            "x = 1\n"
        );
    }

    #[test]
    fn in_memory_archive_extracts() {
        let bytes = pack_files(&[("bothub/bot.py", b"echo"), ("requirements.txt", b"")]).unwrap();
        let target = tempdir().unwrap();
        extract_dist_bytes(&bytes, target.path()).unwrap();
        assert_eq!(
            fs::read_to_string(target.path().join("bothub/bot.py")).unwrap(),
            "echo"
        );
    }
}
