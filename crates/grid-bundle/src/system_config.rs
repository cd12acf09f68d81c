use std::collections::HashMap;
use std::path::{Path, PathBuf};

use grid_domain::{PortageConfig, RepoConfig, SyncType};
use tracing::debug;

use crate::error::BundleError;

/// Parse the on-disk Portage configuration tree rooted at `root`.
///
/// Recognized inputs, all optional except the root itself: `make.conf`,
/// and `package.use` / `package.accept_keywords` / `package.mask` /
/// `package.unmask`, each of which may be a single file or a directory of
/// fragment files (all fragments are read in directory-listing order and
/// concatenated); and `repos.conf`. Missing files are not errors; a missing
/// root directory is an io error.
pub fn read_system_config(root: &Path) -> Result<PortageConfig, BundleError> {
    if !root.is_dir() {
        return Err(BundleError::Io {
            path: root.display().to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "portage config root not found",
            ),
        });
    }

    let mut config = PortageConfig::default();

    if let Some(content) = read_optional(&root.join("make.conf"))? {
        config.make_conf = parse_make_conf(&content);
    }

    for (key, tokens) in read_atom_tokens_file_or_dir(root, "package.use")? {
        config.package_use.insert(key, tokens);
    }
    for (key, tokens) in read_atom_tokens_file_or_dir(root, "package.accept_keywords")? {
        config.package_keywords.insert(key, tokens);
    }

    config.masked = read_atom_list_file_or_dir(root, "package.mask")?;
    config.unmasked = read_atom_list_file_or_dir(root, "package.unmask")?;

    if let Some(content) = read_optional(&root.join("repos.conf"))? {
        config.repos = parse_repos_conf(&content)?;
    }

    Ok(config)
}

fn read_optional(path: &Path) -> Result<Option<String>, BundleError> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(BundleError::Io {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

/// A `name` input may be `root/name` (a single file) or `root/name/` (a
/// directory of fragments). Returns the concatenated raw text, or `None` if
/// neither exists.
fn read_file_or_dir_fragments(root: &Path, name: &str) -> Result<Option<String>, BundleError> {
    let path = root.join(name);
    if path.is_dir() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&path)
            .map_err(|e| BundleError::Io {
                path: path.display().to_string(),
                source: e,
            })?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        entries.sort();
        let mut combined = String::new();
        for entry in entries {
            debug!(path = %entry.display(), "reading portage config fragment");
            combined.push_str(&std::fs::read_to_string(&entry).map_err(|e| BundleError::Io {
                path: entry.display().to_string(),
                source: e,
            })?);
            combined.push('\n');
        }
        Ok(Some(combined))
    } else {
        read_optional(&path)
    }
}

/// Parse a `package.use`/`package.accept_keywords`-shaped file: lines of
/// `ATOM tokens…`, one atom per non-blank, non-comment line. Returns an
/// ordered map from atom to its ordered tokens (later lines for the same
/// atom append, since repeats carry override semantics per spec.md §9).
fn read_atom_tokens_file_or_dir(
    root: &Path,
    name: &str,
) -> Result<Vec<(String, Vec<String>)>, BundleError> {
    let Some(content) = read_file_or_dir_fragments(root, name)? else {
        return Ok(Vec::new());
    };
    let mut order: Vec<String> = Vec::new();
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let Some(atom) = parts.next() else { continue };
        let tokens: Vec<String> = parts.map(|s| s.to_string()).collect();
        if !map.contains_key(atom) {
            order.push(atom.to_string());
        }
        map.entry(atom.to_string()).or_default().extend(tokens);
    }
    Ok(order
        .into_iter()
        .map(|atom| {
            let tokens = map.remove(&atom).unwrap_or_default();
            (atom, tokens)
        })
        .collect())
}

/// Parse a `package.mask`/`package.unmask`-shaped file: one atom per
/// non-blank, non-comment line, order preserved, duplicates preserved.
fn read_atom_list_file_or_dir(root: &Path, name: &str) -> Result<Vec<String>, BundleError> {
    let Some(content) = read_file_or_dir_fragments(root, name)? else {
        return Ok(Vec::new());
    };
    Ok(content
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.to_string())
        .collect())
}

/// Parse `make.conf`'s shell-style `KEY=VALUE` lines. Surrounding single or
/// double quotes are stripped; no shell expansion or word-splitting is
/// performed beyond that.
fn parse_make_conf(content: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, raw_value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        out.insert(key.to_string(), strip_quotes(raw_value.trim()));
    }
    out
}

fn strip_quotes(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2
        && ((bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\''))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

/// Parse `repos.conf`'s INI sections: `[name]` followed by `key = value`
/// lines. Each section becomes one [`RepoConfig`].
fn parse_repos_conf(content: &str) -> Result<Vec<RepoConfig>, BundleError> {
    let mut repos = Vec::new();
    let mut current_name: Option<String> = None;
    let mut fields: HashMap<String, String> = HashMap::new();

    let flush = |name: &Option<String>, fields: &HashMap<String, String>, out: &mut Vec<RepoConfig>| -> Result<(), BundleError> {
        let Some(name) = name else { return Ok(()) };
        if name.eq_ignore_ascii_case("DEFAULT") {
            return Ok(());
        }
        let location = fields.get("location").cloned().unwrap_or_default();
        let sync_type = match fields.get("sync-type").map(|s| s.as_str()) {
            Some("git") | None => SyncType::Git,
            Some("rsync") => SyncType::Rsync,
            Some("local") => SyncType::Local,
            Some(other) => {
                return Err(BundleError::MalformedArchive(format!(
                    "unknown sync-type '{}' for repo '{}'",
                    other, name
                )))
            }
        };
        let sync_uri = fields.get("sync-uri").cloned();
        let priority = fields
            .get("priority")
            .map(|s| s.parse::<i64>())
            .transpose()
            .map_err(|_| {
                BundleError::MalformedArchive(format!("non-integer priority for repo '{}'", name))
            })?
            .unwrap_or(0);
        out.push(RepoConfig {
            name: name.clone(),
            location,
            sync_type,
            sync_uri,
            priority,
        });
        Ok(())
    };

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            flush(&current_name, &fields, &mut repos)?;
            current_name = Some(line[1..line.len() - 1].trim().to_string());
            fields = HashMap::new();
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            fields.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    flush(&current_name, &fields, &mut repos)?;

    Ok(repos)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn missing_root_is_io_error() {
        let err = read_system_config(Path::new("/no/such/portage/root")).unwrap_err();
        assert!(matches!(err, BundleError::Io { .. }));
    }

    #[test]
    fn missing_files_are_not_errors() {
        let dir = tempfile::tempdir().unwrap();
        let config = read_system_config(dir.path()).unwrap();
        assert!(config.make_conf.is_empty());
        assert!(config.repos.is_empty());
    }

    #[test]
    fn parses_make_conf_with_quotes() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "make.conf",
            "CFLAGS=\"-O2 -pipe\"\nMAKEOPTS='-j8'\n# comment\nFEATURES=parallel-fetch\n",
        );
        let config = read_system_config(dir.path()).unwrap();
        assert_eq!(config.make_conf.get("CFLAGS").unwrap(), "-O2 -pipe");
        assert_eq!(config.make_conf.get("MAKEOPTS").unwrap(), "-j8");
        assert_eq!(config.make_conf.get("FEATURES").unwrap(), "parallel-fetch");
    }

    #[test]
    fn parses_package_use_as_single_file() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "package.use",
            "dev-lang/python ssl threads\nmedia-libs/libpng -doc\n",
        );
        let config = read_system_config(dir.path()).unwrap();
        assert_eq!(
            config.package_use.get("dev-lang/python").unwrap(),
            &vec!["ssl".to_string(), "threads".to_string()]
        );
    }

    #[test]
    fn parses_package_use_as_directory_of_fragments() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "package.use/10-base", "dev-lang/python ssl\n");
        write(dir.path(), "package.use/20-extra", "dev-lang/python threads\n");
        let config = read_system_config(dir.path()).unwrap();
        assert_eq!(
            config.package_use.get("dev-lang/python").unwrap(),
            &vec!["ssl".to_string(), "threads".to_string()]
        );
    }

    #[test]
    fn parses_repos_conf_sections() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "repos.conf",
            "[DEFAULT]\nmain-repo = gentoo\n\n[gentoo]\nlocation = /var/db/repos/gentoo\nsync-type = rsync\nsync-uri = rsync://rsync.gentoo.org/gentoo-portage\npriority = 10\n",
        );
        let config = read_system_config(dir.path()).unwrap();
        assert_eq!(config.repos.len(), 1);
        assert_eq!(config.repos[0].name, "gentoo");
        assert_eq!(config.repos[0].sync_type, SyncType::Rsync);
        assert_eq!(config.repos[0].priority, 10);
    }

    #[test]
    fn rejects_non_integer_priority() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "repos.conf",
            "[gentoo]\nlocation = /x\npriority = not-a-number\n",
        );
        assert!(read_system_config(dir.path()).is_err());
    }
}
