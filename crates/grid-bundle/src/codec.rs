use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use grid_domain::Bundle;

use crate::error::BundleError;

/// Fixed path of the single JSON entry inside a bundle archive.
const ENTRY_NAME: &str = "bundle.json";

/// Serialize `bundle` to its canonical archive form: a gzip-compressed tar
/// stream containing exactly one entry, `bundle.json`.
pub fn encode(bundle: &Bundle) -> Result<Vec<u8>, BundleError> {
    bundle.validate()?;

    let json = serde_json::to_vec(bundle)?;

    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(json.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, ENTRY_NAME, json.as_slice())
        .map_err(|e| BundleError::MalformedArchive(e.to_string()))?;
    let tar_bytes = builder
        .into_inner()
        .map_err(|e| BundleError::MalformedArchive(e.to_string()))?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&tar_bytes)
        .map_err(|e| BundleError::MalformedArchive(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| BundleError::MalformedArchive(e.to_string()))
}

/// Parse an archive produced by [`encode`] (or an equivalent client tool).
///
/// Rejects: malformed gzip/tar framing, a missing or misnamed entry,
/// malformed JSON, unknown JSON fields, invalid atom syntax (surfaced via
/// [`grid_domain::Bundle::validate`]), and an empty package list.
pub fn decode(bytes: &[u8]) -> Result<Bundle, BundleError> {
    let decoder = GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);

    let mut found: Option<Vec<u8>> = None;
    let entries = archive
        .entries()
        .map_err(|e| BundleError::MalformedArchive(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| BundleError::MalformedArchive(e.to_string()))?;
        let path = entry
            .path()
            .map_err(|e| BundleError::MalformedArchive(e.to_string()))?
            .to_path_buf();
        if path.as_os_str() == ENTRY_NAME {
            let mut buf = Vec::new();
            entry
                .read_to_end(&mut buf)
                .map_err(|e| BundleError::MalformedArchive(e.to_string()))?;
            found = Some(buf);
            break;
        }
    }

    let json = found.ok_or_else(|| {
        BundleError::MalformedArchive(format!("archive missing entry '{}'", ENTRY_NAME))
    })?;

    let bundle: Bundle = serde_json::from_slice(&json)?;
    bundle.validate()?;
    Ok(bundle)
}

/// Write `bundle`'s encoded archive form to `path`. The caller is expected to
/// use a `.tar.gz` suffix per spec.md §6, but this function does not enforce it.
pub fn write_to_path(bundle: &Bundle, path: &std::path::Path) -> Result<(), BundleError> {
    let bytes = encode(bundle)?;
    std::fs::write(path, bytes).map_err(|e| BundleError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

pub fn read_from_path(path: &std::path::Path) -> Result<Bundle, BundleError> {
    let bytes = std::fs::read(path).map_err(|e| BundleError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    decode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use grid_domain::{Atom, BundleMetadata, PackageSpec, PortageConfig};

    fn sample_bundle() -> Bundle {
        Bundle {
            config: PortageConfig::default(),
            packages: vec![PackageSpec::new(Atom::parse("dev-lang/python").unwrap())],
            metadata: BundleMetadata {
                user_id: "alice".into(),
                target_arch: "amd64".into(),
                profile: "default/linux/amd64/23.0".into(),
                created_at: Utc::now(),
                description: "test build".into(),
            },
        }
    }

    #[test]
    fn round_trips() {
        let bundle = sample_bundle();
        let bytes = encode(&bundle).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.packages.len(), bundle.packages.len());
        assert_eq!(decoded.metadata.user_id, bundle.metadata.user_id);
    }

    #[test]
    fn rejects_empty_package_list() {
        let mut bundle = sample_bundle();
        bundle.packages.clear();
        assert!(encode(&bundle).is_err());
    }

    #[test]
    fn rejects_garbage_bytes() {
        assert!(decode(b"not a gzip stream").is_err());
    }

    #[test]
    fn rejects_unknown_json_field() {
        let bundle = sample_bundle();
        let mut value = serde_json::to_value(&bundle).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("surprise_field".into(), serde_json::json!(true));
        let json = serde_json::to_vec(&value).unwrap();

        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(json.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "bundle.json", json.as_slice())
            .unwrap();
        let tar_bytes = builder.into_inner().unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        let bytes = encoder.finish().unwrap();

        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn write_and_read_path_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.tar.gz");
        let bundle = sample_bundle();
        write_to_path(&bundle, &path).unwrap();
        let decoded = read_from_path(&path).unwrap();
        assert_eq!(decoded.metadata.user_id, bundle.metadata.user_id);
    }
}
