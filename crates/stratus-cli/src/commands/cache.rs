use super::{json_pretty, load_config, open_cloud, EXIT_SUCCESS};
use console::Style;
use std::path::Path;
use stratus_cache::{ArtifactCache, CacheError, ObjectSource};
use stratus_core::CloudRemoteStore;
use stratus_schema::{CacheKey, LocationKind, OsTarget};

fn cache_err(e: CacheError) -> String {
    format!("cache error: {e}")
}

pub fn list(cache_dir: &Path, json: bool) -> Result<u8, String> {
    let cache = ArtifactCache::open(cache_dir).map_err(cache_err)?;
    let rows = cache.list_entries().map_err(cache_err)?;

    if json {
        let payload: Vec<_> = rows
            .iter()
            .map(|row| {
                serde_json::json!({
                    "bucket": row.bucket,
                    "object": row.object,
                    "locations": row.entry,
                })
            })
            .collect();
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    if rows.is_empty() {
        println!("cache is empty");
        return Ok(EXIT_SUCCESS);
    }
    let dim = Style::new().dim();
    for row in &rows {
        println!("{}/{}", row.bucket, row.object);
        for (kind, location) in row.entry.iter() {
            println!("  {:<7} {}", kind, dim.apply_to(location));
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn fetch(
    cache_dir: &Path,
    object: &str,
    os: &str,
    arch: &str,
    source: Option<&str>,
    remote: Option<&Path>,
    json: bool,
) -> Result<u8, String> {
    let mut cache = ArtifactCache::open(cache_dir).map_err(cache_err)?;
    if let Some(config_path) = remote {
        let config = load_config(config_path)?;
        cache = cache.with_remote(CloudRemoteStore::new(open_cloud(&config)?));
    }

    let target = OsTarget::new(os, arch);
    let source = source.map_or(ObjectSource::Cached, |s| ObjectSource::Url(s.to_owned()));
    let entry = cache
        .retrieve_and_cache_object(object, &target, &source, remote.is_some())
        .map_err(cache_err)?;

    if json {
        println!("{}", json_pretty(&entry)?);
    } else {
        for (kind, location) in entry.iter() {
            println!("{kind}: {location}");
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn forget(
    cache_dir: &Path,
    object: &str,
    os: &str,
    arch: &str,
    kind: LocationKind,
    json: bool,
) -> Result<u8, String> {
    let cache = ArtifactCache::open(cache_dir).map_err(cache_err)?;
    let key = CacheKey::new(object, &OsTarget::new(os, arch));
    let removed = cache.forget(&key, kind).map_err(cache_err)?;

    if json {
        let payload = serde_json::json!({
            "key": key.to_string(),
            "kind": kind,
            "removed": removed,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        match removed {
            Some(location) => println!("forgot {kind} location of {key}: {location}"),
            None => println!("{key} has no {kind} location"),
        }
    }
    Ok(EXIT_SUCCESS)
}
