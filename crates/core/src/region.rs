//! Persisted region-of-interest for the result table.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logger;
use crate::types::SearchRegion;

#[derive(Debug, Deserialize, Serialize)]
struct RegionFile {
    x: i64,
    y: i64,
    width: i64,
    height: i64,
}

/// Read the region file. Absent, unreadable or invalid content yields
/// `None` (whole-surface search) instead of an error.
pub fn load(path: &Path) -> Option<SearchRegion> {
    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => {
            logger::info(&format!("no result region at {}, searching whole surface", path.display()));
            return None;
        }
    };
    let region = serde_json::from_str::<RegionFile>(&raw)
        .ok()
        .and_then(|f| {
            let field = |v: i64| u32::try_from(v).ok();
            SearchRegion::new(field(f.x)?, field(f.y)?, field(f.width)?, field(f.height)?)
        });
    match region {
        Some(r) => {
            logger::info(&format!(
                "result region loaded: ({}, {}) {}x{}",
                r.x, r.y, r.width, r.height
            ));
            Some(r)
        }
        None => {
            logger::warn(&format!("ignoring malformed result region file {}", path.display()));
            None
        }
    }
}

pub fn save(path: &Path, region: SearchRegion) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::Io {
            context: format!("creating {}", dir.display()),
            source: e,
        })?;
    }
    let body = RegionFile {
        x: region.x as i64,
        y: region.y as i64,
        width: region.width as i64,
        height: region.height as i64,
    };
    let json = serde_json::to_string_pretty(&body).map_err(|e| ConfigError::Malformed {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    std::fs::write(path, json).map_err(|e| ConfigError::Io {
        context: format!("writing {}", path.display()),
        source: e,
    })
}

/// Parse `x,y,w,h` as typed on the command line.
pub fn parse_spec(raw: &str) -> Result<SearchRegion, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid { field: "region", reason: reason.to_string() };
    let parts: Vec<u32> = raw
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid("expected four non-negative integers: x,y,width,height"))?;
    let &[x, y, w, h] = parts.as_slice() else {
        return Err(invalid("expected exactly four values"));
    };
    SearchRegion::new(x, y, w, h)
        .ok_or_else(|| invalid("width and height must be positive and x+width, y+height must fit in u32"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_valid_region() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result_region.json");
        std::fs::write(&path, r#"{"x":100,"y":200,"width":300,"height":50}"#).unwrap();
        assert_eq!(load(&path), SearchRegion::new(100, 200, 300, 50));
    }

    #[test]
    fn zero_width_falls_back_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result_region.json");
        std::fs::write(&path, r#"{"x":100,"y":200,"width":0,"height":50}"#).unwrap();
        assert_eq!(load(&path), None);
    }

    #[test]
    fn negative_or_garbage_falls_back_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result_region.json");
        std::fs::write(&path, r#"{"x":-1,"y":0,"width":10,"height":10}"#).unwrap();
        assert_eq!(load(&path), None);
        std::fs::write(&path, "[1,2").unwrap();
        assert_eq!(load(&path), None);
        assert_eq!(load(&dir.path().join("missing.json")), None);
    }

    #[test]
    fn overflowing_extent_falls_back_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result_region.json");
        std::fs::write(&path, r#"{"x":4294967000,"y":0,"width":1000,"height":50}"#).unwrap();
        assert_eq!(load(&path), None);
        assert!(parse_spec("4294967000,0,1000,50").is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime").join("result_region.json");
        let region = SearchRegion::new(5, 6, 7, 8).unwrap();
        save(&path, region).unwrap();
        assert_eq!(load(&path), Some(region));
    }

    #[test]
    fn parses_cli_spec() {
        assert_eq!(parse_spec("100, 200,300,50").unwrap(), SearchRegion::new(100, 200, 300, 50).unwrap());
        assert!(parse_spec("1,2,3").is_err());
        assert!(parse_spec("1,2,0,4").is_err());
        assert!(parse_spec("a,b,c,d").is_err());
    }
}
