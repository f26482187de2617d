// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Both extensions a config file may use, tried in this order at a given
/// stem (`config` under a directory, or a dotfile name at the workspace
/// root).
const EXTENSIONS: [&str; 2] = ["yaml", "yml"];

fn with_extensions(stem: &Path) -> impl Iterator<Item = PathBuf> + '_ {
    EXTENSIONS.iter().map(move |ext| stem.with_extension(ext))
}

/// Ordered list of config file locations searched from lowest to highest
/// priority — later entries override earlier ones. Three tiers: system-wide,
/// per-user (XDG), and workspace-local.
fn config_search_paths() -> Vec<PathBuf> {
    let system = Path::new("/etc/kestrel/config").to_path_buf();
    let user = [dirs::home_dir().map(|h| h.join(".config")), dirs::config_dir()]
        .into_iter()
        .flatten()
        .map(|base| base.join("kestrel/config"));
    let workspace = [".kestrel/config", ".kestrel", "kestrel"].into_iter().map(PathBuf::from);

    std::iter::once(system)
        .chain(user)
        .chain(workspace)
        .flat_map(|stem| with_extensions(&stem).collect::<Vec<_>>())
        .collect()
}

/// Read and parse a single YAML layer from disk.
fn read_layer(path: &Path) -> anyhow::Result<serde_yaml::Value> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Load configuration by merging every discovered YAML layer, lowest
/// priority first, then an optional explicit override (e.g. a `--config`
/// CLI flag) on top. Falls back to [`Config::default`] when no layer is
/// found and no explicit path is given.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut layers = config_search_paths()
        .into_iter()
        .filter(|p| p.is_file())
        .map(|p| {
            debug!(path = %p.display(), "loading config layer");
            read_layer(&p)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        layers.push(read_layer(p)?);
    }

    if layers.is_empty() {
        return Ok(Config::default());
    }

    let empty = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
    let merged = layers.into_iter().fold(empty, merge_yaml);
    Ok(serde_yaml::from_value(merged).unwrap_or_default())
}

/// Deep-merge `src` on top of `dst`, returning the result; on any
/// scalar/shape conflict `src`'s value wins. Consumes both sides rather than
/// mutating in place, so a fold over a layer list reads as plain data flow.
fn merge_yaml(dst: serde_yaml::Value, src: serde_yaml::Value) -> serde_yaml::Value {
    match (dst, src) {
        (serde_yaml::Value::Mapping(mut d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let prior = d.remove(&k).unwrap_or(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                d.insert(k, merge_yaml(prior, v));
            }
            serde_yaml::Value::Mapping(d)
        }
        (_, src) => src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
