use crate::{chains::ChainKey, config::BurrowConfig, fsutil, paths::BurrowPaths};
use eyre::Context as _;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

/// Environment overrides applied on every load; never written back to disk.
fn apply_env_overrides(cfg: &mut BurrowConfig, var: impl Fn(&str) -> Option<String>) {
    let apply_env = |name: &str, setter: &mut dyn FnMut(&str)| {
        if let Some(v) = var(name) {
            let t = v.trim();
            if !t.is_empty() {
                setter(t);
            }
        }
    };

    for chain in ChainKey::ALL {
        apply_env(&chain.rpc_env_var(), &mut |v| {
            cfg.rpc.urls.insert(chain.as_str().to_owned(), v.to_owned());
        });
    }
    apply_env("BURROW_ONRAMP_BASE_URL", &mut |v| {
        v.clone_into(&mut cfg.onramp.base_url);
    });
}

impl ConfigStore {
    pub fn new(paths: &BurrowPaths) -> Self {
        Self {
            path: paths.config_file(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Read `config.toml`, writing the defaults on first run.
    pub fn load_or_init_default(&self) -> eyre::Result<BurrowConfig> {
        let mut cfg = match fsutil::read_private(&self.path)? {
            Some(bytes) => {
                let s = String::from_utf8(bytes).context("config.toml is not utf-8")?;
                toml::from_str(&s).context("parse config.toml")?
            }
            None => {
                let cfg = BurrowConfig::default();
                self.save(&cfg)?;
                cfg
            }
        };
        apply_env_overrides(&mut cfg, |k| std::env::var(k).ok());
        Ok(cfg)
    }

    pub fn save(&self, cfg: &BurrowConfig) -> eyre::Result<()> {
        if let Some(parent) = self.path.parent() {
            fsutil::ensure_private_dir(parent)?;
        }
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        fsutil::write_private_atomic(&self.path, s.as_bytes()).context("write config.toml")
    }
}
