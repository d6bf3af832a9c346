//! Control commands behind the `catlog` binary.
//!
//! Each command opens the directory store named by the configuration, runs
//! against one catalog and closes it again. Output comes back as lines so the
//! binary only has to print them.

use std::sync::Arc;

use clap::Subcommand;
use tracing::info;

use crate::base::{Cookie, LogId};
use crate::config::CatlogConfig;
use crate::env::Env;
use crate::error::{Error, Result};
use crate::llog::{Catalog, Process};
use crate::storage::{DirStore, ObjectStore};

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a new, empty catalog and print its id
    Create,

    /// Append one record and print its cookie
    Append {
        /// Record type
        #[arg(long = "type", default_value_t = 1)]
        rec_type: u32,

        /// Record payload
        payload: String,
    },

    /// Cancel records by cookie (oid:gen:index)
    Cancel {
        #[arg(required = true)]
        cookies: Vec<Cookie>,
    },

    /// Print every live record in replay order
    Replay,

    /// Print slot accounting
    Stat,
}

/// Run one command. Every command except `create` needs the catalog id.
pub fn run(config: &CatlogConfig, catalog: Option<LogId>, command: Command) -> Result<Vec<String>> {
    let store: Arc<dyn ObjectStore> = Arc::new(DirStore::open(
        &config.store.data_dir,
        config.log.sync_writes,
    )?);
    let mut env = Env::new();

    if let Command::Create = command {
        let cat = Catalog::create(store, &config.log, &mut env)?;
        let id = cat.id();
        cat.close()?;
        return Ok(vec![id.to_string()]);
    }

    let id = catalog.ok_or_else(|| Error::Config("--catalog is required for this command".into()))?;
    let cat = Catalog::open(store, id, &config.log, &mut env)?;
    let output = dispatch(&cat, &mut env, command);
    let closed = cat.close();
    let output = output?;
    closed?;
    Ok(output)
}

fn dispatch(cat: &Catalog, env: &mut Env, command: Command) -> Result<Vec<String>> {
    match command {
        Command::Create => Err(Error::InvalidHandle(format!("catalog {} already exists", cat.id()))),
        Command::Append { rec_type, payload } => {
            let cookie = cat.append(env, rec_type, payload.as_bytes())?;
            info!(catalog = %cat.id(), %cookie, "appended record");
            Ok(vec![cookie.to_string()])
        }
        Command::Cancel { cookies } => {
            cat.cancel(env, &cookies)?;
            Ok(vec![format!("canceled {} record(s)", cookies.len())])
        }
        Command::Replay => {
            let mut lines = Vec::new();
            cat.replay(env, |cookie, rec| {
                lines.push(format!(
                    "{} type={:#x} {}",
                    cookie,
                    rec.rec_type(),
                    String::from_utf8_lossy(&rec.payload)
                ));
                Ok(Process::Continue)
            })?;
            Ok(lines)
        }
        Command::Stat => {
            let stat = cat.stat()?;
            Ok(vec![
                format!("catalog:    {}", stat.id),
                format!("capacity:   {}", stat.capacity),
                format!("live logs:  {}", stat.count),
                format!("first live: {}", stat.first_live_index),
                format!("tail:       {}", stat.tail_index),
            ])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogConfig;

    fn config(dir: &std::path::Path) -> CatlogConfig {
        let mut config = CatlogConfig::default();
        config.store.data_dir = dir.to_path_buf();
        config.log = LogConfig::with_geometry(512, 64);
        config.log.sync_writes = false;
        config
    }

    #[test]
    fn test_command_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        let created = run(&config, None, Command::Create).unwrap();
        let id: LogId = created[0].parse().unwrap();

        let append = |payload: &str| {
            let out = run(
                &config,
                Some(id),
                Command::Append {
                    rec_type: 7,
                    payload: payload.to_string(),
                },
            )
            .unwrap();
            out[0].parse::<Cookie>().unwrap()
        };
        let a = append("alpha");
        let b = append("beta");

        let lines = run(&config, Some(id), Command::Replay).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(&a.to_string()));
        assert!(lines[0].ends_with("alpha"));
        assert!(lines[1].ends_with("beta"));

        run(&config, Some(id), Command::Cancel { cookies: vec![a] }).unwrap();
        let lines = run(&config, Some(id), Command::Replay).unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with(&b.to_string()));

        let stat = run(&config, Some(id), Command::Stat).unwrap();
        assert!(stat.iter().any(|l| l == "live logs:  1"));
    }

    #[test]
    fn test_catalog_id_required() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&config(dir.path()), None, Command::Stat).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
