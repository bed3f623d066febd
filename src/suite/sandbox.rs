//! Sandbox materialization
//!
//! Puts everything chef-solo and busser need into a suite's container:
//! vendored cookbooks, chef repository directories, the data bag secret,
//! generated `solo.rb`/`first-boot.json`, and integration tests.

use super::{Suite, BUSSER_DIR, CHEF_CONFIG_DIR, CHEF_RUN_DIR};
use crate::error::{NavoError, NavoResult};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::Level;

/// Chef repository directories copied when present
const CHEF_DIRECTORIES: [&str; 3] = ["data_bags", "environments", "roles"];

pub(super) async fn update_chef_config(suite: &Suite, attributes: &Value) -> NavoResult<()> {
    suite
        .exec_checked(&["mkdir", "-p", CHEF_CONFIG_DIR, CHEF_RUN_DIR], Level::DEBUG)
        .await?;

    install_cookbooks(suite).await?;
    install_chef_directories(suite).await?;
    install_chef_config(suite, attributes).await
}

/// Copy the suite's integration tests into busser's suites directory.
///
/// Returns `false` when the suite has no tests.
pub(super) async fn update_test_config(suite: &Suite) -> NavoResult<bool> {
    let test_dir = suite.ctx.project.repo_root.join("test").join("integration");
    let suite_dir = test_dir.join(&suite.name);

    // serverspec, bats, ...
    let frameworks = subdirectories(&suite_dir).await?;
    if frameworks.is_empty() {
        return Ok(false);
    }

    let suites_dir = format!("{}/suites", BUSSER_DIR);
    suite
        .exec_checked(&["mkdir", "-p", suites_dir.as_str()], Level::DEBUG)
        .await?;

    for framework in frameworks {
        let container_dir = format!("{}/{}", suites_dir, framework);
        suite
            .exec_checked(&["rm", "-rf", container_dir.as_str()], Level::DEBUG)
            .await?;
        suite
            .exec_checked(&["mkdir", "-p", container_dir.as_str()], Level::DEBUG)
            .await?;

        // Busser expects helpers next to the specs themselves
        let helpers = test_dir.join("helpers").join(&framework);
        if is_dir(&helpers).await {
            suite
                .log
                .info(format!("Transferring {} test suite helpers...", framework));
            suite.copy(&helpers.join("."), &container_dir).await?;
        }

        suite.log.info(format!("Transferring {} tests...", framework));
        suite
            .copy(&suite_dir.join(&framework).join("."), &container_dir)
            .await?;
    }

    Ok(true)
}

async fn install_cookbooks(suite: &Suite) -> NavoResult<()> {
    let project = &suite.ctx.project;
    let berksfile = project.resolve(&project.config.chef.berksfile);
    if fs::metadata(&berksfile).await.is_err() {
        suite.log.warn(format!(
            "No Berksfile at {}; skipping cookbook resolution",
            berksfile.display()
        ));
        return Ok(());
    }

    let vendored = suite.ctx.dependencies.prepare(&suite.log).await?;
    let destination = format!("{}/cookbooks", CHEF_RUN_DIR);
    if suite.copy_if_changed(&vendored, &destination, true).await? {
        suite.log.info("Transferred cookbooks");
    }
    Ok(())
}

async fn install_chef_directories(suite: &Suite) -> NavoResult<()> {
    for dir in CHEF_DIRECTORIES {
        let host_dir = suite.ctx.project.repo_root.join(dir);
        if !is_dir(&host_dir).await {
            suite.log.debug(format!("No {} directory; skipping", dir));
            continue;
        }

        suite.log.info(format!("Preparing {} directory...", dir));
        let container_dir = format!("{}/{}", CHEF_RUN_DIR, dir);
        suite.copy_if_changed(&host_dir, &container_dir, true).await?;
    }
    Ok(())
}

async fn install_chef_config(suite: &Suite, attributes: &Value) -> NavoResult<()> {
    let chef = &suite.ctx.project.config.chef;
    if let Some(secret) = &chef.secret {
        let secret = suite.ctx.project.resolve(secret);
        if fs::metadata(&secret).await.is_err() {
            return Err(NavoError::PathNotFound(secret));
        }
        let destination = format!("{}/encrypted_data_bag_secret", CHEF_CONFIG_DIR);
        suite.copy_if_changed(&secret, &destination, false).await?;
    }

    suite.log.info("Preparing solo.rb");
    suite
        .write(
            &format!("{}/solo.rb", CHEF_CONFIG_DIR),
            &suite.chef_solo_config(),
        )
        .await?;

    suite.log.info("Preparing first-boot.json");
    suite
        .write(
            &format!("{}/first-boot.json", CHEF_CONFIG_DIR),
            &serde_json::to_string_pretty(attributes)?,
        )
        .await
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

/// Names of the directories directly under `dir`, sorted; empty if `dir`
/// does not exist
async fn subdirectories(dir: &Path) -> NavoResult<Vec<String>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(NavoError::io(format!("reading {}", dir.display()), e)),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| NavoError::io(format!("reading {}", dir.display()), e))?
    {
        let path: PathBuf = entry.path();
        if is_dir(&path).await {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    names.sort();
    Ok(names)
}
