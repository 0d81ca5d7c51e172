#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

/// A temporary studysync workspace driven through the binary.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create tempdir"),
        }
    }

    /// Workspace with `.studysync/` and a default config in place.
    pub fn initialized() -> Self {
        let ws = Self::new();
        ws.cmd_as("u1").arg("init").assert().success();
        ws
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write_config(&self, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(".studysync.toml");
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Command rooted at this workspace with no viewer.
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("studysync").expect("binary");
        cmd.arg("--root")
            .arg(self.dir.path())
            .env_remove("STUDYSYNC_VIEWER")
            .env_remove("STUDYSYNC_ROOT")
            .env_remove("RUST_LOG");
        cmd
    }

    pub fn cmd_as(&self, viewer: &str) -> Command {
        let mut cmd = self.cmd();
        cmd.env("STUDYSYNC_VIEWER", viewer);
        cmd
    }

    /// Run with `--json` as `viewer` and return the envelope's `data`.
    pub fn json(&self, viewer: &str, args: &[&str]) -> Value {
        let output = self
            .cmd_as(viewer)
            .arg("--json")
            .args(args)
            .output()
            .expect("run studysync");
        assert!(
            output.status.success(),
            "studysync {:?} failed: {}{}",
            args,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let envelope: Value = serde_json::from_slice(&output.stdout).expect("json envelope");
        assert_eq!(envelope["status"], "success");
        envelope["data"].clone()
    }

    pub fn create_course(&self, owner: &str, name: &str) -> String {
        self.json(owner, &["course", "add", name])["id"]
            .as_str()
            .expect("course id")
            .to_string()
    }

    pub fn create_task(&self, viewer: &str, course: &str, title: &str, extra: &[&str]) -> String {
        let mut args = vec!["task", "add", title, "--course", course];
        args.extend_from_slice(extra);
        self.json(viewer, &args)["id"]
            .as_str()
            .expect("task id")
            .to_string()
    }
}

pub fn ids(data: &Value) -> Vec<String> {
    data["tasks"]
        .as_array()
        .expect("tasks array")
        .iter()
        .map(|task| task["id"].as_str().expect("id").to_string())
        .collect()
}
