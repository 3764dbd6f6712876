#![allow(deprecated)] // Command::cargo_bin

use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub const TWO_ZONES: &str = r#"
project "shop"
region "ap-northeast-1"

network {
    cidr "10.0.0.0/16"
    zone "ap-northeast-1a" {
        public "10.0.1.0/24"
        private "10.0.11.0/24"
    }
    zone "ap-northeast-1c" {
        public "10.0.2.0/24"
        private "10.0.12.0/24"
    }
}

web {
    ports 80
    image "ami-web"
    count 2
    bootstrap "builtin:web"
}

app {
    port 8080
    image "ami-app"
    count 2
    bootstrap "builtin:app"
}

data {
    engine "postgres"
    class "db.t3.micro"
    multi-zone #true
}

stage "dev" {}
"#;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    /// Project with the two-zone topology above
    pub fn two_zones() -> Self {
        let project = Self::new();
        project.write_topology(TWO_ZONES);
        project
    }

    pub fn write_topology(&self, content: &str) {
        fs::write(self.root.path().join("topology.kdl"), content).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    /// `tier` running inside the project, isolated from the caller's environment
    pub fn tier(&self) -> Command {
        let mut cmd = Command::cargo_bin("tier").unwrap();
        cmd.current_dir(self.path())
            .env("TIERFLOW_PROJECT_ROOT", self.path())
            .env("TIERFLOW_CONFIG_PATH", self.path().join("no-config.yaml"))
            .env("NO_COLOR", "1")
            .env_remove("TIERFLOW_STAGE")
            .env_remove("RUST_LOG");
        cmd
    }
}
