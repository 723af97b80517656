use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// 一時ディレクトリに berth.yaml とプロセスディレクトリを用意する
pub struct TestPanel {
    pub root: TempDir,
}

impl TestPanel {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let panel = Self { root };
        panel.write_config("");
        panel
    }

    /// servers_dir / state_file / leader_lock を一時ディレクトリ内に向けた設定を書く
    pub fn write_config(&self, extra: &str) {
        let root = self.root.path();
        let content = format!(
            "servers_dir: {}\nstate_file: {}\nstart_settle_secs: 1\nleader_lock:\n  path: {}\n{}",
            root.join("servers").display(),
            root.join("state.json").display(),
            root.join("event-listener.lock").display(),
            extra
        );
        fs::write(self.config_path(), content).unwrap();
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.path().join("berth.yaml")
    }

    #[allow(dead_code)]
    pub fn process_dir(&self, name: &str) -> PathBuf {
        self.root.path().join("servers").join(name)
    }

    pub fn config(&self) -> berth_config::PanelConfig {
        berth_config::PanelConfig::from_file(&self.config_path()).unwrap()
    }

    #[allow(dead_code)]
    pub async fn docker_container_exists(&self, name: &str) -> bool {
        let docker = bollard::Docker::connect_with_local_defaults().unwrap();
        docker
            .inspect_container(
                name,
                None::<bollard::query_parameters::InspectContainerOptions>,
            )
            .await
            .is_ok()
    }
}
