//! プロセスレジストリ
//!
//! `state.json` にプロセス・Discord連携・サブユーザーを保存する。
//! 変更はすべて「ディスクから再読込 → 複製に適用 → 永続化 → 差し替え」の順で行い、
//! 書き込みに失敗した場合はメモリ上の状態も変更しない。CLI とサーバーのように
//! 別プロセスが同じファイルを共有するため、読み取り時もファイルが更新されていれば
//! 読み直す。

use crate::error::{CoreError, Result};
use crate::model::{DiscordIntegration, Process, SubUser, Viewer, validate_process_name};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};

const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub processes: BTreeMap<String, Process>,
    /// process_name → 連携設定
    #[serde(default)]
    pub integrations: BTreeMap<String, DiscordIntegration>,
    #[serde(default)]
    pub sub_users: Vec<SubUser>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            processes: BTreeMap::new(),
            integrations: BTreeMap::new(),
            sub_users: Vec::new(),
        }
    }
}

impl Registry {
    /// 未使用の最小ポートID（1始まり）
    fn free_port_id(&self) -> u32 {
        let used: BTreeSet<u32> = self.processes.values().map(|p| p.port_id).collect();
        (1..).find(|id| !used.contains(id)).unwrap_or(1)
    }

    fn process_mut(&mut self, name: &str) -> Result<&mut Process> {
        self.processes
            .get_mut(name)
            .ok_or_else(|| CoreError::ProcessNotFound(name.to_string()))
    }
}

/// 最後に読み書きした時点のファイルの更新時刻とサイズ
type FileStamp = (SystemTime, u64);

async fn file_stamp(path: &Path) -> Option<FileStamp> {
    let meta = fs::metadata(path).await.ok().filter(|m| m.is_file())?;
    Some((meta.modified().ok()?, meta.len()))
}

struct Cached {
    registry: Registry,
    stamp: Option<FileStamp>,
}

pub struct ProcessStore {
    path: PathBuf,
    registry: Mutex<Cached>,
}

impl ProcessStore {
    /// 状態ファイルを開く（存在しなければ空のレジストリ）
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let registry = Self::load(&path).await?;
        let stamp = file_stamp(&path).await;
        Ok(Self {
            path,
            registry: Mutex::new(Cached { registry, stamp }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".backup");
        PathBuf::from(name)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    async fn load(path: &Path) -> Result<Registry> {
        if !path.exists() {
            tracing::debug!("State file not found, starting with empty registry");
            return Ok(Registry::default());
        }

        let content = fs::read_to_string(path).await?;
        let registry: Registry = serde_json::from_str(&content)?;

        if registry.version > STATE_VERSION {
            return Err(CoreError::UnsupportedVersion {
                found: registry.version,
                supported: STATE_VERSION,
            });
        }

        tracing::debug!("Loaded registry with {} processes", registry.processes.len());
        Ok(registry)
    }

    async fn persist(&self, registry: &Registry) -> Result<()> {
        let wrap = |source| CoreError::Persist {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await.map_err(wrap)?;
        }

        let content = serde_json::to_string_pretty(registry)?;
        let tmp = self.temp_path();
        fs::write(&tmp, content).await.map_err(wrap)?;

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, self.backup_path()).await {
                let _ = fs::remove_file(&tmp).await;
                return Err(wrap(e));
            }
        }

        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(wrap(e));
        }

        tracing::debug!("Saved registry with {} processes", registry.processes.len());
        Ok(())
    }

    /// 他のプロセスがファイルを書き換えていれば読み直す。
    /// ファイルが無い、または読めない場合はメモリ上の状態を使い続ける
    async fn reload(&self, cached: &mut Cached, force: bool) {
        let Some(stamp) = file_stamp(&self.path).await else {
            return;
        };
        if !force && cached.stamp == Some(stamp) {
            return;
        }
        match Self::load(&self.path).await {
            Ok(registry) => {
                cached.registry = registry;
                cached.stamp = Some(stamp);
            }
            Err(e) => tracing::warn!("Failed to reload {}: {}", self.path.display(), e),
        }
    }

    async fn current(&self) -> MutexGuard<'_, Cached> {
        let mut cached = self.registry.lock().await;
        self.reload(&mut cached, false).await;
        cached
    }

    async fn mutate<T>(&self, f: impl FnOnce(&mut Registry) -> Result<T>) -> Result<T> {
        let mut cached = self.registry.lock().await;
        // 更新時刻の粒度では同時刻の書き込みを見分けられないため、変更前は必ず読み直す
        self.reload(&mut cached, true).await;
        let mut next = cached.registry.clone();
        let out = f(&mut next)?;
        next.updated_at = Utc::now();
        self.persist(&next).await?;
        cached.registry = next;
        cached.stamp = file_stamp(&self.path).await;
        Ok(out)
    }

    pub async fn snapshot(&self) -> Registry {
        self.current().await.registry.clone()
    }

    pub async fn find_process_by_name(&self, name: &str) -> Option<Process> {
        self.current().await.registry.processes.get(name).cloned()
    }

    pub async fn require(&self, name: &str) -> Result<Process> {
        self.find_process_by_name(name)
            .await
            .ok_or_else(|| CoreError::ProcessNotFound(name.to_string()))
    }

    pub async fn list_processes(&self) -> Vec<Process> {
        self.current()
            .await
            .registry
            .processes
            .values()
            .cloned()
            .collect()
    }

    /// 所有しているか、サブユーザーとして権限を持つプロセスのみ返す
    pub async fn visible_processes(&self, viewer: &Viewer) -> Vec<Process> {
        let cached = self.current().await;
        let registry = &cached.registry;
        registry
            .processes
            .values()
            .filter(|p| viewer.can_view(p, &registry.sub_users))
            .cloned()
            .collect()
    }

    pub async fn grants_for(&self, name: &str) -> Vec<SubUser> {
        self.current()
            .await
            .registry
            .sub_users
            .iter()
            .filter(|g| g.process == name)
            .cloned()
            .collect()
    }

    /// プロセスを登録し、空いているポートIDを割り当てる
    pub async fn insert_process(&self, mut process: Process) -> Result<Process> {
        validate_process_name(&process.name)?;
        self.mutate(move |registry| {
            if registry.processes.contains_key(&process.name) {
                return Err(CoreError::DuplicateName(process.name.clone()));
            }
            process.port_id = registry.free_port_id();
            registry
                .processes
                .insert(process.name.clone(), process.clone());
            Ok(process)
        })
        .await
    }

    pub async fn record_container(&self, name: &str, container_id: &str) -> Result<()> {
        self.mutate(|registry| {
            let process = registry.process_mut(name)?;
            if process.id != container_id {
                process.id = container_id.to_string();
                process.touch();
            }
            Ok(())
        })
        .await
    }

    pub async fn record_pid(&self, name: &str, pid: Option<u32>) -> Result<()> {
        self.mutate(|registry| {
            let process = registry.process_mut(name)?;
            process.process_pid = pid;
            process.touch();
            Ok(())
        })
        .await
    }

    /// プロセスを削除する（連携設定・サブユーザーも連鎖削除）
    pub async fn remove_process(&self, name: &str) -> Result<Process> {
        self.mutate(|registry| {
            let removed = registry
                .processes
                .remove(name)
                .ok_or_else(|| CoreError::ProcessNotFound(name.to_string()))?;
            registry.integrations.remove(name);
            registry.sub_users.retain(|g| g.process != name);
            Ok(removed)
        })
        .await
    }

    pub async fn integration_for(&self, name: &str) -> Option<DiscordIntegration> {
        self.current().await.registry.integrations.get(name).cloned()
    }

    pub async fn upsert_integration(&self, integration: DiscordIntegration) -> Result<()> {
        self.mutate(|registry| {
            if !registry.processes.contains_key(&integration.process_name) {
                return Err(CoreError::ProcessNotFound(integration.process_name.clone()));
            }
            registry
                .integrations
                .insert(integration.process_name.clone(), integration);
            Ok(())
        })
        .await
    }

    /// サブユーザー権限を付与する（同じメールの既存付与は置き換え）
    pub async fn grant(&self, sub_user: SubUser) -> Result<()> {
        self.mutate(|registry| {
            if !registry.processes.contains_key(&sub_user.process) {
                return Err(CoreError::ProcessNotFound(sub_user.process.clone()));
            }
            registry.sub_users.retain(|g| {
                !(g.process == sub_user.process && g.email.eq_ignore_ascii_case(&sub_user.email))
            });
            registry.sub_users.push(sub_user);
            Ok(())
        })
        .await
    }

    /// 名前とディレクトリを変更し、依存する行も同じ書き込みで更新する
    pub async fn rename_process(
        &self,
        old: &str,
        new: &str,
        new_location: impl Into<PathBuf>,
    ) -> Result<Process> {
        validate_process_name(new)?;
        let new_location = new_location.into();
        self.mutate(|registry| {
            if registry.processes.contains_key(new) {
                return Err(CoreError::DuplicateName(new.to_string()));
            }
            let mut process = registry
                .processes
                .remove(old)
                .ok_or_else(|| CoreError::ProcessNotFound(old.to_string()))?;
            process.name = new.to_string();
            process.file_location = new_location;
            process.touch();
            registry.processes.insert(new.to_string(), process.clone());

            if let Some(mut integration) = registry.integrations.remove(old) {
                integration.process_name = new.to_string();
                registry.integrations.insert(new.to_string(), integration);
            }
            for grant in registry.sub_users.iter_mut().filter(|g| g.process == old) {
                grant.process = new.to_string();
            }
            Ok(process)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Permission, ProcessType};
    use tempfile::tempdir;

    fn process(name: &str) -> Process {
        Process::new(
            name,
            ProcessType::Python,
            "python app.py",
            format!("/srv/{}", name),
            1,
        )
    }

    #[tokio::test]
    async fn test_insert_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = ProcessStore::open(&path).await.unwrap();

        let a = store.insert_process(process("a")).await.unwrap();
        let b = store.insert_process(process("b")).await.unwrap();
        assert_eq!(a.port_id, 1);
        assert_eq!(b.port_id, 2);

        let reopened = ProcessStore::open(&path).await.unwrap();
        assert_eq!(reopened.list_processes().await.len(), 2);
        assert!(reopened.find_process_by_name("a").await.is_some());
    }

    #[tokio::test]
    async fn test_empty_state() {
        let dir = tempdir().unwrap();
        let store = ProcessStore::open(dir.path().join("state.json"))
            .await
            .unwrap();
        assert!(store.list_processes().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let dir = tempdir().unwrap();
        let store = ProcessStore::open(dir.path().join("state.json"))
            .await
            .unwrap();
        store.insert_process(process("a")).await.unwrap();
        let err = store.insert_process(process("a")).await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateName(_)));
    }

    #[tokio::test]
    async fn test_port_id_reused_after_delete() {
        let dir = tempdir().unwrap();
        let store = ProcessStore::open(dir.path().join("state.json"))
            .await
            .unwrap();
        store.insert_process(process("a")).await.unwrap();
        store.insert_process(process("b")).await.unwrap();
        store.remove_process("a").await.unwrap();
        let c = store.insert_process(process("c")).await.unwrap();
        assert_eq!(c.port_id, 1);
    }

    #[tokio::test]
    async fn test_remove_cascades() {
        let dir = tempdir().unwrap();
        let store = ProcessStore::open(dir.path().join("state.json"))
            .await
            .unwrap();
        store.insert_process(process("a")).await.unwrap();
        store
            .upsert_integration(DiscordIntegration {
                process_name: "a".into(),
                webhook_url: "https://hook".into(),
                events: vec!["start".into()],
            })
            .await
            .unwrap();
        store
            .grant(SubUser {
                email: "x@example.com".into(),
                process: "a".into(),
                permissions: vec![Permission::Start],
                sub_role: String::new(),
            })
            .await
            .unwrap();

        store.remove_process("a").await.unwrap();
        assert!(store.integration_for("a").await.is_none());
        assert!(store.grants_for("a").await.is_empty());
    }

    #[tokio::test]
    async fn test_rename_moves_dependents() {
        let dir = tempdir().unwrap();
        let store = ProcessStore::open(dir.path().join("state.json"))
            .await
            .unwrap();
        store.insert_process(process("a")).await.unwrap();
        store
            .upsert_integration(DiscordIntegration {
                process_name: "a".into(),
                webhook_url: "https://hook".into(),
                events: vec![],
            })
            .await
            .unwrap();

        let renamed = store.rename_process("a", "b", "/srv/b").await.unwrap();
        assert_eq!(renamed.name, "b");
        assert_eq!(renamed.file_location, PathBuf::from("/srv/b"));
        assert!(store.find_process_by_name("a").await.is_none());
        assert!(store.find_process_by_name("b").await.is_some());
        assert_eq!(
            store.integration_for("b").await.unwrap().process_name,
            "b"
        );
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_memory_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = ProcessStore::open(&path).await.unwrap();
        store.insert_process(process("a")).await.unwrap();

        // 状態ファイルをディレクトリに置き換えて書き込みを失敗させる
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let err = store.rename_process("a", "b", "/srv/b").await.unwrap_err();
        assert!(matches!(err, CoreError::Persist { .. }));
        assert!(store.find_process_by_name("a").await.is_some());
        assert!(store.find_process_by_name("b").await.is_none());
    }

    #[tokio::test]
    async fn test_stores_sharing_a_file_see_each_other() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let server = ProcessStore::open(&path).await.unwrap();
        let cli = ProcessStore::open(&path).await.unwrap();

        server.insert_process(process("a")).await.unwrap();
        // 古いスナップショットで上書きせず、相手の変更に積み上げる
        let b = cli.insert_process(process("b")).await.unwrap();
        assert_eq!(b.port_id, 2);

        let reopened = ProcessStore::open(&path).await.unwrap();
        assert_eq!(reopened.list_processes().await.len(), 2);

        assert!(server.find_process_by_name("b").await.is_some());
        server.remove_process("b").await.unwrap();
        assert!(cli.find_process_by_name("b").await.is_none());
        assert_eq!(cli.snapshot().await.processes.len(), 1);
    }

    #[tokio::test]
    async fn test_visible_processes() {
        let dir = tempdir().unwrap();
        let store = ProcessStore::open(dir.path().join("state.json"))
            .await
            .unwrap();
        store.insert_process(process("mine")).await.unwrap();
        let mut theirs = process("theirs");
        theirs.owner_id = 2;
        store.insert_process(theirs).await.unwrap();

        let owner = Viewer::new(1);
        let names: Vec<String> = store
            .visible_processes(&owner)
            .await
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["mine".to_string()]);
    }

    #[tokio::test]
    async fn test_newer_version_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"version": 99, "updated_at": "2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        let err = ProcessStore::open(&path).await.err().unwrap();
        assert!(matches!(err, CoreError::UnsupportedVersion { found: 99, .. }));
    }
}
