//! プロセスの追加・削除・名前変更と、利用者ごとの一覧
//!
//! 名前変更はディレクトリ・compose ファイル・レジストリにまたがるため、
//! レジストリへの書き込みを最後に行い、失敗したら前の段階を巻き戻す。

use crate::error::{ContainerError, Result};
use crate::lifecycle::{Controller, ProcessListing, StartOutcome};
use crate::scaffold;
use berth_core::{CoreError, Permission, Process, ProcessType, Viewer, validate_process_name};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tokio::fs;

/// 追加リクエスト
#[derive(Debug, Clone, Deserialize)]
pub struct NewProcess {
    pub name: String,
    #[serde(rename = "type")]
    pub process_type: ProcessType,
    pub command: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddOutcome {
    pub process: Process,
    pub start: StartOutcome,
}

async fn remove_dir_quietly(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir).await {
        tracing::warn!("Failed to remove {}: {}", dir.display(), e);
    }
}

impl Controller {
    /// 利用者が操作できるプロセスを返す。`permission` が None なら閲覧権限
    pub async fn authorize(
        &self,
        viewer: &Viewer,
        name: &str,
        permission: Option<Permission>,
    ) -> Result<Process> {
        let process = self.store.require(name).await?;
        let grants = self.store.grants_for(name).await;
        let allowed = match permission {
            Some(p) => viewer.can(p, &process, &grants),
            None => viewer.can_view(&process, &grants),
        };
        if !allowed {
            tracing::debug!("User {} denied {:?} on {}", viewer.user_id, permission, name);
            return Err(ContainerError::Forbidden {
                name: name.to_string(),
                permission: permission.map_or_else(|| "view".to_string(), |p| p.to_string()),
            });
        }
        Ok(process)
    }

    /// 閲覧可能なプロセスと現在の状態（利用者ごとに短時間キャッシュ）
    pub async fn list_with_status(&self, viewer: &Viewer) -> Vec<ProcessListing> {
        let key = viewer.cache_key();
        if let Some(cached) = self.cache.get(&key, Instant::now()) {
            return cached;
        }

        let processes = self.store.visible_processes(viewer).await;
        let reports = join_all(processes.iter().map(|p| self.resolver.resolve(p))).await;
        let listing: Vec<ProcessListing> = processes
            .into_iter()
            .zip(reports)
            .map(|(process, report)| ProcessListing {
                process,
                status: report.status.for_display(),
                status_error: report.error,
            })
            .collect();

        self.cache.insert(key, listing.clone(), Instant::now());
        listing
    }

    /// ディレクトリを作成して雛形を書き、登録してから起動する
    ///
    /// 起動に失敗してもプロセスは登録されたまま残る（結果は `start` に入る）。
    pub async fn add(&self, request: NewProcess, owner_id: u64) -> Result<AddOutcome> {
        validate_process_name(&request.name)?;
        let name = request.name.clone();
        let dir = self.config().process_dir(&name);

        let _guard = self.locks.lock(&name).await;
        if self.store.find_process_by_name(&name).await.is_some() {
            return Err(CoreError::DuplicateName(name).into());
        }
        if dir.exists() {
            return Err(ContainerError::DirectoryExists(dir));
        }

        fs::create_dir_all(&self.config().servers_dir).await?;
        fs::create_dir(&dir).await?;

        let process = Process::new(
            &name,
            request.process_type,
            request.command,
            &dir,
            owner_id,
        )
        .with_dependencies(request.dependencies)
        .with_description(request.description);

        let process = match self.store.insert_process(process).await {
            Ok(p) => p,
            Err(e) => {
                remove_dir_quietly(&dir).await;
                return Err(e.into());
            }
        };

        let port = process.port(self.config().base_port);
        if let Err(e) = scaffold::write(&dir, &process, port).await {
            remove_dir_quietly(&dir).await;
            if let Err(undo) = self.store.remove_process(&name).await {
                tracing::error!("Failed to unregister {} after scaffold error: {}", name, undo);
            }
            return Err(e);
        }
        tracing::info!("Added {} ({}) on port {}", name, process.process_type, port);

        let start = self.start_locked(&process).await;
        self.cache.invalidate_all();

        let process = self.store.require(&name).await.unwrap_or(process);
        Ok(AddOutcome { process, start })
    }

    /// コンテナを破棄し、ディレクトリと関連する登録を削除する
    pub async fn delete(&self, name: &str) -> Result<Process> {
        let guard = self.locks.lock(name).await;
        let process = self.store.require(name).await?;

        if let Err(e) = self
            .engine()
            .compose_down(&self.inspector.project(name))
            .await
        {
            tracing::warn!("compose down for {} failed: {}", name, e);
        }
        if process.file_location.exists() {
            fs::remove_dir_all(&process.file_location).await?;
        }
        let removed = self.store.remove_process(name).await?;

        drop(guard);
        self.locks.forget(name);
        self.live.remove(name);
        self.cache.invalidate_all();
        tracing::info!("Deleted {}", name);
        Ok(removed)
    }

    /// 名前を変更する
    ///
    /// 手順: 変更先の確認 → 旧プロジェクトの down → ディレクトリ移動 →
    /// compose のサービス名書き換え → レジストリ更新。
    pub async fn rename(&self, old: &str, new: &str) -> Result<Process> {
        validate_process_name(new)?;
        if old == new {
            return Ok(self.store.require(old).await?);
        }
        let _guards = self.locks.lock_pair(old, new).await;

        let process = self.store.require(old).await?;
        if self.store.find_process_by_name(new).await.is_some() {
            return Err(CoreError::DuplicateName(new.to_string()).into());
        }
        let old_dir = process.file_location.clone();
        let new_dir = self.config().process_dir(new);
        if new_dir.exists() {
            return Err(ContainerError::DirectoryExists(new_dir));
        }

        if let Err(e) = self
            .engine()
            .compose_down(&self.inspector.project(old))
            .await
        {
            tracing::warn!("compose down for {} failed: {}", old, e);
        }

        fs::rename(&old_dir, &new_dir).await?;
        tracing::debug!("Moved {} -> {}", old_dir.display(), new_dir.display());

        let mut rewritten: Option<(std::path::PathBuf, String)> = None;
        if let Some(path) = scaffold::find_compose_file(&new_dir) {
            let rewrite = async {
                let original = fs::read_to_string(&path).await?;
                if let Some(updated) = scaffold::rename_service(&original, old, new)? {
                    fs::write(&path, updated).await?;
                }
                Ok::<_, ContainerError>(original)
            };
            match rewrite.await {
                Ok(original) => rewritten = Some((path, original)),
                Err(e) => {
                    self.undo_move(&new_dir, &old_dir).await;
                    return Err(e);
                }
            }
        }

        match self.store.rename_process(old, new, &new_dir).await {
            Ok(renamed) => {
                self.locks.forget(old);
                self.live.remove(old);
                self.cache.invalidate_all();
                tracing::info!("Renamed {} to {}", old, new);
                Ok(renamed)
            }
            Err(e) => {
                tracing::warn!("Registry update for rename {} -> {} failed, rolling back", old, new);
                if let Some((path, original)) = rewritten {
                    if let Err(undo) = fs::write(&path, original).await {
                        tracing::error!("Failed to restore {}: {}", path.display(), undo);
                    }
                }
                self.undo_move(&new_dir, &old_dir).await;
                Err(e.into())
            }
        }
    }

    async fn undo_move(&self, from: &Path, to: &Path) {
        if let Err(e) = fs::rename(from, to).await {
            tracing::error!(
                "Failed to move {} back to {}: {}",
                from.display(),
                to.display(),
                e
            );
        }
    }
}
