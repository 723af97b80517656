use super::Process;
use serde::{Deserialize, Serialize};

/// サブユーザーに委譲できる操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Start,
    Stop,
    Console,
    Settings,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Permission::Start => "start",
            Permission::Stop => "stop",
            Permission::Console => "console",
            Permission::Settings => "settings",
        };
        f.write_str(s)
    }
}

/// 1つのプロセスに対する権限委譲
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubUser {
    pub email: String,
    pub process: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub sub_role: String,
}

/// リクエスト元のユーザー
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Viewer {
    pub user_id: u64,
    pub email: Option<String>,
    pub is_admin: bool,
}

impl Viewer {
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            email: None,
            is_admin: false,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    pub fn owns(&self, process: &Process) -> bool {
        self.is_admin || process.owner_id == self.user_id
    }

    fn grant_for<'a>(&self, process: &Process, grants: &'a [SubUser]) -> Option<&'a SubUser> {
        let email = self.email.as_deref()?;
        grants
            .iter()
            .find(|g| g.process == process.name && g.email.eq_ignore_ascii_case(email))
    }

    pub fn can_view(&self, process: &Process, grants: &[SubUser]) -> bool {
        self.owns(process) || self.grant_for(process, grants).is_some()
    }

    pub fn can(&self, permission: Permission, process: &Process, grants: &[SubUser]) -> bool {
        self.owns(process)
            || self
                .grant_for(process, grants)
                .is_some_and(|g| g.permissions.contains(&permission))
    }

    /// キャッシュキーなどに使う識別子
    pub fn cache_key(&self) -> String {
        match &self.email {
            Some(email) => format!("{}:{}", self.user_id, email.to_ascii_lowercase()),
            None => self.user_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProcessType;

    fn process(owner: u64) -> Process {
        Process::new("web", ProcessType::Nodejs, "node index.js", "/srv/web", owner)
    }

    fn grant(email: &str, permissions: Vec<Permission>) -> SubUser {
        SubUser {
            email: email.into(),
            process: "web".into(),
            permissions,
            sub_role: "helper".into(),
        }
    }

    #[test]
    fn test_owner_can_everything() {
        let viewer = Viewer::new(7);
        assert!(viewer.can_view(&process(7), &[]));
        assert!(viewer.can(Permission::Settings, &process(7), &[]));
    }

    #[test]
    fn test_subuser_permissions() {
        let grants = vec![grant("Helper@Example.com", vec![Permission::Start])];
        let viewer = Viewer::new(9).with_email("helper@example.com");

        assert!(viewer.can_view(&process(7), &grants));
        assert!(viewer.can(Permission::Start, &process(7), &grants));
        assert!(!viewer.can(Permission::Stop, &process(7), &grants));
    }

    #[test]
    fn test_stranger_sees_nothing() {
        let grants = vec![grant("helper@example.com", vec![Permission::Start])];
        let viewer = Viewer::new(9);
        assert!(!viewer.can_view(&process(7), &grants));

        let other = Viewer::new(9).with_email("other@example.com");
        assert!(!other.can(Permission::Start, &process(7), &grants));
    }

    #[test]
    fn test_admin() {
        let viewer = Viewer::new(1).admin();
        assert!(viewer.can(Permission::Console, &process(7), &[]));
    }

    #[test]
    fn test_cache_key_is_per_user() {
        let a = Viewer::new(1).with_email("A@example.com");
        let b = Viewer::new(1);
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), "1:a@example.com");
    }
}
