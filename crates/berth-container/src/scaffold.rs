//! プロセスディレクトリの雛形生成
//!
//! python は従来モデル（コンテナ = プロセス）、それ以外は常駐モデル
//! （`tail -f /dev/null` で待機し、`MAIN_COMMAND` をコンテナ内で起動）で生成する。

use crate::error::Result;
use crate::inspector::{MAIN_COMMAND_ENV, MINECRAFT_ENV};
use berth_core::{Process, ProcessType};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const COMPOSE_FILE: &str = "docker-compose.yml";

/// 既存ディレクトリで探す compose ファイル名
pub const COMPOSE_CANDIDATES: [&str; 4] = [
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

#[derive(Debug, Serialize)]
struct ComposeFile {
    services: BTreeMap<String, Service>,
}

#[derive(Debug, Serialize)]
struct Build {
    context: String,
    dockerfile: String,
}

#[derive(Debug, Serialize)]
struct Service {
    build: Build,
    volumes: Vec<String>,
    command: Vec<String>,
    ports: Vec<String>,
    environment: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    restart: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdin_open: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tty: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Template {
    Python,
    Supervised {
        image: &'static str,
        install: Option<&'static str>,
        minecraft: bool,
    },
}

impl Template {
    fn for_type(process_type: &ProcessType) -> Self {
        match process_type {
            ProcessType::Python => Template::Python,
            ProcessType::Nodejs => Template::Supervised {
                image: "node:latest",
                install: Some("npm i"),
                minecraft: false,
            },
            ProcessType::Php => Template::Supervised {
                image: "php:8.3-cli",
                install: None,
                minecraft: false,
            },
            ProcessType::Minecraft => Template::Supervised {
                image: "eclipse-temurin:21-jre-jammy",
                install: None,
                minecraft: true,
            },
            ProcessType::Other(_) => Template::Supervised {
                image: "debian:bookworm-slim",
                install: None,
                minecraft: false,
            },
        }
    }
}

/// 生成するファイル（ディレクトリからの相対名と内容）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldFile {
    pub name: &'static str,
    pub content: String,
}

fn json(command: &str) -> String {
    serde_json::Value::String(command.to_string()).to_string()
}

fn dockerfile(template: Template) -> String {
    match template {
        Template::Python => "FROM python:3.13\n\
             WORKDIR /app\n\
             COPY . /app\n\
             RUN pip install -r requirements.txt\n\
             CMD [\"sh\", \"-c\", \"$COMMAND\"]\n"
            .to_string(),
        Template::Supervised {
            image,
            install,
            minecraft,
        } => {
            let mut out = format!("FROM {}\nWORKDIR /app\nCOPY . /app\n", image);
            if let Some(install) = install {
                out.push_str(&format!("RUN {}\n", install));
            }
            if minecraft {
                out.push_str(&format!("ENV {}=true\n", MINECRAFT_ENV));
            }
            out.push_str("CMD [\"tail\", \"-f\", \"/dev/null\"]\n");
            out
        }
    }
}

fn compose(process: &Process, port: u16, template: Template) -> Result<String> {
    let ports = vec![format!("{}:{}", port, port)];
    let build = Build {
        context: ".".to_string(),
        dockerfile: "Dockerfile".to_string(),
    };
    let volumes = vec![".:/app".to_string()];

    let service = match template {
        Template::Python => Service {
            build,
            volumes,
            command: vec!["sh".into(), "-c".into(), process.command.clone()],
            ports,
            environment: vec![format!("COMMAND={}", json(&process.command))],
            restart: None,
            stdin_open: None,
            tty: None,
        },
        Template::Supervised { .. } => Service {
            build,
            volumes,
            command: vec!["tail".into(), "-f".into(), "/dev/null".into()],
            ports,
            environment: vec![format!("{}={}", MAIN_COMMAND_ENV, json(&process.command))],
            restart: Some("unless-stopped".to_string()),
            stdin_open: Some(true),
            tty: Some(true),
        },
    };

    let file = ComposeFile {
        services: BTreeMap::from([(process.name.clone(), service)]),
    };
    Ok(serde_yaml::to_string(&file)?)
}

/// 種別に応じたファイル一式を組み立てる
pub fn render(process: &Process, port: u16) -> Result<Vec<ScaffoldFile>> {
    let template = Template::for_type(&process.process_type);
    let mut files = vec![
        ScaffoldFile {
            name: "Dockerfile",
            content: dockerfile(template),
        },
        ScaffoldFile {
            name: COMPOSE_FILE,
            content: compose(process, port, template)?,
        },
    ];

    match template {
        Template::Python => {
            let mut requirements = process.dependencies.join("\n");
            if !requirements.is_empty() {
                requirements.push('\n');
            }
            files.push(ScaffoldFile {
                name: "requirements.txt",
                content: requirements,
            });
        }
        Template::Supervised {
            install: Some(_), ..
        } => {
            let dependencies: serde_json::Map<String, serde_json::Value> = process
                .dependencies
                .iter()
                .map(|d| (d.clone(), serde_json::Value::String("latest".into())))
                .collect();
            let package = serde_json::json!({
                "name": process.name,
                "version": "1.0.0",
                "dependencies": dependencies,
            });
            files.push(ScaffoldFile {
                name: "package.json",
                content: serde_json::to_string_pretty(&package)?,
            });
        }
        Template::Supervised {
            minecraft: true, ..
        } => files.push(ScaffoldFile {
            name: "eula.txt",
            content: "eula=true\n".to_string(),
        }),
        Template::Supervised { .. } => {}
    }

    Ok(files)
}

pub async fn write(dir: &Path, process: &Process, port: u16) -> Result<()> {
    for file in render(process, port)? {
        tokio::fs::write(dir.join(file.name), file.content).await?;
        tracing::debug!("Wrote {}/{}", dir.display(), file.name);
    }
    Ok(())
}

pub fn find_compose_file(dir: &Path) -> Option<PathBuf> {
    COMPOSE_CANDIDATES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// compose ファイルのサービス名を付け替える。該当サービスが無ければ `None`
pub fn rename_service(content: &str, old: &str, new: &str) -> Result<Option<String>> {
    let mut doc: serde_yaml::Value = serde_yaml::from_str(content)?;
    let Some(services) = doc
        .get_mut("services")
        .and_then(serde_yaml::Value::as_mapping_mut)
    else {
        return Ok(None);
    };
    let Some(service) = services.remove(old) else {
        return Ok(None);
    };
    services.insert(serde_yaml::Value::String(new.to_string()), service);
    Ok(Some(serde_yaml::to_string(&doc)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::{main_command, parse_env};

    fn file<'a>(files: &'a [ScaffoldFile], name: &str) -> &'a str {
        &files.iter().find(|f| f.name == name).unwrap().content
    }

    fn service(compose: &str, name: &str) -> serde_yaml::Value {
        let doc: serde_yaml::Value = serde_yaml::from_str(compose).unwrap();
        doc["services"][name].clone()
    }

    #[test]
    fn test_python_is_traditional() {
        let process = Process::new("p", ProcessType::Python, "python app.py --name \"x\"", "/srv/p", 1)
            .with_dependencies(vec!["flask".into(), "requests".into()]);
        let files = render(&process, 8001).unwrap();

        assert_eq!(file(&files, "requirements.txt"), "flask\nrequests\n");
        assert!(file(&files, "Dockerfile").starts_with("FROM python:3.13\n"));

        let svc = service(file(&files, COMPOSE_FILE), "p");
        assert_eq!(svc["command"][2].as_str(), Some("python app.py --name \"x\""));
        assert_eq!(svc["ports"][0].as_str(), Some("8001:8001"));
        let env = svc["environment"][0].as_str().unwrap();
        assert_eq!(env, "COMMAND=\"python app.py --name \\\"x\\\"\"");
        assert!(main_command(&parse_env(&[env])).is_none());
    }

    #[test]
    fn test_node_is_always_running() {
        let process = Process::new("web", ProcessType::Nodejs, "node index.js", "/srv/web", 1)
            .with_dependencies(vec!["express".into()]);
        let files = render(&process, 8002).unwrap();

        let svc = service(file(&files, COMPOSE_FILE), "web");
        assert_eq!(svc["command"][0].as_str(), Some("tail"));
        assert_eq!(svc["restart"].as_str(), Some("unless-stopped"));
        let env = svc["environment"][0].as_str().unwrap();
        assert_eq!(
            main_command(&parse_env(&[env])).as_deref(),
            Some("node index.js")
        );
        assert!(file(&files, "package.json").contains("\"express\""));
    }

    #[test]
    fn test_minecraft_marker() {
        let process = Process::new(
            "mc",
            ProcessType::Minecraft,
            "java -Xmx2G -jar server.jar nogui",
            "/srv/mc",
            1,
        );
        let files = render(&process, 8003).unwrap();
        assert!(file(&files, "Dockerfile").contains("ENV MINECRAFT_SERVER=true"));
        assert_eq!(file(&files, "eula.txt"), "eula=true\n");
    }

    #[test]
    fn test_rename_service() {
        let process = Process::new("old", ProcessType::Python, "python app.py", "/srv/old", 1);
        let compose = file(&render(&process, 8001).unwrap(), COMPOSE_FILE).to_string();

        let renamed = rename_service(&compose, "old", "new").unwrap().unwrap();
        let svc = service(&renamed, "new");
        assert_eq!(svc["command"][2].as_str(), Some("python app.py"));
        assert!(service(&renamed, "old").is_null());

        assert_eq!(rename_service(&compose, "missing", "new").unwrap(), None);
    }

    #[test]
    fn test_find_compose_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_compose_file(dir.path()), None);
        std::fs::write(dir.path().join("compose.yaml"), "services: {}\n").unwrap();
        assert_eq!(
            find_compose_file(dir.path()),
            Some(dir.path().join("compose.yaml"))
        );
    }
}
