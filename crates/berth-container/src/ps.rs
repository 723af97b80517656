//! コンテナ内プロセステーブルの解析
//!
//! コマンド文字列の部分一致による識別はあくまで経験則。エイリアス表で
//! 代表的なランタイムの実行ファイル名に寄せる。

use std::collections::{HashMap, HashSet, VecDeque};

/// `ps aux` の1行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsRow {
    pub pid: u32,
    pub stat: Option<String>,
    pub command: String,
    raw: String,
}

impl PsRow {
    pub fn is_zombie(&self) -> bool {
        self.raw.contains("<defunct>")
            || self.raw.contains(" Z ")
            || self.stat.as_deref().is_some_and(|s| s.starts_with('Z'))
    }

    /// 検索に使った ps や grep 自身の行
    pub fn is_probe(&self) -> bool {
        self.command.contains("ps aux") || self.command.contains("grep")
    }
}

struct Columns {
    pid: usize,
    stat: Option<usize>,
    command: usize,
}

impl Columns {
    /// procps の `ps aux` の並び
    const PROCPS: Columns = Columns {
        pid: 1,
        stat: Some(7),
        command: 10,
    };

    fn from_header(line: &str) -> Option<Columns> {
        let headers: Vec<&str> = line.split_whitespace().collect();
        let pid = headers.iter().position(|h| *h == "PID")?;
        let stat = headers.iter().position(|h| *h == "STAT" || *h == "S");
        let command = headers
            .iter()
            .position(|h| matches!(*h, "COMMAND" | "CMD" | "ARGS"))?;
        Some(Columns { pid, stat, command })
    }
}

pub fn parse_ps_aux(output: &str) -> Vec<PsRow> {
    let mut lines = output.lines().filter(|l| !l.trim().is_empty()).peekable();

    let columns = match lines.peek().and_then(|l| Columns::from_header(l)) {
        Some(columns) => {
            lines.next();
            columns
        }
        None => Columns::PROCPS,
    };

    lines
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let pid = fields.get(columns.pid)?.parse().ok()?;
            let stat = columns
                .stat
                .and_then(|i| fields.get(i))
                .map(|s| s.to_string());
            let command = fields.get(columns.command..)?.join(" ");
            Some(PsRow {
                pid,
                stat,
                command,
                raw: line.to_string(),
            })
        })
        .collect()
}

/// `ps -o pid,ppid` の出力を pid → ppid に
pub fn parse_ppid_table(output: &str) -> HashMap<u32, u32> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.parse().ok()?;
            let ppid = fields.next()?.parse().ok()?;
            Some((pid, ppid))
        })
        .collect()
}

/// `root` の子孫（root 自身は含まない）。循環があっても停止する
pub fn descendants(root: u32, ppids: &HashMap<u32, u32>) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (&pid, &ppid) in ppids {
        if pid != ppid {
            children.entry(ppid).or_default().push(pid);
        }
    }

    let mut seen = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    let mut out = Vec::new();
    while let Some(pid) = queue.pop_front() {
        if let Some(kids) = children.get(&pid) {
            for &kid in kids {
                if seen.insert(kid) {
                    out.push(kid);
                    queue.push_back(kid);
                }
            }
        }
    }
    out.sort_unstable();
    out
}

/// 実行ファイル名 → ps 上に現れる名前
fn aliases(program: &str) -> Option<&'static [&'static str]> {
    let found: &'static [&'static str] = match program {
        "apache2-foreground" => &["apache2", "httpd"],
        "php-fpm" => &["php-fpm"],
        "nginx" => &["nginx"],
        "vite" => &["node", "vite"],
        "npm" => &["node", "npm"],
        "node" => &["node"],
        "minecraft" | "java" => &["java"],
        "python" => &["python"],
        "python3" => &["python3"],
        _ => return None,
    };
    Some(found)
}

/// 自明なフラグへの誤一致を避けるため 3 文字以上のトークンだけを使う
fn long_tokens(command: &str) -> Vec<String> {
    command
        .split_whitespace()
        .filter(|t| t.len() > 2)
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTerms(Vec<String>);

impl SearchTerms {
    /// 状態確認用: 先頭トークンのエイリアス、無ければ長いトークン
    pub fn for_status(main_command: &str) -> Self {
        let first = main_command.split_whitespace().next().unwrap_or_default();
        let program = first.rsplit('/').next().unwrap_or(first);
        match aliases(program) {
            Some(names) => SearchTerms(names.iter().map(|s| s.to_string()).collect()),
            None => SearchTerms(long_tokens(main_command)),
        }
    }

    /// 停止用: コマンドの長いトークンそのまま
    pub fn for_stop(main_command: &str) -> Self {
        SearchTerms(long_tokens(main_command))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn terms(&self) -> &[String] {
        &self.0
    }

    pub fn matches(&self, row: &PsRow) -> bool {
        !row.is_probe() && self.0.iter().any(|t| row.command.contains(t.as_str()))
    }
}

/// `netstat -tlnp` から `port` で待ち受けている PID を取り出す
pub fn parse_listeners(output: &str, port: u16) -> Vec<u32> {
    let suffix = format!(":{}", port);
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if !fields.first()?.starts_with("tcp") {
                return None;
            }
            if !fields.get(3)?.ends_with(&suffix) {
                return None;
            }
            let program = fields.iter().skip(5).find(|f| f.contains('/'))?;
            program.split('/').next()?.parse().ok()
        })
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// 1行1PIDの出力（`lsof -t`）
pub fn parse_pid_lines(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|l| l.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROCPS: &str = "\
USER       PID %CPU %MEM    VSZ   RSS TTY      STAT START   TIME COMMAND
root         1  0.0  0.0   2384   760 ?        Ss   10:00   0:00 tail -f /dev/null
root        12  0.1  1.2 912345 50000 ?        Sl   10:01   0:03 node index.js --port 8001
root        20  0.0  0.0      0     0 ?        Z    10:02   0:00 [node] <defunct>
root        31  0.0  0.0   6000  1200 ?        R    10:05   0:00 ps aux
";

    const BUSYBOX: &str = "\
PID   USER     TIME  COMMAND
    1 root      0:00 tail -f /dev/null
    7 root      0:01 python3 bot.py
";

    #[test]
    fn test_parse_procps() {
        let rows = parse_ps_aux(PROCPS);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1].pid, 12);
        assert_eq!(rows[1].command, "node index.js --port 8001");
        assert_eq!(rows[1].stat.as_deref(), Some("Sl"));
        assert!(!rows[1].is_zombie());
        assert!(rows[2].is_zombie());
        assert!(rows[3].is_probe());
    }

    #[test]
    fn test_parse_busybox() {
        let rows = parse_ps_aux(BUSYBOX);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].pid, 7);
        assert_eq!(rows[1].command, "python3 bot.py");
        assert_eq!(rows[1].stat, None);
    }

    #[test]
    fn test_status_terms_use_aliases() {
        assert_eq!(
            SearchTerms::for_status("vite --host").terms(),
            &["node".to_string(), "vite".to_string()]
        );
        assert_eq!(
            SearchTerms::for_status("apache2-foreground").terms(),
            &["apache2".to_string(), "httpd".to_string()]
        );
        assert_eq!(
            SearchTerms::for_status("/usr/local/bin/node server.js").terms(),
            &["node".to_string()]
        );
        assert_eq!(
            SearchTerms::for_status("./run -v serve").terms(),
            &["./run".to_string(), "serve".to_string()]
        );
    }

    #[test]
    fn test_stop_terms_are_raw_tokens() {
        assert_eq!(
            SearchTerms::for_stop("npm run dev -- -p 3000").terms(),
            &["npm".to_string(), "run".to_string(), "dev".to_string(), "3000".to_string()]
        );
    }

    #[test]
    fn test_matches_skips_probes() {
        let rows = parse_ps_aux(PROCPS);
        let terms = SearchTerms::for_status("node index.js");
        let matched: Vec<u32> = rows
            .iter()
            .filter(|r| terms.matches(r))
            .map(|r| r.pid)
            .collect();
        assert_eq!(matched, vec![12, 20]);

        let grep_row = parse_ps_aux("root 40 0 0 1 1 ? S 1 0:00 grep node").remove(0);
        assert!(!terms.matches(&grep_row));
    }

    #[test]
    fn test_descendants() {
        let table = parse_ppid_table("  PID  PPID\n    1     0\n   10     1\n   11    10\n   12    11\n   13    10\n   20     1\n");
        assert_eq!(descendants(10, &table), vec![11, 12, 13]);
        assert!(descendants(12, &table).is_empty());
    }

    #[test]
    fn test_descendants_cycle() {
        let table = HashMap::from([(2, 3), (3, 2), (4, 4)]);
        assert_eq!(descendants(2, &table), vec![3]);
        assert!(descendants(4, &table).is_empty());
    }

    #[test]
    fn test_parse_listeners() {
        let out = "\
Active Internet connections (only servers)
Proto Recv-Q Send-Q Local Address           Foreign Address         State       PID/Program name
tcp        0      0 0.0.0.0:8001            0.0.0.0:*               LISTEN      12/node
tcp        0      0 0.0.0.0:80010           0.0.0.0:*               LISTEN      13/node
tcp6       0      0 :::8001                 :::*                    LISTEN      12/node
tcp        0      0 127.0.0.1:9000          0.0.0.0:*               LISTEN      14/php-fpm
";
        assert_eq!(parse_listeners(out, 8001), vec![12]);
        assert_eq!(parse_listeners(out, 9000), vec![14]);
        assert!(parse_listeners(out, 8002).is_empty());
    }

    #[test]
    fn test_parse_pid_lines() {
        assert_eq!(parse_pid_lines("12\n 40 \nx\n"), vec![12, 40]);
    }
}
