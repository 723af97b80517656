//! コンテナ内で実行するシェルコマンドの組み立て

use crate::engine::sh;

/// 監視対象コマンド起動用スクリプトのヒアドキュメント終端
pub(crate) const HEREDOC_MARKER: &str = "BERTH_EOF";

/// シングルクォートで囲む
pub(crate) fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

pub(crate) fn ps_aux() -> Vec<String> {
    vec!["ps".to_string(), "aux".to_string()]
}

/// busybox の ps は -e を受け付けないためフォールバックする
pub(crate) fn ppid_table() -> Vec<String> {
    sh("ps -eo pid,ppid 2>/dev/null || ps -o pid,ppid")
}

pub(crate) fn listening_sockets() -> Vec<String> {
    sh("netstat -tlnp 2>/dev/null")
}

pub(crate) fn lsof_port(port: u16) -> Vec<String> {
    sh(format!("lsof -ti :{} 2>/dev/null", port))
}

pub(crate) fn kill(signal: &str, pids: &[u32]) -> Vec<String> {
    let mut cmd = vec!["kill".to_string(), format!("-{}", signal)];
    cmd.extend(pids.iter().map(u32::to_string));
    cmd
}

pub(crate) fn truncate(path: &str) -> Vec<String> {
    sh(format!(": > {}", quote(path)))
}

pub(crate) fn file_size(path: &str) -> Vec<String> {
    let q = quote(path);
    sh(format!("stat -c %s {} 2>/dev/null || wc -c < {}", q, q))
}

/// 先頭 `size` バイトの範囲で最後の `lines` 行
pub(crate) fn tail_within(path: &str, size: u64, lines: usize) -> Vec<String> {
    sh(format!("head -c {} {} | tail -n {}", size, quote(path), lines))
}

/// `from` バイト目から `len` バイト
pub(crate) fn read_range(path: &str, from: u64, len: u64) -> Vec<String> {
    sh(format!("tail -c +{} {} | head -c {}", from + 1, quote(path), len))
}

pub(crate) fn tail_lines(path: &str, lines: usize) -> Vec<String> {
    sh(format!("tail -n {} {} 2>/dev/null", lines, quote(path)))
}

pub(crate) fn file_exists(path: &str) -> Vec<String> {
    vec!["test".to_string(), "-f".to_string(), path.to_string()]
}

pub(crate) fn wrapper_path(name: &str) -> String {
    format!("/tmp/berth_{}_start.sh", name)
}

/// 監視対象コマンドを起動するラッパースクリプト
///
/// 出力はすべて tee でログファイルに追記される。
pub(crate) fn wrapper_script(app_dir: &str, log_file: &str, main_command: &str) -> String {
    let log = quote(log_file);
    format!(
        "#!/bin/sh\n\
         cd {app} || exit 1\n\
         echo \"[berth] starting at $(date '+%Y-%m-%d %H:%M:%S')\" | tee -a {log}\n\
         echo \"[berth] npm: $(which npm 2>/dev/null || echo 'not found')\" | tee -a {log}\n\
         echo \"[berth] node: $(which node 2>/dev/null || echo 'not found')\" | tee -a {log}\n\
         exec {cmd} 2>&1 | tee -a {log}\n",
        app = quote(app_dir),
        log = log,
        cmd = main_command,
    )
}

pub(crate) fn install_script(path: &str, body: &str) -> Vec<String> {
    let q = quote(path);
    sh(format!(
        "cat > {q} <<'{m}'\n{body}\n{m}\nchmod +x {q}",
        q = q,
        m = HEREDOC_MARKER,
        body = body.trim_end(),
    ))
}

/// 1回限りのコマンドを実行し、各行にタイムスタンプを付けてログに追記する
///
/// パイプの終了コードは末尾の while になるため、コマンド自身の終了コードを
/// fd 4 経由で取り出して返す。
pub(crate) fn run_logged(work_dir: &str, log_file: &str, command: &str) -> Vec<String> {
    let log = quote(log_file);
    sh(format!(
        "cd {wd} || exit 1\n\
         printf '[%s] $ %s\\n' \"$(date '+%Y-%m-%d %H:%M:%S')\" {qcmd} >> {log}\n\
         exec 3>&1\n\
         rc=$( {{ {{ ({cmd}) 2>&1 3>&- 4>&-; echo $? >&4; }} | while IFS= read -r line; do \
         printf '[%s] %s\\n' \"$(date '+%Y-%m-%d %H:%M:%S')\" \"$line\" >> {log}; \
         printf '%s\\n' \"$line\" >&3; done; }} 4>&1 )\n\
         exit \"${{rc:-1}}\"",
        wd = quote(work_dir),
        qcmd = quote(command),
        cmd = command,
        log = log,
    ))
}

/// JVM が見つからない場合の終了コード
pub(crate) const JVM_NOT_FOUND_EXIT: i64 = 44;

/// Minecraft サーバーの標準入力へコマンドを書き込む
pub(crate) fn feed_jvm_stdin(encoded: &str) -> Vec<String> {
    sh(format!(
        "MC_PID=$(ps aux | grep '[j]ava' | awk '{{print $2}}' | head -n 1); \
         [ -z \"$MC_PID\" ] && exit {code}; \
         echo {b64} | base64 -d > /proc/$MC_PID/fd/0",
        code = JVM_NOT_FOUND_EXIT,
        b64 = quote(encoded),
    ))
}
