#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chainrunner::{Chain, Flags, Seq};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, MutexGuard};

/// Tests in one binary share a process; a script being written while another test forks can
/// fail to exec with ETXTBSY. Tests that spawn processes hold this lock.
static SERIAL: Mutex<()> = Mutex::const_new(());

pub async fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().await
}

pub fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

pub const VALIDATORS: [&str; 4] = ["cartman", "stan", "kyle", "kenny"];
pub const NONVALIDATORS: [&str; 2] = ["butters", "wendy"];

/// Writes an executable `/bin/sh` stand-in for the node binary.
///
/// Every invocation is appended to `calls.log` next to the script. It also accepts the
/// arguments of the fork-off and runtime upload tools. Run without a subcommand it
/// keeps writing progress lines to stderr, continuing the height stored in its base path so a
/// restarted node picks up where it was killed. With `stall` set, finalization never moves past
/// block 0.
pub fn fake_node(dir: &Path, stall: bool) -> PathBuf {
    if stall {
        fake_node_with(dir, "fake-node-stalled", "$((n + 2))", "0")
    } else {
        fake_node_with(dir, "fake-node", "$((n + 2))", "$n")
    }
}

/// Like [`fake_node`], with the reported heights given as shell expressions over the step
/// counter `$n`.
pub fn fake_node_with(dir: &Path, name: &str, best: &str, finalized: &str) -> PathBuf {
    let script = format!(
        r#"#!/bin/sh
echo "$@" >> "$(dirname "$0")/calls.log"
case "$1" in
  bootstrap-chain)
    echo '{{"name": "fake", "genesis": {{}}}}'
    exit 0
    ;;
  bootstrap-node)
    mkdir -p "$3"
    touch "$3/p2p_secret"
    exit 0
    ;;
  purge-chain|--ws-rpc-endpoint|--url)
    exit 0
    ;;
  export-state)
    echo '{{"balances": {{"cartman": 100}}}}'
    exit 0
    ;;
  key)
    if [ "$2" = "inspect-node-key" ]; then
      echo "12D3KooWFakePeer"
    else
      echo "Secret Key URI \`$3\` is account:"
      echo "  SS58 Address:      5Addr$(echo "$3" | tr -cd '[:alnum:]')"
    fi
    exit 0
    ;;
esac

base=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "--base-path" ]; then base="$arg"; fi
  prev="$arg"
done
mkdir -p "$base"
n=$(cat "$base/height" 2>/dev/null || echo 0)
while true; do
  n=$((n + 1))
  echo "$n" > "$base/height"
  echo "Idle (0 peers), best: #{best} (0x1a2b), finalized #{finalized} (0x3c4d)" >&2
  echo "4/4 authorities known for session 0" >&2
  sleep 0.05
done
"#
    );

    let path = dir.join(name);
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Lines recorded by the fake node, one per invocation.
pub fn calls(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// A 4 validator + 2 non-validator chain on the fake binary, with distinct RPC ports and a
/// fast poll interval.
pub async fn fake_chain(stall: bool) -> (TempDir, PathBuf, Chain) {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_node(dir.path(), stall);
    let mut chain = Chain::bootstrap(
        dir.path().join("workdir"),
        &binary,
        &VALIDATORS,
        &NONVALIDATORS,
        false,
        &Flags::new().set("chain_type", "local"),
    )
    .await
    .unwrap();

    chain.set_flags(
        &Flags::new()
            .set("port", Seq(30334))
            .set("rpc_port", Seq(9933))
            .set("ws_port", Seq(9944)),
    );
    chain.set_flags_validator(&Flags::new().marker("validator"));
    chain.set_poll_interval(Duration::from_millis(50));

    (dir, binary, chain)
}

/// Serves JSON-RPC over HTTP on an ephemeral port, answering each request through `reply`
/// (method, params) -> response object without `id`.
pub async fn mock_rpc_server<F>(reply: F) -> u16
where
    F: Fn(&str, &Value) -> Value + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let reply = std::sync::Arc::new(reply);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let reply = reply.clone();
            tokio::spawn(async move {
                let request = read_request(&mut stream).await;
                let method = request["method"].as_str().unwrap_or_default().to_string();
                let mut response = (*reply)(&method, &request["params"]);
                response["jsonrpc"] = json!("2.0");
                response["id"] = request["id"].clone();

                let body = serde_json::to_vec(&response).unwrap();
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
                    body.len()
                );
                stream.write_all(head.as_bytes()).await.unwrap();
                stream.write_all(&body).await.unwrap();
            });
        }
    });

    port
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> Value {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending a full request");
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf).to_string();
        let Some((head, body)) = text.split_once("\r\n\r\n") else {
            continue;
        };
        let length: usize = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse().ok())
                    .flatten()
            })
            .unwrap();
        if body.len() >= length {
            return serde_json::from_str(&body[..length]).unwrap();
        }
    }
}
