//! Line-oriented telemetry via the `wg` and `ip` tools
//!
//! The status tool prints one tab-separated line per peer. Handshake and
//! transfer are two independent invocations; transfer is only queried
//! when the link reports up, since querying a down interface just
//! produces tool noise.

use crate::TelemetryReader;
use async_trait::async_trait;
use std::io;
use tokio::process::Command;
use tracing::debug;
use wgctl_proto::{PeerStats, TunnelName};

/// Captured output of one external tool invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Invokes an external tool with an argument vector.
///
/// Arguments are passed verbatim to the process spawner; nothing here
/// ever goes through a shell.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput>;
}

/// Runs commands through the system process spawner.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        let output = Command::new(program).args(args).output().await?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Queries link state for `name`. Anything but a clean "state UP" report
/// counts as down.
pub async fn link_is_up<R: CommandRunner + ?Sized>(runner: &R, name: &TunnelName) -> bool {
    match runner.run("ip", &["link", "show", name.as_str()]).await {
        Ok(out) => out.success && out.stdout.contains("state UP"),
        Err(err) => {
            debug!(tunnel = %name, error = %err, "link state query failed");
            false
        }
    }
}

/// Telemetry reader backed by the `wg` status tool.
#[derive(Debug, Clone, Default)]
pub struct WgToolReader<R = SystemRunner> {
    runner: R,
}

impl WgToolReader<SystemRunner> {
    pub fn new() -> Self {
        Self {
            runner: SystemRunner,
        }
    }
}

impl<R: CommandRunner> WgToolReader<R> {
    pub fn with_runner(runner: R) -> Self {
        Self { runner }
    }

    /// Whether the interface currently reports up.
    pub async fn interface_up(&self, name: &TunnelName) -> bool {
        link_is_up(&self.runner, name).await
    }

    async fn show(&self, name: &TunnelName, what: &str) -> Option<String> {
        match self.runner.run("wg", &["show", name.as_str(), what]).await {
            Ok(out) if out.success => Some(out.stdout),
            Ok(out) => {
                debug!(tunnel = %name, query = what, stderr = %out.stderr.trim(), "status query failed");
                None
            }
            Err(err) => {
                debug!(tunnel = %name, query = what, error = %err, "status tool unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl<R: CommandRunner> TelemetryReader for WgToolReader<R> {
    async fn read(&self, name: &TunnelName) -> PeerStats {
        let last_handshake_millis = match self.show(name, "latest-handshakes").await {
            Some(out) => parse_latest_handshake_millis(&out),
            None => 0,
        };

        let (rx_bytes, tx_bytes) = if self.interface_up(name).await {
            match self.show(name, "transfer").await {
                Some(out) => parse_transfer(&out),
                None => (0, 0),
            }
        } else {
            (0, 0)
        };

        PeerStats {
            rx_bytes,
            tx_bytes,
            last_handshake_millis,
        }
    }
}

/// Parses `latest-handshakes` output: one `<pubkey>\t<epoch-seconds>`
/// line per peer. Returns the most recent handshake across peers in Unix
/// milliseconds; empty, tab-less or non-numeric output yields 0.
fn parse_latest_handshake_millis(output: &str) -> i64 {
    output
        .lines()
        .filter_map(|line| {
            let (_, seconds) = line.split_once('\t')?;
            seconds.trim().parse::<i64>().ok()
        })
        .max()
        .map_or(0, |seconds| seconds.saturating_mul(1000))
}

/// Parses `transfer` output: one `<pubkey>\t<rx>\t<tx>` line per peer,
/// exactly three fields. Sums counters across peers; malformed lines
/// contribute nothing.
fn parse_transfer(output: &str) -> (u64, u64) {
    let mut rx_total = 0u64;
    let mut tx_total = 0u64;
    for line in output.lines() {
        let mut fields = line.split('\t');
        let (Some(_), Some(rx), Some(tx), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let (Ok(rx), Ok(tx)) = (rx.trim().parse::<u64>(), tx.trim().parse::<u64>()) else {
            continue;
        };
        rx_total = rx_total.saturating_add(rx);
        tx_total = tx_total.saturating_add(tx);
    }
    (rx_total, tx_total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted runner: maps a full argv line to its canned output and
    /// records every invocation.
    struct FakeRunner {
        responses: HashMap<String, CommandOutput>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        fn new() -> Self {
            Self {
                responses: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn respond(mut self, argv: &str, stdout: &str) -> Self {
            self.responses.insert(
                argv.to_string(),
                CommandOutput {
                    success: true,
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                },
            );
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
            let argv = format!("{} {}", program, args.join(" "));
            self.calls.lock().unwrap().push(argv.clone());
            Ok(self.responses.get(&argv).cloned().unwrap_or(CommandOutput {
                success: false,
                stdout: String::new(),
                stderr: "no such device".to_string(),
            }))
        }
    }

    fn name(s: &str) -> TunnelName {
        TunnelName::new(s).unwrap()
    }

    #[test]
    fn test_parse_handshake_single_peer() {
        assert_eq!(
            parse_latest_handshake_millis("abc123\t1700000000"),
            1_700_000_000_000
        );
    }

    #[test]
    fn test_parse_handshake_takes_most_recent_peer() {
        let output = "peerA\t1700000000\npeerB\t1700000500\npeerC\t1699999999\n";
        assert_eq!(parse_latest_handshake_millis(output), 1_700_000_500_000);
    }

    #[test]
    fn test_parse_handshake_malformed_yields_zero() {
        assert_eq!(parse_latest_handshake_millis(""), 0);
        assert_eq!(parse_latest_handshake_millis("no-tab-here"), 0);
        assert_eq!(parse_latest_handshake_millis("abc123\tnot-a-number"), 0);
    }

    #[test]
    fn test_parse_transfer_single_peer() {
        assert_eq!(parse_transfer("abc123\t512\t1024"), (512, 1024));
    }

    #[test]
    fn test_parse_transfer_sums_peers() {
        let output = "peerA\t100\t200\npeerB\t11\t22\n";
        assert_eq!(parse_transfer(output), (111, 222));
    }

    #[test]
    fn test_parse_transfer_malformed_yields_zeros() {
        assert_eq!(parse_transfer(""), (0, 0));
        assert_eq!(parse_transfer("abc123\t512"), (0, 0));
        assert_eq!(parse_transfer("abc123\t512\t1024\textra"), (0, 0));
        assert_eq!(parse_transfer("abc123\tx\t1024"), (0, 0));
    }

    #[tokio::test]
    async fn test_read_with_interface_up() {
        let runner = FakeRunner::new()
            .respond("ip link show wg0", "4: wg0: <...> state UP mode DEFAULT")
            .respond("wg show wg0 latest-handshakes", "abc123\t1700000000")
            .respond("wg show wg0 transfer", "abc123\t512\t1024");
        let reader = WgToolReader::with_runner(runner);

        let stats = reader.read(&name("wg0")).await;
        assert_eq!(
            stats,
            PeerStats {
                rx_bytes: 512,
                tx_bytes: 1024,
                last_handshake_millis: 1_700_000_000_000,
            }
        );
    }

    #[tokio::test]
    async fn test_transfer_skipped_when_interface_down() {
        let runner = FakeRunner::new()
            .respond("ip link show wg0", "4: wg0: <...> state DOWN mode DEFAULT")
            .respond("wg show wg0 latest-handshakes", "abc123\t1700000000")
            .respond("wg show wg0 transfer", "abc123\t512\t1024");
        let reader = WgToolReader::with_runner(runner);

        let stats = reader.read(&name("wg0")).await;
        assert_eq!(stats.rx_bytes, 0);
        assert_eq!(stats.tx_bytes, 0);
        assert!(!reader
            .runner
            .calls()
            .iter()
            .any(|argv| argv.ends_with("transfer")));
    }

    #[tokio::test]
    async fn test_read_degrades_to_zeros_when_tool_missing() {
        let reader = WgToolReader::with_runner(FakeRunner::new());
        assert_eq!(reader.read(&name("wg0")).await, PeerStats::default());
    }
}
