//! Host assembly tests.

#[path = "common.rs"]
mod common;

use common::{TestHost, server, wait_until};
use std::sync::Arc;
use warden::config::HostConfig;
use warden::{Error, Host, LifecycleState, Status};

#[test]
fn test_builder_requires_rcon_and_health() {
    let config = HostConfig {
        servers: vec![server("alpha", 7777)],
        ..Default::default()
    };

    let err = Host::builder(config).build().err().unwrap();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.to_string().contains("RCON"));
}

#[test]
fn test_builder_rejects_duplicate_ports() {
    let config = HostConfig {
        servers: vec![server("alpha", 7777), server("beta", 7777)],
        ..Default::default()
    };
    let rcon = Arc::new(common::RecordingRcon::default());
    let health = Arc::new(common::CountingHealth::default());

    let err = Host::builder(config)
        .rcon(rcon)
        .health(health)
        .build()
        .err()
        .unwrap();
    assert!(err.to_string().contains("7777"));
}

#[test]
fn test_config_file_drives_the_host() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("host.toml");
    std::fs::write(
        &path,
        r#"
[host]
watchdog_interval_ms = 250

[relay]
max_retries = 5

[[servers]]
name = "alpha"
game_port = 7777
rcon_password = "pw"
command = ["./GameServer", "-Port={game_port}"]

[[servers]]
name = "beta"
game_port = 7779
persistent_output = true
"#,
    )
    .unwrap();

    let config = HostConfig::load(&path).unwrap();
    let host = Host::builder(config)
        .rcon(Arc::new(common::RecordingRcon::default()))
        .health(Arc::new(common::CountingHealth::default()))
        .build()
        .unwrap();

    assert_eq!(host.instances().len(), 2);
    assert_eq!(host.registry().ports(), vec![7777, 7779]);
    assert_eq!(host.services().settings.watchdog_interval_ms, 250);
    assert_eq!(host.services().relay.max_retries, Some(5));
    assert!(host.instance("beta").unwrap().output().is_persistent());
    assert!(!host.instance("alpha").unwrap().output().is_persistent());
    assert!(host.instance("gamma").is_none());
    host.registry().clear();
}

#[test]
fn test_start_all_and_stop_all() {
    let host = TestHost::new(vec![server("alpha", 7777), server("beta", 7778)]);

    let started = host.host.start_all();
    assert_eq!(started.len(), 2);
    assert!(started.iter().all(|(_, status)| matches!(status, Status::Starting { .. })));
    assert_eq!(host.os.live_pids().len(), 2);

    let stopped = host.host.stop_all();
    assert!(stopped.iter().all(|(_, status)| matches!(status, Status::Stopping { .. })));
    for instance in host.host.instances() {
        assert!(wait_until(|| instance.state() == LifecycleState::Stopped));
    }
    assert!(host.os.live_pids().is_empty());
}

#[test]
fn test_persistent_output_survives_restart() {
    let mut alpha = server("alpha", 7777);
    alpha.persistent_output = true;
    let host = TestHost::new(vec![alpha, server("beta", 7778)]);
    let alpha = host.instance("alpha");
    let beta = host.instance("beta");

    alpha.start();
    beta.start();
    alpha.restart();
    beta.restart();

    let booted = |lines: Vec<String>| lines.iter().filter(|l| l.contains("Server booting")).count();
    assert_eq!(booted(alpha.output().snapshot()), 2);
    assert_eq!(booted(beta.output().snapshot()), 1);
}

#[test]
fn test_shutdown_stops_servers_and_watchdogs() {
    let host = TestHost::new(vec![server("alpha", 7777)]);
    host.host.start_all();
    host.host.spawn_watchdogs().unwrap();

    host.host.shutdown();

    assert!(host.host.registry().ports().is_empty());
    assert!(wait_until(|| host.os.live_pids().is_empty()));
    assert_eq!(host.os.spawned(), 1);
}
