// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn empty_config_gets_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.machine.arena_size, 8 * 1024 * 1024);
    assert_eq!(config.machine.workers, 4);
    assert_eq!(config.console.listen, "127.0.0.1:9600");
    assert!(config.log.dir.is_none());
    assert!(config.mounts.is_empty());
}

#[test]
fn full_config_parses() {
    let config = Config::parse(
        r#"
[machine]
arena_size = 1048576
workers = 2
cache_budget = 4096
walker_interval_ms = 250

[console]
listen = "127.0.0.1:7777"

[log]
dir = "/tmp/isle-logs"

[[mount]]
path = "/native"
driver = "isle.syncdir"
npath = "/srv/data"
param = "png=isle.png"

[[mount]]
path = "/sys/echo"
driver = "isle.prog.echo"
"#,
    )
    .unwrap();

    assert_eq!(config.machine.workers, 2);
    assert_eq!(config.listen_addr().unwrap().port(), 7777);
    assert_eq!(config.mounts.len(), 2);
    assert_eq!(config.mounts[0].driver, "isle.syncdir");
    assert_eq!(config.mounts[1].npath, None);

    let mc = config.machine_config();
    assert_eq!(mc.arena_size, 1048576);
    let policy = mc.uncache.unwrap();
    assert_eq!(policy.budget, 4096);
    assert_eq!(policy.period_ms, 250);
}

#[parameterized(
    bad_listen = { "[console]\nlisten = \"nowhere\"" },
    zero_arena = { "[machine]\narena_size = 0" },
    zero_workers = { "[machine]\nworkers = 0" },
    unnamed_mount = { "[[mount]]\npath = \"///\"\ndriver = \"isle.dir\"" },
    empty_driver = { "[[mount]]\npath = \"/x\"\ndriver = \"\"" },
)]
fn invalid_configs_are_refused(text: &str) {
    assert!(matches!(Config::parse(text), Err(ConfigError::Invalid(_))));
}

#[test]
fn unknown_fields_are_refused() {
    assert!(matches!(
        Config::parse("[machine]\nthreads = 4"),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn missing_file_reports_the_path() {
    let err = Config::load(Path::new("/definitely/not/here.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}
