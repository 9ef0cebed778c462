#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Once;
use std::time::{SystemTime, UNIX_EPOCH};

use bevy::app::App;
use winery_core::{
    apply_command, build_headless_app_with_config, load_scheduler_config_from_env, TaskScheduler,
};
use winery_runtime::CommandPayload;

static INIT: Once = Once::new();

pub fn ensure_test_config() {
    INIT.call_once(|| {
        let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join("test_scheduler_config.json");

        debug_assert!(
            config_path.exists(),
            "missing test scheduler config at {}",
            config_path.display()
        );

        std::env::set_var("WINERY_CONFIG_PATH", &config_path);
    });
}

pub fn test_app() -> App {
    ensure_test_config();
    let (config, _) = load_scheduler_config_from_env();
    build_headless_app_with_config(config)
}

/// Parse and apply one text command, failing the test on any error.
pub fn run(app: &mut App, line: &str) -> Vec<String> {
    let payload = CommandPayload::parse(line).unwrap_or_else(|err| panic!("{line}: {err}"));
    apply_command(app, &payload).unwrap_or_else(|err| panic!("{line}: {err}"))
}

/// Advance week by week until no task is left.
pub fn run_until_idle(app: &mut App, max_weeks: u32) -> u32 {
    for week in 0..max_weeks {
        if app.world.resource::<TaskScheduler>().is_empty() {
            return week;
        }
        winery_core::run_week(app);
    }
    panic!("tasks still active after {max_weeks} weeks");
}

pub fn scratch_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    std::env::temp_dir().join(format!(
        "winery-it-{label}-{}-{nanos}",
        std::process::id()
    ))
}
