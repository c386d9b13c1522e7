use std::env;
use treewatch::Settings;
use tempfile::TempDir;

// Env vars and the working directory are process-wide, so every check
// lives in one test.
#[test]
fn test_env_override_with_nested_keys() {
    let temp_dir = TempDir::new().unwrap();
    let original_dir = env::current_dir().unwrap();
    env::set_current_dir(&temp_dir).unwrap();

    unsafe {
        // Use double underscore to separate nested levels
        env::set_var("TREEWATCH_SCHEDULER__DEBOUNCE_MS", "42");
        env::set_var("TREEWATCH_DISCOVERY__ENABLED", "true");
        env::set_var("TREEWATCH_URL_SCHEME", "content");
        env::set_var("TREEWATCH_LOGGING__DEFAULT", "debug");
    }

    let settings = Settings::load().unwrap_or_default();

    println!("Debounce: {}", settings.scheduler.debounce_ms);
    println!("Scheme: {}", settings.url_scheme);

    assert_eq!(settings.scheduler.debounce_ms, 42);
    assert!(settings.discovery.enabled);
    // Single underscores stay part of the field name
    assert_eq!(settings.url_scheme, "content");
    assert_eq!(settings.logging.default, "debug");
    // Untouched nested keys keep their defaults
    assert_eq!(settings.scheduler.max_delay_ms, 5_000);

    // A settings file in the workspace is layered under the env vars
    std::fs::create_dir_all(".treewatch").unwrap();
    std::fs::write(
        ".treewatch/settings.toml",
        "url_scheme = \"file\"\n\n[scheduler]\ndebounce_ms = 7\ntick_ms = 20\n",
    )
    .unwrap();

    let settings = Settings::load().unwrap();
    assert_eq!(settings.scheduler.debounce_ms, 42, "env beats file");
    assert_eq!(settings.scheduler.tick_ms, 20, "file beats defaults");
    assert_eq!(settings.url_scheme, "content");
    assert!(Settings::check_init().is_ok());

    unsafe {
        env::remove_var("TREEWATCH_SCHEDULER__DEBOUNCE_MS");
        env::remove_var("TREEWATCH_DISCOVERY__ENABLED");
        env::remove_var("TREEWATCH_URL_SCHEME");
        env::remove_var("TREEWATCH_LOGGING__DEFAULT");
    }

    let settings = Settings::load().unwrap();
    assert_eq!(settings.scheduler.debounce_ms, 7);
    assert_eq!(settings.url_scheme, "file");

    env::set_current_dir(original_dir).unwrap();
}
