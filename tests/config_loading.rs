//! 配置文件驱动插件构建

mod common;

use std::fs;

use common::build_app;
use lull_scripting::{Language, LogLevel, ScriptingConfig};

const CONFIG: &str = r#"
languages = ["LullScript", "Lua"]

[lull]
max_call_depth = 16

[lua]
sandboxed = true

[logging]
level = "Warn"
log_to_console = false
"#;

#[test]
fn test_toml_file_selects_backends() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scripting.toml");
    fs::write(&path, CONFIG).unwrap();

    let config = ScriptingConfig::from_toml_file(&path).unwrap();
    assert_eq!(config.languages, vec![Language::LullScript, Language::Lua]);
    assert_eq!(config.lull.max_call_depth, 16);
    assert_eq!(config.logging.level, LogLevel::Warn);

    let (_app, engine) = build_app(config);
    assert!(engine.is_installed(Language::Lua));
    assert!(engine.is_installed(Language::LullScript));
    assert!(!engine.is_installed(Language::JavaScript));

    // 未安装的语言加载失败
    let id = engine.load_inline_script("var x = 1;", "js", Language::JavaScript);
    assert!(!id.is_valid());

    // 深度上限来自配置
    let id = engine.load_inline_script(
        "(do (def down (n) (if (> n 0) (down (- n 1)) n)) (= r (down 40)))",
        "deep",
        Language::LullScript,
    );
    assert!(!engine.run_script(id));

    // 沙箱中没有 io 库
    let id = engine.load_inline_script("has_io = io ~= nil", "sandbox", Language::Lua);
    assert!(engine.run_script(id));
    assert_eq!(engine.get_value::<bool>(id, "has_io"), Some(false));
}

#[test]
fn test_saved_config_reloads() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("saved.toml");

    let mut config = ScriptingConfig::from_toml_str(CONFIG)?;
    config.script_root = Some(dir.path().to_path_buf());
    config.save_toml(&path)?;

    let reloaded = ScriptingConfig::from_toml_file(&path)?;
    assert_eq!(reloaded.languages, config.languages);
    assert_eq!(reloaded.script_root, config.script_root);
    assert!(reloaded.lua.sandboxed);
    reloaded.validate()?;
    Ok(())
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(ScriptingConfig::from_toml_file(dir.path().join("absent.toml")).is_err());
}
