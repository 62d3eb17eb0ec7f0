//! 集成测试共用的工具

#![allow(dead_code)]

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use lull_scripting::{
    Language, LogLevel, LoggingConfig, ScriptApp, ScriptEngine, ScriptingConfig, ScriptingPlugin,
};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// 捕获到的一条日志
#[derive(Debug, Clone)]
pub struct Captured {
    pub level: Level,
    pub target: String,
    pub message: String,
}

#[derive(Clone, Default)]
struct CaptureLayer {
    events: Arc<Mutex<Vec<Captured>>>,
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.events.lock().unwrap().push(Captured {
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message: visitor.0,
        });
    }
}

/// 在当前线程上捕获 `f` 执行期间的所有日志
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, Vec<Captured>) {
    let layer = CaptureLayer::default();
    let subscriber = tracing_subscriber::registry().with(layer.clone());
    let result = tracing::subscriber::with_default(subscriber, f);
    let events = layer.events.lock().unwrap().clone();
    (result, events)
}

/// 不向控制台输出日志的配置
pub fn quiet_config(languages: &[Language]) -> ScriptingConfig {
    ScriptingConfig {
        languages: languages.to_vec(),
        logging: LoggingConfig {
            level: LogLevel::Warn,
            log_to_console: false,
        },
        ..ScriptingConfig::default()
    }
}

pub fn build_app(config: ScriptingConfig) -> (ScriptApp, ScriptEngine) {
    let mut app = ScriptApp::new();
    app.add_plugin(ScriptingPlugin::with_config(config)).unwrap();
    app.build().unwrap();
    let engine = app.registry().get::<ScriptEngine>().unwrap();
    (app, engine)
}

/// 安装全部三种语言的应用
pub fn full_app() -> (ScriptApp, ScriptEngine) {
    build_app(quiet_config(&[
        Language::Lua,
        Language::JavaScript,
        Language::LullScript,
    ]))
}

/// 从 `root` 读取脚本文件的应用
pub fn app_with_root(root: &Path) -> (ScriptApp, ScriptEngine) {
    let mut config = quiet_config(&[Language::Lua, Language::JavaScript, Language::LullScript]);
    config.script_root = Some(root.to_path_buf());
    build_app(config)
}
