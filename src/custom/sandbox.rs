use super::libs;
use super::marshal::{EntityFields, Marshaller};
use super::ENTRY_POINTS;
use crate::error::{KageError, Result};
use crate::utils::HttpClient;
use mlua::{HookTriggers, Lua, LuaOptions, StdLib, Table, Value, VmState};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How often, in VM instructions, the budget hook runs.
const HOOK_INTERVAL: u32 = 1_000;

/// Base-library globals that reach the filesystem or accept precompiled chunks.
const SEALED_GLOBALS: [&str; 4] = ["dofile", "loadfile", "load", "collectgarbage"];

/// Why a running script must stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Timeout,
    Cancelled,
}

/// Wall-clock deadline and cancellation shared with the VM hook.
struct Budget {
    deadline: Mutex<Option<Instant>>,
    cancel: CancellationToken,
}

impl Budget {
    fn arm(&self, timeout: Duration) {
        *self.deadline.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now() + timeout);
    }

    fn disarm(&self) {
        *self.deadline.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn check(&self) -> Option<Interrupt> {
        if self.cancel.is_cancelled() {
            return Some(Interrupt::Cancelled);
        }
        let deadline = *self.deadline.lock().unwrap_or_else(|e| e.into_inner());
        match deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interrupt::Timeout),
            _ => None,
        }
    }
}

pub struct SandboxOptions {
    pub lenient: bool,
    pub timeout: Duration,
    pub memory_limit: usize,
    pub http: HttpClient,
    pub cancel: CancellationToken,
}

/// One isolated interpreter bound to one loaded script.
pub struct Sandbox {
    lua: Lua,
    name: String,
    budget: Arc<Budget>,
    timeout: Duration,
    missing: Vec<&'static str>,
}

impl Sandbox {
    /// Create an interpreter, run the script's top level and check its entry points.
    pub fn load(path: &Path, name: &str, options: &SandboxOptions) -> Result<Self> {
        let code = std::fs::read_to_string(path)?;
        Self::from_code(&code, name, options)
    }

    pub fn from_code(code: &str, name: &str, options: &SandboxOptions) -> Result<Self> {
        let libs = StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8;
        let lua = Lua::new_with(libs, LuaOptions::default()).map_err(|e| KageError::script(name, e))?;
        lua.set_memory_limit(options.memory_limit)
            .map_err(|e| KageError::script(name, e))?;
        seal(&lua).map_err(|e| KageError::script(name, e))?;
        libs::register(&lua, options.http.clone()).map_err(|e| KageError::script(name, e))?;

        let budget = Arc::new(Budget {
            deadline: Mutex::new(None),
            cancel: options.cancel.clone(),
        });
        let hook_budget = budget.clone();
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
            move |_, _| match hook_budget.check() {
                Some(interrupt) => Err(mlua::Error::RuntimeError(format!("script interrupted: {interrupt:?}"))),
                None => Ok(VmState::Continue),
            },
        );

        let mut sandbox = Self {
            lua,
            name: name.to_string(),
            budget,
            timeout: options.timeout,
            missing: Vec::new(),
        };

        sandbox.budget.arm(sandbox.timeout);
        let loaded = sandbox.lua.load(code).set_name(format!("={name}")).exec();
        let interrupt = sandbox.budget.check();
        sandbox.budget.disarm();
        if let Err(e) = loaded {
            return Err(sandbox.failure("loading", e, interrupt));
        }

        sandbox.missing = sandbox.missing_entry_points();
        if let Some(function) = sandbox.missing.first() {
            if !options.lenient {
                return Err(KageError::missing_entry_point(name, *function));
            }
            warn!(
                "[LUA] Source {} does not define {:?}; calls to them will fail",
                name, sandbox.missing
            );
        }

        debug!("[LUA] Loaded source {}", name);
        Ok(sandbox)
    }

    fn missing_entry_points(&self) -> Vec<&'static str> {
        let globals = self.lua.globals();
        ENTRY_POINTS
            .iter()
            .copied()
            .filter(|function| !matches!(globals.get::<Value>(*function), Ok(Value::Function(_))))
            .collect()
    }

    pub fn missing(&self) -> &[&'static str] {
        &self.missing
    }

    /// Call `function(argument)` and marshal its result, both under the time budget.
    pub fn invoke(&self, function: &str, argument: &str) -> Result<Vec<EntityFields>> {
        let entry = match self.lua.globals().get::<Value>(function) {
            Ok(Value::Function(entry)) => entry,
            _ => return Err(KageError::missing_entry_point(&self.name, function)),
        };
        let marshaller = Marshaller {
            source_name: &self.name,
            function,
        };

        self.budget.arm(self.timeout);
        let outcome = entry.call::<Value>(argument).map(|value| marshaller.entities(value));
        let interrupt = self.budget.check();
        self.budget.disarm();

        match (outcome, interrupt) {
            (Err(e), interrupt) => Err(self.failure(function, e, interrupt)),
            (Ok(Err(_)), Some(interrupt)) => Err(self.interrupted(function, interrupt)),
            (Ok(entities), _) => entities,
        }
    }

    fn interrupted(&self, function: &str, interrupt: Interrupt) -> KageError {
        match interrupt {
            Interrupt::Timeout => KageError::timeout(format!(
                "{}::{} exceeded {:?}",
                self.name, function, self.timeout
            )),
            Interrupt::Cancelled => KageError::cancelled(format!("{}::{}", self.name, function)),
        }
    }

    fn failure(&self, function: &str, error: mlua::Error, interrupt: Option<Interrupt>) -> KageError {
        if let Some(interrupt) = interrupt {
            return self.interrupted(function, interrupt);
        }
        host_error(&error).unwrap_or_else(|| KageError::script(&self.name, format!("{function}: {error}")))
    }
}

/// Strip the base-library functions a script must not reach.
fn seal(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    for name in SEALED_GLOBALS {
        globals.raw_set(name, Value::Nil)?;
    }
    globals.get::<Table>("string")?.raw_set("dump", Value::Nil)?;
    Ok(())
}

/// A transport failure raised by a host module keeps its class across the script boundary.
fn host_error(error: &mlua::Error) -> Option<KageError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<KageError>())
        .and_then(|cause| match cause {
            KageError::Fetch { url, message } => Some(KageError::fetch(url.as_str(), message)),
            KageError::Timeout(context) => Some(KageError::timeout(context.as_str())),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpSettings;

    fn options(lenient: bool) -> SandboxOptions {
        SandboxOptions {
            lenient,
            timeout: Duration::from_millis(200),
            memory_limit: 16 * 1024 * 1024,
            http: HttpClient::new(&HttpSettings::default()).unwrap(),
            cancel: CancellationToken::new(),
        }
    }

    const COMPLETE: &str = r#"
        function SearchManga(query) return { { url = "/" .. query, name = query } } end
        function MangaChapters(url) return { { url = url .. "/1" } } end
        function ChapterPages(url) return { { url = url .. "/p1.png" } } end
    "#;

    #[test]
    fn loads_and_invokes_entry_points() {
        let sandbox = Sandbox::from_code(COMPLETE, "complete", &options(false)).unwrap();
        let entities = sandbox.invoke("SearchManga", "alpha").unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].url, "/alpha");
        assert_eq!(entities[0].index, 1);
    }

    #[test]
    fn strict_mode_rejects_missing_entry_point() {
        let code = r#"function SearchManga(q) return {} end
                      function ChapterPages(u) return {} end"#;
        let err = Sandbox::from_code(code, "partial", &options(false)).err().unwrap();
        assert!(matches!(
            err,
            KageError::MissingEntryPoint { ref function, .. } if function == "MangaChapters"
        ));
    }

    #[test]
    fn lenient_mode_defers_the_failure_to_the_call() {
        let code = r#"function SearchManga(q) return {} end"#;
        let sandbox = Sandbox::from_code(code, "partial", &options(true)).unwrap();
        assert_eq!(sandbox.missing(), &["MangaChapters", "ChapterPages"]);
        assert!(matches!(
            sandbox.invoke("MangaChapters", "/a"),
            Err(KageError::MissingEntryPoint { .. })
        ));
    }

    #[test]
    fn runaway_script_times_out() {
        let code = format!("{COMPLETE}\nfunction SearchManga(q) while true do end end");
        let sandbox = Sandbox::from_code(&code, "looping", &options(false)).unwrap();
        let started = Instant::now();
        let result = sandbox.invoke("SearchManga", "x");
        assert!(matches!(result, Err(KageError::Timeout(_))), "{result:?}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn runaway_top_level_times_out() {
        let result = Sandbox::from_code("while true do end", "stuck", &options(false));
        assert!(matches!(result, Err(KageError::Timeout(_))));
    }

    #[test]
    fn cancellation_interrupts_script() {
        let opts = options(false);
        opts.cancel.cancel();
        let code = format!("{COMPLETE}\nfunction SearchManga(q) while true do end end");
        // Top level finishes before the first hook tick.
        let sandbox = Sandbox::from_code(&code, "looping", &opts).unwrap();
        let result = sandbox.invoke("SearchManga", "x");
        assert!(matches!(result, Err(KageError::Cancelled(_))));
    }

    #[test]
    fn script_errors_carry_function_name() {
        let code = format!("{COMPLETE}\nfunction ChapterPages(u) error('site changed') end");
        let sandbox = Sandbox::from_code(&code, "broken", &options(false)).unwrap();
        let err = sandbox.invoke("ChapterPages", "/c").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("ChapterPages"), "{message}");
        assert!(message.contains("site changed"), "{message}");
    }

    #[test]
    fn dangerous_libraries_are_absent() {
        let code = format!(
            "{COMPLETE}\nHAS_IO = io ~= nil\nHAS_OS = os ~= nil\nHAS_DEBUG = debug ~= nil\n\
             HAS_DOFILE = dofile ~= nil\nHAS_LOADFILE = loadfile ~= nil\nHAS_LOAD = load ~= nil\n\
             HAS_DUMP = string.dump ~= nil or (\"\").dump ~= nil"
        );
        let sandbox = Sandbox::from_code(&code, "sealed", &options(false)).unwrap();
        let globals = sandbox.lua.globals();
        for flag in ["HAS_IO", "HAS_OS", "HAS_DEBUG", "HAS_DOFILE", "HAS_LOADFILE", "HAS_LOAD", "HAS_DUMP"] {
            assert!(!globals.get::<bool>(flag).unwrap(), "{flag}");
        }
    }

    #[test]
    fn host_files_cannot_be_executed() {
        let dir = tempfile::TempDir::new().unwrap();
        let secret = dir.path().join("secret.lua");
        std::fs::write(&secret, "return 'host secret'").unwrap();

        let code = format!(
            "{COMPLETE}\nfunction SearchManga(q) return {{ {{ url = dofile({:?}) }} }} end",
            secret.display().to_string()
        );
        let sandbox = Sandbox::from_code(&code, "reader", &options(false)).unwrap();
        let err = sandbox.invoke("SearchManga", "x").unwrap_err();
        assert!(matches!(err, KageError::Script { .. }), "{err}");
        assert!(!err.to_string().contains("host secret"), "{err}");
    }

    #[test]
    fn metamethods_do_not_run_during_marshalling() {
        let code = format!(
            "{COMPLETE}\nlocal spin = function() while true do end end\n\
             function SearchManga(q) return {{ setmetatable({{}}, {{ __index = spin }}) }} end\n\
             function ChapterPages(u) return setmetatable({{}}, {{ __pairs = spin }}) end"
        );
        let sandbox = Sandbox::from_code(&code, "tricky", &options(false)).unwrap();
        let started = Instant::now();

        let err = sandbox.invoke("SearchManga", "x").unwrap_err();
        assert!(err.to_string().contains("has no url"), "{err}");
        assert!(sandbox.invoke("ChapterPages", "/c").unwrap().is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn host_fetch_failures_keep_their_class() {
        let code = format!("{COMPLETE}\nfunction SearchManga(q) return fail(q) end");
        let sandbox = Sandbox::from_code(&code, "fetching", &options(false)).unwrap();
        let fail = sandbox
            .lua
            .create_function(|_, url: String| -> mlua::Result<Value> {
                Err(mlua::Error::external(KageError::fetch(url, "unexpected status 503")))
            })
            .unwrap();
        sandbox.lua.globals().set("fail", fail).unwrap();

        let err = sandbox.invoke("SearchManga", "https://site.example/list").unwrap_err();
        assert!(matches!(err, KageError::Fetch { ref url, .. } if url == "https://site.example/list"), "{err}");
        assert!(err.is_retryable());
    }
}
