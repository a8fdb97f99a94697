//! Literal and transform parsing for configurable commands.
//!
//! Transforms are single-argument numeric functions written in Lua
//! expression syntax (`x * 2`, `x => x + 10`, `function(v) return v / 2 end`).
//! They are compiled into a sandboxed Lua state: the math library plus the
//! side-effect free parts of the base library, with an instruction budget per
//! call.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use mlua::{
    Function, HookTriggers, Lua, LuaOptions, RegistryKey, StdLib, Value as LuaValue,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as Json;
use thiserror::Error;

/// Input used to validate a freshly compiled transform.
pub const PROBE_INPUT: f64 = 1.0;

/// Base library globals removed from the transform state.
const HIDDEN_GLOBALS: &[&str] = &[
    "dofile",
    "loadfile",
    "load",
    "loadstring",
    "require",
    "module",
    "collectgarbage",
    "getfenv",
    "setfenv",
    "pcall",
    "xpcall",
    "newproxy",
];

/// Instructions between two budget checks.
const HOOK_STRIDE: u32 = 1_000;

/// Budget checks one call may pass before it is aborted.
const MAX_HOOK_TICKS: u32 = 1_000;

static ARROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*\(?\s*([A-Za-z_][A-Za-z0-9_]*)\s*\)?\s*=>\s*(.+)$")
        .expect("arrow regex compiles")
});

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("lua state unavailable: {0}")]
    Setup(String),
    #[error("could not compile `{source_text}`: {message}")]
    Compile {
        source_text: String,
        message: String,
    },
    #[error("evaluation failed: {0}")]
    Eval(String),
    #[error("transform returned {0}, expected a number")]
    NonNumeric(&'static str),
}

/// Owns the Lua state every transform is compiled into.
#[derive(Clone)]
pub struct TransformEngine {
    lua: Rc<Lua>,
    ticks: Rc<Cell<u32>>,
}

impl TransformEngine {
    pub fn new() -> Result<Self, TransformError> {
        let setup = |err: mlua::Error| TransformError::Setup(err.to_string());
        let lua = Lua::new_with(StdLib::MATH, LuaOptions::default()).map_err(setup)?;
        let globals = lua.globals();
        for name in HIDDEN_GLOBALS {
            globals.set(*name, LuaValue::Nil).map_err(setup)?;
        }
        drop(globals);

        let ticks = Rc::new(Cell::new(0u32));
        let counter = Rc::clone(&ticks);
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(HOOK_STRIDE),
            move |_, _| {
                let spent = counter.get().saturating_add(1);
                counter.set(spent);
                if spent > MAX_HOOK_TICKS {
                    return Err(mlua::Error::RuntimeError(
                        "instruction budget exceeded".to_string(),
                    ));
                }
                Ok(())
            },
        );
        Ok(Self {
            lua: Rc::new(lua),
            ticks,
        })
    }

    /// Compile `source` and check that it maps [`PROBE_INPUT`] to a number.
    pub fn compile(&self, source: &str) -> Result<Transform, TransformError> {
        let source = source.trim();
        let function = self.compile_function(source)?;
        let key = self
            .lua
            .create_registry_value(function)
            .map_err(|err| TransformError::Setup(err.to_string()))?;
        let transform = Transform {
            source: source.to_string(),
            lua: Rc::clone(&self.lua),
            ticks: Rc::clone(&self.ticks),
            key: Rc::new(key),
        };
        transform.apply(PROBE_INPUT)?;
        Ok(transform)
    }

    fn compile_function(&self, source: &str) -> Result<Function<'_>, TransformError> {
        self.ticks.set(0);
        let compile_error = |err: mlua::Error| TransformError::Compile {
            source_text: source.to_string(),
            message: err.to_string(),
        };

        // A complete function literal is used as is.
        if source.starts_with("function") {
            let value: LuaValue = self
                .lua
                .load(source)
                .eval()
                .map_err(compile_error)?;
            return match value {
                LuaValue::Function(function) => Ok(function),
                other => Err(TransformError::Compile {
                    source_text: source.to_string(),
                    message: format!("evaluated to {}", other.type_name()),
                }),
            };
        }

        let (param, body) = match ARROW_RE.captures(source) {
            Some(captures) => (
                captures.get(1).map_or("x", |m| m.as_str()),
                captures.get(2).map_or(source, |m| m.as_str()),
            ),
            None => ("x", source),
        };
        let chunk = format!("return function({param}) return ({body}) end");
        self.lua
            .load(chunk.as_str())
            .eval::<Function>()
            .map_err(compile_error)
    }
}

/// A compiled single-argument numeric transform.
#[derive(Clone)]
pub struct Transform {
    source: String,
    lua: Rc<Lua>,
    ticks: Rc<Cell<u32>>,
    key: Rc<RegistryKey>,
}

impl Transform {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn apply(&self, input: f64) -> Result<f64, TransformError> {
        let function: Function = self
            .lua
            .registry_value(&self.key)
            .map_err(|err| TransformError::Eval(err.to_string()))?;
        self.ticks.set(0);
        let output: LuaValue = function
            .call(input)
            .map_err(|err| TransformError::Eval(err.to_string()))?;
        match output {
            LuaValue::Number(n) => Ok(n),
            LuaValue::Integer(i) => Ok(i as f64),
            other => Err(TransformError::NonNumeric(other.type_name())),
        }
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transform").field(&self.source).finish()
    }
}

/// Value supplied to a configurable command.
#[derive(Debug, Clone)]
pub enum ParsedValue {
    Literal(Json),
    Transform(Transform),
}

impl fmt::Display for ParsedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(json) => write!(f, "{json}"),
            Self::Transform(transform) => write!(f, "transform `{}`", transform.source()),
        }
    }
}

/// Strict JSON literal first, transform second.
pub fn parse_value(engine: &TransformEngine, raw: &str) -> Result<ParsedValue, TransformError> {
    let raw = raw.trim();
    if let Ok(literal) = serde_json::from_str::<Json>(raw) {
        return Ok(ParsedValue::Literal(literal));
    }
    engine.compile(raw).map(ParsedValue::Transform)
}
