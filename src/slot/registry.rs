//! Named hooks resolved from dynamic records.
//!
//! Hook pipelines described in configuration arrive as JSON records of the
//! form `{"mode": 0|1|2, "fn": "<name>", "par": <any>}` (or an array of
//! them). The registry maps each `fn` to a registered callback and builds
//! the matching [`Hook`].

use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use super::error::{HookError, SlotError, SlotResult};
use super::hook::{self, Hook, HookBatch, Incremental, Step};
use super::multiplexer::Multiplexer;
use super::value::SlotValue;

type SharedOnComplete = Rc<dyn Fn(&mut Multiplexer, &str, Option<&Value>)>;
type SharedFinisher = Rc<dyn Fn(SlotValue, Option<&Value>) -> Step>;
type SharedTransform = Rc<dyn Fn(SlotValue, Option<&Value>) -> Result<SlotValue, HookError>>;

/// Registry of named hook callbacks.
///
/// # Example
///
/// ```ignore
/// let mut registry = HookRegistry::with_builtins();
/// registry.register_transform("double", |value, _| {
///     Ok(SlotValue::from(value.as_i64().unwrap_or(0) * 2))
/// });
///
/// let batch = registry.resolve(&json!([
///     {"mode": 2, "fn": "json"},
///     {"mode": 1, "fn": "field", "par": "data"},
/// ]))?;
/// mux.push_hook("report", batch)?;
/// ```
#[derive(Default)]
pub struct HookRegistry {
    on_complete: HashMap<String, SharedOnComplete>,
    finishers: HashMap<String, SharedFinisher>,
    transforms: HashMap<String, SharedTransform>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the stock hooks:
    /// `log` (mode 0), `field` (mode 1, `par` is the key) and `json` (mode 2).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_on_complete("log", |mux, name, _| hook::report_completion(mux, name));
        registry.register_finisher("field", |value, par| {
            let key = par.and_then(Value::as_str).unwrap_or_default().to_string();
            Step::suspend(move || hook::project(value, &key))
        });
        registry.register_transform("json", |value, _| Ok(SlotValue::Json(value.into_json()?)));
        registry
    }

    pub fn register_on_complete(
        &mut self,
        name: impl Into<String>,
        callback: impl Fn(&mut Multiplexer, &str, Option<&Value>) + 'static,
    ) -> &mut Self {
        self.on_complete.insert(name.into(), Rc::new(callback));
        self
    }

    pub fn register_finisher(
        &mut self,
        name: impl Into<String>,
        start: impl Fn(SlotValue, Option<&Value>) -> Step + 'static,
    ) -> &mut Self {
        self.finishers.insert(name.into(), Rc::new(start));
        self
    }

    pub fn register_transform(
        &mut self,
        name: impl Into<String>,
        transform: impl Fn(SlotValue, Option<&Value>) -> Result<SlotValue, HookError> + 'static,
    ) -> &mut Self {
        self.transforms.insert(name.into(), Rc::new(transform));
        self
    }

    /// Build a hook batch from one record or an array of records.
    ///
    /// # Errors
    ///
    /// Returns `MalformedHook` if the value is neither an object nor an
    /// array, if any record lacks an integer `mode` or a string `fn`, names
    /// an unknown mode, or names a function that is not registered. Nothing
    /// is built when any record is rejected.
    pub fn resolve(&self, records: &Value) -> SlotResult<HookBatch> {
        match records {
            Value::Object(_) => Ok(HookBatch::from(self.resolve_record(records, 0)?)),
            Value::Array(records) => records
                .iter()
                .enumerate()
                .map(|(index, record)| self.resolve_record(record, index))
                .collect::<SlotResult<Vec<_>>>()
                .map(HookBatch::from),
            other => Err(SlotError::malformed(format!(
                "expected an object or an array, got {}",
                describe(other)
            ))),
        }
    }

    fn resolve_record(&self, record: &Value, index: usize) -> SlotResult<Hook> {
        let Value::Object(fields) = record else {
            return Err(SlotError::malformed(format!(
                "hook #{} is {}, not an object",
                index,
                describe(record)
            )));
        };

        let mode = fields.get("mode").and_then(Value::as_u64).ok_or_else(|| {
            SlotError::malformed(format!("hook #{} has no integer `mode`", index))
        })?;
        let name = fields.get("fn").and_then(Value::as_str).ok_or_else(|| {
            SlotError::malformed(format!("hook #{} has no string `fn`", index))
        })?;
        let param = fields.get("par").cloned();

        let unknown = || {
            SlotError::malformed(format!(
                "hook #{} names unregistered mode-{} function '{}'",
                index, mode, name
            ))
        };

        match mode {
            0 => {
                let callback = self.on_complete.get(name).cloned().ok_or_else(unknown)?;
                Ok(Hook::OnComplete {
                    callback: Box::new(
                        move |mux: &mut Multiplexer, slot: &str, par: Option<&Value>| {
                            callback(mux, slot, par)
                        },
                    ),
                    param,
                })
            }
            1 => {
                let start = self.finishers.get(name).cloned().ok_or_else(unknown)?;
                Ok(Hook::Incremental(Incremental::new(move |value| {
                    start(value, param.as_ref())
                })))
            }
            2 => {
                let transform = self.transforms.get(name).cloned().ok_or_else(unknown)?;
                Ok(Hook::transform(move |value| transform(value, param.as_ref())))
            }
            other => Err(SlotError::malformed(format!(
                "hook #{} has unknown mode {}; expected 0, 1 or 2",
                index, other
            ))),
        }
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
