//! WASM-hosted converter backend
//!
//! Runs an HTML → Markdown converter compiled to WebAssembly inside a
//! wasmtime instance. The instance (store, linear memory, compiled code) is
//! the expensive part to keep resident, so this backend is registered as
//! [`Footprint::Heavy`](crate::backend::Footprint) and released by
//! [`Converter::dispose`] when the user goes idle.
//!
//! # Module ABI
//!
//! The guest module must export:
//!
//! | Export    | Signature              | Purpose                                  |
//! |-----------|------------------------|------------------------------------------|
//! | `memory`  | linear memory          | shared buffer for input and output       |
//! | `alloc`   | `(len: i32) -> i32`    | reserve `len` bytes, return the offset   |
//! | `convert` | `(ptr: i32, len: i32) -> i64` | convert UTF-8 HTML at `ptr..ptr+len` |
//!
//! `convert` returns the output location packed as `(ptr << 32) | len`; the
//! output must be UTF-8 Markdown. A trap inside the guest becomes a
//! [`ConversionError::ConverterFailure`] for this backend only.
//!
//! Guest code runs on tokio's blocking pool, never on an executor thread.
//! Each call gets a fuel budget; a guest that exhausts it traps.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use wasmtime::{Engine, Instance, Memory, Module, Store, TypedFunc};

/// Fuel granted to each `convert` call unless configured otherwise
///
/// One unit is roughly one guest instruction.
pub const DEFAULT_FUEL: u64 = 10_000_000_000;

use crate::backend::Converter;
use crate::error::ConversionError;

/// Live instance of the guest module
struct GuestInstance {
    store: Store<()>,
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
    convert: TypedFunc<(i32, i32), i64>,
}

impl GuestInstance {
    fn instantiate(name: &str, engine: &Engine, module: &Module) -> Result<Self, ConversionError> {
        let load_failure = |message: String| ConversionError::LoadFailure {
            name: name.to_string(),
            message,
        };

        let mut store = Store::new(engine, ());
        let instance = Instance::new(&mut store, module, &[])
            .map_err(|e| load_failure(format!("instantiation failed: {e}")))?;
        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| load_failure("module does not export `memory`".to_string()))?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, "alloc")
            .map_err(|e| load_failure(format!("invalid `alloc` export: {e}")))?;
        let convert = instance
            .get_typed_func::<(i32, i32), i64>(&mut store, "convert")
            .map_err(|e| load_failure(format!("invalid `convert` export: {e}")))?;

        Ok(Self {
            store,
            memory,
            alloc,
            convert,
        })
    }

    fn run(&mut self, name: &str, html: &str, fuel: u64) -> Result<String, ConversionError> {
        self.store
            .set_fuel(fuel)
            .map_err(|e| ConversionError::failure(name, format!("cannot set fuel: {e}")))?;

        let input = html.as_bytes();
        let len = i32::try_from(input.len())
            .map_err(|_| ConversionError::InvalidInput(format!("input of {} bytes is too large", input.len())))?;

        let ptr = self
            .alloc
            .call(&mut self.store, len)
            .map_err(|e| ConversionError::failure(name, format!("alloc trapped: {e}")))?;
        self.memory
            .write(&mut self.store, ptr as u32 as usize, input)
            .map_err(|e| ConversionError::failure(name, format!("input out of bounds: {e}")))?;

        let packed = self
            .convert
            .call(&mut self.store, (ptr, len))
            .map_err(|e| ConversionError::failure(name, format!("convert trapped: {e}")))?;

        let out_ptr = (packed as u64 >> 32) as usize;
        let out_len = (packed as u64 & 0xffff_ffff) as usize;
        let mut output = vec![0u8; out_len];
        self.memory
            .read(&self.store, out_ptr, &mut output)
            .map_err(|e| ConversionError::failure(name, format!("output out of bounds: {e}")))?;

        String::from_utf8(output)
            .map_err(|e| ConversionError::failure(name, format!("output is not UTF-8: {e}")))
    }
}

/// Converter running inside a wasmtime instance
pub struct WasmConverter {
    name: String,
    instance: Arc<Mutex<Option<GuestInstance>>>,
    fuel: u64,
}

impl WasmConverter {
    /// Compile and instantiate a module from its binary (or text) form
    ///
    /// # Errors
    ///
    /// - `ConversionError::LoadFailure`: the module does not compile, or does
    ///   not export the expected ABI
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Result<Self, ConversionError> {
        let name = name.into();
        let mut engine_config = wasmtime::Config::new();
        engine_config.consume_fuel(true);
        let engine = Engine::new(&engine_config).map_err(|e| ConversionError::LoadFailure {
            name: name.clone(),
            message: format!("engine setup failed: {e}"),
        })?;
        let module = Module::new(&engine, bytes).map_err(|e| ConversionError::LoadFailure {
            name: name.clone(),
            message: format!("compilation failed: {e}"),
        })?;
        let instance = GuestInstance::instantiate(&name, &engine, &module)?;

        tracing::debug!(converter = %name, "instantiated wasm module");
        Ok(Self {
            name,
            instance: Arc::new(Mutex::new(Some(instance))),
            fuel: DEFAULT_FUEL,
        })
    }

    /// Fuel budget for each conversion
    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = fuel;
        self
    }

    /// Read, compile and instantiate a module file
    pub async fn load(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, ConversionError> {
        let name = name.into();
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ConversionError::LoadFailure {
                name: name.clone(),
                message: format!("failed to read {}: {e}", path.display()),
            })?;
        Self::from_bytes(name, &bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the guest instance is still resident
    pub fn is_resident(&self) -> bool {
        self.instance
            .lock()
            .map(|instance| instance.is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl Converter for WasmConverter {
    async fn convert(&self, html: &str) -> Result<String, ConversionError> {
        let instance = Arc::clone(&self.instance);
        let name = self.name.clone();
        let html = html.to_owned();
        let fuel = self.fuel;

        tokio::task::spawn_blocking(move || {
            let mut guard = instance
                .lock()
                .map_err(|_| ConversionError::failure(&name, "instance lock poisoned"))?;
            let guest = guard
                .as_mut()
                .ok_or_else(|| ConversionError::failure(&name, "module has been disposed"))?;
            guest.run(&name, &html, fuel)
        })
        .await
        .map_err(|e| ConversionError::failure(&self.name, format!("guest task failed: {e}")))?
    }

    fn dispose(&self) -> Result<(), ConversionError> {
        let mut guard = self.instance.lock().map_err(|_| ConversionError::ReclaimFailure {
            name: self.name.clone(),
            message: "instance lock poisoned".to_string(),
        })?;
        if guard.take().is_some() {
            tracing::debug!(converter = %self.name, "released wasm instance");
        }
        Ok(())
    }
}
