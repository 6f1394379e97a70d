//! Module loader: the import engine.
//!
//! # Design
//!
//! - One cache keyed by resolved absolute path; an in-flight sentinel
//!   doubles as the cycle detector. Completed entries (successes and
//!   failures alike) replay without re-evaluating.
//! - Suffix classification: `.proto` files parse through the schema front
//!   end and export message constructors; everything else evaluates as a
//!   script module with this loader as its `load` callback.
//! - After the entry module loads, the validator pass re-runs each
//!   recorded schema's `-validator` companion through the same cache with
//!   `add_validator` enabled.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

use forma_script::eval::builtins;
use forma_script::{EvalError, EvalErrorKind, Evaluator, ModuleImporter, SourceInfo, Value};
use forma_schema::{SchemaError, TypeRegistry};

use crate::bridge::{MessageType, SharedRegistry};
use crate::emit;
use crate::error::{CompileError, Result};
use crate::paths::{self, SCHEMA_EXT, VALIDATOR_SUFFIX};
use crate::reader::ModuleReader;
use crate::validators::{add_validator_builtin, ErrorStash, ValidatorRegistry};

/// A loaded module's exported top-level bindings.
pub type Globals = IndexMap<String, Value>;

enum CacheEntry {
    /// Evaluation in progress; a lookup hitting this is an import cycle.
    InFlight,
    Done(std::result::Result<Globals, Rc<CompileError>>),
}

/// Per-compilation import engine. See module docs.
pub struct Loader {
    reader: ModuleReader,
    registry: SharedRegistry,
    validators: Rc<RefCell<ValidatorRegistry>>,
    validator_phase: Rc<Cell<bool>>,
    stash: ErrorStash,
    universe: Globals,
    cache: HashMap<PathBuf, CacheEntry>,
}

impl Loader {
    pub fn new(project_root: &Path) -> Result<Self> {
        let reader = ModuleReader::new(&paths::source_root(project_root))?;
        let registry: SharedRegistry = Rc::new(RefCell::new(TypeRegistry::new()));
        emit::register_envelope(&mut registry.borrow_mut())?;

        let validators = Rc::new(RefCell::new(ValidatorRegistry::default()));
        let validator_phase = Rc::new(Cell::new(false));
        let stash: ErrorStash = Rc::new(RefCell::new(None));

        let mut universe = builtins::universe();
        universe.insert(
            "add_validator".to_string(),
            add_validator_builtin(
                validators.clone(),
                validator_phase.clone(),
                stash.clone(),
            ),
        );

        Ok(Self {
            reader,
            registry,
            validators,
            validator_phase,
            stash,
            universe,
            cache: HashMap::new(),
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn validators(&self) -> Rc<RefCell<ValidatorRegistry>> {
        self.validators.clone()
    }

    /// The built-in universe modules evaluate under (including the gated
    /// `add_validator`).
    pub fn universe(&self) -> &Globals {
        &self.universe
    }

    /// Load the entry module of a compilation, by source-root-relative name.
    pub fn load_entry(&mut self, name: &str) -> Result<Globals> {
        self.load_module(name, None)
    }

    fn load_module(&mut self, name: &str, from: Option<&Path>) -> Result<Globals> {
        let path = self.reader.resolve(name, from)?;
        self.load_path(&path)
    }

    fn load_path(&mut self, path: &Path) -> Result<Globals> {
        match self.cache.get(path) {
            Some(CacheEntry::Done(Ok(globals))) => {
                debug!(module = %path.display(), "load cache hit");
                return Ok(globals.clone());
            }
            Some(CacheEntry::Done(Err(error))) => {
                return Err(CompileError::Shared(error.clone()));
            }
            Some(CacheEntry::InFlight) => {
                return Err(CompileError::ImportCycle {
                    path: path.to_path_buf(),
                });
            }
            None => {}
        }
        self.cache
            .insert(path.to_path_buf(), CacheEntry::InFlight);
        debug!(module = %path.display(), "loading");

        let is_schema = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(SCHEMA_EXT));
        let result = if is_schema {
            self.load_schema(path)
        } else {
            self.load_script(path)
        };

        match result {
            Ok(globals) => {
                self.cache.insert(
                    path.to_path_buf(),
                    CacheEntry::Done(Ok(globals.clone())),
                );
                Ok(globals)
            }
            Err(error) => {
                let shared = Rc::new(error);
                self.cache.insert(
                    path.to_path_buf(),
                    CacheEntry::Done(Err(shared.clone())),
                );
                Err(CompileError::Shared(shared))
            }
        }
    }

    /// Parse a schema file (and its import closure) into the registry and
    /// expose its top-level message types as constructors.
    fn load_schema(&mut self, path: &Path) -> Result<Globals> {
        let rel = self.reader.rel_to_root(path).ok_or_else(|| {
            CompileError::UnresolvedImport {
                name: path.display().to_string(),
                from: String::new(),
                reason: "schema path is outside the source root".to_string(),
            }
        })?;

        let compiled = {
            let mut adapter = ProtoImportAdapter {
                reader: &mut self.reader,
                stash: &self.stash,
            };
            let mut registry = self.registry.borrow_mut();
            forma_schema::compile_file(&rel, &mut adapter, &mut registry)
        };
        compiled.map_err(|e| self.stashed_or(CompileError::Schema(e)))?;

        let registry = self.registry.borrow();
        let mut globals = Globals::new();
        for full_name in registry.file_messages(&rel) {
            let descriptor = registry.message(full_name)?;
            let short_name = descriptor.name.clone();
            globals.insert(
                short_name,
                Value::native(MessageType::new(descriptor, self.registry.clone())),
            );
        }
        Ok(globals)
    }

    /// Evaluate a script module with this loader as its `load` callback.
    fn load_script(&mut self, path: &Path) -> Result<Globals> {
        let bytes = self.reader.read(path)?;
        let source =
            String::from_utf8(bytes).map_err(|_| CompileError::ScriptParse {
                path: path.to_path_buf(),
                line: 0,
                col: 0,
                message: "module is not valid UTF-8".to_string(),
            })?;
        let info = SourceInfo::new(path.to_path_buf(), &source);
        let module = forma_script::parse(&source).map_err(|e| {
            let (line, col) = info.line_col(e.span.start);
            CompileError::ScriptParse {
                path: path.to_path_buf(),
                line,
                col,
                message: e.message,
            }
        })?;

        let result = {
            let universe = self.universe.clone();
            let mut evaluator = Evaluator::with_importer(universe, self);
            evaluator.eval_module(info, &module)
        };
        match result {
            Ok(bindings) => Ok(bindings.borrow().clone()),
            Err(error) => Err(self.stashed_or(CompileError::Script {
                path: path.to_path_buf(),
                error,
            })),
        }
    }

    /// Prefer a structured error stashed during nested evaluation over the
    /// flattened script error.
    fn stashed_or(&self, fallback: CompileError) -> CompileError {
        self.stash.borrow_mut().take().unwrap_or(fallback)
    }

    /// Run each recorded schema's validator companion file, with
    /// `add_validator` enabled.
    pub fn run_validator_pass(&mut self) -> Result<()> {
        let trail: Vec<PathBuf> = self.reader.proto_trail().to_vec();
        for proto in trail {
            let companion = companion_path(&proto);
            match fs::metadata(&companion) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(CompileError::Io {
                        path: companion,
                        source: e,
                    });
                }
                Ok(meta) if meta.is_dir() => {
                    return Err(CompileError::ValidatorIsDirectory { path: companion });
                }
                Ok(_) => {}
            }
            debug!(validator = %companion.display(), "running validator file");
            self.validator_phase.set(true);
            let result = self.load_path(&companion);
            self.validator_phase.set(false);
            result?;
        }
        Ok(())
    }
}

/// `<schema>.proto` → `<schema>.proto-validator`.
fn companion_path(proto: &Path) -> PathBuf {
    let mut name = proto.as_os_str().to_os_string();
    name.push(VALIDATOR_SUFFIX);
    PathBuf::from(name)
}

impl ModuleImporter for Loader {
    fn load(&mut self, module: &str, from: &Path) -> std::result::Result<Globals, EvalError> {
        match self.load_module(module, Some(from)) {
            Ok(globals) => Ok(globals),
            Err(error) => {
                let message = error.to_string();
                if self.stash.borrow().is_none() {
                    *self.stash.borrow_mut() = Some(error);
                }
                Err(EvalError::new(EvalErrorKind::Import, message))
            }
        }
    }
}

/// Routes the schema front end's import reads through the module reader,
/// keeping the sandbox and the proto trail intact.
struct ProtoImportAdapter<'a> {
    reader: &'a mut ModuleReader,
    stash: &'a ErrorStash,
}

impl forma_schema::ImportReader for ProtoImportAdapter<'_> {
    fn read(&mut self, file: &str) -> std::result::Result<String, SchemaError> {
        let import_error = |message: String| SchemaError::Import {
            file: file.to_string(),
            message,
        };

        let path = match self.reader.resolve(&format!("/{file}"), None) {
            Ok(path) => path,
            Err(error) => {
                let message = error.to_string();
                if self.stash.borrow().is_none() {
                    *self.stash.borrow_mut() = Some(error);
                }
                return Err(import_error(message));
            }
        };
        let bytes = match self.reader.read(&path) {
            Ok(bytes) => bytes,
            Err(error) => {
                let message = error.to_string();
                if self.stash.borrow().is_none() {
                    *self.stash.borrow_mut() = Some(error);
                }
                return Err(import_error(message));
            }
        };
        String::from_utf8(bytes).map_err(|_| import_error("not valid UTF-8".to_string()))
    }
}
