//! Module index: one record per loaded module, the source index fill,
//! the just-my-code attribute pass, and name-based function resolution.

use crate::sources::{MethodRange, ResolvedSite, SnappedPoint, SourceIndex};
use netdbg_core::runtime::{MetadataReader, ModuleRef, RuntimeModule};
use netdbg_core::symbols::{SequencePoint, SymbolReader};
use netdbg_core::types::{IlOffset, MethodToken, ModuleAddress};
use netdbg_protocol::{Module as ModuleEventRecord, SymbolStatus};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Custom attributes that mark a type as non-user code.
const NON_USER_TYPE_ATTRIBUTES: &[&str] = &[
    "System.Diagnostics.DebuggerNonUserCodeAttribute",
    "System.Diagnostics.DebuggerStepThroughAttribute",
];

/// Custom attributes that mark a method as non-user code.
/// `DebuggerHidden` applies to methods only.
const NON_USER_METHOD_ATTRIBUTES: &[&str] = &[
    "System.Diagnostics.DebuggerNonUserCodeAttribute",
    "System.Diagnostics.DebuggerStepThroughAttribute",
    "System.Diagnostics.DebuggerHiddenAttribute",
];

/// One indexed module. Dropping the record releases the symbol reader
/// and the strong module reference.
pub struct ModuleRecord {
    /// Strong reference to the runtime module object.
    pub module: ModuleRef,
    /// Full path of the module file.
    pub path: String,
    /// File name of the module.
    pub name: String,
    /// Stable GUID-derived id.
    pub id: Uuid,
    /// Symbol reader, absent when the module shipped no debug info.
    pub symbols: Option<Arc<dyn SymbolReader>>,
}

/// What a module load produced.
pub struct ModuleLoadOutcome {
    /// Record for the `module(new)` event.
    pub record: ModuleEventRecord,
    /// Release-build advisory to surface on the console, when the
    /// runtime refused module-level just-my-code.
    pub advisory: Option<String>,
}

/// A line resolved against the index, carrying the module reference a
/// breakpoint install needs.
pub struct LineSite {
    /// Module owning the site.
    pub module: ModuleRef,
    /// Method owning the site.
    pub method: MethodToken,
    /// Snapped IL offset.
    pub il_offset: IlOffset,
    /// First line of the snapped statement.
    pub start_line: u32,
    /// Last line of the snapped statement.
    pub end_line: u32,
}

/// The module index.
pub struct Modules {
    records: Mutex<BTreeMap<ModuleAddress, ModuleRecord>>,
    sources: Arc<SourceIndex>,
}

fn file_name(path: &str) -> String {
    path.rsplit(['/', '\\']).next().unwrap_or(path).to_string()
}

/// Right-anchored dotted-name match: `"Foo"` matches `Ns.Cls.Foo`;
/// `"Cls.Foo"` matches `Ns.Cls.Foo` and `Ns2.Cls.Foo`.
fn is_target_function(full_name: &[&str], target: &[&str]) -> bool {
    if target.len() > full_name.len() {
        return false;
    }
    full_name
        .iter()
        .rev()
        .zip(target.iter().rev())
        .all(|(a, b)| a == b)
}

impl Modules {
    /// Create an index writing into `sources`.
    #[must_use]
    pub fn new(sources: Arc<SourceIndex>) -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            sources,
        }
    }

    /// Handle a module-load callback: open symbols, configure JIT and
    /// just-my-code, fill the source index, insert the record, and
    /// describe the `module(new)` event to emit.
    pub fn on_module_load(&self, module: &ModuleRef, just_my_code: bool) -> ModuleLoadOutcome {
        let address = module.base_address();
        let path = module.path();
        let name = file_name(&path);
        let mut advisory = None;

        let symbols = match module.load_symbols() {
            Ok(symbols) => Some(symbols),
            Err(err) => {
                debug!(%address, module = %name, %err, "no symbols for module");
                None
            }
        };

        if symbols.is_some() {
            if !just_my_code {
                // Without just-my-code we want unoptimized code so that
                // breakpoints in any module bind reliably.
                if let Err(err) = module.set_jit_disable_optimization() {
                    warn!(module = %name, %err, "could not disable JIT optimization");
                }
            }

            match module.set_jmc(true) {
                Ok(true) => {
                    if just_my_code {
                        Self::disable_jmc_by_attributes(module);
                    }
                }
                Ok(false) => {
                    advisory = Some(if just_my_code {
                        format!(
                            "You are debugging a Release build of {name}. Using Just My Code \
                             with Release builds using compiler optimizations results in a \
                             degraded debugging experience (e.g. breakpoints will not be hit)."
                        )
                    } else {
                        format!(
                            "You are debugging a Release build of {name}. Without Just My Code \
                             Release builds try not to use compiler optimizations, but in some \
                             cases (e.g. attach) this still results in a degraded debugging \
                             experience (e.g. breakpoints will not be hit)."
                        )
                    });
                }
                Err(err) => warn!(module = %name, %err, "could not set module JMC status"),
            }

            if let Some(symbols) = &symbols {
                self.fill_sources(address, &module.metadata(), symbols.as_ref());
            }
        }

        let id = match module.mvid() {
            Ok(id) => id,
            Err(err) => {
                warn!(module = %name, %err, "module has no readable mvid");
                Uuid::nil()
            }
        };

        let symbol_status = if symbols.is_some() {
            SymbolStatus::Loaded
        } else {
            SymbolStatus::NotFound
        };

        let record = ModuleRecord {
            module: Arc::clone(module),
            path: path.clone(),
            name: name.clone(),
            id,
            symbols,
        };
        self.records.lock().insert(address, record);
        debug!(%address, module = %name, ?symbol_status, "module indexed");

        ModuleLoadOutcome {
            record: ModuleEventRecord {
                id: id.to_string(),
                name,
                path,
                symbol_status,
            },
            advisory,
        }
    }

    /// Handle a module-unload callback. Returns the record for the
    /// `module(removed)` event when the module was known.
    pub fn on_module_unload(&self, module: &ModuleRef) -> Option<ModuleEventRecord> {
        let address = module.base_address();
        let record = self.records.lock().remove(&address)?;
        self.sources.remove_module(address);
        Some(ModuleEventRecord {
            id: record.id.to_string(),
            name: record.name,
            path: record.path,
            symbol_status: SymbolStatus::NotFound,
        })
    }

    /// Drop every record (session end).
    pub fn clear(&self) {
        self.records.lock().clear();
        self.sources.clear();
    }

    /// Run `f` over the record at `address`.
    pub fn with_record<R>(
        &self,
        address: ModuleAddress,
        f: impl FnOnce(&ModuleRecord) -> R,
    ) -> Option<R> {
        self.records.lock().get(&address).map(f)
    }

    /// The symbol reader of a module, when one loaded.
    #[must_use]
    pub fn symbols(&self, address: ModuleAddress) -> Option<Arc<dyn SymbolReader>> {
        self.records
            .lock()
            .get(&address)
            .and_then(|record| record.symbols.clone())
    }

    /// The module reference at `address`.
    #[must_use]
    pub fn module(&self, address: ModuleAddress) -> Option<ModuleRef> {
        self.records
            .lock()
            .get(&address)
            .map(|record| Arc::clone(&record.module))
    }

    /// Scan records for a module with the given file name.
    #[must_use]
    pub fn find_by_name(&self, filename: &str) -> Option<ModuleRef> {
        self.records
            .lock()
            .values()
            .find(|record| record.name == filename)
            .map(|record| Arc::clone(&record.module))
    }

    /// Iterate every indexed module.
    pub fn for_each_module(&self, mut f: impl FnMut(&ModuleRef)) {
        for record in self.records.lock().values() {
            f(&record.module);
        }
    }

    /// Resolve a dotted function name across every module. The name is
    /// matched as a right-anchored dotted suffix; generic methods get a
    /// `<T,U>` arity suffix before matching. A failure inside one
    /// module never aborts the iteration.
    pub fn resolve_function(&self, name: &str, mut cb: impl FnMut(&ModuleRef, MethodToken)) {
        let records = self.records.lock();
        for record in records.values() {
            Self::resolve_function_with(&record.module, name, &mut cb);
        }
    }

    /// Resolve a dotted function name inside one module.
    pub fn resolve_function_in_module(
        &self,
        module: &ModuleRef,
        name: &str,
        mut cb: impl FnMut(&ModuleRef, MethodToken),
    ) {
        Self::resolve_function_with(module, name, &mut cb);
    }

    fn resolve_function_with(
        module: &ModuleRef,
        name: &str,
        cb: &mut impl FnMut(&ModuleRef, MethodToken),
    ) {
        let target: Vec<&str> = name.split('.').collect();
        let metadata = module.metadata();
        for ty in metadata.type_defs() {
            for method in metadata.methods(ty.token) {
                let generics = metadata.generic_params(method.token);
                let mut full = format!("{}.{}", ty.name, method.name);
                if !generics.is_empty() {
                    full.push('<');
                    full.push_str(&generics.join(","));
                    full.push('>');
                }
                let segments: Vec<&str> = full.split('.').collect();
                if is_target_function(&segments, &target) {
                    cb(module, method.token);
                }
            }
        }
    }

    /// Resolve `(file, line)` against every module.
    #[must_use]
    pub fn resolve_line(&self, file: &str, line: u32) -> Vec<LineSite> {
        self.resolve_line_impl(file, line, None)
    }

    /// Resolve `(file, line)` against one newly loaded module.
    #[must_use]
    pub fn resolve_line_in_module(
        &self,
        module: &ModuleRef,
        file: &str,
        line: u32,
    ) -> Vec<LineSite> {
        self.resolve_line_impl(file, line, Some(module.base_address()))
    }

    fn resolve_line_impl(
        &self,
        file: &str,
        line: u32,
        module_filter: Option<ModuleAddress>,
    ) -> Vec<LineSite> {
        // Lock order: modules before sources.
        let records = self.records.lock();
        let sites: Vec<ResolvedSite> =
            self.sources
                .resolve(file, module_filter, line, |address, token, line| {
                    let symbols = records.get(&address)?.symbols.as_ref()?;
                    snap_to_user_code(symbols.as_ref(), token, line)
                });

        sites
            .into_iter()
            .filter_map(|site| {
                let module = Arc::clone(&records.get(&site.module)?.module);
                Some(LineSite {
                    module,
                    method: site.method,
                    il_offset: site.il_offset,
                    start_line: site.start_line,
                    end_line: site.end_line,
                })
            })
            .collect()
    }

    /// Walk types and methods, disabling just-my-code on everything the
    /// compiler marked non-user.
    fn disable_jmc_by_attributes(module: &ModuleRef) {
        let metadata: Arc<dyn MetadataReader> = module.metadata();
        for ty in metadata.type_defs() {
            let attrs = metadata.type_attributes(ty.token);
            if attrs
                .iter()
                .any(|attr| NON_USER_TYPE_ATTRIBUTES.contains(&attr.as_str()))
            {
                if let Err(err) = module.set_type_jmc(ty.token, false) {
                    trace!(ty = %ty.name, %err, "could not clear type JMC");
                }
                continue;
            }

            for method in metadata.methods(ty.token) {
                let attrs = metadata.method_attributes(method.token);
                if attrs
                    .iter()
                    .any(|attr| NON_USER_METHOD_ATTRIBUTES.contains(&attr.as_str()))
                {
                    if let Err(err) = module.set_method_jmc(method.token, false) {
                        trace!(method = %method.name, %err, "could not clear method JMC");
                    }
                }
            }
        }
    }
}

/// Snap a requested line to the nearest user-code sequence point of a
/// method: prefer the statement covering or following the line, by
/// smallest start line, then smallest IL offset.
fn snap_to_user_code(
    symbols: &dyn SymbolReader,
    method: MethodToken,
    line: u32,
) -> Option<SnappedPoint> {
    let points = symbols.sequence_points(method).ok()?;
    points
        .iter()
        .filter(|point| !point.is_hidden() && point.end_line >= line)
        .min_by_key(|point| (point.start_line, point.offset))
        .map(|point| SnappedPoint {
            il_offset: point.offset,
            start_line: point.start_line,
            end_line: point.end_line,
        })
}

/// Compute the per-file method ranges one method contributes, grouping
/// its visible sequence points by document.
pub(crate) fn method_ranges_by_document(
    token: MethodToken,
    is_ctor: bool,
    points: &[SequencePoint],
) -> HashMap<String, MethodRange> {
    let mut by_document: HashMap<String, MethodRange> = HashMap::new();
    for point in points.iter().filter(|p| !p.is_hidden()) {
        let entry = by_document
            .entry(point.document.clone())
            .or_insert(MethodRange {
                token,
                start_line: point.start_line,
                end_line: point.end_line,
                start_column: point.start_column,
                end_column: point.end_column,
                is_ctor,
            });
        if (point.start_line, point.start_column) < (entry.start_line, entry.start_column) {
            entry.start_line = point.start_line;
            entry.start_column = point.start_column;
        }
        if (point.end_line, point.end_column) > (entry.end_line, entry.end_column) {
            entry.end_line = point.end_line;
            entry.end_column = point.end_column;
        }
    }
    by_document
}

impl Modules {
    /// Build the source index entries for a freshly loaded module.
    fn fill_sources(
        &self,
        address: ModuleAddress,
        metadata: &Arc<dyn MetadataReader>,
        symbols: &dyn SymbolReader,
    ) {
        let mut per_file: HashMap<String, Vec<MethodRange>> = HashMap::new();
        for ty in metadata.type_defs() {
            for method in metadata.methods(ty.token) {
                let Ok(points) = symbols.sequence_points(method.token) else {
                    continue;
                };
                for (document, range) in
                    method_ranges_by_document(method.token, method.is_ctor(), &points)
                {
                    per_file.entry(document).or_default().push(range);
                }
            }
        }
        for (file, ranges) in per_file {
            self.sources.add_module_file(address, &file, ranges);
        }
    }
}
