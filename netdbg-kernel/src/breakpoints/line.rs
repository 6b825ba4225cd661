//! Line breakpoints: per-file request diffing, resolution against
//! loaded modules, multi-site installation, and hit checks.

use crate::breakpoints::condition::{check_condition, ConditionVerdict};
use crate::evaluator::Evaluator;
use crate::modules::{LineSite, Modules};
use crate::sources::path_key;
use netdbg_core::runtime::{
    BreakpointRef, ModuleRef, RuntimeBreakpoint, RuntimeCode, RuntimeFunction, RuntimeModule,
    ThreadRef,
};
use netdbg_protocol::{Breakpoint, Source, SourceBreakpoint};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// A primitive breakpoint installed for one resolved site.
struct InstalledSite {
    primitive: BreakpointRef,
    start_line: u32,
    end_line: u32,
}

/// One user-requested line breakpoint. A single user line can resolve
/// to many sites (a field initializer appears in every constructor).
struct LineBp {
    id: u32,
    line: u32,
    condition: Option<String>,
    hit_count: u32,
    sites: Vec<InstalledSite>,
}

impl LineBp {
    fn is_verified(&self) -> bool {
        !self.sites.is_empty()
    }

    fn deactivate(&mut self) {
        for site in self.sites.drain(..) {
            let _ = site.primitive.activate(false);
        }
    }

    fn to_record(&self, source: &Source) -> Breakpoint {
        let resolved_line = self.sites.first().map(|site| site.start_line);
        let end_line = self.sites.first().map(|site| site.end_line);
        Breakpoint {
            id: Some(self.id),
            verified: self.is_verified(),
            message: None,
            source: Some(source.clone()),
            line: Some(resolved_line.unwrap_or(self.line)),
            end_line,
            func_name: None,
        }
    }
}

struct FileBreakpoints {
    source: Source,
    path: String,
    bps: Vec<LineBp>,
}

/// The line-breakpoint set, keyed by normalized source path.
pub struct LineBreakpoints {
    files: Mutex<HashMap<String, FileBreakpoints>>,
}

/// A line-breakpoint hit accepted by [`LineBreakpoints::check_hit`].
pub struct LineHit {
    /// The breakpoint record for the stop event.
    pub record: Breakpoint,
    /// Condition-failure records to surface as `breakpoint(changed)`
    /// events.
    pub changes: Vec<Breakpoint>,
}

/// Install a primitive breakpoint for one resolved site, honoring the
/// just-my-code skip.
fn install_site(site: &LineSite, just_my_code: bool) -> Option<InstalledSite> {
    let function = match site.module.function(site.method) {
        Ok(function) => function,
        Err(err) => {
            warn!(method = %site.method, %err, "cannot obtain function for breakpoint site");
            return None;
        }
    };

    if just_my_code && !function.jmc_status().unwrap_or(true) {
        trace!(method = %site.method, "skipping breakpoint site in non-user code");
        return None;
    }

    let code = function.il_code().ok()?;
    let primitive = match code.create_breakpoint(site.il_offset) {
        Ok(primitive) => primitive,
        Err(err) => {
            warn!(method = %site.method, offset = %site.il_offset, %err,
                  "cannot install primitive breakpoint");
            return None;
        }
    };
    primitive.activate(true).ok()?;
    Some(InstalledSite {
        primitive,
        start_line: site.start_line,
        end_line: site.end_line,
    })
}

impl LineBreakpoints {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the breakpoints of one source file: survivors keep their
    /// ids, removed ones never fire again, new ones resolve immediately
    /// when a process is attached.
    pub fn set_breakpoints(
        &self,
        have_process: bool,
        just_my_code: bool,
        source: &Source,
        requested: &[SourceBreakpoint],
        modules: &Modules,
        alloc_id: &mut dyn FnMut() -> u32,
    ) -> Vec<Breakpoint> {
        let path = source.path.clone().unwrap_or_default();
        let key = path_key(&path);
        let mut files = self.files.lock();

        let mut previous = files
            .remove(&key)
            .map(|file| file.bps)
            .unwrap_or_default();
        let mut next = Vec::with_capacity(requested.len());
        let mut records = Vec::with_capacity(requested.len());

        for request in requested {
            let survivor = previous
                .iter()
                .position(|bp| bp.line == request.line)
                .map(|index| previous.swap_remove(index));

            let bp = match survivor {
                Some(mut bp) => {
                    bp.condition = request.condition.clone();
                    bp
                }
                None => {
                    let mut bp = LineBp {
                        id: alloc_id(),
                        line: request.line,
                        condition: request.condition.clone(),
                        hit_count: 0,
                        sites: Vec::new(),
                    };
                    if have_process {
                        for site in modules.resolve_line(&path, request.line) {
                            if let Some(installed) = install_site(&site, just_my_code) {
                                bp.sites.push(installed);
                            }
                        }
                    }
                    debug!(file = %path, line = request.line, id = bp.id,
                           verified = bp.is_verified(), "line breakpoint added");
                    bp
                }
            };

            records.push(bp.to_record(source));
            next.push(bp);
        }

        // Anything left in `previous` was omitted by this request.
        for mut removed in previous {
            debug!(file = %path, line = removed.line, id = removed.id, "line breakpoint removed");
            removed.deactivate();
        }

        if !next.is_empty() {
            files.insert(
                key,
                FileBreakpoints {
                    source: source.clone(),
                    path,
                    bps: next,
                },
            );
        }

        records
    }

    /// Re-resolve every breakpoint of every file against a newly loaded
    /// module. Returns records for breakpoints that gained sites, to be
    /// emitted as `breakpoint(changed)` events.
    pub fn on_module_load(
        &self,
        module: &ModuleRef,
        just_my_code: bool,
        modules: &Modules,
    ) -> Vec<Breakpoint> {
        let mut changed = Vec::new();
        let mut files = self.files.lock();

        for file in files.values_mut() {
            for bp in &mut file.bps {
                let sites = modules.resolve_line_in_module(module, &file.path, bp.line);
                let mut added = false;
                for site in sites {
                    let duplicate = bp.sites.iter().any(|existing| {
                        existing.primitive.module_address() == site.module.base_address()
                            && existing.primitive.method_token() == site.method
                            && existing.primitive.il_offset() == site.il_offset
                    });
                    if duplicate {
                        continue;
                    }
                    if let Some(installed) = install_site(&site, just_my_code) {
                        bp.sites.push(installed);
                        added = true;
                    }
                }
                if added {
                    changed.push(bp.to_record(&file.source));
                }
            }
        }

        changed
    }

    /// Check whether a primitive hit belongs to a line breakpoint, and
    /// gate it through its condition.
    #[must_use]
    pub fn check_hit(
        &self,
        thread: &ThreadRef,
        primitive: &BreakpointRef,
        evaluator: &dyn Evaluator,
    ) -> Option<LineHit> {
        let mut files = self.files.lock();

        for file in files.values_mut() {
            for bp in &mut file.bps {
                let matched = bp
                    .sites
                    .iter()
                    .any(|site| site.primitive.same_site(primitive.as_ref()));
                if !matched {
                    continue;
                }

                match check_condition(evaluator, thread, bp.condition.as_deref()) {
                    ConditionVerdict::Skip => {
                        trace!(id = bp.id, "line breakpoint condition skipped hit");
                        continue;
                    }
                    ConditionVerdict::Fire => {
                        bp.hit_count += 1;
                        return Some(LineHit {
                            record: bp.to_record(&file.source),
                            changes: Vec::new(),
                        });
                    }
                    ConditionVerdict::FireWithMessage(message) => {
                        bp.hit_count += 1;
                        let mut change = bp.to_record(&file.source);
                        change.message = Some(message);
                        return Some(LineHit {
                            record: bp.to_record(&file.source),
                            changes: vec![change],
                        });
                    }
                }
            }
        }

        None
    }

    /// Times the breakpoint with `id` has fired.
    #[must_use]
    pub fn hit_count(&self, id: u32) -> Option<u32> {
        let files = self.files.lock();
        files
            .values()
            .flat_map(|file| file.bps.iter())
            .find(|bp| bp.id == id)
            .map(|bp| bp.hit_count)
    }

    /// Deactivate and drop every breakpoint.
    pub fn delete_all(&self) {
        let mut files = self.files.lock();
        for file in files.values_mut() {
            for bp in &mut file.bps {
                bp.deactivate();
            }
        }
        files.clear();
    }
}

impl Default for LineBreakpoints {
    fn default() -> Self {
        Self::new()
    }
}
