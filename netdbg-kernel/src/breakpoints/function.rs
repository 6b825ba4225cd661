//! Function breakpoints: name+signature resolution across modules,
//! installation at the first user-code IL offset, and hit checks with
//! the optional parameter-signature filter.

use crate::breakpoints::condition::{check_condition, ConditionVerdict};
use crate::debuginfo::DebugInfoBridge;
use crate::evaluator::Evaluator;
use crate::modules::Modules;
use netdbg_core::runtime::{
    BreakpointRef, ModuleRef, RuntimeBreakpoint, RuntimeCode, RuntimeFrame, RuntimeFunction,
    RuntimeModule, RuntimeThread, RuntimeValue, ThreadRef,
};
use netdbg_core::types::{IlOffset, MethodToken};
use netdbg_protocol::{Breakpoint, FunctionBreakpoint};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// One user-requested function breakpoint, resolved to zero or more
/// runtime sites.
struct FuncBp {
    id: u32,
    name: String,
    module_filter: Option<String>,
    params: String,
    condition: Option<String>,
    hit_count: u32,
    sites: Vec<BreakpointRef>,
}

impl FuncBp {
    fn is_verified(&self) -> bool {
        !self.sites.is_empty()
    }

    fn deactivate(&mut self) {
        for site in self.sites.drain(..) {
            let _ = site.activate(false);
        }
    }

    fn to_record(&self) -> Breakpoint {
        Breakpoint {
            id: Some(self.id),
            verified: self.is_verified(),
            func_name: Some(self.name.clone()),
            ..Breakpoint::default()
        }
    }
}

/// A function-breakpoint hit accepted by
/// [`FunctionBreakpoints::check_hit`].
pub struct FunctionHit {
    /// The breakpoint record for the stop event.
    pub record: Breakpoint,
    /// Condition-failure records to surface as `breakpoint(changed)`
    /// events.
    pub changes: Vec<Breakpoint>,
}

/// The function-breakpoint set, keyed by `name(params)`.
pub struct FunctionBreakpoints {
    bps: Mutex<HashMap<String, FuncBp>>,
}

fn full_key(request: &FunctionBreakpoint) -> String {
    format!(
        "{}{}",
        request.name,
        request.params.clone().unwrap_or_default()
    )
}

/// Stringify the active frame's argument types as `(T1,T2)`.
fn frame_params(thread: &ThreadRef) -> String {
    let types: Vec<String> = thread
        .active_frame()
        .ok()
        .flatten()
        .and_then(|frame| frame.arguments().ok())
        .map(|args| {
            args.iter()
                .map(|value| value.type_name().unwrap_or_default())
                .collect()
        })
        .unwrap_or_default();
    format!("({})", types.join(","))
}

impl FunctionBreakpoints {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bps: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the function-breakpoint set. Survivors keep ids, removed
    /// entries deactivate their sites, new ones resolve immediately
    /// when a process is attached.
    pub fn set_breakpoints(
        &self,
        have_process: bool,
        just_my_code: bool,
        requested: &[FunctionBreakpoint],
        modules: &Modules,
        debuginfo: &DebugInfoBridge,
        alloc_id: &mut dyn FnMut() -> u32,
    ) -> Vec<Breakpoint> {
        let mut bps = self.bps.lock();

        // Drop entries missing from the new request.
        let keep: Vec<String> = requested.iter().map(full_key).collect();
        let stale: Vec<String> = bps
            .keys()
            .filter(|key| !keep.contains(key))
            .cloned()
            .collect();
        for key in stale {
            if let Some(mut removed) = bps.remove(&key) {
                debug!(name = %removed.name, id = removed.id, "function breakpoint removed");
                removed.deactivate();
            }
        }

        let mut records = Vec::with_capacity(requested.len());
        for request in requested {
            let key = full_key(request);
            match bps.get_mut(&key) {
                Some(bp) => {
                    bp.condition = request.condition.clone();
                    records.push(bp.to_record());
                }
                None => {
                    let mut bp = FuncBp {
                        id: alloc_id(),
                        name: request.name.clone(),
                        module_filter: request.module.clone(),
                        params: request.params.clone().unwrap_or_default(),
                        condition: request.condition.clone(),
                        hit_count: 0,
                        sites: Vec::new(),
                    };
                    if have_process {
                        Self::resolve(&mut bp, just_my_code, modules, debuginfo, None);
                    }
                    debug!(name = %bp.name, id = bp.id, verified = bp.is_verified(),
                           "function breakpoint added");
                    records.push(bp.to_record());
                    bps.insert(key, bp);
                }
            }
        }

        records
    }

    /// Resolve one breakpoint, against one module when `only` is given,
    /// otherwise against every module (honoring the request's module
    /// filter).
    fn resolve(
        bp: &mut FuncBp,
        just_my_code: bool,
        modules: &Modules,
        debuginfo: &DebugInfoBridge,
        only: Option<&ModuleRef>,
    ) {
        let mut resolved: Vec<(ModuleRef, MethodToken)> = Vec::new();
        let mut collect = |module: &ModuleRef, token: MethodToken| {
            resolved.push((module.clone(), token));
        };

        match (only, &bp.module_filter) {
            (Some(module), Some(filter)) => {
                if module.path().ends_with(filter.as_str())
                    || module.path().rsplit(['/', '\\']).next() == Some(filter.as_str())
                {
                    modules.resolve_function_in_module(module, &bp.name, &mut collect);
                }
            }
            (Some(module), None) => {
                modules.resolve_function_in_module(module, &bp.name, &mut collect);
            }
            (None, Some(filter)) => {
                if let Some(module) = modules.find_by_name(filter) {
                    modules.resolve_function_in_module(&module, &bp.name, &mut collect);
                }
            }
            (None, None) => modules.resolve_function(&bp.name, &mut collect),
        }

        for (module, token) in resolved {
            Self::install_site(bp, just_my_code, debuginfo, &module, token);
        }
    }

    /// Install one site at the method's first user-code IL offset,
    /// skipping compiler-generated prologue sequence points.
    fn install_site(
        bp: &mut FuncBp,
        just_my_code: bool,
        debuginfo: &DebugInfoBridge,
        module: &ModuleRef,
        token: MethodToken,
    ) {
        let duplicate = bp.sites.iter().any(|site| {
            site.module_address() == module.base_address() && site.method_token() == token
        });
        if duplicate {
            return;
        }

        let function = match module.function(token) {
            Ok(function) => function,
            Err(err) => {
                warn!(%token, %err, "cannot obtain function for breakpoint");
                return;
            }
        };
        if just_my_code && !function.jmc_status().unwrap_or(true) {
            trace!(%token, "skipping function breakpoint in non-user code");
            return;
        }

        let Ok(Some(offset)) =
            debuginfo.next_user_code_offset(module.base_address(), token, IlOffset(0))
        else {
            return;
        };

        let Ok(code) = function.il_code() else {
            return;
        };
        match code.create_breakpoint(offset) {
            Ok(primitive) => {
                if primitive.activate(true).is_ok() {
                    bp.sites.push(primitive);
                }
            }
            Err(err) => warn!(%token, %offset, %err, "cannot install function breakpoint"),
        }
    }

    /// Re-resolve every breakpoint against a newly loaded module.
    /// Returns records for breakpoints that gained sites.
    pub fn on_module_load(
        &self,
        module: &ModuleRef,
        just_my_code: bool,
        modules: &Modules,
        debuginfo: &DebugInfoBridge,
    ) -> Vec<Breakpoint> {
        let mut changed = Vec::new();
        let mut bps = self.bps.lock();
        for bp in bps.values_mut() {
            let before = bp.sites.len();
            Self::resolve(bp, just_my_code, modules, debuginfo, Some(module));
            if bp.sites.len() > before {
                changed.push(bp.to_record());
            }
        }
        changed
    }

    /// Check whether a primitive hit belongs to a function breakpoint,
    /// enforcing the signature filter and the condition.
    #[must_use]
    pub fn check_hit(
        &self,
        thread: &ThreadRef,
        primitive: &BreakpointRef,
        evaluator: &dyn Evaluator,
    ) -> Option<FunctionHit> {
        let mut bps = self.bps.lock();
        if bps.is_empty() {
            return None;
        }

        // Frame-derived data must be computed before conditions run; an
        // evaluation can neuter the frame.
        let params = frame_params(thread);

        for bp in bps.values_mut() {
            if !bp.params.is_empty() && bp.params != params {
                continue;
            }
            let matched = bp
                .sites
                .iter()
                .any(|site| site.same_site(primitive.as_ref()));
            if !matched {
                continue;
            }

            match check_condition(evaluator, thread, bp.condition.as_deref()) {
                ConditionVerdict::Skip => continue,
                ConditionVerdict::Fire => {
                    bp.hit_count += 1;
                    return Some(FunctionHit {
                        record: bp.to_record(),
                        changes: Vec::new(),
                    });
                }
                ConditionVerdict::FireWithMessage(message) => {
                    bp.hit_count += 1;
                    let mut change = bp.to_record();
                    change.message = Some(format!(
                        "{message} - {}({})",
                        bp.name, bp.params
                    ));
                    return Some(FunctionHit {
                        record: bp.to_record(),
                        changes: vec![change],
                    });
                }
            }
        }

        None
    }

    /// Times the breakpoint with `id` has fired.
    #[must_use]
    pub fn hit_count(&self, id: u32) -> Option<u32> {
        self.bps
            .lock()
            .values()
            .find(|bp| bp.id == id)
            .map(|bp| bp.hit_count)
    }

    /// Deactivate and drop every breakpoint.
    pub fn delete_all(&self) {
        let mut bps = self.bps.lock();
        for bp in bps.values_mut() {
            bp.deactivate();
        }
        bps.clear();
    }
}

impl Default for FunctionBreakpoints {
    fn default() -> Self {
        Self::new()
    }
}
