//! The entry breakpoint: a single-shot stop at the user program's
//! entry method, with the async-Main redirection onto the compiler's
//! generated state machine.

use crate::debuginfo::DebugInfoBridge;
use netdbg_core::error::Result;
use netdbg_core::runtime::{
    BreakpointRef, MetadataReader, ModuleRef, RuntimeBreakpoint, RuntimeCode, RuntimeFunction,
    RuntimeModule,
};
use netdbg_core::types::{IlOffset, MethodToken, TypeToken};
use parking_lot::Mutex;
use tracing::{debug, trace};

#[derive(Default)]
struct EntryInner {
    stop_at_entry: bool,
    breakpoint: Option<BreakpointRef>,
}

/// Singleton entry breakpoint. Installed on the first load of a module
/// whose file header advertises an entry point; deactivated on first
/// hit.
#[derive(Default)]
pub struct EntryBreakpoint {
    inner: Mutex<EntryInner>,
}

/// When the entry method is the compiler's `<Main>` async trampoline,
/// find the real first user code: the `MoveNext` method of the nested
/// `<Main>d__N` state machine, snapped to its first user IL offset.
fn async_entry_redirect(
    module: &ModuleRef,
    debuginfo: &DebugInfoBridge,
    main_class: TypeToken,
) -> Option<(MethodToken, IlOffset)> {
    let metadata = module.metadata();
    for ty in metadata.type_defs() {
        if metadata.enclosing_class(ty.token) != Some(main_class) {
            continue;
        }
        let Ok(simple) = metadata.simple_type_name(ty.token) else {
            continue;
        };
        if !simple.starts_with("<Main>d__") {
            continue;
        }
        let move_next = metadata
            .methods(ty.token)
            .into_iter()
            .find(|method| method.name == "MoveNext")?;

        // User code of the rewritten Main does not start at offset 0.
        let offset = debuginfo
            .next_user_code_offset(module.base_address(), move_next.token, IlOffset(0))
            .ok()
            .flatten()?;
        return Some((move_next.token, offset));
    }
    None
}

impl EntryBreakpoint {
    /// Create the (disabled) entry breakpoint.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable stop-at-entry for the session.
    pub fn set_stop_at_entry(&self, enable: bool) {
        self.inner.lock().stop_at_entry = enable;
    }

    /// Install the entry breakpoint if this module advertises the entry
    /// point and none is installed yet.
    ///
    /// # Errors
    ///
    /// Runtime failures while installing the primitive breakpoint.
    pub fn on_module_load(&self, module: &ModuleRef, debuginfo: &DebugInfoBridge) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.stop_at_entry || inner.breakpoint.is_some() {
            return Ok(());
        }

        let Some(entry_token) = module.entry_point_token() else {
            return Ok(());
        };

        let mut token = entry_token;
        let mut offset = IlOffset(0);

        // If the entry is the generated async trampoline, redirect into
        // the state machine; when that fails, keep the entry as is.
        let metadata = module.metadata();
        if let Ok(props) = metadata.method_props(entry_token) {
            if props.name == "<Main>" {
                if let Some((move_next, user_offset)) =
                    async_entry_redirect(module, debuginfo, props.declaring_type)
                {
                    token = move_next;
                    offset = user_offset;
                }
            }
        }

        let function = module.function(token)?;
        let breakpoint = function.il_code()?.create_breakpoint(offset)?;
        breakpoint.activate(true)?;
        debug!(module = %module.path(), %token, %offset, "entry breakpoint installed");
        inner.breakpoint = Some(breakpoint);
        Ok(())
    }

    /// Check whether a primitive hit belongs to the entry breakpoint.
    /// On a hit the breakpoint deactivates itself and is released.
    #[must_use]
    pub fn check_hit(&self, primitive: &BreakpointRef) -> bool {
        let mut inner = self.inner.lock();
        if !inner.stop_at_entry {
            return false;
        }
        let Some(installed) = &inner.breakpoint else {
            return false;
        };
        if !installed.same_site(primitive.as_ref()) {
            return false;
        }

        trace!("entry breakpoint hit; releasing");
        if let Some(installed) = inner.breakpoint.take() {
            let _ = installed.activate(false);
        }
        true
    }

    /// Deactivate and release the breakpoint (session teardown).
    pub fn delete(&self) {
        let mut inner = self.inner.lock();
        if let Some(installed) = inner.breakpoint.take() {
            let _ = installed.activate(false);
        }
    }
}
