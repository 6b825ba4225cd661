//! Debug-info bridge: a thin, synchronous query surface over the
//! per-module symbol readers, plus the frame-to-source mapping every
//! stop event needs.
//!
//! Async stepping info is cached in a single slot keyed by
//! (module, method); steppers hammer the same method repeatedly while
//! one step is in flight, and one slot is exactly what that access
//! pattern needs.

use crate::modules::Modules;
use crate::threads::StopSite;
use netdbg_core::error::{DebugError, Result};
use netdbg_core::runtime::{
    FrameRef, MetadataReader, RuntimeFrame, RuntimeFunction, RuntimeModule, RuntimeThread,
    ThreadRef,
};
use netdbg_core::symbols::{AsyncMethodInfo, AwaitInfo, SequencePoint};
use netdbg_core::types::{FrameLevel, IlOffset, IlRange, MethodToken, ModuleAddress, ThreadId};
use netdbg_protocol::{Source, StackFrame};
use parking_lot::Mutex;
use std::sync::Arc;

/// Encode a protocol frame id from a thread id and a stack level.
/// Thread ids are assumed to fit 48 bits.
#[must_use]
pub fn frame_id(thread: ThreadId, level: u32) -> u64 {
    (thread.0 << 16) | u64::from(level & 0xFFFF)
}

/// Split a protocol frame id back into thread id and stack level.
#[must_use]
pub fn frame_id_parts(id: u64) -> (ThreadId, FrameLevel) {
    (
        ThreadId(id >> 16),
        FrameLevel(u32::try_from(id & 0xFFFF).unwrap_or(0)),
    )
}

#[derive(Default)]
struct AsyncInfoSlot {
    module: ModuleAddress,
    method: MethodToken,
    info: Option<Arc<AsyncMethodInfo>>,
    valid: bool,
}

/// Synchronous queries over the symbol readers of loaded modules.
pub struct DebugInfoBridge {
    modules: Arc<Modules>,
    async_slot: Mutex<AsyncInfoSlot>,
}

impl DebugInfoBridge {
    /// Create a bridge over `modules`.
    #[must_use]
    pub fn new(modules: Arc<Modules>) -> Self {
        Self {
            modules,
            async_slot: Mutex::new(AsyncInfoSlot::default()),
        }
    }

    /// Async stepping info of a method, `None` for methods that are
    /// not async state machines or carry no symbols.
    #[must_use]
    pub fn async_info(
        &self,
        module: ModuleAddress,
        method: MethodToken,
    ) -> Option<Arc<AsyncMethodInfo>> {
        let mut slot = self.async_slot.lock();
        if slot.valid && slot.module == module && slot.method == method {
            return slot.info.clone();
        }

        let info = self
            .modules
            .symbols(module)
            .and_then(|symbols| symbols.async_stepping_info(method).ok().flatten())
            .map(Arc::new);

        slot.module = module;
        slot.method = method;
        slot.info = info.clone();
        slot.valid = true;
        info
    }

    /// True when the method contains at least one await block.
    #[must_use]
    pub fn has_awaits(&self, module: ModuleAddress, method: MethodToken) -> bool {
        self.async_info(module, method)
            .is_some_and(|info| !info.awaits.is_empty())
    }

    /// The await block next after `ip`: the first one whose yield
    /// offset is at or past `ip`. The search stops when `ip` already
    /// sits inside an await routine.
    #[must_use]
    pub fn next_await(
        &self,
        module: ModuleAddress,
        method: MethodToken,
        ip: IlOffset,
    ) -> Option<AwaitInfo> {
        let info = self.async_info(module, method)?;
        for await_block in &info.awaits {
            if ip <= await_block.yield_offset {
                return Some(*await_block);
            }
            if ip < await_block.resume_offset {
                break;
            }
        }
        None
    }

    /// IL offset of the last user statement of an async method. `None`
    /// means the promote-to-step-out rule must not trigger.
    #[must_use]
    pub fn last_user_il_offset(
        &self,
        module: ModuleAddress,
        method: MethodToken,
    ) -> Option<IlOffset> {
        self.async_info(module, method)?.last_user_il_offset
    }

    /// First user-code IL offset at or after `from` in a method.
    ///
    /// # Errors
    ///
    /// [`DebugError::SymbolsMissing`] when the module has no reader;
    /// reader errors pass through.
    pub fn next_user_code_offset(
        &self,
        module: ModuleAddress,
        method: MethodToken,
        from: IlOffset,
    ) -> Result<Option<IlOffset>> {
        let symbols = self
            .modules
            .symbols(module)
            .ok_or_else(|| DebugError::SymbolsMissing {
                module: module.to_string(),
            })?;
        symbols.next_user_code_offset(method, from)
    }

    /// The visible sequence point covering `ip`: the last one at or
    /// before it.
    #[must_use]
    pub fn sequence_point_at(
        &self,
        module: ModuleAddress,
        method: MethodToken,
        ip: IlOffset,
    ) -> Option<SequencePoint> {
        let symbols = self.modules.symbols(module)?;
        let points = symbols.sequence_points(method).ok()?;
        points
            .into_iter()
            .filter(|point| !point.is_hidden() && point.offset <= ip)
            .max_by_key(|point| point.offset)
    }

    /// The IL range to hand a range stepper for the statement at the
    /// thread's current IP. Falls back to the whole remaining method
    /// body when the reader has no range.
    ///
    /// # Errors
    ///
    /// Fails when the thread has no usable IL frame or the module has
    /// no symbols.
    pub fn step_range_from_ip(&self, thread: &ThreadRef) -> Result<IlRange> {
        let frame = thread
            .active_frame()?
            .ok_or_else(|| DebugError::internal("thread has no active frame"))?;
        let function = frame.function()?;
        let module = function.module();
        let (ip, mapping) = frame.ip()?;
        if !mapping.is_usable() {
            return Err(DebugError::KindMismatch {
                capability: "mapped IL instruction pointer",
            });
        }

        let address = module.base_address();
        let token = function.token();
        let symbols = self
            .modules
            .symbols(address)
            .ok_or_else(|| DebugError::SymbolsMissing {
                module: address.to_string(),
            })?;
        let range = symbols.step_range(token, ip)?;
        if range.start == range.end {
            let size = function.il_code()?.size();
            return Ok(IlRange {
                start: range.start,
                end: IlOffset(size),
            });
        }
        Ok(range)
    }

    /// The statement site of a stop, recorded for debugger-break
    /// de-duplication.
    #[must_use]
    pub fn stop_site(&self, frame: &FrameRef) -> Option<StopSite> {
        let function = frame.function().ok()?;
        let module = function.module().base_address();
        let method = function.token();
        let (ip, mapping) = frame.ip().ok()?;
        if !mapping.is_usable() {
            return None;
        }
        let symbols = self.modules.symbols(module)?;
        let range = symbols.step_range(method, ip).ok()?;
        Some(StopSite {
            module,
            method,
            range,
        })
    }

    /// Qualified `Type.Method` display name of a method.
    #[must_use]
    pub fn qualified_method_name(&self, module: &dyn MetadataReader, method: MethodToken) -> String {
        let Ok(props) = module.method_props(method) else {
            return format!("{method}");
        };
        let type_name = module
            .type_defs()
            .into_iter()
            .find(|ty| ty.token == props.declaring_type)
            .map(|ty| ty.name)
            .unwrap_or_default();
        if type_name.is_empty() {
            props.name
        } else {
            format!("{type_name}.{}", props.name)
        }
    }

    /// Map a runtime frame to the protocol record reported in stack
    /// traces and stop events. Frames without symbols keep an empty
    /// source.
    #[must_use]
    pub fn frame_location(&self, frame: &FrameRef, id: u64) -> StackFrame {
        let mut record = StackFrame {
            id,
            name: "<unknown>".to_string(),
            ..StackFrame::default()
        };

        let Ok(function) = frame.function() else {
            return record;
        };
        let module = function.module();
        let address = module.base_address();
        let token = function.token();

        record.name = self.qualified_method_name(module.metadata().as_ref(), token);
        record.module_id = self
            .modules
            .with_record(address, |rec| rec.id.to_string());

        if let Ok((ip, mapping)) = frame.ip() {
            if mapping.is_usable() {
                if let Some(point) = self.sequence_point_at(address, token, ip) {
                    record.source = Some(Source::from_path(point.document.clone()));
                    record.line = point.start_line;
                    record.column = point.start_column;
                    record.end_line = Some(point.end_line);
                    record.end_column = Some(point.end_column);
                }
            }
        }

        record
    }
}
