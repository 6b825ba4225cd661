//! The runtime-debug API, modeled as a family of object-safe traits.
//!
//! The native debugging interface of the managed runtime hands out
//! reference-counted objects (processes, app-domains, threads, modules,
//! frames, values, primitive breakpoints and steppers) and fires
//! callbacks on its own threads. Here every such object is an owning
//! smart handle: an `Arc<dyn Trait>` that releases the underlying
//! native reference when the last clone drops. Capability narrowing
//! (the native interface's type-coercion queries) is modeled as
//! fallible accessors returning `DebugError::KindMismatch` when the
//! object does not carry the capability, for example [`RuntimeFrame::ip`]
//! on a native frame.
//!
//! Callback implementations must only hand work to the callback queue;
//! the single queue worker is the only place that decides whether the
//! target keeps running.

use crate::error::Result;
use crate::symbols::SymbolReader;
use crate::types::{
    ExceptionKind, IlOffset, IlRange, IpMapping, MethodToken, ModuleAddress, ProcessId, StepReason,
    ThreadId, TypeToken,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Strong reference to a debuggee process.
pub type ProcessRef = Arc<dyn RuntimeProcess>;
/// Strong reference to an app-domain.
pub type AppDomainRef = Arc<dyn RuntimeAppDomain>;
/// Strong reference to a managed thread.
pub type ThreadRef = Arc<dyn RuntimeThread>;
/// Strong reference to a loaded module.
pub type ModuleRef = Arc<dyn RuntimeModule>;
/// Strong reference to a managed function.
pub type FunctionRef = Arc<dyn RuntimeFunction>;
/// Strong reference to a function's IL body.
pub type CodeRef = Arc<dyn RuntimeCode>;
/// Strong reference to a stack frame.
pub type FrameRef = Arc<dyn RuntimeFrame>;
/// Strong reference to a managed value.
pub type ValueRef = Arc<dyn RuntimeValue>;
/// Strong GC handle to a managed object.
pub type HandleRef = Arc<dyn RuntimeHandle>;
/// Strong reference to a primitive breakpoint.
pub type BreakpointRef = Arc<dyn RuntimeBreakpoint>;
/// Strong reference to a primitive stepper.
pub type StepperRef = Arc<dyn RuntimeStepper>;
/// Strong reference to a module's metadata reader.
pub type MetadataRef = Arc<dyn MetadataReader>;

/// Launch parameters handed to [`RuntimeDebug::launch`].
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    /// Path of the executable or host assembly to run.
    pub program: String,
    /// Arguments passed to the debuggee.
    pub args: Vec<String>,
    /// Environment for the debuggee, replacing the inherited one when
    /// non-empty.
    pub env: BTreeMap<String, String>,
    /// Working directory for the debuggee.
    pub cwd: Option<String>,
}

/// Entry point of the runtime-debug API.
///
/// The native interface has a one-time-init requirement per debugger
/// process; [`RuntimeDebug::initialize`] must refuse a second call with
/// `DebugError::AlreadyInitialized`.
pub trait RuntimeDebug: Send + Sync {
    /// One-time initialization of the native debugging layer.
    ///
    /// # Errors
    ///
    /// `DebugError::AlreadyInitialized` on a repeated call;
    /// `DebugError::Runtime` if the native layer fails to start.
    fn initialize(&self) -> Result<()>;

    /// Tear the native debugging layer down. Idempotent.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` on native teardown failure.
    fn shutdown(&self) -> Result<()>;

    /// Launch a new debuggee. The process is created suspended; the
    /// first resume comes from the session controller once configuration
    /// is done.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the process cannot be created.
    fn launch(&self, spec: &LaunchSpec, sink: Arc<dyn RuntimeCallbackSink>) -> Result<ProcessRef>;

    /// Attach to a running process by pid.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the attach fails.
    fn attach(&self, pid: ProcessId, sink: Arc<dyn RuntimeCallbackSink>) -> Result<ProcessRef>;
}

/// Callbacks fired by the runtime on its own, ephemeral threads.
///
/// Within one runtime thread callbacks arrive in the runtime's natural
/// order. Implementations must not block on debugger state; they either
/// enqueue into the callback queue or perform bounded bookkeeping and
/// resume the app-domain.
pub trait RuntimeCallbackSink: Send + Sync {
    /// The process finished creating; fired once per session.
    fn on_process_created(&self, process: ProcessRef);

    /// The process exited with the given code.
    fn on_process_exited(&self, process: ProcessRef, exit_code: i32);

    /// A module finished loading into the given app-domain.
    fn on_module_load(&self, domain: AppDomainRef, module: ModuleRef);

    /// A module was unloaded.
    fn on_module_unload(&self, domain: AppDomainRef, module: ModuleRef);

    /// A managed thread started.
    fn on_thread_created(&self, domain: AppDomainRef, thread: ThreadRef);

    /// A managed thread exited.
    fn on_thread_exited(&self, domain: AppDomainRef, thread: ThreadRef);

    /// A primitive breakpoint was hit.
    fn on_breakpoint(&self, domain: AppDomainRef, thread: ThreadRef, breakpoint: BreakpointRef);

    /// A primitive stepper completed.
    fn on_step_complete(&self, domain: AppDomainRef, thread: ThreadRef, reason: StepReason);

    /// The debuggee executed its debugger-break primitive.
    fn on_break(&self, domain: AppDomainRef, thread: ThreadRef);

    /// An exception lifecycle notification.
    fn on_exception(
        &self,
        domain: AppDomainRef,
        thread: ThreadRef,
        kind: ExceptionKind,
        module_name: String,
    );
}

/// A debuggee process.
pub trait RuntimeProcess: Send + Sync {
    /// OS process id.
    fn id(&self) -> ProcessId;

    /// Synchronously stop all managed execution.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the runtime refuses the stop.
    fn stop(&self) -> Result<()>;

    /// Resume managed execution.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the runtime refuses the resume.
    fn resume(&self) -> Result<()>;

    /// True when the runtime holds further callbacks for this process
    /// that have not yet been dispatched to the sink.
    fn has_queued_callbacks(&self) -> bool;

    /// All app-domains of the process.
    fn app_domains(&self) -> Vec<AppDomainRef>;

    /// All live managed threads.
    fn threads(&self) -> Vec<ThreadRef>;

    /// Detach, leaving the debuggee running.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the detach fails.
    fn detach(&self) -> Result<()>;

    /// Terminate the debuggee.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the kill fails.
    fn terminate(&self, exit_code: u32) -> Result<()>;
}

/// An isolation unit within the process. Primitive breakpoints and
/// steppers are enumerated per domain.
pub trait RuntimeAppDomain: Send + Sync {
    /// Owning process.
    fn process(&self) -> ProcessRef;

    /// Resume execution of this domain.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the runtime refuses the resume.
    fn resume(&self) -> Result<()>;

    /// All primitive steppers currently registered in the domain.
    fn steppers(&self) -> Vec<StepperRef>;

    /// All primitive breakpoints currently registered in the domain.
    fn breakpoints(&self) -> Vec<BreakpointRef>;
}

/// A managed thread.
pub trait RuntimeThread: Send + Sync {
    /// Runtime-assigned thread id.
    fn id(&self) -> ThreadId;

    /// Owning process.
    fn process(&self) -> ProcessRef;

    /// Display name, empty when the debuggee never named the thread.
    fn name(&self) -> String;

    /// The innermost frame, `None` when the thread has no managed
    /// frames (for example it is sitting in native code).
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the stack cannot be walked.
    fn active_frame(&self) -> Result<Option<FrameRef>>;

    /// Full managed stack, top frame first.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the stack cannot be walked.
    fn frames(&self) -> Result<Vec<FrameRef>>;

    /// Create a primitive stepper bound to this thread.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the runtime refuses.
    fn create_stepper(&self) -> Result<StepperRef>;

    /// The exception currently in flight on this thread, if any.
    fn current_exception(&self) -> Option<ValueRef>;
}

/// A loaded module.
pub trait RuntimeModule: Send + Sync {
    /// Base address; the identity of the module.
    fn base_address(&self) -> ModuleAddress;

    /// Full path of the module file. For in-memory modules this is the
    /// runtime's display string.
    fn path(&self) -> String;

    /// True for dynamically emitted modules.
    fn is_dynamic(&self) -> bool;

    /// True for modules loaded from memory rather than a file.
    fn is_in_memory(&self) -> bool;

    /// GUID identity of the module (the metadata mvid).
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when metadata is unavailable.
    fn mvid(&self) -> Result<Uuid>;

    /// The entry method-def advertised by the module's file header, if
    /// the module carries an entry point at all.
    fn entry_point_token(&self) -> Option<MethodToken>;

    /// Metadata reader for the module.
    fn metadata(&self) -> MetadataRef;

    /// Open the module's symbol reader (PDB).
    ///
    /// # Errors
    ///
    /// `DebugError::SymbolsMissing` when no debug info exists;
    /// `DebugError::Runtime` for dynamic or unreadable layouts.
    fn load_symbols(&self) -> Result<Arc<dyn SymbolReader>>;

    /// Look up a function by token.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the token is unknown.
    fn function(&self, token: MethodToken) -> Result<FunctionRef>;

    /// Ask the JIT to disable optimization for code not yet compiled.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the flag cannot be set.
    fn set_jit_disable_optimization(&self) -> Result<()>;

    /// Set the module-level just-my-code status. Returns `Ok(false)`
    /// when the runtime refuses because the module is optimized (the
    /// module still loads; an advisory is surfaced to the user).
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` for failures other than the optimized
    /// module refusal.
    fn set_jmc(&self, enable: bool) -> Result<bool>;

    /// Override just-my-code for one type.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the runtime refuses.
    fn set_type_jmc(&self, ty: TypeToken, enable: bool) -> Result<()>;

    /// Override just-my-code for one method.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the runtime refuses.
    fn set_method_jmc(&self, method: MethodToken, enable: bool) -> Result<()>;
}

/// A managed function.
pub trait RuntimeFunction: Send + Sync {
    /// Method token within the declaring module.
    fn token(&self) -> MethodToken;

    /// Declaring module.
    fn module(&self) -> ModuleRef;

    /// The IL body.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when no IL exists (native method).
    fn il_code(&self) -> Result<CodeRef>;

    /// Current just-my-code status of the method.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the status cannot be read.
    fn jmc_status(&self) -> Result<bool>;
}

/// A function's IL body; the factory for primitive breakpoints.
pub trait RuntimeCode: Send + Sync {
    /// Size of the IL body in bytes.
    fn size(&self) -> u32;

    /// Install a primitive breakpoint at the given IL offset. The
    /// breakpoint is created inactive; callers activate it explicitly.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the offset is invalid.
    fn create_breakpoint(&self, offset: IlOffset) -> Result<BreakpointRef>;
}

/// A stack frame.
pub trait RuntimeFrame: Send + Sync {
    /// The function executing in this frame.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` for frames without a managed function.
    fn function(&self) -> Result<FunctionRef>;

    /// Shorthand for `function()?.token()`.
    ///
    /// # Errors
    ///
    /// Same as [`RuntimeFrame::function`].
    fn method_token(&self) -> Result<MethodToken> {
        Ok(self.function()?.token())
    }

    /// Current instruction pointer as an IL offset, with mapping
    /// quality.
    ///
    /// # Errors
    ///
    /// `DebugError::KindMismatch` for non-IL frames.
    fn ip(&self) -> Result<(IlOffset, IpMapping)>;

    /// The frame's arguments, `this` first for instance methods.
    ///
    /// # Errors
    ///
    /// `DebugError::KindMismatch` for non-IL frames.
    fn arguments(&self) -> Result<Vec<ValueRef>>;

    /// The `this` argument, `None` for static methods.
    ///
    /// # Errors
    ///
    /// `DebugError::KindMismatch` for non-IL frames.
    fn this_argument(&self) -> Result<Option<ValueRef>>;
}

/// A managed value.
pub trait RuntimeValue: Send + Sync {
    /// Fully qualified type name of the value.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the type cannot be read.
    fn type_name(&self) -> Result<String>;

    /// True for a null reference.
    fn is_null(&self) -> bool;

    /// Address of the underlying object, 0 for immediates.
    fn address(&self) -> u64;

    /// Follow references and unbox, yielding the underlying object.
    /// Identity for values that are neither references nor boxes.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the reference is stale.
    fn dereference(&self) -> Result<ValueRef>;

    /// Read a named instance field.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when field layout cannot be read.
    fn field(&self, name: &str) -> Result<Option<ValueRef>>;

    /// The payload for string values, `None` for other types.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the characters cannot be read.
    fn as_string(&self) -> Result<Option<String>>;

    /// The payload for boolean values, `None` for other types.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the payload cannot be read.
    fn as_bool(&self) -> Result<Option<bool>>;

    /// Pin the value behind a strong GC handle that survives
    /// continue/stop cycles.
    ///
    /// # Errors
    ///
    /// `DebugError::KindMismatch` for values that are not heap
    /// objects.
    fn create_strong_handle(&self) -> Result<HandleRef>;
}

/// A strong GC handle created by [`RuntimeValue::create_strong_handle`].
pub trait RuntimeHandle: Send + Sync {
    /// The object behind the handle.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the handle was invalidated.
    fn dereference(&self) -> Result<ValueRef>;
}

/// A primitive breakpoint installed in IL code. Identity is the
/// (module, method, offset) triple.
pub trait RuntimeBreakpoint: Send + Sync {
    /// Activate or deactivate the breakpoint.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the runtime refuses.
    fn activate(&self, active: bool) -> Result<()>;

    /// Current activation state.
    fn is_active(&self) -> bool;

    /// Module the breakpoint lives in.
    fn module_address(&self) -> ModuleAddress;

    /// Method the breakpoint lives in.
    fn method_token(&self) -> MethodToken;

    /// IL offset of the breakpoint.
    fn il_offset(&self) -> IlOffset;

    /// True when `other` addresses the same IL location.
    fn same_site(&self, other: &dyn RuntimeBreakpoint) -> bool {
        self.module_address() == other.module_address()
            && self.method_token() == other.method_token()
            && self.il_offset() == other.il_offset()
    }
}

/// Configuration applied to a primitive stepper before it is armed.
#[derive(Debug, Clone, Copy)]
pub struct StepperConfig {
    /// Intercept security checks. The base mask intercepts everything;
    /// these flags carve exceptions out of it.
    pub intercept_security: bool,
    /// Intercept class initializers.
    pub intercept_class_init: bool,
    /// Stop at IL with no source mapping.
    pub stop_in_unmapped: bool,
    /// Let the runtime skip non-user code during the step.
    pub just_my_code: bool,
}

impl Default for StepperConfig {
    fn default() -> Self {
        // Intercept everything except security and class-init, never
        // stop at unmapped IL, runtime-level JMC on.
        Self {
            intercept_security: false,
            intercept_class_init: false,
            stop_in_unmapped: false,
            just_my_code: true,
        }
    }
}

/// A primitive stepper bound to one thread.
pub trait RuntimeStepper: Send + Sync {
    /// Apply configuration. Must be called before arming.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the runtime refuses.
    fn configure(&self, config: &StepperConfig) -> Result<()>;

    /// Arm a plain step.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the runtime refuses.
    fn step(&self, step_in: bool) -> Result<()>;

    /// Arm a range step over the given IL range.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the runtime refuses.
    fn step_range(&self, step_in: bool, range: IlRange) -> Result<()>;

    /// Arm a step-out.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the runtime refuses.
    fn step_out(&self) -> Result<()>;

    /// Deactivate the stepper without completing it.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the runtime refuses.
    fn deactivate(&self) -> Result<()>;

    /// True while the stepper is armed.
    fn is_active(&self) -> bool;
}

/// A type definition as listed by [`MetadataReader::type_defs`].
#[derive(Debug, Clone)]
pub struct TypeDefInfo {
    /// Token of the type.
    pub token: TypeToken,
    /// Dotted, namespace-qualified name; nested types appear as
    /// `Outer.Inner`.
    pub name: String,
}

/// A method definition as listed by [`MetadataReader::methods`].
#[derive(Debug, Clone)]
pub struct MethodDefInfo {
    /// Token of the method.
    pub token: MethodToken,
    /// Unqualified method name, `.ctor`/`.cctor` for constructors.
    pub name: String,
    /// True for static methods.
    pub is_static: bool,
}

impl MethodDefInfo {
    /// True for instance and static constructors.
    #[must_use]
    pub fn is_ctor(&self) -> bool {
        self.name == ".ctor" || self.name == ".cctor"
    }
}

/// Method properties looked up by token.
#[derive(Debug, Clone)]
pub struct MethodProps {
    /// Unqualified method name.
    pub name: String,
    /// Declaring type.
    pub declaring_type: TypeToken,
    /// True for static methods.
    pub is_static: bool,
}

/// Synchronous metadata queries over one module.
pub trait MetadataReader: Send + Sync {
    /// All type definitions of the module.
    fn type_defs(&self) -> Vec<TypeDefInfo>;

    /// All method definitions of one type.
    fn methods(&self, ty: TypeToken) -> Vec<MethodDefInfo>;

    /// Generic parameter names of a method, empty for non-generic
    /// methods.
    fn generic_params(&self, method: MethodToken) -> Vec<String>;

    /// Properties of one method.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the token is unknown.
    fn method_props(&self, method: MethodToken) -> Result<MethodProps>;

    /// The enclosing class of a nested type, `None` for top-level
    /// types.
    fn enclosing_class(&self, ty: TypeToken) -> Option<TypeToken>;

    /// Unqualified name of a type, for example `<Main>d__0`.
    ///
    /// # Errors
    ///
    /// `DebugError::Runtime` when the token is unknown.
    fn simple_type_name(&self, ty: TypeToken) -> Result<String>;

    /// Names of custom attribute types applied to a type.
    fn type_attributes(&self, ty: TypeToken) -> Vec<String>;

    /// Names of custom attribute types applied to a method.
    fn method_attributes(&self, method: MethodToken) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stepper_defaults_match_the_step_contract() {
        let config = StepperConfig::default();
        assert!(!config.intercept_security);
        assert!(!config.intercept_class_init);
        assert!(!config.stop_in_unmapped);
        assert!(config.just_my_code);
    }

    #[test]
    fn ctor_detection() {
        let ctor = MethodDefInfo {
            token: MethodToken(1),
            name: ".ctor".into(),
            is_static: false,
        };
        let cctor = MethodDefInfo {
            token: MethodToken(2),
            name: ".cctor".into(),
            is_static: true,
        };
        let plain = MethodDefInfo {
            token: MethodToken(3),
            name: "Main".into(),
            is_static: true,
        };
        assert!(ctor.is_ctor());
        assert!(cctor.is_ctor());
        assert!(!plain.is_ctor());
    }
}
