//! Scriptable in-memory implementation of the runtime-debug trait
//! family. Tests build modules with metadata and sequence points,
//! attach threads and frames, and drive the callback sink by hand; the
//! mock records every resume, stop, stepper operation, and installed
//! primitive breakpoint for assertions.

use netdbg_core::error::{DebugError, Result};
use netdbg_core::runtime::{
    AppDomainRef, BreakpointRef, CodeRef, FrameRef, FunctionRef, HandleRef, LaunchSpec,
    MetadataReader, MethodDefInfo, MethodProps, ModuleRef, ProcessRef, RuntimeAppDomain,
    RuntimeBreakpoint, RuntimeCallbackSink, RuntimeCode, RuntimeDebug, RuntimeFrame,
    RuntimeFunction, RuntimeHandle, RuntimeModule, RuntimeProcess, RuntimeStepper, RuntimeThread,
    RuntimeValue, StepperConfig, StepperRef, ThreadRef, TypeDefInfo, ValueRef,
};
use netdbg_core::symbols::{
    AsyncMethodInfo, HoistedLocalScope, NamedLocal, SequencePoint, SymbolReader,
};
use netdbg_core::types::{
    IlOffset, IlRange, IpMapping, MethodToken, ModuleAddress, ProcessId, ThreadId, TypeToken,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

// ── values ───────────────────────────────────────────────────────────

/// A scriptable managed value.
pub struct MockValue {
    me: Mutex<Weak<MockValue>>,
    type_name: String,
    address: u64,
    null: bool,
    string: Option<String>,
    boolean: Option<bool>,
    fields: Mutex<HashMap<String, ValueRef>>,
}

impl MockValue {
    fn build(
        type_name: &str,
        address: u64,
        null: bool,
        string: Option<String>,
        boolean: Option<bool>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: Mutex::new(me.clone()),
            type_name: type_name.to_string(),
            address,
            null,
            string,
            boolean,
            fields: Mutex::new(HashMap::new()),
        })
    }

    /// A boolean value.
    #[must_use]
    pub fn bool_value(value: bool) -> ValueRef {
        Self::build("System.Boolean", 0, false, None, Some(value))
    }

    /// A string value.
    #[must_use]
    pub fn string_value(value: &str) -> ValueRef {
        Self::build("System.String", 0, false, Some(value.to_string()), None)
    }

    /// An object of the given type at the given heap address.
    #[must_use]
    pub fn object(type_name: &str, address: u64) -> Arc<Self> {
        Self::build(type_name, address, false, None, None)
    }

    /// A null reference.
    #[must_use]
    pub fn null() -> ValueRef {
        Self::build("System.Object", 0, true, None, None)
    }

    /// Attach a named field.
    pub fn set_field(self: &Arc<Self>, name: &str, value: ValueRef) {
        self.fields.lock().insert(name.to_string(), value);
    }

    fn as_ref_value(&self) -> ValueRef {
        self.me
            .lock()
            .upgrade()
            .expect("mock value self reference")
    }
}

impl RuntimeValue for MockValue {
    fn type_name(&self) -> Result<String> {
        Ok(self.type_name.clone())
    }

    fn is_null(&self) -> bool {
        self.null
    }

    fn address(&self) -> u64 {
        self.address
    }

    fn dereference(&self) -> Result<ValueRef> {
        Ok(self.as_ref_value())
    }

    fn field(&self, name: &str) -> Result<Option<ValueRef>> {
        Ok(self.fields.lock().get(name).cloned())
    }

    fn as_string(&self) -> Result<Option<String>> {
        Ok(self.string.clone())
    }

    fn as_bool(&self) -> Result<Option<bool>> {
        Ok(self.boolean)
    }

    fn create_strong_handle(&self) -> Result<HandleRef> {
        Ok(Arc::new(MockHandle {
            value: self.as_ref_value(),
        }))
    }
}

struct MockHandle {
    value: ValueRef,
}

impl RuntimeHandle for MockHandle {
    fn dereference(&self) -> Result<ValueRef> {
        Ok(Arc::clone(&self.value))
    }
}

// ── module data ──────────────────────────────────────────────────────

/// One scripted method.
#[derive(Clone)]
pub struct MethodSpec {
    /// Unqualified method name.
    pub name: String,
    /// True for static methods.
    pub is_static: bool,
    /// Generic parameter names.
    pub generics: Vec<String>,
    /// Custom attribute type names.
    pub attributes: Vec<String>,
    /// Sequence points, in IL order.
    pub sequence_points: Vec<SequencePoint>,
    /// Async stepping info, for async state machine bodies.
    pub async_info: Option<AsyncMethodInfo>,
    /// IL body size.
    pub code_size: u32,
    /// Default just-my-code status.
    pub user_code: bool,
}

impl Default for MethodSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            is_static: false,
            generics: Vec::new(),
            attributes: Vec::new(),
            sequence_points: Vec::new(),
            async_info: None,
            code_size: 8,
            user_code: true,
        }
    }
}

/// One scripted type.
#[derive(Clone, Default)]
pub struct TypeSpec {
    /// Dotted, namespace-qualified name.
    pub name: String,
    /// Unqualified name.
    pub simple_name: String,
    /// Enclosing class for nested types.
    pub enclosing: Option<TypeToken>,
    /// Custom attribute type names.
    pub attributes: Vec<String>,
    /// Method tokens declared by the type.
    pub methods: Vec<MethodToken>,
}

#[derive(Default)]
struct ModuleData {
    address: ModuleAddress,
    path: String,
    mvid: Uuid,
    entry_point: Option<MethodToken>,
    dynamic: bool,
    in_memory: bool,
    no_symbols: bool,
    jmc_refused: bool,
    types: BTreeMap<TypeToken, TypeSpec>,
    methods: BTreeMap<MethodToken, MethodSpec>,
    jmc_overrides: Mutex<HashMap<MethodToken, bool>>,
    type_jmc_overrides: Mutex<HashMap<TypeToken, bool>>,
    installed: Mutex<Vec<Arc<MockPrimitiveBreakpoint>>>,
    module_jmc_calls: Mutex<Vec<bool>>,
    jit_unoptimized: AtomicBool,
}

/// Builder for a scripted module.
pub struct MockModuleBuilder {
    data: ModuleData,
    next_type: u32,
    next_method: u32,
}

/// Handle returned while scripting one type.
pub struct TypeBuilder<'a> {
    builder: &'a mut MockModuleBuilder,
    token: TypeToken,
}

impl MockModuleBuilder {
    /// Start a module at `address` with the given file path.
    #[must_use]
    pub fn new(address: u64, path: &str) -> Self {
        Self {
            data: ModuleData {
                address: ModuleAddress(address),
                path: path.to_string(),
                mvid: Uuid::new_v4(),
                ..ModuleData::default()
            },
            next_type: 0x0200_0001,
            next_method: 0x0600_0001,
        }
    }

    /// Mark the module as carrying no debug info.
    #[must_use]
    pub fn without_symbols(mut self) -> Self {
        self.data.no_symbols = true;
        self
    }

    /// Make module-level just-my-code fail like an optimized build.
    #[must_use]
    pub fn refuse_jmc(mut self) -> Self {
        self.data.jmc_refused = true;
        self
    }

    /// Mark the module dynamic.
    #[must_use]
    pub fn dynamic(mut self) -> Self {
        self.data.dynamic = true;
        self
    }

    /// Advertise `token` as the entry point in the file header.
    #[must_use]
    pub fn entry_point(mut self, token: MethodToken) -> Self {
        self.data.entry_point = Some(token);
        self
    }

    /// Add a type; the closure scripts its methods.
    pub fn type_def(
        mut self,
        name: &str,
        script: impl FnOnce(&mut TypeBuilder<'_>),
    ) -> Self {
        let token = TypeToken(self.next_type);
        self.next_type += 1;
        let simple = name.rsplit('.').next().unwrap_or(name).to_string();
        self.data.types.insert(
            token,
            TypeSpec {
                name: name.to_string(),
                simple_name: simple,
                enclosing: None,
                attributes: Vec::new(),
                methods: Vec::new(),
            },
        );
        let mut type_builder = TypeBuilder {
            builder: &mut self,
            token,
        };
        script(&mut type_builder);
        self
    }

    /// Token of the most recently added type.
    #[must_use]
    pub fn last_type(&self) -> TypeToken {
        TypeToken(self.next_type - 1)
    }

    /// Mark the most recently added type as nested into `enclosing`.
    #[must_use]
    pub fn nested_into(mut self, enclosing: TypeToken) -> Self {
        let token = TypeToken(self.next_type - 1);
        if let Some(ty) = self.data.types.get_mut(&token) {
            ty.enclosing = Some(enclosing);
        }
        self
    }

    /// Finish the module.
    #[must_use]
    pub fn build(self) -> Arc<MockModule> {
        Arc::new_cyclic(|me| MockModule {
            me: me.clone(),
            data: Arc::new(self.data),
        })
    }
}

impl TypeBuilder<'_> {
    /// Add a method with the given spec; returns its token.
    pub fn method(&mut self, name: &str, spec: MethodSpec) -> MethodToken {
        let token = MethodToken(self.builder.next_method);
        self.builder.next_method += 1;
        let mut spec = spec;
        spec.name = name.to_string();
        self.builder.data.methods.insert(token, spec);
        self.builder
            .data
            .types
            .get_mut(&self.token)
            .expect("type under construction")
            .methods
            .push(token);
        token
    }

    /// Add a custom attribute to the type.
    pub fn attribute(&mut self, name: &str) {
        self.builder
            .data
            .types
            .get_mut(&self.token)
            .expect("type under construction")
            .attributes
            .push(name.to_string());
    }
}

impl MethodSpec {
    /// A user-code method with evenly spaced sequence points: one per
    /// line of `lines`, at IL offsets 0, 4, 8, ...
    #[must_use]
    pub fn with_lines(document: &str, lines: &[u32]) -> Self {
        let sequence_points = lines
            .iter()
            .enumerate()
            .map(|(index, line)| SequencePoint {
                offset: IlOffset(u32::try_from(index).unwrap() * 4),
                document: document.to_string(),
                start_line: *line,
                start_column: 5,
                end_line: *line,
                end_column: 40,
            })
            .collect::<Vec<_>>();
        let code_size = u32::try_from(sequence_points.len()).unwrap() * 4 + 4;
        Self {
            sequence_points,
            code_size,
            is_static: true,
            user_code: true,
            ..Self::default()
        }
    }

    /// Mark the method static or instance.
    #[must_use]
    pub fn static_method(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }

    /// Mark the method as non-user code.
    #[must_use]
    pub fn non_user(mut self) -> Self {
        self.user_code = false;
        self
    }

    /// Attach async stepping info.
    #[must_use]
    pub fn with_async_info(mut self, info: AsyncMethodInfo) -> Self {
        self.async_info = Some(info);
        self
    }
}

// ── module / metadata / symbols ──────────────────────────────────────

/// A scripted module.
pub struct MockModule {
    me: Weak<MockModule>,
    data: Arc<ModuleData>,
}

impl MockModule {
    fn me(&self) -> ModuleRef {
        self.me.upgrade().expect("mock module self reference")
    }

    /// Primitive breakpoints installed into this module, active or not.
    #[must_use]
    pub fn installed_breakpoints(&self) -> Vec<Arc<MockPrimitiveBreakpoint>> {
        self.data.installed.lock().clone()
    }

    /// The active primitive breakpoint at (token, offset), if any.
    #[must_use]
    pub fn active_breakpoint_at(
        &self,
        token: MethodToken,
        offset: IlOffset,
    ) -> Option<Arc<MockPrimitiveBreakpoint>> {
        self.data
            .installed
            .lock()
            .iter()
            .find(|bp| bp.token == token && bp.offset == offset && bp.active.load(Ordering::SeqCst))
            .cloned()
    }

    /// Module-level JMC calls observed.
    #[must_use]
    pub fn jmc_calls(&self) -> Vec<bool> {
        self.data.module_jmc_calls.lock().clone()
    }

    /// True when the JIT was asked to disable optimization.
    #[must_use]
    pub fn jit_unoptimized(&self) -> bool {
        self.data.jit_unoptimized.load(Ordering::SeqCst)
    }

    /// Find a method token by name (first match).
    #[must_use]
    pub fn method_token(&self, name: &str) -> Option<MethodToken> {
        self.data
            .methods
            .iter()
            .find(|(_, spec)| spec.name == name)
            .map(|(token, _)| *token)
    }
}

impl RuntimeModule for MockModule {
    fn base_address(&self) -> ModuleAddress {
        self.data.address
    }

    fn path(&self) -> String {
        self.data.path.clone()
    }

    fn is_dynamic(&self) -> bool {
        self.data.dynamic
    }

    fn is_in_memory(&self) -> bool {
        self.data.in_memory
    }

    fn mvid(&self) -> Result<Uuid> {
        Ok(self.data.mvid)
    }

    fn entry_point_token(&self) -> Option<MethodToken> {
        self.data.entry_point
    }

    fn metadata(&self) -> Arc<dyn MetadataReader> {
        Arc::new(MockMetadata {
            data: Arc::clone(&self.data),
        })
    }

    fn load_symbols(&self) -> Result<Arc<dyn SymbolReader>> {
        if self.data.no_symbols || self.data.dynamic {
            return Err(DebugError::SymbolsMissing {
                module: self.data.path.clone(),
            });
        }
        Ok(Arc::new(MockSymbols {
            data: Arc::clone(&self.data),
        }))
    }

    fn function(&self, token: MethodToken) -> Result<FunctionRef> {
        if !self.data.methods.contains_key(&token) {
            return Err(DebugError::Runtime { code: 0x8013_1124 });
        }
        Ok(Arc::new(MockFunction {
            module: self.me(),
            data: Arc::clone(&self.data),
            token,
        }))
    }

    fn set_jit_disable_optimization(&self) -> Result<()> {
        self.data.jit_unoptimized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn set_jmc(&self, enable: bool) -> Result<bool> {
        self.data.module_jmc_calls.lock().push(enable);
        Ok(!self.data.jmc_refused)
    }

    fn set_type_jmc(&self, ty: TypeToken, enable: bool) -> Result<()> {
        self.data.type_jmc_overrides.lock().insert(ty, enable);
        Ok(())
    }

    fn set_method_jmc(&self, method: MethodToken, enable: bool) -> Result<()> {
        self.data.jmc_overrides.lock().insert(method, enable);
        Ok(())
    }
}

struct MockMetadata {
    data: Arc<ModuleData>,
}

impl MetadataReader for MockMetadata {
    fn type_defs(&self) -> Vec<TypeDefInfo> {
        self.data
            .types
            .iter()
            .map(|(token, spec)| TypeDefInfo {
                token: *token,
                name: spec.name.clone(),
            })
            .collect()
    }

    fn methods(&self, ty: TypeToken) -> Vec<MethodDefInfo> {
        let Some(spec) = self.data.types.get(&ty) else {
            return Vec::new();
        };
        spec.methods
            .iter()
            .filter_map(|token| {
                self.data.methods.get(token).map(|method| MethodDefInfo {
                    token: *token,
                    name: method.name.clone(),
                    is_static: method.is_static,
                })
            })
            .collect()
    }

    fn generic_params(&self, method: MethodToken) -> Vec<String> {
        self.data
            .methods
            .get(&method)
            .map(|spec| spec.generics.clone())
            .unwrap_or_default()
    }

    fn method_props(&self, method: MethodToken) -> Result<MethodProps> {
        let spec = self
            .data
            .methods
            .get(&method)
            .ok_or(DebugError::Runtime { code: 0x8013_1124 })?;
        let declaring_type = self
            .data
            .types
            .iter()
            .find(|(_, ty)| ty.methods.contains(&method))
            .map(|(token, _)| *token)
            .ok_or(DebugError::Runtime { code: 0x8013_1124 })?;
        Ok(MethodProps {
            name: spec.name.clone(),
            declaring_type,
            is_static: spec.is_static,
        })
    }

    fn enclosing_class(&self, ty: TypeToken) -> Option<TypeToken> {
        self.data.types.get(&ty).and_then(|spec| spec.enclosing)
    }

    fn simple_type_name(&self, ty: TypeToken) -> Result<String> {
        self.data
            .types
            .get(&ty)
            .map(|spec| spec.simple_name.clone())
            .ok_or(DebugError::Runtime { code: 0x8013_1124 })
    }

    fn type_attributes(&self, ty: TypeToken) -> Vec<String> {
        self.data
            .types
            .get(&ty)
            .map(|spec| spec.attributes.clone())
            .unwrap_or_default()
    }

    fn method_attributes(&self, method: MethodToken) -> Vec<String> {
        self.data
            .methods
            .get(&method)
            .map(|spec| spec.attributes.clone())
            .unwrap_or_default()
    }
}

struct MockSymbols {
    data: Arc<ModuleData>,
}

impl MockSymbols {
    fn spec(&self, method: MethodToken) -> Result<&MethodSpec> {
        self.data
            .methods
            .get(&method)
            .ok_or_else(|| DebugError::resolve_failed(format!("method {method}")))
    }
}

impl SymbolReader for MockSymbols {
    fn sequence_points(&self, method: MethodToken) -> Result<Vec<SequencePoint>> {
        Ok(self.spec(method)?.sequence_points.clone())
    }

    fn next_user_code_offset(
        &self,
        method: MethodToken,
        from: IlOffset,
    ) -> Result<Option<IlOffset>> {
        let spec = self.spec(method)?;
        Ok(spec
            .sequence_points
            .iter()
            .filter(|point| !point.is_hidden() && point.offset >= from)
            .map(|point| point.offset)
            .min())
    }

    fn step_range(&self, method: MethodToken, ip: IlOffset) -> Result<IlRange> {
        let spec = self.spec(method)?;
        let mut start = None;
        let mut end = IlOffset(spec.code_size);
        for point in &spec.sequence_points {
            if point.offset <= ip {
                start = Some(point.offset);
            } else {
                end = point.offset;
                break;
            }
        }
        let start = start.ok_or_else(|| DebugError::resolve_failed("statement at IP"))?;
        Ok(IlRange { start, end })
    }

    fn async_stepping_info(&self, method: MethodToken) -> Result<Option<AsyncMethodInfo>> {
        Ok(self.spec(method)?.async_info.clone())
    }

    fn hoisted_local_scopes(&self, method: MethodToken) -> Result<Vec<HoistedLocalScope>> {
        let _ = self.spec(method)?;
        Ok(Vec::new())
    }

    fn named_local(&self, method: MethodToken, _index: u32) -> Result<Option<NamedLocal>> {
        let _ = self.spec(method)?;
        Ok(None)
    }
}

// ── function / code / primitive breakpoints ──────────────────────────

struct MockFunction {
    module: ModuleRef,
    data: Arc<ModuleData>,
    token: MethodToken,
}

impl RuntimeFunction for MockFunction {
    fn token(&self) -> MethodToken {
        self.token
    }

    fn module(&self) -> ModuleRef {
        Arc::clone(&self.module)
    }

    fn il_code(&self) -> Result<CodeRef> {
        let spec = self
            .data
            .methods
            .get(&self.token)
            .ok_or(DebugError::Runtime { code: 0x8013_1124 })?;
        Ok(Arc::new(MockCode {
            data: Arc::clone(&self.data),
            token: self.token,
            size: spec.code_size,
        }))
    }

    fn jmc_status(&self) -> Result<bool> {
        if let Some(status) = self.data.jmc_overrides.lock().get(&self.token) {
            return Ok(*status);
        }
        Ok(self
            .data
            .methods
            .get(&self.token)
            .is_some_and(|spec| spec.user_code))
    }
}

struct MockCode {
    data: Arc<ModuleData>,
    token: MethodToken,
    size: u32,
}

impl RuntimeCode for MockCode {
    fn size(&self) -> u32 {
        self.size
    }

    fn create_breakpoint(&self, offset: IlOffset) -> Result<BreakpointRef> {
        let breakpoint = Arc::new(MockPrimitiveBreakpoint {
            module: self.data.address,
            token: self.token,
            offset,
            active: AtomicBool::new(false),
        });
        self.data.installed.lock().push(Arc::clone(&breakpoint));
        Ok(breakpoint)
    }
}

/// A primitive breakpoint installed by the core.
pub struct MockPrimitiveBreakpoint {
    /// Module the breakpoint lives in.
    pub module: ModuleAddress,
    /// Method the breakpoint lives in.
    pub token: MethodToken,
    /// IL offset of the breakpoint.
    pub offset: IlOffset,
    /// Activation state.
    pub active: AtomicBool,
}

impl RuntimeBreakpoint for MockPrimitiveBreakpoint {
    fn activate(&self, active: bool) -> Result<()> {
        self.active.store(active, Ordering::SeqCst);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn module_address(&self) -> ModuleAddress {
        self.module
    }

    fn method_token(&self) -> MethodToken {
        self.token
    }

    fn il_offset(&self) -> IlOffset {
        self.offset
    }
}

// ── steppers ─────────────────────────────────────────────────────────

/// Operations recorded by a mock stepper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOp {
    /// `configure` with the JMC flag value.
    Configure {
        /// Runtime-level just-my-code flag.
        jmc: bool,
    },
    /// A plain step.
    Step {
        /// Step-in versus step-over.
        step_in: bool,
    },
    /// A range step.
    StepRange {
        /// Step-in versus step-over.
        step_in: bool,
        /// The armed range.
        range: IlRange,
    },
    /// A step-out.
    StepOut,
    /// A deactivation.
    Deactivate,
}

/// A primitive stepper created by the core.
pub struct MockStepper {
    /// Thread the stepper is bound to.
    pub thread: ThreadId,
    active: AtomicBool,
    ops: Mutex<Vec<StepOp>>,
}

impl MockStepper {
    /// Operations recorded so far.
    #[must_use]
    pub fn ops(&self) -> Vec<StepOp> {
        self.ops.lock().clone()
    }
}

impl RuntimeStepper for MockStepper {
    fn configure(&self, config: &StepperConfig) -> Result<()> {
        self.ops.lock().push(StepOp::Configure {
            jmc: config.just_my_code,
        });
        Ok(())
    }

    fn step(&self, step_in: bool) -> Result<()> {
        self.active.store(true, Ordering::SeqCst);
        self.ops.lock().push(StepOp::Step { step_in });
        Ok(())
    }

    fn step_range(&self, step_in: bool, range: IlRange) -> Result<()> {
        self.active.store(true, Ordering::SeqCst);
        self.ops.lock().push(StepOp::StepRange { step_in, range });
        Ok(())
    }

    fn step_out(&self) -> Result<()> {
        self.active.store(true, Ordering::SeqCst);
        self.ops.lock().push(StepOp::StepOut);
        Ok(())
    }

    fn deactivate(&self) -> Result<()> {
        self.active.store(false, Ordering::SeqCst);
        self.ops.lock().push(StepOp::Deactivate);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

// ── frames / threads ─────────────────────────────────────────────────

/// A scripted stack frame.
pub struct MockFrame {
    function: FunctionRef,
    ip: Mutex<(IlOffset, IpMapping)>,
    args: Mutex<Vec<ValueRef>>,
    this: Mutex<Option<ValueRef>>,
}

impl MockFrame {
    /// A frame in `module`/`token` at the given IL offset.
    ///
    /// # Panics
    ///
    /// Panics when `token` is not scripted in `module`.
    #[must_use]
    pub fn at(module: &Arc<MockModule>, token: MethodToken, ip: u32) -> Arc<Self> {
        let function = module
            .function(token)
            .expect("frame function must be scripted");
        Arc::new(Self {
            function,
            ip: Mutex::new((IlOffset(ip), IpMapping::Exact)),
            args: Mutex::new(Vec::new()),
            this: Mutex::new(None),
        })
    }

    /// Move the frame's instruction pointer.
    pub fn set_ip(&self, ip: u32) {
        self.ip.lock().0 = IlOffset(ip);
    }

    /// Script the frame's arguments (`this` first for instance
    /// methods).
    pub fn set_arguments(&self, args: Vec<ValueRef>) {
        *self.args.lock() = args;
    }

    /// Script the frame's `this` argument.
    pub fn set_this(&self, this: ValueRef) {
        *self.this.lock() = Some(this);
    }
}

impl RuntimeFrame for MockFrame {
    fn function(&self) -> Result<FunctionRef> {
        Ok(Arc::clone(&self.function))
    }

    fn ip(&self) -> Result<(IlOffset, IpMapping)> {
        Ok(*self.ip.lock())
    }

    fn arguments(&self) -> Result<Vec<ValueRef>> {
        Ok(self.args.lock().clone())
    }

    fn this_argument(&self) -> Result<Option<ValueRef>> {
        Ok(self.this.lock().clone())
    }
}

/// A scripted managed thread.
pub struct MockThread {
    id: ThreadId,
    name: Mutex<String>,
    process: Mutex<Weak<MockProcess>>,
    frames: Mutex<Vec<FrameRef>>,
    exception: Mutex<Option<ValueRef>>,
}

impl MockThread {
    /// A thread not bound to any process, for subsystem unit tests
    /// that never touch the process.
    #[must_use]
    pub fn detached(id: ThreadId) -> Self {
        Self {
            id,
            name: Mutex::new(String::new()),
            process: Mutex::new(Weak::new()),
            frames: Mutex::new(Vec::new()),
            exception: Mutex::new(None),
        }
    }

    /// A thread bound to `process`.
    #[must_use]
    pub fn in_process(id: ThreadId, process: &Arc<MockProcess>) -> Arc<Self> {
        let thread = Arc::new(Self::detached(id));
        *thread.process.lock() = Arc::downgrade(process);
        thread
    }

    /// Replace the thread's stack, top frame first.
    pub fn set_frames(&self, frames: Vec<FrameRef>) {
        *self.frames.lock() = frames;
    }

    /// Script the current in-flight exception.
    pub fn set_exception(&self, exception: Option<ValueRef>) {
        *self.exception.lock() = exception;
    }

    /// Rename the thread.
    pub fn set_name(&self, name: &str) {
        *self.name.lock() = name.to_string();
    }
}

impl RuntimeThread for MockThread {
    fn id(&self) -> ThreadId {
        self.id
    }

    fn process(&self) -> ProcessRef {
        self.process
            .lock()
            .upgrade()
            .expect("mock thread is not bound to a process")
    }

    fn name(&self) -> String {
        self.name.lock().clone()
    }

    fn active_frame(&self) -> Result<Option<FrameRef>> {
        Ok(self.frames.lock().first().cloned())
    }

    fn frames(&self) -> Result<Vec<FrameRef>> {
        Ok(self.frames.lock().clone())
    }

    fn create_stepper(&self) -> Result<StepperRef> {
        let process = self
            .process
            .lock()
            .upgrade()
            .expect("stepper needs a process-bound thread");
        let stepper = Arc::new(MockStepper {
            thread: self.id,
            active: AtomicBool::new(false),
            ops: Mutex::new(Vec::new()),
        });
        process.steppers.lock().push(Arc::clone(&stepper));
        Ok(stepper)
    }

    fn current_exception(&self) -> Option<ValueRef> {
        self.exception.lock().clone()
    }
}

// ── process / app-domain / runtime ───────────────────────────────────

/// The scripted debuggee process.
pub struct MockProcess {
    me: Weak<MockProcess>,
    id: ProcessId,
    running: AtomicBool,
    resume_count: AtomicUsize,
    stop_count: AtomicUsize,
    queued_callbacks: AtomicBool,
    terminated: AtomicBool,
    detached: AtomicBool,
    threads: Mutex<Vec<Arc<MockThread>>>,
    modules: Mutex<Vec<Arc<MockModule>>>,
    steppers: Mutex<Vec<Arc<MockStepper>>>,
}

impl MockProcess {
    /// Create a process with the given pid.
    #[must_use]
    pub fn new(id: u32) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            id: ProcessId(id),
            running: AtomicBool::new(false),
            resume_count: AtomicUsize::new(0),
            stop_count: AtomicUsize::new(0),
            queued_callbacks: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            detached: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
            modules: Mutex::new(Vec::new()),
            steppers: Mutex::new(Vec::new()),
        })
    }

    /// The process's single app-domain.
    #[must_use]
    pub fn domain(&self) -> AppDomainRef {
        Arc::new(MockAppDomain {
            process: self.me.clone(),
        })
    }

    /// Attach a thread to the process.
    pub fn add_thread(&self, thread: &Arc<MockThread>) {
        *thread.process.lock() = self.me.clone();
        self.threads.lock().push(Arc::clone(thread));
    }

    /// Record a module as loaded (for domain breakpoint enumeration).
    pub fn add_module(&self, module: &Arc<MockModule>) {
        self.modules.lock().push(Arc::clone(module));
    }

    /// Script whether the runtime reports more queued callbacks.
    pub fn set_queued_callbacks(&self, queued: bool) {
        self.queued_callbacks.store(queued, Ordering::SeqCst);
    }

    /// Times the core resumed the process (directly or via a domain).
    #[must_use]
    pub fn resume_count(&self) -> usize {
        self.resume_count.load(Ordering::SeqCst)
    }

    /// Times the core synchronously stopped the process.
    #[must_use]
    pub fn stop_count(&self) -> usize {
        self.stop_count.load(Ordering::SeqCst)
    }

    /// True after a resume that no stop followed.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// True after `terminate`.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// True after `detach`.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Every stepper created on the process's threads.
    #[must_use]
    pub fn steppers_created(&self) -> Vec<Arc<MockStepper>> {
        self.steppers.lock().clone()
    }
}

impl RuntimeProcess for MockProcess {
    fn id(&self) -> ProcessId {
        self.id
    }

    fn stop(&self) -> Result<()> {
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.resume_count.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn has_queued_callbacks(&self) -> bool {
        self.queued_callbacks.load(Ordering::SeqCst)
    }

    fn app_domains(&self) -> Vec<AppDomainRef> {
        vec![self.domain()]
    }

    fn threads(&self) -> Vec<ThreadRef> {
        self.threads
            .lock()
            .iter()
            .map(|thread| Arc::clone(thread) as ThreadRef)
            .collect()
    }

    fn detach(&self) -> Result<()> {
        self.detached.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn terminate(&self, _exit_code: u32) -> Result<()> {
        self.terminated.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct MockAppDomain {
    process: Weak<MockProcess>,
}

impl MockAppDomain {
    fn target(&self) -> Arc<MockProcess> {
        self.process.upgrade().expect("process alive")
    }
}

impl RuntimeAppDomain for MockAppDomain {
    fn process(&self) -> ProcessRef {
        self.target()
    }

    fn resume(&self) -> Result<()> {
        self.target().resume()
    }

    fn steppers(&self) -> Vec<StepperRef> {
        self.target()
            .steppers
            .lock()
            .iter()
            .map(|stepper| Arc::clone(stepper) as StepperRef)
            .collect()
    }

    fn breakpoints(&self) -> Vec<BreakpointRef> {
        self.target()
            .modules
            .lock()
            .iter()
            .flat_map(|module| module.installed_breakpoints())
            .map(|breakpoint| breakpoint as BreakpointRef)
            .collect()
    }
}

/// The scripted runtime-debug entry point.
pub struct MockRuntime {
    initialized: AtomicBool,
    shut_down: AtomicBool,
    process: Arc<MockProcess>,
    sink: Mutex<Option<Arc<dyn RuntimeCallbackSink>>>,
}

impl MockRuntime {
    /// A runtime that will hand out `process` on launch or attach.
    #[must_use]
    pub fn new(process: Arc<MockProcess>) -> Arc<Self> {
        Arc::new(Self {
            initialized: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            process,
            sink: Mutex::new(None),
        })
    }

    /// The sink registered at launch/attach; tests drive callbacks
    /// through it.
    ///
    /// # Panics
    ///
    /// Panics before launch or attach.
    #[must_use]
    pub fn sink(&self) -> Arc<dyn RuntimeCallbackSink> {
        self.sink
            .lock()
            .clone()
            .expect("runtime not launched yet")
    }

    /// True after the session tore the native layer down.
    #[must_use]
    pub fn was_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn start(&self, sink: &Arc<dyn RuntimeCallbackSink>) -> Result<ProcessRef> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(DebugError::internal("runtime not initialized"));
        }
        *self.sink.lock() = Some(Arc::clone(sink));
        sink.on_process_created(Arc::clone(&self.process) as ProcessRef);
        Ok(Arc::clone(&self.process) as ProcessRef)
    }
}

impl RuntimeDebug for MockRuntime {
    fn initialize(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(DebugError::AlreadyInitialized);
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn launch(&self, _spec: &LaunchSpec, sink: Arc<dyn RuntimeCallbackSink>) -> Result<ProcessRef> {
        self.start(&sink)
    }

    fn attach(&self, _pid: ProcessId, sink: Arc<dyn RuntimeCallbackSink>) -> Result<ProcessRef> {
        self.start(&sink)
    }
}
