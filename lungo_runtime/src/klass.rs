use crate::Error::InternalError;
use crate::{
    ClassAccessFlags, Error, Field, FieldAccessFlags, JvmType, Method, Result,
    RuntimeConstantPool, Thread, Value,
};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum InitState {
    Uninitialized,
    InProgress(u64),
    Initialized,
    Failed,
}

/// A resolved class handle.
///
/// A class carries its superclass chain, its field and method tables, its
/// static value storage, its resolved constant pool, and a once-per-class
/// initialization gate. Virtual dispatch resolves `(name, descriptor)`
/// through [`Klass::lookup_method`] on the runtime class of a receiver.
#[derive(Debug)]
pub struct Klass {
    name: String,
    access_flags: ClassAccessFlags,
    superclass: Option<Arc<Klass>>,
    interfaces: Vec<Arc<Klass>>,
    fields: Vec<Arc<Field>>,
    methods: HashMap<(String, String), Arc<Method>>,
    initializer: Option<Arc<Method>>,
    constant_pool: OnceLock<RuntimeConstantPool>,
    static_values: RwLock<Vec<Value>>,
    instance_slots: usize,
    init_state: Mutex<InitState>,
    init_condition: Condvar,
}

impl Klass {
    /// Start building a class with the given name.
    pub fn builder<S: AsRef<str>>(name: S) -> KlassBuilder {
        KlassBuilder::new(name.as_ref())
    }

    /// Get the class name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the class access flags.
    #[must_use]
    pub fn access_flags(&self) -> &ClassAccessFlags {
        &self.access_flags
    }

    /// Get the superclass.
    #[must_use]
    pub fn superclass(&self) -> Option<&Arc<Klass>> {
        self.superclass.as_ref()
    }

    /// Get the directly implemented interfaces.
    #[must_use]
    pub fn interfaces(&self) -> &[Arc<Klass>] {
        &self.interfaces
    }

    /// Get the fields declared by this class.
    #[must_use]
    pub fn fields(&self) -> &[Arc<Field>] {
        &self.fields
    }

    /// Get a field declared by this class.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Arc<Field>> {
        self.fields.iter().find(|field| field.name() == name)
    }

    /// Get a method declared by this class.
    #[must_use]
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&Arc<Method>> {
        self.methods
            .get(&(name.to_string(), descriptor.to_string()))
    }

    /// Resolve `(name, descriptor)` against this class and its superclass
    /// chain; this is the lookup virtual dispatch performs on the runtime
    /// class of a receiver.
    #[must_use]
    pub fn lookup_method(&self, name: &str, descriptor: &str) -> Option<Arc<Method>> {
        if let Some(method) = self.method(name, descriptor) {
            return Some(method.clone());
        }
        self.superclass
            .as_ref()
            .and_then(|superclass| superclass.lookup_method(name, descriptor))
    }

    /// The class initializer (`<clinit>`), if the class declares one.
    #[must_use]
    pub fn initializer(&self) -> Option<&Arc<Method>> {
        self.initializer.as_ref()
    }

    /// Get the resolved constant pool.
    #[must_use]
    pub fn constant_pool(&self) -> &RuntimeConstantPool {
        self.constant_pool.get_or_init(RuntimeConstantPool::new)
    }

    /// Attach the resolved constant pool. Pools can reference fields and
    /// methods of the class they belong to, so they are attached after the
    /// class is built.
    ///
    /// # Errors
    ///
    /// if a constant pool has already been attached.
    pub fn set_constant_pool(&self, constant_pool: RuntimeConstantPool) -> Result<()> {
        self.constant_pool
            .set(constant_pool)
            .map_err(|_| InternalError(format!("class {} already has a constant pool", self.name)))
    }

    /// The number of instance field slots an object of this class requires,
    /// including slots inherited from superclasses.
    #[must_use]
    pub fn instance_slots(&self) -> usize {
        self.instance_slots
    }

    /// Read a static value by field offset.
    ///
    /// # Errors
    ///
    /// if the offset does not index the static storage.
    pub fn static_value(&self, offset: u16) -> Result<Value> {
        self.static_values
            .read()
            .get(usize::from(offset))
            .copied()
            .ok_or(Error::InvalidFieldOffset(offset))
    }

    /// Write a static value by field offset.
    ///
    /// # Errors
    ///
    /// if the offset does not index the static storage.
    pub fn set_static_value(&self, offset: u16, value: Value) -> Result<()> {
        let mut static_values = self.static_values.write();
        let slot = static_values
            .get_mut(usize::from(offset))
            .ok_or(Error::InvalidFieldOffset(offset))?;
        *slot = value;
        Ok(())
    }

    /// Check if this class is `other` or a subclass of it, walking the
    /// superclass chain and implemented interfaces. Classes are compared by
    /// name.
    #[must_use]
    pub fn is_subclass_of(&self, other: &Klass) -> bool {
        if self.name == other.name {
            return true;
        }
        if let Some(superclass) = &self.superclass
            && superclass.is_subclass_of(other)
        {
            return true;
        }
        self.interfaces
            .iter()
            .any(|interface| interface.is_subclass_of(other))
    }

    /// Check if class initialization has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        *self.init_state.lock() == InitState::Initialized
    }

    /// Run class initialization at most once.
    ///
    /// The first thread to arrive runs `run` (with the gate released, so the
    /// initializer may touch the class recursively); concurrent first-touches
    /// block until it completes; the initializing thread itself re-enters
    /// freely. Later calls are no-ops.
    ///
    /// # Errors
    ///
    /// if `run` fails, or if a previous initialization attempt failed.
    pub fn ensure_initialized<E>(
        &self,
        run: impl FnOnce() -> core::result::Result<(), E>,
    ) -> core::result::Result<(), E>
    where
        E: From<Error>,
    {
        let thread_id = Thread::current_id();
        {
            let mut state = self.init_state.lock();
            loop {
                match *state {
                    InitState::Initialized => return Ok(()),
                    InitState::InProgress(owner) if owner == thread_id => return Ok(()),
                    InitState::InProgress(_) => self.init_condition.wait(&mut state),
                    InitState::Failed => {
                        return Err(Error::ClassInitializationFailed(self.name.clone()).into());
                    }
                    InitState::Uninitialized => {
                        *state = InitState::InProgress(thread_id);
                        break;
                    }
                }
            }
        }

        tracing::debug!("initializing class {}", self.name);
        let result = run();
        let mut state = self.init_state.lock();
        *state = if result.is_ok() {
            InitState::Initialized
        } else {
            InitState::Failed
        };
        self.init_condition.notify_all();
        result
    }
}

impl fmt::Display for Klass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Builder assembling a [`Klass`] from parsed class data; field offsets are
/// assigned here (statics from zero, instance slots continuing past the
/// superclass layout).
#[derive(Debug, Default)]
pub struct KlassBuilder {
    name: String,
    access_flags: ClassAccessFlags,
    superclass: Option<Arc<Klass>>,
    interfaces: Vec<Arc<Klass>>,
    fields: Vec<(String, JvmType, FieldAccessFlags)>,
    methods: Vec<Arc<Method>>,
}

impl KlassBuilder {
    fn new(name: &str) -> Self {
        KlassBuilder {
            name: name.to_string(),
            ..KlassBuilder::default()
        }
    }

    /// Set the class access flags.
    #[must_use]
    pub fn access_flags(mut self, access_flags: ClassAccessFlags) -> Self {
        self.access_flags = access_flags;
        self
    }

    /// Set the superclass.
    #[must_use]
    pub fn super_class(mut self, superclass: &Arc<Klass>) -> Self {
        self.superclass = Some(superclass.clone());
        self
    }

    /// Add a directly implemented interface.
    #[must_use]
    pub fn interface(mut self, interface: &Arc<Klass>) -> Self {
        self.interfaces.push(interface.clone());
        self
    }

    /// Declare a field.
    #[must_use]
    pub fn field(mut self, name: &str, field_type: JvmType, access_flags: FieldAccessFlags) -> Self {
        self.fields
            .push((name.to_string(), field_type, access_flags));
        self
    }

    /// Declare a method.
    #[must_use]
    pub fn method(mut self, method: &Arc<Method>) -> Self {
        self.methods.push(method.clone());
        self
    }

    /// Build the class and bind its fields and methods to it.
    ///
    /// # Errors
    ///
    /// if two methods share a name and descriptor, or the field layout
    /// overflows the 16-bit offset space.
    pub fn build(self) -> Result<Arc<Klass>> {
        let mut static_offset = 0u16;
        let mut instance_offset = u16::try_from(
            self.superclass
                .as_ref()
                .map_or(0, |superclass| superclass.instance_slots()),
        )
        .map_err(|_| InternalError(format!("class {} field layout overflow", self.name)))?;

        let mut fields = Vec::with_capacity(self.fields.len());
        for (name, field_type, access_flags) in self.fields {
            let offset = if access_flags.contains(FieldAccessFlags::STATIC) {
                let offset = static_offset;
                static_offset += 1;
                offset
            } else {
                let offset = instance_offset;
                instance_offset += 1;
                offset
            };
            fields.push(Arc::new(Field::new(name, field_type, access_flags, offset)));
        }

        let mut methods = HashMap::with_capacity(self.methods.len());
        for method in &self.methods {
            let key = (method.name().to_string(), method.descriptor().to_string());
            if methods.insert(key, method.clone()).is_some() {
                return Err(InternalError(format!(
                    "class {} declares {}{} twice",
                    self.name,
                    method.name(),
                    method.descriptor()
                )));
            }
        }
        let initializer = methods
            .get(&("<clinit>".to_string(), "()V".to_string()))
            .cloned();

        let klass = Arc::new(Klass {
            name: self.name,
            access_flags: self.access_flags,
            superclass: self.superclass,
            interfaces: self.interfaces,
            fields,
            methods,
            initializer,
            constant_pool: OnceLock::new(),
            static_values: RwLock::new(vec![Value::NULL; usize::from(static_offset)]),
            instance_slots: usize::from(instance_offset),
            init_state: Mutex::new(InitState::Uninitialized),
            init_condition: Condvar::new(),
        });

        let owner = Arc::downgrade(&klass);
        for field in &klass.fields {
            field.bind(owner.clone());
        }
        for method in klass.methods.values() {
            method.bind(owner.clone());
        }
        Ok(klass)
    }
}
