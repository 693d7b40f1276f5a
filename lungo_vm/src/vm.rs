//! The backend: lazy translation plus the interpreter entry point.

use crate::interpreter;
use crate::native::NativeRegistry;
use crate::trampoline::{Trampoline, TrampolineEmitter};
use crate::translator::Translator;
use crate::{Error, Result};
use dashmap::DashMap;
use lungo_runtime::{Frame, Heap, Klass, Method, Thread, Value};
use std::sync::Arc;
use tracing::debug;

/// Additional stack is reserved whenever the interpreter re-enters itself
/// and the remaining stack drops below the red zone.
const STACK_RED_ZONE: usize = 64 * 1024;
const STACK_GROWTH: usize = 4 * 1024 * 1024;

/// Virtual machine configuration.
#[derive(Clone, Debug)]
pub struct Configuration {
    max_heap_entries: usize,
    frame_pool_limit: usize,
}

impl Configuration {
    /// Start building a configuration.
    #[must_use]
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    /// The maximum number of heap entries before allocation fails.
    #[must_use]
    pub fn max_heap_entries(&self) -> usize {
        self.max_heap_entries
    }

    /// The number of released frames each thread retains for reuse.
    #[must_use]
    pub fn frame_pool_limit(&self) -> usize {
        self.frame_pool_limit
    }
}

impl Default for Configuration {
    fn default() -> Self {
        ConfigurationBuilder::default().build()
    }
}

/// Builder for [`Configuration`].
#[derive(Clone, Debug)]
pub struct ConfigurationBuilder {
    max_heap_entries: usize,
    frame_pool_limit: usize,
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        ConfigurationBuilder {
            max_heap_entries: Heap::DEFAULT_MAX_ENTRIES,
            frame_pool_limit: Thread::DEFAULT_FRAME_POOL_LIMIT,
        }
    }
}

impl ConfigurationBuilder {
    /// Create a builder with the default settings.
    #[must_use]
    pub fn new() -> Self {
        ConfigurationBuilder::default()
    }

    /// Set the heap entry budget.
    #[must_use]
    pub fn max_heap_entries(mut self, max_heap_entries: usize) -> Self {
        self.max_heap_entries = max_heap_entries;
        self
    }

    /// Set the per-thread frame pool retention.
    #[must_use]
    pub fn frame_pool_limit(mut self, frame_pool_limit: usize) -> Self {
        self.frame_pool_limit = frame_pool_limit;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> Configuration {
        Configuration {
            max_heap_entries: self.max_heap_entries,
            frame_pool_limit: self.frame_pool_limit,
        }
    }
}

/// The virtual machine: the heap, the native registry, and the per-method
/// trampoline cache.
///
/// `execute` is the backend interface: it lazily translates the method on
/// first invocation and runs the interpreter over the cached trampoline. The
/// interpreter re-enters `execute` for every Java-to-Java invocation.
#[derive(Debug)]
pub struct Vm {
    configuration: Configuration,
    heap: Heap,
    natives: NativeRegistry,
    trampolines: DashMap<u64, Arc<Trampoline>>,
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new(Configuration::default())
    }
}

impl Vm {
    /// Create a virtual machine with the given configuration.
    #[must_use]
    pub fn new(configuration: Configuration) -> Self {
        let heap = Heap::new(configuration.max_heap_entries());
        Vm {
            configuration,
            heap,
            natives: NativeRegistry::new(),
            trampolines: DashMap::new(),
        }
    }

    /// The configuration this machine was built with.
    #[must_use]
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// The heap.
    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The native method registry.
    #[must_use]
    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    /// Get the method's trampoline, translating on first use.
    ///
    /// Translation happens at most once per method: the first translation to
    /// finish is inserted into the cache and every later call observes it.
    ///
    /// # Errors
    ///
    /// if translation fails.
    pub fn trampoline(&self, method: &Arc<Method>) -> Result<Arc<Trampoline>> {
        if let Some(entry) = self.trampolines.get(&method.id()) {
            return Ok(entry.value().clone());
        }
        let klass = method.klass()?;
        let mut emitter = TrampolineEmitter::new();
        Translator::new(method, klass.constant_pool(), &self.heap).translate(&mut emitter)?;
        let trampoline = Arc::new(emitter.into_trampoline());
        let entry = self.trampolines.entry(method.id()).or_insert(trampoline);
        Ok(entry.value().clone())
    }

    /// Execute a method against a prepared frame: arguments in the locals,
    /// an empty operand stack. This is the backend interface the interpreter
    /// re-enters on every Java-to-Java invocation.
    ///
    /// # Errors
    ///
    /// if translation or interpretation fails.
    pub fn execute(&self, method: &Arc<Method>, frame: &mut Frame) -> Result<Value> {
        let trampoline = self.trampoline(method)?;
        debug!("executing {method}");
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || {
            interpreter::interpret(self, frame, &trampoline)
        })
    }

    /// Invoke a method with the given arguments. For instance methods the
    /// receiver is the first argument. The frame is drawn from and returned
    /// to the calling thread's pool.
    ///
    /// # Errors
    ///
    /// if execution fails.
    pub fn invoke(&self, method: &Arc<Method>, arguments: Vec<Value>) -> Result<Value> {
        Thread::with_current(|thread| {
            thread.set_frame_pool_limit(self.configuration.frame_pool_limit());
        });
        let locals = method.max_locals().max(arguments.len());
        let mut frame = Thread::with_current(|thread| thread.make_frame(locals));
        let result = Vm::prepare_arguments(&mut frame, arguments)
            .map_err(Error::from)
            .and_then(|()| self.execute(method, &mut frame));
        Thread::with_current(|thread| thread.free_frame(frame));
        result
    }

    fn prepare_arguments(frame: &mut Frame, arguments: Vec<Value>) -> lungo_runtime::Result<()> {
        for (index, argument) in arguments.into_iter().enumerate() {
            frame.set_local(index, argument)?;
        }
        Ok(())
    }

    /// Run a class's initialization gate, executing `<clinit>` on the first
    /// touch.
    ///
    /// # Errors
    ///
    /// if the initializer fails; later attempts observe the failure.
    pub fn initialize_class(&self, klass: &Arc<Klass>) -> Result<()> {
        klass.ensure_initialized(|| {
            let Some(initializer) = klass.initializer() else {
                return Ok(());
            };
            let mut frame =
                Thread::with_current(|thread| thread.make_frame(initializer.max_locals()));
            let result = self.execute(initializer, &mut frame);
            Thread::with_current(|thread| thread.free_frame(frame));
            result.map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_defaults() {
        let configuration = Configuration::default();
        assert_eq!(Heap::DEFAULT_MAX_ENTRIES, configuration.max_heap_entries());
        assert_eq!(
            Thread::DEFAULT_FRAME_POOL_LIMIT,
            configuration.frame_pool_limit()
        );
    }

    #[test]
    fn test_configuration_builder() {
        let configuration = Configuration::builder()
            .max_heap_entries(16)
            .frame_pool_limit(2)
            .build();
        assert_eq!(16, configuration.max_heap_entries());
        assert_eq!(2, configuration.frame_pool_limit());
    }

    #[test]
    fn test_vm_heap_uses_configured_budget() {
        let configuration = Configuration::builder().max_heap_entries(1).build();
        let vm = Vm::new(configuration);
        assert!(vm.heap().intern_string("only").is_ok());
        assert!(vm.heap().intern_string("more").is_err());
    }
}
