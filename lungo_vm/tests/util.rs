use lungo_vm::{Klass, Method, MethodAccessFlags, Result, Value, Vm};
use std::sync::Arc;

/// Creates a public static method with the given code.
pub fn static_method(
    name: &str,
    descriptor: &str,
    max_locals: usize,
    code: Vec<u8>,
) -> Result<Arc<Method>> {
    let method = Method::new(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        name,
        descriptor,
        max_locals,
        code,
    )?;
    Ok(method)
}

/// Creates a class named `Test` declaring the given methods.
pub fn test_class(methods: &[&Arc<Method>]) -> Result<Arc<Klass>> {
    let mut builder = Klass::builder("Test");
    for method in methods {
        builder = builder.method(method);
    }
    let klass = builder.build()?;
    Ok(klass)
}

/// Builds a single-method class around `code` and invokes it on a fresh
/// virtual machine.
pub fn run(code: Vec<u8>, descriptor: &str, max_locals: usize, arguments: Vec<Value>) -> Result<Value> {
    let method = static_method("test", descriptor, max_locals, code)?;
    let _klass = test_class(&[&method])?;
    let vm = Vm::default();
    vm.invoke(&method, arguments)
}
