mod util;

use lungo_vm::{
    ClassAccessFlags, Error, JavaError, Klass, Method, MethodAccessFlags, NativeContext,
    PoolEntry, Result, RuntimeConstantPool, Value, Vm,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use util::{static_method, test_class};

#[test]
fn invokestatic_factorial_recursion() -> Result<()> {
    //  0: iload_0           6: iload_0        10: invokestatic #1
    //  1: ifgt 6            7: iload_0        13: imul
    //  4: iconst_1          8: iconst_1       14: ireturn
    //  5: ireturn           9: isub
    let code = vec![
        0x1a, 0x9d, 0x00, 0x05, 0x04, 0xac, 0x1a, 0x1a, 0x04, 0x64, 0xb8, 0x00, 0x01, 0x68, 0xac,
    ];
    let factorial = static_method("factorial", "(I)I", 1, code)?;
    let klass = test_class(&[&factorial])?;
    let mut constant_pool = RuntimeConstantPool::new();
    constant_pool.add(PoolEntry::Method(factorial.clone()));
    klass.set_constant_pool(constant_pool)?;

    let vm = Vm::default();
    assert_eq!(120, vm.invoke(&factorial, vec![Value::from_int(5)])?.as_int());
    assert_eq!(1, vm.invoke(&factorial, vec![Value::from_int(0)])?.as_int());
    Ok(())
}

#[test]
fn invokestatic_argument_order() -> Result<()> {
    // sub: iload_0; iload_1; isub; ireturn
    let sub = static_method("sub", "(II)I", 2, vec![0x1a, 0x1b, 0x64, 0xac])?;
    // caller: bipush 10; bipush 3; invokestatic #1; ireturn
    let caller = static_method(
        "caller",
        "()I",
        0,
        vec![0x10, 0x0a, 0x10, 0x03, 0xb8, 0x00, 0x01, 0xac],
    )?;
    let klass = test_class(&[&sub, &caller])?;
    let mut constant_pool = RuntimeConstantPool::new();
    constant_pool.add(PoolEntry::Method(sub.clone()));
    klass.set_constant_pool(constant_pool)?;

    let vm = Vm::default();
    assert_eq!(7, vm.invoke(&caller, Vec::new())?.as_int());
    Ok(())
}

#[test]
fn void_call_leaves_caller_stack_balanced() -> Result<()> {
    let noop = static_method("noop", "()V", 0, vec![0xb1])?;
    // caller: invokestatic #1; bipush 5; ireturn
    let caller = static_method("caller", "()I", 0, vec![0xb8, 0x00, 0x01, 0x10, 0x05, 0xac])?;
    let klass = test_class(&[&noop, &caller])?;
    let mut constant_pool = RuntimeConstantPool::new();
    constant_pool.add(PoolEntry::Method(noop.clone()));
    klass.set_constant_pool(constant_pool)?;

    let vm = Vm::default();
    assert_eq!(5, vm.invoke(&caller, Vec::new())?.as_int());
    Ok(())
}

fn animal_hierarchy() -> Result<(Arc<Klass>, Arc<Klass>, Arc<Klass>, Arc<Method>)> {
    // speak: iconst_1; ireturn
    let animal_speak = Method::new(
        MethodAccessFlags::PUBLIC,
        "speak",
        "()I",
        1,
        vec![0x04, 0xac],
    )?;
    let animal = Klass::builder("Animal").method(&animal_speak).build()?;

    // speak: iconst_2; ireturn
    let dog_speak = Method::new(
        MethodAccessFlags::PUBLIC,
        "speak",
        "()I",
        1,
        vec![0x05, 0xac],
    )?;
    let dog = Klass::builder("Dog")
        .super_class(&animal)
        .method(&dog_speak)
        .build()?;

    let cat = Klass::builder("Cat").super_class(&animal).build()?;
    Ok((animal, dog, cat, animal_speak))
}

#[test]
fn invokevirtual_dispatches_on_runtime_class() -> Result<()> {
    let (animal, dog, cat, animal_speak) = animal_hierarchy()?;

    // caller: aload_0; invokevirtual #1; ireturn
    let caller = static_method(
        "caller",
        "(Ljava/lang/Object;)I",
        1,
        vec![0x2a, 0xb6, 0x00, 0x01, 0xac],
    )?;
    let klass = test_class(&[&caller])?;
    let mut constant_pool = RuntimeConstantPool::new();
    constant_pool.add(PoolEntry::Method(animal_speak));
    klass.set_constant_pool(constant_pool)?;

    let vm = Vm::default();
    let animal_instance = vm.heap().new_object(&animal)?;
    let dog_instance = vm.heap().new_object(&dog)?;
    let cat_instance = vm.heap().new_object(&cat)?;
    assert_eq!(
        1,
        vm.invoke(&caller, vec![Value::from_reference(animal_instance)])?
            .as_int()
    );
    assert_eq!(
        2,
        vm.invoke(&caller, vec![Value::from_reference(dog_instance)])?
            .as_int()
    );
    // Cat inherits Animal's implementation through the superclass chain.
    assert_eq!(
        1,
        vm.invoke(&caller, vec![Value::from_reference(cat_instance)])?
            .as_int()
    );
    Ok(())
}

#[test]
fn invokevirtual_on_null_receiver() -> Result<()> {
    let (_animal, _dog, _cat, animal_speak) = animal_hierarchy()?;
    let caller = static_method(
        "caller",
        "(Ljava/lang/Object;)I",
        1,
        vec![0x2a, 0xb6, 0x00, 0x01, 0xac],
    )?;
    let klass = test_class(&[&caller])?;
    let mut constant_pool = RuntimeConstantPool::new();
    constant_pool.add(PoolEntry::Method(animal_speak));
    klass.set_constant_pool(constant_pool)?;

    let vm = Vm::default();
    let result = vm.invoke(&caller, vec![Value::NULL]);
    assert!(matches!(
        result,
        Err(Error::JavaError(JavaError::NullPointerException(_)))
    ));
    Ok(())
}

#[test]
fn invokeinterface_dispatches_like_virtual() -> Result<()> {
    let speak_description = Method::new(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
        "speak",
        "()I",
        1,
        Vec::new(),
    )?;
    let speaker = Klass::builder("Speaker")
        .access_flags(ClassAccessFlags::INTERFACE)
        .method(&speak_description)
        .build()?;
    let dog_speak = Method::new(
        MethodAccessFlags::PUBLIC,
        "speak",
        "()I",
        1,
        vec![0x05, 0xac],
    )?;
    let dog = Klass::builder("Dog")
        .interface(&speaker)
        .method(&dog_speak)
        .build()?;

    // caller: aload_0; invokeinterface #1, 1, 0; ireturn
    let caller = static_method(
        "caller",
        "(Ljava/lang/Object;)I",
        1,
        vec![0x2a, 0xb9, 0x00, 0x01, 0x01, 0x00, 0xac],
    )?;
    let klass = test_class(&[&caller])?;
    let mut constant_pool = RuntimeConstantPool::new();
    constant_pool.add(PoolEntry::Method(speak_description));
    klass.set_constant_pool(constant_pool)?;

    let vm = Vm::default();
    let dog_instance = vm.heap().new_object(&dog)?;
    assert_eq!(
        2,
        vm.invoke(&caller, vec![Value::from_reference(dog_instance)])?
            .as_int()
    );
    Ok(())
}

#[test]
fn invokespecial_uses_immediate_target() -> Result<()> {
    // twice: iload_1; iconst_2; imul; ireturn
    let twice = Method::new(
        MethodAccessFlags::PRIVATE,
        "twice",
        "(I)I",
        2,
        vec![0x1b, 0x05, 0x68, 0xac],
    )?;
    let helper = Klass::builder("Helper").method(&twice).build()?;

    // caller: aload_0; iload_1; invokespecial #1; ireturn
    let caller = static_method(
        "caller",
        "(Ljava/lang/Object;I)I",
        2,
        vec![0x2a, 0x1b, 0xb7, 0x00, 0x01, 0xac],
    )?;
    let klass = test_class(&[&caller])?;
    let mut constant_pool = RuntimeConstantPool::new();
    constant_pool.add(PoolEntry::Method(twice.clone()));
    klass.set_constant_pool(constant_pool)?;

    let vm = Vm::default();
    let instance = vm.heap().new_object(&helper)?;
    let result = vm.invoke(
        &caller,
        vec![Value::from_reference(instance), Value::from_int(21)],
    )?;
    assert_eq!(42, result.as_int());

    let result = vm.invoke(&caller, vec![Value::NULL, Value::from_int(21)]);
    assert!(matches!(
        result,
        Err(Error::JavaError(JavaError::NullPointerException(_)))
    ));
    Ok(())
}

fn native_add(
    _context: &NativeContext<'_>,
    _klass: &Arc<Klass>,
    arguments: &[Value],
) -> Result<Option<Value>> {
    let result = arguments[0].as_int() + arguments[1].as_int();
    Ok(Some(Value::from_int(result)))
}

#[test]
fn invokestatic_dispatches_native_methods() -> Result<()> {
    let add = Method::new(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC | MethodAccessFlags::NATIVE,
        "add",
        "(II)I",
        0,
        Vec::new(),
    )?;
    let native_klass = Klass::builder("demo/Native").method(&add).build()?;

    // caller: iload_0; iload_1; invokestatic #1; ireturn
    let caller = static_method(
        "caller",
        "(II)I",
        2,
        vec![0x1a, 0x1b, 0xb8, 0x00, 0x01, 0xac],
    )?;
    let klass = test_class(&[&caller])?;
    let mut constant_pool = RuntimeConstantPool::new();
    constant_pool.add(PoolEntry::Method(add.clone()));
    klass.set_constant_pool(constant_pool)?;

    let vm = Vm::default();
    vm.natives().register("Java_demo_Native_add", native_add);
    let result = vm.invoke(
        &caller,
        vec![Value::from_int(5), Value::from_int(4)],
    )?;
    assert_eq!(9, result.as_int());
    drop(native_klass);
    Ok(())
}

static LOGGED: AtomicI32 = AtomicI32::new(0);

fn native_log(
    _context: &NativeContext<'_>,
    _klass: &Arc<Klass>,
    arguments: &[Value],
) -> Result<Option<Value>> {
    LOGGED.store(arguments[0].as_int(), Ordering::Relaxed);
    Ok(None)
}

#[test]
fn native_void_call_pushes_nothing() -> Result<()> {
    let log = Method::new(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC | MethodAccessFlags::NATIVE,
        "log",
        "(I)V",
        0,
        Vec::new(),
    )?;
    let native_klass = Klass::builder("demo/Native").method(&log).build()?;

    // caller: iload_0; invokestatic #1; bipush 3; ireturn
    let caller = static_method(
        "caller",
        "(I)I",
        1,
        vec![0x1a, 0xb8, 0x00, 0x01, 0x10, 0x03, 0xac],
    )?;
    let klass = test_class(&[&caller])?;
    let mut constant_pool = RuntimeConstantPool::new();
    constant_pool.add(PoolEntry::Method(log.clone()));
    klass.set_constant_pool(constant_pool)?;

    let vm = Vm::default();
    vm.natives().register("Java_demo_Native_log", native_log);
    let result = vm.invoke(&caller, vec![Value::from_int(77)])?;
    assert_eq!(3, result.as_int());
    assert_eq!(77, LOGGED.load(Ordering::Relaxed));
    drop(native_klass);
    Ok(())
}

#[test]
fn unresolved_native_symbol() -> Result<()> {
    let missing = Method::new(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC | MethodAccessFlags::NATIVE,
        "missing",
        "()V",
        0,
        Vec::new(),
    )?;
    let native_klass = Klass::builder("demo/Native").method(&missing).build()?;

    // caller: invokestatic #1; return
    let caller = static_method("caller", "()V", 0, vec![0xb8, 0x00, 0x01, 0xb1])?;
    let klass = test_class(&[&caller])?;
    let mut constant_pool = RuntimeConstantPool::new();
    constant_pool.add(PoolEntry::Method(missing.clone()));
    klass.set_constant_pool(constant_pool)?;

    let vm = Vm::default();
    let result = vm.invoke(&caller, Vec::new());
    assert!(matches!(
        result,
        Err(Error::JavaError(JavaError::UnsatisfiedLinkError(_)))
    ));
    drop(native_klass);
    Ok(())
}

#[test]
fn deep_recursion_grows_the_stack() -> Result<()> {
    //  0: iload_0; 1: ifle 11; 4: iload_0; 5: iconst_1; 6: isub;
    //  7: invokestatic #1; 10: ireturn; 11: iconst_0; 12: ireturn
    let code = vec![
        0x1a, 0x9e, 0x00, 0x0a, 0x1a, 0x04, 0x64, 0xb8, 0x00, 0x01, 0xac, 0x03, 0xac,
    ];
    let countdown = static_method("countdown", "(I)I", 1, code)?;
    let klass = test_class(&[&countdown])?;
    let mut constant_pool = RuntimeConstantPool::new();
    constant_pool.add(PoolEntry::Method(countdown.clone()));
    klass.set_constant_pool(constant_pool)?;

    let vm = Vm::default();
    let result = vm.invoke(&countdown, vec![Value::from_int(10_000)])?;
    assert_eq!(0, result.as_int());
    Ok(())
}
