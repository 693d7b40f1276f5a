mod util;

use lungo_vm::{
    Configuration, Error, JavaError, JvmType, Klass, FieldAccessFlags, MethodAccessFlags, Method,
    PoolEntry, Result, RuntimeConstantPool, Value, Vm,
};
use util::{static_method, test_class};

#[test]
fn new_object_with_field_access() -> Result<()> {
    // 0: new #1; 3: dup; 4: bipush 7; 6: putfield #2; 9: getfield #2;
    // 12: ireturn
    let code = vec![
        0xbb, 0x00, 0x01, 0x59, 0x10, 0x07, 0xb5, 0x00, 0x02, 0xb4, 0x00, 0x02, 0xac,
    ];
    let method = static_method("test", "()I", 0, code)?;
    let point = Klass::builder("Point")
        .field("x", JvmType::Int, FieldAccessFlags::default())
        .field("y", JvmType::Int, FieldAccessFlags::default())
        .method(&method)
        .build()?;
    let mut constant_pool = RuntimeConstantPool::new();
    constant_pool.add(PoolEntry::Class(point.clone()));
    constant_pool.add(PoolEntry::Field(point.field("x").expect("field x").clone()));
    point.set_constant_pool(constant_pool)?;

    let vm = Vm::default();
    let result = vm.invoke(&method, Vec::new())?;
    assert_eq!(7, result.as_int());
    assert_eq!(1, vm.heap().len());
    Ok(())
}

#[test]
fn static_initializer_runs_at_most_once() -> Result<()> {
    // <clinit>: getstatic #1; iconst_1; iadd; putstatic #1; return
    let initializer = Method::new(
        MethodAccessFlags::STATIC,
        "<clinit>",
        "()V",
        0,
        vec![0xb2, 0x00, 0x01, 0x04, 0x60, 0xb3, 0x00, 0x01, 0xb1],
    )?;
    // get: getstatic #1; ireturn
    let getter = static_method("get", "()I", 0, vec![0xb2, 0x00, 0x01, 0xac])?;
    let config = Klass::builder("Config")
        .field("VALUE", JvmType::Int, FieldAccessFlags::STATIC)
        .method(&initializer)
        .method(&getter)
        .build()?;
    let mut constant_pool = RuntimeConstantPool::new();
    constant_pool.add(PoolEntry::Field(
        config.field("VALUE").expect("field").clone(),
    ));
    config.set_constant_pool(constant_pool)?;

    let vm = Vm::default();
    assert!(!config.is_initialized());
    assert_eq!(1, vm.invoke(&getter, Vec::new())?.as_int());
    assert!(config.is_initialized());
    // A second touch must not rerun the initializer.
    assert_eq!(1, vm.invoke(&getter, Vec::new())?.as_int());
    Ok(())
}

#[test]
fn getfield_on_null_reference() -> Result<()> {
    // aconst_null; getfield #1; ireturn
    let method = static_method("test", "()I", 0, vec![0x01, 0xb4, 0x00, 0x01, 0xac])?;
    let point = Klass::builder("Point")
        .field("x", JvmType::Int, FieldAccessFlags::default())
        .method(&method)
        .build()?;
    let mut constant_pool = RuntimeConstantPool::new();
    constant_pool.add(PoolEntry::Field(point.field("x").expect("field").clone()));
    point.set_constant_pool(constant_pool)?;

    let vm = Vm::default();
    let result = vm.invoke(&method, Vec::new());
    assert!(matches!(
        result,
        Err(Error::JavaError(JavaError::NullPointerException(_)))
    ));
    Ok(())
}

fn cast_fixture() -> Result<(
    Vm,
    std::sync::Arc<Method>,
    std::sync::Arc<Klass>,
    std::sync::Arc<Klass>,
    std::sync::Arc<Klass>,
)> {
    let animal = Klass::builder("Animal").build()?;
    let dog = Klass::builder("Dog").super_class(&animal).build()?;
    let other = Klass::builder("Other").build()?;

    // aload_0; checkcast #1; areturn
    let method = static_method(
        "test",
        "(Ljava/lang/Object;)Ljava/lang/Object;",
        1,
        vec![0x2a, 0xc0, 0x00, 0x01, 0xb0],
    )?;
    let test = test_class(&[&method])?;
    let mut constant_pool = RuntimeConstantPool::new();
    constant_pool.add(PoolEntry::Class(animal));
    test.set_constant_pool(constant_pool)?;
    Ok((Vm::default(), method, test, dog, other))
}

#[test]
fn checkcast_accepts_subclass_and_null() -> Result<()> {
    let (vm, method, _test, dog, _other) = cast_fixture()?;
    let reference = vm.heap().new_object(&dog)?;
    // The reference under test stays on the stack and is returned unchanged.
    let result = vm.invoke(&method, vec![Value::from_reference(reference)])?;
    assert_eq!(reference, result.as_reference());

    let result = vm.invoke(&method, vec![Value::NULL])?;
    assert!(result.as_reference().is_null());
    Ok(())
}

#[test]
fn checkcast_rejects_unrelated_class() -> Result<()> {
    let (vm, method, _test, _dog, other) = cast_fixture()?;
    let reference = vm.heap().new_object(&other)?;
    let result = vm.invoke(&method, vec![Value::from_reference(reference)]);
    assert!(matches!(
        result,
        Err(Error::JavaError(JavaError::ClassCastException { .. }))
    ));
    Ok(())
}

#[test]
fn instanceof_reports_subclassing() -> Result<()> {
    let animal = Klass::builder("Animal").build()?;
    let dog = Klass::builder("Dog").super_class(&animal).build()?;
    let other = Klass::builder("Other").build()?;

    // aload_0; instanceof #1; ireturn
    let method = static_method(
        "test",
        "(Ljava/lang/Object;)I",
        1,
        vec![0x2a, 0xc1, 0x00, 0x01, 0xac],
    )?;
    let test = test_class(&[&method])?;
    let mut constant_pool = RuntimeConstantPool::new();
    constant_pool.add(PoolEntry::Class(animal.clone()));
    test.set_constant_pool(constant_pool)?;

    let vm = Vm::default();
    let dog_reference = vm.heap().new_object(&dog)?;
    let other_reference = vm.heap().new_object(&other)?;
    assert_eq!(
        1,
        vm.invoke(&method, vec![Value::from_reference(dog_reference)])?
            .as_int()
    );
    assert_eq!(
        0,
        vm.invoke(&method, vec![Value::from_reference(other_reference)])?
            .as_int()
    );
    assert_eq!(0, vm.invoke(&method, vec![Value::NULL])?.as_int());
    Ok(())
}

#[test]
fn monitor_enter_and_exit() -> Result<()> {
    // aload_0; monitorenter; aload_0; monitorexit; iconst_1; ireturn
    let method = static_method(
        "test",
        "(Ljava/lang/Object;)I",
        1,
        vec![0x2a, 0xc2, 0x2a, 0xc3, 0x04, 0xac],
    )?;
    let _klass = test_class(&[&method])?;
    let vm = Vm::default();
    let reference = vm.heap().intern_string("lock")?;
    let result = vm.invoke(&method, vec![Value::from_reference(reference)])?;
    assert_eq!(1, result.as_int());
    // The monitor is fully released after balanced enter/exit.
    assert_eq!(None, vm.heap().entry(reference)?.monitor().owner());
    Ok(())
}

#[test]
fn monitorexit_without_ownership() -> Result<()> {
    // aload_0; monitorexit; return
    let method = static_method(
        "test",
        "(Ljava/lang/Object;)V",
        1,
        vec![0x2a, 0xc3, 0xb1],
    )?;
    let _klass = test_class(&[&method])?;
    let vm = Vm::default();
    let reference = vm.heap().intern_string("lock")?;
    let result = vm.invoke(&method, vec![Value::from_reference(reference)]);
    assert!(matches!(
        result,
        Err(Error::JavaError(JavaError::IllegalMonitorStateException(_)))
    ));
    Ok(())
}

#[test]
fn ldc_string_is_interned() -> Result<()> {
    // ldc #1; areturn
    let method = static_method("test", "()Ljava/lang/String;", 0, vec![0x12, 0x01, 0xb0])?;
    let klass = test_class(&[&method])?;
    let mut constant_pool = RuntimeConstantPool::new();
    constant_pool.add(PoolEntry::String("hello".to_string()));
    klass.set_constant_pool(constant_pool)?;

    let vm = Vm::default();
    let first = vm.invoke(&method, Vec::new())?.as_reference();
    let second = vm.invoke(&method, Vec::new())?.as_reference();
    assert_eq!(first, second);
    assert_eq!("hello", vm.heap().string_value(first)?);
    Ok(())
}

#[test]
fn heap_budget_exhaustion() -> Result<()> {
    // new #1; pop; new #1; pop; return
    let method = static_method(
        "test",
        "()V",
        0,
        vec![0xbb, 0x00, 0x01, 0x57, 0xbb, 0x00, 0x01, 0x57, 0xb1],
    )?;
    let klass = test_class(&[&method])?;
    let mut constant_pool = RuntimeConstantPool::new();
    constant_pool.add(PoolEntry::Class(klass.clone()));
    klass.set_constant_pool(constant_pool)?;

    let configuration = Configuration::builder().max_heap_entries(1).build();
    let vm = Vm::new(configuration);
    let result = vm.invoke(&method, Vec::new());
    assert!(matches!(
        result,
        Err(Error::JavaError(JavaError::OutOfMemoryError(_)))
    ));
    Ok(())
}
