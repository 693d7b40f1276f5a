mod util;

use lungo_vm::{Error, JavaError, Klass, PoolEntry, Result, RuntimeConstantPool, Value, Vm};
use util::{run, static_method};

#[test]
fn arraylength_of_null() -> Result<()> {
    // aconst_null; arraylength; ireturn
    let result = run(vec![0x01, 0xbe, 0xac], "()I", 0, Vec::new());
    assert!(matches!(
        result,
        Err(Error::JavaError(JavaError::NullPointerException(_)))
    ));
    Ok(())
}

#[test]
fn int_array_store_and_load() -> Result<()> {
    // iconst_5; newarray int; dup; iconst_2; bipush 42; iastore; iconst_2;
    // iaload; ireturn
    let code = vec![
        0x08, 0xbc, 0x0a, 0x59, 0x05, 0x10, 0x2a, 0x4f, 0x05, 0x2e, 0xac,
    ];
    let result = run(code, "()I", 0, Vec::new())?;
    assert_eq!(42, result.as_int());
    Ok(())
}

#[test]
fn arraylength_reports_element_count() -> Result<()> {
    // bipush 17; newarray long; arraylength; ireturn
    let result = run(vec![0x10, 0x11, 0xbc, 0x0b, 0xbe, 0xac], "()I", 0, Vec::new())?;
    assert_eq!(17, result.as_int());
    Ok(())
}

#[test]
fn array_index_out_of_bounds() -> Result<()> {
    // iconst_1; newarray int; iconst_3; iaload; ireturn
    let result = run(vec![0x04, 0xbc, 0x0a, 0x06, 0x2e, 0xac], "()I", 0, Vec::new());
    assert!(matches!(
        result,
        Err(Error::JavaError(
            JavaError::ArrayIndexOutOfBoundsException { index: 3, length: 1 }
        ))
    ));

    // iconst_1; newarray int; iconst_m1; iaload; ireturn
    let result = run(vec![0x04, 0xbc, 0x0a, 0x02, 0x2e, 0xac], "()I", 0, Vec::new());
    assert!(matches!(
        result,
        Err(Error::JavaError(
            JavaError::ArrayIndexOutOfBoundsException { index: -1, length: 1 }
        ))
    ));
    Ok(())
}

#[test]
fn negative_array_size() -> Result<()> {
    // iconst_m1; newarray int; return
    let result = run(vec![0x02, 0xbc, 0x0a, 0xb1], "()V", 0, Vec::new());
    assert!(matches!(
        result,
        Err(Error::JavaError(JavaError::NegativeArraySizeException(-1)))
    ));
    Ok(())
}

#[test]
fn byte_array_narrows_stored_values() -> Result<()> {
    // iconst_1; newarray byte; dup; iconst_0; sipush 384; bastore; iconst_0;
    // baload; ireturn
    let code = vec![
        0x04, 0xbc, 0x08, 0x59, 0x03, 0x11, 0x01, 0x80, 0x54, 0x03, 0x33, 0xac,
    ];
    let result = run(code, "()I", 0, Vec::new())?;
    assert_eq!(-128, result.as_int());
    Ok(())
}

#[test]
fn char_array_is_unsigned() -> Result<()> {
    // iconst_1; newarray char; dup; iconst_0; iconst_m1; castore; iconst_0;
    // caload; ireturn
    let code = vec![
        0x04, 0xbc, 0x05, 0x59, 0x03, 0x02, 0x55, 0x03, 0x34, 0xac,
    ];
    let result = run(code, "()I", 0, Vec::new())?;
    assert_eq!(0xffff, result.as_int());
    Ok(())
}

fn reference_array_fixture() -> Result<(Vm, std::sync::Arc<Klass>, std::sync::Arc<Klass>)> {
    let element = Klass::builder("Element").build()?;
    let other = Klass::builder("Other").build()?;
    Ok((Vm::default(), element, other))
}

#[test]
fn reference_array_store_checks_component() -> Result<()> {
    let (vm, element, other) = reference_array_fixture()?;

    // iconst_1; anewarray #1; dup; iconst_0; aload_0; aastore; iconst_0;
    // aaload; areturn
    let code = vec![
        0x04, 0xbd, 0x00, 0x01, 0x59, 0x03, 0x2a, 0x53, 0x03, 0x32, 0xb0,
    ];
    let method = static_method(
        "test",
        "(Ljava/lang/Object;)Ljava/lang/Object;",
        1,
        code,
    )?;
    let klass = Klass::builder("Test").method(&method).build()?;
    let mut constant_pool = RuntimeConstantPool::new();
    constant_pool.add(PoolEntry::Class(element.clone()));
    klass.set_constant_pool(constant_pool)?;

    let stored = vm.heap().new_object(&element)?;
    let result = vm.invoke(&method, vec![Value::from_reference(stored)])?;
    assert_eq!(stored, result.as_reference());

    let wrong = vm.heap().new_object(&other)?;
    let result = vm.invoke(&method, vec![Value::from_reference(wrong)]);
    assert!(matches!(
        result,
        Err(Error::JavaError(JavaError::ClassCastException { .. }))
    ));

    // Storing null is always allowed.
    let result = vm.invoke(&method, vec![Value::NULL])?;
    assert!(result.as_reference().is_null());
    Ok(())
}
